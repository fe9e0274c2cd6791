//! Duplex relay between a transport and a PTY.
//!
//! Each session runs two pumps. The output pump moves chunks read from the PTY
//! to the client as `output` messages, the input pump moves `input` payloads
//! from the client towards the PTY and routes `resize` requests to the
//! session. Blocking PTY I/O runs on dedicated blocking threads connected to
//! the pumps by bounded channels, so a slow side applies backpressure instead
//! of buffering without limit.
//!
//! Pumps never tear the session down themselves; they return a
//! [`CloseReason`] for the lifecycle manager.

use std::fmt::Display;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use protocol::Message;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::session::{CloseReason, GeometryLimits, Session, SessionId};

/// Size of a single PTY read.
pub const CHUNK_SIZE: usize = 4096;

/// Time allowed to flush already-read output once the session is closing.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Starts the blocking loop that drains the PTY master into `tx`.
///
/// Ends on EOF, on a read error (Linux reports `EIO` once the child is gone),
/// or when the receiving pump has stopped. Dropping `tx` then signals
/// end-of-stream to the output pump.
pub fn spawn_pty_reader(
    session_id: SessionId,
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::Sender<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!(session_id = %session_id, "PTY reached EOF");
                    break;
                }
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        tracing::debug!(session_id = %session_id, "Output pump gone, stopping reader");
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(session_id = %session_id, error = %e, "PTY read ended");
                    break;
                }
            }
        }
    })
}

/// Starts the blocking loop that writes payloads from `rx` to the PTY master.
///
/// Each payload is written in full and flushed before the next one, so input
/// reaches the process in order. Once `token` is cancelled, payloads still
/// queued are discarded.
pub fn spawn_pty_writer(
    session_id: SessionId,
    mut writer: Box<dyn Write + Send>,
    mut rx: mpsc::Receiver<Vec<u8>>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while let Some(data) = rx.blocking_recv() {
            if token.is_cancelled() {
                tracing::debug!(session_id = %session_id, "Session closing, discarding queued input");
                break;
            }
            if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
                tracing::debug!(session_id = %session_id, error = %e, "PTY write failed");
                break;
            }
        }
    })
}

/// Forwards PTY output to the client until either side ends.
///
/// Returns `ProcessExited` when the reader side is gone, `TransportClosed`
/// when the sink fails, and `Terminated` when the session was cancelled. On
/// cancellation, output already read is flushed for up to `flush_timeout`
/// so a final notice still reaches the client. The sink is always closed.
pub async fn pump_output<S>(
    session: Arc<Session>,
    mut rx: mpsc::Receiver<Vec<u8>>,
    sink: S,
    flush_timeout: Duration,
) -> CloseReason
where
    S: Sink<Message>,
    S::Error: Display,
{
    let mut sink = Box::pin(sink);
    let token = session.cancellation_token().clone();

    let reason = loop {
        let chunk = tokio::select! {
            biased;
            _ = token.cancelled() => break CloseReason::Terminated,
            chunk = rx.recv() => chunk,
        };
        let Some(bytes) = chunk else {
            break CloseReason::ProcessExited;
        };

        session.touch();
        let sent = tokio::select! {
            sent = sink.send(Message::output(bytes)) => sent,
            _ = token.cancelled() => break CloseReason::Terminated,
        };
        if let Err(e) = sent {
            tracing::debug!(session_id = %session.id(), error = %e, "Transport send failed");
            break CloseReason::TransportClosed;
        }
    };

    if reason != CloseReason::TransportClosed {
        let flush = async {
            while let Ok(bytes) = rx.try_recv() {
                if sink.send(Message::output(bytes)).await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(flush_timeout, flush).await.is_err() {
            tracing::debug!(session_id = %session.id(), "Timed out flushing output");
        }
    }

    let _ = tokio::time::timeout(flush_timeout, sink.close()).await;

    tracing::debug!(session_id = %session.id(), reason = ?reason, "Output pump finished");
    reason
}

/// Forwards client messages to the PTY until either side ends.
///
/// `input` payloads go to the writer verbatim, `resize` requests are validated
/// against `limits` and applied to the session. Returns `TransportClosed`
/// when the stream ends or fails, `ProcessExited` when the writer is gone, and
/// `Terminated` when the session was cancelled.
pub async fn pump_input<St, E>(
    session: Arc<Session>,
    stream: St,
    tx: mpsc::Sender<Vec<u8>>,
    limits: GeometryLimits,
) -> CloseReason
where
    St: Stream<Item = Result<Message, E>>,
    E: Display,
{
    let mut stream = Box::pin(stream);
    let token = session.cancellation_token().clone();

    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break CloseReason::Terminated,
            next = stream.next() => next,
        };

        match next {
            None => break CloseReason::TransportClosed,
            Some(Err(e)) => {
                tracing::debug!(session_id = %session.id(), error = %e, "Transport receive failed");
                break CloseReason::TransportClosed;
            }
            Some(Ok(Message::Input(payload))) => {
                if token.is_cancelled() {
                    break CloseReason::Terminated;
                }
                session.touch();
                let sent = tokio::select! {
                    biased;
                    _ = token.cancelled() => break CloseReason::Terminated,
                    sent = tx.send(payload.into_bytes()) => sent,
                };
                if sent.is_err() {
                    break CloseReason::ProcessExited;
                }
            }
            Some(Ok(Message::Resize(resize))) => {
                let (cols, rows) = (i64::from(resize.cols), i64::from(resize.rows));
                match session.resize_checked(cols, rows, &limits).await {
                    Ok(outcome) => tracing::debug!(
                        session_id = %session.id(),
                        cols,
                        rows,
                        outcome = ?outcome,
                        "Resize request"
                    ),
                    Err(e) => tracing::warn!(
                        session_id = %session.id(),
                        cols,
                        rows,
                        error = %e,
                        "Rejected resize request"
                    ),
                }
            }
            Some(Ok(Message::Output(_))) => {
                tracing::debug!(session_id = %session.id(), "Ignoring output message from client");
            }
        }
    };

    tracing::debug!(session_id = %session.id(), reason = ?reason, "Input pump finished");
    reason
}
