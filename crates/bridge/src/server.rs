//! WebSocket transport for browser terminals.
//!
//! Listens for upgrade requests on a single path. The query string names the
//! target host (`host`, required), an optional session id (`session`), and the
//! message encoding (`encoding`, `json` or `msgpack`). Every accepted
//! connection is handed to the [`LifecycleManager`] as a message sink and a
//! message stream.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use protocol::{Encoding, Message, ProtocolError, WireFrame};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::lifecycle::LifecycleManager;
use crate::session::SessionId;

/// Errors raised by a terminal connection.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The WebSocket failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// A message could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Parameters taken from an accepted upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Remote machine to open a shell on.
    pub target_host: String,
    /// Client-chosen session id, if any.
    pub session_id: Option<SessionId>,
    /// Message encoding for this connection.
    pub encoding: Encoding,
}

impl ConnectParams {
    /// Returns the client-chosen id or a fresh random one.
    pub fn resolve_session_id(&self) -> SessionId {
        self.session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

/// An HTTP rejection of an upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRejection {
    /// Response status.
    pub status: StatusCode,
    /// Plain-text response body.
    pub body: String,
}

impl HandshakeRejection {
    fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    fn into_response(self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.body));
        *response.status_mut() = self.status;
        response
    }
}

/// Validates an upgrade request against the served `path`.
pub fn parse_upgrade(request: &Request, path: &str) -> Result<ConnectParams, HandshakeRejection> {
    if request.uri().path() != path {
        return Err(HandshakeRejection::new(StatusCode::NOT_FOUND, "Not found"));
    }

    let query = request.uri().query().unwrap_or_default();
    let mut target_host = None;
    let mut session_id = None;
    let mut encoding = Encoding::default();

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "host" if !value.is_empty() => target_host = Some(value.into_owned()),
            "session" if !value.is_empty() => session_id = Some(value.into_owned()),
            "encoding" => {
                encoding = value.parse().map_err(|e: ProtocolError| {
                    HandshakeRejection::new(StatusCode::BAD_REQUEST, e.to_string())
                })?;
            }
            _ => {}
        }
    }

    let target_host = target_host.ok_or_else(|| {
        HandshakeRejection::new(StatusCode::BAD_REQUEST, "Missing host parameter")
    })?;

    Ok(ConnectParams {
        target_host,
        session_id,
        encoding,
    })
}

fn encode_frame(encoding: Encoding, message: &Message) -> Result<tungstenite::Message, TransportError> {
    Ok(match encoding.encode(message)? {
        WireFrame::Text(text) => tungstenite::Message::Text(text),
        WireFrame::Binary(bytes) => tungstenite::Message::Binary(bytes),
    })
}

fn decode_frame(
    encoding: Encoding,
    frame: Result<tungstenite::Message, tungstenite::Error>,
) -> Option<Result<Message, TransportError>> {
    let decoded = match frame {
        Ok(tungstenite::Message::Text(text)) => encoding.decode_text(&text),
        Ok(tungstenite::Message::Binary(bytes)) => encoding.decode_binary(&bytes),
        Ok(_) => return None,
        Err(e) => return Some(Err(e.into())),
    };
    match decoded {
        Ok(message) => Some(Ok(message)),
        Err(e) => {
            tracing::warn!(error = %e, "Dropping undecodable frame");
            None
        }
    }
}

/// Splits a WebSocket into a typed message sink and stream.
pub fn message_channels<T>(
    socket: WebSocketStream<T>,
    encoding: Encoding,
) -> (
    impl Sink<Message, Error = TransportError> + Send,
    impl Stream<Item = Result<Message, TransportError>> + Send,
)
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    let (ws_sink, ws_stream) = socket.split();
    let sink = ws_sink
        .sink_map_err(TransportError::from)
        .with(move |message: Message| future::ready(encode_frame(encoding, &message)));
    let stream = ws_stream.filter_map(move |frame| future::ready(decode_frame(encoding, frame)));
    (sink, stream)
}

/// WebSocket server feeding connections into the lifecycle manager.
pub struct TerminalServer {
    listener: TcpListener,
    path: String,
    ws_config: WebSocketConfig,
    lifecycle: Arc<LifecycleManager>,
}

impl TerminalServer {
    /// Binds the listener described by `config`.
    pub async fn bind(config: &ServerConfig, lifecycle: Arc<LifecycleManager>) -> std::io::Result<Self> {
        let listener = TcpListener::bind((config.bind_address.as_str(), config.port)).await?;

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(config.max_message_bytes);
        ws_config.max_frame_size = Some(config.max_message_bytes);

        Ok(Self {
            listener,
            path: config.path.clone(),
            ws_config,
            lifecycle,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            address = ?self.listener.local_addr().ok(),
            path = %self.path,
            "Terminal server listening"
        );

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let lifecycle = Arc::clone(&self.lifecycle);
                    let path = self.path.clone();
                    let ws_config = self.ws_config.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, path, ws_config, lifecycle).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                }
            }
        }

        tracing::info!("Terminal server stopped");
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    path: String,
    ws_config: WebSocketConfig,
    lifecycle: Arc<LifecycleManager>,
) {
    let mut params = None;
    let callback = |request: &Request, response: Response| match parse_upgrade(request, &path) {
        Ok(parsed) => {
            params = Some(parsed);
            Ok(response)
        }
        Err(rejection) => {
            tracing::debug!(peer = %peer, uri = %request.uri(), status = %rejection.status, "Rejected upgrade");
            Err(rejection.into_response())
        }
    };

    let accepted =
        tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config)).await;
    let socket = match accepted {
        Ok(socket) => socket,
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let Some(params) = params else {
        return;
    };

    let session_id = params.resolve_session_id();
    tracing::info!(
        peer = %peer,
        session_id = %session_id,
        target_host = %params.target_host,
        encoding = %params.encoding,
        "Terminal connected"
    );

    let (sink, stream) = message_channels(socket, params.encoding);
    let reason = lifecycle
        .serve(session_id.clone(), params.target_host, sink, stream)
        .await;

    tracing::info!(peer = %peer, session_id = %session_id, reason = ?reason, "Terminal disconnected");
}
