//! End-to-end integration tests for termbridge.
//!
//! These tests drive a running orchestrator over real WebSocket connections:
//! - Handshake validation
//! - Output, input and resize relaying
//! - Launch failures reported to the client
//! - Teardown on disconnect and isolation between sessions
//! - Control socket session management

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bridge::config::Config;
use bridge::ipc::{IpcClient, IpcResponse};
use bridge::orchestrator::{BridgeOrchestrator, OrchestratorState};
use bridge::session::{Geometry, LaunchError, Launcher, PtyProcess, SshLauncher};
use futures_util::{SinkExt, StreamExt};
use portable_pty::CommandBuilder;
use protocol::{Encoding, Message, WireFrame};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a shell script in place of the remote login.
///
/// The target host is passed to the script as `$1`.
struct ScriptLauncher(&'static str);

impl Launcher for ScriptLauncher {
    fn launch(&self, target_host: &str) -> Result<PtyProcess, LaunchError> {
        let mut cmd = CommandBuilder::new("/bin/sh");
        cmd.args(["-c", self.0, "sh", target_host]);
        PtyProcess::spawn(cmd, Geometry::default())
    }
}

/// A running bridge bound to an ephemeral port.
struct TestBridge {
    orchestrator: BridgeOrchestrator,
    addr: SocketAddr,
    _temp_dir: TempDir,
}

impl TestBridge {
    async fn start(launcher: Arc<dyn Launcher>) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.server.bind_address = "127.0.0.1".to_string();
        config.server.port = 0;
        config.session.kill_grace_ms = 100;
        config.daemon.control_socket = Some(temp_dir.path().join("control.sock"));

        let mut orchestrator = BridgeOrchestrator::with_launcher(config, launcher);
        let addr = orchestrator.start().await.unwrap();

        Self {
            orchestrator,
            addr,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, query: &str) -> String {
        format!("ws://{}/terminal?{}", self.addr, query)
    }

    async fn connect(&self, query: &str) -> Client {
        let (client, _response) = connect_async(self.url(query)).await.unwrap();
        client
    }

    fn session_count(&self) -> usize {
        self.orchestrator.lifecycle().registry().count()
    }

    async fn wait_for_sessions(&self, expected: usize) {
        tokio::time::timeout(RECV_TIMEOUT, async {
            while self.session_count() != expected {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {} sessions, have {}", expected, self.session_count()));
    }

    async fn stop(mut self) {
        self.orchestrator.stop().await.unwrap();
        assert_eq!(self.orchestrator.state().await, OrchestratorState::Stopped);
    }
}

async fn send(client: &mut Client, encoding: Encoding, message: Message) {
    let frame = match encoding.encode(&message).unwrap() {
        WireFrame::Text(text) => tungstenite::Message::Text(text),
        WireFrame::Binary(bytes) => tungstenite::Message::Binary(bytes),
    };
    client.send(frame).await.unwrap();
}

/// Reads output until `done` accepts the accumulated bytes or the socket closes.
async fn read_output_until(
    client: &mut Client,
    encoding: Encoding,
    done: impl Fn(&[u8]) -> bool,
) -> Vec<u8> {
    let mut output = Vec::new();
    let result = tokio::time::timeout(RECV_TIMEOUT, async {
        while let Some(frame) = client.next().await {
            let message = match frame {
                Ok(tungstenite::Message::Text(text)) => encoding.decode_text(&text).unwrap(),
                Ok(tungstenite::Message::Binary(bytes)) => encoding.decode_binary(&bytes).unwrap(),
                Ok(tungstenite::Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            if let Message::Output(payload) = message {
                output.extend_from_slice(payload.as_bytes());
                if done(&output) {
                    break;
                }
            }
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "timed out; output so far: {:?}",
        String::from_utf8_lossy(&output)
    );
    output
}

async fn read_all_output(client: &mut Client, encoding: Encoding) -> Vec<u8> {
    read_output_until(client, encoding, |_| false).await
}

fn contains(haystack: &[u8], needle: &str) -> bool {
    String::from_utf8_lossy(haystack).contains(needle)
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn test_missing_host_rejected_with_bad_request() {
    let bridge = TestBridge::start(Arc::new(ScriptLauncher("exit 0"))).await;

    for query in ["", "host=", "session=abc"] {
        match connect_async(bridge.url(query)).await {
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), 400, "query {:?}", query);
            }
            other => panic!("expected HTTP rejection for {:?}, got {:?}", query, other.is_ok()),
        }
    }
    assert_eq!(bridge.session_count(), 0);

    bridge.stop().await;
}

#[tokio::test]
async fn test_wrong_path_rejected_with_not_found() {
    let bridge = TestBridge::start(Arc::new(ScriptLauncher("exit 0"))).await;

    let url = format!("ws://{}/elsewhere?host=h", bridge.addr);
    match connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 404),
        other => panic!("expected HTTP rejection, got ok={}", other.is_ok()),
    }

    bridge.stop().await;
}

// =============================================================================
// Relaying
// =============================================================================

#[tokio::test]
async fn test_output_relayed_verbatim_then_closed() {
    let bridge = TestBridge::start(Arc::new(ScriptLauncher("printf 'hello\\n'"))).await;

    let mut client = bridge.connect("host=203.0.113.5").await;
    let output = read_all_output(&mut client, Encoding::Json).await;

    assert_eq!(output, b"hello\r\n");
    bridge.wait_for_sessions(0).await;

    bridge.stop().await;
}

#[tokio::test]
async fn test_launcher_receives_target_host() {
    let bridge = TestBridge::start(Arc::new(ScriptLauncher("printf 'target=%s\\n' \"$1\""))).await;

    let mut client = bridge.connect("host=ec2-203-0-113-5.example.com").await;
    let output = read_all_output(&mut client, Encoding::Json).await;

    assert!(contains(&output, "target=ec2-203-0-113-5.example.com"));

    bridge.stop().await;
}

#[tokio::test]
async fn test_input_reaches_process() {
    let bridge = TestBridge::start(Arc::new(ScriptLauncher(
        "read line; printf 'got:%s\\n' \"$line\"",
    )))
    .await;

    let mut client = bridge.connect("host=h").await;
    send(&mut client, Encoding::Json, Message::input("ping\r")).await;
    let output = read_all_output(&mut client, Encoding::Json).await;

    assert!(contains(&output, "got:ping"));

    bridge.stop().await;
}

#[tokio::test]
async fn test_msgpack_encoding() {
    let bridge = TestBridge::start(Arc::new(ScriptLauncher("exec cat"))).await;

    let mut client = bridge.connect("host=h&encoding=msgpack").await;
    send(&mut client, Encoding::MessagePack, Message::input("abc\r")).await;
    let output = read_output_until(&mut client, Encoding::MessagePack, |out| {
        contains(out, "abc")
    })
    .await;

    assert!(contains(&output, "abc"));

    bridge.stop().await;
}

#[tokio::test]
async fn test_resize_applied_to_terminal() {
    let bridge = TestBridge::start(Arc::new(ScriptLauncher(
        "sleep 1; stty size; sleep 30",
    )))
    .await;

    let mut client = bridge.connect("host=h").await;
    send(&mut client, Encoding::Json, Message::resize(120, 40)).await;
    let output = read_output_until(&mut client, Encoding::Json, |out| contains(out, "\n")).await;

    assert!(contains(&output, "40 120"), "{:?}", String::from_utf8_lossy(&output));

    bridge.stop().await;
}

#[tokio::test]
async fn test_invalid_resize_ignored() {
    let bridge = TestBridge::start(Arc::new(ScriptLauncher(
        "sleep 1; stty size; sleep 30",
    )))
    .await;

    let mut client = bridge.connect("host=h").await;
    send(&mut client, Encoding::Json, Message::resize(0, 40)).await;
    send(&mut client, Encoding::Json, Message::resize(100, -1)).await;
    let output = read_output_until(&mut client, Encoding::Json, |out| contains(out, "\n")).await;

    assert!(contains(&output, "30 80"), "{:?}", String::from_utf8_lossy(&output));
    assert_eq!(bridge.session_count(), 1);

    bridge.stop().await;
}

// =============================================================================
// Failures and teardown
// =============================================================================

#[tokio::test]
async fn test_missing_credential_reported_to_client() {
    let launcher = SshLauncher::new().with_key_path(PathBuf::from("/nonexistent/key.pem"));
    let bridge = TestBridge::start(Arc::new(launcher)).await;

    let mut client = bridge.connect("host=203.0.113.5").await;
    let output = read_all_output(&mut client, Encoding::Json).await;

    let text = String::from_utf8(output).unwrap();
    assert!(text.starts_with("Server error:"), "{:?}", text);
    assert!(text.ends_with("\r\n"));
    assert!(!text.contains("/nonexistent"));
    bridge.wait_for_sessions(0).await;

    bridge.stop().await;
}

#[tokio::test]
async fn test_client_disconnect_tears_down_session() {
    let bridge = TestBridge::start(Arc::new(ScriptLauncher("exec cat"))).await;

    let mut client = bridge.connect("host=h").await;
    bridge.wait_for_sessions(1).await;

    client.close(None).await.unwrap();
    drop(client);

    bridge.wait_for_sessions(0).await;

    bridge.stop().await;
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let bridge = TestBridge::start(Arc::new(ScriptLauncher("exec cat"))).await;

    let mut first = bridge.connect("host=host-a").await;
    let mut second = bridge.connect("host=host-b").await;
    bridge.wait_for_sessions(2).await;

    send(&mut first, Encoding::Json, Message::input("alpha\r")).await;
    send(&mut second, Encoding::Json, Message::input("bravo\r")).await;

    let first_out =
        read_output_until(&mut first, Encoding::Json, |out| contains(out, "alpha\r\nalpha")).await;
    let second_out =
        read_output_until(&mut second, Encoding::Json, |out| contains(out, "bravo\r\nbravo")).await;

    assert!(!contains(&first_out, "bravo"));
    assert!(!contains(&second_out, "alpha"));

    drop(first);
    bridge.wait_for_sessions(1).await;
    send(&mut second, Encoding::Json, Message::input("still\r")).await;
    let output = read_output_until(&mut second, Encoding::Json, |out| contains(out, "still")).await;
    assert!(contains(&output, "still"));

    bridge.stop().await;
}

#[tokio::test]
async fn test_duplicate_session_id_rejected() {
    let bridge = TestBridge::start(Arc::new(ScriptLauncher("exec cat"))).await;

    let _first = bridge.connect("host=h&session=fixed-id").await;
    bridge.wait_for_sessions(1).await;

    let mut second = bridge.connect("host=h&session=fixed-id").await;
    let output = read_all_output(&mut second, Encoding::Json).await;

    assert!(contains(&output, "already active"));
    assert_eq!(bridge.session_count(), 1);

    bridge.stop().await;
}

#[tokio::test]
async fn test_stop_closes_live_sessions() {
    let bridge = TestBridge::start(Arc::new(ScriptLauncher("exec cat"))).await;

    let mut client = bridge.connect("host=h").await;
    bridge.wait_for_sessions(1).await;

    let mut orchestrator = bridge.orchestrator;
    orchestrator.stop().await.unwrap();
    assert_eq!(orchestrator.lifecycle().registry().count(), 0);

    read_all_output(&mut client, Encoding::Json).await;
}

// =============================================================================
// Control socket
// =============================================================================

#[tokio::test]
async fn test_control_socket_lists_and_terminates_sessions() {
    let bridge = TestBridge::start(Arc::new(ScriptLauncher("exec cat"))).await;

    let mut terminal = bridge.connect("host=host-a&session=ctl-1").await;
    bridge.wait_for_sessions(1).await;

    let mut control = IpcClient::connect(bridge.orchestrator.socket_path())
        .await
        .unwrap();

    match control.list_sessions().await.unwrap() {
        IpcResponse::Sessions { sessions } => {
            assert_eq!(sessions.len(), 1);
            assert_eq!(sessions[0].id, "ctl-1");
            assert_eq!(sessions[0].target_host, "host-a");
        }
        other => panic!("unexpected response: {:?}", other),
    }

    assert_eq!(
        control
            .terminate_host("host-a".to_string())
            .await
            .unwrap(),
        IpcResponse::HostTerminated {
            target_host: "host-a".to_string(),
            count: 1
        }
    );

    read_all_output(&mut terminal, Encoding::Json).await;
    bridge.wait_for_sessions(0).await;

    bridge.stop().await;
}
