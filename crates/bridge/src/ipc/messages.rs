//! Control socket message types.
//!
//! This module defines the request and response types exchanged between the
//! `termbridge` CLI and a running service over the Unix domain socket.

use serde::{Deserialize, Serialize};

use crate::session::SessionInfo;

/// Requests that can be sent from the CLI to the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the service is alive.
    Ping,
    /// Get the current status of the service.
    Status,
    /// Request the service to stop gracefully.
    Stop,
    /// List all live sessions.
    ListSessions,
    /// Terminate a specific session by ID.
    TerminateSession {
        /// The unique identifier of the session to terminate.
        session_id: String,
    },
    /// Terminate every session connected to a remote machine.
    TerminateHost {
        /// The target host whose sessions are terminated.
        target_host: String,
    },
}

/// Responses sent from the service to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    /// Response to a Ping request.
    Pong,
    /// Current service status.
    Status {
        /// Whether the service is running.
        running: bool,
        /// Uptime in seconds.
        uptime_secs: u64,
        /// Number of live sessions.
        session_count: usize,
    },
    /// Acknowledgment that the service is stopping.
    Stopping,
    /// List of live sessions.
    Sessions {
        /// Information about each live session.
        sessions: Vec<IpcSessionInfo>,
    },
    /// Confirmation that a session was terminated.
    SessionTerminated {
        /// The ID of the terminated session.
        session_id: String,
    },
    /// Confirmation that a host's sessions were terminated.
    HostTerminated {
        /// The target host.
        target_host: String,
        /// Number of sessions terminated.
        count: usize,
    },
    /// An error occurred processing the request.
    Error {
        /// Human-readable error message.
        message: String,
    },
}

/// Information about a live session for IPC communication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcSessionInfo {
    /// Unique session identifier.
    pub id: String,
    /// Remote machine the session is connected to.
    pub target_host: String,
    /// Lifecycle state (`connecting`, `active`, ...).
    pub state: String,
    /// Process ID of the remote-login process, once launched.
    pub pid: Option<u32>,
    /// UNIX milliseconds when the session was created.
    pub created_at: u64,
    /// UNIX milliseconds of the last relayed byte.
    pub last_activity_at: u64,
    /// Terminal columns.
    pub cols: u16,
    /// Terminal rows.
    pub rows: u16,
}

impl From<SessionInfo> for IpcSessionInfo {
    fn from(info: SessionInfo) -> Self {
        Self {
            id: info.id,
            target_host: info.target_host,
            state: info.state.as_str().to_string(),
            pid: info.pid,
            created_at: info.created_at,
            last_activity_at: info.last_activity_at,
            cols: info.geometry.cols,
            rows: info.geometry.rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Geometry, SessionState};

    fn sample_info() -> IpcSessionInfo {
        IpcSessionInfo {
            id: "session-1".to_string(),
            target_host: "203.0.113.5".to_string(),
            state: "active".to_string(),
            pid: Some(4242),
            created_at: 1_700_000_000_000,
            last_activity_at: 1_700_000_005_000,
            cols: 120,
            rows: 40,
        }
    }

    #[test]
    fn test_unit_requests_serialize_as_strings() {
        for (request, expected) in [
            (IpcRequest::Ping, r#""Ping""#),
            (IpcRequest::Status, r#""Status""#),
            (IpcRequest::Stop, r#""Stop""#),
            (IpcRequest::ListSessions, r#""ListSessions""#),
        ] {
            let json = serde_json::to_string(&request).unwrap();
            assert_eq!(json, expected);
            let deserialized: IpcRequest = serde_json::from_str(&json).unwrap();
            assert_eq!(deserialized, request);
        }
    }

    #[test]
    fn test_request_terminate_session_serialization() {
        let request = IpcRequest::TerminateSession {
            session_id: "test-session-123".to_string(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"TerminateSession":{"session_id":"test-session-123"}}"#
        );

        let deserialized: IpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, request);
    }

    #[test]
    fn test_request_terminate_host_serialization() {
        let request = IpcRequest::TerminateHost {
            target_host: "203.0.113.5".to_string(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("TerminateHost"));
        assert!(json.contains("203.0.113.5"));

        let deserialized: IpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, request);
    }

    #[test]
    fn test_response_status_serialization() {
        let response = IpcResponse::Status {
            running: true,
            uptime_secs: 3600,
            session_count: 2,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("Status"));
        assert!(json.contains("3600"));

        let deserialized: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, response);
    }

    #[test]
    fn test_response_sessions_serialization() {
        let response = IpcResponse::Sessions {
            sessions: vec![sample_info()],
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("session-1"));
        assert!(json.contains("203.0.113.5"));

        let deserialized: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, response);
    }

    #[test]
    fn test_response_host_terminated_serialization() {
        let response = IpcResponse::HostTerminated {
            target_host: "host-a".to_string(),
            count: 3,
        };
        let json = serde_json::to_string(&response).unwrap();
        let deserialized: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, response);
    }

    #[test]
    fn test_response_error_serialization() {
        let response = IpcResponse::Error {
            message: "Something went wrong".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("Something went wrong"));

        let deserialized: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, response);
    }

    #[test]
    fn test_session_info_conversion() {
        let info = SessionInfo {
            id: "s1".to_string(),
            target_host: "host-a".to_string(),
            state: SessionState::Connecting,
            pid: None,
            geometry: Geometry::new(80, 30),
            created_at: 10,
            last_activity_at: 20,
        };

        let ipc = IpcSessionInfo::from(info);
        assert_eq!(ipc.state, "connecting");
        assert_eq!(ipc.pid, None);
        assert_eq!((ipc.cols, ipc.rows), (80, 30));
        assert_eq!((ipc.created_at, ipc.last_activity_at), (10, 20));
    }
}
