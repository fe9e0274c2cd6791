//! # termbridge Protocol Library
//!
//! Wire definitions for the terminal transport spoken between a browser
//! terminal and the termbridge service.
//!
//! ## Overview
//!
//! A terminal connection exchanges three message types:
//!
//! - **input** (client → server): raw keystroke bytes for the remote shell
//! - **output** (server → client): raw bytes produced by the remote shell
//! - **resize** (client → server): new terminal geometry
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Encoding, Message, WireFrame};
//!
//! let frame = Encoding::Json.encode(&Message::input(b"ls\r".to_vec())).unwrap();
//! assert!(matches!(frame, WireFrame::Text(_)));
//!
//! let decoded = Encoding::Json.decode(&frame).unwrap();
//! assert_eq!(decoded, Message::input(b"ls\r".to_vec()));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Message definitions
//! - [`codec`]: JSON and MessagePack encodings
//! - [`error`]: Error types

pub mod codec;
pub mod error;
pub mod messages;

pub use codec::{Encoding, WireFrame};
pub use error::{ProtocolError, Result};
pub use messages::{Message, Payload, Resize};
