//! clustersh common types and transport
//!
//! Protocol definitions and the framed transport shared by every clustersh
//! crate.
//!
//! # Overview
//!
//! - **Protocol Layer**: schemaless [`Value`] payloads, [`Request`],
//!   [`Response`] and wire errors
//! - **Transport Layer**: postcard codec, length-prefixed framing over TCP or
//!   TLS, and a loopback [`transport::TcpServer`]
//! - **Auth**: credentials and login session tokens
//!
//! # Wire format
//!
//! - **Message Format**: `[4-byte length prefix as u32 big-endian] + [postcard data]`
//! - **Max Message Size**: 100 MB
//! - A frame whose data is not consumed exactly by one message is rejected
//!
//! # Example
//!
//! ```
//! use clustersh_common::{payload, Request, Response};
//!
//! let request = Request::new("statistics", payload! { "scope" => "node" })
//!     .with_timeout(5000);
//! let response = Response::success(request.id, payload! { "objects" => 42 });
//! assert!(response.is_ok());
//! ```

pub mod auth;
pub mod protocol;
pub mod transport;

pub use protocol::*;
