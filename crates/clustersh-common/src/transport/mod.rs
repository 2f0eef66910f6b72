//! Transport layer: framing, codec, TLS and a loopback server.
//!
//! # Components
//!
//! - **[`PostcardCodec`]**: encode/decode protocol messages
//! - **[`TcpTransport`]**: async length-prefixed framing over any stream
//! - **[`tls`]**: rustls client configuration and handshake
//! - **[`TcpServer`]**: async server speaking the same framing
//!
//! All framing enforces [`MAX_MESSAGE_SIZE`] before allocating a buffer.

pub mod codec;
pub mod tcp;
pub mod tcp_server;
pub mod tls;

pub use codec::PostcardCodec;
pub use tcp::{TcpTransport, MAX_MESSAGE_SIZE};
pub use tcp_server::TcpServer;
pub use tls::TlsSettings;
