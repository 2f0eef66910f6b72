//! Node client: one owned channel per cluster node.
//!
//! [`NodeConnection`] frames requests over TCP or TLS, logs in once with the
//! endpoint's credentials and keeps the session token for its lifetime. The
//! [`Connector`] and [`Channel`] traits are the seam the cluster session
//! opens and drives connections through, so the session can run against an
//! in-process simulation as easily as against real sockets.

pub mod connection;
pub mod connector;
pub mod endpoint;
pub mod error;

pub use connection::{ConnectionState, NodeConnection};
pub use connector::{Channel, Connector, TcpConnector};
pub use endpoint::{NodeEndpoint, DEFAULT_PORT};
pub use error::{CallError, ConnectError};
