use std::time::Duration;

use async_trait::async_trait;
use clustersh_common::{Payload, Request};

use crate::connection::NodeConnection;
use crate::endpoint::NodeEndpoint;
use crate::error::{CallError, ConnectError};

/// An open, exclusively owned channel to one node.
#[async_trait]
pub trait Channel: Send {
    async fn call(&mut self, request: &Request, timeout: Duration) -> Result<Payload, CallError>;

    /// `false` once the channel must be replaced before the next call.
    fn is_healthy(&self) -> bool;
}

/// Opens channels to endpoints.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Channel + 'static;

    async fn open(&self, endpoint: &NodeEndpoint, timeout: Duration) -> Result<Self::Conn, ConnectError>;
}

/// Connector for real nodes over TCP or TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Conn = NodeConnection;

    async fn open(&self, endpoint: &NodeEndpoint, timeout: Duration) -> Result<NodeConnection, ConnectError> {
        NodeConnection::open(endpoint, timeout).await
    }
}

#[async_trait]
impl Channel for NodeConnection {
    async fn call(&mut self, request: &Request, timeout: Duration) -> Result<Payload, CallError> {
        NodeConnection::call(self, request, timeout).await
    }

    fn is_healthy(&self) -> bool {
        NodeConnection::is_healthy(self)
    }
}
