use std::time::{Duration, Instant};

use clustersh_common::auth::SessionToken;
use clustersh_common::transport::tls::{build_client_config, connect_tls, server_name_for};
use clustersh_common::transport::TcpTransport;
use clustersh_common::{Payload, Request, Status};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::endpoint::NodeEndpoint;
use crate::error::{CallError, ConnectError};

/// Plain TCP or TLS stream behind one type.
trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Ready,
    /// Unusable; the owner must open a new connection.
    Failed,
}

/// Live channel to one node.
///
/// A connection never reconnects on its own. After any failed call, or a
/// call whose future was dropped before completing, it stays
/// [`ConnectionState::Failed`] and rejects further calls.
pub struct NodeConnection {
    address: String,
    stream: Box<dyn AsyncStream>,
    state: ConnectionState,
    session: Option<SessionToken>,
}

impl NodeConnection {
    /// Opens a connection: TCP connect, TLS handshake when enabled, then the
    /// login exchange when the endpoint carries user credentials.
    ///
    /// All three steps share one `timeout`.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::AuthFailed`] when the node rejects the credentials
    /// - [`ConnectError::Network`] for everything else
    pub async fn open(endpoint: &NodeEndpoint, timeout: Duration) -> Result<Self, ConnectError> {
        match tokio::time::timeout(timeout, Self::establish(endpoint, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::network(
                &endpoint.address,
                format!("timed out after {}ms", timeout.as_millis()),
            )),
        }
    }

    async fn establish(endpoint: &NodeEndpoint, timeout: Duration) -> Result<Self, ConnectError> {
        let address = endpoint.address.as_str();
        let tcp = TcpTransport::connect(address, timeout)
            .await
            .map_err(|e| ConnectError::network(address, e))?;

        let stream: Box<dyn AsyncStream> = if endpoint.tls.enabled {
            let config = build_client_config(&endpoint.tls).map_err(|e| ConnectError::network(address, e))?;
            let name = server_name_for(&endpoint.tls, address).map_err(|e| ConnectError::network(address, e))?;
            let tls = connect_tls(tcp, config, name)
                .await
                .map_err(|e| ConnectError::network(address, e))?;
            Box::new(tls)
        } else {
            Box::new(tcp)
        };

        let mut conn = NodeConnection {
            address: endpoint.address.clone(),
            stream,
            state: ConnectionState::Ready,
            session: None,
        };

        if endpoint.credentials.requires_login() {
            conn.login(endpoint).await?;
        }

        tracing::debug!(address, "connection opened");
        Ok(conn)
    }

    async fn login(&mut self, endpoint: &NodeEndpoint) -> Result<(), ConnectError> {
        let user = endpoint.credentials.user().unwrap_or_default();
        let request = Request::login(user, endpoint.credentials.secret());

        let response = TcpTransport::send_request(&mut self.stream, &request)
            .await
            .map_err(|e| ConnectError::network(&self.address, e))?;

        match response.status {
            Status::Ok => {
                let reply = response.result.unwrap_or_default();
                self.session = SessionToken::from_login_reply(&reply, Instant::now());
                Ok(())
            }
            Status::AuthFailed => Err(ConnectError::AuthFailed {
                address: self.address.clone(),
                reason: response.error_message(),
            }),
            Status::Error => Err(ConnectError::network(&self.address, response.error_message())),
        }
    }

    /// Sends one request and waits at most `timeout` for the reply.
    ///
    /// The session token from login is attached to the request.
    pub async fn call(&mut self, request: &Request, timeout: Duration) -> Result<Payload, CallError> {
        if self.state == ConnectionState::Failed {
            return Err(CallError::ConnectionFailed(self.address.clone()));
        }
        if self.session_expired() {
            self.state = ConnectionState::Failed;
            return Err(CallError::ConnectionFailed(format!("{}: session expired", self.address)));
        }

        let mut request = request.clone();
        if request.timeout_ms.is_none() {
            request.timeout_ms = Some(timeout.as_millis() as u64);
        }
        if let Some(session) = &self.session {
            request.session = Some(session.token.clone());
        }

        // Stays Failed if this future is dropped mid-flight
        self.state = ConnectionState::Failed;

        let response = match tokio::time::timeout(timeout, TcpTransport::send_request(&mut self.stream, &request)).await {
            Err(_) => return Err(CallError::Timeout(timeout.as_millis() as u64)),
            Ok(Err(e)) => return Err(CallError::from(e)),
            Ok(Ok(response)) => response,
        };

        match response.status {
            Status::Ok => {
                let result = response
                    .result
                    .ok_or_else(|| CallError::Protocol("missing result in success response".to_string()))?;
                self.state = ConnectionState::Ready;
                Ok(result)
            }
            Status::Error | Status::AuthFailed => Err(CallError::Remote(response.error_message())),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn session(&self) -> Option<&SessionToken> {
        self.session.as_ref()
    }

    fn session_expired(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.is_expired(Instant::now()))
    }

    /// Whether the next call may proceed on this connection.
    pub fn is_healthy(&self) -> bool {
        self.state == ConnectionState::Ready && !self.session_expired()
    }
}

impl std::fmt::Debug for NodeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConnection")
            .field("address", &self.address)
            .field("state", &self.state)
            .field("session", &self.session.is_some())
            .finish()
    }
}
