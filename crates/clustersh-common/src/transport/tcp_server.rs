use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::protocol::error::{Result, WireError};
use crate::protocol::{Request, Response};
use crate::transport::codec::PostcardCodec;
use crate::transport::tcp::TcpTransport;

/// Framed async server speaking the node protocol.
///
/// Nodes are not implemented in this workspace; the server exists so the
/// client and session layers can be exercised against real sockets.
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    /// Creates a new TCP server bound to the specified address.
    ///
    /// # Arguments
    /// * `bind_addr` - The address to bind to (e.g., "127.0.0.1:0")
    pub async fn new(bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| WireError::Connection(format!("Failed to bind to {}: {}", bind_addr, e)))?;

        Ok(Self { listener })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| WireError::Connection(format!("Failed to get local addr: {}", e)))
    }

    /// Runs the server with the given request handler.
    ///
    /// Accepts connections in a loop and spawns a task for each one. Each
    /// connection serves requests until the peer closes it.
    pub async fn run_with_handler<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        let handler = Arc::new(handler);

        loop {
            let (stream, peer_addr) = self
                .listener
                .accept()
                .await
                .map_err(|e| WireError::Connection(format!("Failed to accept connection: {}", e)))?;

            tracing::debug!("Connection established from {}", peer_addr);

            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, handler).await {
                    tracing::debug!("Connection error: {}", e);
                }
            });
        }
    }

    /// Like [`run_with_handler`](Self::run_with_handler), but completes a
    /// TLS handshake on every accepted connection first.
    pub async fn run_tls_with_handler<F, Fut>(&self, acceptor: TlsAcceptor, handler: F) -> Result<()>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        let handler = Arc::new(handler);

        loop {
            let (stream, peer_addr) = self
                .listener
                .accept()
                .await
                .map_err(|e| WireError::Connection(format!("Failed to accept connection: {}", e)))?;

            let acceptor = acceptor.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                let stream = match acceptor.accept(stream).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::debug!("TLS handshake with {} failed: {}", peer_addr, e);
                        return;
                    }
                };
                if let Err(e) = handle_connection(stream, handler).await {
                    tracing::debug!("Connection error: {}", e);
                }
            });
        }
    }
}

/// Serves requests on one connection until it is closed.
async fn handle_connection<S, F, Fut>(mut stream: S, handler: Arc<F>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    loop {
        let buf = match TcpTransport::receive_message(&mut stream).await {
            Ok(buf) => buf,
            Err(WireError::Connection(_)) => {
                tracing::debug!("Connection closed by peer");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let request = match PostcardCodec::decode_request(&buf) {
            Ok(req) => req,
            Err(e) => {
                tracing::debug!("Failed to decode request: {}", e);
                let error_response = Response::error(0, e.to_string());
                send_response(&mut stream, &error_response).await?;
                continue;
            }
        };

        let request_id = request.id;
        let response = match handler(request).await {
            Ok(resp) => resp,
            Err(e) => Response::error(request_id, e.to_string()),
        };

        send_response(&mut stream, &response).await?;
    }
}

async fn send_response<S>(stream: &mut S, response: &Response) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let encoded = PostcardCodec::encode_response(response)?;
    TcpTransport::send_message(stream, &encoded).await
}
