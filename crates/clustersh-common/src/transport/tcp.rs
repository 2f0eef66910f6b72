use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};

use crate::protocol::error::{Result, WireError};
use crate::protocol::{Request, Response};
use crate::transport::codec::PostcardCodec;

/// Largest frame accepted from a peer (100 MB).
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Async framed transport.
///
/// Every message travels as:
///
/// ```text
/// [4-byte length as u32 big-endian] [postcard data]
/// ```
///
/// The framing functions are generic over the stream so the same code runs
/// over plain TCP and over a TLS session.
///
/// # Example
///
/// ```no_run
/// use clustersh_common::transport::TcpTransport;
/// use clustersh_common::Request;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut stream = TcpTransport::connect("127.0.0.1:3000", Duration::from_secs(5)).await?;
/// let response = TcpTransport::send_request(&mut stream, &Request::command("statistics")).await?;
/// # Ok(())
/// # }
/// ```
pub struct TcpTransport;

impl TcpTransport {
    /// Connects to a remote endpoint.
    ///
    /// The address may resolve to several socket addresses; each is tried in
    /// turn until one accepts, all within `timeout`.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
        let attempt = async {
            let socket_addrs = lookup_host(addr)
                .await
                .map_err(|e| WireError::Connection(format!("Invalid address '{}': {}", addr, e)))?;

            let mut last_err = None;
            for socket_addr in socket_addrs {
                match TcpStream::connect(socket_addr).await {
                    Ok(stream) => {
                        stream.set_nodelay(true)?;
                        return Ok(stream);
                    }
                    Err(e) => last_err = Some(e),
                }
            }

            Err(WireError::Connection(format!(
                "Failed to connect to {}: {}",
                addr,
                last_err
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no addresses resolved".to_string())
            )))
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(WireError::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Sends a request and waits for the matching response.
    ///
    /// A response carrying another request's id is a protocol error.
    pub async fn send_request<S>(stream: &mut S, request: &Request) -> Result<Response>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let encoded = PostcardCodec::encode_request(request)?;
        Self::send_message(stream, &encoded).await?;

        let data = Self::receive_message(stream).await?;
        let response = PostcardCodec::decode_response(&data)?;

        if response.id != request.id {
            return Err(WireError::IdMismatch {
                expected: request.id,
                got: response.id,
            });
        }

        Ok(response)
    }

    /// Sends a message with length prefix.
    pub async fn send_message<S>(stream: &mut S, data: &[u8]) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(WireError::FrameTooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let len = data.len() as u32;

        stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| Self::map_io_error(e, "writing length prefix"))?;
        stream
            .write_all(data)
            .await
            .map_err(|e| Self::map_io_error(e, "writing data"))?;
        stream
            .flush()
            .await
            .map_err(|e| Self::map_io_error(e, "flushing stream"))?;

        Ok(())
    }

    /// Receives a message with length prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Reading the length prefix fails
    /// - The announced length exceeds [`MAX_MESSAGE_SIZE`] (checked before
    ///   any buffer is allocated)
    /// - Reading the data fails
    pub async fn receive_message<S>(stream: &mut S) -> Result<Vec<u8>>
    where
        S: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| Self::map_io_error(e, "reading length prefix"))?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(WireError::FrameTooLarge {
                size: len,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut buf = vec![0u8; len];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| Self::map_io_error(e, "reading data"))?;

        Ok(buf)
    }

    /// Map IO errors to appropriate WireError variants
    ///
    /// - Peer went away -> `Connection`
    /// - Other IO errors -> `Io`
    fn map_io_error(err: std::io::Error, context: &str) -> WireError {
        match err.kind() {
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => {
                WireError::Connection(format!("{}: Connection lost", context))
            }
            _ => WireError::Io(err),
        }
    }
}
