use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::{Result, WireError};
use crate::protocol::{Request, Response};

/// Postcard codec for the body of a frame.
///
/// A frame carries exactly one message. Decoding fails with
/// [`WireError::TrailingBytes`] when the message does not consume the whole
/// frame, which catches peers speaking a different protocol revision.
///
/// # Example
///
/// ```
/// use clustersh_common::transport::PostcardCodec;
/// use clustersh_common::{payload, Request};
///
/// let request = Request::new("statistics", payload! { "n" => 42 });
/// let encoded = PostcardCodec::encode_request(&request).unwrap();
/// let decoded = PostcardCodec::decode_request(&encoded).unwrap();
/// assert_eq!(request, decoded);
/// ```
pub struct PostcardCodec;

impl PostcardCodec {
    pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
        Ok(postcard::to_stdvec(message)?)
    }

    /// Decodes one message, rejecting leftover bytes.
    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        let (message, rest) = postcard::take_from_bytes::<T>(data)?;
        if !rest.is_empty() {
            return Err(WireError::TrailingBytes(rest.len()));
        }
        Ok(message)
    }

    pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
        Self::encode(request)
    }

    pub fn decode_request(data: &[u8]) -> Result<Request> {
        Self::decode(data)
    }

    pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
        Self::encode(response)
    }

    pub fn decode_response(data: &[u8]) -> Result<Response> {
        Self::decode(data)
    }
}
