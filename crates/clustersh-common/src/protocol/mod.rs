pub mod error;
pub mod requests;
pub mod responses;
pub mod value;


pub use error::{Result, WireError};
pub use requests::{Request, RequestId, LOGIN_COMMAND, PEERS_COMMAND};
pub use responses::{Response, Status};
pub use value::{payload_to_json, Payload, Value};
