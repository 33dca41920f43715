//! JSON-RPC plumbing shared by the host and extension sides

pub mod connection;
pub mod protocol;
pub mod transport;

pub use connection::{Connection, ConnectionOptions, ConnectionState, PendingRequest};
pub use protocol::{Method, ResponseError};
pub use transport::{MessageReader, MessageTransports, MessageWriter};
