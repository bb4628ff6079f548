//! # Command Set
//!
//! Purpose: One type per wire verb. Each command knows how to serialize its
//! request and how to interpret exactly one response.
//!
//! ## Design Principles
//! 1. **Single Use**: A command sends one request and reads one response;
//!    `Connection::execute` consumes it.
//! 2. **Constant Tables**: Status tokens and the statuses each verb accepts
//!    are `const` data, never mutated at runtime.
//! 3. **Explicit Constructors**: Every verb has a named constructor instead
//!    of a default-constructed object filled in afterwards.
//! 4. **Fail Fast**: A status outside the verb's legal set is a protocol
//!    error naming the verb and the line.

use std::future::Future;

use tokio::io::AsyncRead;

use crate::error::{ClientResult, ProtocolError};
use crate::reader::{ResponseLine, ResponseReader};
use crate::transport::Transport;

mod arithmetic;
mod delete;
mod multi_get;
mod retrieval;
mod storage;
mod touch;

pub use arithmetic::{ArithmeticCommand, ArithmeticVerb};
pub use delete::DeleteCommand;
pub use multi_get::{item_channel, ItemStream, MultiGetCommand};
pub use retrieval::{RetrievalCommand, RetrievalVerb};
pub use storage::{
    Add, AddCommand, Append, AppendCommand, Cas, CasCommand, Prepend, PrependCommand, Replace,
    ReplaceCommand, Set, SetCommand, StorageCommand, StorageKind, StorageStatus,
};
pub use touch::TouchCommand;

/// Line terminator used by every request line and value block.
pub(crate) const CRLF: &[u8] = b"\r\n";

/// A request/response pair for one wire verb.
pub trait Command: Send + Sync {
    /// Value produced from the server's response.
    type Output: Send;

    /// Verb written on the request line, used in error messages.
    fn verb(&self) -> &'static str;

    /// Serializes the request onto `transport`.
    fn send_request<T: Transport>(
        &self,
        transport: &mut T,
    ) -> impl Future<Output = ClientResult<()>> + Send;

    /// Reads and interprets the response to the request sent above.
    fn read_response<R: AsyncRead + Unpin + Send>(
        &mut self,
        reader: &mut ResponseReader<R>,
    ) -> impl Future<Output = ClientResult<Self::Output>> + Send;
}

pub(crate) fn unexpected(verb: &'static str, line: &ResponseLine) -> ProtocolError {
    ProtocolError::UnexpectedResponse {
        verb,
        line: line.line().to_string(),
    }
}
