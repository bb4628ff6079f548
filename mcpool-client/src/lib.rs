//! # mcpool Async Client
//!
//! Purpose: Provide an async memcached client speaking the ASCII protocol,
//! with connection pooling and request pipelining to keep round trips and
//! TCP handshakes off the hot path.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse connections through an exclusive or a
//!    pipelined pool instead of connecting per request.
//! 2. **Ordered Pipelining**: Many requests may be in flight on one
//!    connection; responses are always read in send order.
//! 3. **Binary Safety**: Values are length-framed raw bytes end to end.
//! 4. **Typed Failures**: Validation, protocol, connectivity and timeout
//!    errors are distinct so callers can choose a retry policy.

pub mod client;
pub mod command;
pub mod connection;
pub mod error;
pub mod pool;
pub mod reader;
pub mod semaphore;
pub mod timeout;
pub mod transport;

pub use client::{Client, ClientConfig, Endpoint, DEFAULT_PORT};
pub use command::{Command, ItemStream};
pub use connection::{Connection, ConnectionState};
pub use error::{ClientError, ClientResult, ProtocolError};
pub use pool::{PipelinedPool, PipelinedPoolOptions, Pool, PoolOptions};
pub use semaphore::AsyncSemaphore;

pub use mcpool_common::{CasResult, Expiry, Item, StorageOptions, ValidationError};
