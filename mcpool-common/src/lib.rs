// mcpool-common - Shared value types for the mcpool memcached client
//
// This crate defines the items, storage options, and key rules that every
// layer of the client agrees on.

pub mod error;
pub mod key;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use key::*;
pub use types::*;
