//! # Item and Storage Type Definitions
//!
//! Value types produced by retrievals and consumed by storage commands.
//!
//! ## Design Principles
//!
//! 1. **Immutable Items**: An `Item` is built once by the response reader and
//!    never mutated afterwards; the payload is a shared `Bytes` handle so
//!    cloning an item never copies the value.
//!
//! 2. **Binary Payloads**: Values are raw bytes and may contain `\r`, `\n`
//!    or NUL. Only the key is text.
//!
//! 3. **Explicit Expiry**: Relative and absolute expirations are distinct
//!    variants instead of a magic integer, and the 30-day wire rule lives
//!    in one place (`Expiry::wire_seconds`).
//!
//! ## Wire Encoding
//!
//! ```text
//! VALUE <key> <flags> <bytes> [<cas>]\r\n
//! <bytes raw payload bytes>\r\n
//! ```

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// Relative expirations longer than this are interpreted by the server as
/// absolute Unix timestamps.
pub const MAX_RELATIVE_EXPIRY: Duration = Duration::from_secs(60 * 60 * 24 * 30);

/// A value retrieved from the server.
#[derive(Clone, PartialEq, Eq)]
pub struct Item {
    key: String,
    flags: u32,
    cas: Option<u64>,
    data: Bytes,
}

impl Item {
    /// Creates an item from decoded header fields and its payload.
    pub fn new(key: impl Into<String>, flags: u32, cas: Option<u64>, data: Bytes) -> Self {
        Item {
            key: key.into(),
            flags,
            cas,
            data,
        }
    }

    /// Key echoed back by the server.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Opaque client-defined flags stored with the value.
    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// CAS token, present only for `gets` responses.
    #[inline]
    pub fn cas(&self) -> Option<u64> {
        self.cas
    }

    /// Payload bytes, exactly as stored.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true when the stored value is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consumes the item and returns its payload.
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("key", &self.key)
            .field("flags", &self.flags)
            .field("cas", &self.cas)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Outcome of a `cas` store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CasResult {
    /// The value was unchanged since the token was issued and is now replaced.
    Stored,
    /// Someone else modified the value; nothing was stored.
    Exists,
    /// The key does not exist (or expired).
    NotFound,
}

/// Expiration attached to a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// The value never expires (wire value `0`).
    #[default]
    Never,
    /// Expire after the given duration.
    After(Duration),
    /// Expire at the given wall-clock time.
    At(SystemTime),
}

impl Expiry {
    /// Encodes the expiry as the unsigned seconds field of a request line.
    ///
    /// Relative durations up to 30 days are sent as-is; longer ones are
    /// converted to an absolute timestamp so the server does not misread them.
    pub fn wire_seconds(&self) -> u32 {
        self.wire_seconds_at(SystemTime::now())
    }

    fn wire_seconds_at(&self, now: SystemTime) -> u32 {
        match *self {
            Expiry::Never => 0,
            Expiry::After(duration) if duration <= MAX_RELATIVE_EXPIRY => {
                // Sub-second expiries round up so they do not become "never".
                let secs = duration.as_secs();
                if secs == 0 && !duration.is_zero() {
                    1
                } else {
                    secs as u32
                }
            }
            Expiry::After(duration) => now
                .checked_add(duration)
                .map(unix_seconds)
                .unwrap_or(u32::MAX),
            Expiry::At(at) => unix_seconds(at),
        }
    }
}

fn unix_seconds(at: SystemTime) -> u32 {
    let secs = at
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    u32::try_from(secs).unwrap_or(u32::MAX)
}

/// Flags and expiry applied to a storage command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageOptions {
    /// Opaque 32-bit metadata stored with the value.
    pub flags: u32,
    /// When the value expires.
    pub expiry: Expiry,
}

impl StorageOptions {
    /// Options with the given flags and no expiration.
    pub fn with_flags(flags: u32) -> Self {
        StorageOptions {
            flags,
            expiry: Expiry::Never,
        }
    }

    /// Options that expire after `ttl`.
    pub fn expiring_after(ttl: Duration) -> Self {
        StorageOptions {
            flags: 0,
            expiry: Expiry::After(ttl),
        }
    }
}
