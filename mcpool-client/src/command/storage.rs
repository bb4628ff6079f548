//! Storage verbs: `set`, `add`, `replace`, `append`, `prepend`, `cas`.
//!
//! All six share one request layout and one status vocabulary; a
//! `StorageKind` marker fixes the verb, the statuses it accepts, and how an
//! accepted status maps to the caller's result type.

use std::marker::PhantomData;

use bytes::Bytes;
use tokio::io::AsyncRead;

use mcpool_common::{CasResult, StorageOptions};

use super::{unexpected, Command, CRLF};
use crate::error::ClientResult;
use crate::reader::ResponseReader;
use crate::transport::Transport;

/// Status line returned by storage commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageStatus {
    Stored,
    NotStored,
    Exists,
    NotFound,
}

const STATUS_TOKENS: [(&str, StorageStatus); 4] = [
    ("STORED", StorageStatus::Stored),
    ("NOT_STORED", StorageStatus::NotStored),
    ("EXISTS", StorageStatus::Exists),
    ("NOT_FOUND", StorageStatus::NotFound),
];

impl StorageStatus {
    /// Looks up a status token.
    pub fn parse(token: &str) -> Option<Self> {
        STATUS_TOKENS
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, status)| *status)
    }
}

/// Per-verb behaviour of a storage command.
pub trait StorageKind: 'static {
    /// Verb written on the request line.
    const VERB: &'static str;
    /// Statuses this verb may legally receive.
    const LEGAL: &'static [StorageStatus];
    /// Whether the request line carries a CAS token.
    const SENDS_CAS: bool = false;

    type Output: Send;

    /// Maps a legal status to the command result.
    fn map(status: StorageStatus) -> Self::Output;
}

const STORED_OR_NOT: &[StorageStatus] = &[StorageStatus::Stored, StorageStatus::NotStored];

/// Unconditional store.
pub struct Set;
/// Store only if the key is absent.
pub struct Add;
/// Store only if the key is present.
pub struct Replace;
/// Append to an existing value.
pub struct Append;
/// Prepend to an existing value.
pub struct Prepend;
/// Store only if the CAS token still matches.
pub struct Cas;

impl StorageKind for Set {
    const VERB: &'static str = "set";
    const LEGAL: &'static [StorageStatus] = &[StorageStatus::Stored];
    type Output = ();

    fn map(_status: StorageStatus) {}
}

macro_rules! conditional_store {
    ($kind:ident, $verb:literal) => {
        impl StorageKind for $kind {
            const VERB: &'static str = $verb;
            const LEGAL: &'static [StorageStatus] = STORED_OR_NOT;
            type Output = bool;

            fn map(status: StorageStatus) -> bool {
                status == StorageStatus::Stored
            }
        }
    };
}

conditional_store!(Add, "add");
conditional_store!(Replace, "replace");
conditional_store!(Append, "append");
conditional_store!(Prepend, "prepend");

impl StorageKind for Cas {
    const VERB: &'static str = "cas";
    const LEGAL: &'static [StorageStatus] = &[
        StorageStatus::Stored,
        StorageStatus::Exists,
        StorageStatus::NotFound,
    ];
    const SENDS_CAS: bool = true;
    type Output = CasResult;

    fn map(status: StorageStatus) -> CasResult {
        match status {
            StorageStatus::Stored => CasResult::Stored,
            StorageStatus::Exists => CasResult::Exists,
            _ => CasResult::NotFound,
        }
    }
}

/// A storage request for verb `K`.
pub struct StorageCommand<K> {
    key: String,
    data: Bytes,
    options: StorageOptions,
    cas: u64,
    kind: PhantomData<fn() -> K>,
}

pub type SetCommand = StorageCommand<Set>;
pub type AddCommand = StorageCommand<Add>;
pub type ReplaceCommand = StorageCommand<Replace>;
pub type AppendCommand = StorageCommand<Append>;
pub type PrependCommand = StorageCommand<Prepend>;
pub type CasCommand = StorageCommand<Cas>;

impl<K: StorageKind> StorageCommand<K> {
    fn build(key: String, data: Bytes, options: StorageOptions, cas: u64) -> Self {
        StorageCommand {
            key,
            data,
            options,
            cas,
            kind: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    fn request_line(&self) -> String {
        let flags = self.options.flags;
        let expiry = self.options.expiry.wire_seconds();
        if K::SENDS_CAS {
            format!(
                "{} {} {} {} {} {}\r\n",
                K::VERB,
                self.key,
                flags,
                expiry,
                self.data.len(),
                self.cas
            )
        } else {
            format!("{} {} {} {} {}\r\n", K::VERB, self.key, flags, expiry, self.data.len())
        }
    }
}

macro_rules! plain_constructor {
    ($($kind:ident),*) => {
        $(
            impl StorageCommand<$kind> {
                pub fn new(
                    key: impl Into<String>,
                    data: impl Into<Bytes>,
                    options: StorageOptions,
                ) -> Self {
                    Self::build(key.into(), data.into(), options, 0)
                }
            }
        )*
    };
}

plain_constructor!(Set, Add, Replace, Append, Prepend);

impl StorageCommand<Cas> {
    /// `cas` store guarded by a token from an earlier `gets`.
    pub fn new(
        key: impl Into<String>,
        data: impl Into<Bytes>,
        options: StorageOptions,
        cas: u64,
    ) -> Self {
        Self::build(key.into(), data.into(), options, cas)
    }
}

impl<K: StorageKind> Command for StorageCommand<K> {
    type Output = K::Output;

    fn verb(&self) -> &'static str {
        K::VERB
    }

    async fn send_request<T: Transport>(&self, transport: &mut T) -> ClientResult<()> {
        let line = self.request_line();
        transport.send(&[line.as_bytes(), self.data.as_ref(), CRLF]).await?;
        Ok(())
    }

    async fn read_response<R: AsyncRead + Unpin + Send>(
        &mut self,
        reader: &mut ResponseReader<R>,
    ) -> ClientResult<K::Output> {
        let line = reader.read_line().await?;
        match StorageStatus::parse(line.first()) {
            Some(status) if K::LEGAL.contains(&status) => Ok(K::map(status)),
            _ => Err(unexpected(K::VERB, &line).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::test_support::{request_bytes, respond};
    use crate::error::{ClientError, ProtocolError};
    use mcpool_common::Expiry;
    use std::time::Duration;

    fn split_request(sent: &[u8]) -> (String, &[u8]) {
        let pos = sent.iter().position(|&b| b == b'\n').expect("line");
        let line = String::from_utf8(sent[..pos - 1].to_vec()).expect("utf8");
        (line, &sent[pos + 1..])
    }

    #[tokio::test]
    async fn set_request_layout() {
        let command = SetCommand::new("k", &b"value"[..], StorageOptions::default());
        assert_eq!(request_bytes(&command).await, b"set k 0 0 5\r\nvalue\r\n");
    }

    #[tokio::test]
    async fn flags_and_expiry_are_encoded() {
        let options = StorageOptions {
            flags: 234225,
            expiry: Expiry::After(Duration::from_secs(2 * 60 * 60) + Duration::from_millis(53)),
        };
        let payload: Vec<u8> = (0..1025u32).map(|i| (i % 256) as u8).collect();
        let command = AddCommand::new("1234567890-=~!@#$%^&*()_+", payload.clone(), options);
        let sent = request_bytes(&command).await;

        let (line, rest) = split_request(&sent);
        let parts: Vec<&str> = line.split(' ').collect();
        assert_eq!(parts, ["add", "1234567890-=~!@#$%^&*()_+", "234225", "7200", "1025"]);
        assert_eq!(&rest[..payload.len()], &payload[..]);
        assert_eq!(&rest[payload.len()..], b"\r\n");
    }

    #[tokio::test]
    async fn cas_appends_token() {
        let command = CasCommand::new("k", &b"v"[..], StorageOptions::with_flags(5), 77);
        assert_eq!(request_bytes(&command).await, b"cas k 5 0 1 77\r\nv\r\n");
    }

    #[tokio::test]
    async fn binary_payload_is_sent_verbatim() {
        let payload = &b"\r\n\0END\r\n"[..];
        let command = SetCommand::new("bin", payload, StorageOptions::default());
        let sent = request_bytes(&command).await;
        assert_eq!(&sent[..], &b"set bin 0 0 8\r\n\r\n\0END\r\n\r\n"[..]);
    }

    #[tokio::test]
    async fn stored_means_success() {
        let data = &b"payload"[..];
        respond(SetCommand::new("k", data, StorageOptions::default()), b"STORED\r\n")
            .await
            .unwrap();
        assert!(respond(AddCommand::new("k", data, StorageOptions::default()), b"STORED\r\n")
            .await
            .unwrap());
        assert!(respond(AppendCommand::new("k", data, StorageOptions::default()), b"STORED\r\n")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn not_stored_collapses_to_false() {
        let data = &b"payload"[..];
        let options = StorageOptions::default();
        let not_stored = b"NOT_STORED\r\n";
        for result in [
            respond(AddCommand::new("k", data, options), not_stored).await,
            respond(ReplaceCommand::new("k", data, options), not_stored).await,
            respond(PrependCommand::new("k", data, options), not_stored).await,
        ] {
            assert!(!result.unwrap());
        }
    }

    #[tokio::test]
    async fn illegal_status_names_verb_and_line() {
        let add = AddCommand::new("k", &b"v"[..], StorageOptions::default());
        let err = respond(add, b"EXISTS\r\n").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("add"));
        assert!(message.contains("EXISTS"));

        let set = SetCommand::new("k", &b"v"[..], StorageOptions::default());
        let err = respond(set, b"NOT_STORED\r\n").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::UnexpectedResponse { verb: "set", .. })
        ));
    }

    #[tokio::test]
    async fn cas_maps_three_outcomes() {
        let cmd = || CasCommand::new("k", &b"v"[..], StorageOptions::default(), 1);
        assert_eq!(respond(cmd(), b"STORED\r\n").await.unwrap(), CasResult::Stored);
        assert_eq!(respond(cmd(), b"EXISTS\r\n").await.unwrap(), CasResult::Exists);
        assert_eq!(respond(cmd(), b"NOT_FOUND\r\n").await.unwrap(), CasResult::NotFound);
        assert!(respond(cmd(), b"NOT_STORED\r\n").await.unwrap_err().is_protocol());
    }

    #[test]
    fn status_table_lookup() {
        assert_eq!(StorageStatus::parse("STORED"), Some(StorageStatus::Stored));
        assert_eq!(StorageStatus::parse("NOT_FOUND"), Some(StorageStatus::NotFound));
        assert_eq!(StorageStatus::parse("DELETED"), None);
    }
}
