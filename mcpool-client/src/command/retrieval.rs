use tokio::io::AsyncRead;

use mcpool_common::Item;

use super::Command;
use crate::error::{ClientResult, ProtocolError};
use crate::reader::ResponseReader;
use crate::transport::Transport;

/// Retrieval verbs. `gets` also returns the CAS token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalVerb {
    Get,
    Gets,
}

impl RetrievalVerb {
    pub const fn as_str(self) -> &'static str {
        match self {
            RetrievalVerb::Get => "get",
            RetrievalVerb::Gets => "gets",
        }
    }
}

/// Single-key `get`/`gets`. Resolves to `None` on a miss.
#[derive(Debug, Clone)]
pub struct RetrievalCommand {
    verb: RetrievalVerb,
    key: String,
}

impl RetrievalCommand {
    pub fn get(key: impl Into<String>) -> Self {
        RetrievalCommand {
            verb: RetrievalVerb::Get,
            key: key.into(),
        }
    }

    pub fn gets(key: impl Into<String>) -> Self {
        RetrievalCommand {
            verb: RetrievalVerb::Gets,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Command for RetrievalCommand {
    type Output = Option<Item>;

    fn verb(&self) -> &'static str {
        self.verb.as_str()
    }

    async fn send_request<T: Transport>(&self, transport: &mut T) -> ClientResult<()> {
        let line = format!("{} {}\r\n", self.verb.as_str(), self.key);
        transport.send(&[line.as_bytes()]).await?;
        Ok(())
    }

    async fn read_response<R: AsyncRead + Unpin + Send>(
        &mut self,
        reader: &mut ResponseReader<R>,
    ) -> ClientResult<Option<Item>> {
        let item = match reader.read_item().await? {
            Some(item) => item,
            None => return Ok(None),
        };
        if reader.read_item().await?.is_some() {
            return Err(ProtocolError::TooManyItems {
                verb: self.verb.as_str(),
            }
            .into());
        }
        Ok(Some(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::test_support::{request_bytes, respond};
    use crate::error::ClientError;

    #[tokio::test]
    async fn encodes_request_line() {
        assert_eq!(request_bytes(&RetrievalCommand::get("alpha")).await, b"get alpha\r\n");
        assert_eq!(request_bytes(&RetrievalCommand::gets("alpha")).await, b"gets alpha\r\n");
    }

    #[tokio::test]
    async fn miss_yields_none() {
        let result = respond(RetrievalCommand::get("k"), b"END\r\n").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn hit_yields_item() {
        let item = respond(RetrievalCommand::gets("k"), b"VALUE k 3 2 99\r\nhi\r\nEND\r\n")
            .await
            .unwrap()
            .expect("item");
        assert_eq!(item.key(), "k");
        assert_eq!(item.flags(), 3);
        assert_eq!(item.cas(), Some(99));
        assert_eq!(item.data().as_ref(), b"hi");
    }

    #[tokio::test]
    async fn second_item_is_a_protocol_error() {
        let err = respond(
            RetrievalCommand::get("k"),
            b"VALUE k 0 1\r\na\r\nVALUE k 0 1\r\nb\r\nEND\r\n",
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::TooManyItems { verb: "get" })
        ));
        assert!(err.to_string().contains("more items than expected"));
    }

    #[tokio::test]
    async fn server_error_surfaces() {
        let err = respond(RetrievalCommand::get("k"), b"SERVER_ERROR busy\r\n")
            .await
            .unwrap_err();
        assert!(err.is_protocol());
    }
}
