use tokio::io::AsyncRead;

use super::{unexpected, Command};
use crate::error::ClientResult;
use crate::reader::ResponseReader;
use crate::transport::Transport;

/// `delete`. Resolves to true when a value was removed.
#[derive(Debug, Clone)]
pub struct DeleteCommand {
    key: String,
}

impl DeleteCommand {
    pub fn new(key: impl Into<String>) -> Self {
        DeleteCommand { key: key.into() }
    }
}

impl Command for DeleteCommand {
    type Output = bool;

    fn verb(&self) -> &'static str {
        "delete"
    }

    async fn send_request<T: Transport>(&self, transport: &mut T) -> ClientResult<()> {
        let line = format!("delete {}\r\n", self.key);
        transport.send(&[line.as_bytes()]).await?;
        Ok(())
    }

    async fn read_response<R: AsyncRead + Unpin + Send>(
        &mut self,
        reader: &mut ResponseReader<R>,
    ) -> ClientResult<bool> {
        let line = reader.read_line().await?;
        match line.first() {
            "DELETED" => Ok(true),
            "NOT_FOUND" => Ok(false),
            _ => Err(unexpected("delete", &line).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::test_support::{request_bytes, respond};

    #[tokio::test]
    async fn delete_round_trip() {
        assert_eq!(request_bytes(&DeleteCommand::new("k")).await, b"delete k\r\n");
        assert!(respond(DeleteCommand::new("k"), b"DELETED\r\n").await.unwrap());
        assert!(!respond(DeleteCommand::new("k"), b"NOT_FOUND\r\n").await.unwrap());
        let err = respond(DeleteCommand::new("k"), b"STORED\r\n").await.unwrap_err();
        assert!(err.to_string().contains("delete"));
    }
}
