use tokio::io::AsyncRead;

use mcpool_common::Expiry;

use super::{unexpected, Command};
use crate::error::ClientResult;
use crate::reader::ResponseReader;
use crate::transport::Transport;

/// `touch`: update a value's expiry without fetching it.
#[derive(Debug, Clone)]
pub struct TouchCommand {
    key: String,
    expiry: Expiry,
}

impl TouchCommand {
    pub fn new(key: impl Into<String>, expiry: Expiry) -> Self {
        TouchCommand {
            key: key.into(),
            expiry,
        }
    }
}

impl Command for TouchCommand {
    type Output = bool;

    fn verb(&self) -> &'static str {
        "touch"
    }

    async fn send_request<T: Transport>(&self, transport: &mut T) -> ClientResult<()> {
        let line = format!("touch {} {}\r\n", self.key, self.expiry.wire_seconds());
        transport.send(&[line.as_bytes()]).await?;
        Ok(())
    }

    async fn read_response<R: AsyncRead + Unpin + Send>(
        &mut self,
        reader: &mut ResponseReader<R>,
    ) -> ClientResult<bool> {
        let line = reader.read_line().await?;
        match line.first() {
            "TOUCHED" => Ok(true),
            "NOT_FOUND" => Ok(false),
            _ => Err(unexpected("touch", &line).into()),
        }
    }
}
