use tokio::io::AsyncRead;

use super::{unexpected, Command};
use crate::error::ClientResult;
use crate::reader::ResponseReader;
use crate::transport::Transport;

/// Counter verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticVerb {
    Incr,
    Decr,
}

impl ArithmeticVerb {
    pub const fn as_str(self) -> &'static str {
        match self {
            ArithmeticVerb::Incr => "incr",
            ArithmeticVerb::Decr => "decr",
        }
    }
}

/// `incr`/`decr`. Resolves to the new counter value, or `None` when the
/// key does not exist.
#[derive(Debug, Clone)]
pub struct ArithmeticCommand {
    verb: ArithmeticVerb,
    key: String,
    delta: u64,
}

impl ArithmeticCommand {
    pub fn increment(key: impl Into<String>, delta: u64) -> Self {
        ArithmeticCommand {
            verb: ArithmeticVerb::Incr,
            key: key.into(),
            delta,
        }
    }

    pub fn decrement(key: impl Into<String>, delta: u64) -> Self {
        ArithmeticCommand {
            verb: ArithmeticVerb::Decr,
            key: key.into(),
            delta,
        }
    }
}

impl Command for ArithmeticCommand {
    type Output = Option<u64>;

    fn verb(&self) -> &'static str {
        self.verb.as_str()
    }

    async fn send_request<T: Transport>(&self, transport: &mut T) -> ClientResult<()> {
        let line = format!("{} {} {}\r\n", self.verb.as_str(), self.key, self.delta);
        transport.send(&[line.as_bytes()]).await?;
        Ok(())
    }

    async fn read_response<R: AsyncRead + Unpin + Send>(
        &mut self,
        reader: &mut ResponseReader<R>,
    ) -> ClientResult<Option<u64>> {
        let line = reader.read_line().await?;
        if line.first() == "NOT_FOUND" {
            return Ok(None);
        }
        match line.first().parse::<u64>() {
            Ok(value) => Ok(Some(value)),
            Err(_) => Err(unexpected(self.verb.as_str(), &line).into()),
        }
    }
}
