//! Multi-key retrieval streamed through a bounded channel.
//!
//! The reading side pushes each decoded item into the channel as soon as it
//! is parsed and suspends when the consumer falls behind, so a large result
//! never has to be buffered as a whole.

use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use mcpool_common::Item;

use super::{Command, RetrievalVerb};
use crate::error::ClientResult;
use crate::reader::ResponseReader;
use crate::transport::Transport;

/// Creates a bounded item channel and its consuming stream.
pub fn item_channel(capacity: usize) -> (mpsc::Sender<ClientResult<Item>>, ItemStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, ItemStream { rx })
}

/// Finite, single-pass sequence of retrieved items.
///
/// Yields `Err` once if the retrieval fails part-way, then ends.
#[derive(Debug)]
pub struct ItemStream {
    rx: mpsc::Receiver<ClientResult<Item>>,
}

impl ItemStream {
    /// Next item, or `None` once the server's `END` was seen.
    pub async fn next(&mut self) -> Option<ClientResult<Item>> {
        self.rx.recv().await
    }

    /// Drains the stream into a vector, stopping at the first error.
    pub async fn collect(mut self) -> ClientResult<Vec<Item>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }
}

/// `get`/`gets` for several keys on one request line.
///
/// Resolves to the number of items delivered to the sink.
pub struct MultiGetCommand {
    verb: RetrievalVerb,
    keys: Vec<String>,
    sink: mpsc::Sender<ClientResult<Item>>,
}

impl MultiGetCommand {
    pub fn new<I, S>(verb: RetrievalVerb, keys: I, sink: mpsc::Sender<ClientResult<Item>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MultiGetCommand {
            verb,
            keys: keys.into_iter().map(Into::into).collect(),
            sink,
        }
    }
}

impl Command for MultiGetCommand {
    type Output = usize;

    fn verb(&self) -> &'static str {
        self.verb.as_str()
    }

    async fn send_request<T: Transport>(&self, transport: &mut T) -> ClientResult<()> {
        let mut line = String::from(self.verb.as_str());
        for key in &self.keys {
            line.push(' ');
            line.push_str(key);
        }
        line.push_str("\r\n");
        transport.send(&[line.as_bytes()]).await?;
        Ok(())
    }

    async fn read_response<R: AsyncRead + Unpin + Send>(
        &mut self,
        reader: &mut ResponseReader<R>,
    ) -> ClientResult<usize> {
        let mut delivered = 0;
        while let Some(item) = reader.read_item().await? {
            // A departed consumer still needs the stream drained up to END.
            if self.sink.send(Ok(item)).await.is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}
