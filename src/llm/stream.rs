use tokio::sync::mpsc;

use crate::error::Result;

pub type ReplySender = mpsc::UnboundedSender<Result<String>>;

/// A deferred text reply: deltas are pushed by a producer task and resolved
/// to the final string by whoever relays the reply.
pub struct ReplyStream {
    rx: mpsc::UnboundedReceiver<Result<String>>,
}

impl ReplyStream {
    /// Create a matched pair of sender + stream
    pub fn pair() -> (ReplySender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// A stream that yields `text` as a single chunk and ends
    pub fn from_text(text: impl Into<String>) -> Self {
        let (tx, stream) = Self::pair();
        // Receiver is alive, so the send cannot fail
        let _ = tx.send(Ok(text.into()));
        stream
    }

    pub async fn next(&mut self) -> Option<Result<String>> {
        self.rx.recv().await
    }

    /// Drain the stream into one string, failing on the first error chunk
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            text.push_str(&chunk?);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_collect_joins_chunks() {
        let (tx, stream) = ReplyStream::pair();
        tx.send(Ok("Hello, ".to_string())).unwrap();
        tx.send(Ok("alice".to_string())).unwrap();
        drop(tx);
        assert_eq!(stream.collect_text().await.unwrap(), "Hello, alice");
    }

    #[tokio::test]
    async fn test_collect_stops_on_error() {
        let (tx, stream) = ReplyStream::pair();
        tx.send(Ok("partial".to_string())).unwrap();
        tx.send(Err(Error::Upstream("connection reset".into()))).unwrap();
        drop(tx);
        assert!(stream.collect_text().await.is_err());
    }

    #[tokio::test]
    async fn test_from_text() {
        assert_eq!(ReplyStream::from_text("hi").collect_text().await.unwrap(), "hi");
    }
}
