use crate::service::DetectionBatch;
use std::sync::Arc;
use tokio::sync::broadcast;

pub const CHANNEL_NAME: &str = "result_stream";

/// Fan-out of completed detection batches to any number of subscribers.
///
/// Subscribers only see batches published after they attach. One that falls
/// more than `capacity` records behind loses the oldest ones and carries on.
#[derive(Clone)]
pub struct ResultStream {
    tx: broadcast::Sender<Arc<DetectionBatch>>,
}

impl ResultStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Never blocks. Returns how many subscribers the batch was queued for.
    pub fn publish(&self, batch: DetectionBatch) -> usize {
        match self.tx.send(Arc::new(batch)) {
            Ok(receivers) => {
                tracing::trace!(channel = CHANNEL_NAME, receivers, "Published batch");
                receivers
            }
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<Arc<DetectionBatch>>,
}

impl Subscription {
    /// Next published batch, or `None` once the stream is gone.
    pub async fn recv(&mut self) -> Option<Arc<DetectionBatch>> {
        loop {
            match self.rx.recv().await {
                Ok(batch) => return Some(batch),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = CHANNEL_NAME, skipped, "Subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::ImageKind;

    fn batch(width: u32) -> DetectionBatch {
        DetectionBatch::success(Vec::new(), ImageKind::Png, width, 1, None)
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let stream = ResultStream::new(4);
        assert_eq!(stream.publish(batch(1)), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let stream = ResultStream::new(4);
        let mut a = stream.subscribe();
        let mut b = stream.subscribe();
        assert_eq!(stream.subscriber_count(), 2);

        assert_eq!(stream.publish(batch(7)), 2);

        assert_eq!(a.recv().await.unwrap().width, 7);
        assert_eq!(b.recv().await.unwrap().width, 7);
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let stream = ResultStream::new(4);
        stream.publish(batch(1));

        let mut late = stream.subscribe();
        stream.publish(batch(2));
        assert_eq!(late.recv().await.unwrap().width, 2);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let stream = ResultStream::new(2);
        let mut slow = stream.subscribe();

        for width in 1..=5 {
            stream.publish(batch(width));
        }

        assert_eq!(slow.recv().await.unwrap().width, 4);
        assert_eq!(slow.recv().await.unwrap().width, 5);
    }

    #[tokio::test]
    async fn test_recv_ends_when_stream_dropped() {
        let stream = ResultStream::new(2);
        let mut sub = stream.subscribe();
        drop(stream);
        assert!(sub.recv().await.is_none());
    }
}
