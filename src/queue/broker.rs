use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use super::types::{JobEnvelope, JobId};

/// ジョブの投入とワーカーへの配送。
#[async_trait]
pub trait Broker: Send + Sync {
    async fn submit(&self, queue: &str, envelope: JobEnvelope) -> Result<()>;

    /// 次のジョブを取り出す。今は無い場合は `None`。
    async fn next(&self, queue: &str) -> Result<Option<JobEnvelope>>;

    /// 取り出したが着手できなかったジョブを配送待ちに戻す。
    async fn release(&self, queue: &str, envelope: JobEnvelope) -> Result<()>;

    /// 終了状態まで記録したジョブをキューから消す。
    async fn ack(&self, queue: &str, job_id: JobId) -> Result<()>;
}

struct Channel {
    sender: mpsc::UnboundedSender<JobEnvelope>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<JobEnvelope>>>,
}

/// プロセス内のブローカー。`next` はジョブが届くまで待つ。
#[derive(Default)]
pub struct InMemoryBroker {
    channels: Mutex<HashMap<String, Channel>>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn channel(
        &self,
        queue: &str,
    ) -> (
        mpsc::UnboundedSender<JobEnvelope>,
        Arc<Mutex<mpsc::UnboundedReceiver<JobEnvelope>>>,
    ) {
        let mut channels = self.channels.lock().await;
        let channel = channels.entry(queue.to_string()).or_insert_with(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            Channel {
                sender,
                receiver: Arc::new(Mutex::new(receiver)),
            }
        });
        (channel.sender.clone(), Arc::clone(&channel.receiver))
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn submit(&self, queue: &str, envelope: JobEnvelope) -> Result<()> {
        let (sender, _) = self.channel(queue).await;
        sender
            .send(envelope)
            .map_err(|_| anyhow!("queue {queue} is closed"))
    }

    async fn next(&self, queue: &str) -> Result<Option<JobEnvelope>> {
        let (_, receiver) = self.channel(queue).await;
        let mut receiver = receiver.lock().await;
        Ok(receiver.recv().await)
    }

    async fn release(&self, queue: &str, envelope: JobEnvelope) -> Result<()> {
        self.submit(queue, envelope).await
    }

    async fn ack(&self, _queue: &str, _job_id: JobId) -> Result<()> {
        // 取り出した時点でチャネルから消えている
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::types::JobPayload;
    use uuid::Uuid;

    fn envelope(text: &str) -> JobEnvelope {
        JobEnvelope {
            job_id: Uuid::now_v7(),
            payload: JobPayload::summary(text),
        }
    }

    #[tokio::test]
    async fn delivers_in_submission_order_per_queue() {
        let broker = InMemoryBroker::new();
        let first = envelope("first");
        let second = envelope("second");
        let other = envelope("other");

        broker.submit("a", first.clone()).await.unwrap();
        broker.submit("b", other.clone()).await.unwrap();
        broker.submit("a", second.clone()).await.unwrap();

        assert_eq!(broker.next("a").await.unwrap(), Some(first));
        assert_eq!(broker.next("a").await.unwrap(), Some(second));
        assert_eq!(broker.next("b").await.unwrap(), Some(other));
    }

    #[tokio::test]
    async fn released_job_is_delivered_again() {
        let broker = InMemoryBroker::new();
        let job = envelope("retry me");
        broker.submit("q", job.clone()).await.unwrap();

        let claimed = broker.next("q").await.unwrap().unwrap();
        broker.release("q", claimed).await.unwrap();
        assert_eq!(broker.next("q").await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn next_waits_for_a_submission() {
        let broker = Arc::new(InMemoryBroker::new());
        let waiter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.next("q").await })
        };
        tokio::task::yield_now().await;

        let job = envelope("late");
        broker.submit("q", job.clone()).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), Some(job));
    }
}
