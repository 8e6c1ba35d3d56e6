// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::errors::StoreError;
use jobhost_api::queue::{MessageReceipt, QueueStore, ReceivedMessage};

#[derive(Clone, Default)]
pub struct MemoryQueueStore {
    inner: std::sync::Arc<tokio::sync::Mutex<MemoryQueueStoreInner>>,
}

#[derive(Default)]
struct MemoryQueueStoreInner {
    queues: std::collections::HashMap<String, std::collections::VecDeque<StoredMessage>>,
}

struct StoredMessage {
    message_id: String,
    content: Vec<u8>,
    dequeue_count: u32,
    visible_at: chrono::DateTime<chrono::Utc>,
    pop_receipt: Option<String>,
}

fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis() as i64)
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages in the queue, leased or not.
    pub async fn len(&self, queue: &str) -> usize {
        self.inner.lock().await.queues.get(queue).map(|q| q.len()).unwrap_or_default()
    }

    /// Content of all the messages in the queue, leased or not.
    pub async fn contents(&self, queue: &str) -> Vec<Vec<u8>> {
        match self.inner.lock().await.queues.get(queue) {
            Some(messages) => messages.iter().map(|m| m.content.clone()).collect(),
            None => vec![],
        }
    }
}

impl MemoryQueueStoreInner {
    fn queue(&mut self, queue: &str) -> Result<&mut std::collections::VecDeque<StoredMessage>, StoreError> {
        self.queues.get_mut(queue).ok_or_else(|| StoreError::QueueNotFound(queue.to_string()))
    }

    fn leased(&mut self, queue: &str, receipt: &MessageReceipt) -> Result<usize, StoreError> {
        self.queue(queue)?
            .iter()
            .position(|m| m.message_id == receipt.message_id && m.pop_receipt.as_deref() == Some(receipt.pop_receipt.as_str()))
            .ok_or_else(|| StoreError::LeaseLost(receipt.message_id.clone()))
    }
}

#[async_trait::async_trait]
impl QueueStore for MemoryQueueStore {
    async fn create_if_not_exists(&self, queue: &str) -> Result<(), StoreError> {
        self.inner.lock().await.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn add_message(&self, queue: &str, content: Vec<u8>) -> Result<(), StoreError> {
        self.inner.lock().await.queue(queue)?.push_back(StoredMessage {
            message_id: uuid::Uuid::new_v4().to_string(),
            content,
            dequeue_count: 0,
            visible_at: chrono::Utc::now(),
            pop_receipt: None,
        });
        Ok(())
    }

    async fn receive_message(&self, queue: &str, lease: std::time::Duration) -> Result<Option<ReceivedMessage>, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = chrono::Utc::now();
        let Some(message) = inner.queue(queue)?.iter_mut().find(|m| m.visible_at <= now) else {
            return Ok(None);
        };
        let pop_receipt = uuid::Uuid::new_v4().to_string();
        message.dequeue_count += 1;
        message.visible_at = now + to_chrono(lease);
        message.pop_receipt = Some(pop_receipt.clone());
        Ok(Some(ReceivedMessage {
            message_id: message.message_id.clone(),
            content: message.content.clone(),
            receipt: MessageReceipt {
                message_id: message.message_id.clone(),
                pop_receipt,
            },
            dequeue_count: message.dequeue_count,
        }))
    }

    async fn delete_message(&self, queue: &str, receipt: &MessageReceipt) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let position = inner.leased(queue, receipt)?;
        inner.queue(queue)?.remove(position);
        Ok(())
    }

    async fn release_message(&self, queue: &str, receipt: &MessageReceipt, delay: std::time::Duration) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let position = inner.leased(queue, receipt)?;
        if let Some(message) = inner.queue(queue)?.get_mut(position) {
            message.visible_at = chrono::Utc::now() + to_chrono(delay);
            message.pop_receipt = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: std::time::Duration = std::time::Duration::from_millis(100);

    #[tokio::test]
    async fn test_queue_not_found() {
        let store = MemoryQueueStore::new();
        assert_eq!(
            Err(StoreError::QueueNotFound("work".to_string())),
            store.add_message("work", b"x".to_vec()).await
        );
        assert!(store.receive_message("work", LEASE).await.is_err());
        jobhost_api::queue::add_message_or_create(&store, "work", b"x".to_vec()).await.unwrap();
        assert_eq!(1, store.len("work").await);
    }

    #[tokio::test]
    async fn test_lease_hides_message_until_expiry() {
        let store = MemoryQueueStore::new();
        store.create_if_not_exists("work").await.unwrap();
        store.add_message("work", b"one".to_vec()).await.unwrap();

        let first = store.receive_message("work", LEASE).await.unwrap().unwrap();
        assert_eq!(b"one".to_vec(), first.content);
        assert_eq!(1, first.dequeue_count);
        assert!(store.receive_message("work", LEASE).await.unwrap().is_none());

        tokio::time::sleep(LEASE * 2).await;
        let second = store.receive_message("work", LEASE).await.unwrap().unwrap();
        assert_eq!(first.message_id, second.message_id);
        assert_eq!(2, second.dequeue_count);

        // the first receipt is stale now
        assert_eq!(
            Err(StoreError::LeaseLost(first.message_id.clone())),
            store.delete_message("work", &first.receipt).await
        );
        store.delete_message("work", &second.receipt).await.unwrap();
        assert_eq!(0, store.len("work").await);
    }

    #[tokio::test]
    async fn test_release_makes_message_visible() {
        let store = MemoryQueueStore::new();
        store.create_if_not_exists("work").await.unwrap();
        store.add_message("work", b"one".to_vec()).await.unwrap();

        let message = store.receive_message("work", std::time::Duration::from_secs(60)).await.unwrap().unwrap();
        store.release_message("work", &message.receipt, std::time::Duration::ZERO).await.unwrap();
        let again = store.receive_message("work", LEASE).await.unwrap().unwrap();
        assert_eq!(message.message_id, again.message_id);
        assert!(store.delete_message("work", &message.receipt).await.is_err());
    }

    #[tokio::test]
    async fn test_clones_share_content() {
        let store = MemoryQueueStore::new();
        let other = store.clone();
        store.create_if_not_exists("work").await.unwrap();
        other.add_message("work", b"one".to_vec()).await.unwrap();
        assert_eq!(vec![b"one".to_vec()], store.contents("work").await);
    }
}
