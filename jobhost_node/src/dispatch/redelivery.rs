// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::errors::StoreError;
use jobhost_api::invoke::MessageSource;
use jobhost_api::queue::{add_message_or_create, QueueStore, ReceivedMessage};

/// What happened to a message once its processing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    Deleted,
    Released,
    Poisoned,
}

/// How failed messages are given back: released after a delay until they
/// have been received `max_dequeue_count` times, then moved to the poison
/// queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    pub max_dequeue_count: u32,
    pub retry_delay: std::time::Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_dequeue_count: 5,
            retry_delay: std::time::Duration::ZERO,
        }
    }
}

impl RedeliveryPolicy {
    pub async fn settle_failed(
        &self,
        store: &dyn QueueStore,
        queue: &str,
        poison_queue: &str,
        message: &ReceivedMessage,
    ) -> Result<MessageDisposition, StoreError> {
        if message.dequeue_count >= self.max_dequeue_count {
            poison(store, queue, poison_queue, message).await?;
            Ok(MessageDisposition::Poisoned)
        } else {
            store.release_message(queue, &message.receipt, self.retry_delay).await?;
            Ok(MessageDisposition::Released)
        }
    }
}

/// Move a message to the poison queue.
pub async fn poison(store: &dyn QueueStore, queue: &str, poison_queue: &str, message: &ReceivedMessage) -> Result<(), StoreError> {
    log::warn!(
        "moving message {} from {} to {} after {} attempt(s)",
        message.message_id,
        queue,
        poison_queue,
        message.dequeue_count
    );
    add_message_or_create(store, poison_queue, message.content.clone()).await?;
    store.delete_message(queue, &message.receipt).await
}

pub fn poison_queue_name(source: MessageSource, entity: &str) -> String {
    match source {
        MessageSource::Queue => format!("{}-poison", entity),
        MessageSource::ServiceBus => format!("{}/$deadletterqueue", entity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_release_then_poison() {
        let store = jobhost_store::memory::MemoryQueueStore::new();
        let policy = RedeliveryPolicy {
            max_dequeue_count: 2,
            retry_delay: std::time::Duration::ZERO,
        };
        add_message_or_create(&store, "work", b"payload".to_vec()).await.unwrap();

        let lease = std::time::Duration::from_secs(60);
        let first = store.receive_message("work", lease).await.unwrap().unwrap();
        assert_eq!(
            MessageDisposition::Released,
            policy.settle_failed(&store, "work", "work-poison", &first).await.unwrap()
        );
        let second = store.receive_message("work", lease).await.unwrap().unwrap();
        assert_eq!(2, second.dequeue_count);
        assert_eq!(
            MessageDisposition::Poisoned,
            policy.settle_failed(&store, "work", "work-poison", &second).await.unwrap()
        );
        assert_eq!(0, store.len("work").await);
        assert_eq!(vec![b"payload".to_vec()], store.contents("work-poison").await);
    }

    #[test]
    fn test_poison_queue_names() {
        assert_eq!("orders-poison", poison_queue_name(MessageSource::Queue, "orders"));
        assert_eq!("orders/$deadletterqueue", poison_queue_name(MessageSource::ServiceBus, "orders"));
    }
}
