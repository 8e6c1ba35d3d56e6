// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use crate::errors::StoreError;

/// Proof of holding the lease on a received message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MessageReceipt {
    pub message_id: String,
    pub pop_receipt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub content: Vec<u8>,
    pub receipt: MessageReceipt,
    /// Number of times the message has been received, this one included.
    pub dequeue_count: u32,
}

/// Durable queue with per-message leases.
///
/// A received message is invisible to other receivers until its lease
/// expires; only the holder of the current receipt may delete or release it.
#[async_trait::async_trait]
pub trait QueueStore: Send + Sync {
    async fn create_if_not_exists(&self, queue: &str) -> Result<(), StoreError>;

    async fn add_message(&self, queue: &str, content: Vec<u8>) -> Result<(), StoreError>;

    async fn receive_message(&self, queue: &str, lease: std::time::Duration) -> Result<Option<ReceivedMessage>, StoreError>;

    async fn delete_message(&self, queue: &str, receipt: &MessageReceipt) -> Result<(), StoreError>;

    /// Give up the lease, making the message visible again after `delay`.
    async fn release_message(&self, queue: &str, receipt: &MessageReceipt, delay: std::time::Duration) -> Result<(), StoreError>;
}

/// Add a message, creating the queue and retrying once if it is missing.
pub async fn add_message_or_create(store: &dyn QueueStore, queue: &str, content: Vec<u8>) -> Result<(), StoreError> {
    match store.add_message(queue, content.clone()).await {
        Err(StoreError::QueueNotFound(_)) => {
            log::debug!("queue {} not found, creating it", queue);
            store.create_if_not_exists(queue).await?;
            store.add_message(queue, content).await
        }
        res => res,
    }
}

/// Receive a message, creating the queue and retrying once if it is missing.
pub async fn receive_message_or_create(
    store: &dyn QueueStore,
    queue: &str,
    lease: std::time::Duration,
) -> Result<Option<ReceivedMessage>, StoreError> {
    match store.receive_message(queue, lease).await {
        Err(StoreError::QueueNotFound(_)) => {
            log::debug!("queue {} not found, creating it", queue);
            store.create_if_not_exists(queue).await?;
            store.receive_message(queue, lease).await
        }
        res => res,
    }
}
