// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::errors::StoreError;
use jobhost_api::queue::{MessageReceipt, QueueStore, ReceivedMessage};
use redis::Commands;

use super::{backend_error, RedisStore};

// Take the first visible message and move its visibility to the end of the lease.
const RECEIVE_SCRIPT: &str = r"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
    return false
end
local id = ids[1]
local key = ARGV[4] .. id
redis.call('ZADD', KEYS[1], tonumber(ARGV[1]) + tonumber(ARGV[2]), id)
redis.call('HSET', key, 'pop_receipt', ARGV[3])
local count = redis.call('HINCRBY', key, 'dequeue_count', 1)
local content = redis.call('HGET', key, 'content')
return {id, content, count}
";

// ARGV[3] is the new visibility time, or empty to delete the message.
const COMPLETE_SCRIPT: &str = r"
if redis.call('HGET', KEYS[2], 'pop_receipt') ~= ARGV[1] then
    return 0
end
if ARGV[3] == '' then
    redis.call('ZREM', KEYS[1], ARGV[2])
    redis.call('DEL', KEYS[2])
else
    redis.call('ZADD', KEYS[1], tonumber(ARGV[3]), ARGV[2])
    redis.call('HDEL', KEYS[2], 'pop_receipt')
end
return 1
";

impl RedisStore {
    fn visible_key(&self, queue: &str) -> String {
        self.key(&format!("queue:{}:visible", queue))
    }

    fn message_key_prefix(&self, queue: &str) -> String {
        self.key(&format!("queue:{}:message:", queue))
    }

    fn ensure_queue(&self, connection: &mut redis::Connection, queue: &str) -> Result<(), StoreError> {
        let exists: bool = connection.sismember(self.key("queues"), queue).map_err(backend_error)?;
        match exists {
            true => Ok(()),
            false => Err(StoreError::QueueNotFound(queue.to_string())),
        }
    }

    async fn complete(&self, queue: &str, receipt: &MessageReceipt, visible_at: Option<i64>) -> Result<(), StoreError> {
        let mut connection = self.connection.lock().await;
        let done: i64 = redis::Script::new(COMPLETE_SCRIPT)
            .key(self.visible_key(queue))
            .key(format!("{}{}", self.message_key_prefix(queue), receipt.message_id))
            .arg(&receipt.pop_receipt)
            .arg(&receipt.message_id)
            .arg(visible_at.map(|t| t.to_string()).unwrap_or_default())
            .invoke(&mut *connection)
            .map_err(backend_error)?;
        match done {
            1 => Ok(()),
            _ => Err(StoreError::LeaseLost(receipt.message_id.clone())),
        }
    }
}

#[async_trait::async_trait]
impl QueueStore for RedisStore {
    async fn create_if_not_exists(&self, queue: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.lock().await;
        let _: i64 = connection.sadd(self.key("queues"), queue).map_err(backend_error)?;
        Ok(())
    }

    async fn add_message(&self, queue: &str, content: Vec<u8>) -> Result<(), StoreError> {
        let mut connection = self.connection.lock().await;
        self.ensure_queue(&mut connection, queue)?;
        let id = uuid::Uuid::new_v4().to_string();
        redis::pipe()
            .atomic()
            .hset_multiple(
                format!("{}{}", self.message_key_prefix(queue), id),
                &[("content", content), ("dequeue_count", b"0".to_vec())],
            )
            .ignore()
            .zadd(self.visible_key(queue), &id, chrono::Utc::now().timestamp_millis())
            .ignore()
            .query::<()>(&mut *connection)
            .map_err(backend_error)
    }

    async fn receive_message(&self, queue: &str, lease: std::time::Duration) -> Result<Option<ReceivedMessage>, StoreError> {
        let mut connection = self.connection.lock().await;
        self.ensure_queue(&mut connection, queue)?;
        let pop_receipt = uuid::Uuid::new_v4().to_string();
        let received: Option<(String, Vec<u8>, u32)> = redis::Script::new(RECEIVE_SCRIPT)
            .key(self.visible_key(queue))
            .arg(chrono::Utc::now().timestamp_millis())
            .arg(lease.as_millis() as i64)
            .arg(&pop_receipt)
            .arg(self.message_key_prefix(queue))
            .invoke(&mut *connection)
            .map_err(backend_error)?;
        Ok(received.map(|(message_id, content, dequeue_count)| ReceivedMessage {
            receipt: MessageReceipt {
                message_id: message_id.clone(),
                pop_receipt,
            },
            message_id,
            content,
            dequeue_count,
        }))
    }

    async fn delete_message(&self, queue: &str, receipt: &MessageReceipt) -> Result<(), StoreError> {
        self.complete(queue, receipt, None).await
    }

    async fn release_message(&self, queue: &str, receipt: &MessageReceipt, delay: std::time::Duration) -> Result<(), StoreError> {
        let visible_at = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
        self.complete(queue, receipt, Some(visible_at)).await
    }
}
