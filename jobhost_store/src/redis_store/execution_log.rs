// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::errors::StoreError;
use jobhost_api::execution_log::{ExecutionLogEntry, ExecutionLogSink};
use redis::Commands;

use super::{backend_error, json_error, RedisStore};

#[async_trait::async_trait]
impl ExecutionLogSink for RedisStore {
    async fn append(&self, entry: ExecutionLogEntry) -> Result<(), StoreError> {
        let value = serde_json::to_string(&entry).map_err(json_error)?;
        let mut connection = self.connection.lock().await;
        redis::pipe()
            .rpush(self.key("execution_log"), &value)
            .ignore()
            .rpush(self.key(&format!("execution:{}", entry.id)), &value)
            .ignore()
            .query::<()>(&mut *connection)
            .map_err(backend_error)
    }

    async fn entries_for(&self, id: &uuid::Uuid) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        let mut connection = self.connection.lock().await;
        let values: Vec<String> = connection
            .lrange(self.key(&format!("execution:{}", id)), 0, -1)
            .map_err(backend_error)?;
        values
            .iter()
            .map(|v| serde_json::from_str(v).map_err(json_error))
            .collect()
    }
}
