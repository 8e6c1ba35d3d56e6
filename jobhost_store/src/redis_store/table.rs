// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::errors::StoreError;
use jobhost_api::table::TableStore;
use redis::Commands;

use super::{backend_error, json_error, RedisStore};

impl RedisStore {
    fn partition_key(&self, table: &str, partition_key: &str) -> String {
        self.key(&format!("table:{}:{}", table, partition_key))
    }
}

#[async_trait::async_trait]
impl TableStore for RedisStore {
    async fn retrieve(&self, table: &str, partition_key: &str, row_key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let mut connection = self.connection.lock().await;
        let value: Option<String> = connection
            .hget(self.partition_key(table, partition_key), row_key)
            .map_err(backend_error)?;
        value.map(|v| serde_json::from_str(&v).map_err(json_error)).transpose()
    }

    async fn upsert(&self, table: &str, partition_key: &str, row_key: &str, entity: serde_json::Value) -> Result<(), StoreError> {
        let mut connection = self.connection.lock().await;
        connection
            .hset::<_, _, _, ()>(self.partition_key(table, partition_key), row_key, entity.to_string())
            .map_err(backend_error)
    }

    async fn query_partition(&self, table: &str, partition_key: &str) -> Result<Vec<(String, serde_json::Value)>, StoreError> {
        let mut connection = self.connection.lock().await;
        let rows: std::collections::BTreeMap<String, String> =
            connection.hgetall(self.partition_key(table, partition_key)).map_err(backend_error)?;
        rows.into_iter()
            .map(|(row_key, value)| Ok((row_key, serde_json::from_str(&value).map_err(json_error)?)))
            .collect()
    }
}
