// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::errors::StoreError;
use jobhost_api::running_host::{HostLivenessStore, RunningHost};
use redis::Commands;

use super::{backend_error, json_error, RedisStore};

#[async_trait::async_trait]
impl HostLivenessStore for RedisStore {
    async fn upsert(&self, record: RunningHost) -> Result<(), StoreError> {
        let value = serde_json::to_string(&record).map_err(json_error)?;
        let mut connection = self.connection.lock().await;
        redis::pipe()
            .set(self.key(&format!("host:{}", record.host_identity)), value)
            .ignore()
            .sadd(self.key("hosts"), &record.host_identity)
            .ignore()
            .query::<()>(&mut *connection)
            .map_err(backend_error)
    }

    async fn read(&self, host_identity: &str) -> Result<Option<RunningHost>, StoreError> {
        let mut connection = self.connection.lock().await;
        let value: Option<String> = connection.get(self.key(&format!("host:{}", host_identity))).map_err(backend_error)?;
        value.map(|v| serde_json::from_str(&v).map_err(json_error)).transpose()
    }

    async fn read_all(&self) -> Result<Vec<RunningHost>, StoreError> {
        let identities: Vec<String> = {
            let mut connection = self.connection.lock().await;
            connection.smembers(self.key("hosts")).map_err(backend_error)?
        };
        let mut records = vec![];
        for identity in identities {
            if let Some(record) = self.read(&identity).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.host_identity.cmp(&b.host_identity));
        Ok(records)
    }
}
