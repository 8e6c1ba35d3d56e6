// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::binding::FunctionDefinition;
use jobhost_api::errors::StoreError;
use jobhost_api::function_table::FunctionTableStore;
use redis::Commands;

use super::{backend_error, json_error, RedisStore};

#[async_trait::async_trait]
impl FunctionTableStore for RedisStore {
    async fn lookup(&self, function_id: &str) -> Result<Option<FunctionDefinition>, StoreError> {
        let mut connection = self.connection.lock().await;
        let value: Option<String> = connection
            .get(self.key(&format!("function:{}", function_id)))
            .map_err(backend_error)?;
        value.map(|v| serde_json::from_str(&v).map_err(json_error)).transpose()
    }

    async fn read_all(&self) -> Result<Vec<FunctionDefinition>, StoreError> {
        let mut connection = self.connection.lock().await;
        let mut ids: Vec<String> = connection.smembers(self.key("functions")).map_err(backend_error)?;
        ids.sort();
        let mut definitions = vec![];
        for id in ids {
            let value: Option<String> = connection.get(self.key(&format!("function:{}", id))).map_err(backend_error)?;
            if let Some(value) = value {
                definitions.push(serde_json::from_str(&value).map_err(json_error)?);
            }
        }
        Ok(definitions)
    }

    async fn add(&self, definition: FunctionDefinition) -> Result<(), StoreError> {
        let value = serde_json::to_string(&definition).map_err(json_error)?;
        let mut connection = self.connection.lock().await;
        redis::pipe()
            .atomic()
            .set(self.key(&format!("function:{}", definition.id())), value)
            .ignore()
            .sadd(self.key("functions"), definition.id())
            .ignore()
            .query::<()>(&mut *connection)
            .map_err(backend_error)
    }

    async fn delete(&self, definition: &FunctionDefinition) -> Result<(), StoreError> {
        let mut connection = self.connection.lock().await;
        redis::pipe()
            .atomic()
            .del(self.key(&format!("function:{}", definition.id())))
            .ignore()
            .srem(self.key("functions"), definition.id())
            .ignore()
            .query::<()>(&mut *connection)
            .map_err(backend_error)
    }
}
