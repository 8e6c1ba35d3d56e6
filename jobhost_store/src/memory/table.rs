// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::errors::StoreError;
use jobhost_api::table::TableStore;

type Partition = std::collections::BTreeMap<String, serde_json::Value>;

#[derive(Clone, Default)]
pub struct MemoryTableStore {
    partitions: std::sync::Arc<tokio::sync::Mutex<std::collections::HashMap<(String, String), Partition>>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TableStore for MemoryTableStore {
    async fn retrieve(&self, table: &str, partition_key: &str, row_key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self
            .partitions
            .lock()
            .await
            .get(&(table.to_string(), partition_key.to_string()))
            .and_then(|p| p.get(row_key))
            .cloned())
    }

    async fn upsert(&self, table: &str, partition_key: &str, row_key: &str, entity: serde_json::Value) -> Result<(), StoreError> {
        self.partitions
            .lock()
            .await
            .entry((table.to_string(), partition_key.to_string()))
            .or_default()
            .insert(row_key.to_string(), entity);
        Ok(())
    }

    async fn query_partition(&self, table: &str, partition_key: &str) -> Result<Vec<(String, serde_json::Value)>, StoreError> {
        Ok(self
            .partitions
            .lock()
            .await
            .get(&(table.to_string(), partition_key.to_string()))
            .map(|p| p.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}
