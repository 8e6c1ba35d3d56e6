// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use crate::errors::StoreError;

/// Entities are JSON objects addressed by table, partition key and row key.
#[async_trait::async_trait]
pub trait TableStore: Send + Sync {
    async fn retrieve(&self, table: &str, partition_key: &str, row_key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    async fn upsert(&self, table: &str, partition_key: &str, row_key: &str, entity: serde_json::Value) -> Result<(), StoreError>;

    /// All entities of a partition, sorted by row key.
    async fn query_partition(&self, table: &str, partition_key: &str) -> Result<Vec<(String, serde_json::Value)>, StoreError>;
}
