// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::errors::StoreError;
use jobhost_api::running_host::{HostLivenessStore, RunningHost};

#[derive(Clone, Default)]
pub struct MemoryHostLivenessStore {
    records: std::sync::Arc<tokio::sync::Mutex<std::collections::BTreeMap<String, RunningHost>>>,
}

impl MemoryHostLivenessStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl HostLivenessStore for MemoryHostLivenessStore {
    async fn upsert(&self, record: RunningHost) -> Result<(), StoreError> {
        self.records.lock().await.insert(record.host_identity.clone(), record);
        Ok(())
    }

    async fn read(&self, host_identity: &str) -> Result<Option<RunningHost>, StoreError> {
        Ok(self.records.lock().await.get(host_identity).cloned())
    }

    async fn read_all(&self) -> Result<Vec<RunningHost>, StoreError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }
}
