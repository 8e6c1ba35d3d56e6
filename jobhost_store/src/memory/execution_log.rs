// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::errors::StoreError;
use jobhost_api::execution_log::{ExecutionLogEntry, ExecutionLogSink};

#[derive(Clone, Default)]
pub struct MemoryExecutionLog {
    entries: std::sync::Arc<tokio::sync::Mutex<Vec<ExecutionLogEntry>>>,
}

impl MemoryExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All the entries, in append order.
    pub async fn entries(&self) -> Vec<ExecutionLogEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl ExecutionLogSink for MemoryExecutionLog {
    async fn append(&self, entry: ExecutionLogEntry) -> Result<(), StoreError> {
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn entries_for(&self, id: &uuid::Uuid) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        Ok(self.entries.lock().await.iter().filter(|e| e.id == *id).cloned().collect())
    }
}
