// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::binding::FunctionDefinition;
use jobhost_api::errors::StoreError;
use jobhost_api::function_table::FunctionTableStore;

#[derive(Clone, Default)]
pub struct MemoryFunctionTable {
    definitions: std::sync::Arc<tokio::sync::RwLock<std::collections::BTreeMap<String, FunctionDefinition>>>,
}

impl MemoryFunctionTable {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl FunctionTableStore for MemoryFunctionTable {
    async fn lookup(&self, function_id: &str) -> Result<Option<FunctionDefinition>, StoreError> {
        Ok(self.definitions.read().await.get(function_id).cloned())
    }

    async fn read_all(&self) -> Result<Vec<FunctionDefinition>, StoreError> {
        Ok(self.definitions.read().await.values().cloned().collect())
    }

    async fn add(&self, definition: FunctionDefinition) -> Result<(), StoreError> {
        self.definitions.write().await.insert(definition.id(), definition);
        Ok(())
    }

    async fn delete(&self, definition: &FunctionDefinition) -> Result<(), StoreError> {
        self.definitions.write().await.remove(&definition.id());
        Ok(())
    }
}
