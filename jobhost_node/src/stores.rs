// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::blob::BlobStore;
use jobhost_api::execution_log::ExecutionLogSink;
use jobhost_api::function_table::FunctionTableStore;
use jobhost_api::queue::QueueStore;
use jobhost_api::running_host::HostLivenessStore;
use jobhost_api::table::TableStore;

use crate::{StorageBackend, StorageSettings};

/// Handles to all the stores a host works with.
#[derive(Clone)]
pub struct HostStores {
    pub blob: std::sync::Arc<dyn BlobStore>,
    pub queue: std::sync::Arc<dyn QueueStore>,
    pub table: std::sync::Arc<dyn TableStore>,
    pub service_bus: Option<std::sync::Arc<dyn QueueStore>>,
    pub function_table: std::sync::Arc<dyn FunctionTableStore>,
    pub execution_log: std::sync::Arc<dyn ExecutionLogSink>,
    pub liveness: std::sync::Arc<dyn HostLivenessStore>,
}

impl HostStores {
    /// Stores private to this process, without a service bus.
    pub fn in_memory() -> Self {
        Self {
            blob: std::sync::Arc::new(jobhost_store::memory::MemoryBlobStore::new()),
            queue: std::sync::Arc::new(jobhost_store::memory::MemoryQueueStore::new()),
            table: std::sync::Arc::new(jobhost_store::memory::MemoryTableStore::new()),
            service_bus: None,
            function_table: std::sync::Arc::new(jobhost_store::memory::MemoryFunctionTable::new()),
            execution_log: std::sync::Arc::new(jobhost_store::memory::MemoryExecutionLog::new()),
            liveness: std::sync::Arc::new(jobhost_store::memory::MemoryHostLivenessStore::new()),
        }
    }

    pub fn from_settings(settings: &StorageSettings, blob_page_size: usize) -> anyhow::Result<Self> {
        let mut stores = match settings.backend {
            StorageBackend::Memory => {
                let mut stores = Self::in_memory();
                stores.blob = std::sync::Arc::new(jobhost_store::memory::MemoryBlobStore::new().with_page_size(blob_page_size));
                stores
            }
            StorageBackend::Redis => {
                let redis = jobhost_store::redis_store::RedisStore::new(&settings.redis_url, &settings.redis_prefix)?;
                Self {
                    blob: std::sync::Arc::new(jobhost_store::memory::MemoryBlobStore::new().with_page_size(blob_page_size)),
                    queue: std::sync::Arc::new(redis.clone()),
                    table: std::sync::Arc::new(redis.clone()),
                    service_bus: None,
                    function_table: std::sync::Arc::new(redis.clone()),
                    execution_log: std::sync::Arc::new(redis.clone()),
                    liveness: std::sync::Arc::new(redis),
                }
            }
        };
        if !settings.blob_root.is_empty() {
            stores.blob = std::sync::Arc::new(jobhost_store::file_blob::FileBlobStore::new(&settings.blob_root, blob_page_size)?);
        }
        stores.service_bus = match settings.service_bus_url.as_str() {
            "" => None,
            "memory" => Some(std::sync::Arc::new(jobhost_store::memory::MemoryQueueStore::new())),
            url => Some(std::sync::Arc::new(jobhost_store::redis_store::RedisStore::new(
                url,
                &format!("{}servicebus:", settings.redis_prefix),
            )?)),
        };
        Ok(stores)
    }
}
