// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

//! Functions every host can run without user code. Their descriptors come
//! from the manifest, which gives them their bindings:
//! - `builtin::Blob::Copy` copies parameter `input` to parameter `output`
//! - `builtin::Queue::Log` logs the content of parameter `message`

use jobhost_api::function_location::FunctionLocation;

use crate::dispatch::invocation::InvocationContext;
use crate::function_registry::{FunctionRegistry, JobFunction};

pub struct BlobCopy {}

#[async_trait::async_trait]
impl JobFunction for BlobCopy {
    async fn run(&self, context: &mut InvocationContext) -> anyhow::Result<()> {
        let data = context.bytes("input")?.to_vec();
        log::info!("copying {} bytes to {}", data.len(), context.blob_path("output")?);
        context.write_blob("output", data)
    }
}

pub struct QueueLog {}

#[async_trait::async_trait]
impl JobFunction for QueueLog {
    async fn run(&self, context: &mut InvocationContext) -> anyhow::Result<()> {
        let (entity, message_id, dequeue_count) = context.message_info("message")?;
        log::info!(
            "message {} from {} (attempt {}): {}",
            message_id,
            entity,
            dequeue_count,
            String::from_utf8_lossy(context.bytes("message")?)
        );
        Ok(())
    }
}

pub fn register_builtins(registry: &mut FunctionRegistry) {
    registry.register_body(FunctionLocation::new("builtin", "Blob", "Copy"), std::sync::Arc::new(BlobCopy {}));
    registry.register_body(FunctionLocation::new("builtin", "Queue", "Log"), std::sync::Arc::new(QueueLog {}));
}
