// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::binding::FunctionDefinition;
use jobhost_api::blob::BlobProperties;
use jobhost_api::errors::FunctionNotFoundError;
use jobhost_api::execution_log::{ExecutionLogEntry, ExecutionStatus};
use jobhost_api::function_location::FunctionLocation;
use jobhost_api::invoke::FunctionInvokeRequest;
use jobhost_api::queue::receive_message_or_create;

use super::invocation::{InvocationContext, InvocationError};
use super::redelivery::{poison, MessageDisposition, RedeliveryPolicy};
use super::DispatchQueue;
use crate::backoff::{IntervalSeparationCommand, RandomizedExponentialBackoff};
use crate::function_registry::FunctionRegistry;
use crate::listeners::HostErrorSink;
use crate::stores::HostStores;

/// Upper bound of the messages processed between two waits.
const MAX_MESSAGES_PER_POLL: usize = 32;

/// Runs function bodies and records every attempt in the execution log.
#[derive(Clone)]
pub struct Executor {
    stores: HostStores,
    functions: std::sync::Arc<FunctionRegistry>,
    host_instance: String,
    blob_written: Option<futures::channel::mpsc::UnboundedSender<BlobProperties>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    pub entry: ExecutionLogEntry,
    /// Whether running the same request again may succeed.
    pub retryable: bool,
}

impl Executor {
    pub fn new(stores: HostStores, functions: std::sync::Arc<FunctionRegistry>, host_instance: &str) -> Self {
        Self {
            stores,
            functions,
            host_instance: host_instance.to_string(),
            blob_written: None,
        }
    }

    /// Report every blob written by a function on the given channel.
    pub fn with_blob_notifications(mut self, sender: futures::channel::mpsc::UnboundedSender<BlobProperties>) -> Self {
        self.blob_written = Some(sender);
        self
    }

    pub async fn execute(&self, definition: &FunctionDefinition, request: &FunctionInvokeRequest, dequeue_count: u32) -> InvocationResult {
        let started_utc = chrono::Utc::now();
        let result = self.run(definition, request).await;
        let ended_utc = chrono::Utc::now();

        let (status, error, retryable) = match &result {
            Ok(()) => (ExecutionStatus::Success, None, false),
            Err(err) => (ExecutionStatus::Failure, Some(err.to_string()), err.is_retryable()),
        };
        let entry = ExecutionLogEntry {
            id: request.id,
            location: request.location.clone(),
            trigger_reason: request.trigger_reason.clone(),
            host_instance: self.host_instance.clone(),
            started_utc,
            ended_utc,
            status,
            error,
            dequeue_count,
        };
        match result {
            Ok(()) => log::info!("{}", entry),
            Err(_) => log::warn!("{}", entry),
        }
        if let Err(err) = self.stores.execution_log.append(entry.clone()).await {
            log::error!("could not record the execution of {}: {}", entry.id, err);
        }
        InvocationResult { entry, retryable }
    }

    async fn run(&self, definition: &FunctionDefinition, request: &FunctionInvokeRequest) -> Result<(), InvocationError> {
        let body = self
            .functions
            .body(&definition.location)
            .ok_or_else(|| InvocationError::NoBody(definition.location.clone()))?;
        let mut context = InvocationContext::open(definition, request, &self.stores).await?;
        body.run(&mut context).await.map_err(InvocationError::Function)?;
        for properties in context.flush(&self.stores).await? {
            if let Some(sender) = &self.blob_written {
                // Nobody listens if there are no blob triggers.
                let _ = sender.unbounded_send(properties);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerOutcome {
    Executed {
        entry: ExecutionLogEntry,
        disposition: MessageDisposition,
    },
    /// A request with this id already succeeded.
    Duplicate(uuid::Uuid),
    FunctionNotFound(FunctionLocation),
    /// The message is not a request, it went to the poison queue.
    Undecodable,
}

/// Competing consumer of a dispatch queue.
pub struct QueueConsumer {
    executor: Executor,
    queue: DispatchQueue,
    lease: std::time::Duration,
    policy: RedeliveryPolicy,
    dedup_by_id: bool,
    backoff: RandomizedExponentialBackoff,
    error_sink: std::sync::Arc<dyn HostErrorSink>,
}

impl QueueConsumer {
    pub fn new(
        executor: Executor,
        queue: DispatchQueue,
        lease: std::time::Duration,
        policy: RedeliveryPolicy,
        backoff: RandomizedExponentialBackoff,
        error_sink: std::sync::Arc<dyn HostErrorSink>,
    ) -> Self {
        Self {
            executor,
            queue,
            lease,
            policy,
            dedup_by_id: false,
            backoff,
            error_sink,
        }
    }

    /// Skip requests whose id already has a successful execution.
    pub fn with_dedup_by_id(mut self, dedup_by_id: bool) -> Self {
        self.dedup_by_id = dedup_by_id;
        self
    }

    /// Receive and process at most one message.
    pub async fn process_next(&self) -> anyhow::Result<Option<ConsumerOutcome>> {
        let store = self.queue.store();
        let queue_name = self.queue.queue_name();
        let Some(message) = receive_message_or_create(store.as_ref(), queue_name, self.lease).await? else {
            return Ok(None);
        };

        let request = match FunctionInvokeRequest::from_payload(&message.content) {
            Ok(request) => request,
            Err(err) => {
                log::error!("undecodable message {} on {}: {}", message.message_id, queue_name, err);
                poison(store.as_ref(), queue_name, &self.queue.poison_queue_name(), &message).await?;
                return Ok(Some(ConsumerOutcome::Undecodable));
            }
        };

        if self.dedup_by_id {
            let previous = self.executor.stores.execution_log.entries_for(&request.id).await?;
            if previous.iter().any(|e| e.succeeded()) {
                log::info!("request {} already executed, dropping it", request.id);
                store.delete_message(queue_name, &message.receipt).await?;
                return Ok(Some(ConsumerOutcome::Duplicate(request.id)));
            }
        }

        let Some(definition) = self.executor.stores.function_table.lookup(&request.location.to_string()).await? else {
            log::warn!("{}, dropping request {}", FunctionNotFoundError(request.location.clone()), request.id);
            store.delete_message(queue_name, &message.receipt).await?;
            return Ok(Some(ConsumerOutcome::FunctionNotFound(request.location)));
        };

        let result = self.executor.execute(&definition, &request, message.dequeue_count).await;
        let disposition = match result.entry.succeeded() || !result.retryable {
            true => {
                store.delete_message(queue_name, &message.receipt).await?;
                MessageDisposition::Deleted
            }
            false => {
                self.policy
                    .settle_failed(store.as_ref(), queue_name, &self.queue.poison_queue_name(), &message)
                    .await?
            }
        };
        Ok(Some(ConsumerOutcome::Executed {
            entry: result.entry,
            disposition,
        }))
    }

    pub async fn run(self, cancel: tokio_util::sync::CancellationToken) {
        log::info!("consuming requests from {}", self.queue.queue_name());
        crate::backoff::run_interval_separated(self, cancel).await;
    }
}

#[async_trait::async_trait]
impl IntervalSeparationCommand for QueueConsumer {
    fn separation_interval(&self) -> std::time::Duration {
        self.backoff.current()
    }

    async fn execute(&mut self) {
        for _ in 0..MAX_MESSAGES_PER_POLL {
            match self.process_next().await {
                Ok(Some(_)) => {
                    self.backoff.on_work_found();
                }
                Ok(None) => {
                    self.backoff.on_no_work();
                    break;
                }
                Err(err) => {
                    self.error_sink.report(self.queue.queue_name(), &err);
                    self.backoff.on_no_work();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
pub mod test;
