// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

pub mod executor;
pub mod invocation;
pub mod redelivery;

use jobhost_api::binding::FunctionDefinition;
use jobhost_api::errors::{BindError, FunctionNotFoundError};
use jobhost_api::execution_log::{ExecutionLogEntry, ExecutionStatus};
use jobhost_api::function_location::FunctionLocation;
use jobhost_api::invoke::{ConnectionContext, FunctionInvokeRequest, MessageSource, RuntimeBindingInputs, TriggerPayload, TriggerReason};
use jobhost_api::path_template::TokenValues;
use jobhost_api::queue::{add_message_or_create, QueueStore};
use jobhost_binding::RuntimeBinder;

use crate::stores::HostStores;
use executor::Executor;

/// Queue carrying the requests of one host, shared by all its instances.
#[derive(Clone)]
pub struct DispatchQueue {
    store: std::sync::Arc<dyn QueueStore>,
    queue_name: String,
}

impl DispatchQueue {
    pub fn new(store: std::sync::Arc<dyn QueueStore>, queue_name: &str) -> Self {
        Self {
            store,
            queue_name: queue_name.to_string(),
        }
    }

    pub fn for_host(store: std::sync::Arc<dyn QueueStore>, host_id: &str) -> Self {
        Self::new(store, &dispatch_queue_name(host_id))
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn poison_queue_name(&self) -> String {
        redelivery::poison_queue_name(MessageSource::Queue, &self.queue_name)
    }

    pub(crate) fn store(&self) -> &std::sync::Arc<dyn QueueStore> {
        &self.store
    }

    pub async fn enqueue(&self, request: &FunctionInvokeRequest) -> anyhow::Result<()> {
        add_message_or_create(self.store.as_ref(), &self.queue_name, request.to_payload()?).await?;
        log::debug!("request {} for {} enqueued on {}", request.id, request.location, self.queue_name);
        Ok(())
    }
}

pub fn dispatch_queue_name(host_id: &str) -> String {
    format!("jobhost-{}", host_id)
}

/// Where bound requests go.
#[derive(Clone)]
pub enum DispatchTarget {
    /// Enqueue for any instance of the host.
    Queue(DispatchQueue),
    /// Execute immediately in the caller.
    Local(Executor),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Enqueued(uuid::Uuid),
    Executed { entry: ExecutionLogEntry, retryable: bool },
    BindFailed(BindError),
    EnqueueFailed(String),
}

impl DispatchOutcome {
    /// Whether the event that caused the dispatch should be delivered again.
    pub fn should_retry(&self) -> bool {
        match self {
            DispatchOutcome::Enqueued(_) | DispatchOutcome::BindFailed(_) => false,
            DispatchOutcome::Executed { entry, retryable } => !entry.succeeded() && *retryable,
            DispatchOutcome::EnqueueFailed(_) => true,
        }
    }
}

/// Binds functions to trigger events or explicit arguments and hands the
/// resulting requests to the target.
#[derive(Clone)]
pub struct Dispatcher {
    binder: RuntimeBinder,
    connection: ConnectionContext,
    stores: HostStores,
    target: DispatchTarget,
    host_instance: String,
}

impl Dispatcher {
    pub fn new(binder: RuntimeBinder, connection: ConnectionContext, stores: HostStores, target: DispatchTarget, host_instance: &str) -> Self {
        Self {
            binder,
            connection,
            stores,
            target,
            host_instance: host_instance.to_string(),
        }
    }

    pub async fn dispatch(&self, definition: &FunctionDefinition, inputs: &RuntimeBindingInputs, reason: TriggerReason) -> DispatchOutcome {
        let arguments = match self.binder.resolve(definition, inputs) {
            Ok(arguments) => arguments,
            Err(err) => {
                self.record_bind_failure(definition, reason, &err).await;
                return DispatchOutcome::BindFailed(err);
            }
        };
        let request = FunctionInvokeRequest::new(definition.location.clone(), arguments, reason);
        match &self.target {
            DispatchTarget::Queue(queue) => match queue.enqueue(&request).await {
                Ok(()) => DispatchOutcome::Enqueued(request.id),
                Err(err) => {
                    log::error!("could not enqueue request {} for {}: {}", request.id, request.location, err);
                    DispatchOutcome::EnqueueFailed(err.to_string())
                }
            },
            DispatchTarget::Local(executor) => {
                let result = executor.execute(definition, &request, 1).await;
                DispatchOutcome::Executed {
                    entry: result.entry,
                    retryable: result.retryable,
                }
            }
        }
    }

    pub async fn dispatch_trigger(&self, definition: &FunctionDefinition, payload: TriggerPayload, reason: TriggerReason) -> DispatchOutcome {
        let inputs = RuntimeBindingInputs::from_trigger(payload, &self.connection);
        self.dispatch(definition, &inputs, reason).await
    }

    /// Invoke a function by location with explicit arguments, by parameter
    /// or token name.
    pub async fn invoke(&self, location: &FunctionLocation, arguments: TokenValues) -> anyhow::Result<DispatchOutcome> {
        let definition = self
            .stores
            .function_table
            .lookup(&location.to_string())
            .await?
            .ok_or_else(|| FunctionNotFoundError(location.clone()))?;
        let inputs = RuntimeBindingInputs::from_arguments(arguments, &self.connection);
        Ok(self.dispatch(&definition, &inputs, TriggerReason::manual()).await)
    }

    async fn record_bind_failure(&self, definition: &FunctionDefinition, reason: TriggerReason, err: &BindError) {
        let id = uuid::Uuid::new_v4();
        let now = chrono::Utc::now();
        let entry = ExecutionLogEntry {
            id,
            location: definition.location.clone(),
            trigger_reason: TriggerReason {
                child_guid: Some(id),
                ..reason
            },
            host_instance: self.host_instance.clone(),
            started_utc: now,
            ended_utc: now,
            status: ExecutionStatus::Failure,
            error: Some(err.to_string()),
            dequeue_count: 0,
        };
        log::warn!("{}", entry);
        if let Err(err) = self.stores.execution_log.append(entry).await {
            log::error!("could not record the bind failure of {}: {}", definition.location, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function_registry::{FunctionRegistry, JobFunction};
    use jobhost_api::function_descriptor::{BindingAttribute, FunctionDescriptor, ParameterDescriptor};
    use jobhost_api::invoke::BlobPath;

    struct Upper {}

    #[async_trait::async_trait]
    impl JobFunction for Upper {
        async fn run(&self, context: &mut crate::dispatch::invocation::InvocationContext) -> anyhow::Result<()> {
            let text = context.text("input")?.to_uppercase();
            context.write_blob("output", text.into_bytes())
        }
    }

    fn upper_descriptor() -> FunctionDescriptor {
        FunctionDescriptor::new(FunctionLocation::new("app", "Text", "Upper"))
            .with_parameter(ParameterDescriptor::new(
                "input",
                BindingAttribute::BlobTrigger {
                    path: "input/{name}.txt".to_string(),
                },
            ))
            .with_parameter(ParameterDescriptor::new(
                "output",
                BindingAttribute::BlobOutput {
                    path: "output/{name}.txt".to_string(),
                },
            ))
    }

    async fn setup(local: bool) -> (Dispatcher, HostStores) {
        let stores = HostStores::in_memory();
        let mut registry = FunctionRegistry::new();
        registry.register(upper_descriptor(), std::sync::Arc::new(Upper {}));
        let bindings = std::sync::Arc::new(jobhost_binding::BindingRegistry::new());
        jobhost_binding::FunctionIndexer::new(bindings.clone())
            .index_into(&registry.descriptors(), stores.function_table.as_ref())
            .await
            .unwrap();
        let target = match local {
            true => DispatchTarget::Local(Executor::new(stores.clone(), std::sync::Arc::new(registry), "instance-1")),
            false => DispatchTarget::Queue(DispatchQueue::for_host(stores.queue.clone(), "test")),
        };
        let dispatcher = Dispatcher::new(
            RuntimeBinder::new(bindings),
            ConnectionContext::default(),
            stores.clone(),
            target,
            "instance-1",
        );
        (dispatcher, stores)
    }

    #[tokio::test]
    async fn test_invoke_unknown_function() {
        let (dispatcher, _) = setup(true).await;
        let err = dispatcher
            .invoke(&FunctionLocation::new("app", "Text", "Lower"), TokenValues::new())
            .await
            .unwrap_err();
        assert_eq!(
            Some(&FunctionNotFoundError(FunctionLocation::new("app", "Text", "Lower"))),
            err.downcast_ref::<FunctionNotFoundError>()
        );
    }

    #[tokio::test]
    async fn test_invoke_locally_by_trigger_value() {
        let (dispatcher, stores) = setup(true).await;
        stores.blob.create_container_if_not_exists("input").await.unwrap();
        stores
            .blob
            .open_write(&BlobPath::new("input", "hello.txt"), b"hello".to_vec(), Default::default())
            .await
            .unwrap();

        let arguments = TokenValues::from([("input".to_string(), "input/hello.txt".to_string())]);
        let outcome = dispatcher
            .invoke(&FunctionLocation::new("app", "Text", "Upper"), arguments)
            .await
            .unwrap();
        match outcome {
            DispatchOutcome::Executed { entry, .. } => {
                assert!(entry.succeeded(), "{}", entry);
                assert_eq!(jobhost_api::invoke::TriggerCause::Manual, entry.trigger_reason.cause);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let output = stores.blob.open_read(&BlobPath::new("output", "hello.txt")).await.unwrap();
        assert_eq!(b"HELLO".to_vec(), output.data);
    }

    #[tokio::test]
    async fn test_bind_failure_is_logged_not_retried() {
        let (dispatcher, stores) = setup(false).await;
        let arguments = TokenValues::from([("input".to_string(), "elsewhere/hello.txt".to_string())]);
        let outcome = dispatcher
            .invoke(&FunctionLocation::new("app", "Text", "Upper"), arguments)
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::BindFailed(BindError::TriggerMismatch { .. })));
        assert!(!outcome.should_retry());

        assert_eq!(
            Err(jobhost_api::errors::StoreError::QueueNotFound("jobhost-test".to_string())),
            stores.queue.receive_message("jobhost-test", std::time::Duration::from_secs(1)).await
        );
    }

    #[tokio::test]
    async fn test_enqueue_in_queue_mode() {
        let (dispatcher, stores) = setup(false).await;
        let definition = stores.function_table.lookup("app::Text::Upper").await.unwrap().unwrap();
        let outcome = dispatcher
            .dispatch_trigger(
                &definition,
                TriggerPayload::Blob {
                    path: BlobPath::new("input", "a.txt"),
                },
                TriggerReason::new(jobhost_api::invoke::TriggerCause::NewBlob {
                    blob_path: "input/a.txt".to_string(),
                }),
            )
            .await;
        let DispatchOutcome::Enqueued(id) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        let message = stores
            .queue
            .receive_message("jobhost-test", std::time::Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        let request = FunctionInvokeRequest::from_payload(&message.content).unwrap();
        assert_eq!(id, request.id);
        assert_eq!(
            Some(&jobhost_api::invoke::BoundValue::Blob {
                connection: "default".to_string(),
                path: BlobPath::new("output", "a.txt"),
                access: jobhost_api::binding::BlobAccess::Write,
            }),
            request.argument("output")
        );
    }
}
