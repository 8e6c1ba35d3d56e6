// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use super::*;
use crate::dispatch::invocation::parent_id_of;
use crate::function_registry::JobFunction;
use crate::listeners::LogErrorSink;
use jobhost_api::errors::StoreError;
use jobhost_api::execution_log::ExecutionLogSink;
use jobhost_api::function_descriptor::{BindingAttribute, FunctionDescriptor, ParameterDescriptor};
use jobhost_api::invoke::{BlobPath, ConnectionContext, MessageSource, RuntimeBindingInputs, TriggerPayload, TriggerReason};
use jobhost_api::queue::{MessageReceipt, QueueStore, ReceivedMessage};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Forward {}

#[async_trait::async_trait]
impl JobFunction for Forward {
    async fn run(&self, context: &mut InvocationContext) -> anyhow::Result<()> {
        let content = context.bytes("order")?.to_vec();
        context.send_message("result", content)
    }
}

struct Fail {}

#[async_trait::async_trait]
impl JobFunction for Fail {
    async fn run(&self, _context: &mut InvocationContext) -> anyhow::Result<()> {
        anyhow::bail!("always failing")
    }
}

struct Summary {}

#[async_trait::async_trait]
impl JobFunction for Summary {
    async fn run(&self, context: &mut InvocationContext) -> anyhow::Result<()> {
        let text = context.text("data")?.to_string();
        context.send_message("result", text.into_bytes())
    }
}

fn location(method: &str) -> FunctionLocation {
    FunctionLocation::new("app", "Orders", method)
}

fn registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    registry.register(
        FunctionDescriptor::new(location("Forward"))
            .with_parameter(ParameterDescriptor::new(
                "order",
                BindingAttribute::QueueTrigger {
                    queue_name: "orders".to_string(),
                    payload_tokens: vec![],
                },
            ))
            .with_parameter(ParameterDescriptor::new(
                "result",
                BindingAttribute::QueueOutput {
                    queue_name: "results".to_string(),
                },
            )),
        std::sync::Arc::new(Forward {}),
    );
    registry.register(
        FunctionDescriptor::new(location("Fail")).with_parameter(ParameterDescriptor::new(
            "order",
            BindingAttribute::QueueTrigger {
                queue_name: "failing".to_string(),
                payload_tokens: vec![],
            },
        )),
        std::sync::Arc::new(Fail {}),
    );
    registry.register(
        FunctionDescriptor::new(location("Summary"))
            .with_parameter(ParameterDescriptor::new(
                "order",
                BindingAttribute::QueueTrigger {
                    queue_name: "summaries".to_string(),
                    payload_tokens: vec!["id".to_string()],
                },
            ))
            .with_parameter(ParameterDescriptor::new(
                "data",
                BindingAttribute::BlobInput {
                    path: "data/{id}.txt".to_string(),
                },
            ))
            .with_parameter(ParameterDescriptor::new(
                "result",
                BindingAttribute::QueueOutput {
                    queue_name: "results".to_string(),
                },
            )),
        std::sync::Arc::new(Summary {}),
    );
    registry
}

struct Setup {
    stores: HostStores,
    queues: jobhost_store::memory::MemoryQueueStore,
    log: jobhost_store::memory::MemoryExecutionLog,
    binder: jobhost_binding::RuntimeBinder,
    consumer: QueueConsumer,
}

async fn setup(policy: RedeliveryPolicy) -> Setup {
    init_logger();
    let queues = jobhost_store::memory::MemoryQueueStore::new();
    let log = jobhost_store::memory::MemoryExecutionLog::new();
    let mut stores = HostStores::in_memory();
    stores.queue = std::sync::Arc::new(queues.clone());
    stores.execution_log = std::sync::Arc::new(log.clone());

    let registry = registry();
    let bindings = std::sync::Arc::new(jobhost_binding::BindingRegistry::new());
    let results = jobhost_binding::FunctionIndexer::new(bindings.clone())
        .index_into(&registry.descriptors(), stores.function_table.as_ref())
        .await
        .unwrap();
    assert!(results.errors.is_empty(), "{:?}", results.errors);

    let executor = Executor::new(stores.clone(), std::sync::Arc::new(registry), "instance-1");
    let consumer = QueueConsumer::new(
        executor,
        DispatchQueue::for_host(stores.queue.clone(), "test"),
        std::time::Duration::from_secs(60),
        policy,
        RandomizedExponentialBackoff::new(std::time::Duration::from_millis(10), std::time::Duration::from_millis(100)),
        std::sync::Arc::new(LogErrorSink {}),
    );
    Setup {
        stores,
        queues,
        log,
        binder: jobhost_binding::RuntimeBinder::new(bindings),
        consumer,
    }
}

impl Setup {
    async fn request(&self, method: &str, queue: &str, content: &str) -> FunctionInvokeRequest {
        let definition = self.stores.function_table.lookup(&location(method).to_string()).await.unwrap().unwrap();
        let inputs = RuntimeBindingInputs::from_trigger(
            TriggerPayload::Message {
                source: MessageSource::Queue,
                entity: queue.to_string(),
                message_id: uuid::Uuid::new_v4().to_string(),
                content: content.as_bytes().to_vec(),
                dequeue_count: 1,
            },
            &ConnectionContext::default(),
        );
        let arguments = self.binder.resolve(&definition, &inputs).unwrap();
        FunctionInvokeRequest::new(definition.location, arguments, TriggerReason::manual())
    }

    async fn enqueue(&self, request: &FunctionInvokeRequest) {
        DispatchQueue::for_host(self.stores.queue.clone(), "test").enqueue(request).await.unwrap();
    }

    async fn drain(&self) -> Vec<ConsumerOutcome> {
        let mut outcomes = vec![];
        while let Some(outcome) = self.consumer.process_next().await.unwrap() {
            outcomes.push(outcome);
        }
        outcomes
    }
}

#[tokio::test]
async fn test_every_request_logged_once() {
    let setup = setup(RedeliveryPolicy::default()).await;
    let mut ids = std::collections::BTreeSet::new();
    for i in 0..5 {
        let request = setup.request("Forward", "orders", &format!("{{\"n\":{}}}", i)).await;
        ids.insert(request.id);
        setup.enqueue(&request).await;
    }

    let outcomes = setup.drain().await;
    assert_eq!(5, outcomes.len());
    assert!(outcomes.iter().all(|o| matches!(
        o,
        ConsumerOutcome::Executed {
            disposition: MessageDisposition::Deleted,
            ..
        }
    )));

    let entries = setup.log.entries().await;
    assert_eq!(5, entries.len());
    assert!(entries.iter().all(|e| e.succeeded() && e.host_instance == "instance-1"));
    assert_eq!(ids, entries.iter().map(|e| e.id).collect());
    assert_eq!(0, setup.queues.len("jobhost-test").await);

    // outputs carry the id of the invocation that wrote them
    let results = setup.queues.contents("results").await;
    assert_eq!(5, results.len());
    for content in results {
        assert!(ids.contains(&parent_id_of(&content).unwrap()));
    }
}

#[tokio::test]
async fn test_function_not_found_is_dropped() {
    let setup = setup(RedeliveryPolicy::default()).await;
    let mut request = setup.request("Forward", "orders", "{}").await;
    request.location = location("Removed");
    setup.enqueue(&request).await;

    assert_eq!(vec![ConsumerOutcome::FunctionNotFound(location("Removed"))], setup.drain().await);
    assert!(setup.log.entries().await.is_empty());
    assert_eq!(0, setup.queues.len("jobhost-test").await);
}

#[tokio::test]
async fn test_failures_released_then_poisoned() {
    let setup = setup(RedeliveryPolicy {
        max_dequeue_count: 3,
        retry_delay: std::time::Duration::ZERO,
    })
    .await;
    let request = setup.request("Fail", "failing", "{}").await;
    setup.enqueue(&request).await;

    let outcomes = setup.drain().await;
    let dispositions: Vec<_> = outcomes
        .iter()
        .map(|o| match o {
            ConsumerOutcome::Executed { disposition, .. } => *disposition,
            other => panic!("unexpected outcome {:?}", other),
        })
        .collect();
    assert_eq!(
        vec![MessageDisposition::Released, MessageDisposition::Released, MessageDisposition::Poisoned],
        dispositions
    );

    let entries = setup.log.entries_for(&request.id).await.unwrap();
    assert_eq!(vec![1, 2, 3], entries.iter().map(|e| e.dequeue_count).collect::<Vec<_>>());
    assert!(entries.iter().all(|e| !e.succeeded()));
    assert!(entries[0].error.as_ref().unwrap().contains("always failing"));
    assert_eq!(1, setup.queues.len("jobhost-test-poison").await);
}

#[tokio::test]
async fn test_undecodable_message_poisoned() {
    let setup = setup(RedeliveryPolicy::default()).await;
    setup.stores.queue.create_if_not_exists("jobhost-test").await.unwrap();
    setup.stores.queue.add_message("jobhost-test", b"not a request".to_vec()).await.unwrap();

    assert_eq!(vec![ConsumerOutcome::Undecodable], setup.drain().await);
    assert_eq!(vec![b"not a request".to_vec()], setup.queues.contents("jobhost-test-poison").await);
    assert!(setup.log.entries().await.is_empty());
}

#[tokio::test]
async fn test_missing_blob_input_not_retried() {
    let setup = setup(RedeliveryPolicy::default()).await;
    let request = setup.request("Summary", "summaries", r#"{"id":"42"}"#).await;
    assert_eq!(
        Some(&jobhost_api::invoke::BoundValue::Blob {
            connection: "default".to_string(),
            path: BlobPath::new("data", "42.txt"),
            access: jobhost_api::binding::BlobAccess::Read,
        }),
        request.argument("data")
    );
    setup.enqueue(&request).await;

    let outcomes = setup.drain().await;
    assert_eq!(1, outcomes.len());
    let ConsumerOutcome::Executed { entry, disposition } = &outcomes[0] else {
        panic!("unexpected outcome {:?}", outcomes[0]);
    };
    assert_eq!(MessageDisposition::Deleted, *disposition);
    assert!(!entry.succeeded());
    assert!(entry.error.as_ref().unwrap().contains("data/42.txt"));
    assert_eq!(0, setup.queues.len("results").await);
}

#[tokio::test]
async fn test_blob_input_read() {
    let setup = setup(RedeliveryPolicy::default()).await;
    jobhost_api::blob::write_blob_or_create(
        setup.stores.blob.as_ref(),
        &BlobPath::new("data", "7.txt"),
        b"seven".to_vec(),
        Default::default(),
    )
    .await
    .unwrap();
    let request = setup.request("Summary", "summaries", r#"{"id":"7"}"#).await;
    setup.enqueue(&request).await;
    setup.drain().await;
    assert_eq!(vec![b"seven".to_vec()], setup.queues.contents("results").await);
}

#[tokio::test]
async fn test_dedup_by_id() {
    let mut setup = setup(RedeliveryPolicy::default()).await;
    setup.consumer = setup.consumer.with_dedup_by_id(true);
    let request = setup.request("Forward", "orders", "{}").await;
    setup.enqueue(&request).await;
    setup.enqueue(&request).await;

    let outcomes = setup.drain().await;
    assert_eq!(2, outcomes.len());
    assert_eq!(ConsumerOutcome::Duplicate(request.id), outcomes[1]);
    assert_eq!(1, setup.log.entries().await.len());
    assert_eq!(1, setup.queues.len("results").await);
}

/// Queue store whose receives time out while `unreachable` is set.
struct FlakyQueues {
    inner: jobhost_store::memory::MemoryQueueStore,
    unreachable: std::sync::atomic::AtomicBool,
}

#[async_trait::async_trait]
impl QueueStore for FlakyQueues {
    async fn create_if_not_exists(&self, queue: &str) -> Result<(), StoreError> {
        self.inner.create_if_not_exists(queue).await
    }

    async fn add_message(&self, queue: &str, content: Vec<u8>) -> Result<(), StoreError> {
        self.inner.add_message(queue, content).await
    }

    async fn receive_message(&self, queue: &str, lease: std::time::Duration) -> Result<Option<ReceivedMessage>, StoreError> {
        if self.unreachable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Timeout);
        }
        self.inner.receive_message(queue, lease).await
    }

    async fn delete_message(&self, queue: &str, receipt: &MessageReceipt) -> Result<(), StoreError> {
        self.inner.delete_message(queue, receipt).await
    }

    async fn release_message(&self, queue: &str, receipt: &MessageReceipt, delay: std::time::Duration) -> Result<(), StoreError> {
        self.inner.release_message(queue, receipt, delay).await
    }
}

#[derive(Default)]
struct RecordingErrorSink {
    reports: std::sync::Mutex<Vec<String>>,
}

impl HostErrorSink for RecordingErrorSink {
    fn report(&self, source: &str, error: &anyhow::Error) {
        self.reports.lock().unwrap().push(format!("{}: {:#}", source, error));
    }
}

#[tokio::test]
async fn test_receive_errors_reported_and_backed_off() {
    let setup = setup(RedeliveryPolicy::default()).await;
    let store = std::sync::Arc::new(FlakyQueues {
        inner: setup.queues.clone(),
        unreachable: std::sync::atomic::AtomicBool::new(true),
    });
    let sink = std::sync::Arc::new(RecordingErrorSink::default());
    let mut consumer = QueueConsumer::new(
        Executor::new(setup.stores.clone(), std::sync::Arc::new(registry()), "instance-2"),
        DispatchQueue::for_host(store.clone(), "test"),
        std::time::Duration::from_secs(60),
        RedeliveryPolicy::default(),
        RandomizedExponentialBackoff::new(std::time::Duration::from_millis(10), std::time::Duration::from_secs(1)),
        sink.clone(),
    );

    let mut intervals = vec![consumer.separation_interval()];
    for _ in 0..3 {
        consumer.execute().await;
        intervals.push(consumer.separation_interval());
    }
    assert!(intervals.windows(2).all(|w| w[0] < w[1]), "{:?}", intervals);
    let reports = sink.reports.lock().unwrap().clone();
    assert_eq!(3, reports.len());
    assert!(reports.iter().all(|r| r == "jobhost-test: operation timed out"), "{:?}", reports);

    // reachable again: the request runs and the interval drops back
    let request = setup.request("Forward", "orders", "hello").await;
    setup.enqueue(&request).await;
    store.unreachable.store(false, std::sync::atomic::Ordering::SeqCst);
    consumer.execute().await;
    assert_eq!(1, setup.queues.len("results").await);
    assert!(consumer.separation_interval() < std::time::Duration::from_millis(25));
    assert_eq!(3, sink.reports.lock().unwrap().len());
}
