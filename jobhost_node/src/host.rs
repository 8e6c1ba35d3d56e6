// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::binding::{BindingSpec, FunctionDefinition};
use jobhost_api::invoke::{ConnectionContext, MessageSource};
use jobhost_api::path_template::validate_queue_name;
use jobhost_binding::{BindingRegistry, FunctionIndexer, IndexResults, RuntimeBinder};

use crate::backoff::RandomizedExponentialBackoff;
use crate::dispatch::executor::{Executor, QueueConsumer};
use crate::dispatch::{dispatch_queue_name, DispatchQueue, DispatchTarget, Dispatcher};
use crate::function_registry::FunctionRegistry;
use crate::heartbeat::HostLivenessTracker;
use crate::listeners::blob::BlobPollSource;
use crate::listeners::message::MessagePollSource;
use crate::listeners::timer::TimerPollSource;
use crate::listeners::{HostErrorSink, LogErrorSink, PollSource, TriggerListener};
use crate::stores::HostStores;
use crate::{DispatchMode, JobHostSettings};

/// One instance of a job host: indexes its functions, then runs the
/// listeners, the dispatch queue consumer and the heartbeat.
pub struct JobHost {
    settings: JobHostSettings,
    stores: HostStores,
    functions: std::sync::Arc<FunctionRegistry>,
    bindings: std::sync::Arc<BindingRegistry>,
    error_sink: std::sync::Arc<dyn HostErrorSink>,
    instance_id: String,
}

impl JobHost {
    pub fn new(settings: JobHostSettings, stores: HostStores, functions: FunctionRegistry) -> Self {
        let instance_id = match settings.instance_id.is_empty() {
            true => format!("{}-{}", settings.host_id, uuid::Uuid::new_v4()),
            false => settings.instance_id.clone(),
        };
        Self {
            settings,
            stores,
            functions: std::sync::Arc::new(functions),
            bindings: std::sync::Arc::new(BindingRegistry::new()),
            error_sink: std::sync::Arc::new(LogErrorSink {}),
            instance_id,
        }
    }

    /// Use a registry with custom binding providers in addition to, or
    /// instead of, the built-in ones.
    pub fn with_binding_registry(mut self, bindings: BindingRegistry) -> Self {
        self.bindings = std::sync::Arc::new(bindings);
        self
    }

    pub fn with_error_sink(mut self, error_sink: std::sync::Arc<dyn HostErrorSink>) -> Self {
        self.error_sink = error_sink;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn stores(&self) -> &HostStores {
        &self.stores
    }

    pub fn connection(&self) -> ConnectionContext {
        ConnectionContext {
            storage: self.settings.storage.connection_name.clone(),
            service_bus: self.stores.service_bus.as_ref().map(|_| "service_bus".to_string()),
        }
    }

    pub fn liveness_tracker(&self) -> HostLivenessTracker {
        HostLivenessTracker::new(
            self.stores.liveness.clone(),
            &self.instance_id,
            std::time::Duration::from_secs(self.settings.heartbeat.signal_interval_secs),
        )
    }

    pub async fn index(&self) -> anyhow::Result<IndexResults> {
        FunctionIndexer::new(self.bindings.clone())
            .index_into(&self.functions.descriptors(), self.stores.function_table.as_ref())
            .await
    }

    pub fn executor(&self) -> Executor {
        Executor::new(self.stores.clone(), self.functions.clone(), &self.instance_id)
    }

    /// Dispatcher honoring the configured mode; `executor` is used in local mode.
    pub fn dispatcher(&self, executor: Executor) -> Dispatcher {
        let target = match self.settings.dispatch.mode {
            DispatchMode::Queue => DispatchTarget::Queue(self.dispatch_queue()),
            DispatchMode::Local => DispatchTarget::Local(executor),
        };
        Dispatcher::new(
            RuntimeBinder::new(self.bindings.clone()),
            self.connection(),
            self.stores.clone(),
            target,
            &self.instance_id,
        )
    }

    pub fn dispatch_queue(&self) -> DispatchQueue {
        DispatchQueue::for_host(self.stores.queue.clone(), &self.settings.host_id)
    }

    fn backoff(&self) -> RandomizedExponentialBackoff {
        RandomizedExponentialBackoff::new(
            std::time::Duration::from_millis(self.settings.polling.minimum_interval_ms),
            std::time::Duration::from_millis(self.settings.polling.maximum_interval_ms),
        )
    }

    /// Definitions this instance listens for: automatically triggered and
    /// with a body registered here.
    async fn listening_definitions(&self) -> anyhow::Result<Vec<std::sync::Arc<FunctionDefinition>>> {
        for location in self.functions.missing_bodies() {
            log::warn!("function {} has no body on this host", location);
        }
        Ok(self
            .stores
            .function_table
            .read_all()
            .await?
            .into_iter()
            .filter(|d| d.listens_automatically() && self.functions.has_body(&d.location))
            .map(std::sync::Arc::new)
            .collect())
    }

    fn poll_sources(
        &self,
        definitions: &[std::sync::Arc<FunctionDefinition>],
        blob_notifications: futures::channel::mpsc::UnboundedReceiver<jobhost_api::blob::BlobProperties>,
    ) -> Vec<Box<dyn PollSource>> {
        let lease = self.settings.dispatch.lease();
        let batch_size = self.settings.polling.queue_batch_size;
        let policy = self.settings.dispatch.redelivery_policy();
        let mut sources: Vec<Box<dyn PollSource>> = vec![];

        let blob = BlobPollSource::new(self.stores.blob.clone(), definitions).with_notifications(blob_notifications);
        if !blob.is_empty() {
            sources.push(Box::new(blob));
        }
        let queue = MessagePollSource::new(MessageSource::Queue, self.stores.queue.clone(), definitions, lease, batch_size, policy.clone());
        if !queue.is_empty() {
            sources.push(Box::new(queue));
        }
        match &self.stores.service_bus {
            Some(store) => {
                let service_bus = MessagePollSource::new(MessageSource::ServiceBus, store.clone(), definitions, lease, batch_size, policy);
                if !service_bus.is_empty() {
                    sources.push(Box::new(service_bus));
                }
            }
            None => {
                for definition in definitions {
                    if let Some(BindingSpec::ServiceBus { .. }) = definition.trigger_parameter.as_ref().map(|t| &t.spec) {
                        log::error!("no service bus configured, {} will not be triggered", definition.location);
                    }
                }
            }
        }
        let timer = TimerPollSource::new(definitions);
        if !timer.is_empty() {
            sources.push(Box::new(timer));
        }
        sources
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        validate_queue_name(&dispatch_queue_name(&self.settings.host_id))?;
        let results = self.index().await?;
        if !results.errors.is_empty() {
            log::warn!("{} function(s) could not be indexed", results.errors.len());
        }

        let definitions = self.listening_definitions().await?;
        let (sender, receiver) = futures::channel::mpsc::unbounded();
        let executor = self.executor().with_blob_notifications(sender);
        let dispatcher = self.dispatcher(executor.clone());

        let mut tasks = vec![];
        for source in self.poll_sources(&definitions, receiver) {
            let listener = TriggerListener::new(source, dispatcher.clone(), self.backoff(), self.error_sink.clone());
            tasks.push(tokio::spawn(listener.run(cancel.clone())));
        }
        if self.settings.dispatch.mode == DispatchMode::Queue {
            let consumer = QueueConsumer::new(
                executor,
                self.dispatch_queue(),
                self.settings.dispatch.lease(),
                self.settings.dispatch.redelivery_policy(),
                self.backoff(),
                self.error_sink.clone(),
            )
            .with_dedup_by_id(self.settings.dispatch.dedup_by_id);
            tasks.push(tokio::spawn(consumer.run(cancel.clone())));
        }
        let tracker = self.liveness_tracker();
        tracker.signal_heartbeat().await?;
        tasks.push(tokio::spawn(tracker.run(cancel.clone())));

        log::info!(
            "job host instance {} running, {} function(s) listening, {} task(s)",
            self.instance_id,
            definitions.len(),
            tasks.len()
        );
        for res in futures::future::join_all(tasks).await {
            if let Err(err) = res {
                log::error!("job host task ended abnormally: {}", err);
            }
        }
        log::info!("job host instance {} stopped", self.instance_id);
        Ok(())
    }
}
