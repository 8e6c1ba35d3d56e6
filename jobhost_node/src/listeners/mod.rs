// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

pub mod blob;
pub mod message;
pub mod timer;

use jobhost_api::binding::FunctionDefinition;
use jobhost_api::invoke::{TriggerPayload, TriggerReason};

use crate::backoff::{IntervalSeparationCommand, RandomizedExponentialBackoff};
use crate::dispatch::{DispatchOutcome, Dispatcher};

/// Something that happened in a store, to be dispatched to every function
/// listening for it.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub functions: Vec<std::sync::Arc<FunctionDefinition>>,
    pub payload: TriggerPayload,
    pub reason: TriggerReason,
}

/// A store-specific source of trigger events.
#[async_trait::async_trait]
pub trait PollSource: Send {
    fn name(&self) -> String;

    async fn poll(&mut self) -> anyhow::Result<Vec<TriggerEvent>>;

    /// Called once the event has been dispatched to all its functions,
    /// with one outcome per function.
    async fn complete(&mut self, _event: &TriggerEvent, _outcomes: &[DispatchOutcome]) -> anyhow::Result<()> {
        Ok(())
    }

    /// Time until the source has an event due, if it knows.
    fn time_to_next_due(&self) -> Option<std::time::Duration> {
        None
    }
}

/// Receives errors that listeners cannot handle themselves.
pub trait HostErrorSink: Send + Sync {
    fn report(&self, source: &str, error: &anyhow::Error);
}

pub struct LogErrorSink {}

impl HostErrorSink for LogErrorSink {
    fn report(&self, source: &str, error: &anyhow::Error) {
        log::error!("{}: {:#}", source, error);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Polling,
    Dispatching,
    Backoff,
}

/// Polls a source with a randomized exponential backoff and dispatches
/// what it finds.
pub struct TriggerListener {
    source: Box<dyn PollSource>,
    dispatcher: Dispatcher,
    backoff: RandomizedExponentialBackoff,
    error_sink: std::sync::Arc<dyn HostErrorSink>,
    state: ListenerState,
}

impl TriggerListener {
    pub fn new(
        source: Box<dyn PollSource>,
        dispatcher: Dispatcher,
        backoff: RandomizedExponentialBackoff,
        error_sink: std::sync::Arc<dyn HostErrorSink>,
    ) -> Self {
        Self {
            source,
            dispatcher,
            backoff,
            error_sink,
            state: ListenerState::Idle,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn name(&self) -> String {
        self.source.name()
    }

    /// Run one poll cycle. Returns the number of events found.
    pub async fn poll_once(&mut self) -> usize {
        self.state = ListenerState::Polling;
        let events = match self.source.poll().await {
            Ok(events) => events,
            Err(err) => {
                self.error_sink.report(&self.source.name(), &err);
                vec![]
            }
        };
        if events.is_empty() {
            self.state = ListenerState::Backoff;
            self.backoff.on_no_work();
            return 0;
        }

        self.state = ListenerState::Dispatching;
        for event in &events {
            let mut outcomes = vec![];
            for function in &event.functions {
                outcomes.push(
                    self.dispatcher
                        .dispatch_trigger(function, event.payload.clone(), event.reason.clone())
                        .await,
                );
            }
            if let Err(err) = self.source.complete(event, &outcomes).await {
                self.error_sink.report(&self.source.name(), &err);
            }
        }
        self.backoff.on_work_found();
        self.state = ListenerState::Idle;
        events.len()
    }

    pub async fn run(self, cancel: tokio_util::sync::CancellationToken) {
        log::info!("listener {} started", self.source.name());
        crate::backoff::run_interval_separated(self, cancel).await;
    }
}

#[async_trait::async_trait]
impl IntervalSeparationCommand for TriggerListener {
    fn separation_interval(&self) -> std::time::Duration {
        let interval = self.backoff.current();
        match self.source.time_to_next_due() {
            Some(due) => interval.min(due),
            None => interval,
        }
    }

    async fn execute(&mut self) {
        self.poll_once().await;
    }
}
