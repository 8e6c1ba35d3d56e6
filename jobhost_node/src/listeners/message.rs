// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::binding::{BindingSpec, FunctionDefinition};
use jobhost_api::invoke::{MessageSource, TriggerCause, TriggerPayload, TriggerReason};
use jobhost_api::queue::{receive_message_or_create, QueueStore, ReceivedMessage};

use super::{PollSource, TriggerEvent};
use crate::dispatch::invocation::parent_id_of;
use crate::dispatch::redelivery::{poison, poison_queue_name, MessageDisposition, RedeliveryPolicy};
use crate::dispatch::DispatchOutcome;

/// Receives messages from the queues (or service bus entities) that
/// trigger functions, leasing each one until all its functions have been
/// dispatched.
pub struct MessagePollSource {
    source: MessageSource,
    store: std::sync::Arc<dyn QueueStore>,
    entities: std::collections::BTreeMap<String, Vec<std::sync::Arc<FunctionDefinition>>>,
    lease: std::time::Duration,
    batch_size: usize,
    policy: RedeliveryPolicy,
    in_flight: std::collections::HashMap<String, (String, ReceivedMessage)>,
}

impl MessagePollSource {
    pub fn new(
        source: MessageSource,
        store: std::sync::Arc<dyn QueueStore>,
        functions: &[std::sync::Arc<FunctionDefinition>],
        lease: std::time::Duration,
        batch_size: usize,
        policy: RedeliveryPolicy,
    ) -> Self {
        let mut entities: std::collections::BTreeMap<String, Vec<_>> = std::collections::BTreeMap::new();
        for function in functions {
            let entity = match (source, function.trigger_parameter.as_ref().map(|t| &t.spec)) {
                (MessageSource::Queue, Some(BindingSpec::Queue { queue_name, .. })) => queue_name,
                (MessageSource::ServiceBus, Some(BindingSpec::ServiceBus { entity_path, .. })) => entity_path,
                _ => continue,
            };
            entities.entry(entity.as_str().to_string()).or_default().push(function.clone());
        }
        Self {
            source,
            store,
            entities,
            lease,
            batch_size: batch_size.max(1),
            policy,
            in_flight: std::collections::HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn event(&self, entity: &str, functions: &[std::sync::Arc<FunctionDefinition>], message: &ReceivedMessage) -> TriggerEvent {
        let cause = match self.source {
            MessageSource::Queue => TriggerCause::NewQueueMessage {
                queue_name: entity.to_string(),
                message_id: message.message_id.clone(),
            },
            MessageSource::ServiceBus => TriggerCause::NewServiceBusMessage {
                entity_path: entity.to_string(),
                message_id: message.message_id.clone(),
            },
        };
        TriggerEvent {
            functions: functions.to_vec(),
            payload: TriggerPayload::Message {
                source: self.source,
                entity: entity.to_string(),
                message_id: message.message_id.clone(),
                content: message.content.clone(),
                dequeue_count: message.dequeue_count,
            },
            reason: TriggerReason::new(cause).with_parent(parent_id_of(&message.content)),
        }
    }
}

#[async_trait::async_trait]
impl PollSource for MessagePollSource {
    fn name(&self) -> String {
        format!("{} listener ({} entities)", self.source, self.entities.len())
    }

    async fn poll(&mut self) -> anyhow::Result<Vec<TriggerEvent>> {
        let mut events = vec![];
        let mut received = vec![];
        let mut failure: Option<anyhow::Error> = None;
        for (entity, functions) in &self.entities {
            for _ in 0..self.batch_size {
                let message = match receive_message_or_create(self.store.as_ref(), entity, self.lease).await {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(err) => {
                        if failure.is_none() {
                            failure = Some(anyhow::Error::new(err).context(format!("receiving from {}", entity)));
                        }
                        break;
                    }
                };
                log::debug!("message {} received from {} (attempt {})", message.message_id, entity, message.dequeue_count);
                events.push(self.event(entity, functions, &message));
                received.push((entity.clone(), message));
            }
        }

        // Leased messages are tracked even if another entity failed.
        for (entity, message) in received {
            self.in_flight.insert(message.message_id.clone(), (entity, message));
        }
        match failure {
            Some(err) if events.is_empty() => Err(err),
            Some(err) => {
                log::error!("{}: {:#}", self.name(), err);
                Ok(events)
            }
            None => Ok(events),
        }
    }

    async fn complete(&mut self, event: &TriggerEvent, outcomes: &[DispatchOutcome]) -> anyhow::Result<()> {
        let TriggerPayload::Message { message_id, .. } = &event.payload else {
            return Ok(());
        };
        let Some((entity, message)) = self.in_flight.remove(message_id) else {
            return Ok(());
        };
        let poison_queue = poison_queue_name(self.source, &entity);
        let disposition = if outcomes.iter().any(|o| matches!(o, DispatchOutcome::BindFailed(_))) {
            poison(self.store.as_ref(), &entity, &poison_queue, &message).await?;
            MessageDisposition::Poisoned
        } else if outcomes.iter().any(|o| o.should_retry()) {
            self.policy.settle_failed(self.store.as_ref(), &entity, &poison_queue, &message).await?
        } else {
            self.store.delete_message(&entity, &message.receipt).await?;
            MessageDisposition::Deleted
        };
        log::debug!("message {} from {}: {:?}", message.message_id, entity, disposition);
        Ok(())
    }
}
