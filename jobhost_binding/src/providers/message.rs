// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::binding::{BindingSpec, StaticBinding};
use jobhost_api::errors::{BindError, IndexErrorKind};
use jobhost_api::function_descriptor::BindingAttribute;
use jobhost_api::invoke::{BoundValue, MessageSource, TriggerPayload};
use jobhost_api::path_template::{validate_queue_name, validate_queue_name_pattern, PathSegment, PathTemplate, TokenValues};

/// Queue and service bus bindings: a trigger on a fixed entity, or an
/// output to an entity whose name may contain tokens.
pub struct MessageBindingProvider {
    source: MessageSource,
}

impl MessageBindingProvider {
    pub fn queue() -> Self {
        Self {
            source: MessageSource::Queue,
        }
    }

    pub fn service_bus() -> Self {
        Self {
            source: MessageSource::ServiceBus,
        }
    }

    fn validate_entity(&self, template: &PathTemplate) -> Result<(), IndexErrorKind> {
        match self.source {
            MessageSource::Queue => Ok(validate_queue_name_pattern(template)?),
            MessageSource::ServiceBus => {
                for segment in template.segments() {
                    if let PathSegment::Literal(literal) = segment {
                        if let Some(c) = literal.chars().find(|c| !(c.is_ascii_alphanumeric() || "-_./".contains(*c))) {
                            return Err(IndexErrorKind::InvalidBinding(format!(
                                "illegal character '{}' in entity path '{}'",
                                c, template
                            )));
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn connection(&self, context: &super::BindingContext) -> Result<String, BindError> {
        match self.source {
            MessageSource::Queue => Ok(context.inputs.connection.storage.clone()),
            MessageSource::ServiceBus => context
                .inputs
                .connection
                .service_bus
                .clone()
                .ok_or_else(|| BindError::MissingConnection("service bus".to_string())),
        }
    }

    fn spec(&self, entity: PathTemplate, payload_tokens: Vec<String>) -> BindingSpec {
        match self.source {
            MessageSource::Queue => BindingSpec::Queue {
                queue_name: entity,
                payload_tokens,
            },
            MessageSource::ServiceBus => BindingSpec::ServiceBus {
                entity_path: entity,
                payload_tokens,
            },
        }
    }
}

fn entity_of(spec: &BindingSpec) -> Option<(&PathTemplate, &Vec<String>)> {
    match spec {
        BindingSpec::Queue {
            queue_name,
            payload_tokens,
        } => Some((queue_name, payload_tokens)),
        BindingSpec::ServiceBus {
            entity_path,
            payload_tokens,
        } => Some((entity_path, payload_tokens)),
        _ => None,
    }
}

impl super::BindingProvider for MessageBindingProvider {
    fn create(&self, parameter_name: &str, attribute: &BindingAttribute) -> Result<StaticBinding, IndexErrorKind> {
        let (entity, payload_tokens, is_trigger) = match (self.source, attribute) {
            (
                MessageSource::Queue,
                BindingAttribute::QueueTrigger {
                    queue_name,
                    payload_tokens,
                },
            ) => (queue_name, payload_tokens.clone(), true),
            (MessageSource::Queue, BindingAttribute::QueueOutput { queue_name }) => (queue_name, vec![], false),
            (
                MessageSource::ServiceBus,
                BindingAttribute::ServiceBusTrigger {
                    entity_path,
                    payload_tokens,
                },
            ) => (entity_path, payload_tokens.clone(), true),
            (MessageSource::ServiceBus, BindingAttribute::ServiceBusOutput { entity_path }) => (entity_path, vec![], false),
            _ => return Err(super::wrong_attribute(&self.source.to_string(), attribute)),
        };
        let entity = PathTemplate::parse_pattern(entity)?;
        self.validate_entity(&entity)?;
        if is_trigger && !entity.is_literal() {
            return Err(IndexErrorKind::InvalidBinding(format!(
                "the {} a trigger listens to must not contain tokens: '{}'",
                self.source, entity
            )));
        }
        if let Some(token) = payload_tokens.iter().find(|t| t.is_empty()) {
            return Err(IndexErrorKind::InvalidBinding(format!("invalid payload token '{}'", token)));
        }
        Ok(StaticBinding {
            parameter_name: parameter_name.to_string(),
            is_input: is_trigger,
            is_trigger,
            produced_tokens: payload_tokens.iter().cloned().collect(),
            spec: self.spec(entity, payload_tokens),
        })
    }

    /// Payload tokens are top-level fields of a JSON object message.
    fn produce_tokens(&self, binding: &StaticBinding, trigger: &TriggerPayload) -> Result<TokenValues, BindError> {
        let (Some((entity, payload_tokens)), TriggerPayload::Message { content, .. }) = (entity_of(&binding.spec), trigger) else {
            return Err(super::wrong_trigger(binding, Some(trigger)));
        };
        let mut tokens = TokenValues::new();
        if payload_tokens.is_empty() {
            return Ok(tokens);
        }
        let invalid = |detail: String| BindError::InvalidPayload {
            parameter: binding.parameter_name.clone(),
            detail,
        };
        let object = match serde_json::from_slice::<serde_json::Value>(content) {
            Ok(serde_json::Value::Object(object)) => object,
            Ok(_) => return Err(invalid("not a JSON object".to_string())),
            Err(err) => return Err(invalid(err.to_string())),
        };
        for token in payload_tokens {
            let value = match object.get(token) {
                Some(serde_json::Value::String(value)) => value.clone(),
                Some(serde_json::Value::Null) | None => {
                    return Err(BindError::MissingToken {
                        token: token.clone(),
                        template: entity.to_string(),
                    })
                }
                Some(other) => other.to_string(),
            };
            tokens.insert(token.clone(), value);
        }
        Ok(tokens)
    }

    fn payload_from_argument(&self, binding: &StaticBinding, value: &str) -> Result<TriggerPayload, BindError> {
        let Some((entity, _)) = entity_of(&binding.spec) else {
            return Err(BindError::UnsupportedBindingKind(binding.kind().to_string()));
        };
        Ok(TriggerPayload::Message {
            source: self.source,
            entity: entity.to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
            content: value.as_bytes().to_vec(),
            dequeue_count: 0,
        })
    }

    fn bind(&self, binding: &StaticBinding, context: &super::BindingContext) -> Result<BoundValue, BindError> {
        let Some((entity, _)) = entity_of(&binding.spec) else {
            return Err(BindError::UnsupportedBindingKind(binding.kind().to_string()));
        };
        let connection = self.connection(context)?;
        if !binding.is_trigger {
            let entity = context.resolve(entity)?;
            if self.source == MessageSource::Queue {
                validate_queue_name(&entity)?;
            }
            return Ok(BoundValue::MessageOutput {
                connection,
                source: self.source,
                entity,
            });
        }
        match context.trigger {
            Some(TriggerPayload::Message {
                source,
                entity,
                message_id,
                content,
                dequeue_count,
            }) if *source == self.source => Ok(BoundValue::Message {
                connection,
                source: *source,
                entity: entity.clone(),
                message_id: message_id.clone(),
                content: String::from_utf8(content.clone()).map_err(|err| BindError::InvalidPayload {
                    parameter: binding.parameter_name.clone(),
                    detail: err.to_string(),
                })?,
                dequeue_count: *dequeue_count,
            }),
            other => Err(super::wrong_trigger(binding, other)),
        }
    }
}
