// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::binding::FunctionDefinition;
use jobhost_api::errors::BindError;
use jobhost_api::invoke::{BoundArgument, RuntimeBindingInputs};
use jobhost_api::path_template::TokenValues;

use crate::providers::{BindingContext, BindingRegistry};

/// Resolves every parameter of a function to a bound value at invoke time.
#[derive(Clone)]
pub struct RuntimeBinder {
    registry: std::sync::Arc<BindingRegistry>,
}

impl RuntimeBinder {
    pub fn new(registry: std::sync::Arc<BindingRegistry>) -> Self {
        Self { registry }
    }

    /// Bind all parameters, trigger first, then the others in declaration order.
    ///
    /// Without a trigger event, the value of the trigger parameter (if any)
    /// must be among the explicit arguments. Tokens produced by the trigger
    /// take precedence over explicit arguments of the same name.
    pub fn resolve(&self, definition: &FunctionDefinition, inputs: &RuntimeBindingInputs) -> Result<Vec<BoundArgument>, BindError> {
        let mut tokens = TokenValues::new();
        let mut trigger = None;
        if let Some(binding) = &definition.trigger_parameter {
            let provider = self.registry.provider_for(&binding.kind())?;
            let payload = match (&inputs.trigger, inputs.arguments.get(&binding.parameter_name)) {
                (Some(payload), _) => payload.clone(),
                (None, Some(value)) => provider.payload_from_argument(binding, value)?,
                (None, None) => {
                    return Err(BindError::MissingArgument {
                        parameter: binding.parameter_name.clone(),
                    })
                }
            };
            tokens = provider.produce_tokens(binding, &payload)?;
            trigger = Some(payload);
        }
        for (name, value) in &inputs.arguments {
            tokens.entry(name.clone()).or_insert_with(|| value.clone());
        }

        let context = BindingContext {
            tokens: &tokens,
            trigger: trigger.as_ref(),
            inputs,
        };
        let mut arguments = vec![];
        for binding in definition.parameters() {
            let provider = self.registry.provider_for(&binding.kind())?;
            let value = provider.bind(binding, &context)?;
            log::debug!("{}: {} bound to {:?}", definition.location, binding.parameter_name, value);
            arguments.push(BoundArgument {
                parameter_name: binding.parameter_name.clone(),
                value,
            });
        }
        Ok(arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function_indexer::FunctionIndexer;
    use jobhost_api::binding::BlobAccess;
    use jobhost_api::function_descriptor::{BindingAttribute, FunctionDescriptor, ParameterDescriptor};
    use jobhost_api::function_location::FunctionLocation;
    use jobhost_api::invoke::{BlobPath, BoundValue, ConnectionContext, MessageSource, TriggerPayload};

    fn define(descriptor: FunctionDescriptor) -> FunctionDefinition {
        let indexer = FunctionIndexer::new(std::sync::Arc::new(BindingRegistry::new()));
        indexer.index_function(&descriptor).unwrap()
    }

    fn binder() -> RuntimeBinder {
        RuntimeBinder::new(std::sync::Arc::new(BindingRegistry::new()))
    }

    fn values(pairs: &[(&str, &str)]) -> TokenValues {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn blob_copy() -> FunctionDefinition {
        define(
            FunctionDescriptor::new(FunctionLocation::new("app", "Jobs", "Copy"))
                .with_parameter(ParameterDescriptor::new(
                    "input",
                    BindingAttribute::BlobTrigger {
                        path: "input/{name}.txt".to_string(),
                    },
                ))
                .with_parameter(ParameterDescriptor::new(
                    "output",
                    BindingAttribute::BlobOutput {
                        path: "output/{name}.out.txt".to_string(),
                    },
                ))
                .with_parameter(ParameterDescriptor::plain("name")),
        )
    }

    fn queue_function() -> FunctionDefinition {
        define(
            FunctionDescriptor::new(FunctionLocation::new("app", "Jobs", "Orders"))
                .with_parameter(ParameterDescriptor::new(
                    "order",
                    BindingAttribute::QueueTrigger {
                        queue_name: "orders".to_string(),
                        payload_tokens: vec!["customer".to_string()],
                    },
                ))
                .with_parameter(ParameterDescriptor::new(
                    "receipt",
                    BindingAttribute::QueueOutput {
                        queue_name: "receipts-{customer}".to_string(),
                    },
                )),
        )
    }

    fn message(content: &str) -> TriggerPayload {
        TriggerPayload::Message {
            source: MessageSource::Queue,
            entity: "orders".to_string(),
            message_id: "m1".to_string(),
            content: content.as_bytes().to_vec(),
            dequeue_count: 1,
        }
    }

    #[test]
    fn test_blob_trigger_tokens_flow_into_outputs() {
        let inputs = RuntimeBindingInputs::from_trigger(
            TriggerPayload::Blob {
                path: BlobPath::new("input", "report.txt"),
            },
            &ConnectionContext::default(),
        );
        let arguments = binder().resolve(&blob_copy(), &inputs).unwrap();
        assert_eq!(3, arguments.len());
        assert_eq!("input", arguments[0].parameter_name);
        assert_eq!(
            BoundValue::Blob {
                connection: "default".to_string(),
                path: BlobPath::new("output", "report.out.txt"),
                access: BlobAccess::Write,
            },
            arguments[1].value
        );
        assert_eq!(
            BoundValue::Text {
                value: "report".to_string()
            },
            arguments[2].value
        );
    }

    #[test]
    fn test_blob_not_matching_trigger() {
        let inputs = RuntimeBindingInputs::from_trigger(
            TriggerPayload::Blob {
                path: BlobPath::new("input", "report.csv"),
            },
            &ConnectionContext::default(),
        );
        assert!(matches!(
            binder().resolve(&blob_copy(), &inputs),
            Err(BindError::TriggerMismatch { .. })
        ));
    }

    #[test]
    fn test_manual_invocation_of_triggered_function() {
        let inputs = RuntimeBindingInputs::from_arguments(values(&[("input", "input/a.txt")]), &ConnectionContext::default());
        let arguments = binder().resolve(&blob_copy(), &inputs).unwrap();
        assert_eq!(
            BoundValue::Blob {
                connection: "default".to_string(),
                path: BlobPath::new("input", "a.txt"),
                access: BlobAccess::Read,
            },
            arguments[0].value
        );

        let inputs = RuntimeBindingInputs::from_arguments(TokenValues::new(), &ConnectionContext::default());
        assert_eq!(
            Err(BindError::MissingArgument {
                parameter: "input".to_string()
            }),
            binder().resolve(&blob_copy(), &inputs)
        );
    }

    #[test]
    fn test_queue_payload_tokens() {
        let inputs = RuntimeBindingInputs::from_trigger(message(r#"{"customer": "acme", "total": 3}"#), &ConnectionContext::default());
        let arguments = binder().resolve(&queue_function(), &inputs).unwrap();
        assert!(matches!(&arguments[0].value, BoundValue::Message { dequeue_count: 1, .. }));
        assert_eq!(
            BoundValue::MessageOutput {
                connection: "default".to_string(),
                source: MessageSource::Queue,
                entity: "receipts-acme".to_string(),
            },
            arguments[1].value
        );
    }

    #[test]
    fn test_queue_payload_missing_token() {
        let inputs = RuntimeBindingInputs::from_trigger(message(r#"{"total": 3}"#), &ConnectionContext::default());
        assert!(matches!(
            binder().resolve(&queue_function(), &inputs),
            Err(BindError::MissingToken { token, .. }) if token == "customer"
        ));

        let inputs = RuntimeBindingInputs::from_trigger(message("not json"), &ConnectionContext::default());
        assert!(matches!(
            binder().resolve(&queue_function(), &inputs),
            Err(BindError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_bound_queue_name_is_validated() {
        let inputs = RuntimeBindingInputs::from_trigger(message(r#"{"customer": "ACME"}"#), &ConnectionContext::default());
        assert!(matches!(binder().resolve(&queue_function(), &inputs), Err(BindError::Format(_))));
    }

    #[test]
    fn test_wrong_trigger_kind() {
        let inputs = RuntimeBindingInputs::from_trigger(message("{}"), &ConnectionContext::default());
        assert!(matches!(
            binder().resolve(&blob_copy(), &inputs),
            Err(BindError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_service_bus_requires_connection() {
        let definition = define(
            FunctionDescriptor::new(FunctionLocation::new("app", "Jobs", "Bus")).with_parameter(ParameterDescriptor::new(
                "event",
                BindingAttribute::ServiceBusTrigger {
                    entity_path: "events/Subscriptions/all".to_string(),
                    payload_tokens: vec![],
                },
            )),
        );
        let payload = TriggerPayload::Message {
            source: MessageSource::ServiceBus,
            entity: "events/Subscriptions/all".to_string(),
            message_id: "m1".to_string(),
            content: b"hello".to_vec(),
            dequeue_count: 1,
        };
        let inputs = RuntimeBindingInputs::from_trigger(payload.clone(), &ConnectionContext::default());
        assert_eq!(
            Err(BindError::MissingConnection("service bus".to_string())),
            binder().resolve(&definition, &inputs)
        );

        let connection = ConnectionContext {
            storage: "default".to_string(),
            service_bus: Some("bus".to_string()),
        };
        let inputs = RuntimeBindingInputs::from_trigger(payload, &connection);
        let arguments = binder().resolve(&definition, &inputs).unwrap();
        assert!(matches!(&arguments[0].value, BoundValue::Message { content, .. } if content == "hello"));
    }

    #[test]
    fn test_table_and_timer() {
        let definition = define(
            FunctionDescriptor::new(FunctionLocation::new("app", "Jobs", "Nightly"))
                .with_parameter(ParameterDescriptor::new(
                    "timer",
                    BindingAttribute::TimerTrigger {
                        interval_secs: 60,
                        run_on_startup: false,
                    },
                ))
                .with_parameter(ParameterDescriptor::new(
                    "stats",
                    BindingAttribute::Table {
                        table_name: "stats".to_string(),
                        partition_key: Some("daily".to_string()),
                        row_key: Some("{day}".to_string()),
                    },
                ))
                .with_parameter(ParameterDescriptor::plain("day")),
        );
        let scheduled_utc = chrono::Utc::now();
        let mut inputs = RuntimeBindingInputs::from_trigger(TriggerPayload::Timer { scheduled_utc }, &ConnectionContext::default());
        inputs.arguments = values(&[("day", "monday")]);
        let arguments = binder().resolve(&definition, &inputs).unwrap();
        assert_eq!(
            BoundValue::Timer {
                scheduled_utc,
                interval_secs: 60
            },
            arguments[0].value
        );
        assert_eq!(
            BoundValue::Table {
                connection: "default".to_string(),
                table_name: "stats".to_string(),
                partition_key: Some("daily".to_string()),
                row_key: Some("monday".to_string()),
            },
            arguments[1].value
        );

        inputs.arguments.clear();
        assert!(matches!(
            binder().resolve(&definition, &inputs),
            Err(BindError::MissingToken { token, .. }) if token == "day"
        ));
    }
}
