// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

pub mod blob;
pub mod custom;
pub mod message;
pub mod parameter;
pub mod table;
pub mod timer;

use jobhost_api::binding::{BindingKind, StaticBinding};
use jobhost_api::errors::{BindError, IndexErrorKind};
use jobhost_api::function_descriptor::BindingAttribute;
use jobhost_api::invoke::{BoundValue, RuntimeBindingInputs, TriggerPayload};
use jobhost_api::path_template::{PathTemplate, TokenValues};

/// Everything a provider may use to bind one parameter at invoke time.
pub struct BindingContext<'a> {
    pub tokens: &'a TokenValues,
    pub trigger: Option<&'a TriggerPayload>,
    pub inputs: &'a RuntimeBindingInputs,
}

impl BindingContext<'_> {
    pub fn resolve(&self, template: &PathTemplate) -> Result<String, BindError> {
        template.bind(self.tokens)
    }
}

/// Validation, token production and binding for one binding kind.
pub trait BindingProvider: Send + Sync {
    /// Validate a declared attribute and build the static binding.
    fn create(&self, parameter_name: &str, attribute: &BindingAttribute) -> Result<StaticBinding, IndexErrorKind>;

    /// Token values carried by the event that fired a trigger binding.
    fn produce_tokens(&self, _binding: &StaticBinding, _trigger: &TriggerPayload) -> Result<TokenValues, BindError> {
        Ok(TokenValues::new())
    }

    /// Build a trigger event from a value supplied at direct invocation.
    fn payload_from_argument(&self, binding: &StaticBinding, _value: &str) -> Result<TriggerPayload, BindError> {
        Err(BindError::TypeMismatch {
            parameter: binding.parameter_name.clone(),
            expected: binding.kind().to_string(),
            actual: "text".to_string(),
        })
    }

    fn bind(&self, binding: &StaticBinding, context: &BindingContext) -> Result<BoundValue, BindError>;
}

/// Binding dispatch table, keyed by binding kind. Custom kinds are added
/// with explicit registration.
#[derive(Clone)]
pub struct BindingRegistry {
    providers: std::collections::HashMap<String, std::sync::Arc<dyn BindingProvider>>,
}

impl BindingRegistry {
    /// Registry with no provider at all.
    pub fn empty() -> Self {
        Self {
            providers: std::collections::HashMap::new(),
        }
    }

    /// Registry with all the built-in binding kinds.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(BindingKind::Blob.key(), std::sync::Arc::new(blob::BlobBindingProvider {}));
        registry.register(BindingKind::Queue.key(), std::sync::Arc::new(message::MessageBindingProvider::queue()));
        registry.register(
            BindingKind::ServiceBus.key(),
            std::sync::Arc::new(message::MessageBindingProvider::service_bus()),
        );
        registry.register(BindingKind::Table.key(), std::sync::Arc::new(table::TableBindingProvider {}));
        registry.register(BindingKind::Timer.key(), std::sync::Arc::new(timer::TimerBindingProvider {}));
        registry.register(BindingKind::Route.key(), std::sync::Arc::new(parameter::RouteBindingProvider {}));
        registry.register(BindingKind::Invoke.key(), std::sync::Arc::new(parameter::InvokeBindingProvider {}));
        registry
    }

    pub fn register(&mut self, key: &str, provider: std::sync::Arc<dyn BindingProvider>) {
        if self.providers.insert(key.to_string(), provider).is_some() {
            log::warn!("binding provider '{}' replaced", key);
        }
    }

    pub fn get(&self, key: &str) -> Option<&dyn BindingProvider> {
        self.providers.get(key).map(|p| p.as_ref())
    }

    pub fn provider_for(&self, kind: &BindingKind) -> Result<&dyn BindingProvider, BindError> {
        self.get(kind.key()).ok_or_else(|| BindError::UnsupportedBindingKind(kind.to_string()))
    }
}

impl Default for BindingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_attribute(expected: &str, attribute: &BindingAttribute) -> IndexErrorKind {
    IndexErrorKind::InvalidBinding(format!("{} provider cannot handle {:?}", expected, attribute))
}

fn wrong_trigger(binding: &StaticBinding, trigger: Option<&TriggerPayload>) -> BindError {
    BindError::TypeMismatch {
        parameter: binding.parameter_name.clone(),
        expected: format!("{} trigger", binding.kind()),
        actual: match trigger {
            Some(TriggerPayload::Blob { .. }) => "blob trigger".to_string(),
            Some(TriggerPayload::Message { source, .. }) => format!("{} message", source),
            Some(TriggerPayload::Timer { .. }) => "timer".to_string(),
            None => "no trigger".to_string(),
        },
    }
}
