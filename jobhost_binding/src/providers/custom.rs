// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::binding::{BindingSpec, StaticBinding};
use jobhost_api::errors::{BindError, IndexErrorKind};
use jobhost_api::function_descriptor::BindingAttribute;
use jobhost_api::invoke::BoundValue;
use jobhost_api::path_template::PathTemplate;

/// Provider for a custom binding kind whose configuration values are
/// templates, resolved at invoke time and handed to the function as is.
///
/// Register one per kind name, e.g.:
/// `registry.register("sql", Arc::new(TemplateBindingProvider::new("sql", &["query"])))`.
pub struct TemplateBindingProvider {
    name: String,
    required_keys: Vec<String>,
}

impl TemplateBindingProvider {
    pub fn new(name: &str, required_keys: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            required_keys: required_keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl super::BindingProvider for TemplateBindingProvider {
    fn create(&self, parameter_name: &str, attribute: &BindingAttribute) -> Result<StaticBinding, IndexErrorKind> {
        let BindingAttribute::Custom {
            name,
            is_input,
            configuration,
        } = attribute
        else {
            return Err(super::wrong_attribute(&self.name, attribute));
        };
        if *name != self.name {
            return Err(IndexErrorKind::UnsupportedBindingKind(name.clone()));
        }
        if let Some(key) = self.required_keys.iter().find(|k| !configuration.contains_key(*k)) {
            return Err(IndexErrorKind::InvalidBinding(format!("{} binding requires '{}'", self.name, key)));
        }
        let mut templates = std::collections::BTreeMap::new();
        for (key, value) in configuration {
            templates.insert(key.clone(), PathTemplate::parse_pattern(value)?);
        }
        Ok(StaticBinding {
            parameter_name: parameter_name.to_string(),
            is_input: *is_input,
            is_trigger: false,
            produced_tokens: std::collections::BTreeSet::new(),
            spec: BindingSpec::Custom {
                name: name.clone(),
                configuration: templates,
            },
        })
    }

    fn bind(&self, binding: &StaticBinding, context: &super::BindingContext) -> Result<BoundValue, BindError> {
        let BindingSpec::Custom { name, configuration } = &binding.spec else {
            return Err(BindError::UnsupportedBindingKind(binding.kind().to_string()));
        };
        let mut resolved = std::collections::BTreeMap::new();
        for (key, template) in configuration {
            resolved.insert(key.clone(), context.resolve(template)?);
        }
        Ok(BoundValue::Custom {
            name: name.clone(),
            configuration: resolved,
        })
    }
}
