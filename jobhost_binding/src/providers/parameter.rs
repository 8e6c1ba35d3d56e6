// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

//! Parameters without a binding attribute.
//!
//! A parameter whose name is a token produced by the trigger is a route
//! parameter and receives the token value. Any other one is an invoke
//! parameter, whose value must be given explicitly when invoking.

use jobhost_api::binding::{BindingSpec, StaticBinding};
use jobhost_api::errors::{BindError, IndexErrorKind};
use jobhost_api::function_descriptor::BindingAttribute;
use jobhost_api::invoke::BoundValue;

pub fn route_binding(parameter_name: &str) -> StaticBinding {
    StaticBinding {
        parameter_name: parameter_name.to_string(),
        is_input: true,
        is_trigger: false,
        produced_tokens: std::collections::BTreeSet::new(),
        spec: BindingSpec::Route {
            token: parameter_name.to_string(),
        },
    }
}

/// An invoke parameter is an explicit invocation-time value, so it also
/// counts as a produced token.
pub fn invoke_binding(parameter_name: &str) -> StaticBinding {
    StaticBinding {
        parameter_name: parameter_name.to_string(),
        is_input: true,
        is_trigger: false,
        produced_tokens: std::iter::once(parameter_name.to_string()).collect(),
        spec: BindingSpec::Invoke,
    }
}

pub struct RouteBindingProvider {}

impl super::BindingProvider for RouteBindingProvider {
    fn create(&self, _parameter_name: &str, attribute: &BindingAttribute) -> Result<StaticBinding, IndexErrorKind> {
        Err(super::wrong_attribute("route", attribute))
    }

    fn bind(&self, binding: &StaticBinding, context: &super::BindingContext) -> Result<BoundValue, BindError> {
        let BindingSpec::Route { token } = &binding.spec else {
            return Err(BindError::UnsupportedBindingKind(binding.kind().to_string()));
        };
        match context.tokens.get(token) {
            Some(value) => Ok(BoundValue::Text { value: value.clone() }),
            None => Err(BindError::MissingToken {
                token: token.clone(),
                template: format!("{{{}}}", token),
            }),
        }
    }
}

pub struct InvokeBindingProvider {}

impl super::BindingProvider for InvokeBindingProvider {
    fn create(&self, _parameter_name: &str, attribute: &BindingAttribute) -> Result<StaticBinding, IndexErrorKind> {
        Err(super::wrong_attribute("invoke", attribute))
    }

    fn bind(&self, binding: &StaticBinding, context: &super::BindingContext) -> Result<BoundValue, BindError> {
        match context.inputs.arguments.get(&binding.parameter_name) {
            Some(value) => Ok(BoundValue::Text { value: value.clone() }),
            None => Err(BindError::MissingArgument {
                parameter: binding.parameter_name.clone(),
            }),
        }
    }
}
