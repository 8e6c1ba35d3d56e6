// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::binding::{BindingSpec, BlobAccess, StaticBinding};
use jobhost_api::errors::{BindError, IndexErrorKind};
use jobhost_api::function_descriptor::BindingAttribute;
use jobhost_api::invoke::{BlobPath, BoundValue, TriggerPayload};
use jobhost_api::path_template::{PathTemplate, TokenValues};

pub struct BlobBindingProvider {}

impl super::BindingProvider for BlobBindingProvider {
    fn create(&self, parameter_name: &str, attribute: &BindingAttribute) -> Result<StaticBinding, IndexErrorKind> {
        let (path, is_trigger, access) = match attribute {
            BindingAttribute::BlobTrigger { path } => (path, true, BlobAccess::Read),
            BindingAttribute::BlobInput { path } => (path, false, BlobAccess::Read),
            BindingAttribute::BlobOutput { path } => (path, false, BlobAccess::Write),
            _ => return Err(super::wrong_attribute("blob", attribute)),
        };
        let path = PathTemplate::parse(path)?;
        let produced_tokens = match is_trigger {
            true => path.tokens().map(|t| t.to_string()).collect(),
            false => std::collections::BTreeSet::new(),
        };
        Ok(StaticBinding {
            parameter_name: parameter_name.to_string(),
            is_input: access == BlobAccess::Read,
            is_trigger,
            produced_tokens,
            spec: BindingSpec::Blob { path, access },
        })
    }

    fn produce_tokens(&self, binding: &StaticBinding, trigger: &TriggerPayload) -> Result<TokenValues, BindError> {
        match (binding.path_template(), trigger) {
            (Some(template), TriggerPayload::Blob { path }) => {
                template.match_path(&path.to_string()).ok_or_else(|| BindError::TriggerMismatch {
                    value: path.to_string(),
                    template: template.to_string(),
                })
            }
            _ => Err(super::wrong_trigger(binding, Some(trigger))),
        }
    }

    fn payload_from_argument(&self, _binding: &StaticBinding, value: &str) -> Result<TriggerPayload, BindError> {
        Ok(TriggerPayload::Blob {
            path: BlobPath::parse(value)?,
        })
    }

    fn bind(&self, binding: &StaticBinding, context: &super::BindingContext) -> Result<BoundValue, BindError> {
        let BindingSpec::Blob { path, access } = &binding.spec else {
            return Err(BindError::UnsupportedBindingKind(binding.kind().to_string()));
        };
        let path = match (binding.is_trigger, context.trigger) {
            (true, Some(TriggerPayload::Blob { path })) => path.clone(),
            (true, other) => return Err(super::wrong_trigger(binding, other)),
            (false, _) => BlobPath::parse(&context.resolve(path)?)?,
        };
        Ok(BoundValue::Blob {
            connection: context.inputs.connection.storage.clone(),
            path,
            access: *access,
        })
    }
}
