// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::binding::{BindingSpec, StaticBinding};
use jobhost_api::errors::{BindError, IndexErrorKind};
use jobhost_api::function_descriptor::BindingAttribute;
use jobhost_api::invoke::BoundValue;
use jobhost_api::path_template::{PathSegment, PathTemplate};

pub struct TableBindingProvider {}

fn validate_table_name(template: &PathTemplate) -> Result<(), IndexErrorKind> {
    for segment in template.segments() {
        if let PathSegment::Literal(literal) = segment {
            if let Some(c) = literal.chars().find(|c| !c.is_ascii_alphanumeric()) {
                return Err(IndexErrorKind::InvalidBinding(format!(
                    "illegal character '{}' in table name '{}'",
                    c, template
                )));
            }
        }
    }
    Ok(())
}

impl super::BindingProvider for TableBindingProvider {
    fn create(&self, parameter_name: &str, attribute: &BindingAttribute) -> Result<StaticBinding, IndexErrorKind> {
        let BindingAttribute::Table {
            table_name,
            partition_key,
            row_key,
        } = attribute
        else {
            return Err(super::wrong_attribute("table", attribute));
        };
        let table_name = PathTemplate::parse_pattern(table_name)?;
        validate_table_name(&table_name)?;
        if row_key.is_some() && partition_key.is_none() {
            return Err(IndexErrorKind::InvalidBinding("a row key requires a partition key".to_string()));
        }
        Ok(StaticBinding {
            parameter_name: parameter_name.to_string(),
            is_input: false,
            is_trigger: false,
            produced_tokens: std::collections::BTreeSet::new(),
            spec: BindingSpec::Table {
                table_name,
                partition_key: partition_key.as_deref().map(PathTemplate::parse_pattern).transpose()?,
                row_key: row_key.as_deref().map(PathTemplate::parse_pattern).transpose()?,
            },
        })
    }

    fn bind(&self, binding: &StaticBinding, context: &super::BindingContext) -> Result<BoundValue, BindError> {
        let BindingSpec::Table {
            table_name,
            partition_key,
            row_key,
        } = &binding.spec
        else {
            return Err(BindError::UnsupportedBindingKind(binding.kind().to_string()));
        };
        Ok(BoundValue::Table {
            connection: context.inputs.connection.storage.clone(),
            table_name: context.resolve(table_name)?,
            partition_key: partition_key.as_ref().map(|t| context.resolve(t)).transpose()?,
            row_key: row_key.as_ref().map(|t| context.resolve(t)).transpose()?,
        })
    }
}
