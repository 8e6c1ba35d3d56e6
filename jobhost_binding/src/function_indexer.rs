// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT


use jobhost_api::binding::{FunctionDefinition, FunctionFlags, StaticBinding};
use jobhost_api::errors::{IndexError, IndexErrorKind, StoreError};
use jobhost_api::function_descriptor::FunctionDescriptor;
use jobhost_api::function_location::FunctionLocation;
use jobhost_api::function_table::FunctionTableStore;

use crate::providers::parameter::{invoke_binding, route_binding};
use crate::providers::BindingRegistry;

/// Outcome of an indexing pass, as a diff against the previous content of
/// the function table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexResults {
    pub new_functions: Vec<FunctionDefinition>,
    pub updated_functions: Vec<FunctionDefinition>,
    pub deleted_functions: Vec<FunctionDefinition>,
    pub errors: Vec<IndexError>,
}

impl IndexResults {
    pub fn has_changes(&self) -> bool {
        !(self.new_functions.is_empty() && self.updated_functions.is_empty() && self.deleted_functions.is_empty())
    }

    /// Apply the diff to the table, one entry at a time.
    pub async fn apply(&self, table: &dyn FunctionTableStore) -> Result<(), StoreError> {
        for definition in self.new_functions.iter().chain(self.updated_functions.iter()) {
            table.add(definition.clone()).await?;
        }
        for definition in &self.deleted_functions {
            table.delete(definition).await?;
        }
        Ok(())
    }
}

pub struct FunctionIndexer {
    registry: std::sync::Arc<BindingRegistry>,
}

impl FunctionIndexer {
    pub fn new(registry: std::sync::Arc<BindingRegistry>) -> Self {
        Self { registry }
    }

    /// Build the definition of a single function, or all the errors found in it.
    pub fn index_function(&self, descriptor: &FunctionDescriptor) -> Result<FunctionDefinition, Vec<IndexError>> {
        let location = &descriptor.location;
        let mut errors = vec![];
        let error = |parameter: Option<&str>, kind: IndexErrorKind| IndexError::new(location, parameter, kind);

        let mut names = std::collections::HashSet::new();
        for parameter in &descriptor.parameters {
            if !names.insert(parameter.name.as_str()) {
                errors.push(error(
                    Some(&parameter.name),
                    IndexErrorKind::InvalidBinding("duplicate parameter name".to_string()),
                ));
            }
        }

        // Attributed parameters first: they determine which tokens exist.
        let mut bindings: Vec<Option<StaticBinding>> = vec![];
        for parameter in &descriptor.parameters {
            let Some(attribute) = &parameter.attribute else {
                bindings.push(None);
                continue;
            };
            let key = attribute.provider_key();
            match self.registry.get(key) {
                None => {
                    errors.push(error(
                        Some(&parameter.name),
                        IndexErrorKind::UnsupportedBindingKind(key.to_string()),
                    ));
                    bindings.push(None);
                }
                Some(provider) => match provider.create(&parameter.name, attribute) {
                    Ok(binding) => bindings.push(Some(binding)),
                    Err(kind) => {
                        errors.push(error(Some(&parameter.name), kind));
                        bindings.push(None);
                    }
                },
            }
        }

        let triggers: Vec<&StaticBinding> = bindings.iter().flatten().filter(|b| b.is_trigger).collect();
        if triggers.len() > 1 {
            errors.push(error(
                None,
                IndexErrorKind::MultipleTriggers(triggers.iter().map(|b| b.parameter_name.clone()).collect()),
            ));
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let produced: std::collections::BTreeSet<String> =
            triggers.iter().flat_map(|b| b.produced_tokens.iter().cloned()).collect();

        let mut trigger_parameter = None;
        let mut non_trigger_parameters = vec![];
        for (parameter, binding) in descriptor.parameters.iter().zip(bindings) {
            let binding = match binding {
                Some(binding) => binding,
                None if produced.contains(&parameter.name) => route_binding(&parameter.name),
                None => invoke_binding(&parameter.name),
            };
            if binding.is_trigger {
                trigger_parameter = Some(binding);
            } else {
                non_trigger_parameters.push(binding);
            }
        }

        let explicit: std::collections::BTreeSet<String> = non_trigger_parameters
            .iter()
            .filter(|b| matches!(b.spec, jobhost_api::binding::BindingSpec::Invoke))
            .flat_map(|b| b.produced_tokens.iter().cloned())
            .collect();
        // A single error per function, naming the first offending parameter.
        let mut unbound: Vec<String> = vec![];
        let mut first_parameter = None;
        for binding in &non_trigger_parameters {
            for token in binding.consumed_tokens() {
                if !produced.contains(&token) && !explicit.contains(&token) && !unbound.contains(&token) {
                    first_parameter.get_or_insert(binding.parameter_name.as_str());
                    unbound.push(token);
                }
            }
        }
        if !unbound.is_empty() {
            return Err(vec![error(first_parameter, IndexErrorKind::UnboundRouteToken(unbound))]);
        }

        Ok(FunctionDefinition {
            location: location.clone(),
            description: descriptor.description.clone(),
            trigger_parameter,
            non_trigger_parameters,
            flags: FunctionFlags {
                no_automatic_trigger: descriptor.no_automatic_trigger,
            },
        })
    }

    /// Index the candidates against the previous table content.
    ///
    /// Only modules that appear among the candidates are reconciled: an
    /// entry of such a module that was not indexed successfully this time
    /// is deleted. One bad function never prevents the others from being
    /// indexed.
    pub fn index(&self, candidates: &[FunctionDescriptor], previous: &[FunctionDefinition]) -> IndexResults {
        let mut results = IndexResults::default();

        let mut occurrences = std::collections::HashMap::<&FunctionLocation, usize>::new();
        for candidate in candidates {
            *occurrences.entry(&candidate.location).or_default() += 1;
        }

        let previous_by_id: std::collections::HashMap<String, &FunctionDefinition> =
            previous.iter().map(|d| (d.id(), d)).collect();
        let modules: std::collections::HashSet<&str> = candidates.iter().map(|c| c.location.module.as_str()).collect();
        let mut indexed = std::collections::HashSet::new();

        for candidate in candidates {
            if occurrences.get(&candidate.location).copied().unwrap_or_default() > 1 {
                results
                    .errors
                    .push(IndexError::new(&candidate.location, None, IndexErrorKind::DuplicateFunction));
                continue;
            }
            match self.index_function(candidate) {
                Ok(definition) => {
                    indexed.insert(definition.id());
                    match previous_by_id.get(&definition.id()) {
                        None => results.new_functions.push(definition),
                        Some(old) if **old != definition => results.updated_functions.push(definition),
                        Some(_) => {}
                    }
                }
                Err(errors) => results.errors.extend(errors),
            }
        }

        results.deleted_functions = previous
            .iter()
            .filter(|d| modules.contains(d.location.module.as_str()) && !indexed.contains(&d.id()))
            .cloned()
            .collect();

        for error in &results.errors {
            log::warn!("{}", error);
        }
        log::info!(
            "indexed {} candidates: {} new, {} updated, {} deleted, {} errors",
            candidates.len(),
            results.new_functions.len(),
            results.updated_functions.len(),
            results.deleted_functions.len(),
            results.errors.len()
        );
        results
    }

    /// Read the table, index the candidates against it and apply the result.
    pub async fn index_into(&self, candidates: &[FunctionDescriptor], table: &dyn FunctionTableStore) -> anyhow::Result<IndexResults> {
        let previous = table.read_all().await?;
        let results = self.index(candidates, &previous);
        results.apply(table).await?;
        Ok(results)
    }
}
