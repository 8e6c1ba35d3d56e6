// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::function_descriptor::{FunctionDescriptor, FunctionManifest};
use jobhost_api::function_location::FunctionLocation;

use crate::dispatch::invocation::InvocationContext;

/// Body of a job function.
///
/// Returning an error marks the invocation as failed; the outputs written
/// through the context are then discarded.
#[async_trait::async_trait]
pub trait JobFunction: Send + Sync {
    async fn run(&self, context: &mut InvocationContext) -> anyhow::Result<()>;
}

/// Functions known to this host: descriptors to index and bodies to run.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    descriptors: std::collections::BTreeMap<FunctionLocation, FunctionDescriptor>,
    bodies: std::collections::HashMap<FunctionLocation, std::sync::Arc<dyn JobFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: FunctionDescriptor, body: std::sync::Arc<dyn JobFunction>) -> &mut Self {
        self.bodies.insert(descriptor.location.clone(), body);
        self.descriptors.insert(descriptor.location.clone(), descriptor);
        self
    }

    /// Attach a body to a function whose descriptor comes from elsewhere,
    /// e.g., a manifest.
    pub fn register_body(&mut self, location: FunctionLocation, body: std::sync::Arc<dyn JobFunction>) -> &mut Self {
        self.bodies.insert(location, body);
        self
    }

    /// Add the descriptors of a manifest, replacing those with the same location.
    pub fn add_manifest(&mut self, manifest: FunctionManifest) -> &mut Self {
        for descriptor in manifest.functions {
            if self.descriptors.contains_key(&descriptor.location) {
                log::warn!("function {} declared in the manifest replaces a registered one", descriptor.location);
            }
            self.descriptors.insert(descriptor.location.clone(), descriptor);
        }
        self
    }

    pub fn descriptors(&self) -> Vec<FunctionDescriptor> {
        self.descriptors.values().cloned().collect()
    }

    pub fn body(&self, location: &FunctionLocation) -> Option<std::sync::Arc<dyn JobFunction>> {
        self.bodies.get(location).cloned()
    }

    pub fn has_body(&self, location: &FunctionLocation) -> bool {
        self.bodies.contains_key(location)
    }

    /// Locations declared without a body.
    pub fn missing_bodies(&self) -> Vec<FunctionLocation> {
        self.descriptors.keys().filter(|l| !self.bodies.contains_key(l)).cloned().collect()
    }
}
