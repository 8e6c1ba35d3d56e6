// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use crate::function_location::FunctionLocation;
use crate::path_template::PathTemplate;

/// Identifier of a binding kind, the key of the binding dispatch table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingKind {
    Blob,
    Queue,
    ServiceBus,
    Table,
    Timer,
    Route,
    Invoke,
    Custom(String),
}

impl BindingKind {
    pub fn key(&self) -> &str {
        match self {
            BindingKind::Blob => "blob",
            BindingKind::Queue => "queue",
            BindingKind::ServiceBus => "service_bus",
            BindingKind::Table => "table",
            BindingKind::Timer => "timer",
            BindingKind::Route => "route",
            BindingKind::Invoke => "invoke",
            BindingKind::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for BindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobAccess {
    Read,
    Write,
}

/// Kind-specific part of a static binding.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "binding", rename_all = "snake_case")]
pub enum BindingSpec {
    Blob {
        path: PathTemplate,
        access: BlobAccess,
    },
    Queue {
        queue_name: PathTemplate,
        #[serde(default)]
        payload_tokens: Vec<String>,
    },
    ServiceBus {
        entity_path: PathTemplate,
        #[serde(default)]
        payload_tokens: Vec<String>,
    },
    Table {
        table_name: PathTemplate,
        #[serde(default)]
        partition_key: Option<PathTemplate>,
        #[serde(default)]
        row_key: Option<PathTemplate>,
    },
    Timer {
        interval_secs: u64,
        #[serde(default)]
        run_on_startup: bool,
    },
    Route {
        token: String,
    },
    Invoke,
    Custom {
        name: String,
        #[serde(default)]
        configuration: std::collections::BTreeMap<String, PathTemplate>,
    },
}

impl BindingSpec {
    pub fn kind(&self) -> BindingKind {
        match self {
            BindingSpec::Blob { .. } => BindingKind::Blob,
            BindingSpec::Queue { .. } => BindingKind::Queue,
            BindingSpec::ServiceBus { .. } => BindingKind::ServiceBus,
            BindingSpec::Table { .. } => BindingKind::Table,
            BindingSpec::Timer { .. } => BindingKind::Timer,
            BindingSpec::Route { .. } => BindingKind::Route,
            BindingSpec::Invoke => BindingKind::Invoke,
            BindingSpec::Custom { name, .. } => BindingKind::Custom(name.clone()),
        }
    }

    /// All templates carried by this binding.
    pub fn templates(&self) -> Vec<&PathTemplate> {
        match self {
            BindingSpec::Blob { path, .. } => vec![path],
            BindingSpec::Queue { queue_name, .. } => vec![queue_name],
            BindingSpec::ServiceBus { entity_path, .. } => vec![entity_path],
            BindingSpec::Table {
                table_name,
                partition_key,
                row_key,
            } => std::iter::once(table_name).chain(partition_key.iter()).chain(row_key.iter()).collect(),
            BindingSpec::Custom { configuration, .. } => configuration.values().collect(),
            BindingSpec::Timer { .. } | BindingSpec::Route { .. } | BindingSpec::Invoke => vec![],
        }
    }
}

/// Index-time descriptor of one parameter. Immutable once built.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StaticBinding {
    pub parameter_name: String,
    pub is_input: bool,
    pub is_trigger: bool,
    #[serde(default)]
    pub produced_tokens: std::collections::BTreeSet<String>,
    pub spec: BindingSpec,
}

impl StaticBinding {
    pub fn kind(&self) -> BindingKind {
        self.spec.kind()
    }

    pub fn path_template(&self) -> Option<&PathTemplate> {
        match &self.spec {
            BindingSpec::Blob { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Tokens that must be known before this parameter can be bound.
    ///
    /// A trigger binding produces its tokens instead of consuming them.
    pub fn consumed_tokens(&self) -> std::collections::BTreeSet<String> {
        if self.is_trigger {
            return std::collections::BTreeSet::new();
        }
        let mut tokens: std::collections::BTreeSet<String> = self
            .spec
            .templates()
            .into_iter()
            .flat_map(|t| t.tokens().map(|t| t.to_string()).collect::<Vec<_>>())
            .collect();
        if let BindingSpec::Route { token } = &self.spec {
            tokens.insert(token.clone());
        }
        tokens
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FunctionFlags {
    #[serde(default)]
    pub no_automatic_trigger: bool,
}

/// A validated function, as stored in the function table.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionDefinition {
    pub location: FunctionLocation,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub trigger_parameter: Option<StaticBinding>,
    #[serde(default)]
    pub non_trigger_parameters: Vec<StaticBinding>,
    #[serde(default)]
    pub flags: FunctionFlags,
}

impl FunctionDefinition {
    /// Key of the definition in the function table.
    pub fn id(&self) -> String {
        self.location.to_string()
    }

    /// Whether a trigger listener fires this function on its own.
    pub fn listens_automatically(&self) -> bool {
        self.trigger_parameter.is_some() && !self.flags.no_automatic_trigger
    }

    /// Trigger parameter first, then the others in declaration order.
    pub fn parameters(&self) -> impl Iterator<Item = &StaticBinding> {
        self.trigger_parameter.iter().chain(self.non_trigger_parameters.iter())
    }

    pub fn parameter(&self, name: &str) -> Option<&StaticBinding> {
        self.parameters().find(|p| p.parameter_name == name)
    }
}
