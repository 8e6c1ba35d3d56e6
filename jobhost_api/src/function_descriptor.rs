// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use crate::function_location::FunctionLocation;

/// Binding declared on a parameter of a candidate function.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "binding", rename_all = "snake_case")]
pub enum BindingAttribute {
    BlobTrigger {
        path: String,
    },
    BlobInput {
        path: String,
    },
    BlobOutput {
        path: String,
    },
    QueueTrigger {
        queue_name: String,
        #[serde(default)]
        payload_tokens: Vec<String>,
    },
    QueueOutput {
        queue_name: String,
    },
    ServiceBusTrigger {
        entity_path: String,
        #[serde(default)]
        payload_tokens: Vec<String>,
    },
    ServiceBusOutput {
        entity_path: String,
    },
    Table {
        table_name: String,
        #[serde(default)]
        partition_key: Option<String>,
        #[serde(default)]
        row_key: Option<String>,
    },
    TimerTrigger {
        interval_secs: u64,
        #[serde(default)]
        run_on_startup: bool,
    },
    Custom {
        name: String,
        #[serde(default)]
        is_input: bool,
        #[serde(default)]
        configuration: std::collections::BTreeMap<String, String>,
    },
}

impl BindingAttribute {
    /// Key of the binding provider responsible for this attribute.
    pub fn provider_key(&self) -> &str {
        match self {
            BindingAttribute::BlobTrigger { .. } | BindingAttribute::BlobInput { .. } | BindingAttribute::BlobOutput { .. } => "blob",
            BindingAttribute::QueueTrigger { .. } | BindingAttribute::QueueOutput { .. } => "queue",
            BindingAttribute::ServiceBusTrigger { .. } | BindingAttribute::ServiceBusOutput { .. } => "service_bus",
            BindingAttribute::Table { .. } => "table",
            BindingAttribute::TimerTrigger { .. } => "timer",
            BindingAttribute::Custom { name, .. } => name,
        }
    }

    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            BindingAttribute::BlobTrigger { .. }
                | BindingAttribute::QueueTrigger { .. }
                | BindingAttribute::ServiceBusTrigger { .. }
                | BindingAttribute::TimerTrigger { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    #[serde(default)]
    pub attribute: Option<BindingAttribute>,
}

impl ParameterDescriptor {
    pub fn new(name: &str, attribute: BindingAttribute) -> Self {
        Self {
            name: name.to_string(),
            attribute: Some(attribute),
        }
    }

    /// Parameter without attribute: a route or invoke parameter.
    pub fn plain(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attribute: None,
        }
    }
}

/// Candidate function as declared by its author, before indexing.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionDescriptor {
    pub location: FunctionLocation,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub no_automatic_trigger: bool,
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
}

impl FunctionDescriptor {
    pub fn new(location: FunctionLocation) -> Self {
        Self {
            location,
            description: None,
            no_automatic_trigger: false,
            parameters: vec![],
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }
}

/// A set of candidate functions loaded from a file.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionManifest {
    #[serde(default)]
    pub functions: Vec<FunctionDescriptor>,
}

impl FunctionManifest {
    /// Load a manifest, in TOML or JSON depending on the file extension.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if path.ends_with(".json") {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }
}
