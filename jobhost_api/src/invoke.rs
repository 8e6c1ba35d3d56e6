// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use crate::binding::BlobAccess;
use crate::errors::FormatError;
use crate::function_location::FunctionLocation;
use crate::path_template::{validate_blob_name, validate_container_name, TokenValues};

/// Name of the JSON field and blob metadata key carrying the id of the
/// invocation that produced a message or blob.
pub const PARENT_ID_FIELD: &str = "$JobHostParentId";
pub const PARENT_ID_METADATA: &str = "JobHostParentId";

/// Concrete location of a blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct BlobPath {
    pub container: String,
    pub blob_name: String,
}

impl BlobPath {
    pub fn new(container: &str, blob_name: &str) -> Self {
        Self {
            container: container.to_string(),
            blob_name: blob_name.to_string(),
        }
    }

    pub fn parse(value: &str) -> Result<Self, FormatError> {
        let (container, blob_name) = value.split_once('/').ok_or_else(|| FormatError::InvalidBlobName {
            name: value.to_string(),
            reason: "expected 'container/blob'".to_string(),
        })?;
        validate_container_name(container)?;
        validate_blob_name(blob_name)?;
        Ok(Self::new(container, blob_name))
    }
}

impl std::fmt::Display for BlobPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.container, self.blob_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    Queue,
    ServiceBus,
}

impl std::fmt::Display for MessageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageSource::Queue => write!(f, "queue"),
            MessageSource::ServiceBus => write!(f, "service bus"),
        }
    }
}

/// Event that caused an invocation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum TriggerCause {
    NewBlob { blob_path: String },
    NewQueueMessage { queue_name: String, message_id: String },
    NewServiceBusMessage { entity_path: String, message_id: String },
    Timer { scheduled_utc: chrono::DateTime<chrono::Utc> },
    Manual,
}

/// Why a function instance ran. Parent and child ids are diagnostic only.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TriggerReason {
    pub cause: TriggerCause,
    #[serde(default)]
    pub parent_guid: Option<uuid::Uuid>,
    #[serde(default)]
    pub child_guid: Option<uuid::Uuid>,
}

impl TriggerReason {
    pub fn new(cause: TriggerCause) -> Self {
        Self {
            cause,
            parent_guid: None,
            child_guid: None,
        }
    }

    pub fn manual() -> Self {
        Self::new(TriggerCause::Manual)
    }

    pub fn with_parent(mut self, parent_guid: Option<uuid::Uuid>) -> Self {
        self.parent_guid = parent_guid;
        self
    }
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            TriggerCause::NewBlob { blob_path } => write!(f, "new blob detected: {}", blob_path)?,
            TriggerCause::NewQueueMessage { queue_name, message_id } => {
                write!(f, "new queue message {} on {}", message_id, queue_name)?
            }
            TriggerCause::NewServiceBusMessage { entity_path, message_id } => {
                write!(f, "new service bus message {} on {}", message_id, entity_path)?
            }
            TriggerCause::Timer { scheduled_utc } => write!(f, "timer fired, scheduled at {}", scheduled_utc)?,
            TriggerCause::Manual => write!(f, "manual invocation")?,
        }
        if let Some(parent) = &self.parent_guid {
            write!(f, " (parent {})", parent)?;
        }
        Ok(())
    }
}

/// Resolved, serializable description of one argument. Resources are
/// opened by the consumer, never here.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoundValue {
    Blob {
        connection: String,
        path: BlobPath,
        access: BlobAccess,
    },
    Message {
        connection: String,
        source: MessageSource,
        entity: String,
        message_id: String,
        content: String,
        dequeue_count: u32,
    },
    MessageOutput {
        connection: String,
        source: MessageSource,
        entity: String,
    },
    Table {
        connection: String,
        table_name: String,
        #[serde(default)]
        partition_key: Option<String>,
        #[serde(default)]
        row_key: Option<String>,
    },
    Timer {
        scheduled_utc: chrono::DateTime<chrono::Utc>,
        interval_secs: u64,
    },
    Text {
        value: String,
    },
    Custom {
        name: String,
        #[serde(default)]
        configuration: std::collections::BTreeMap<String, String>,
    },
}

impl BoundValue {
    /// Short name of the value kind, used in type mismatch errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            BoundValue::Blob { .. } => "blob",
            BoundValue::Message { .. } => "message",
            BoundValue::MessageOutput { .. } => "message output",
            BoundValue::Table { .. } => "table",
            BoundValue::Timer { .. } => "timer",
            BoundValue::Text { .. } => "text",
            BoundValue::Custom { .. } => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoundArgument {
    pub parameter_name: String,
    pub value: BoundValue,
}

/// Unit of dispatch, carried as JSON through the dispatch queue.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionInvokeRequest {
    pub id: uuid::Uuid,
    pub location: FunctionLocation,
    #[serde(default)]
    pub arguments: Vec<BoundArgument>,
    pub trigger_reason: TriggerReason,
    pub enqueued_at_utc: chrono::DateTime<chrono::Utc>,
}

impl FunctionInvokeRequest {
    pub fn new(location: FunctionLocation, arguments: Vec<BoundArgument>, trigger_reason: TriggerReason) -> Self {
        let id = uuid::Uuid::new_v4();
        Self {
            id,
            location,
            arguments,
            trigger_reason: TriggerReason {
                child_guid: Some(id),
                ..trigger_reason
            },
            enqueued_at_utc: chrono::Utc::now(),
        }
    }

    pub fn argument(&self, parameter_name: &str) -> Option<&BoundValue> {
        self.arguments.iter().find(|a| a.parameter_name == parameter_name).map(|a| &a.value)
    }

    pub fn to_payload(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a payload; fields unknown to this version are ignored.
    pub fn from_payload(payload: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Raw event delivered by a trigger listener.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerPayload {
    Blob {
        path: BlobPath,
    },
    Message {
        source: MessageSource,
        entity: String,
        message_id: String,
        content: Vec<u8>,
        dequeue_count: u32,
    },
    Timer {
        scheduled_utc: chrono::DateTime<chrono::Utc>,
    },
}

/// Names of the accounts the bound resources live in.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConnectionContext {
    pub storage: String,
    #[serde(default)]
    pub service_bus: Option<String>,
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self {
            storage: "default".to_string(),
            service_bus: None,
        }
    }
}

/// Per-invocation context given to the runtime binder. Never shared
/// between invocations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeBindingInputs {
    pub trigger: Option<TriggerPayload>,
    /// Values supplied explicitly, by parameter or token name.
    pub arguments: TokenValues,
    pub connection: ConnectionContext,
}

impl RuntimeBindingInputs {
    pub fn from_trigger(trigger: TriggerPayload, connection: &ConnectionContext) -> Self {
        Self {
            trigger: Some(trigger),
            arguments: TokenValues::new(),
            connection: connection.clone(),
        }
    }

    pub fn from_arguments(arguments: TokenValues, connection: &ConnectionContext) -> Self {
        Self {
            trigger: None,
            arguments,
            connection: connection.clone(),
        }
    }
}
