// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::binding::{BindingSpec, StaticBinding};
use jobhost_api::blob::{write_blob_or_create, BlobContent, BlobProperties};
use jobhost_api::errors::{BindError, StoreError};
use jobhost_api::function_location::FunctionLocation;
use jobhost_api::invoke::{BlobPath, BoundValue, FunctionInvokeRequest, MessageSource, TriggerReason, PARENT_ID_FIELD, PARENT_ID_METADATA};
use jobhost_api::queue::add_message_or_create;

use crate::stores::HostStores;

#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error("no body registered for {0}")]
    NoBody(FunctionLocation),
    #[error("function failed: {0:#}")]
    Function(anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InvocationError {
    /// Whether running the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            InvocationError::Bind(_) | InvocationError::NoBody(_) => false,
            InvocationError::Function(_) => true,
            InvocationError::Store(err) => err.is_transient(),
        }
    }
}

/// An argument opened for one invocation. Outputs stay pending until the
/// function returns successfully.
#[derive(Debug, Clone, PartialEq)]
enum ArgumentValue {
    BlobInput {
        content: BlobContent,
    },
    BlobOutput {
        path: BlobPath,
        pending: Option<Vec<u8>>,
    },
    Message {
        entity: String,
        message_id: String,
        content: String,
        dequeue_count: u32,
    },
    MessageOutput {
        source: MessageSource,
        entity: String,
        pending: Vec<Vec<u8>>,
    },
    Table {
        table_name: String,
        partition_key: Option<String>,
        row_key: Option<String>,
        entities: Vec<(String, serde_json::Value)>,
        pending: Vec<(String, String, serde_json::Value)>,
    },
    Timer {
        scheduled_utc: chrono::DateTime<chrono::Utc>,
    },
    Text(String),
    Custom {
        name: String,
        configuration: std::collections::BTreeMap<String, String>,
    },
}

/// What a job function sees of its arguments.
pub struct InvocationContext {
    invocation_id: uuid::Uuid,
    location: FunctionLocation,
    trigger_reason: TriggerReason,
    arguments: std::collections::BTreeMap<String, ArgumentValue>,
}

fn accepts(binding: &StaticBinding, value: &BoundValue) -> bool {
    match (&binding.spec, value) {
        (BindingSpec::Blob { .. }, BoundValue::Blob { .. }) => true,
        (BindingSpec::Queue { .. }, BoundValue::Message { source, .. } | BoundValue::MessageOutput { source, .. }) => {
            *source == MessageSource::Queue
        }
        (BindingSpec::ServiceBus { .. }, BoundValue::Message { source, .. } | BoundValue::MessageOutput { source, .. }) => {
            *source == MessageSource::ServiceBus
        }
        (BindingSpec::Table { .. }, BoundValue::Table { .. }) => true,
        (BindingSpec::Timer { .. }, BoundValue::Timer { .. }) => true,
        (BindingSpec::Route { .. } | BindingSpec::Invoke, BoundValue::Text { .. }) => true,
        (BindingSpec::Custom { name: expected, .. }, BoundValue::Custom { name, .. }) => expected == name,
        _ => false,
    }
}

impl InvocationContext {
    /// Open every parameter of the definition from the request arguments.
    pub(crate) async fn open(
        definition: &jobhost_api::binding::FunctionDefinition,
        request: &FunctionInvokeRequest,
        stores: &HostStores,
    ) -> Result<Self, InvocationError> {
        let mut arguments = std::collections::BTreeMap::new();
        for binding in definition.parameters() {
            let value = request
                .argument(&binding.parameter_name)
                .ok_or_else(|| BindError::MissingArgument {
                    parameter: binding.parameter_name.clone(),
                })?;
            if !accepts(binding, value) {
                return Err(BindError::TypeMismatch {
                    parameter: binding.parameter_name.clone(),
                    expected: binding.kind().to_string(),
                    actual: value.kind_name().to_string(),
                }
                .into());
            }
            arguments.insert(binding.parameter_name.clone(), Self::open_argument(value, stores).await?);
        }
        Ok(Self {
            invocation_id: request.id,
            location: request.location.clone(),
            trigger_reason: request.trigger_reason.clone(),
            arguments,
        })
    }

    async fn open_argument(value: &BoundValue, stores: &HostStores) -> Result<ArgumentValue, InvocationError> {
        let argument = match value {
            BoundValue::Blob { path, access, .. } => match access {
                jobhost_api::binding::BlobAccess::Read => match stores.blob.open_read(path).await {
                    Ok(content) => ArgumentValue::BlobInput { content },
                    Err(StoreError::BlobNotFound(_)) | Err(StoreError::ContainerNotFound(_)) => {
                        return Err(BindError::ResourceNotFound { resource: path.to_string() }.into())
                    }
                    Err(err) => return Err(err.into()),
                },
                jobhost_api::binding::BlobAccess::Write => ArgumentValue::BlobOutput {
                    path: path.clone(),
                    pending: None,
                },
            },
            BoundValue::Message {
                entity,
                message_id,
                content,
                dequeue_count,
                ..
            } => ArgumentValue::Message {
                entity: entity.clone(),
                message_id: message_id.clone(),
                content: content.clone(),
                dequeue_count: *dequeue_count,
            },
            BoundValue::MessageOutput { source, entity, .. } => ArgumentValue::MessageOutput {
                source: *source,
                entity: entity.clone(),
                pending: vec![],
            },
            BoundValue::Table {
                table_name,
                partition_key,
                row_key,
                ..
            } => {
                let entities = match (partition_key, row_key) {
                    (Some(partition_key), Some(row_key)) => stores
                        .table
                        .retrieve(table_name, partition_key, row_key)
                        .await?
                        .map(|entity| vec![(row_key.clone(), entity)])
                        .unwrap_or_default(),
                    (Some(partition_key), None) => stores.table.query_partition(table_name, partition_key).await?,
                    _ => vec![],
                };
                ArgumentValue::Table {
                    table_name: table_name.clone(),
                    partition_key: partition_key.clone(),
                    row_key: row_key.clone(),
                    entities,
                    pending: vec![],
                }
            }
            BoundValue::Timer { scheduled_utc, .. } => ArgumentValue::Timer {
                scheduled_utc: *scheduled_utc,
            },
            BoundValue::Text { value } => ArgumentValue::Text(value.clone()),
            BoundValue::Custom { name, configuration } => ArgumentValue::Custom {
                name: name.clone(),
                configuration: configuration.clone(),
            },
        };
        Ok(argument)
    }

    pub fn invocation_id(&self) -> uuid::Uuid {
        self.invocation_id
    }

    pub fn location(&self) -> &FunctionLocation {
        &self.location
    }

    pub fn trigger_reason(&self) -> &TriggerReason {
        &self.trigger_reason
    }

    fn argument(&self, name: &str) -> anyhow::Result<&ArgumentValue> {
        self.arguments
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("{} has no parameter '{}'", self.location, name))
    }

    fn argument_mut(&mut self, name: &str) -> anyhow::Result<&mut ArgumentValue> {
        let location = &self.location;
        self.arguments
            .get_mut(name)
            .ok_or_else(|| anyhow::anyhow!("{} has no parameter '{}'", location, name))
    }

    /// Content of a blob input, a trigger message or a text parameter.
    pub fn bytes(&self, name: &str) -> anyhow::Result<&[u8]> {
        match self.argument(name)? {
            ArgumentValue::BlobInput { content } => Ok(&content.data),
            ArgumentValue::Message { content, .. } => Ok(content.as_bytes()),
            ArgumentValue::Text(value) => Ok(value.as_bytes()),
            _ => anyhow::bail!("parameter '{}' cannot be read", name),
        }
    }

    pub fn text(&self, name: &str) -> anyhow::Result<&str> {
        Ok(std::str::from_utf8(self.bytes(name)?)?)
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        Ok(serde_json::from_slice(self.bytes(name)?)?)
    }

    pub fn blob_path(&self, name: &str) -> anyhow::Result<&BlobPath> {
        match self.argument(name)? {
            ArgumentValue::BlobInput { content } => Ok(&content.properties.path),
            ArgumentValue::BlobOutput { path, .. } => Ok(path),
            _ => anyhow::bail!("parameter '{}' is not a blob", name),
        }
    }

    /// Identifier and dequeue count of a trigger message.
    pub fn message_info(&self, name: &str) -> anyhow::Result<(&str, &str, u32)> {
        match self.argument(name)? {
            ArgumentValue::Message {
                entity,
                message_id,
                dequeue_count,
                ..
            } => Ok((entity, message_id, *dequeue_count)),
            _ => anyhow::bail!("parameter '{}' is not a trigger message", name),
        }
    }

    /// Replace the content the blob output will be written with.
    pub fn write_blob(&mut self, name: &str, data: Vec<u8>) -> anyhow::Result<()> {
        match self.argument_mut(name)? {
            ArgumentValue::BlobOutput { pending, .. } => {
                *pending = Some(data);
                Ok(())
            }
            _ => anyhow::bail!("parameter '{}' is not a blob output", name),
        }
    }

    pub fn send_message(&mut self, name: &str, content: Vec<u8>) -> anyhow::Result<()> {
        match self.argument_mut(name)? {
            ArgumentValue::MessageOutput { pending, .. } => {
                pending.push(content);
                Ok(())
            }
            _ => anyhow::bail!("parameter '{}' is not a message output", name),
        }
    }

    pub fn send_json<T: serde::Serialize>(&mut self, name: &str, value: &T) -> anyhow::Result<()> {
        let content = serde_json::to_vec(value)?;
        self.send_message(name, content)
    }

    /// The entity addressed by bound partition and row keys, if it exists.
    pub fn table_entity(&self, name: &str) -> anyhow::Result<Option<&serde_json::Value>> {
        match self.argument(name)? {
            ArgumentValue::Table {
                row_key: Some(_), entities, ..
            } => Ok(entities.first().map(|(_, entity)| entity)),
            ArgumentValue::Table { .. } => anyhow::bail!("parameter '{}' has no row key", name),
            _ => anyhow::bail!("parameter '{}' is not a table", name),
        }
    }

    /// Entities of the bound partition, sorted by row key.
    pub fn table_rows(&self, name: &str) -> anyhow::Result<&[(String, serde_json::Value)]> {
        match self.argument(name)? {
            ArgumentValue::Table { entities, .. } => Ok(entities),
            _ => anyhow::bail!("parameter '{}' is not a table", name),
        }
    }

    /// Queue an entity for upsert, defaulting to the bound keys.
    pub fn upsert_entity(
        &mut self,
        name: &str,
        partition_key: Option<&str>,
        row_key: Option<&str>,
        entity: serde_json::Value,
    ) -> anyhow::Result<()> {
        match self.argument_mut(name)? {
            ArgumentValue::Table {
                partition_key: bound_partition_key,
                row_key: bound_row_key,
                pending,
                ..
            } => {
                let partition_key = partition_key
                    .map(|k| k.to_string())
                    .or_else(|| bound_partition_key.clone())
                    .ok_or_else(|| anyhow::anyhow!("no partition key for parameter '{}'", name))?;
                let row_key = row_key
                    .map(|k| k.to_string())
                    .or_else(|| bound_row_key.clone())
                    .ok_or_else(|| anyhow::anyhow!("no row key for parameter '{}'", name))?;
                pending.push((partition_key, row_key, entity));
                Ok(())
            }
            _ => anyhow::bail!("parameter '{}' is not a table", name),
        }
    }

    pub fn scheduled_time(&self, name: &str) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
        match self.argument(name)? {
            ArgumentValue::Timer { scheduled_utc } => Ok(*scheduled_utc),
            _ => anyhow::bail!("parameter '{}' is not a timer", name),
        }
    }

    pub fn custom(&self, name: &str) -> anyhow::Result<(&str, &std::collections::BTreeMap<String, String>)> {
        match self.argument(name)? {
            ArgumentValue::Custom { name, configuration } => Ok((name, configuration)),
            _ => anyhow::bail!("parameter '{}' is not a custom binding", name),
        }
    }

    /// Write the pending outputs, stamped with this invocation's id.
    /// Returns the blobs written.
    pub(crate) async fn flush(self, stores: &HostStores) -> Result<Vec<BlobProperties>, StoreError> {
        let parent_id = self.invocation_id.to_string();
        let mut written = vec![];
        for argument in self.arguments.into_values() {
            match argument {
                ArgumentValue::BlobOutput { path, pending: Some(data) } => {
                    let metadata = std::collections::BTreeMap::from([(PARENT_ID_METADATA.to_string(), parent_id.clone())]);
                    written.push(write_blob_or_create(stores.blob.as_ref(), &path, data, metadata).await?);
                }
                ArgumentValue::MessageOutput { source, entity, pending } => {
                    let store = match source {
                        MessageSource::Queue => stores.queue.clone(),
                        MessageSource::ServiceBus => stores
                            .service_bus
                            .clone()
                            .ok_or_else(|| StoreError::Backend("no service bus store configured".to_string()))?,
                    };
                    for content in pending {
                        add_message_or_create(store.as_ref(), &entity, with_parent_id(content, &parent_id)).await?;
                    }
                }
                ArgumentValue::Table { table_name, pending, .. } => {
                    for (partition_key, row_key, entity) in pending {
                        stores.table.upsert(&table_name, &partition_key, &row_key, entity).await?;
                    }
                }
                _ => {}
            }
        }
        Ok(written)
    }
}

/// Stamp the parent invocation id into a JSON object message. Any other
/// content is returned unchanged.
pub fn with_parent_id(content: Vec<u8>, parent_id: &str) -> Vec<u8> {
    match serde_json::from_slice::<serde_json::Value>(&content) {
        Ok(serde_json::Value::Object(mut object)) => {
            object.insert(PARENT_ID_FIELD.to_string(), serde_json::Value::String(parent_id.to_string()));
            serde_json::to_vec(&object).unwrap_or(content)
        }
        _ => content,
    }
}

/// The parent invocation id stamped into a message, if any.
pub fn parent_id_of(content: &[u8]) -> Option<uuid::Uuid> {
    let value = serde_json::from_slice::<serde_json::Value>(content).ok()?;
    value.get(PARENT_ID_FIELD)?.as_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_id_only_in_json_objects() {
        let parent = uuid::Uuid::new_v4();
        let stamped = with_parent_id(br#"{"name":"a.txt"}"#.to_vec(), &parent.to_string());
        assert_eq!(Some(parent), parent_id_of(&stamped));
        let value: serde_json::Value = serde_json::from_slice(&stamped).unwrap();
        assert_eq!("a.txt", value["name"]);

        assert_eq!(b"plain text".to_vec(), with_parent_id(b"plain text".to_vec(), &parent.to_string()));
        assert_eq!(b"[1,2]".to_vec(), with_parent_id(b"[1,2]".to_vec(), &parent.to_string()));
        assert_eq!(None, parent_id_of(b"plain text"));
        assert_eq!(None, parent_id_of(br#"{"$JobHostParentId":"not-a-uuid"}"#));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(InvocationError::Function(anyhow::anyhow!("boom")).is_retryable());
        assert!(InvocationError::Store(StoreError::Timeout).is_retryable());
        assert!(!InvocationError::Store(StoreError::BlobNotFound("a/b".to_string())).is_retryable());
        assert!(!InvocationError::Bind(BindError::MissingArgument {
            parameter: "x".to_string()
        })
        .is_retryable());
    }
}
