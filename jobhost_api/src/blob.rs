// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use crate::errors::StoreError;
use crate::invoke::BlobPath;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    pub path: BlobPath,
    pub last_modified: chrono::DateTime<chrono::Utc>,
    pub etag: String,
    pub metadata: std::collections::BTreeMap<String, String>,
}

/// One page of a container listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobListing {
    pub entries: Vec<BlobProperties>,
    /// Marker to resume the listing from, `None` once the end is reached.
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobContent {
    pub data: Vec<u8>,
    pub properties: BlobProperties,
}

/// Writes recorded since a change log cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogPage {
    pub entries: Vec<BlobProperties>,
    pub cursor: String,
}

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn create_container_if_not_exists(&self, container: &str) -> Result<(), StoreError>;

    /// List one page of blobs whose name starts with `prefix`, resuming after `cursor`.
    async fn list(&self, container: &str, prefix: &str, cursor: Option<String>) -> Result<BlobListing, StoreError>;

    async fn open_read(&self, path: &BlobPath) -> Result<BlobContent, StoreError>;

    async fn open_write(
        &self,
        path: &BlobPath,
        data: Vec<u8>,
        metadata: std::collections::BTreeMap<String, String>,
    ) -> Result<BlobProperties, StoreError>;

    /// Writes since `cursor` (from the beginning if `None`), or `None` if the
    /// store keeps no change log.
    async fn read_change_log(&self, _cursor: Option<String>) -> Result<Option<ChangeLogPage>, StoreError> {
        Ok(None)
    }
}

/// Write a blob, creating its container and retrying once if it is missing.
pub async fn write_blob_or_create(
    store: &dyn BlobStore,
    path: &BlobPath,
    data: Vec<u8>,
    metadata: std::collections::BTreeMap<String, String>,
) -> Result<BlobProperties, StoreError> {
    match store.open_write(path, data.clone(), metadata.clone()).await {
        Err(StoreError::ContainerNotFound(_)) => {
            store.create_container_if_not_exists(&path.container).await?;
            store.open_write(path, data, metadata).await
        }
        res => res,
    }
}
