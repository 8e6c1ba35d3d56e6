// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::blob::{BlobContent, BlobListing, BlobProperties, BlobStore, ChangeLogPage};
use jobhost_api::errors::StoreError;
use jobhost_api::invoke::BlobPath;

const DEFAULT_PAGE_SIZE: usize = 100;

/// Blob store in memory, listing in name order and optionally keeping a
/// change log of all the writes.
#[derive(Clone)]
pub struct MemoryBlobStore {
    inner: std::sync::Arc<tokio::sync::Mutex<MemoryBlobStoreInner>>,
    page_size: usize,
}

#[derive(Default)]
struct MemoryBlobStoreInner {
    containers: std::collections::HashMap<String, std::collections::BTreeMap<String, BlobContent>>,
    change_log: Option<Vec<BlobProperties>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(tokio::sync::Mutex::new(MemoryBlobStoreInner {
                containers: std::collections::HashMap::new(),
                change_log: Some(vec![]),
            })),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// A store that can only be scanned by listing.
    pub fn without_change_log() -> Self {
        Self {
            inner: std::sync::Arc::new(tokio::sync::Mutex::new(MemoryBlobStoreInner::default())),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Names of all the blobs in a container.
    pub async fn blob_names(&self, container: &str) -> Vec<String> {
        match self.inner.lock().await.containers.get(container) {
            Some(blobs) => blobs.keys().cloned().collect(),
            None => vec![],
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn create_container_if_not_exists(&self, container: &str) -> Result<(), StoreError> {
        self.inner.lock().await.containers.entry(container.to_string()).or_default();
        Ok(())
    }

    async fn list(&self, container: &str, prefix: &str, cursor: Option<String>) -> Result<BlobListing, StoreError> {
        let inner = self.inner.lock().await;
        let blobs = inner
            .containers
            .get(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        let lower = match cursor {
            Some(cursor) => std::ops::Bound::Excluded(cursor),
            None => std::ops::Bound::Included(prefix.to_string()),
        };
        let mut entries: Vec<BlobProperties> = blobs
            .range((lower, std::ops::Bound::Unbounded))
            .filter(|(name, _)| name.starts_with(prefix))
            .take(self.page_size + 1)
            .map(|(_, blob)| blob.properties.clone())
            .collect();
        let next_cursor = match entries.len() > self.page_size {
            true => {
                entries.truncate(self.page_size);
                entries.last().map(|e| e.path.blob_name.clone())
            }
            false => None,
        };
        Ok(BlobListing { entries, next_cursor })
    }

    async fn open_read(&self, path: &BlobPath) -> Result<BlobContent, StoreError> {
        let inner = self.inner.lock().await;
        let blobs = inner
            .containers
            .get(&path.container)
            .ok_or_else(|| StoreError::ContainerNotFound(path.container.clone()))?;
        blobs
            .get(&path.blob_name)
            .cloned()
            .ok_or_else(|| StoreError::BlobNotFound(path.to_string()))
    }

    async fn open_write(
        &self,
        path: &BlobPath,
        data: Vec<u8>,
        metadata: std::collections::BTreeMap<String, String>,
    ) -> Result<BlobProperties, StoreError> {
        let mut inner = self.inner.lock().await;
        let properties = BlobProperties {
            path: path.clone(),
            last_modified: chrono::Utc::now(),
            etag: uuid::Uuid::new_v4().to_string(),
            metadata,
        };
        inner
            .containers
            .get_mut(&path.container)
            .ok_or_else(|| StoreError::ContainerNotFound(path.container.clone()))?
            .insert(
                path.blob_name.clone(),
                BlobContent {
                    data,
                    properties: properties.clone(),
                },
            );
        if let Some(change_log) = &mut inner.change_log {
            change_log.push(properties.clone());
        }
        Ok(properties)
    }

    async fn read_change_log(&self, cursor: Option<String>) -> Result<Option<ChangeLogPage>, StoreError> {
        let inner = self.inner.lock().await;
        let Some(change_log) = &inner.change_log else {
            return Ok(None);
        };
        let start = match cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| StoreError::Backend(format!("invalid change log cursor '{}'", cursor)))?,
            None => 0,
        };
        Ok(Some(ChangeLogPage {
            entries: change_log.iter().skip(start).cloned().collect(),
            cursor: change_log.len().to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with(names: &[&str], page_size: usize) -> MemoryBlobStore {
        let store = MemoryBlobStore::without_change_log().with_page_size(page_size);
        store.create_container_if_not_exists("input").await.unwrap();
        for name in names {
            store
                .open_write(&BlobPath::new("input", name), name.as_bytes().to_vec(), Default::default())
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_list_resumes_from_cursor() {
        let store = store_with(&["a/1", "a/2", "a/3", "b/1", "a/4"], 2).await;
        let mut names = vec![];
        let mut cursor = None;
        let mut pages = 0;
        loop {
            let listing = store.list("input", "a/", cursor).await.unwrap();
            pages += 1;
            names.extend(listing.entries.into_iter().map(|e| e.path.blob_name));
            cursor = listing.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
        assert_eq!(vec!["a/1", "a/2", "a/3", "a/4"], names);
        assert_eq!(2, pages);
    }

    #[tokio::test]
    async fn test_read_write() {
        let store = store_with(&[], 10).await;
        let path = BlobPath::new("input", "x.txt");
        assert_eq!(Err(StoreError::BlobNotFound("input/x.txt".to_string())), store.open_read(&path).await);
        let metadata = std::collections::BTreeMap::from([("k".to_string(), "v".to_string())]);
        store.open_write(&path, b"hello".to_vec(), metadata.clone()).await.unwrap();
        let content = store.open_read(&path).await.unwrap();
        assert_eq!(b"hello".to_vec(), content.data);
        assert_eq!(metadata, content.properties.metadata);
        assert!(matches!(
            store.open_write(&BlobPath::new("missing", "x"), vec![], Default::default()).await,
            Err(StoreError::ContainerNotFound(_))
        ));
        assert_eq!(None, store.read_change_log(None).await.unwrap());
    }

    #[tokio::test]
    async fn test_change_log() {
        let store = MemoryBlobStore::new();
        store.create_container_if_not_exists("input").await.unwrap();
        store.open_write(&BlobPath::new("input", "a"), vec![], Default::default()).await.unwrap();
        let page = store.read_change_log(None).await.unwrap().unwrap();
        assert_eq!(1, page.entries.len());

        store.open_write(&BlobPath::new("input", "b"), vec![], Default::default()).await.unwrap();
        let page = store.read_change_log(Some(page.cursor)).await.unwrap().unwrap();
        assert_eq!(vec![BlobPath::new("input", "b")], page.entries.iter().map(|e| e.path.clone()).collect::<Vec<_>>());

        let page = store.read_change_log(Some(page.cursor)).await.unwrap().unwrap();
        assert!(page.entries.is_empty());
    }
}
