// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::blob::{BlobContent, BlobListing, BlobProperties, BlobStore};
use jobhost_api::errors::StoreError;
use jobhost_api::invoke::BlobPath;

/// Blob store on the local file system: one directory per container below
/// the root, blob names map to relative file paths.
///
/// Metadata is not persisted.
#[derive(Clone)]
pub struct FileBlobStore {
    root: std::path::PathBuf,
    page_size: usize,
}

fn io_error(err: std::io::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl FileBlobStore {
    pub fn new(root: &str, page_size: usize) -> anyhow::Result<Self> {
        std::fs::create_dir_all(root)?;
        log::info!("file blob store rooted at {}", root);
        Ok(Self {
            root: std::path::PathBuf::from(root),
            page_size: page_size.max(1),
        })
    }

    fn container_dir(&self, container: &str) -> std::path::PathBuf {
        self.root.join(container)
    }

    fn blob_file(&self, path: &BlobPath) -> Result<std::path::PathBuf, StoreError> {
        if path.blob_name.split('/').any(|c| c == ".." || c == ".") {
            return Err(StoreError::Backend(format!("invalid blob name '{}'", path.blob_name)));
        }
        Ok(self.container_dir(&path.container).join(&path.blob_name))
    }

    async fn properties(&self, path: &BlobPath, file: &std::path::Path) -> Result<BlobProperties, StoreError> {
        let metadata = tokio::fs::metadata(file).await.map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => StoreError::BlobNotFound(path.to_string()),
            _ => io_error(err),
        })?;
        let last_modified: chrono::DateTime<chrono::Utc> = metadata.modified().map_err(io_error)?.into();
        Ok(BlobProperties {
            path: path.clone(),
            last_modified,
            etag: format!("{}-{}", metadata.len(), last_modified.timestamp_nanos_opt().unwrap_or_default()),
            metadata: std::collections::BTreeMap::new(),
        })
    }

    /// Names of all the files below a container directory, sorted.
    async fn blob_names(&self, container: &str) -> Result<Vec<String>, StoreError> {
        let container_dir = self.container_dir(container);
        let mut names = vec![];
        let mut pending = vec![container_dir.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_error)?;
            while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
                let file_type = entry.file_type().await.map_err(io_error)?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if let Ok(relative) = entry.path().strip_prefix(&container_dir) {
                    let components: Vec<String> = relative.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect();
                    names.push(components.join("/"));
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait::async_trait]
impl BlobStore for FileBlobStore {
    async fn create_container_if_not_exists(&self, container: &str) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(self.container_dir(container)).await.map_err(io_error)
    }

    async fn list(&self, container: &str, prefix: &str, cursor: Option<String>) -> Result<BlobListing, StoreError> {
        if !tokio::fs::try_exists(self.container_dir(container)).await.map_err(io_error)? {
            return Err(StoreError::ContainerNotFound(container.to_string()));
        }
        let names: Vec<String> = self
            .blob_names(container)
            .await?
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .filter(|name| cursor.as_ref().map(|c| name > c).unwrap_or(true))
            .take(self.page_size + 1)
            .collect();
        let more = names.len() > self.page_size;
        let mut entries = vec![];
        for name in names.into_iter().take(self.page_size) {
            let path = BlobPath::new(container, &name);
            let file = self.blob_file(&path)?;
            entries.push(self.properties(&path, &file).await?);
        }
        let next_cursor = match more {
            true => entries.last().map(|e| e.path.blob_name.clone()),
            false => None,
        };
        Ok(BlobListing { entries, next_cursor })
    }

    async fn open_read(&self, path: &BlobPath) -> Result<BlobContent, StoreError> {
        let file = self.blob_file(path)?;
        let properties = self.properties(path, &file).await?;
        let data = tokio::fs::read(&file).await.map_err(io_error)?;
        Ok(BlobContent { data, properties })
    }

    async fn open_write(
        &self,
        path: &BlobPath,
        data: Vec<u8>,
        _metadata: std::collections::BTreeMap<String, String>,
    ) -> Result<BlobProperties, StoreError> {
        if !tokio::fs::try_exists(self.container_dir(&path.container)).await.map_err(io_error)? {
            return Err(StoreError::ContainerNotFound(path.container.clone()));
        }
        let file = self.blob_file(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        tokio::fs::write(&file, data).await.map_err(io_error)?;
        self.properties(path, &file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_blob_store() {
        let root = std::env::temp_dir().join(format!("jobhost-blobs-{}", uuid::Uuid::new_v4()));
        let store = FileBlobStore::new(root.to_str().unwrap(), 2).unwrap();
        let path = BlobPath::new("input", "dir/a.txt");
        assert!(matches!(
            store.open_write(&path, b"a".to_vec(), Default::default()).await,
            Err(StoreError::ContainerNotFound(_))
        ));
        store.create_container_if_not_exists("input").await.unwrap();
        for name in ["dir/a.txt", "dir/b.txt", "dir/c.txt", "other.txt"] {
            store
                .open_write(&BlobPath::new("input", name), name.as_bytes().to_vec(), Default::default())
                .await
                .unwrap();
        }
        assert_eq!(b"dir/a.txt".to_vec(), store.open_read(&path).await.unwrap().data);
        assert!(matches!(
            store.open_read(&BlobPath::new("input", "missing")).await,
            Err(StoreError::BlobNotFound(_))
        ));

        let first = store.list("input", "dir/", None).await.unwrap();
        assert_eq!(2, first.entries.len());
        assert_eq!(Some("dir/b.txt".to_string()), first.next_cursor);
        let second = store.list("input", "dir/", first.next_cursor).await.unwrap();
        assert_eq!(vec!["dir/c.txt".to_string()], second.entries.iter().map(|e| e.path.blob_name.clone()).collect::<Vec<_>>());
        assert_eq!(None, second.next_cursor);
        assert_eq!(None, store.read_change_log(None).await.unwrap());

        let _ = std::fs::remove_dir_all(root);
    }
}
