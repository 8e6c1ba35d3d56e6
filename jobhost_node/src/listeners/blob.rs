// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::binding::{BindingSpec, FunctionDefinition};
use jobhost_api::blob::{BlobProperties, BlobStore};
use jobhost_api::errors::StoreError;
use jobhost_api::invoke::{BlobPath, TriggerCause, TriggerPayload, TriggerReason, PARENT_ID_METADATA};
use jobhost_api::path_template::PathTemplate;

use super::{PollSource, TriggerEvent};
use crate::dispatch::DispatchOutcome;

/// Blobs remembered to avoid dispatching the same version twice.
const MAX_SEEN_BLOBS: usize = 100_000;

/// Dispatch attempts of a blob version before giving up on it.
const MAX_BLOB_ATTEMPTS: u32 = 5;

enum ChangeLogState {
    Unknown,
    Available(Option<String>),
    Unavailable,
}

/// Incremental listing of one container, one page per poll.
#[derive(Default)]
struct ContainerSweep {
    cursor: Option<String>,
    previous_latest: Option<chrono::DateTime<chrono::Utc>>,
    current_latest: Option<chrono::DateTime<chrono::Utc>>,
}

/// Detects new or updated blobs, from the store's change log when it has
/// one and by sweeping the containers otherwise. Blobs written by this host
/// are reported right away through the notification channel.
pub struct BlobPollSource {
    store: std::sync::Arc<dyn BlobStore>,
    triggers: Vec<(std::sync::Arc<FunctionDefinition>, PathTemplate)>,
    containers: std::collections::BTreeMap<String, ContainerSweep>,
    change_log: ChangeLogState,
    notifications: Option<futures::channel::mpsc::UnboundedReceiver<BlobProperties>>,
    seen: std::collections::HashSet<(BlobPath, String)>,
    /// Versions dispatched but not completed yet, per path in poll order.
    in_flight: std::collections::HashMap<BlobPath, std::collections::VecDeque<BlobProperties>>,
    retry: Vec<BlobProperties>,
    attempts: std::collections::HashMap<(BlobPath, String), u32>,
}

impl BlobPollSource {
    pub fn new(store: std::sync::Arc<dyn BlobStore>, functions: &[std::sync::Arc<FunctionDefinition>]) -> Self {
        let mut triggers = vec![];
        let mut containers = std::collections::BTreeMap::new();
        for function in functions {
            if let Some(BindingSpec::Blob { path, .. }) = function.trigger_parameter.as_ref().map(|t| &t.spec) {
                containers.entry(path.container_name().to_string()).or_insert_with(ContainerSweep::default);
                triggers.push((function.clone(), path.clone()));
            }
        }
        Self {
            store,
            triggers,
            containers,
            change_log: ChangeLogState::Unknown,
            notifications: None,
            seen: std::collections::HashSet::new(),
            in_flight: std::collections::HashMap::new(),
            retry: vec![],
            attempts: std::collections::HashMap::new(),
        }
    }

    pub fn with_notifications(mut self, notifications: futures::channel::mpsc::UnboundedReceiver<BlobProperties>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    async fn changed_blobs(&mut self) -> Result<Vec<BlobProperties>, StoreError> {
        let mut found = std::mem::take(&mut self.retry);
        if let Some(notifications) = &mut self.notifications {
            while let Ok(properties) = notifications.try_recv() {
                found.push(properties);
            }
        }

        let cursor = match &self.change_log {
            ChangeLogState::Unknown => Some(None),
            ChangeLogState::Available(cursor) => Some(cursor.clone()),
            ChangeLogState::Unavailable => None,
        };
        if let Some(cursor) = cursor {
            match self.store.read_change_log(cursor).await? {
                Some(page) => {
                    found.extend(page.entries);
                    self.change_log = ChangeLogState::Available(Some(page.cursor));
                    return Ok(found);
                }
                None => {
                    log::info!("blob store keeps no change log, sweeping {} container(s)", self.containers.len());
                    self.change_log = ChangeLogState::Unavailable;
                }
            }
        }

        for (container, sweep) in self.containers.iter_mut() {
            let listing = match self.store.list(container, "", sweep.cursor.clone()).await {
                Ok(listing) => listing,
                Err(StoreError::ContainerNotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            for entry in listing.entries {
                sweep.current_latest = sweep.current_latest.max(Some(entry.last_modified));
                // Same-timestamp blobs of the previous sweep are filtered by the seen set.
                if sweep.previous_latest.map_or(true, |latest| entry.last_modified >= latest) {
                    found.push(entry);
                }
            }
            sweep.cursor = listing.next_cursor;
            if sweep.cursor.is_none() {
                sweep.previous_latest = sweep.previous_latest.max(sweep.current_latest.take());
            }
        }
        Ok(found)
    }
}

#[async_trait::async_trait]
impl PollSource for BlobPollSource {
    fn name(&self) -> String {
        format!("blob listener ({} function(s))", self.triggers.len())
    }

    async fn poll(&mut self) -> anyhow::Result<Vec<TriggerEvent>> {
        let blobs = self.changed_blobs().await?;
        if self.seen.len() > MAX_SEEN_BLOBS {
            self.seen.clear();
        }

        let mut events = vec![];
        for properties in blobs {
            if !self.seen.insert((properties.path.clone(), properties.etag.clone())) {
                continue;
            }
            let blob_path = properties.path.to_string();
            let functions: Vec<_> = self
                .triggers
                .iter()
                .filter(|(_, template)| template.match_path(&blob_path).is_some())
                .map(|(function, _)| function.clone())
                .collect();
            if functions.is_empty() {
                continue;
            }
            log::debug!("new blob {} for {} function(s)", blob_path, functions.len());
            let parent_guid = properties.metadata.get(PARENT_ID_METADATA).and_then(|id| id.parse().ok());
            events.push(TriggerEvent {
                functions,
                payload: TriggerPayload::Blob {
                    path: properties.path.clone(),
                },
                reason: TriggerReason::new(TriggerCause::NewBlob { blob_path }).with_parent(parent_guid),
            });
            self.in_flight.entry(properties.path.clone()).or_default().push_back(properties);
        }
        Ok(events)
    }

    async fn complete(&mut self, event: &TriggerEvent, outcomes: &[DispatchOutcome]) -> anyhow::Result<()> {
        let TriggerPayload::Blob { path } = &event.payload else {
            return Ok(());
        };
        let Some(versions) = self.in_flight.get_mut(path) else {
            return Ok(());
        };
        let Some(properties) = versions.pop_front() else {
            return Ok(());
        };
        if versions.is_empty() {
            self.in_flight.remove(path);
        }
        let key = (properties.path.clone(), properties.etag.clone());
        if !outcomes.iter().any(|o| o.should_retry()) {
            self.attempts.remove(&key);
            return Ok(());
        }
        let attempts = self.attempts.entry(key.clone()).or_insert(0);
        *attempts += 1;
        if *attempts >= MAX_BLOB_ATTEMPTS {
            self.attempts.remove(&key);
            anyhow::bail!("giving up on blob {} after {} attempts", properties.path, MAX_BLOB_ATTEMPTS);
        }
        self.seen.remove(&key);
        self.retry.push(properties);
        Ok(())
    }
}
