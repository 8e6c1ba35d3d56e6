// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::errors::StoreError;
use jobhost_api::running_host::{HostLivenessStore, RunningHost};

/// Publishes the heartbeat of this host instance and tells which other
/// instances are alive.
#[derive(Clone)]
pub struct HostLivenessTracker {
    store: std::sync::Arc<dyn HostLivenessStore>,
    host_identity: String,
    signal_interval: std::time::Duration,
}

impl HostLivenessTracker {
    pub fn new(store: std::sync::Arc<dyn HostLivenessStore>, host_identity: &str, signal_interval: std::time::Duration) -> Self {
        Self {
            store,
            host_identity: host_identity.to_string(),
            signal_interval,
        }
    }

    pub fn host_identity(&self) -> &str {
        &self.host_identity
    }

    pub async fn signal_heartbeat(&self) -> Result<(), StoreError> {
        self.store
            .upsert(RunningHost {
                host_identity: self.host_identity.clone(),
                last_heartbeat_utc: chrono::Utc::now(),
            })
            .await
    }

    pub async fn is_alive(&self, host_identity: &str) -> Result<bool, StoreError> {
        let now = chrono::Utc::now();
        Ok(self.store.read(host_identity).await?.map_or(false, |h| h.is_alive(now)))
    }

    pub async fn alive_hosts(&self) -> Result<Vec<RunningHost>, StoreError> {
        let now = chrono::Utc::now();
        Ok(self.store.read_all().await?.into_iter().filter(|h| h.is_alive(now)).collect())
    }

    /// Signal periodically until cancelled.
    pub async fn run(self, cancel: tokio_util::sync::CancellationToken) {
        let mut interval = tokio::time::interval(self.signal_interval.max(std::time::Duration::from_millis(1)));
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(err) = self.signal_heartbeat().await {
                        log::warn!("could not signal the heartbeat of {}: {}", self.host_identity, err);
                    }
                }
            }
        }
        log::info!("heartbeat of {} stopped", self.host_identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_alive_hosts() {
        let store = std::sync::Arc::new(jobhost_store::memory::MemoryHostLivenessStore::new());
        let tracker = HostLivenessTracker::new(store.clone(), "host-a", std::time::Duration::from_secs(30));
        assert!(!tracker.is_alive("host-a").await.unwrap());

        tracker.signal_heartbeat().await.unwrap();
        store
            .upsert(RunningHost {
                host_identity: "host-b".to_string(),
                last_heartbeat_utc: chrono::Utc::now() - chrono::Duration::seconds(120),
            })
            .await
            .unwrap();

        assert!(tracker.is_alive("host-a").await.unwrap());
        assert!(!tracker.is_alive("host-b").await.unwrap());
        let alive: Vec<_> = tracker.alive_hosts().await.unwrap().into_iter().map(|h| h.host_identity).collect();
        assert_eq!(vec!["host-a".to_string()], alive);
    }

    #[tokio::test]
    async fn test_run_signals_until_cancelled() {
        let store = std::sync::Arc::new(jobhost_store::memory::MemoryHostLivenessStore::new());
        let tracker = HostLivenessTracker::new(store.clone(), "host-a", std::time::Duration::from_millis(10));
        let cancel = tokio_util::sync::CancellationToken::new();
        let task = tokio::spawn(tracker.clone().run(cancel.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap();

        let first = store.read("host-a").await.unwrap().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(first, store.read("host-a").await.unwrap().unwrap());
        assert!(tracker.is_alive("host-a").await.unwrap());
    }
}
