// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-FileCopyrightText: © 2023 Siemens AG
// SPDX-License-Identifier: MIT

pub mod backoff;
pub mod builtins;
pub mod dispatch;
pub mod function_registry;
pub mod heartbeat;
pub mod host;
pub mod listeners;
pub mod stores;

use dispatch::redelivery::RedeliveryPolicy;
use function_registry::FunctionRegistry;
use host::JobHost;
use stores::HostStores;

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct JobHostSettings {
    /// Identifier shared by all the instances of the same host.
    pub host_id: String,
    /// Identity of this instance in the heartbeats, random if empty.
    #[serde(default)]
    pub instance_id: String,
    /// File with the function descriptors, TOML or JSON. Optional.
    #[serde(default)]
    pub manifest: String,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub polling: PollingSettings,
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    #[serde(default)]
    pub redis_url: String,
    #[serde(default)]
    pub redis_prefix: String,
    /// Directory of the file blob store. Blobs are kept in memory if empty.
    #[serde(default)]
    pub blob_root: String,
    /// Empty to disable, "memory", or the URL of a Redis server.
    #[serde(default)]
    pub service_bus_url: String,
    #[serde(default = "default_connection_name")]
    pub connection_name: String,
}

fn default_connection_name() -> String {
    String::from("default")
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            redis_url: String::new(),
            redis_prefix: String::new(),
            blob_root: String::new(),
            service_bus_url: String::new(),
            connection_name: default_connection_name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Requests go through the host's dispatch queue.
    Queue,
    /// Requests are executed by the listener that found the event.
    Local,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct DispatchSettings {
    pub mode: DispatchMode,
    pub lease_secs: u64,
    pub max_dequeue_count: u32,
    pub retry_delay_secs: u64,
    pub dedup_by_id: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Queue,
            lease_secs: 600,
            max_dequeue_count: 5,
            retry_delay_secs: 0,
            dedup_by_id: false,
        }
    }
}

impl DispatchSettings {
    pub fn lease(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lease_secs)
    }

    pub fn redelivery_policy(&self) -> RedeliveryPolicy {
        RedeliveryPolicy {
            max_dequeue_count: self.max_dequeue_count.max(1),
            retry_delay: std::time::Duration::from_secs(self.retry_delay_secs),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct PollingSettings {
    pub minimum_interval_ms: u64,
    pub maximum_interval_ms: u64,
    pub queue_batch_size: usize,
    pub blob_page_size: usize,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            minimum_interval_ms: 100,
            maximum_interval_ms: 60_000,
            queue_batch_size: 16,
            blob_page_size: 100,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct HeartbeatSettings {
    pub signal_interval_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            signal_interval_secs: jobhost_api::running_host::HEARTBEAT_SIGNAL_INTERVAL.as_secs(),
        }
    }
}

impl JobHostSettings {
    /// Settings with all defaults: in-memory stores, queue dispatch.
    pub fn new(host_id: &str) -> Self {
        Self {
            host_id: host_id.to_string(),
            instance_id: String::new(),
            manifest: String::new(),
            storage: StorageSettings::default(),
            dispatch: DispatchSettings::default(),
            polling: PollingSettings::default(),
            heartbeat: HeartbeatSettings::default(),
        }
    }
}

pub async fn jobhost_node_main(settings: JobHostSettings, mut functions: FunctionRegistry) -> anyhow::Result<()> {
    log::info!("Starting job host {}", settings.host_id);
    log::debug!("Settings: {:?}", settings);

    if !settings.manifest.is_empty() {
        let manifest = jobhost_api::function_descriptor::FunctionManifest::from_file(&settings.manifest)?;
        log::info!("{} function(s) declared in {}", manifest.functions.len(), settings.manifest);
        functions.add_manifest(manifest);
    }
    let stores = HostStores::from_settings(&settings.storage, settings.polling.blob_page_size)?;

    let cancel = tokio_util::sync::CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => log::info!("shutting down"),
            Err(err) => log::error!("could not listen for the shutdown signal: {}", err),
        }
        shutdown.cancel();
    });

    JobHost::new(settings, stores, functions).run(cancel).await
}

pub fn create_template(path: &str, content: &str) -> anyhow::Result<()> {
    anyhow::ensure!(!path.is_empty(), "empty configuration file name");
    match std::path::Path::new(&path).exists() {
        true => anyhow::bail!("cannot overwrite configuration file: {}", path),
        false => {
            std::fs::write(path, content)?;
            Ok(())
        }
    }
}

pub fn jobhost_node_default_conf() -> String {
    String::from(
        r##"host_id = "jobs"
instance_id = ""
manifest = "functions.toml"

[storage]
backend = "memory"
redis_url = "redis://127.0.0.1:6379"
redis_prefix = "jobhost:"
blob_root = "blobs"
service_bus_url = ""
connection_name = "default"

[dispatch]
mode = "queue"
lease_secs = 600
max_dequeue_count = 5
retry_delay_secs = 0
dedup_by_id = false

[polling]
minimum_interval_ms = 100
maximum_interval_ms = 60000
queue_batch_size = 16
blob_page_size = 100

[heartbeat]
signal_interval_secs = 30
"##,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_conf_parses() {
        let settings: JobHostSettings = toml::from_str(&jobhost_node_default_conf()).unwrap();
        assert_eq!("jobs", settings.host_id);
        assert_eq!(StorageBackend::Memory, settings.storage.backend);
        assert_eq!(DispatchMode::Queue, settings.dispatch.mode);
        assert_eq!(
            RedeliveryPolicy {
                max_dequeue_count: 5,
                retry_delay: std::time::Duration::ZERO
            },
            settings.dispatch.redelivery_policy()
        );
        assert_eq!("jobhost-jobs", dispatch::dispatch_queue_name(&settings.host_id));
    }

    #[test]
    fn test_minimal_conf() {
        let settings: JobHostSettings = toml::from_str(
            r#"host_id = "minimal"
[dispatch]
mode = "local"
lease_secs = 30
max_dequeue_count = 0
retry_delay_secs = 5
dedup_by_id = true
"#,
        )
        .unwrap();
        assert_eq!("default", settings.storage.connection_name);
        assert_eq!(DispatchMode::Local, settings.dispatch.mode);
        assert_eq!(1, settings.dispatch.redelivery_policy().max_dequeue_count);
        assert_eq!(100, settings.polling.minimum_interval_ms);
    }

    #[test]
    fn test_create_template_does_not_overwrite() {
        let path = std::env::temp_dir().join(format!("jobhost-{}.toml", uuid::Uuid::new_v4()));
        let path = path.to_str().unwrap();
        create_template(path, &jobhost_node_default_conf()).unwrap();
        assert!(create_template(path, "").is_err());
        assert_eq!(jobhost_node_default_conf(), std::fs::read_to_string(path).unwrap());
        std::fs::remove_file(path).unwrap();
    }
}
