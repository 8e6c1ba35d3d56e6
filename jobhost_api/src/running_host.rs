// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use crate::errors::StoreError;

/// How often a live host overwrites its heartbeat record.
pub const HEARTBEAT_SIGNAL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// How old a heartbeat may be before the host is considered dead.
pub const HEARTBEAT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(45);

/// Heartbeat record of one host instance.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RunningHost {
    pub host_identity: String,
    pub last_heartbeat_utc: chrono::DateTime<chrono::Utc>,
}

impl RunningHost {
    pub fn is_alive(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        let poll_interval = chrono::Duration::milliseconds(HEARTBEAT_POLL_INTERVAL.as_millis() as i64);
        now < self.last_heartbeat_utc + poll_interval
    }
}

/// Store of heartbeat records, one row per host identity.
#[async_trait::async_trait]
pub trait HostLivenessStore: Send + Sync {
    async fn upsert(&self, record: RunningHost) -> Result<(), StoreError>;
    async fn read(&self, host_identity: &str) -> Result<Option<RunningHost>, StoreError>;
    async fn read_all(&self) -> Result<Vec<RunningHost>, StoreError>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_is_alive_boundary() {
        let now = chrono::Utc::now();
        let poll = chrono::Duration::milliseconds(HEARTBEAT_POLL_INTERVAL.as_millis() as i64);
        let one_ms = chrono::Duration::milliseconds(1);

        let fresh = RunningHost {
            host_identity: "host-a".to_string(),
            last_heartbeat_utc: now - poll + one_ms,
        };
        assert!(fresh.is_alive(now));

        let stale = RunningHost {
            host_identity: "host-a".to_string(),
            last_heartbeat_utc: now - poll - one_ms,
        };
        assert!(!stale.is_alive(now));

        let exact = RunningHost {
            host_identity: "host-a".to_string(),
            last_heartbeat_utc: now - poll,
        };
        assert!(!exact.is_alive(now));
    }
}
