// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use crate::errors::StoreError;
use crate::function_location::FunctionLocation;
use crate::invoke::TriggerReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
}

/// Record of one invocation attempt.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExecutionLogEntry {
    pub id: uuid::Uuid,
    pub location: FunctionLocation,
    pub trigger_reason: TriggerReason,
    #[serde(default)]
    pub host_instance: String,
    pub started_utc: chrono::DateTime<chrono::Utc>,
    pub ended_utc: chrono::DateTime<chrono::Utc>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub dequeue_count: u32,
}

impl ExecutionLogEntry {
    pub fn duration(&self) -> chrono::Duration {
        self.ended_utc - self.started_utc
    }

    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

impl std::fmt::Display for ExecutionLogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {:?} in {} ms ({})",
            self.id,
            self.location,
            self.status,
            self.duration().num_milliseconds(),
            self.trigger_reason
        )?;
        if let Some(error) = &self.error {
            write!(f, ": {}", error)?;
        }
        Ok(())
    }
}

/// Append-only sink of execution log entries.
#[async_trait::async_trait]
pub trait ExecutionLogSink: Send + Sync {
    async fn append(&self, entry: ExecutionLogEntry) -> Result<(), StoreError>;

    /// All attempts recorded for one invocation id.
    async fn entries_for(&self, id: &uuid::Uuid) -> Result<Vec<ExecutionLogEntry>, StoreError>;
}
