// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

//! Stores backed by a Redis server, shared by all the hosts pointing to it.
//!
//! The following keys are written, all below a configurable prefix:
//! - queues: set of the existing queue names
//! - queue:NAME:visible: sorted set of message ids by visibility time (ms)
//! - queue:NAME:message:ID: hash with content, dequeue_count, pop_receipt
//! - functions: set of function ids; function:ID: JSON definition
//! - hosts: set of host identities; host:IDENTITY: JSON heartbeat record
//! - execution_log: list of JSON entries; execution:UUID: entries of one invocation
//! - table:NAME:PARTITION: hash from row key to JSON entity

#[cfg(test)]
mod test;

pub mod execution_log;
pub mod function_table;
pub mod host_liveness;
pub mod queue;
pub mod table;

use jobhost_api::errors::StoreError;

#[derive(Clone)]
pub struct RedisStore {
    connection: std::sync::Arc<tokio::sync::Mutex<redis::Connection>>,
    prefix: String,
}

impl RedisStore {
    pub fn new(redis_url: &str, prefix: &str) -> anyhow::Result<Self> {
        log::info!("creating Redis store at URL {} with prefix '{}'", redis_url, prefix);
        let connection = redis::Client::open(redis_url)?.get_connection()?;
        Ok(Self {
            connection: std::sync::Arc::new(tokio::sync::Mutex::new(connection)),
            prefix: prefix.to_string(),
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }
}

fn backend_error(err: redis::RedisError) -> StoreError {
    match err.is_timeout() {
        true => StoreError::Timeout,
        false => StoreError::Backend(err.to_string()),
    }
}

fn json_error(err: serde_json::Error) -> StoreError {
    StoreError::Backend(format!("invalid JSON value: {}", err))
}
