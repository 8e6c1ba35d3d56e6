// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use rand::Rng;

/// Polling interval that drops to the minimum whenever work is found and
/// otherwise grows by a random factor in [1.6, 2.4) up to the maximum.
#[derive(Debug, Clone)]
pub struct RandomizedExponentialBackoff {
    minimum: std::time::Duration,
    maximum: std::time::Duration,
    current: std::time::Duration,
}

impl RandomizedExponentialBackoff {
    pub fn new(minimum: std::time::Duration, maximum: std::time::Duration) -> Self {
        let minimum = minimum.max(std::time::Duration::from_millis(1));
        let maximum = maximum.max(minimum);
        Self {
            minimum,
            maximum,
            current: minimum,
        }
    }

    pub fn current(&self) -> std::time::Duration {
        self.current
    }

    pub fn minimum(&self) -> std::time::Duration {
        self.minimum
    }

    pub fn maximum(&self) -> std::time::Duration {
        self.maximum
    }

    pub fn on_work_found(&mut self) -> std::time::Duration {
        self.current = self.minimum;
        self.current
    }

    pub fn on_no_work(&mut self) -> std::time::Duration {
        let factor = rand::thread_rng().gen_range(1.6..2.4);
        self.current = self.current.mul_f64(factor).min(self.maximum);
        self.current
    }
}

/// A command executed repeatedly, waiting in between for an interval that
/// the command itself decides after each execution.
#[async_trait::async_trait]
pub trait IntervalSeparationCommand: Send {
    fn separation_interval(&self) -> std::time::Duration;

    async fn execute(&mut self);
}

/// Run the command until cancelled. Cancellation is observed only while
/// waiting, never during an execution.
pub async fn run_interval_separated<C: IntervalSeparationCommand>(mut command: C, cancel: tokio_util::sync::CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(command.separation_interval()) => {}
        }
        command.execute().await;
    }
}
