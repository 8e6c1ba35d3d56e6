// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::binding::{BindingSpec, FunctionDefinition};
use jobhost_api::invoke::{TriggerCause, TriggerPayload, TriggerReason};

use super::{PollSource, TriggerEvent};

struct TimerSchedule {
    function: std::sync::Arc<FunctionDefinition>,
    interval: chrono::Duration,
    next_due: chrono::DateTime<chrono::Utc>,
}

/// Fires timer-triggered functions at fixed intervals. Occurrences missed
/// while the host was busy are skipped, not replayed.
pub struct TimerPollSource {
    schedules: Vec<TimerSchedule>,
}

impl TimerPollSource {
    pub fn new(functions: &[std::sync::Arc<FunctionDefinition>]) -> Self {
        let now = chrono::Utc::now();
        let schedules = functions
            .iter()
            .filter_map(|function| match function.trigger_parameter.as_ref().map(|t| &t.spec) {
                Some(BindingSpec::Timer {
                    interval_secs,
                    run_on_startup,
                }) => {
                    let schedule = Self::schedule(function, *interval_secs, *run_on_startup, now);
                    if schedule.is_none() {
                        log::error!("timer interval of {} s of {} is out of range, never firing it", interval_secs, function.location);
                    }
                    schedule
                }
                _ => None,
            })
            .collect();
        Self { schedules }
    }

    fn schedule(
        function: &std::sync::Arc<FunctionDefinition>,
        interval_secs: u64,
        run_on_startup: bool,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Option<TimerSchedule> {
        let interval = chrono::Duration::try_seconds(i64::try_from(interval_secs).ok()?)?;
        if interval <= chrono::Duration::zero() {
            return None;
        }
        let next_due = match run_on_startup {
            true => now,
            false => now.checked_add_signed(interval)?,
        };
        Some(TimerSchedule {
            function: function.clone(),
            interval,
            next_due,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }
}

/// First occurrence after `now`, skipping the missed ones.
pub(super) fn next_occurrence(
    due: chrono::DateTime<chrono::Utc>,
    interval: chrono::Duration,
    now: chrono::DateTime<chrono::Utc>,
) -> Option<chrono::DateTime<chrono::Utc>> {
    let missed = (now - due).num_milliseconds() / interval.num_milliseconds().max(1);
    let steps = i32::try_from(missed.checked_add(1)?).ok()?;
    due.checked_add_signed(interval.checked_mul(steps)?)
}

#[async_trait::async_trait]
impl PollSource for TimerPollSource {
    fn name(&self) -> String {
        format!("timer listener ({} function(s))", self.schedules.len())
    }

    async fn poll(&mut self) -> anyhow::Result<Vec<TriggerEvent>> {
        let now = chrono::Utc::now();
        let mut events = vec![];
        self.schedules.retain_mut(|schedule| {
            if schedule.next_due > now {
                return true;
            }
            let scheduled_utc = schedule.next_due;
            events.push(TriggerEvent {
                functions: vec![schedule.function.clone()],
                payload: TriggerPayload::Timer { scheduled_utc },
                reason: TriggerReason::new(TriggerCause::Timer { scheduled_utc }),
            });
            match next_occurrence(schedule.next_due, schedule.interval, now) {
                Some(next_due) => {
                    schedule.next_due = next_due;
                    true
                }
                None => {
                    log::error!("no next occurrence of timer of {}, dropping it", schedule.function.location);
                    false
                }
            }
        });
        Ok(events)
    }

    fn time_to_next_due(&self) -> Option<std::time::Duration> {
        let now = chrono::Utc::now();
        self.schedules
            .iter()
            .map(|s| (s.next_due - now).to_std().unwrap_or(std::time::Duration::ZERO))
            .min()
    }
}
