// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use jobhost_api::binding::{BindingSpec, StaticBinding};
use jobhost_api::errors::{BindError, IndexErrorKind};
use jobhost_api::function_descriptor::BindingAttribute;
use jobhost_api::invoke::{BoundValue, TriggerPayload};

/// Longest accepted timer interval, one leap year.
pub const MAX_TIMER_INTERVAL_SECS: u64 = 366 * 24 * 3600;

pub struct TimerBindingProvider {}

impl super::BindingProvider for TimerBindingProvider {
    fn create(&self, parameter_name: &str, attribute: &BindingAttribute) -> Result<StaticBinding, IndexErrorKind> {
        let BindingAttribute::TimerTrigger {
            interval_secs,
            run_on_startup,
        } = attribute
        else {
            return Err(super::wrong_attribute("timer", attribute));
        };
        if *interval_secs == 0 {
            return Err(IndexErrorKind::InvalidBinding("timer interval must be positive".to_string()));
        }
        if *interval_secs > MAX_TIMER_INTERVAL_SECS {
            return Err(IndexErrorKind::InvalidBinding(format!(
                "timer interval of {} s exceeds the maximum of {} s",
                interval_secs, MAX_TIMER_INTERVAL_SECS
            )));
        }
        Ok(StaticBinding {
            parameter_name: parameter_name.to_string(),
            is_input: true,
            is_trigger: true,
            produced_tokens: std::collections::BTreeSet::new(),
            spec: BindingSpec::Timer {
                interval_secs: *interval_secs,
                run_on_startup: *run_on_startup,
            },
        })
    }

    fn payload_from_argument(&self, _binding: &StaticBinding, _value: &str) -> Result<TriggerPayload, BindError> {
        Ok(TriggerPayload::Timer {
            scheduled_utc: chrono::Utc::now(),
        })
    }

    fn bind(&self, binding: &StaticBinding, context: &super::BindingContext) -> Result<BoundValue, BindError> {
        match (&binding.spec, context.trigger) {
            (BindingSpec::Timer { interval_secs, .. }, Some(TriggerPayload::Timer { scheduled_utc })) => Ok(BoundValue::Timer {
                scheduled_utc: *scheduled_utc,
                interval_secs: *interval_secs,
            }),
            (_, other) => Err(super::wrong_trigger(binding, other)),
        }
    }
}
