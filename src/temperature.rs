/*
 * This file is part of Itefan.
 *
 * Copyright (C) 2025 Itefan contributors
 *
 * Itefan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Itefan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Itefan. If not, see <https://www.gnu.org/licenses/>.
 */

//! Combining drive and CPU temperatures into one control input
//!
//! effective = max(hottest drive, rolling CPU average - 20)

use serde::{Deserialize, Serialize};

use crate::config::{ControllerConfig, DriveId};
use crate::sensors::Reading;

/// CPU package runs this much hotter than the drives it shares a case with
pub const CPU_OFFSET_C: i32 = 20;

/// What a failed probe contributes
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MissingReadingPolicy {
    /// Count the reading as 0 °C
    #[default]
    Zero,
    /// Leave it out of the aggregate
    Exclude,
}

/// Fixed-window moving average over the most recent samples
#[derive(Debug, Clone)]
pub struct RollingAverage {
    samples: Vec<i32>,
    capacity: usize,
    next: usize,
    sum: i64,
}

impl RollingAverage {
    /// `capacity` must be at least 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            next: 0,
            sum: 0,
        }
    }

    pub fn push(&mut self, sample: i32) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.sum -= i64::from(self.samples[self.next]);
            self.samples[self.next] = sample;
        }
        self.sum += i64::from(sample);
        self.next = (self.next + 1) % self.capacity;
    }

    /// Integer mean truncated toward zero; `None` while empty
    pub fn average(&self) -> Option<i32> {
        if self.samples.is_empty() {
            return None;
        }
        Some((self.sum / self.samples.len() as i64) as i32)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sum(&self) -> i64 {
        self.sum
    }
}

/// Result of one aggregation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateReading {
    /// Control input, `max(drive_max, cpu_average - 20)`
    pub effective: i32,
    pub drive_max: i32,
    pub cpu_average: Option<i32>,
}

pub struct TemperatureAggregator {
    cpu: RollingAverage,
    policy: MissingReadingPolicy,
}

impl TemperatureAggregator {
    pub fn new(config: &ControllerConfig) -> Self {
        Self::with_policy(config.cpu_avg, config.missing_reading)
    }

    pub fn with_policy(window: usize, policy: MissingReadingPolicy) -> Self {
        Self {
            cpu: RollingAverage::new(window),
            policy,
        }
    }

    /// The value a reading contributes under the configured policy
    pub fn resolve(&self, reading: Reading) -> Option<i32> {
        match (reading, self.policy) {
            (Reading::Celsius(t), _) => Some(t),
            (Reading::Unavailable, MissingReadingPolicy::Zero) => Some(0),
            (Reading::Unavailable, MissingReadingPolicy::Exclude) => None,
        }
    }

    /// Fold one round of readings into the aggregate. The CPU sample enters
    /// the rolling window before the average is taken.
    pub fn aggregate(&mut self, drives: &[(DriveId, Reading)], cpu: Reading) -> AggregateReading {
        let drive_max = drives
            .iter()
            .filter_map(|(_, r)| self.resolve(*r))
            .fold(0, i32::max);

        if let Some(t) = self.resolve(cpu) {
            self.cpu.push(t);
        }
        let cpu_average = self.cpu.average();

        let effective = match cpu_average {
            Some(avg) => drive_max.max(avg.saturating_sub(CPU_OFFSET_C)),
            None => drive_max,
        };

        AggregateReading {
            effective,
            drive_max,
            cpu_average,
        }
    }

    pub fn cpu_window(&self) -> &RollingAverage {
        &self.cpu
    }
}
