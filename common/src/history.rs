use std::collections::VecDeque;

use serde::Serialize;

/// Epoch seconds before which the clock is assumed unsynced (2023-01-01).
pub const MIN_VALID_EPOCH: i64 = 1_672_531_200;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TempSample {
    #[serde(rename = "temperature")]
    pub temperature_c: Option<f32>,
    pub timestamp: i64,
    #[serde(rename = "validTimestamp")]
    pub valid_timestamp: bool,
    #[serde(rename = "ventStage")]
    pub vent_stage: u8,
    #[serde(rename = "heaterOn")]
    pub heater_on: bool,
}

/// Fixed-size sample history behind the dashboard chart. Newest last.
#[derive(Debug, Clone)]
pub struct TemperatureHistory {
    samples: VecDeque<TempSample>,
    capacity: usize,
}

impl TemperatureHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// A sample without a reading, or taken before the clock synced, keeps
    /// its slot but is flagged so the chart can skip its time label.
    pub fn record(
        &mut self,
        temperature_c: Option<f32>,
        epoch_secs: i64,
        vent_stage: u8,
        heater_on: bool,
    ) -> TempSample {
        let temperature_c = temperature_c.filter(|t| t.is_finite());
        let sample = TempSample {
            temperature_c,
            timestamp: epoch_secs,
            valid_timestamp: temperature_c.is_some() && epoch_secs > MIN_VALID_EPOCH,
            vent_stage,
            heater_on,
        };

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        sample
    }

    pub fn samples(&self) -> impl Iterator<Item = &TempSample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&TempSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
