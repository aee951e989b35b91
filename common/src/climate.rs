use chrono::{DateTime, FixedOffset, Timelike};
use serde::Serialize;

use crate::record::SettingsRecord;

const MINUTES_PER_DAY: u16 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClimateOutputs {
    #[serde(rename = "ventStage")]
    pub vent_stage: u8,
    #[serde(rename = "heaterOn")]
    pub heater_on: bool,
    #[serde(rename = "boostActive")]
    pub boost_active: bool,
    #[serde(rename = "shadeOpen")]
    pub shade_open: bool,
    #[serde(rename = "targetTemp")]
    pub target_temp_c: f32,
}

impl Default for ClimateOutputs {
    fn default() -> Self {
        Self {
            vent_stage: 0,
            heater_on: false,
            boost_active: false,
            shade_open: false,
            target_temp_c: SettingsRecord::default().heat_set_temp_night,
        }
    }
}

impl ClimateOutputs {
    pub fn vent_label(&self) -> &'static str {
        match self.vent_stage {
            0 => "Closed",
            1 => "Stage 1 (25%)",
            2 => "Stage 2 (50%)",
            _ => "Stage 3 (100%)",
        }
    }
}

/// Relay decisions derived from the current settings. Only reads settings;
/// keeps the previous outputs so thresholds act with hysteresis.
#[derive(Debug, Clone, Default)]
pub struct ClimateEngine {
    outputs: ClimateOutputs,
}

impl ClimateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outputs(&self) -> ClimateOutputs {
        self.outputs
    }

    pub fn evaluate(
        &mut self,
        settings: &SettingsRecord,
        temperature_c: Option<f32>,
        minute_of_day: u16,
    ) -> ClimateOutputs {
        let now = minute_of_day % MINUTES_PER_DAY;
        let hysteresis = settings.hysteresis.max(0.0);

        let boost_start = clock_minutes(settings.boost_start_hour, settings.boost_start_minute);
        let boost_active = match settings.boost_duration_minutes {
            0 => false,
            d if d >= MINUTES_PER_DAY => true,
            d => in_window(now, boost_start, (boost_start + d) % MINUTES_PER_DAY),
        };

        let day = in_window(
            now,
            clock_minutes(settings.day_start_hour, settings.day_start_minute),
            clock_minutes(settings.night_start_hour, settings.night_start_minute),
        );
        let target = if boost_active {
            settings.heat_boost_temp
        } else if day {
            settings.heat_set_temp_day
        } else {
            settings.heat_set_temp_night
        };

        let shade_open = in_window(
            now,
            clock_minutes(settings.shade_open_hour, settings.shade_open_minute),
            clock_minutes(settings.shade_close_hour, settings.shade_close_minute),
        );

        let mut outputs = ClimateOutputs {
            boost_active,
            shade_open,
            target_temp_c: target,
            ..self.outputs
        };

        match temperature_c.filter(|t| t.is_finite()) {
            Some(temp) => {
                outputs.vent_stage = next_vent_stage(outputs.vent_stage, settings, temp, hysteresis);
                if temp <= target - hysteresis {
                    outputs.heater_on = true;
                } else if temp >= target {
                    outputs.heater_on = false;
                }
            }
            None => outputs.heater_on = false,
        }

        self.outputs = outputs;
        outputs
    }
}

fn next_vent_stage(current: u8, settings: &SettingsRecord, temp: f32, hysteresis: f32) -> u8 {
    let thresholds = [
        settings.vent_open_temp_stage1,
        settings.vent_open_temp_stage2,
        settings.vent_open_temp_stage3,
    ];

    let mut stage = usize::from(current.min(3));
    while stage < thresholds.len() && temp >= thresholds[stage] {
        stage += 1;
    }
    while stage > 0 && temp < thresholds[stage - 1] - hysteresis {
        stage -= 1;
    }
    stage as u8
}

fn clock_minutes(hour: u8, minute: u8) -> u16 {
    (u16::from(hour) * 60 + u16::from(minute)) % MINUTES_PER_DAY
}

/// `[start, end)` on a 24h clock, wrapping past midnight. Empty when
/// `start == end`.
fn in_window(now: u16, start: u16, end: u16) -> bool {
    if start <= end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

pub fn minute_of_day(now: DateTime<FixedOffset>) -> u16 {
    (now.hour() * 60 + now.minute()) as u16
}
