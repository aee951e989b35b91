use serde::{Deserialize, Serialize};

use crate::{
    block_device::BlockDevice,
    error::FieldError,
    record::{SettingsField, SettingsRecord},
    store::SettingsStore,
};

/// One remote settings call from the UI core to the core that owns the
/// store. Schedule points travel as an (hour, minute) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", content = "args")]
pub enum SettingsCommand {
    #[serde(rename = "setVentTempS1")]
    SetVentTempStage1(f32),
    #[serde(rename = "setVentTempS2")]
    SetVentTempStage2(f32),
    #[serde(rename = "setVentTempS3")]
    SetVentTempStage3(f32),
    #[serde(rename = "setHeatTempDay")]
    SetHeatTempDay(f32),
    #[serde(rename = "setHeatTempNight")]
    SetHeatTempNight(f32),
    #[serde(rename = "setBoostTemp")]
    SetBoostTemp(f32),
    #[serde(rename = "setHysteresis")]
    SetHysteresis(f32),
    #[serde(rename = "setDayStartTime")]
    SetDayStartTime(u8, u8),
    #[serde(rename = "setNightStartTime")]
    SetNightStartTime(u8, u8),
    #[serde(rename = "setBoostStartTime")]
    SetBoostStartTime(u8, u8),
    #[serde(rename = "setBoostDuration")]
    SetBoostDuration(u16),
    #[serde(rename = "setShadeOpenTime")]
    SetShadeOpenTime(u8, u8),
    #[serde(rename = "setShadeCloseTime")]
    SetShadeCloseTime(u8, u8),
    /// One half of a schedule point. The other half keeps whatever the
    /// owner currently holds.
    #[serde(rename = "setClockField")]
    SetClockField(SettingsField, u8),
}

impl SettingsCommand {
    pub fn remote_name(&self) -> &'static str {
        match self {
            Self::SetVentTempStage1(_) => "setVentTempS1",
            Self::SetVentTempStage2(_) => "setVentTempS2",
            Self::SetVentTempStage3(_) => "setVentTempS3",
            Self::SetHeatTempDay(_) => "setHeatTempDay",
            Self::SetHeatTempNight(_) => "setHeatTempNight",
            Self::SetBoostTemp(_) => "setBoostTemp",
            Self::SetHysteresis(_) => "setHysteresis",
            Self::SetDayStartTime(..) => "setDayStartTime",
            Self::SetNightStartTime(..) => "setNightStartTime",
            Self::SetBoostStartTime(..) => "setBoostStartTime",
            Self::SetBoostDuration(_) => "setBoostDuration",
            Self::SetShadeOpenTime(..) => "setShadeOpenTime",
            Self::SetShadeCloseTime(..) => "setShadeCloseTime",
            Self::SetClockField(..) => "setClockField",
        }
    }

    /// Applies the call through [`SettingsStore::set_field`]. Returns as soon
    /// as RAM is updated; persistence follows on a later tick.
    pub fn apply<D: BlockDevice>(
        &self,
        store: &mut SettingsStore<D>,
        now_ms: u64,
    ) -> Result<(), FieldError> {
        let (field, value) = match *self {
            Self::SetVentTempStage1(v) => (SettingsField::VentOpenTempStage1, v),
            Self::SetVentTempStage2(v) => (SettingsField::VentOpenTempStage2, v),
            Self::SetVentTempStage3(v) => (SettingsField::VentOpenTempStage3, v),
            Self::SetHeatTempDay(v) => (SettingsField::HeatSetTempDay, v),
            Self::SetHeatTempNight(v) => (SettingsField::HeatSetTempNight, v),
            Self::SetBoostTemp(v) => (SettingsField::HeatBoostTemp, v),
            Self::SetHysteresis(v) => (SettingsField::Hysteresis, v),
            Self::SetBoostDuration(minutes) => {
                return store.set_field(SettingsField::BoostDurationMinutes, minutes, now_ms)
            }
            Self::SetDayStartTime(hour, minute) => {
                return set_pair(store, SettingsField::DayStartHour, hour, minute, now_ms)
            }
            Self::SetNightStartTime(hour, minute) => {
                return set_pair(store, SettingsField::NightStartHour, hour, minute, now_ms)
            }
            Self::SetBoostStartTime(hour, minute) => {
                return set_pair(store, SettingsField::BoostStartHour, hour, minute, now_ms)
            }
            Self::SetShadeOpenTime(hour, minute) => {
                return set_pair(store, SettingsField::ShadeOpenHour, hour, minute, now_ms)
            }
            Self::SetShadeCloseTime(hour, minute) => {
                return set_pair(store, SettingsField::ShadeCloseHour, hour, minute, now_ms)
            }
            Self::SetClockField(field, value) => return store.set_field(field, value, now_ms),
        };

        store.set_field(field, value, now_ms)
    }
}

fn set_pair<D: BlockDevice>(
    store: &mut SettingsStore<D>,
    hour_field: SettingsField,
    hour: u8,
    minute: u8,
    now_ms: u64,
) -> Result<(), FieldError> {
    let minute_field = hour_field
        .paired_minute()
        .ok_or(FieldError::NotScheduleHour(hour_field.as_str()))?;
    store.set_field(hour_field, hour, now_ms)?;
    store.set_field(minute_field, minute, now_ms)
}

/// Read-only copy of the settings kept by the core that does not own the
/// store. It only changes through an explicit [`SettingsMirror::refresh`]
/// with a snapshot pulled from the owner.
#[derive(Debug, Clone, Default)]
pub struct SettingsMirror {
    snapshot: Option<SettingsRecord>,
    refreshed_at_ms: Option<u64>,
}

impl SettingsMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(&mut self, record: SettingsRecord, now_ms: u64) {
        self.snapshot = Some(record);
        self.refreshed_at_ms = Some(now_ms);
    }

    pub fn get(&self) -> Option<&SettingsRecord> {
        self.snapshot.as_ref()
    }

    pub fn age_ms(&self, now_ms: u64) -> Option<u64> {
        self.refreshed_at_ms
            .map(|refreshed| now_ms.saturating_sub(refreshed))
    }
}
