use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{FieldError, RecordError};

pub const SETTINGS_MAGIC: u32 = 0xCAFE_F010;
pub const SETTINGS_VERSION: u16 = 4;

pub const HEADER_LEN: usize = 8;
pub const PAYLOAD_LEN: usize = 40;
pub const RECORD_LEN: usize = HEADER_LEN + PAYLOAD_LEN;

/// The persisted controller configuration. On flash it is preceded by a
/// [`RecordHeader`]; the field order of [`SettingsField::ALL`] is the byte
/// order of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsRecord {
    pub vent_open_temp_stage1: f32,
    pub vent_open_temp_stage2: f32,
    pub vent_open_temp_stage3: f32,
    pub heat_set_temp_day: f32,
    pub heat_set_temp_night: f32,
    pub heat_boost_temp: f32,
    pub hysteresis: f32,
    pub day_start_hour: u8,
    pub day_start_minute: u8,
    pub night_start_hour: u8,
    pub night_start_minute: u8,
    pub boost_start_hour: u8,
    pub boost_start_minute: u8,
    pub boost_duration_minutes: u16,
    pub shade_open_hour: u8,
    pub shade_open_minute: u8,
    pub shade_close_hour: u8,
    pub shade_close_minute: u8,
}

impl Default for SettingsRecord {
    fn default() -> Self {
        Self {
            vent_open_temp_stage1: 25.0,
            vent_open_temp_stage2: 27.5,
            vent_open_temp_stage3: 30.0,
            heat_set_temp_day: 20.5,
            heat_set_temp_night: 18.5,
            heat_boost_temp: 22.5,
            hysteresis: 1.0,
            day_start_hour: 7,
            day_start_minute: 0,
            night_start_hour: 19,
            night_start_minute: 0,
            boost_start_hour: 6,
            boost_start_minute: 30,
            boost_duration_minutes: 60,
            shade_open_hour: 8,
            shade_open_minute: 15,
            shade_close_hour: 17,
            shade_close_minute: 45,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub magic: u32,
    pub version: u16,
    pub checksum: u16,
}

impl RecordHeader {
    fn parse(bytes: &[u8; HEADER_LEN]) -> Self {
        Self {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            version: u16::from_le_bytes([bytes[4], bytes[5]]),
            checksum: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    fn write(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6..8].copy_from_slice(&self.checksum.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingsField {
    VentOpenTempStage1,
    VentOpenTempStage2,
    VentOpenTempStage3,
    HeatSetTempDay,
    HeatSetTempNight,
    HeatBoostTemp,
    Hysteresis,
    DayStartHour,
    DayStartMinute,
    NightStartHour,
    NightStartMinute,
    BoostStartHour,
    BoostStartMinute,
    BoostDurationMinutes,
    ShadeOpenHour,
    ShadeOpenMinute,
    ShadeCloseHour,
    ShadeCloseMinute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Degrees Celsius, `f32`.
    Temperature,
    /// Hour or minute of day, `u8`. Ranges are not enforced here.
    Clock,
    /// Duration in minutes, `u16`.
    Minutes,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Temperature(f32),
    Clock(u8),
    Minutes(u16),
}

impl SettingsField {
    pub const ALL: [SettingsField; 18] = [
        Self::VentOpenTempStage1,
        Self::VentOpenTempStage2,
        Self::VentOpenTempStage3,
        Self::HeatSetTempDay,
        Self::HeatSetTempNight,
        Self::HeatBoostTemp,
        Self::Hysteresis,
        Self::DayStartHour,
        Self::DayStartMinute,
        Self::NightStartHour,
        Self::NightStartMinute,
        Self::BoostStartHour,
        Self::BoostStartMinute,
        Self::BoostDurationMinutes,
        Self::ShadeOpenHour,
        Self::ShadeOpenMinute,
        Self::ShadeCloseHour,
        Self::ShadeCloseMinute,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VentOpenTempStage1 => "ventOpenTempStage1",
            Self::VentOpenTempStage2 => "ventOpenTempStage2",
            Self::VentOpenTempStage3 => "ventOpenTempStage3",
            Self::HeatSetTempDay => "heatSetTempDay",
            Self::HeatSetTempNight => "heatSetTempNight",
            Self::HeatBoostTemp => "heatBoostTemp",
            Self::Hysteresis => "hysteresis",
            Self::DayStartHour => "dayStartHour",
            Self::DayStartMinute => "dayStartMinute",
            Self::NightStartHour => "nightStartHour",
            Self::NightStartMinute => "nightStartMinute",
            Self::BoostStartHour => "boostStartHour",
            Self::BoostStartMinute => "boostStartMinute",
            Self::BoostDurationMinutes => "boostDurationMinutes",
            Self::ShadeOpenHour => "shadeOpenHour",
            Self::ShadeOpenMinute => "shadeOpenMinute",
            Self::ShadeCloseHour => "shadeCloseHour",
            Self::ShadeCloseMinute => "shadeCloseMinute",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Self::VentOpenTempStage1
            | Self::VentOpenTempStage2
            | Self::VentOpenTempStage3
            | Self::HeatSetTempDay
            | Self::HeatSetTempNight
            | Self::HeatBoostTemp
            | Self::Hysteresis => FieldKind::Temperature,
            Self::DayStartHour
            | Self::DayStartMinute
            | Self::NightStartHour
            | Self::NightStartMinute
            | Self::BoostStartHour
            | Self::BoostStartMinute
            | Self::ShadeOpenHour
            | Self::ShadeOpenMinute
            | Self::ShadeCloseHour
            | Self::ShadeCloseMinute => FieldKind::Clock,
            Self::BoostDurationMinutes => FieldKind::Minutes,
        }
    }

    /// The minute field completing a schedule point, for its hour field.
    pub fn paired_minute(self) -> Option<SettingsField> {
        match self {
            Self::DayStartHour => Some(Self::DayStartMinute),
            Self::NightStartHour => Some(Self::NightStartMinute),
            Self::BoostStartHour => Some(Self::BoostStartMinute),
            Self::ShadeOpenHour => Some(Self::ShadeOpenMinute),
            Self::ShadeCloseHour => Some(Self::ShadeCloseMinute),
            Self::VentOpenTempStage1
            | Self::VentOpenTempStage2
            | Self::VentOpenTempStage3
            | Self::HeatSetTempDay
            | Self::HeatSetTempNight
            | Self::HeatBoostTemp
            | Self::Hysteresis
            | Self::DayStartMinute
            | Self::NightStartMinute
            | Self::BoostStartMinute
            | Self::BoostDurationMinutes
            | Self::ShadeOpenMinute
            | Self::ShadeCloseMinute => None,
        }
    }
}

impl fmt::Display for SettingsField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingsField {
    type Err = FieldError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == name)
            .ok_or_else(|| FieldError::UnknownField(name.to_string()))
    }
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Clock => "clock",
            Self::Minutes => "minutes",
        }
    }

    fn encoded_len(self) -> usize {
        match self {
            Self::Temperature => 4,
            Self::Clock => 1,
            Self::Minutes => 2,
        }
    }

    fn read_le(self, src: &[u8]) -> FieldValue {
        match self {
            Self::Temperature => {
                FieldValue::Temperature(f32::from_le_bytes([src[0], src[1], src[2], src[3]]))
            }
            Self::Clock => FieldValue::Clock(src[0]),
            Self::Minutes => FieldValue::Minutes(u16::from_le_bytes([src[0], src[1]])),
        }
    }
}

impl FieldValue {
    pub fn kind(self) -> FieldKind {
        match self {
            Self::Temperature(_) => FieldKind::Temperature,
            Self::Clock(_) => FieldKind::Clock,
            Self::Minutes(_) => FieldKind::Minutes,
        }
    }

    fn write_le(self, dst: &mut [u8]) -> usize {
        match self {
            Self::Temperature(value) => dst[..4].copy_from_slice(&value.to_le_bytes()),
            Self::Clock(value) => dst[0] = value,
            Self::Minutes(value) => dst[..2].copy_from_slice(&value.to_le_bytes()),
        }
        self.kind().encoded_len()
    }
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        Self::Temperature(value)
    }
}

impl From<u8> for FieldValue {
    fn from(value: u8) -> Self {
        Self::Clock(value)
    }
}

impl From<u16> for FieldValue {
    fn from(value: u16) -> Self {
        Self::Minutes(value)
    }
}

enum FieldSlot<'a> {
    Temperature(&'a mut f32),
    Clock(&'a mut u8),
    Minutes(&'a mut u16),
}

impl SettingsRecord {
    pub fn get(&self, field: SettingsField) -> FieldValue {
        use FieldValue::{Clock, Minutes, Temperature};

        match field {
            SettingsField::VentOpenTempStage1 => Temperature(self.vent_open_temp_stage1),
            SettingsField::VentOpenTempStage2 => Temperature(self.vent_open_temp_stage2),
            SettingsField::VentOpenTempStage3 => Temperature(self.vent_open_temp_stage3),
            SettingsField::HeatSetTempDay => Temperature(self.heat_set_temp_day),
            SettingsField::HeatSetTempNight => Temperature(self.heat_set_temp_night),
            SettingsField::HeatBoostTemp => Temperature(self.heat_boost_temp),
            SettingsField::Hysteresis => Temperature(self.hysteresis),
            SettingsField::DayStartHour => Clock(self.day_start_hour),
            SettingsField::DayStartMinute => Clock(self.day_start_minute),
            SettingsField::NightStartHour => Clock(self.night_start_hour),
            SettingsField::NightStartMinute => Clock(self.night_start_minute),
            SettingsField::BoostStartHour => Clock(self.boost_start_hour),
            SettingsField::BoostStartMinute => Clock(self.boost_start_minute),
            SettingsField::BoostDurationMinutes => Minutes(self.boost_duration_minutes),
            SettingsField::ShadeOpenHour => Clock(self.shade_open_hour),
            SettingsField::ShadeOpenMinute => Clock(self.shade_open_minute),
            SettingsField::ShadeCloseHour => Clock(self.shade_close_hour),
            SettingsField::ShadeCloseMinute => Clock(self.shade_close_minute),
        }
    }

    /// Overwrites one field. Only the value kind is checked; semantic ranges
    /// (hours 0-23, sane temperatures) are left to the caller.
    pub fn set(&mut self, field: SettingsField, value: FieldValue) -> Result<(), FieldError> {
        match (self.slot_mut(field), value) {
            (FieldSlot::Temperature(slot), FieldValue::Temperature(v)) => *slot = v,
            (FieldSlot::Clock(slot), FieldValue::Clock(v)) => *slot = v,
            (FieldSlot::Minutes(slot), FieldValue::Minutes(v)) => *slot = v,
            _ => {
                return Err(FieldError::KindMismatch {
                    field: field.as_str(),
                    expected: field.kind().as_str(),
                })
            }
        }
        Ok(())
    }

    fn slot_mut(&mut self, field: SettingsField) -> FieldSlot<'_> {
        use FieldSlot::{Clock, Minutes, Temperature};

        match field {
            SettingsField::VentOpenTempStage1 => Temperature(&mut self.vent_open_temp_stage1),
            SettingsField::VentOpenTempStage2 => Temperature(&mut self.vent_open_temp_stage2),
            SettingsField::VentOpenTempStage3 => Temperature(&mut self.vent_open_temp_stage3),
            SettingsField::HeatSetTempDay => Temperature(&mut self.heat_set_temp_day),
            SettingsField::HeatSetTempNight => Temperature(&mut self.heat_set_temp_night),
            SettingsField::HeatBoostTemp => Temperature(&mut self.heat_boost_temp),
            SettingsField::Hysteresis => Temperature(&mut self.hysteresis),
            SettingsField::DayStartHour => Clock(&mut self.day_start_hour),
            SettingsField::DayStartMinute => Clock(&mut self.day_start_minute),
            SettingsField::NightStartHour => Clock(&mut self.night_start_hour),
            SettingsField::NightStartMinute => Clock(&mut self.night_start_minute),
            SettingsField::BoostStartHour => Clock(&mut self.boost_start_hour),
            SettingsField::BoostStartMinute => Clock(&mut self.boost_start_minute),
            SettingsField::BoostDurationMinutes => Minutes(&mut self.boost_duration_minutes),
            SettingsField::ShadeOpenHour => Clock(&mut self.shade_open_hour),
            SettingsField::ShadeOpenMinute => Clock(&mut self.shade_open_minute),
            SettingsField::ShadeCloseHour => Clock(&mut self.shade_close_hour),
            SettingsField::ShadeCloseMinute => Clock(&mut self.shade_close_minute),
        }
    }

    pub fn encode_payload(&self) -> [u8; PAYLOAD_LEN] {
        let mut out = [0_u8; PAYLOAD_LEN];
        let mut at = 0;
        for field in SettingsField::ALL {
            at += self.get(field).write_le(&mut out[at..]);
        }
        debug_assert_eq!(at, PAYLOAD_LEN);
        out
    }

    fn decode_payload(payload: &[u8]) -> Self {
        let mut record = Self::default();
        let mut at = 0;
        for field in SettingsField::ALL {
            let kind = field.kind();
            let value = kind.read_le(&payload[at..]);
            at += kind.encoded_len();
            // Kinds come from the field itself, so this cannot mismatch.
            let _ = record.set(field, value);
        }
        record
    }

    /// Header-first image with a freshly computed checksum.
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let payload = self.encode_payload();
        let header = RecordHeader {
            magic: SETTINGS_MAGIC,
            version: SETTINGS_VERSION,
            checksum: payload_checksum(&payload),
        };

        let mut out = [0_u8; RECORD_LEN];
        header.write(&mut out[..HEADER_LEN]);
        out[HEADER_LEN..].copy_from_slice(&payload);
        out
    }

    /// Verifies magic, version and checksum, in that order, and decodes the
    /// payload. Bytes past [`RECORD_LEN`] are padding and ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < RECORD_LEN {
            return Err(RecordError::Truncated {
                len: bytes.len(),
                expected: RECORD_LEN,
            });
        }

        let mut raw_header = [0_u8; HEADER_LEN];
        raw_header.copy_from_slice(&bytes[..HEADER_LEN]);
        let header = RecordHeader::parse(&raw_header);

        if header.magic != SETTINGS_MAGIC {
            return Err(RecordError::BadMagic {
                found: header.magic,
            });
        }
        if header.version != SETTINGS_VERSION {
            return Err(RecordError::VersionMismatch {
                found: header.version,
                expected: SETTINGS_VERSION,
            });
        }

        let payload = &bytes[HEADER_LEN..RECORD_LEN];
        let computed = payload_checksum(payload);
        if computed != header.checksum {
            return Err(RecordError::ChecksumMismatch {
                stored: header.checksum,
                computed,
            });
        }

        Ok(Self::decode_payload(payload))
    }
}

/// Additive 16-bit checksum over the payload bytes.
pub fn payload_checksum(payload: &[u8]) -> u16 {
    payload
        .iter()
        .fold(0_u16, |sum, byte| sum.wrapping_add(u16::from(*byte)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_documented_literals() {
        let record = SettingsRecord::default();

        assert_eq!(record.vent_open_temp_stage1, 25.0);
        assert_eq!(record.vent_open_temp_stage2, 27.5);
        assert_eq!(record.vent_open_temp_stage3, 30.0);
        assert_eq!(record.heat_set_temp_day, 20.5);
        assert_eq!(record.heat_set_temp_night, 18.5);
        assert_eq!(record.heat_boost_temp, 22.5);
        assert_eq!(record.hysteresis, 1.0);
        assert_eq!((record.day_start_hour, record.day_start_minute), (7, 0));
        assert_eq!((record.night_start_hour, record.night_start_minute), (19, 0));
        assert_eq!((record.boost_start_hour, record.boost_start_minute), (6, 30));
        assert_eq!(record.boost_duration_minutes, 60);
        assert_eq!((record.shade_open_hour, record.shade_open_minute), (8, 15));
        assert_eq!((record.shade_close_hour, record.shade_close_minute), (17, 45));
    }

    #[test]
    fn defaults_are_bit_identical_across_calls() {
        assert_eq!(SettingsRecord::default().encode(), SettingsRecord::default().encode());
    }

    #[test]
    fn layout_is_header_first_little_endian() {
        let image = SettingsRecord::default().encode();

        assert_eq!(&image[0..4], &[0x10, 0xF0, 0xFE, 0xCA]);
        assert_eq!(&image[4..6], &[4, 0]);
        assert_eq!(&image[8..12], &25.0_f32.to_le_bytes());
        // dayStartHour follows the seven temperatures.
        assert_eq!(image[36], 7);
        assert_eq!(&image[42..44], &60_u16.to_le_bytes());
        assert_eq!(image[47], 45);
    }

    #[test]
    fn checksum_covers_payload_only() {
        let image = SettingsRecord::default().encode();
        let expected: u32 = image[HEADER_LEN..].iter().map(|b| u32::from(*b)).sum();

        assert_eq!(u16::from_le_bytes([image[6], image[7]]), expected as u16);
    }

    #[test]
    fn decode_restores_mutated_record() {
        let mut record = SettingsRecord::default();
        record.heat_set_temp_day = 21.0;
        record.shade_close_hour = 99;
        record.boost_duration_minutes = 600;

        assert_eq!(SettingsRecord::decode(&record.encode()), Ok(record));
    }

    #[test]
    fn decode_ignores_trailing_padding() {
        let mut padded = SettingsRecord::default().encode().to_vec();
        padded.resize(64, 0xFF);

        assert_eq!(
            SettingsRecord::decode(&padded),
            Ok(SettingsRecord::default())
        );
    }

    #[test]
    fn decode_rejects_erased_flash() {
        let erased = [0xFF_u8; RECORD_LEN];
        assert_eq!(
            SettingsRecord::decode(&erased),
            Err(RecordError::BadMagic { found: 0xFFFF_FFFF })
        );
    }

    #[test]
    fn decode_rejects_other_version() {
        let mut image = SettingsRecord::default().encode();
        image[4] = 3;

        assert_eq!(
            SettingsRecord::decode(&image),
            Err(RecordError::VersionMismatch {
                found: 3,
                expected: SETTINGS_VERSION
            })
        );
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let image = SettingsRecord::default().encode();
        assert!(matches!(
            SettingsRecord::decode(&image[..20]),
            Err(RecordError::Truncated { len: 20, .. })
        ));
    }

    #[test]
    fn any_single_byte_flip_is_detected() {
        let image = SettingsRecord::default().encode();

        for index in 0..RECORD_LEN {
            for flip in [0xFF_u8, 0x01, 0x80] {
                let mut corrupt = image;
                corrupt[index] ^= flip;
                assert!(
                    SettingsRecord::decode(&corrupt).is_err(),
                    "flip 0x{flip:02X} at byte {index} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn field_names_round_trip() {
        for field in SettingsField::ALL {
            assert_eq!(field.as_str().parse::<SettingsField>(), Ok(field));
        }
        assert_eq!(
            "ventTemp".parse::<SettingsField>(),
            Err(FieldError::UnknownField("ventTemp".to_string()))
        );
    }

    #[test]
    fn serde_names_match_field_names() {
        let json = serde_json::to_value(SettingsRecord::default()).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(object.len(), SettingsField::ALL.len());
        for field in SettingsField::ALL {
            assert!(object.contains_key(field.as_str()), "missing {field}");
        }
    }

    #[test]
    fn set_rejects_wrong_kind() {
        let mut record = SettingsRecord::default();

        assert_eq!(
            record.set(SettingsField::DayStartHour, FieldValue::Temperature(7.5)),
            Err(FieldError::KindMismatch {
                field: "dayStartHour",
                expected: "clock"
            })
        );
        assert_eq!(record, SettingsRecord::default());
    }

    #[test]
    fn set_accepts_out_of_range_clock_values() {
        let mut record = SettingsRecord::default();
        record
            .set(SettingsField::NightStartMinute, FieldValue::Clock(75))
            .unwrap();

        assert_eq!(record.night_start_minute, 75);
        assert_eq!(
            record.get(SettingsField::NightStartMinute),
            FieldValue::Clock(75)
        );
    }

    #[test]
    fn set_touches_only_its_own_field() {
        for field in SettingsField::ALL {
            let value = match field.kind() {
                FieldKind::Temperature => FieldValue::Temperature(-3.25),
                FieldKind::Clock => FieldValue::Clock(201),
                FieldKind::Minutes => FieldValue::Minutes(4321),
            };
            let mut record = SettingsRecord::default();
            record.set(field, value).unwrap();

            for other in SettingsField::ALL {
                let expected = if other == field {
                    value
                } else {
                    SettingsRecord::default().get(other)
                };
                assert_eq!(record.get(other), expected, "setting {field} changed {other}");
            }
        }
    }

    #[test]
    fn only_hour_fields_have_a_paired_minute() {
        for field in SettingsField::ALL {
            match field.paired_minute() {
                Some(minute) => {
                    assert!(field.as_str().ends_with("Hour"));
                    assert_eq!(minute.as_str(), field.as_str().replace("Hour", "Minute"));
                }
                None => assert!(!field.as_str().ends_with("Hour"), "{field} lost its minute"),
            }
        }
    }
}
