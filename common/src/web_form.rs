use std::collections::HashMap;

use crate::{record::SettingsField, rpc::SettingsCommand};

/// Parses a `/set` query string into remote calls.
///
/// Parsing is permissive: unknown keys are ignored, and a value that does not
/// parse (or is not finite) counts as "not set" and leaves its field alone.
/// When only one half of an hour/minute pair is present the call carries just
/// that half, so the owner keeps its own value for the other.
pub fn parse_settings_form(query: &str) -> Vec<SettingsCommand> {
    let params = query_pairs(query);
    let temperature = |key: &str| {
        params
            .get(key)
            .and_then(|value| value.trim().parse::<f32>().ok())
            .filter(|value| value.is_finite())
    };
    let clock = |key: &str| {
        params
            .get(key)
            .and_then(|value| value.trim().parse::<u8>().ok())
    };

    let mut commands = Vec::new();

    let temperatures: [(&str, fn(f32) -> SettingsCommand); 7] = [
        ("vent1_temp", SettingsCommand::SetVentTempStage1),
        ("vent2_temp", SettingsCommand::SetVentTempStage2),
        ("vent3_temp", SettingsCommand::SetVentTempStage3),
        ("heat_day_temp", SettingsCommand::SetHeatTempDay),
        ("heat_night_temp", SettingsCommand::SetHeatTempNight),
        ("boost_temp", SettingsCommand::SetBoostTemp),
        ("hysteresis", SettingsCommand::SetHysteresis),
    ];
    for (key, command) in temperatures {
        if let Some(value) = temperature(key) {
            commands.push(command(value));
        }
    }

    let pairs: [(&str, SettingsField, SettingsField, fn(u8, u8) -> SettingsCommand); 5] = [
        (
            "day_start",
            SettingsField::DayStartHour,
            SettingsField::DayStartMinute,
            SettingsCommand::SetDayStartTime,
        ),
        (
            "night_start",
            SettingsField::NightStartHour,
            SettingsField::NightStartMinute,
            SettingsCommand::SetNightStartTime,
        ),
        (
            "boost_start",
            SettingsField::BoostStartHour,
            SettingsField::BoostStartMinute,
            SettingsCommand::SetBoostStartTime,
        ),
        (
            "shade_open",
            SettingsField::ShadeOpenHour,
            SettingsField::ShadeOpenMinute,
            SettingsCommand::SetShadeOpenTime,
        ),
        (
            "shade_close",
            SettingsField::ShadeCloseHour,
            SettingsField::ShadeCloseMinute,
            SettingsCommand::SetShadeCloseTime,
        ),
    ];
    for (prefix, hour_field, minute_field, command) in pairs {
        let hour = clock(&format!("{prefix}_hr"));
        let minute = clock(&format!("{prefix}_min"));
        match (hour, minute) {
            (Some(hour), Some(minute)) => commands.push(command(hour, minute)),
            (Some(hour), None) => commands.push(SettingsCommand::SetClockField(hour_field, hour)),
            (None, Some(minute)) => {
                commands.push(SettingsCommand::SetClockField(minute_field, minute))
            }
            (None, None) => {}
        }
    }

    if let Some(minutes) = params
        .get("boost_duration")
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        commands.push(SettingsCommand::SetBoostDuration(minutes));
    }

    commands
}

/// Splits `a=1&b=2` (with or without a leading `?`) and form-decodes each
/// value. Later keys win.
fn query_pairs(query: &str) -> HashMap<&str, String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    query
        .split('&')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            Some((name, form_decode(value)))
        })
        .collect()
}

/// `+` becomes a space and `%XX` its byte. A `%` without two hex digits
/// after it is kept as is.
fn form_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut at = 0;
    while at < bytes.len() {
        match bytes[at] {
            b'+' => out.push(b' '),
            b'%' => {
                let escaped = bytes
                    .get(at + 1..at + 3)
                    .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match escaped {
                    Some(byte) => {
                        out.push(byte);
                        at += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            byte => out.push(byte),
        }
        at += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
