//! Command encoding
//!
//! Each high-level intent is validated and turned into a [`PendingCommand`]:
//! the register writes to issue, in order. Nothing here performs I/O, so a
//! rejected input never reaches the device.

use std::fmt;

use crate::codec::{encode_tenths, u32_to_words};
use crate::error::{FuturaError, FuturaResult};
use crate::register_map::{
    RegisterField, AWAY_BEGIN, AWAY_END, BOOST_REMAINING, BYPASS_ENABLE, CIRCULATION_REMAINING,
    COMFORT_ENABLE, COOLING_ENABLE, HEATING_ENABLE, HUMI_SETPOINT, MODE, NIGHT_REMAINING,
    PARTY_REMAINING, TEMP_SETPOINT, TIME_PROGRAM,
};
use crate::snapshot::VentilationMode;

/// Default away-window length when the end is missing or not after the begin
pub const AWAY_DEFAULT_SECONDS: i64 = 7 * 24 * 3600;

/// Seconds written by the boost preset button
pub const BOOST_PRESET_SECONDS: u32 = 3600;

/// Seconds written by the circulation preset button
pub const CIRCULATION_PRESET_SECONDS: u32 = 1800;

/// Longest boost or circulation timer accepted
pub const MAX_TIMER_SECONDS: u32 = 7200;

/// Boost minutes are floored to this grid
pub const BOOST_MINUTE_STEP: u32 = 15;

pub const NIGHT_MAX_HOURS: i64 = 10;
pub const PARTY_MAX_HOURS: i64 = 8;

pub const TEMPERATURE_MIN: f64 = 15.0;
pub const TEMPERATURE_MAX: f64 = 28.0;
pub const HUMIDITY_MIN: f64 = 0.0;
pub const HUMIDITY_MAX: f64 = 100.0;

/// One register write of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterWrite {
    /// FC06
    Single { address: u16, value: u16 },
    /// FC16
    Multiple { address: u16, values: Vec<u16> },
}

impl RegisterWrite {
    pub fn single(address: u16, value: u16) -> Self {
        Self::Single { address, value }
    }

    /// 32-bit value as two words, high first
    pub fn u32(address: u16, value: u32) -> Self {
        Self::Multiple {
            address,
            values: u32_to_words(value).to_vec(),
        }
    }

    pub fn address(&self) -> u16 {
        match self {
            Self::Single { address, .. } | Self::Multiple { address, .. } => *address,
        }
    }
}

impl fmt::Display for RegisterWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single { address, value } => write!(f, "holding {} = {}", address, value),
            Self::Multiple { address, values } => write!(f, "holding {} = {:?}", address, values),
        }
    }
}

/// Writes of one validated command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub label: &'static str,
    pub writes: Vec<RegisterWrite>,
}

impl PendingCommand {
    fn new(label: &'static str, writes: Vec<RegisterWrite>) -> Self {
        Self { label, writes }
    }

    fn single(label: &'static str, field: &RegisterField, value: u16) -> Self {
        Self::new(label, vec![RegisterWrite::single(field.address, value)])
    }
}

impl fmt::Display for PendingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.label)?;
        for (i, write) in self.writes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", write)?;
        }
        f.write_str("]")
    }
}

/// On/off switches held in single holding registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    TimeProgram,
    Bypass,
    Heating,
    Cooling,
    Comfort,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Self::TimeProgram,
        Self::Bypass,
        Self::Heating,
        Self::Cooling,
        Self::Comfort,
    ];

    pub fn field(&self) -> &'static RegisterField {
        match self {
            Self::TimeProgram => &TIME_PROGRAM,
            Self::Bypass => &BYPASS_ENABLE,
            Self::Heating => &HEATING_ENABLE,
            Self::Cooling => &COOLING_ENABLE,
            Self::Comfort => &COMFORT_ENABLE,
        }
    }
}

/// Humidity setpoint presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HumidityPreset {
    Dry,
    Comfort,
    Humid,
}

impl HumidityPreset {
    pub fn percent(&self) -> f64 {
        match self {
            Self::Dry => 25.0,
            Self::Comfort => 50.0,
            Self::Humid => 75.0,
        }
    }

    /// Nearest preset to a setpoint
    pub fn from_setpoint(percent: f64) -> Self {
        if percent < 37.5 {
            Self::Dry
        } else if percent < 62.5 {
            Self::Comfort
        } else {
            Self::Humid
        }
    }
}

/// Resolved away window, epoch seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwayWindow {
    pub begin: u32,
    pub end: u32,
}

impl AwayWindow {
    /// Fill in a missing begin with `now` and repair a missing or
    /// non-increasing end to `begin + 7 days`.
    pub fn resolve(begin: Option<i64>, end: Option<i64>, now: i64) -> FuturaResult<Self> {
        let begin = begin.unwrap_or(now);
        let end = match end {
            Some(end) if end > begin => end,
            _ => begin.saturating_add(AWAY_DEFAULT_SECONDS),
        };
        Ok(Self {
            begin: epoch_u32("away_begin", begin)?,
            end: epoch_u32("away_end", end)?,
        })
    }
}

fn epoch_u32(field: &'static str, value: i64) -> FuturaResult<u32> {
    u32::try_from(value).map_err(|_| FuturaError::range(field, value, 0, u32::MAX as i64))
}

fn timer_seconds(field: &'static str, seconds: u32) -> FuturaResult<u16> {
    if seconds > MAX_TIMER_SECONDS {
        return Err(FuturaError::range(field, seconds, 0, MAX_TIMER_SECONDS));
    }
    Ok(seconds as u16)
}

fn timer_minutes(field: &'static str, minutes: u32) -> FuturaResult<u32> {
    let max = MAX_TIMER_SECONDS / 60;
    if minutes > max {
        return Err(FuturaError::range(field, minutes, 0, max));
    }
    Ok(minutes)
}

fn bounded(field: &'static str, value: f64, min: f64, max: f64) -> FuturaResult<f64> {
    if !value.is_finite() || value < min || value > max {
        return Err(FuturaError::range(field, value, min, max));
    }
    Ok(value)
}

/// Write the raw mode to holding 0
pub fn set_mode(mode: VentilationMode) -> PendingCommand {
    PendingCommand::single("set_mode", &MODE, mode.raw())
}

/// Boost timer in seconds, `0` stops it
pub fn arm_boost(seconds: u32) -> FuturaResult<PendingCommand> {
    let seconds = timer_seconds("boost_seconds", seconds)?;
    Ok(PendingCommand::single("arm_boost", &BOOST_REMAINING, seconds))
}

/// Boost timer in minutes, floored to the 15-minute grid
pub fn arm_boost_minutes(minutes: u32) -> FuturaResult<PendingCommand> {
    let minutes = timer_minutes("boost_minutes", minutes)?;
    let minutes = minutes / BOOST_MINUTE_STEP * BOOST_MINUTE_STEP;
    arm_boost(minutes * 60)
}

/// Circulation timer in seconds, `0` stops it
pub fn arm_circulation(seconds: u32) -> FuturaResult<PendingCommand> {
    let seconds = timer_seconds("circulation_seconds", seconds)?;
    Ok(PendingCommand::single(
        "arm_circulation",
        &CIRCULATION_REMAINING,
        seconds,
    ))
}

/// Circulation timer in whole minutes
pub fn arm_circulation_minutes(minutes: u32) -> FuturaResult<PendingCommand> {
    let minutes = timer_minutes("circulation_minutes", minutes)?;
    arm_circulation(minutes * 60)
}

/// Night timer; hours are clamped to `0..=10`
pub fn set_night_hours(hours: i64) -> PendingCommand {
    let hours = hours.clamp(0, NIGHT_MAX_HOURS);
    PendingCommand::single("set_night_hours", &NIGHT_REMAINING, (hours * 3600) as u16)
}

/// Party timer; hours are clamped to `0..=8`
pub fn set_party_hours(hours: i64) -> PendingCommand {
    let hours = hours.clamp(0, PARTY_MAX_HOURS);
    PendingCommand::single("set_party_hours", &PARTY_REMAINING, (hours * 3600) as u16)
}

/// Temperature setpoint in °C, written ×10
pub fn set_temperature_setpoint(celsius: f64) -> FuturaResult<PendingCommand> {
    let celsius = bounded("temperature_setpoint", celsius, TEMPERATURE_MIN, TEMPERATURE_MAX)?;
    Ok(PendingCommand::single(
        "set_temperature_setpoint",
        &TEMP_SETPOINT,
        encode_tenths(celsius),
    ))
}

/// Humidity setpoint in %, written ×10
pub fn set_humidity_setpoint(percent: f64) -> FuturaResult<PendingCommand> {
    let percent = bounded("humidity_setpoint", percent, HUMIDITY_MIN, HUMIDITY_MAX)?;
    Ok(PendingCommand::single(
        "set_humidity_setpoint",
        &HUMI_SETPOINT,
        encode_tenths(percent),
    ))
}

pub fn set_humidity_preset(preset: HumidityPreset) -> PendingCommand {
    PendingCommand::single(
        "set_humidity_preset",
        &HUMI_SETPOINT,
        encode_tenths(preset.percent()),
    )
}

/// `1` or `0` to the switch register of `feature`
pub fn set_feature(feature: Feature, enabled: bool) -> PendingCommand {
    PendingCommand::single("set_feature", feature.field(), enabled as u16)
}

/// Away window; see [`AwayWindow::resolve`] for defaulting
pub fn set_away_window(
    begin: Option<i64>,
    end: Option<i64>,
    now: i64,
) -> FuturaResult<PendingCommand> {
    let window = AwayWindow::resolve(begin, end, now)?;
    Ok(PendingCommand::new(
        "set_away_window",
        vec![
            RegisterWrite::u32(AWAY_BEGIN.address, window.begin),
            RegisterWrite::u32(AWAY_END.address, window.end),
        ],
    ))
}

pub fn clear_away_window() -> PendingCommand {
    PendingCommand::new(
        "clear_away_window",
        vec![
            RegisterWrite::u32(AWAY_BEGIN.address, 0),
            RegisterWrite::u32(AWAY_END.address, 0),
        ],
    )
}
