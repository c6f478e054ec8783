//! # Snapshot
//!
//! The immutable state published after one successful poll cycle. Built in
//! one step from a [`RawCycle`]; derived fields are pure functions of the
//! decoded registers.
//!
//! | Derived key | Rule |
//! |-------------|------|
//! | `mode_text` | label of `mode_raw` (0..=6), else [`UNKNOWN_MODE_LABEL`] |
//! | `boost_remaining_min`, `circulation_remaining_min` | `ceil(s / 60)` |
//! | `night_remaining_h`, `party_remaining_h` | `0` if `s == 0`, else `ceil(s / 3600)` |
//! | `away_begin_text`, `away_end_text` | [`AWAY_NOT_SET`] for 0, else local `YYYY-MM-DD HH:MM` |
//! | `alfa_count` | population count of the satellite bitmap |

use std::fmt;

use chrono::{DateTime, Local, TimeZone, Utc};

use crate::codec::{decode_at, RegisterWindow};
use crate::commands::{Feature, HumidityPreset};
use crate::error::{FuturaError, FuturaResult};
use crate::reader::RawCycle;
use crate::register_map::{self as map, satellite, Encoding, RegisterField, Scale, SATELLITE_SLOTS};
use crate::value::FieldValue;

/// `mode_text` for a raw mode outside 0..=6
pub const UNKNOWN_MODE_LABEL: &str = "Unknown";

/// Away-window text for an unset timestamp
pub const AWAY_NOT_SET: &str = "Not set";

const AWAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Ventilation mode register values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VentilationMode {
    Off,
    Level1,
    Level2,
    Level3,
    Level4,
    Level5,
    Auto,
}

impl VentilationMode {
    pub const ALL: [VentilationMode; 7] = [
        Self::Off,
        Self::Level1,
        Self::Level2,
        Self::Level3,
        Self::Level4,
        Self::Level5,
        Self::Auto,
    ];

    pub fn from_raw(raw: u16) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn raw(&self) -> u16 {
        *self as u16
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::Level1 => "1",
            Self::Level2 => "2",
            Self::Level3 => "3",
            Self::Level4 => "4",
            Self::Level5 => "5",
            Self::Auto => "Auto",
        }
    }
}

impl fmt::Display for VentilationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Label of a raw mode value, never failing.
pub fn mode_text(raw: u16) -> &'static str {
    VentilationMode::from_raw(raw)
        .map(|mode| mode.label())
        .unwrap_or(UNKNOWN_MODE_LABEL)
}

/// `ceil(seconds / 60)`
#[inline]
pub fn minutes_from_seconds(seconds: u32) -> u32 {
    seconds.div_ceil(60)
}

/// `0` for an inactive timer, otherwise `ceil(seconds / 3600)`.
///
/// A nonzero remainder below one hour reports 1, never 0.
#[inline]
pub fn hours_from_seconds(seconds: u32) -> u32 {
    if seconds == 0 {
        0
    } else {
        seconds.div_ceil(3600)
    }
}

/// Render an epoch timestamp in `tz`, or [`AWAY_NOT_SET`] for zero.
pub fn format_away_timestamp<Tz>(timestamp: u32, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    if timestamp == 0 {
        return AWAY_NOT_SET.to_string();
    }
    match tz.timestamp_opt(timestamp as i64, 0).earliest() {
        Some(at) => at.format(AWAY_TIME_FORMAT).to_string(),
        None => timestamp.to_string(),
    }
}

/// Input-register telemetry of the main unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitTelemetry {
    pub variant: u16,
    pub modes_bits: u32,
    pub errors_bits: u32,
    pub warnings_bits: u32,
    pub temp_outdoor: f64,
    pub temp_supply: f64,
    pub temp_extract: f64,
    pub temp_exhaust: f64,
    pub humi_outdoor: f64,
    pub humi_supply: f64,
    pub humi_extract: f64,
    pub humi_exhaust: f64,
    pub temp_outdoor_ntc: f64,
    /// Percent
    pub filter_wear: u16,
    /// Watts
    pub power: u16,
    /// Watts
    pub heat_recovering: u16,
    /// Watts
    pub heating_power: u16,
    /// m³/h
    pub air_flow: u16,
}

/// Holding-register command state
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    pub mode_raw: u16,
    pub boost_remaining_s: u16,
    pub circulation_remaining_s: u16,
    pub overpressure_remaining_s: u16,
    pub night_remaining_s: u16,
    pub party_remaining_s: u16,
    pub away_begin_ts: u32,
    pub away_end_ts: u32,
    pub temp_setpoint: f64,
    pub humi_setpoint: f64,
    pub time_program_raw: u16,
    pub antiradon_raw: u16,
    pub bypass_enable_raw: u16,
    pub heating_enable_raw: u16,
    pub cooling_enable_raw: u16,
    pub comfort_enable_raw: u16,
}

impl ControlState {
    fn feature_raw(&self, feature: Feature) -> u16 {
        match feature {
            Feature::TimeProgram => self.time_program_raw,
            Feature::Bypass => self.bypass_enable_raw,
            Feature::Heating => self.heating_enable_raw,
            Feature::Cooling => self.cooling_enable_raw,
            Feature::Comfort => self.comfort_enable_raw,
        }
    }
}

/// One connected ALFA satellite
#[derive(Debug, Clone, PartialEq)]
pub struct SatelliteReading {
    /// 1-indexed slot
    pub slot: u8,
    pub mb_address: u16,
    pub options: u16,
    pub co2: u16,
    pub temperature: f64,
    pub humidity: f64,
    pub ntc_temperature: f64,
}

impl SatelliteReading {
    /// Decode the six slot words held by `window`.
    pub fn decode(slot: u8, window: &RegisterWindow) -> FuturaResult<Self> {
        let base = window.base;
        let at = |(offset, encoding, scale): (u16, Encoding, Scale)| {
            decode_at(window, base + offset, encoding, scale)
        };
        Ok(Self {
            slot,
            mb_address: as_int(at(satellite::MB_ADDRESS)?)? as u16,
            options: as_int(at(satellite::OPTIONS)?)? as u16,
            co2: as_int(at(satellite::CO2)?)? as u16,
            temperature: as_float(at(satellite::TEMPERATURE)?)?,
            humidity: as_float(at(satellite::HUMIDITY)?)?,
            ntc_temperature: as_float(at(satellite::NTC_TEMPERATURE)?)?,
        })
    }
}

fn as_int(value: FieldValue) -> FuturaResult<i64> {
    value
        .as_i64()
        .ok_or_else(|| FuturaError::decode(format!("expected integer, got {}", value.type_name())))
}

fn as_float(value: FieldValue) -> FuturaResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| FuturaError::decode(format!("expected number, got {}", value.type_name())))
}

/// Fully decoded device state from one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    pub telemetry: UnitTelemetry,
    pub control: ControlState,
    pub mode: Option<VentilationMode>,
    pub mode_text: String,
    pub boost_remaining_min: u32,
    pub circulation_remaining_min: u32,
    pub night_remaining_h: u32,
    pub party_remaining_h: u32,
    pub away_begin_text: String,
    pub away_end_text: String,
    pub satellite_bits: u16,
    /// Slot `i` lives at index `i - 1`; absent when not connected
    pub satellites: [Option<SatelliteReading>; SATELLITE_SLOTS],
}

impl Snapshot {
    /// Build a snapshot in the local time zone, stamped now.
    pub fn from_raw(raw: &RawCycle) -> FuturaResult<Self> {
        Self::from_raw_in(raw, &Local, Utc::now())
    }

    /// Build a snapshot rendering away timestamps in `tz`.
    pub fn from_raw_in<Tz>(raw: &RawCycle, tz: &Tz, captured_at: DateTime<Utc>) -> FuturaResult<Self>
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        let int = |field: &RegisterField| raw.raw(field);
        let u16_of = |field: &RegisterField| int(field).map(|v| v as u16);
        let u32_of = |field: &RegisterField| int(field).map(|v| v as u32);
        // Scaled by the descriptor
        let float = |field: &RegisterField| {
            raw.window_for(field)
                .and_then(|window| window.decode(field))
                .and_then(as_float)
        };

        let telemetry = UnitTelemetry {
            variant: u16_of(&map::VARIANT)?,
            modes_bits: u32_of(&map::MODES_BITS)?,
            errors_bits: u32_of(&map::ERRORS_BITS)?,
            warnings_bits: u32_of(&map::WARNINGS_BITS)?,
            temp_outdoor: float(&map::TEMP_OUTDOOR)?,
            temp_supply: float(&map::TEMP_SUPPLY)?,
            temp_extract: float(&map::TEMP_EXTRACT)?,
            temp_exhaust: float(&map::TEMP_EXHAUST)?,
            humi_outdoor: float(&map::HUMI_OUTDOOR)?,
            humi_supply: float(&map::HUMI_SUPPLY)?,
            humi_extract: float(&map::HUMI_EXTRACT)?,
            humi_exhaust: float(&map::HUMI_EXHAUST)?,
            temp_outdoor_ntc: float(&map::TEMP_OUTDOOR_NTC)?,
            filter_wear: u16_of(&map::FILTER_WEAR)?,
            power: u16_of(&map::POWER)?,
            heat_recovering: u16_of(&map::HEAT_RECOVERING)?,
            heating_power: u16_of(&map::HEATING_POWER)?,
            air_flow: u16_of(&map::AIR_FLOW)?,
        };

        let control = ControlState {
            mode_raw: u16_of(&map::MODE)?,
            boost_remaining_s: u16_of(&map::BOOST_REMAINING)?,
            circulation_remaining_s: u16_of(&map::CIRCULATION_REMAINING)?,
            overpressure_remaining_s: u16_of(&map::OVERPRESSURE_REMAINING)?,
            night_remaining_s: u16_of(&map::NIGHT_REMAINING)?,
            party_remaining_s: u16_of(&map::PARTY_REMAINING)?,
            away_begin_ts: u32_of(&map::AWAY_BEGIN)?,
            away_end_ts: u32_of(&map::AWAY_END)?,
            temp_setpoint: float(&map::TEMP_SETPOINT)?,
            humi_setpoint: float(&map::HUMI_SETPOINT)?,
            time_program_raw: u16_of(&map::TIME_PROGRAM)?,
            antiradon_raw: u16_of(&map::ANTIRADON)?,
            bypass_enable_raw: u16_of(&map::BYPASS_ENABLE)?,
            heating_enable_raw: u16_of(&map::HEATING_ENABLE)?,
            cooling_enable_raw: u16_of(&map::COOLING_ENABLE)?,
            comfort_enable_raw: u16_of(&map::COMFORT_ENABLE)?,
        };

        let mut satellites: [Option<SatelliteReading>; SATELLITE_SLOTS] = Default::default();
        for (index, window) in raw.satellites.iter().enumerate() {
            if let Some(window) = window {
                satellites[index] = Some(SatelliteReading::decode(index as u8 + 1, window)?);
            }
        }

        Ok(Self {
            captured_at,
            mode: VentilationMode::from_raw(control.mode_raw),
            mode_text: mode_text(control.mode_raw).to_string(),
            boost_remaining_min: minutes_from_seconds(control.boost_remaining_s as u32),
            circulation_remaining_min: minutes_from_seconds(control.circulation_remaining_s as u32),
            night_remaining_h: hours_from_seconds(control.night_remaining_s as u32),
            party_remaining_h: hours_from_seconds(control.party_remaining_s as u32),
            away_begin_text: format_away_timestamp(control.away_begin_ts, tz),
            away_end_text: format_away_timestamp(control.away_end_ts, tz),
            satellite_bits: raw.satellite_bits,
            satellites,
            telemetry,
            control,
        })
    }

    /// Number of connected satellites
    pub fn satellite_count(&self) -> u32 {
        self.satellite_bits.count_ones()
    }

    /// Reading of satellite `slot` (1-indexed)
    pub fn satellite(&self, slot: usize) -> Option<&SatelliteReading> {
        slot.checked_sub(1)
            .and_then(|index| self.satellites.get(index))
            .and_then(Option::as_ref)
    }

    pub fn connected_satellites(&self) -> impl Iterator<Item = &SatelliteReading> {
        self.satellites.iter().flatten()
    }

    pub fn has_errors(&self) -> bool {
        self.telemetry.errors_bits != 0
    }

    pub fn has_warnings(&self) -> bool {
        self.telemetry.warnings_bits != 0
    }

    /// Bit `n` (0..32) of the error bitmap
    pub fn error_bit(&self, n: u32) -> bool {
        n < 32 && self.telemetry.errors_bits & (1 << n) != 0
    }

    /// Bit `n` (0..32) of the warning bitmap
    pub fn warning_bit(&self, n: u32) -> bool {
        n < 32 && self.telemetry.warnings_bits & (1 << n) != 0
    }

    /// The antiradon register reads 0 while the function runs
    pub fn antiradon_active(&self) -> bool {
        self.control.antiradon_raw == 0
    }

    pub fn feature_enabled(&self, feature: Feature) -> bool {
        self.control.feature_raw(feature) != 0
    }

    /// Preset matching the current humidity setpoint
    pub fn humidity_preset(&self) -> HumidityPreset {
        HumidityPreset::from_setpoint(self.control.humi_setpoint)
    }

    /// Every published key with its value, static fields first.
    pub fn fields(&self) -> Vec<(String, FieldValue)> {
        let t = &self.telemetry;
        let c = &self.control;
        let mut out: Vec<(String, FieldValue)> = Vec::with_capacity(64);
        let mut push = |key: &str, value: FieldValue| out.push((key.to_string(), value));

        push("variant_raw", t.variant.into());
        push("modes_bits_raw", t.modes_bits.into());
        push("errors_bits_raw", t.errors_bits.into());
        push("warnings_bits_raw", t.warnings_bits.into());
        push("temp_outdoor", t.temp_outdoor.into());
        push("temp_supply", t.temp_supply.into());
        push("temp_extract", t.temp_extract.into());
        push("temp_exhaust", t.temp_exhaust.into());
        push("humi_outdoor", t.humi_outdoor.into());
        push("humi_supply", t.humi_supply.into());
        push("humi_extract", t.humi_extract.into());
        push("humi_exhaust", t.humi_exhaust.into());
        push("temp_outdoor_ntc", t.temp_outdoor_ntc.into());
        push("filter_wear", t.filter_wear.into());
        push("power", t.power.into());
        push("heat_recovering", t.heat_recovering.into());
        push("heating_power", t.heating_power.into());
        push("air_flow", t.air_flow.into());

        push("mode_raw", c.mode_raw.into());
        push("boost_remaining_s", c.boost_remaining_s.into());
        push("circulation_remaining_s", c.circulation_remaining_s.into());
        push("overpressure_remaining_s", c.overpressure_remaining_s.into());
        push("night_remaining_s", c.night_remaining_s.into());
        push("party_remaining_s", c.party_remaining_s.into());
        push("away_begin_ts", c.away_begin_ts.into());
        push("away_end_ts", c.away_end_ts.into());
        push("temp_set_raw", c.temp_setpoint.into());
        push("humi_set_raw", c.humi_setpoint.into());
        push("time_program_raw", c.time_program_raw.into());
        push("antiradon_raw", c.antiradon_raw.into());
        push("bypass_enable_raw", c.bypass_enable_raw.into());
        push("heating_enable_raw", c.heating_enable_raw.into());
        push("cooling_enable_raw", c.cooling_enable_raw.into());
        push("comfort_enable_raw", c.comfort_enable_raw.into());

        push("mode_text", self.mode_text.as_str().into());
        push("boost_remaining_min", self.boost_remaining_min.into());
        push("circulation_remaining_min", self.circulation_remaining_min.into());
        push("night_remaining_h", self.night_remaining_h.into());
        push("party_remaining_h", self.party_remaining_h.into());
        push("away_begin_text", self.away_begin_text.as_str().into());
        push("away_end_text", self.away_end_text.as_str().into());

        push(map::SATELLITE_BITMAP.key, self.satellite_bits.into());
        push("alfa_count", self.satellite_count().into());
        for s in self.connected_satellites() {
            let i = s.slot;
            push(&format!("alfa_mb_address_{i}"), s.mb_address.into());
            push(&format!("alfa_options_{i}"), s.options.into());
            push(&format!("alfa_co2_{i}"), s.co2.into());
            push(&format!("alfa_temp_{i}"), s.temperature.into());
            push(&format!("alfa_humi_{i}"), s.humidity.into());
            push(&format!("alfa_ntc_temp_{i}"), s.ntc_temperature.into());
        }

        out
    }

    /// Look up one key of [`Snapshot::fields`].
    pub fn get(&self, key: &str) -> Option<FieldValue> {
        self.fields()
            .into_iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn raw_cycle() -> RawCycle {
        let mut head = vec![0u16; 8];
        head[0] = 3; // variant
        head[5] = 0x0004; // errors lo
        let mut tail = vec![0u16; 15];
        tail[0] = 0xFFE0; // -3.2
        tail[1] = 215;
        tail[4] = 652;
        tail[11] = 120;
        tail[14] = 180;
        let mut holding = vec![0u16; 18];
        holding[0] = 6;
        holding[1] = 61;
        holding[4] = 1;
        holding[5] = 3601;
        holding[8] = 0x6553;
        holding[9] = 0xF100;
        holding[10] = 225;
        holding[11] = 500;
        holding[13] = 0;
        holding[15] = 1;

        let mut satellites: [Option<RegisterWindow>; SATELLITE_SLOTS] = Default::default();
        satellites[0] = Some(RegisterWindow::new(160, vec![11, 0, 850, 0xFFF6, 455, 0xFFEC]));
        satellites[2] = Some(RegisterWindow::new(180, vec![13, 1, 1200, 231, 400, 229]));

        RawCycle {
            input: vec![RegisterWindow::new(14, head), RegisterWindow::new(30, tail)],
            holding: RegisterWindow::new(0, holding),
            satellite_bits: 0b0000_0101,
            satellites,
        }
    }

    fn build() -> Snapshot {
        let captured_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Snapshot::from_raw_in(&raw_cycle(), &Utc, captured_at).unwrap()
    }

    #[test]
    fn test_minutes_from_seconds() {
        assert_eq!(minutes_from_seconds(0), 0);
        assert_eq!(minutes_from_seconds(59), 1);
        assert_eq!(minutes_from_seconds(60), 1);
        assert_eq!(minutes_from_seconds(61), 2);
    }

    #[test]
    fn test_hours_from_seconds() {
        assert_eq!(hours_from_seconds(0), 0);
        assert_eq!(hours_from_seconds(1), 1);
        assert_eq!(hours_from_seconds(3600), 1);
        assert_eq!(hours_from_seconds(3601), 2);
    }

    #[test]
    fn test_mode_text() {
        assert_eq!(mode_text(0), "Off");
        assert_eq!(mode_text(6), "Auto");
        assert_eq!(mode_text(7), UNKNOWN_MODE_LABEL);
        assert_eq!(mode_text(u16::MAX), UNKNOWN_MODE_LABEL);
        assert_eq!(VentilationMode::Level3.raw(), 3);
    }

    #[test]
    fn test_format_away_timestamp() {
        assert_eq!(format_away_timestamp(0, &Utc), AWAY_NOT_SET);
        assert_eq!(format_away_timestamp(1_700_000_000, &Utc), "2023-11-14 22:13");

        let prague = FixedOffset::east_opt(3600).unwrap();
        assert_eq!(format_away_timestamp(1_700_000_000, &prague), "2023-11-14 23:13");
    }

    #[test]
    fn test_snapshot_decoding() {
        let snap = build();
        assert_eq!(snap.telemetry.variant, 3);
        assert_eq!(snap.telemetry.errors_bits, 4);
        assert_eq!(snap.telemetry.temp_outdoor, -3.2);
        assert_eq!(snap.telemetry.humi_outdoor, 65.2);
        assert_eq!(snap.telemetry.power, 120);
        assert_eq!(snap.telemetry.air_flow, 180);
        assert_eq!(snap.control.temp_setpoint, 22.5);
        assert_eq!(snap.control.away_end_ts, 0x6553_F100);
    }

    #[test]
    fn test_snapshot_follows_descriptor_scale() {
        let raw = raw_cycle();
        let snap = build();
        for field in map::FIELDS {
            let Ok(window) = raw.window_for(field) else {
                continue;
            };
            let expected = window.decode(field).unwrap();
            let published = snap.get(field.key).unwrap();
            assert_eq!(published.as_f64(), expected.as_f64(), "{}", field.key);
        }
    }

    #[test]
    fn test_snapshot_derived_fields() {
        let snap = build();
        assert_eq!(snap.mode, Some(VentilationMode::Auto));
        assert_eq!(snap.mode_text, "Auto");
        assert_eq!(snap.boost_remaining_min, 2);
        assert_eq!(snap.night_remaining_h, 1);
        assert_eq!(snap.party_remaining_h, 2);
        assert_eq!(snap.away_begin_text, AWAY_NOT_SET);
        assert_eq!(snap.away_end_text, "2023-11-14 22:13");
    }

    #[test]
    fn test_status_helpers() {
        let snap = build();
        assert!(snap.has_errors());
        assert!(snap.error_bit(2));
        assert!(!snap.error_bit(3));
        assert!(!snap.error_bit(40));
        assert!(!snap.has_warnings());
        assert!(snap.antiradon_active());
        assert!(snap.feature_enabled(Feature::Heating));
        assert!(!snap.feature_enabled(Feature::Bypass));
        assert_eq!(snap.humidity_preset(), HumidityPreset::Comfort);
    }

    #[test]
    fn test_satellites() {
        let snap = build();
        assert_eq!(snap.satellite_count(), 2);
        assert!(snap.satellite(2).is_none());

        let first = snap.satellite(1).unwrap();
        assert_eq!(first.mb_address, 11);
        assert_eq!(first.co2, 850);
        assert_eq!(first.temperature, -1.0);
        assert_eq!(first.humidity, 45.5);
        assert_eq!(first.ntc_temperature, -2.0);

        let third = snap.satellite(3).unwrap();
        assert_eq!(third.slot, 3);
        assert_eq!(third.temperature, 23.1);
    }

    #[test]
    fn test_fields_view() {
        let snap = build();
        assert_eq!(snap.get("temp_outdoor"), Some(FieldValue::Float(-3.2)));
        assert_eq!(snap.get("mode_text"), Some(FieldValue::Text("Auto".into())));
        assert_eq!(snap.get("alfa_count"), Some(FieldValue::Int(2)));
        assert_eq!(snap.get("alfa_co2_3"), Some(FieldValue::Int(1200)));
        assert!(snap.get("alfa_co2_1").is_some());
        assert!(snap.get("alfa_co2_2").is_none());
        assert!(snap.get("alfa_temp_4").is_none());

        let keys: Vec<String> = snap.fields().into_iter().map(|(k, _)| k).collect();
        for field in map::FIELDS {
            assert!(keys.iter().any(|k| k == field.key), "missing {}", field.key);
        }
    }

    #[test]
    fn test_missing_window_fails_build() {
        let mut raw = raw_cycle();
        raw.input.pop();
        let err = Snapshot::from_raw_in(&raw, &Utc, Utc::now()).unwrap_err();
        assert!(matches!(err, FuturaError::Decode { .. }));
    }
}
