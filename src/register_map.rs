//! # Futura Register Map
//!
//! Static descriptors for every register the coordinator reads, the read
//! segments that cover them and the satellite (ALFA) slot layout.
//!
//! ## Input registers (read-only telemetry)
//!
//! | Address | Key | Encoding | Scale |
//! |---------|-----|----------|-------|
//! | 14 | `variant_raw` | u16 | 1 |
//! | 16-17 | `modes_bits_raw` | u32 | 1 |
//! | 18-19 | `errors_bits_raw` | u32 | 1 |
//! | 20-21 | `warnings_bits_raw` | u32 | 1 |
//! | 30-33 | `temp_outdoor` .. `temp_exhaust` | i16 | 0.1 |
//! | 34-37 | `humi_outdoor` .. `humi_exhaust` | i16 | 0.1 |
//! | 38 | `temp_outdoor_ntc` | i16 | 0.1 |
//! | 40 | `filter_wear` | u16 | 1 |
//! | 41 | `power` | u16 | 1 |
//! | 42 | `heat_recovering` | u16 | 1 |
//! | 43 | `heating_power` | u16 | 1 |
//! | 44 | `air_flow` | u16 | 1 |
//! | 75 | satellite bitmap | u16 | 1 |
//! | 160 + 10·(i-1) | satellite slot *i* (6 words) | mixed | mixed |
//!
//! ## Holding registers (commands and setpoints)
//!
//! | Address | Key | Encoding | Scale |
//! |---------|-----|----------|-------|
//! | 0 | `mode_raw` | u16 | 1 |
//! | 1-5 | boost/circulation/overpressure/night/party seconds | u16 | 1 |
//! | 6-7 | `away_begin_ts` | u32 | 1 |
//! | 8-9 | `away_end_ts` | u32 | 1 |
//! | 10 | `temp_set_raw` | i16 | 0.1 |
//! | 11 | `humi_set_raw` | i16 | 0.1 |
//! | 12-17 | feature flags | u16 | 1 |

use std::fmt;

use crate::constants::{FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS};

/// One of the two 16-bit address spaces of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterSpace {
    /// Read-only telemetry (FC04)
    Input,
    /// Read/write commands and setpoints (FC03, FC06, FC16)
    Holding,
}

impl RegisterSpace {
    /// Function code used to read this space
    #[inline]
    pub fn read_function(&self) -> u8 {
        match self {
            Self::Input => FC_READ_INPUT_REGISTERS,
            Self::Holding => FC_READ_HOLDING_REGISTERS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Holding => "holding",
        }
    }
}

impl fmt::Display for RegisterSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the raw word(s) of a field are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// One word, unsigned
    U16,
    /// One word, two's complement
    I16,
    /// Two words, high word first
    U32,
}

impl Encoding {
    /// Number of 16-bit words occupied
    #[inline]
    pub fn width(&self) -> u16 {
        match self {
            Self::U16 | Self::I16 => 1,
            Self::U32 => 2,
        }
    }
}

/// Multiplier applied after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    /// Value used as-is
    Unit,
    /// Fixed-point ×0.1
    Tenth,
}

/// Static descriptor of one register field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterField {
    pub key: &'static str,
    pub space: RegisterSpace,
    pub address: u16,
    pub encoding: Encoding,
    pub scale: Scale,
}

impl RegisterField {
    const fn new(
        key: &'static str,
        space: RegisterSpace,
        address: u16,
        encoding: Encoding,
        scale: Scale,
    ) -> Self {
        Self {
            key,
            space,
            address,
            encoding,
            scale,
        }
    }

    /// Number of words occupied
    #[inline]
    pub fn width(&self) -> u16 {
        self.encoding.width()
    }

    /// Last address occupied by the field
    #[inline]
    pub fn last_address(&self) -> u16 {
        self.address + self.width() - 1
    }
}

/// A contiguous range `[start, start + count)` read with a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSegment {
    pub space: RegisterSpace,
    pub start: u16,
    pub count: u16,
}

impl ReadSegment {
    pub const fn new(space: RegisterSpace, start: u16, count: u16) -> Self {
        Self { space, start, count }
    }

    /// One past the last address covered
    #[inline]
    pub fn end(&self) -> u16 {
        self.start + self.count
    }

    /// Whether every word of `field` lies inside this segment
    pub fn covers(&self, field: &RegisterField) -> bool {
        field.space == self.space && field.address >= self.start && field.last_address() < self.end()
    }

    /// Whether the segment boundary falls inside `field`
    pub fn splits(&self, field: &RegisterField) -> bool {
        if field.space != self.space {
            return false;
        }
        let first_inside = field.address >= self.start && field.address < self.end();
        let last_inside = field.last_address() >= self.start && field.last_address() < self.end();
        first_inside != last_inside
    }
}

impl fmt::Display for ReadSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..{})", self.space, self.start, self.end())
    }
}

use Encoding::{I16, U16, U32};
use RegisterSpace::{Holding, Input};
use Scale::{Tenth, Unit};

// ============================================================================
// Input register fields
// ============================================================================

pub const VARIANT: RegisterField = RegisterField::new("variant_raw", Input, 14, U16, Unit);
pub const MODES_BITS: RegisterField = RegisterField::new("modes_bits_raw", Input, 16, U32, Unit);
pub const ERRORS_BITS: RegisterField = RegisterField::new("errors_bits_raw", Input, 18, U32, Unit);
pub const WARNINGS_BITS: RegisterField =
    RegisterField::new("warnings_bits_raw", Input, 20, U32, Unit);

pub const TEMP_OUTDOOR: RegisterField = RegisterField::new("temp_outdoor", Input, 30, I16, Tenth);
pub const TEMP_SUPPLY: RegisterField = RegisterField::new("temp_supply", Input, 31, I16, Tenth);
pub const TEMP_EXTRACT: RegisterField = RegisterField::new("temp_extract", Input, 32, I16, Tenth);
pub const TEMP_EXHAUST: RegisterField = RegisterField::new("temp_exhaust", Input, 33, I16, Tenth);
pub const HUMI_OUTDOOR: RegisterField = RegisterField::new("humi_outdoor", Input, 34, I16, Tenth);
pub const HUMI_SUPPLY: RegisterField = RegisterField::new("humi_supply", Input, 35, I16, Tenth);
pub const HUMI_EXTRACT: RegisterField = RegisterField::new("humi_extract", Input, 36, I16, Tenth);
pub const HUMI_EXHAUST: RegisterField = RegisterField::new("humi_exhaust", Input, 37, I16, Tenth);
pub const TEMP_OUTDOOR_NTC: RegisterField =
    RegisterField::new("temp_outdoor_ntc", Input, 38, I16, Tenth);

pub const FILTER_WEAR: RegisterField = RegisterField::new("filter_wear", Input, 40, U16, Unit);
pub const POWER: RegisterField = RegisterField::new("power", Input, 41, U16, Unit);
pub const HEAT_RECOVERING: RegisterField =
    RegisterField::new("heat_recovering", Input, 42, U16, Unit);
pub const HEATING_POWER: RegisterField = RegisterField::new("heating_power", Input, 43, U16, Unit);
pub const AIR_FLOW: RegisterField = RegisterField::new("air_flow", Input, 44, U16, Unit);

/// Connectivity bitmap of the satellite slots, bit `i-1` for slot `i`
pub const SATELLITE_BITMAP: RegisterField =
    RegisterField::new("alfa_connected_bits", Input, 75, U16, Unit);

// ============================================================================
// Holding register fields
// ============================================================================

pub const MODE: RegisterField = RegisterField::new("mode_raw", Holding, 0, U16, Unit);
pub const BOOST_REMAINING: RegisterField =
    RegisterField::new("boost_remaining_s", Holding, 1, U16, Unit);
pub const CIRCULATION_REMAINING: RegisterField =
    RegisterField::new("circulation_remaining_s", Holding, 2, U16, Unit);
pub const OVERPRESSURE_REMAINING: RegisterField =
    RegisterField::new("overpressure_remaining_s", Holding, 3, U16, Unit);
pub const NIGHT_REMAINING: RegisterField =
    RegisterField::new("night_remaining_s", Holding, 4, U16, Unit);
pub const PARTY_REMAINING: RegisterField =
    RegisterField::new("party_remaining_s", Holding, 5, U16, Unit);
pub const AWAY_BEGIN: RegisterField = RegisterField::new("away_begin_ts", Holding, 6, U32, Unit);
pub const AWAY_END: RegisterField = RegisterField::new("away_end_ts", Holding, 8, U32, Unit);
pub const TEMP_SETPOINT: RegisterField = RegisterField::new("temp_set_raw", Holding, 10, I16, Tenth);
pub const HUMI_SETPOINT: RegisterField = RegisterField::new("humi_set_raw", Holding, 11, I16, Tenth);
pub const TIME_PROGRAM: RegisterField =
    RegisterField::new("time_program_raw", Holding, 12, U16, Unit);
pub const ANTIRADON: RegisterField = RegisterField::new("antiradon_raw", Holding, 13, U16, Unit);
pub const BYPASS_ENABLE: RegisterField =
    RegisterField::new("bypass_enable_raw", Holding, 14, U16, Unit);
pub const HEATING_ENABLE: RegisterField =
    RegisterField::new("heating_enable_raw", Holding, 15, U16, Unit);
pub const COOLING_ENABLE: RegisterField =
    RegisterField::new("cooling_enable_raw", Holding, 16, U16, Unit);
pub const COMFORT_ENABLE: RegisterField =
    RegisterField::new("comfort_enable_raw", Holding, 17, U16, Unit);

/// Every statically addressed field, input region first.
pub const FIELDS: &[RegisterField] = &[
    VARIANT,
    MODES_BITS,
    ERRORS_BITS,
    WARNINGS_BITS,
    TEMP_OUTDOOR,
    TEMP_SUPPLY,
    TEMP_EXTRACT,
    TEMP_EXHAUST,
    HUMI_OUTDOOR,
    HUMI_SUPPLY,
    HUMI_EXTRACT,
    HUMI_EXHAUST,
    TEMP_OUTDOOR_NTC,
    FILTER_WEAR,
    POWER,
    HEAT_RECOVERING,
    HEATING_POWER,
    AIR_FLOW,
    MODE,
    BOOST_REMAINING,
    CIRCULATION_REMAINING,
    OVERPRESSURE_REMAINING,
    NIGHT_REMAINING,
    PARTY_REMAINING,
    AWAY_BEGIN,
    AWAY_END,
    TEMP_SETPOINT,
    HUMI_SETPOINT,
    TIME_PROGRAM,
    ANTIRADON,
    BYPASS_ENABLE,
    HEATING_ENABLE,
    COOLING_ENABLE,
    COMFORT_ENABLE,
];

/// Look up a static field by key.
pub fn field(key: &str) -> Option<&'static RegisterField> {
    FIELDS.iter().find(|f| f.key == key)
}

// ============================================================================
// Read segments
// ============================================================================

/// Fixed input segments. The device rejects a single read of 14..=44.
pub const INPUT_SEGMENTS: &[ReadSegment] = &[
    ReadSegment::new(Input, 14, 8),
    ReadSegment::new(Input, 30, 15),
];

/// The holding region, read in one call.
pub const HOLDING_SEGMENT: ReadSegment = ReadSegment::new(Holding, 0, 18);

/// One-word discovery read of the satellite bitmap.
pub const SATELLITE_BITMAP_SEGMENT: ReadSegment =
    ReadSegment::new(Input, SATELLITE_BITMAP.address, 1);

// ============================================================================
// Satellite (ALFA) slots
// ============================================================================

/// Number of satellite slots
pub const SATELLITE_SLOTS: usize = 8;

/// Input address of slot 1
pub const SATELLITE_REGION_START: u16 = 160;

/// Words between consecutive slots
pub const SATELLITE_STRIDE: u16 = 10;

/// Meaningful words per slot
pub const SATELLITE_FIELD_COUNT: u16 = 6;

/// Offsets of the slot fields from the slot base address
pub mod satellite {
    use super::{Encoding, Scale};

    pub const MB_ADDRESS: (u16, Encoding, Scale) = (0, Encoding::U16, Scale::Unit);
    pub const OPTIONS: (u16, Encoding, Scale) = (1, Encoding::U16, Scale::Unit);
    pub const CO2: (u16, Encoding, Scale) = (2, Encoding::U16, Scale::Unit);
    pub const TEMPERATURE: (u16, Encoding, Scale) = (3, Encoding::I16, Scale::Tenth);
    pub const HUMIDITY: (u16, Encoding, Scale) = (4, Encoding::U16, Scale::Tenth);
    /// Signed like the ambient NTC of the main unit
    pub const NTC_TEMPERATURE: (u16, Encoding, Scale) = (5, Encoding::I16, Scale::Tenth);
}

/// Base address of satellite slot `slot` (1-indexed).
///
/// Returns `None` for slots outside `1..=8`.
pub fn satellite_base_address(slot: usize) -> Option<u16> {
    if !(1..=SATELLITE_SLOTS).contains(&slot) {
        return None;
    }
    Some(SATELLITE_REGION_START + (slot as u16 - 1) * SATELLITE_STRIDE)
}

/// Read segment of satellite slot `slot` (1-indexed).
pub fn satellite_segment(slot: usize) -> Option<ReadSegment> {
    satellite_base_address(slot).map(|base| ReadSegment::new(Input, base, SATELLITE_FIELD_COUNT))
}

/// Whether slot `slot` (1-indexed) is flagged connected in `bitmap`.
#[inline]
pub fn satellite_active(bitmap: u16, slot: usize) -> bool {
    (1..=SATELLITE_SLOTS).contains(&slot) && bitmap & (1 << (slot - 1)) != 0
}

/// Slots flagged connected in `bitmap`, ascending.
pub fn active_satellites(bitmap: u16) -> impl Iterator<Item = usize> {
    (1..=SATELLITE_SLOTS).filter(move |&slot| satellite_active(bitmap, slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_READ_REGISTERS;

    #[test]
    fn test_keys_are_unique() {
        for (i, a) in FIELDS.iter().enumerate() {
            for b in &FIELDS[i + 1..] {
                assert_ne!(a.key, b.key);
            }
        }
    }

    #[test]
    fn test_every_field_is_covered_once() {
        for field in FIELDS {
            let covering = INPUT_SEGMENTS
                .iter()
                .chain(std::iter::once(&HOLDING_SEGMENT))
                .filter(|segment| segment.covers(field))
                .count();
            assert_eq!(covering, 1, "{} covered {} times", field.key, covering);
        }
    }

    #[test]
    fn test_no_segment_splits_a_field() {
        for segment in INPUT_SEGMENTS.iter().chain(std::iter::once(&HOLDING_SEGMENT)) {
            for field in FIELDS {
                assert!(!segment.splits(field), "{} splits {}", segment, field.key);
            }
        }
    }

    #[test]
    fn test_segments_within_limit() {
        for segment in INPUT_SEGMENTS.iter().chain([HOLDING_SEGMENT, SATELLITE_BITMAP_SEGMENT].iter()) {
            assert!(segment.count > 0 && segment.count <= MAX_READ_REGISTERS);
        }
    }

    #[test]
    fn test_splits_detects_boundary_inside_u32() {
        let segment = ReadSegment::new(Input, 14, 3);
        assert!(segment.splits(&MODES_BITS));
        assert!(!segment.covers(&MODES_BITS));
        assert!(!segment.splits(&VARIANT));
    }

    #[test]
    fn test_satellite_addressing() {
        assert_eq!(satellite_base_address(1), Some(160));
        assert_eq!(satellite_base_address(3), Some(180));
        assert_eq!(satellite_base_address(8), Some(230));
        assert_eq!(satellite_base_address(0), None);
        assert_eq!(satellite_base_address(9), None);

        let segment = satellite_segment(2).unwrap();
        assert_eq!((segment.start, segment.count), (170, 6));
    }

    #[test]
    fn test_active_satellites() {
        let slots: Vec<usize> = active_satellites(0b0000_0101).collect();
        assert_eq!(slots, vec![1, 3]);
        assert_eq!(active_satellites(0).count(), 0);
        // Bits above slot 8 are ignored
        assert_eq!(active_satellites(0xFF00).count(), 0);
        assert_eq!(active_satellites(0xFFFF).count(), 8);
    }

    #[test]
    fn test_field_lookup() {
        assert_eq!(field("away_end_ts"), Some(&AWAY_END));
        assert_eq!(field("away_end_ts").map(|f| f.width()), Some(2));
        assert!(field("nonexistent").is_none());
    }
}
