//! # Register Codec
//!
//! Pure conversions between raw register windows and typed values.
//!
//! | Encoding | Words | Rule |
//! |----------|-------|------|
//! | u16 | 1 | word unchanged |
//! | i16 | 1 | two's complement: `w - 65536` when bit 15 is set |
//! | u32 | 2 | `(hi << 16) \| lo`, high word first |
//!
//! Scale ×0.1 is applied after decoding and yields a float.

use crate::error::{FuturaError, FuturaResult};
use crate::register_map::{Encoding, RegisterField, Scale};
use crate::value::FieldValue;

/// Words read by one call, anchored at the address of the first word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterWindow {
    pub base: u16,
    pub words: Vec<u16>,
}

impl RegisterWindow {
    pub fn new(base: u16, words: Vec<u16>) -> Self {
        Self { base, words }
    }

    /// One past the last address held
    #[inline]
    pub fn end(&self) -> u32 {
        self.base as u32 + self.words.len() as u32
    }

    /// Whether `[address, address + width)` lies inside the window
    #[inline]
    pub fn contains(&self, address: u16, width: u16) -> bool {
        address >= self.base && address as u32 + width as u32 <= self.end()
    }

    fn word(&self, address: u16) -> FuturaResult<u16> {
        if !self.contains(address, 1) {
            return Err(FuturaError::decode(format!(
                "address {} outside window [{}..{})",
                address,
                self.base,
                self.end()
            )));
        }
        Ok(self.words[(address - self.base) as usize])
    }

    pub fn u16_at(&self, address: u16) -> FuturaResult<u16> {
        self.word(address).map(decode_u16)
    }

    pub fn i16_at(&self, address: u16) -> FuturaResult<i16> {
        self.word(address).map(decode_i16)
    }

    pub fn u32_at(&self, address: u16) -> FuturaResult<u32> {
        let hi = self.word(address)?;
        let lo = self.word(address.checked_add(1).ok_or_else(|| {
            FuturaError::decode(format!("u32 at {} overflows the address space", address))
        })?)?;
        Ok(decode_u32(hi, lo))
    }

    /// Decode and scale one descriptor-driven field.
    pub fn decode(&self, field: &RegisterField) -> FuturaResult<FieldValue> {
        decode_at(self, field.address, field.encoding, field.scale)
    }
}

// ============================================================================
// Primitives
// ============================================================================

#[inline]
pub fn decode_u16(word: u16) -> u16 {
    word
}

/// Two's-complement reinterpretation of one word.
#[inline]
pub fn decode_i16(word: u16) -> i16 {
    if word & 0x8000 != 0 {
        (word as i32 - 65536) as i16
    } else {
        word as i16
    }
}

/// Big-endian word pair.
#[inline]
pub fn decode_u32(hi: u16, lo: u16) -> u32 {
    ((hi as u32) << 16) | lo as u32
}

/// Split a 32-bit value into `[hi, lo]`.
#[inline]
pub fn u32_to_words(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, (value & 0xFFFF) as u16]
}

/// Fixed-point ×0.1 word for a setpoint: `round(value * 10)` as two's complement.
pub fn encode_tenths(value: f64) -> u16 {
    let tenths = (value * 10.0).round() as i16;
    tenths as u16
}

/// Decode `encoding` at `address` and apply `scale`.
pub fn decode_at(
    window: &RegisterWindow,
    address: u16,
    encoding: Encoding,
    scale: Scale,
) -> FuturaResult<FieldValue> {
    decode_raw(window, address, encoding).map(|raw| scaled(raw, scale))
}

/// Decode `encoding` at `address` without scaling.
pub fn decode_raw(window: &RegisterWindow, address: u16, encoding: Encoding) -> FuturaResult<i64> {
    let raw = match encoding {
        Encoding::U16 => window.u16_at(address)? as i64,
        Encoding::I16 => window.i16_at(address)? as i64,
        Encoding::U32 => window.u32_at(address)? as i64,
    };
    Ok(raw)
}

/// Apply `scale` to an already decoded integer.
pub fn scaled(raw: i64, scale: Scale) -> FieldValue {
    match scale {
        Scale::Unit => FieldValue::Int(raw),
        Scale::Tenth => FieldValue::Float(raw as f64 / 10.0),
    }
}
