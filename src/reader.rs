//! Segmented reader
//!
//! One poll cycle reads the fixed input segments, the holding segment, the
//! satellite bitmap and then one window per connected satellite. The first
//! failing read aborts the cycle; nothing read so far is returned.

use tracing::debug;

use crate::codec::{decode_raw, RegisterWindow};
use crate::error::{FuturaError, FuturaResult};
use crate::register_map::{
    active_satellites, satellite_segment, ReadSegment, RegisterField, RegisterSpace,
    HOLDING_SEGMENT, INPUT_SEGMENTS, SATELLITE_BITMAP_SEGMENT, SATELLITE_SLOTS,
};
use crate::transport::RegisterTransport;

/// Bits of the discovery word that map to slots
const SATELLITE_BITMAP_MASK: u16 = (1 << SATELLITE_SLOTS) - 1;

/// Every window read during one successful cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCycle {
    pub input: Vec<RegisterWindow>,
    pub holding: RegisterWindow,
    /// Discovery word masked to the eight slot bits
    pub satellite_bits: u16,
    /// Slot `i` lives at index `i - 1`
    pub satellites: [Option<RegisterWindow>; SATELLITE_SLOTS],
}

impl RawCycle {
    /// The window holding every word of `field`.
    pub fn window_for(&self, field: &RegisterField) -> FuturaResult<&RegisterWindow> {
        let covers = |w: &&RegisterWindow| w.contains(field.address, field.width());
        let found = match field.space {
            RegisterSpace::Input => self.input.iter().find(covers),
            RegisterSpace::Holding => Some(&self.holding).filter(covers),
        };
        found.ok_or_else(|| {
            FuturaError::decode(format!(
                "{} ({} {}) not covered by any window of the cycle",
                field.key, field.space, field.address
            ))
        })
    }

    /// Decoded integer of `field`, before scaling.
    pub fn raw(&self, field: &RegisterField) -> FuturaResult<i64> {
        decode_raw(self.window_for(field)?, field.address, field.encoding)
    }

    /// Window of satellite `slot` (1-indexed) if it was read.
    pub fn satellite(&self, slot: usize) -> Option<&RegisterWindow> {
        slot.checked_sub(1)
            .and_then(|index| self.satellites.get(index))
            .and_then(Option::as_ref)
    }
}

/// Plans and executes the reads of one cycle.
#[derive(Debug, Clone)]
pub struct SegmentedReader {
    input_segments: Vec<ReadSegment>,
    holding_segment: ReadSegment,
    bitmap_segment: ReadSegment,
}

impl Default for SegmentedReader {
    fn default() -> Self {
        Self {
            input_segments: INPUT_SEGMENTS.to_vec(),
            holding_segment: HOLDING_SEGMENT,
            bitmap_segment: SATELLITE_BITMAP_SEGMENT,
        }
    }
}

impl SegmentedReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Static segments in read order, satellites excluded
    pub fn static_segments(&self) -> impl Iterator<Item = &ReadSegment> {
        self.input_segments
            .iter()
            .chain(std::iter::once(&self.holding_segment))
            .chain(std::iter::once(&self.bitmap_segment))
    }

    /// Run one full cycle against `transport`.
    pub async fn read_cycle<T: RegisterTransport>(&self, transport: &mut T) -> FuturaResult<RawCycle> {
        let mut input = Vec::with_capacity(self.input_segments.len());
        for segment in &self.input_segments {
            input.push(read_window(transport, segment).await?);
        }

        let holding = read_window(transport, &self.holding_segment).await?;

        let bitmap = read_window(transport, &self.bitmap_segment).await?;
        let satellite_bits = bitmap.words.first().copied().unwrap_or(0) & SATELLITE_BITMAP_MASK;

        let mut satellites: [Option<RegisterWindow>; SATELLITE_SLOTS] = Default::default();
        for slot in active_satellites(satellite_bits) {
            if let Some(segment) = satellite_segment(slot) {
                satellites[slot - 1] = Some(read_window(transport, &segment).await?);
            }
        }

        debug!(
            "Cycle read: {} input segment(s), holding, {} satellite(s) (bits {:#010b})",
            input.len(),
            satellite_bits.count_ones(),
            satellite_bits
        );

        Ok(RawCycle {
            input,
            holding,
            satellite_bits,
            satellites,
        })
    }
}

async fn read_window<T: RegisterTransport>(
    transport: &mut T,
    segment: &ReadSegment,
) -> FuturaResult<RegisterWindow> {
    let words = transport
        .read_segment(segment)
        .await
        .map_err(|e| FuturaError::cycle_aborted(segment.to_string(), e))?;

    if words.len() != segment.count as usize {
        return Err(FuturaError::cycle_aborted(
            segment.to_string(),
            FuturaError::protocol(format!(
                "expected {} words, got {}",
                segment.count,
                words.len()
            )),
        ));
    }
    Ok(RegisterWindow::new(segment.start, words))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_map::{AWAY_END, MODES_BITS, SATELLITE_BITMAP, TEMP_OUTDOOR};

    fn cycle() -> RawCycle {
        let mut first = vec![0u16; 8];
        first[2] = 0x0001;
        first[3] = 0x0002;
        let mut second = vec![0u16; 15];
        second[0] = 0xFF9C;
        let mut holding = vec![0u16; 18];
        holding[8] = 0x0010;
        holding[9] = 0x0020;

        RawCycle {
            input: vec![RegisterWindow::new(14, first), RegisterWindow::new(30, second)],
            holding: RegisterWindow::new(0, holding),
            satellite_bits: 0,
            satellites: Default::default(),
        }
    }

    #[test]
    fn test_raw_lookup() {
        let cycle = cycle();
        assert_eq!(cycle.raw(&MODES_BITS).unwrap(), 65538);
        assert_eq!(cycle.raw(&TEMP_OUTDOOR).unwrap(), -100);
        assert_eq!(cycle.raw(&AWAY_END).unwrap(), 0x0010_0020);
    }

    #[test]
    fn test_uncovered_field_is_decode_error() {
        // The bitmap word is read separately and never lands in `input`
        let err = cycle().raw(&SATELLITE_BITMAP).unwrap_err();
        assert!(matches!(err, FuturaError::Decode { .. }));
    }

    #[test]
    fn test_satellite_accessor() {
        let mut cycle = cycle();
        cycle.satellites[2] = Some(RegisterWindow::new(180, vec![0; 6]));
        assert!(cycle.satellite(3).is_some());
        assert!(cycle.satellite(1).is_none());
        assert!(cycle.satellite(0).is_none());
        assert!(cycle.satellite(9).is_none());
    }

    #[test]
    fn test_static_segment_order() {
        let reader = SegmentedReader::new();
        let order: Vec<String> = reader.static_segments().map(|s| s.to_string()).collect();
        assert_eq!(
            order,
            vec!["input[14..22)", "input[30..45)", "holding[0..18)", "input[75..76)"]
        );
    }
}
