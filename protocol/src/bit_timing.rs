//! Bit-timing parameters and the math that derives baud rate and sample
//! point from them, plus the validation that ports
//! `GrepitAB-mcan`'s per-field range checks to the CAN/CAN-FD
//! controller exposed by this adapter.

use core::ops::RangeInclusive;
#[cfg(feature = "defmt-03")]
use defmt::Format;

/// One set of `{brp, seg1, seg2, sjw}` bit-timing parameters. A separate
/// instance exists for the nominal phase and for the FD data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub struct BitTiming {
    pub brp: u32,
    pub seg1: u32,
    pub seg2: u32,
    pub sjw: u32,
}

impl BitTiming {
    /// Number of time quanta making up one bit time.
    pub fn time_quanta_per_bit(&self) -> u32 {
        1 + self.seg1 + self.seg2
    }

    /// Derived baud rate given the controller clock.
    pub fn baud(&self, can_clock: u32) -> u32 {
        can_clock / self.brp / self.time_quanta_per_bit()
    }

    /// Sample point, in per-mille of bit time.
    pub fn sample_point_permille(&self) -> u32 {
        1000 * (1 + self.seg1) / self.time_quanta_per_bit()
    }
}

/// Errors produced when a [`BitTiming`] falls outside a [`BitTimingRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub enum BitTimingError {
    Brp(RangeBounds),
    Seg1(RangeBounds),
    Seg2(RangeBounds),
    Sjw(RangeBounds),
    /// `sjw` must not exceed `min(seg1, seg2)`.
    SjwExceedsSegments,
}

/// A plain `(min, max)` pair, used instead of [`RangeInclusive`] in error
/// variants so [`BitTimingError`] stays `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub struct RangeBounds {
    pub min: u32,
    pub max: u32,
}

/// The controller-advertised `[min, max]` range for each field, as reported
/// by `GetCapabilities`/`GetCapabilitiesFD`.
#[derive(Debug, Clone)]
pub struct BitTimingRange {
    pub brp: RangeInclusive<u32>,
    pub seg1: RangeInclusive<u32>,
    pub seg2: RangeInclusive<u32>,
    pub sjw: RangeInclusive<u32>,
}

impl BitTimingRange {
    /// Validates `timing` against this range, including the
    /// `sjw <= min(seg1, seg2)` constraint.
    pub fn validate(&self, timing: &BitTiming) -> Result<(), BitTimingError> {
        if !self.brp.contains(&timing.brp) {
            return Err(BitTimingError::Brp(bounds(&self.brp)));
        }
        if !self.seg1.contains(&timing.seg1) {
            return Err(BitTimingError::Seg1(bounds(&self.seg1)));
        }
        if !self.seg2.contains(&timing.seg2) {
            return Err(BitTimingError::Seg2(bounds(&self.seg2)));
        }
        if !self.sjw.contains(&timing.sjw) {
            return Err(BitTimingError::Sjw(bounds(&self.sjw)));
        }
        if timing.sjw > timing.seg1.min(timing.seg2) {
            return Err(BitTimingError::SjwExceedsSegments);
        }
        Ok(())
    }
}

fn bounds(r: &RangeInclusive<u32>) -> RangeBounds {
    RangeBounds {
        min: *r.start(),
        max: *r.end(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_500k_example_from_spec() {
        let t = BitTiming {
            brp: 2,
            seg1: 139,
            seg2: 20,
            sjw: 20,
        };
        assert_eq!(t.baud(160_000_000), 500_000);
        assert_eq!(t.sample_point_permille(), 875);
    }

    #[test]
    fn data_2m_example_from_spec() {
        let t = BitTiming {
            brp: 2,
            seg1: 29,
            seg2: 10,
            sjw: 10,
        };
        assert_eq!(t.baud(160_000_000), 2_000_000);
        assert_eq!(t.sample_point_permille(), 750);
    }

    #[test]
    fn sjw_above_min_segment_is_rejected() {
        let range = BitTimingRange {
            brp: 1..=512,
            seg1: 1..=256,
            seg2: 1..=128,
            sjw: 1..=128,
        };
        let t = BitTiming {
            brp: 2,
            seg1: 5,
            seg2: 3,
            sjw: 4,
        };
        assert_eq!(range.validate(&t), Err(BitTimingError::SjwExceedsSegments));
    }

    #[test]
    fn out_of_range_brp_is_rejected() {
        let range = BitTimingRange {
            brp: 1..=16,
            seg1: 1..=256,
            seg2: 1..=128,
            sjw: 1..=128,
        };
        let t = BitTiming {
            brp: 17,
            seg1: 5,
            seg2: 3,
            sjw: 1,
        };
        assert!(matches!(range.validate(&t), Err(BitTimingError::Brp(_))));
    }
}
