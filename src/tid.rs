use core::fmt;
use std::{convert::TryFrom, str::FromStr};

use crate::{
    error::EngineError,
    io::{read_exact, Decodeable, Encodeable},
};
use std::convert::TryInto;

/// A 48-bit logical tuple identifier.
///
/// `0` is reserved as "invalid"; valid tids are `[1, MAX]`.
/// The external projection is `(block, offset)` with `block = tid >> 16`
/// and `offset = tid & 0xFFFF`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(u64);

impl Tid {
    pub const INVALID: Tid = Tid(0);
    pub const MIN: Tid = Tid(1);
    pub const MAX: Tid = Tid((1 << 48) - 1);

    /// Sentinel upper bound, one past the largest valid tid. Used as the
    /// high key of the rightmost leaf; never stored as a row id.
    pub const MAX_PLUS_ONE: Tid = Tid(1 << 48);

    /// Wrap a raw value known to be in `[0, MAX_PLUS_ONE]`.
    ///
    /// Values outside that window indicate corrupted on-disk state.
    pub fn from_raw(v: u64) -> Tid {
        debug_assert!(v <= Self::MAX_PLUS_ONE.0);
        Tid(v)
    }

    pub fn new(v: u64) -> Result<Tid, EngineError> {
        if v < Self::MIN.0 || v > Self::MAX.0 {
            return Err(EngineError::input(&format!("tid {} out of range", v)));
        }
        Ok(Tid(v))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 >= Self::MIN.0 && self.0 <= Self::MAX.0
    }

    pub fn block(&self) -> u32 {
        (self.0 >> 16) as u32
    }

    pub fn offset(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub fn from_block_offset(block: u32, offset: u16) -> Tid {
        Tid(((block as u64) << 16) | offset as u64)
    }

    /// `self + n`, saturating at the sentinel bound.
    pub fn advance(&self, n: u64) -> Tid {
        let v = self.0.saturating_add(n);
        if v > Self::MAX_PLUS_ONE.0 {
            Self::MAX_PLUS_ONE
        } else {
            Tid(v)
        }
    }

    pub fn next(&self) -> Tid {
        self.advance(1)
    }

    /// `self - 1`, or `INVALID` when there is no predecessor.
    pub fn prev(&self) -> Tid {
        Tid(self.0.saturating_sub(1))
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.block(), self.offset())
    }
}

impl fmt::Debug for Tid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Tid {
    type Error = EngineError;

    fn try_from(v: i64) -> Result<Tid, EngineError> {
        if v < 1 {
            return Err(EngineError::input(&format!("tid {} out of range", v)));
        }
        Tid::new(v as u64)
    }
}

impl From<Tid> for i64 {
    fn from(t: Tid) -> i64 {
        t.0 as i64
    }
}

impl From<u16> for Tid {
    fn from(v: u16) -> Tid {
        Tid(v as u64)
    }
}

impl From<u32> for Tid {
    fn from(v: u32) -> Tid {
        Tid(v as u64)
    }
}

/// Accepts the same literals the `i64` path accepts, then range-checks.
/// There is deliberately no unary negation on tids.
impl FromStr for Tid {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Tid, EngineError> {
        let v: i64 = s
            .trim()
            .parse()
            .map_err(|_| EngineError::input(&format!("invalid tid literal: {:?}", s)))?;
        Tid::try_from(v)
    }
}

impl Encodeable for Tid {
    fn encode(&self) -> Vec<u8> {
        self.0.to_le_bytes().to_vec()
    }
}

impl Decodeable for Tid {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        let bytes = read_exact(reader, 8);
        Tid(u64::from_le_bytes(bytes.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_round_trip() {
        let t: Tid = "1".parse().unwrap();
        assert_eq!(t.raw(), 1);
        assert_eq!(i64::from(t), 1);
    }

    #[test]
    fn negative_literal_rejected() {
        assert!("-1".parse::<Tid>().is_err());
        assert!(Tid::try_from(-1i64).is_err());
        assert!(Tid::try_from(0i64).is_err());
    }

    #[test]
    fn int8_overflow_rejected() {
        // 10^15 > 2^48 - 1
        assert!(Tid::try_from(1_000_000_000_000_000i64).is_err());
        assert!(Tid::new(Tid::MAX.raw() + 1).is_err());
    }

    #[test]
    fn narrow_widening_casts() {
        assert_eq!(Tid::from(1u16).raw(), 1);
        assert_eq!(Tid::from(65_536u32).block(), 1);
    }

    #[test]
    fn block_offset_projection() {
        let t = Tid::new((7 << 16) | 42).unwrap();
        assert_eq!(t.block(), 7);
        assert_eq!(t.offset(), 42);
        assert_eq!(Tid::from_block_offset(7, 42), t);
        assert_eq!(format!("{}", t), "(7, 42)");
    }

    #[test]
    fn sentinel_bounds() {
        assert!(!Tid::INVALID.is_valid());
        assert!(Tid::MAX.is_valid());
        assert!(!Tid::MAX_PLUS_ONE.is_valid());
        assert_eq!(Tid::MAX.next(), Tid::MAX_PLUS_ONE);
        assert_eq!(Tid::MAX_PLUS_ONE.advance(10), Tid::MAX_PLUS_ONE);
    }
}
