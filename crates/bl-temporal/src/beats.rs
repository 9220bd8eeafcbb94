//! Musical time in quarter notes
//!
//! `Beats` is an exact fixed-point count of quarter notes: a whole-beat
//! part plus a sub-beat tick part at 1920 ticks per quarter note. All
//! arithmetic is integer arithmetic; no drift, no epsilon comparisons.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;

/// Ticks per quarter note
pub const TICKS_PER_BEAT: i32 = 1920;

/// Exact musical time: whole quarter notes plus ticks.
///
/// Always normalized so that `0 <= ticks < TICKS_PER_BEAT`; negative
/// totals floor into the beat field (`-1` tick is `beats: -1, ticks:
/// 1919`). The derived ordering is therefore the total-tick ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Beats {
    beats: i32,
    ticks: i32,
}

impl Beats {
    pub const ZERO: Self = Self { beats: 0, ticks: 0 };

    /// Construct from a (possibly unnormalized) beat/tick pair.
    #[inline]
    pub fn new(beats: i32, ticks: i32) -> Self {
        Self::from_ticks(beats as i64 * TICKS_PER_BEAT as i64 + ticks as i64)
    }

    /// Construct from a total tick count.
    #[inline]
    pub fn from_ticks(ticks: i64) -> Self {
        let tpb = TICKS_PER_BEAT as i64;
        Self {
            beats: ticks.div_euclid(tpb) as i32,
            ticks: ticks.rem_euclid(tpb) as i32,
        }
    }

    /// Construct from a floating-point quarter-note count (rounded to the
    /// nearest tick).
    #[inline]
    pub fn from_double(beats: f64) -> Self {
        Self::from_ticks((beats * TICKS_PER_BEAT as f64).round() as i64)
    }

    /// The smallest representable increment.
    #[inline]
    pub fn one_tick() -> Self {
        Self { beats: 0, ticks: 1 }
    }

    #[inline]
    pub fn get_beats(&self) -> i32 {
        self.beats
    }

    #[inline]
    pub fn get_ticks(&self) -> i32 {
        self.ticks
    }

    /// Total tick count.
    #[inline]
    pub fn to_ticks(&self) -> i64 {
        self.beats as i64 * TICKS_PER_BEAT as i64 + self.ticks as i64
    }

    #[inline]
    pub fn to_double(&self) -> f64 {
        self.to_ticks() as f64 / TICKS_PER_BEAT as f64
    }

    /// Snap down to a whole beat.
    #[inline]
    pub fn round_down_to_beat(&self) -> Self {
        Self { beats: self.beats, ticks: 0 }
    }

    /// Snap up to a whole beat.
    #[inline]
    pub fn round_up_to_beat(&self) -> Self {
        if self.ticks == 0 {
            *self
        } else {
            Self { beats: self.beats + 1, ticks: 0 }
        }
    }
}

impl Add for Beats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::from_ticks(self.to_ticks() + rhs.to_ticks())
    }
}

impl AddAssign for Beats {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Beats {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::from_ticks(self.to_ticks() - rhs.to_ticks())
    }
}

impl SubAssign for Beats {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for Beats {
    type Output = Self;

    fn neg(self) -> Self {
        Self::from_ticks(-self.to_ticks())
    }
}

impl Mul<i32> for Beats {
    type Output = Self;

    fn mul(self, rhs: i32) -> Self {
        Self::from_ticks(self.to_ticks() * rhs as i64)
    }
}

impl Div<i32> for Beats {
    type Output = Self;

    fn div(self, rhs: i32) -> Self {
        Self::from_ticks(self.to_ticks() / rhs as i64)
    }
}

impl fmt::Display for Beats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.beats, self.ticks)
    }
}

impl FromStr for Beats {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (b, t) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed beats value: {}", s))?;
        let beats = b.parse::<i32>().map_err(|e| e.to_string())?;
        let ticks = t.parse::<i32>().map_err(|e| e.to_string())?;
        Ok(Self::new(beats, ticks))
    }
}

impl Serialize for Beats {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Beats {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
