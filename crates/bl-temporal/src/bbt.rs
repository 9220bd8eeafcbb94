//! Bar/beat/tick musical coordinates
//!
//! `BbtTime` is a structured musical position: bar, beat within the bar,
//! tick within the beat. Unlike `Beats`, the meaning of a BBT coordinate
//! depends on the meter in effect, so addition and subtraction live on
//! `Meter`, not here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A bar|beat|tick position. Bars and beats are 1-based, ticks 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BbtTime {
    pub bars: i32,
    pub beats: i32,
    pub ticks: i32,
}

impl BbtTime {
    /// The first tick of the timeline.
    pub const ONE: Self = Self { bars: 1, beats: 1, ticks: 0 };

    #[inline]
    pub fn new(bars: i32, beats: i32, ticks: i32) -> Self {
        debug_assert!(bars >= 1 && beats >= 1 && ticks >= 0);
        Self { bars, beats, ticks }
    }

    /// True when this position sits exactly on a bar line.
    #[inline]
    pub fn is_bar_start(&self) -> bool {
        self.beats == 1 && self.ticks == 0
    }
}

impl Default for BbtTime {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for BbtTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.bars, self.beats, self.ticks)
    }
}

impl FromStr for BbtTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('|').collect();
        if parts.len() != 3 {
            return Err(format!("malformed bbt value: {}", s));
        }
        let bars = parts[0].parse::<i32>().map_err(|e| e.to_string())?;
        let beats = parts[1].parse::<i32>().map_err(|e| e.to_string())?;
        let ticks = parts[2].parse::<i32>().map_err(|e| e.to_string())?;
        if bars < 1 || beats < 1 || ticks < 0 {
            return Err(format!("out-of-range bbt value: {}", s));
        }
        Ok(Self { bars, beats, ticks })
    }
}

impl Serialize for BbtTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BbtTime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A signed bar/beat/tick distance. Fields may be negative; a delta is
/// meaningful only under the meter that produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BbtOffset {
    pub bars: i32,
    pub beats: i32,
    pub ticks: i32,
}

impl BbtOffset {
    pub const ZERO: Self = Self { bars: 0, beats: 0, ticks: 0 };

    #[inline]
    pub fn new(bars: i32, beats: i32, ticks: i32) -> Self {
        Self { bars, beats, ticks }
    }
}

impl std::ops::Neg for BbtOffset {
    type Output = Self;

    fn neg(self) -> Self {
        Self { bars: -self.bars, beats: -self.beats, ticks: -self.ticks }
    }
}

impl fmt::Display for BbtOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.bars, self.beats, self.ticks)
    }
}
