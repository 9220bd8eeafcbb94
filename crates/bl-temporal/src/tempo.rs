//! Tempo, meter and the combined metric
//!
//! `Tempo` is the speed at which musical time progresses, stored as
//! superclocks per note type so that conversions stay in integer space.
//! `Meter` is the time signature. `TempoMetric` pairs the two and caches
//! the interpolation coefficients for ramped (piecewise-exponential)
//! segments.

use crate::beats::{Beats, TICKS_PER_BEAT};
use crate::bbt::{BbtOffset, BbtTime};
use crate::superclock::{
    round_div, superclock_to_samples, Superclock, SUPERCLOCK_TICKS_PER_SECOND,
};
use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPO
// ═══════════════════════════════════════════════════════════════════════════════

/// How a tempo progresses to the next tempo point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RampType {
    /// Constant beat duration across the segment
    #[default]
    Constant,
    /// Exponential beat-duration interpolation toward the end tempo
    Ramped,
}

/// Tempo: the duration of one note of `note_type`, in superclocks.
///
/// `ramp_type` is `Ramped` exactly when the start and end superclock
/// values differ; every constructor and setter maintains that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Tempo {
    superclocks_per_note_type: Superclock,
    end_superclocks_per_note_type: Superclock,
    note_type: i8,
    active: bool,
    /* name has unclear meaning since the map rewrite; carried and
     * persisted, never consulted by map logic */
    locked_to_meter: bool,
    clamped: bool,
    #[serde(rename = "type")]
    ramp_type: RampType,
}

#[inline]
fn npm_to_superclocks(npm: f64) -> Superclock {
    ((SUPERCLOCK_TICKS_PER_SECOND as f64 / npm) * 60.0).round() as Superclock
}

#[inline]
fn superclocks_to_npm(sc: Superclock) -> f64 {
    (SUPERCLOCK_TICKS_PER_SECOND as f64 * 60.0) / sc as f64
}

impl Tempo {
    /// Constant tempo of `npm` notes of `note_type` per minute.
    pub fn new(npm: f64, note_type: i8) -> Self {
        debug_assert!(npm > 0.0);
        debug_assert!(matches!(note_type, 1 | 2 | 4 | 8 | 16 | 32));
        let sc = npm_to_superclocks(npm);
        Self {
            superclocks_per_note_type: sc,
            end_superclocks_per_note_type: sc,
            note_type,
            active: true,
            locked_to_meter: false,
            clamped: false,
            ramp_type: RampType::Constant,
        }
    }

    /// Tempo ramping from `npm` to `end_npm` notes per minute.
    pub fn new_ramped(npm: f64, end_npm: f64, note_type: i8) -> Self {
        debug_assert!(npm > 0.0 && end_npm > 0.0);
        let sc = npm_to_superclocks(npm);
        let end_sc = npm_to_superclocks(end_npm);
        Self {
            superclocks_per_note_type: sc,
            end_superclocks_per_note_type: end_sc,
            note_type,
            active: true,
            locked_to_meter: false,
            clamped: false,
            ramp_type: if sc != end_sc { RampType::Ramped } else { RampType::Constant },
        }
    }

    /* bpm-style accessors, for display and user entry only */

    pub fn note_types_per_minute(&self) -> f64 {
        superclocks_to_npm(self.superclocks_per_note_type)
    }

    pub fn end_note_types_per_minute(&self) -> f64 {
        superclocks_to_npm(self.end_superclocks_per_note_type)
    }

    pub fn quarter_notes_per_minute(&self) -> f64 {
        (SUPERCLOCK_TICKS_PER_SECOND as f64 * 60.0 * 4.0)
            / (self.note_type as f64 * self.superclocks_per_note_type as f64)
    }

    pub fn set_note_types_per_minute(&mut self, npm: f64) {
        self.superclocks_per_note_type = npm_to_superclocks(npm);
        if !self.ramped() {
            self.end_superclocks_per_note_type = self.superclocks_per_note_type;
        }
        self.ramp_type = if self.superclocks_per_note_type != self.end_superclocks_per_note_type {
            RampType::Ramped
        } else {
            RampType::Constant
        };
    }

    #[inline]
    pub fn note_type(&self) -> i8 {
        self.note_type
    }

    #[inline]
    pub fn superclocks_per_note_type(&self) -> Superclock {
        self.superclocks_per_note_type
    }

    #[inline]
    pub fn end_superclocks_per_note_type(&self) -> Superclock {
        self.end_superclocks_per_note_type
    }

    /// Superclocks per note of a different type (`sc * own / target`).
    #[inline]
    pub fn superclocks_per_note_type_for(&self, note_type: i8) -> Superclock {
        (self.superclocks_per_note_type * self.note_type as Superclock) / note_type as Superclock
    }

    #[inline]
    pub fn superclocks_per_quarter_note(&self) -> Superclock {
        self.superclocks_per_note_type_for(4)
    }

    #[inline]
    pub fn end_superclocks_per_quarter_note(&self) -> Superclock {
        (self.end_superclocks_per_note_type * self.note_type as Superclock) / 4
    }

    /// Superclocks per `Beats` tick.
    #[inline]
    pub fn superclocks_per_ppqn(&self) -> Superclock {
        self.superclocks_per_quarter_note() / TICKS_PER_BEAT as Superclock
    }

    pub fn samples_per_note_type(&self, sample_rate: u32) -> f64 {
        superclock_to_samples(self.superclocks_per_note_type, sample_rate) as f64
    }

    pub fn samples_per_quarter_note(&self, sample_rate: u32) -> f64 {
        superclock_to_samples(self.superclocks_per_quarter_note(), sample_rate) as f64
    }

    #[inline]
    pub fn active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, yn: bool) {
        self.active = yn;
    }

    #[inline]
    pub fn locked_to_meter(&self) -> bool {
        self.locked_to_meter
    }

    pub fn set_locked_to_meter(&mut self, yn: bool) {
        self.locked_to_meter = yn;
    }

    #[inline]
    pub fn clamped(&self) -> bool {
        self.clamped
    }

    /// Returns true when the value changed.
    pub fn set_clamped(&mut self, yn: bool) -> bool {
        if self.clamped == yn {
            return false;
        }
        self.clamped = yn;
        true
    }

    #[inline]
    pub fn ramp_type(&self) -> RampType {
        self.ramp_type
    }

    #[inline]
    pub fn ramped(&self) -> bool {
        self.ramp_type != RampType::Constant
    }

    /// Toggle ramping. Disabling collapses the end tempo onto the start
    /// tempo; enabling is a no-op while start == end (there is nothing to
    /// ramp to yet). Returns true when the value changed.
    pub fn set_ramped(&mut self, yn: bool) -> bool {
        if yn == self.ramped() {
            return false;
        }
        if !yn {
            self.end_superclocks_per_note_type = self.superclocks_per_note_type;
            self.ramp_type = RampType::Constant;
            return true;
        }
        if self.superclocks_per_note_type != self.end_superclocks_per_note_type {
            self.ramp_type = RampType::Ramped;
            return true;
        }
        false
    }

    pub fn set_end_note_types_per_minute(&mut self, npm: f64) {
        self.end_superclocks_per_note_type = npm_to_superclocks(npm);
        self.ramp_type = if self.superclocks_per_note_type != self.end_superclocks_per_note_type {
            RampType::Ramped
        } else {
            RampType::Constant
        };
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ramped() {
            write!(
                f,
                "{:.2}..{:.2} npm ({})",
                self.note_types_per_minute(),
                self.end_note_types_per_minute(),
                self.note_type
            )
        } else {
            write!(f, "{:.2} npm ({})", self.note_types_per_minute(), self.note_type)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// METER
// ═══════════════════════════════════════════════════════════════════════════════

/// Meter, or time signature: how many divisions make a bar, and which
/// note value one division represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Meter {
    divisions_per_bar: i8,
    note_value: i8,
}

impl Meter {
    pub fn new(divisions_per_bar: i8, note_value: i8) -> Self {
        debug_assert!(divisions_per_bar >= 1);
        debug_assert!(matches!(note_value, 1 | 2 | 4 | 8 | 16));
        Self { divisions_per_bar, note_value }
    }

    #[inline]
    pub fn divisions_per_bar(&self) -> i8 {
        self.divisions_per_bar
    }

    #[inline]
    pub fn note_value(&self) -> i8 {
        self.note_value
    }

    /// Ticks in one bar (one division == one beat == `TICKS_PER_BEAT`
    /// ticks of the division's note value).
    #[inline]
    pub fn ticks_per_bar(&self) -> i64 {
        self.divisions_per_bar as i64 * TICKS_PER_BEAT as i64
    }

    /// Add a BBT distance to a BBT position under this meter. Tick
    /// overflow propagates into beats, beat overflow into bars.
    pub fn bbt_add(&self, bbt: BbtTime, add: BbtOffset) -> BbtTime {
        let dpb = self.divisions_per_bar as i32;
        let mut bars = bbt.bars - 1 + add.bars;
        let mut beats = bbt.beats - 1 + add.beats;
        let mut ticks = bbt.ticks + add.ticks;

        beats += ticks.div_euclid(TICKS_PER_BEAT);
        ticks = ticks.rem_euclid(TICKS_PER_BEAT);
        bars += beats.div_euclid(dpb);
        beats = beats.rem_euclid(dpb);

        BbtTime { bars: bars + 1, beats: beats + 1, ticks }
    }

    pub fn bbt_subtract(&self, bbt: BbtTime, sub: BbtOffset) -> BbtTime {
        self.bbt_add(bbt, -sub)
    }

    /// The signed distance `a - b` under this meter.
    pub fn bbt_delta(&self, a: BbtTime, b: BbtTime) -> BbtOffset {
        let dpb = self.divisions_per_bar as i64;
        let tpb = TICKS_PER_BEAT as i64;
        let ta = ((a.bars as i64 - 1) * dpb + (a.beats as i64 - 1)) * tpb + a.ticks as i64;
        let tb = ((b.bars as i64 - 1) * dpb + (b.beats as i64 - 1)) * tpb + b.ticks as i64;
        let d = ta - tb;
        let (neg, ad) = if d < 0 { (true, -d) } else { (false, d) };
        let bars = (ad / (dpb * tpb)) as i32;
        let rem = ad % (dpb * tpb);
        let beats = (rem / tpb) as i32;
        let ticks = (rem % tpb) as i32;
        if neg {
            BbtOffset::new(-bars, -beats, -ticks)
        } else {
            BbtOffset::new(bars, beats, ticks)
        }
    }

    /// Snap to the nearest bar line.
    pub fn round_to_bar(&self, bbt: BbtTime) -> BbtTime {
        if bbt.is_bar_start() {
            return bbt;
        }
        let pos = (bbt.beats as i64 - 1) * TICKS_PER_BEAT as i64 + bbt.ticks as i64;
        if pos * 2 >= self.ticks_per_bar() {
            BbtTime::new(bbt.bars + 1, 1, 0)
        } else {
            BbtTime::new(bbt.bars, 1, 0)
        }
    }

    /// Convert a BBT distance under this meter to an exact quarter-note
    /// distance (`one division == 4 / note_value quarters`).
    pub fn to_quarters(&self, offset: BbtOffset) -> Beats {
        let dpb = self.divisions_per_bar as i64;
        let division_ticks = (offset.bars as i64 * dpb + offset.beats as i64)
            * TICKS_PER_BEAT as i64
            + offset.ticks as i64;
        let quarter_ticks = round_div(
            division_ticks as i128 * 4,
            self.note_value as i128,
        );
        Beats::from_ticks(quarter_ticks)
    }

    /// Inverse of `to_quarters`: a quarter-note distance as a BBT
    /// distance under this meter.
    pub fn to_bbt_offset(&self, quarters: Beats) -> BbtOffset {
        let division_ticks = round_div(
            quarters.to_ticks() as i128 * self.note_value as i128,
            4,
        );
        let dpb = self.divisions_per_bar as i64;
        let tpb = TICKS_PER_BEAT as i64;
        let (neg, ad) = if division_ticks < 0 {
            (true, -division_ticks)
        } else {
            (false, division_ticks)
        };
        let bars = (ad / (dpb * tpb)) as i32;
        let rem = ad % (dpb * tpb);
        let beats = (rem / tpb) as i32;
        let ticks = (rem % tpb) as i32;
        if neg {
            BbtOffset::new(-bars, -beats, -ticks)
        } else {
            BbtOffset::new(bars, beats, ticks)
        }
    }

    /// Audio duration of one bar at the given tempo.
    pub fn samples_per_bar(&self, tempo: &Tempo, sample_rate: u32) -> f64 {
        superclock_to_samples(
            tempo.superclocks_per_note_type_for(self.note_value)
                * self.divisions_per_bar as Superclock,
            sample_rate,
        ) as f64
    }

    /// Audio duration of one division at the given tempo.
    pub fn samples_per_grid(&self, tempo: &Tempo, sample_rate: u32) -> f64 {
        superclock_to_samples(
            tempo.superclocks_per_note_type_for(self.note_value),
            sample_rate,
        ) as f64
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

impl fmt::Display for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.divisions_per_bar, self.note_value)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPO METRIC
// ═══════════════════════════════════════════════════════════════════════════════

/// The tempo and meter in effect at one point, plus the interpolation
/// coefficients for the segment that starts there.
///
/// For a ramped segment whose superclocks-per-note-type goes from `s0`
/// to `s1` over duration `d`, the coefficient `c` satisfies
/// `s1 = s0 * e^(c*d)`; one coefficient is kept per walking domain
/// (superclocks and quarters). Both are exactly 0 for constant segments.
/// The coefficients are derived data: the rebuild engine recomputes them
/// whenever segment boundaries move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoMetric {
    tempo: Tempo,
    meter: Meter,
    #[serde(skip)]
    c_per_quarter: f64,
    #[serde(skip)]
    c_per_superclock: f64,
}

impl TempoMetric {
    pub fn new(tempo: Tempo, meter: Meter) -> Self {
        Self { tempo, meter, c_per_quarter: 0.0, c_per_superclock: 0.0 }
    }

    #[inline]
    pub fn tempo(&self) -> &Tempo {
        &self.tempo
    }

    #[inline]
    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    pub(crate) fn set_tempo(&mut self, tempo: Tempo) {
        self.tempo = tempo;
        self.c_per_quarter = 0.0;
        self.c_per_superclock = 0.0;
    }

    pub(crate) fn set_meter(&mut self, meter: Meter) {
        self.meter = meter;
    }

    #[inline]
    pub fn c_per_quarter(&self) -> f64 {
        self.c_per_quarter
    }

    #[inline]
    pub fn c_per_superclock(&self) -> f64 {
        self.c_per_superclock
    }

    /// Set the superclock-domain ramp coefficient for a segment of
    /// `duration` superclocks ending at `end_scpnt`.
    pub fn compute_c_superclock(&mut self, end_scpnt: Superclock, duration: Superclock) {
        if !self.tempo.ramped() || duration == 0 || end_scpnt == self.tempo.superclocks_per_note_type() {
            self.c_per_superclock = 0.0;
            return;
        }
        self.c_per_superclock = (end_scpnt as f64 / self.tempo.superclocks_per_note_type() as f64)
            .ln()
            / duration as f64;
    }

    /// Set the quarter-note-domain ramp coefficient for a segment of
    /// `duration` quarters ending at `end_scpnt`.
    pub fn compute_c_quarters(&mut self, end_scpnt: Superclock, duration: Beats) {
        if !self.tempo.ramped()
            || duration == Beats::ZERO
            || end_scpnt == self.tempo.superclocks_per_note_type()
        {
            self.c_per_quarter = 0.0;
            return;
        }
        self.c_per_quarter = (end_scpnt as f64 / self.tempo.superclocks_per_note_type() as f64)
            .ln()
            / duration.to_double();
    }

    /// Superclock distance covered by a quarter-note distance from the
    /// start of this segment.
    ///
    /// Constant: `s = q * scpq`. Ramped: the antiderivative of
    /// `dsc/dq = scpq_0 * e^(c_q * q)`, i.e.
    /// `s(q) = (scpq_0 / c_q) * (e^(c_q * q) - 1)`.
    pub fn superclock_at_qn(&self, qn: Beats) -> Superclock {
        let scpq = self.tempo.superclocks_per_quarter_note();
        if self.c_per_quarter == 0.0 {
            round_div(
                qn.to_ticks() as i128 * scpq as i128,
                TICKS_PER_BEAT as i128,
            )
        } else {
            let q = qn.to_double();
            ((scpq as f64 / self.c_per_quarter) * ((self.c_per_quarter * q).exp() - 1.0)).round()
                as Superclock
        }
    }

    /// Quarter-note distance covered by a superclock distance from the
    /// start of this segment. Inverse of `superclock_at_qn`:
    /// `q(s) = ln(1 + c_q * s / scpq_0) / c_q`.
    pub fn quarters_at_superclock(&self, sc: Superclock) -> Beats {
        let scpq = self.tempo.superclocks_per_quarter_note();
        if self.c_per_quarter == 0.0 {
            return Beats::from_ticks(round_div(
                sc as i128 * TICKS_PER_BEAT as i128,
                scpq as i128,
            ));
        }
        let x = 1.0 + self.c_per_quarter * sc as f64 / scpq as f64;
        if x <= 0.0 {
            // past the ramp asymptote (only reachable walking backward
            // out of the segment); fall back to constant walking
            return Beats::from_ticks(round_div(
                sc as i128 * TICKS_PER_BEAT as i128,
                scpq as i128,
            ));
        }
        Beats::from_double(x.ln() / self.c_per_quarter)
    }

    /// Quarter-note distance covered by `sc` superclocks, computed in the
    /// superclock coefficient domain. The rebuild engine needs this form
    /// before `c_per_quarter` exists for the segment:
    /// `q(s) = (1 - e^(-c_sc * s)) / (c_sc * scpq_0)`.
    pub(crate) fn quarters_at_superclock_sc_domain(&self, sc: Superclock) -> Beats {
        let scpq = self.tempo.superclocks_per_quarter_note();
        if self.c_per_superclock == 0.0 {
            Beats::from_ticks(round_div(
                sc as i128 * TICKS_PER_BEAT as i128,
                scpq as i128,
            ))
        } else {
            let q = (1.0 - (-self.c_per_superclock * sc as f64).exp())
                / (self.c_per_superclock * scpq as f64);
            Beats::from_double(q)
        }
    }

    /// Instantaneous superclocks-per-note-type a superclock distance into
    /// this segment: `scpnt(s) = scpnt_0 * e^(c_sc * s)`.
    pub fn superclock_per_note_type_at_superclock(&self, sc: Superclock) -> Superclock {
        let scpnt = self.tempo.superclocks_per_note_type();
        if self.c_per_superclock == 0.0 {
            scpnt
        } else {
            (scpnt as f64 * (self.c_per_superclock * sc as f64).exp()).round() as Superclock
        }
    }

    #[inline]
    pub fn superclocks_per_bar(&self) -> Superclock {
        self.tempo.superclocks_per_note_type_for(self.meter.note_value())
            * self.meter.divisions_per_bar() as Superclock
    }

    #[inline]
    pub fn superclocks_per_grid(&self) -> Superclock {
        self.tempo.superclocks_per_note_type_for(self.meter.note_value())
    }

    #[inline]
    pub fn ramped(&self) -> bool {
        self.tempo.ramped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tempo_superclock_conversion() {
        let t = Tempo::new(120.0, 4);
        // 120 qpm -> half a second per quarter note
        assert_eq!(t.superclocks_per_note_type(), SUPERCLOCK_TICKS_PER_SECOND / 2);
        assert_eq!(t.superclocks_per_quarter_note(), SUPERCLOCK_TICKS_PER_SECOND / 2);
        assert!((t.note_types_per_minute() - 120.0).abs() < 1e-9);
        assert!((t.quarter_notes_per_minute() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_tempo_note_type_coercion() {
        // 120 eighth notes per minute == 60 quarter notes per minute
        let t = Tempo::new(120.0, 8);
        assert_eq!(t.superclocks_per_quarter_note(), SUPERCLOCK_TICKS_PER_SECOND);
    }

    #[test]
    fn test_ramp_flag_discipline() {
        let mut t = Tempo::new(120.0, 4);
        assert!(!t.ramped());
        // enabling with equal endpoints has nothing to ramp to
        assert!(!t.set_ramped(true));

        t.set_end_note_types_per_minute(140.0);
        assert!(t.ramped());

        assert!(t.set_ramped(false));
        assert!(!t.ramped());
        assert_eq!(
            t.superclocks_per_note_type(),
            t.end_superclocks_per_note_type()
        );
    }

    #[test]
    fn test_bbt_add_wraps_beats_and_bars() {
        let m = Meter::new(4, 4);
        let bbt = BbtTime::new(1, 4, 1000);
        let sum = m.bbt_add(bbt, BbtOffset::new(0, 0, 1000));
        assert_eq!(sum, BbtTime::new(2, 1, 80));

        let m34 = Meter::new(3, 4);
        assert_eq!(
            m34.bbt_add(BbtTime::new(5, 3, 0), BbtOffset::new(0, 1, 0)),
            BbtTime::new(6, 1, 0)
        );
    }

    #[test]
    fn test_bbt_subtract_and_delta() {
        let m = Meter::new(4, 4);
        let a = BbtTime::new(3, 2, 0);
        let b = BbtTime::new(2, 4, 960);
        let d = m.bbt_delta(a, b);
        assert_eq!(m.bbt_add(b, d), a);
        assert_eq!(m.bbt_subtract(a, d), b);
    }

    #[test]
    fn test_round_to_bar() {
        let m = Meter::new(4, 4);
        assert_eq!(m.round_to_bar(BbtTime::new(3, 1, 0)), BbtTime::new(3, 1, 0));
        assert_eq!(m.round_to_bar(BbtTime::new(3, 2, 0)), BbtTime::new(3, 1, 0));
        assert_eq!(m.round_to_bar(BbtTime::new(3, 3, 0)), BbtTime::new(4, 1, 0));
        assert_eq!(m.round_to_bar(BbtTime::new(3, 4, 1919)), BbtTime::new(4, 1, 0));
    }

    #[test]
    fn test_to_quarters() {
        let m = Meter::new(4, 4);
        assert_eq!(m.to_quarters(BbtOffset::new(1, 0, 0)), Beats::new(4, 0));
        assert_eq!(m.to_quarters(BbtOffset::new(0, 1, 0)), Beats::new(1, 0));

        // in 6/8, one division is half a quarter, a bar is three quarters
        let m68 = Meter::new(6, 8);
        assert_eq!(m68.to_quarters(BbtOffset::new(1, 0, 0)), Beats::new(3, 0));
        assert_eq!(m68.to_quarters(BbtOffset::new(0, 1, 0)), Beats::new(0, 960));
    }

    #[test]
    fn test_to_bbt_offset_round_trip() {
        for m in [Meter::new(4, 4), Meter::new(3, 4), Meter::new(6, 8), Meter::new(7, 8)] {
            for (bars, beats, ticks) in [(0, 0, 0), (0, 1, 0), (1, 0, 0), (2, 1, 480), (0, 0, 960)] {
                let off = BbtOffset::new(bars, beats, ticks);
                assert_eq!(m.to_bbt_offset(m.to_quarters(off)), off, "meter {}", m);
            }
        }
    }

    #[test]
    fn test_constant_metric_walk() {
        let metric = TempoMetric::new(Tempo::new(120.0, 4), Meter::new(4, 4));
        let one_beat_sc = SUPERCLOCK_TICKS_PER_SECOND / 2;
        assert_eq!(metric.superclock_at_qn(Beats::new(1, 0)), one_beat_sc);
        assert_eq!(metric.quarters_at_superclock(one_beat_sc), Beats::new(1, 0));
        assert_eq!(metric.quarters_at_superclock(0), Beats::ZERO);
    }

    #[test]
    fn test_ramped_metric_walk_round_trip() {
        // 60 -> 120 bpm over 8 quarters
        let tempo = Tempo::new_ramped(60.0, 120.0, 4);
        let mut metric = TempoMetric::new(tempo, Meter::new(4, 4));
        let end = tempo.end_superclocks_per_note_type();
        metric.compute_c_quarters(end, Beats::new(8, 0));
        assert!(metric.c_per_quarter() < 0.0, "beat duration shrinks as tempo rises");

        for q in [1, 2, 4, 7] {
            let qn = Beats::new(q, 0);
            let sc = metric.superclock_at_qn(qn);
            let back = metric.quarters_at_superclock(sc);
            assert!(
                (back - qn).to_ticks().abs() <= 1,
                "round trip at {} quarters drifted: {}",
                q,
                back
            );
        }
    }

    #[test]
    fn test_ramp_collapse_to_constant() {
        let tempo = Tempo::new_ramped(120.0, 120.0, 4);
        assert!(!tempo.ramped());

        let mut metric = TempoMetric::new(tempo, Meter::new(4, 4));
        metric.compute_c_superclock(tempo.end_superclocks_per_note_type(), 1_000_000);
        metric.compute_c_quarters(tempo.end_superclocks_per_note_type(), Beats::new(4, 0));
        assert_eq!(metric.c_per_superclock(), 0.0);
        assert_eq!(metric.c_per_quarter(), 0.0);
    }

    #[test]
    fn test_ramp_midpoint_skews_toward_the_slow_end() {
        // 8-quarter ramps between 60 and 120 bpm. Accelerating: the time
        // midpoint has covered fewer than half the beats. Decelerating:
        // more than half (strictly between 4 and 5).
        let accel = Tempo::new_ramped(60.0, 120.0, 4);
        let mut metric = TempoMetric::new(accel, Meter::new(4, 4));
        metric.compute_c_quarters(accel.end_superclocks_per_note_type(), Beats::new(8, 0));
        let total_sc = metric.superclock_at_qn(Beats::new(8, 0));
        let mid = metric.quarters_at_superclock(total_sc / 2);
        assert!(mid > Beats::new(3, 0) && mid < Beats::new(4, 0), "midpoint {}", mid);

        let decel = Tempo::new_ramped(120.0, 60.0, 4);
        let mut metric = TempoMetric::new(decel, Meter::new(4, 4));
        metric.compute_c_quarters(decel.end_superclocks_per_note_type(), Beats::new(8, 0));
        let total_sc = metric.superclock_at_qn(Beats::new(8, 0));
        let mid = metric.quarters_at_superclock(total_sc / 2);
        assert!(mid > Beats::new(4, 0) && mid < Beats::new(5, 0), "midpoint {}", mid);
    }
}
