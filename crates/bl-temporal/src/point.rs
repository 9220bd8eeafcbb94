//! Tempo map points
//!
//! A point is one entry in the map. Explicit points own their metric
//! (and/or anchor their position); implicit points are derived views
//! that borrow the metric of the nearest preceding explicit point. The
//! borrow is an arena index into the map's point vector, never a
//! pointer, so rebuilds can re-derive every implicit point from scratch
//! without self-referential lifetimes.

use crate::bbt::BbtTime;
use crate::beats::Beats;
use crate::superclock::Superclock;
use crate::tempo::{Meter, Tempo, TempoMetric};
use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Which aspects of a point are user-anchored.
    ///
    /// A point with no flags set is implicit. `EXPLICIT_POSITION` alone
    /// is legal: the metric is inherited but the time anchor is the
    /// user's.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PointFlags: u8 {
        const EXPLICIT_TEMPO = 0x1;
        const EXPLICIT_METER = 0x2;
        const EXPLICIT_POSITION = 0x4;
    }
}

/// Where a point's metric comes from: its own copy, or the index of the
/// nearest preceding explicit point in the map's point vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricSource {
    Explicit(TempoMetric),
    Implicit(usize),
}

/// One entry in the tempo map, positioned in all three coordinate
/// systems at once.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMapPoint {
    flags: PointFlags,
    source: MetricSource,
    sclock: Superclock,
    quarters: Beats,
    bbt: BbtTime,
    dirty: bool,
    floating: bool,
}

impl TempoMapPoint {
    /// A new explicit point owning `metric`.
    pub fn explicit(
        flags: PointFlags,
        metric: TempoMetric,
        sclock: Superclock,
        quarters: Beats,
        bbt: BbtTime,
    ) -> Self {
        debug_assert!(!flags.is_empty());
        Self {
            flags,
            source: MetricSource::Explicit(metric),
            sclock,
            quarters,
            bbt,
            dirty: true,
            floating: false,
        }
    }

    /// A new implicit point borrowing the explicit point at `reference`.
    pub fn implicit(
        reference: usize,
        sclock: Superclock,
        quarters: Beats,
        bbt: BbtTime,
    ) -> Self {
        Self {
            flags: PointFlags::empty(),
            source: MetricSource::Implicit(reference),
            sclock,
            quarters,
            bbt,
            dirty: true,
            floating: false,
        }
    }

    #[inline]
    pub fn flags(&self) -> PointFlags {
        self.flags
    }

    #[inline]
    pub fn is_explicit_tempo(&self) -> bool {
        self.flags.contains(PointFlags::EXPLICIT_TEMPO)
    }

    #[inline]
    pub fn is_explicit_meter(&self) -> bool {
        self.flags.contains(PointFlags::EXPLICIT_METER)
    }

    #[inline]
    pub fn is_explicit_position(&self) -> bool {
        self.flags.contains(PointFlags::EXPLICIT_POSITION)
    }

    #[inline]
    pub fn is_explicit(&self) -> bool {
        !self.flags.is_empty()
    }

    #[inline]
    pub fn is_implicit(&self) -> bool {
        self.flags.is_empty()
    }

    #[inline]
    pub fn sclock(&self) -> Superclock {
        self.sclock
    }

    #[inline]
    pub fn quarters(&self) -> Beats {
        self.quarters
    }

    #[inline]
    pub fn bbt(&self) -> BbtTime {
        self.bbt
    }

    #[inline]
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn set_dirty(&mut self, yn: bool) {
        self.dirty = yn;
    }

    /* called by a GUI that is dragging this point */

    pub fn start_float(&mut self) {
        self.floating = true;
    }

    pub fn end_float(&mut self) {
        self.floating = false;
    }

    #[inline]
    pub fn floating(&self) -> bool {
        self.floating
    }

    /// The owned metric, if any. Implicit points return `None`; resolve
    /// them with [`TempoMapPoint::metric_in`].
    #[inline]
    pub fn metric(&self) -> Option<&TempoMetric> {
        match &self.source {
            MetricSource::Explicit(m) => Some(m),
            MetricSource::Implicit(_) => None,
        }
    }

    pub(crate) fn metric_mut(&mut self) -> Option<&mut TempoMetric> {
        match &mut self.source {
            MetricSource::Explicit(m) => Some(m),
            MetricSource::Implicit(_) => None,
        }
    }

    /// The arena index this implicit point borrows from.
    #[inline]
    pub fn reference(&self) -> Option<usize> {
        match self.source {
            MetricSource::Explicit(_) => None,
            MetricSource::Implicit(idx) => Some(idx),
        }
    }

    /// Resolve the metric in effect at this point against the map's
    /// point vector. One hop at most: references always name explicit
    /// points.
    pub fn metric_in<'a>(&'a self, points: &'a [TempoMapPoint]) -> &'a TempoMetric {
        match &self.source {
            MetricSource::Explicit(m) => m,
            MetricSource::Implicit(idx) => {
                let referent = &points[*idx];
                debug_assert!(referent.is_explicit(), "implicit point references implicit point");
                match &referent.source {
                    MetricSource::Explicit(m) => m,
                    MetricSource::Implicit(_) => unreachable!(),
                }
            }
        }
    }

    #[inline]
    pub fn tempo_in<'a>(&'a self, points: &'a [TempoMapPoint]) -> &'a Tempo {
        self.metric_in(points).tempo()
    }

    #[inline]
    pub fn meter_in<'a>(&'a self, points: &'a [TempoMapPoint]) -> &'a Meter {
        self.metric_in(points).meter()
    }

    /// Promote to explicit with the given (already resolved) metric.
    /// Idempotent per flag; an already-explicit point keeps its own
    /// metric.
    pub fn make_explicit(&mut self, flag: PointFlags, resolved: TempoMetric) {
        if let MetricSource::Implicit(_) = self.source {
            self.source = MetricSource::Explicit(resolved);
        }
        if !self.flags.contains(flag) {
            self.flags |= flag;
            self.dirty = true;
        }
    }

    /// Demote to an implicit view of the point at `reference`. Only the
    /// rebuild engine may call this, after proving nothing references
    /// this point.
    pub(crate) fn make_implicit(&mut self, reference: usize) {
        self.flags = PointFlags::empty();
        self.source = MetricSource::Implicit(reference);
    }

    pub(crate) fn remove_flag(&mut self, flag: PointFlags) {
        self.flags &= !flag;
        self.dirty = true;
    }

    /* Position setters apply to explicit points only. Implicit points
     * are pure views; writes to them are silently ignored. */

    pub fn set_sclock(&mut self, sc: Superclock) {
        if self.is_explicit() {
            self.sclock = sc;
            self.dirty = true;
        }
    }

    pub fn set_quarters(&mut self, quarters: Beats) {
        if self.is_explicit() {
            self.quarters = quarters;
            self.dirty = true;
        }
    }

    pub fn set_bbt(&mut self, bbt: BbtTime) {
        if self.is_explicit() {
            self.bbt = bbt;
            self.dirty = true;
        }
    }

    /// Quarter-note position of an absolute superclock at or after this
    /// point, using this point's metric.
    pub fn quarters_at(&self, points: &[TempoMapPoint], sc: Superclock) -> Beats {
        self.quarters + self.metric_in(points).quarters_at_superclock(sc - self.sclock)
    }

    /// BBT position of an absolute quarter-note position at or after
    /// this point, using this point's meter.
    pub fn bbt_at(&self, points: &[TempoMapPoint], quarters: Beats) -> BbtTime {
        let meter = self.meter_in(points);
        meter.bbt_add(self.bbt, meter.to_bbt_offset(quarters - self.quarters))
    }

    /// Quarter-note distance covered by `distance` superclocks starting
    /// here.
    pub fn walk_to_quarters(&self, points: &[TempoMapPoint], distance: Superclock) -> Beats {
        self.metric_in(points).quarters_at_superclock(distance)
    }

    /// Superclock distance covered by `distance` quarters starting here.
    pub fn walk_to_superclock(&self, points: &[TempoMapPoint], distance: Beats) -> Superclock {
        self.metric_in(points).superclock_at_qn(distance)
    }
}

impl fmt::Display for TempoMapPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_implicit() { "implicit" } else { "explicit" };
        write!(
            f,
            "{} @ sc {} / {} qn / {}",
            kind, self.sclock, self.quarters, self.bbt
        )?;
        if let MetricSource::Explicit(m) = &self.source {
            write!(f, " [{} {}]", m.tempo(), m.meter())?;
        }
        Ok(())
    }
}
