//! The tempo map
//!
//! Mapping between audio time (samples / superclocks), linear musical
//! time (quarter notes) and structured musical time (bars/beats/ticks):
//! - explicit points are authoritative; everything else is derived
//! - mutators take the write lock, edit the point list and rebuild
//! - queries take the read lock and binary-search in the matching
//!   coordinate system
//! - a generation counter lets the audio thread skip conversions whose
//!   inputs have not changed
//!
//! The map never owns time itself: it is a pure function of its control
//! points and the current sample rate.

use crate::bbt::{BbtOffset, BbtTime};
use crate::beats::Beats;
use crate::error::{TemporalError, TemporalResult};
use crate::point::{PointFlags, TempoMapPoint};
use crate::superclock::{
    samples_to_superclock, superclock_to_samples, SampleCnt, SamplePos, Superclock,
};
use crate::tempo::{Meter, Tempo, TempoMetric};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::io;

// ═══════════════════════════════════════════════════════════════════════════════
// CHANGE NOTIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Emitted once per successful mutation: the sample range whose derived
/// values changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapChanged {
    pub start_sample: SamplePos,
    pub end_sample: SamplePos,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PERSISTED STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Persisted form of one point. Tempo and meter are embedded whenever
/// any explicit flag is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoMapPointState {
    pub flags: u8,
    pub sclock: Superclock,
    pub quarters: Beats,
    pub bbt: BbtTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo: Option<Tempo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter: Option<Meter>,
}

/// Persisted form of the whole map. The sample rate is deliberately
/// absent: superclocks are sample-rate independent and the host supplies
/// the rate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TempoMapState {
    pub points: Vec<TempoMapPointState>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAP INTERIOR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
struct MapInner {
    /// Sorted by superclock; quarters and bbt orderings agree by
    /// construction.
    points: Vec<TempoMapPoint>,
    sample_rate: u32,
    generation: i64,
}

impl MapInner {
    /// Index of the point at or most immediately preceding `sc`. Never
    /// past-the-end: before-first returns the first point (the initial
    /// metric extends backward in time), after-last returns the last.
    fn index_at_sclock(&self, sc: Superclock) -> TemporalResult<usize> {
        if self.points.is_empty() {
            return Err(TemporalError::EmptyMap);
        }
        let n = self.points.partition_point(|p| p.sclock() <= sc);
        Ok(n.saturating_sub(1))
    }

    fn index_at_quarters(&self, q: Beats) -> TemporalResult<usize> {
        if self.points.is_empty() {
            return Err(TemporalError::EmptyMap);
        }
        let n = self.points.partition_point(|p| p.quarters() <= q);
        Ok(n.saturating_sub(1))
    }

    fn index_at_bbt(&self, bbt: BbtTime) -> TemporalResult<usize> {
        if self.points.is_empty() {
            return Err(TemporalError::EmptyMap);
        }
        let n = self.points.partition_point(|p| p.bbt() <= bbt);
        Ok(n.saturating_sub(1))
    }

    fn find_exact_sclock(&self, sc: Superclock) -> Option<usize> {
        let idx = self.index_at_sclock(sc).ok()?;
        (self.points[idx].sclock() == sc).then_some(idx)
    }

    fn quarters_at_superclock(&self, sc: Superclock) -> TemporalResult<Beats> {
        let idx = self.index_at_sclock(sc)?;
        let p = &self.points[idx];
        Ok(p.quarters_at(&self.points, sc))
    }

    fn superclock_at_quarters(&self, q: Beats) -> TemporalResult<Superclock> {
        let idx = self.index_at_quarters(q)?;
        let p = &self.points[idx];
        Ok(p.sclock() + p.walk_to_superclock(&self.points, q - p.quarters()))
    }

    fn quarters_at_bbt(&self, bbt: BbtTime) -> TemporalResult<Beats> {
        let idx = self.index_at_bbt(bbt)?;
        let p = &self.points[idx];
        let meter = p.meter_in(&self.points);
        Ok(p.quarters() + meter.to_quarters(meter.bbt_delta(bbt, p.bbt())))
    }

    fn superclock_at_bbt(&self, bbt: BbtTime) -> TemporalResult<Superclock> {
        let idx = self.index_at_bbt(bbt)?;
        let p = &self.points[idx];
        let meter = p.meter_in(&self.points);
        let q = p.quarters() + meter.to_quarters(meter.bbt_delta(bbt, p.bbt()));
        Ok(p.sclock() + p.walk_to_superclock(&self.points, q - p.quarters()))
    }

    fn bbt_at_superclock(&self, sc: Superclock) -> TemporalResult<BbtTime> {
        let idx = self.index_at_sclock(sc)?;
        let p = &self.points[idx];
        let q = p.quarters_at(&self.points, sc);
        Ok(p.bbt_at(&self.points, q))
    }

    fn bbt_at_quarters(&self, q: Beats) -> TemporalResult<BbtTime> {
        let idx = self.index_at_quarters(q)?;
        Ok(self.points[idx].bbt_at(&self.points, q))
    }

    /// Rebuild derived data from the explicit points, in superclock
    /// order, up to `limit`. Explicit positions (superclocks) are
    /// authoritative; quarters, bbt and the ramp coefficients are
    /// recomputed, and every implicit point is discarded (they are
    /// re-derived lazily by grid queries). Points past `limit` are left
    /// with their dirty marker set: their derived values were not
    /// re-derived for the current point set.
    fn rebuild(&mut self, limit: Superclock) {
        self.points.retain(|p| p.is_explicit());
        self.points.sort_by_key(|p| p.sclock());

        if self.points.is_empty() {
            self.generation += 1;
            return;
        }

        // Effective metrics: a point explicit in only one component
        // inherits the other from its predecessor. Ramp coefficients
        // reset here and are recomputed segment by segment below.
        let mut cur_tempo = *self.points[0].metric().expect("anchor owns a metric").tempo();
        let mut cur_meter = *self.points[0].metric().expect("anchor owns a metric").meter();
        for p in &mut self.points {
            let t = if p.is_explicit_tempo() {
                *p.metric().expect("explicit point owns a metric").tempo()
            } else {
                cur_tempo
            };
            let m = if p.is_explicit_meter() {
                *p.metric().expect("explicit point owns a metric").meter()
            } else {
                cur_meter
            };
            let metric = p.metric_mut().expect("explicit point owns a metric");
            metric.set_tempo(t);
            metric.set_meter(m);
            cur_tempo = t;
            cur_meter = m;
        }

        // All derived positions are stale until the forward pass covers
        // them.
        for p in &mut self.points {
            p.set_dirty(true);
        }

        // Forward pass: derive each point's musical position from its
        // predecessor and the superclock delta. The anchor's position is
        // axiomatic, so it counts as covered from the start.
        let mut covered = 0;
        for i in 1..self.points.len() {
            let a_sclock = self.points[i - 1].sclock();
            if a_sclock > limit {
                break;
            }
            let b_sclock = self.points[i].sclock();
            let duration = b_sclock - a_sclock;

            let mut am = *self.points[i - 1].metric().expect("explicit point owns a metric");
            let dq = if am.ramped() {
                let end = am.tempo().end_superclocks_per_note_type();
                am.compute_c_superclock(end, duration);
                let dq = am.quarters_at_superclock_sc_domain(duration);
                am.compute_c_quarters(end, dq);
                dq
            } else {
                am.quarters_at_superclock(duration)
            };
            *self.points[i - 1].metric_mut().expect("explicit point owns a metric") = am;

            let a_quarters = self.points[i - 1].quarters();
            let a_bbt = self.points[i - 1].bbt();
            let b_quarters = a_quarters + dq;
            let b_bbt = am.meter().bbt_add(a_bbt, am.meter().to_bbt_offset(dq));
            self.points[i].set_quarters(b_quarters);
            self.points[i].set_bbt(b_bbt);
            covered = i;
        }

        for p in &mut self.points[..=covered] {
            p.set_dirty(false);
        }
        self.generation += 1;
        log::trace!(
            "tempo map rebuilt: {} points, generation {}",
            self.points.len(),
            self.generation
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPO MAP
// ═══════════════════════════════════════════════════════════════════════════════

/// The tempo map. Shared between the audio, GUI and worker threads; one
/// reader/writer lock serializes mutation against traversal.
pub struct TempoMap {
    inner: RwLock<MapInner>,
    watchers: Mutex<Vec<Sender<MapChanged>>>,
}

impl TempoMap {
    /// A map with `initial_tempo` and `initial_meter` anchored at
    /// position zero. The anchor is immovable and irremovable.
    pub fn new(initial_tempo: Tempo, initial_meter: Meter, sample_rate: u32) -> Self {
        let metric = TempoMetric::new(initial_tempo, initial_meter);
        let mut anchor = TempoMapPoint::explicit(
            PointFlags::EXPLICIT_TEMPO | PointFlags::EXPLICIT_METER,
            metric,
            0,
            Beats::ZERO,
            BbtTime::ONE,
        );
        anchor.set_dirty(false);
        Self {
            inner: RwLock::new(MapInner {
                points: vec![anchor],
                sample_rate,
                generation: 0,
            }),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// A map with no points at all. Every query fails with `EmptyMap`
    /// until state is loaded; exists for the state loader and for tests.
    pub fn empty(sample_rate: u32) -> Self {
        Self {
            inner: RwLock::new(MapInner {
                points: Vec::new(),
                sample_rate,
                generation: 0,
            }),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to change notifications.
    pub fn watch(&self) -> Receiver<MapChanged> {
        let (tx, rx) = unbounded();
        self.watchers.lock().push(tx);
        rx
    }

    fn notify(&self, start_sample: SamplePos, end_sample: SamplePos) {
        let mut watchers = self.watchers.lock();
        watchers.retain(|tx| tx.send(MapChanged { start_sample, end_sample }).is_ok());
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.read().sample_rate
    }

    /// Change the sample rate. Stored state is superclock-based and
    /// therefore sample-rate independent; only sample-domain results
    /// change, so this just swaps the rate and invalidates caches.
    pub fn set_sample_rate(&self, sample_rate: u32) {
        {
            let mut inner = self.inner.write();
            inner.sample_rate = sample_rate;
            inner.generation += 1;
        }
        self.notify(0, SamplePos::MAX);
    }

    pub fn generation(&self) -> i64 {
        self.inner.read().generation
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Insertion
    // ─────────────────────────────────────────────────────────────────────────────

    /// Install `tempo` at a sample position. Returns the resulting point,
    /// or `None` when placement is rejected (before the anchor, or
    /// coincident with a point whose clamped tempo forbids change).
    pub fn set_tempo(&self, tempo: Tempo, at: SamplePos) -> Option<TempoMapPoint> {
        let sc = samples_to_superclock(at, self.inner.read().sample_rate);
        self.set_tempo_at_superclock(tempo, sc)
    }

    pub fn set_tempo_at_beats(&self, tempo: Tempo, at: Beats) -> Option<TempoMapPoint> {
        let sc = self.inner.read().superclock_at_quarters(at).ok()?;
        self.set_tempo_at_superclock(tempo, sc)
    }

    pub fn set_tempo_at_bbt(&self, tempo: Tempo, at: BbtTime) -> Option<TempoMapPoint> {
        let sc = self.inner.read().superclock_at_bbt(at).ok()?;
        self.set_tempo_at_superclock(tempo, sc)
    }

    pub fn set_tempo_at_superclock(&self, tempo: Tempo, sc: Superclock) -> Option<TempoMapPoint> {
        let (point, start_sample) = {
            let mut inner = self.inner.write();
            Self::splice(&mut inner, PointFlags::EXPLICIT_TEMPO, Some(tempo), None, sc)?;
            inner.rebuild(Superclock::MAX);
            let idx = inner.find_exact_sclock(sc).expect("spliced point survives rebuild");
            (inner.points[idx].clone(), superclock_to_samples(sc, inner.sample_rate))
        };
        log::debug!("set tempo {} at superclock {}", tempo, sc);
        self.notify(start_sample, SamplePos::MAX);
        Some(point)
    }

    /// Install `meter` at a sample position.
    pub fn set_meter(&self, meter: Meter, at: SamplePos) -> Option<TempoMapPoint> {
        let sc = samples_to_superclock(at, self.inner.read().sample_rate);
        self.set_meter_at_superclock(meter, sc)
    }

    /// Install `meter` at a BBT position, snapped to the nearest bar
    /// line (meter changes take effect on bar boundaries).
    pub fn set_meter_at_bbt(&self, meter: Meter, at: BbtTime) -> Option<TempoMapPoint> {
        let sc = {
            let inner = self.inner.read();
            let idx = inner.index_at_bbt(at).ok()?;
            let rounded = inner.points[idx].meter_in(&inner.points).round_to_bar(at);
            inner.superclock_at_bbt(rounded).ok()?
        };
        self.set_meter_at_superclock(meter, sc)
    }

    pub fn set_meter_at_superclock(&self, meter: Meter, sc: Superclock) -> Option<TempoMapPoint> {
        let (point, start_sample) = {
            let mut inner = self.inner.write();
            Self::splice(&mut inner, PointFlags::EXPLICIT_METER, None, Some(meter), sc)?;
            inner.rebuild(Superclock::MAX);
            let idx = inner.find_exact_sclock(sc).expect("spliced point survives rebuild");
            (inner.points[idx].clone(), superclock_to_samples(sc, inner.sample_rate))
        };
        log::debug!("set meter {} at superclock {}", meter, sc);
        self.notify(start_sample, SamplePos::MAX);
        Some(point)
    }

    /// Install a tempo and a meter at the same sample position.
    pub fn set_tempo_and_meter(
        &self,
        tempo: Tempo,
        meter: Meter,
        at: SamplePos,
    ) -> Option<TempoMapPoint> {
        let sc = samples_to_superclock(at, self.inner.read().sample_rate);
        let (point, start_sample) = {
            let mut inner = self.inner.write();
            Self::splice(
                &mut inner,
                PointFlags::EXPLICIT_TEMPO | PointFlags::EXPLICIT_METER,
                Some(tempo),
                Some(meter),
                sc,
            )?;
            inner.rebuild(Superclock::MAX);
            let idx = inner.find_exact_sclock(sc).expect("spliced point survives rebuild");
            (inner.points[idx].clone(), superclock_to_samples(sc, inner.sample_rate))
        };
        self.notify(start_sample, SamplePos::MAX);
        Some(point)
    }

    /// Update a coincident explicit point or splice a new one. Returns
    /// the index of the affected point, or `None` when rejected.
    fn splice(
        inner: &mut MapInner,
        flags: PointFlags,
        tempo: Option<Tempo>,
        meter: Option<Meter>,
        sc: Superclock,
    ) -> Option<usize> {
        if sc < 0 {
            log::warn!("rejected point placement before the anchor (superclock {})", sc);
            return None;
        }
        let idx = inner.index_at_sclock(sc).ok()?;

        if inner.points[idx].sclock() == sc {
            // coincident explicit point
            if inner.points[idx]
                .metric()
                .expect("map points are explicit")
                .tempo()
                .clamped()
            {
                log::warn!("rejected edit of clamped point at superclock {}", sc);
                return None;
            }
            let resolved = *inner.points[idx].metric().expect("map points are explicit");
            let p = &mut inner.points[idx];
            p.make_explicit(flags, resolved);
            let metric = p.metric_mut().expect("just made explicit");
            if let Some(t) = tempo {
                metric.set_tempo(t);
            }
            if let Some(m) = meter {
                metric.set_meter(m);
            }
            return Some(idx);
        }

        if inner.points[idx].sclock() > sc {
            // only possible when sc precedes the anchor
            log::warn!("rejected point placement before the anchor (superclock {})", sc);
            return None;
        }

        let a = &inner.points[idx];
        let quarters = a.quarters_at(&inner.points, sc);
        let bbt = a.bbt_at(&inner.points, quarters);
        let inherited = *a.metric_in(&inner.points);
        let metric = TempoMetric::new(
            tempo.unwrap_or(*inherited.tempo()),
            meter.unwrap_or(*inherited.meter()),
        );
        let point = TempoMapPoint::explicit(flags, metric, sc, quarters, bbt);
        inner.points.insert(idx + 1, point);
        Some(idx + 1)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Removal
    // ─────────────────────────────────────────────────────────────────────────────

    /// Clear the tempo flag of the explicit point at `at`. The point is
    /// erased once no explicit flags remain. The anchor is irremovable.
    pub fn remove_tempo_at(&self, at: SamplePos) -> bool {
        self.remove_flag_at(at, PointFlags::EXPLICIT_TEMPO)
    }

    pub fn remove_meter_at(&self, at: SamplePos) -> bool {
        self.remove_flag_at(at, PointFlags::EXPLICIT_METER)
    }

    /// Erase the whole explicit point at `at` (except the anchor).
    pub fn remove_explicit_point(&self, at: SamplePos) -> bool {
        let start_sample;
        {
            let mut inner = self.inner.write();
            let sc = samples_to_superclock(at, inner.sample_rate);
            let idx = match inner.find_exact_sclock(sc) {
                Some(idx) => idx,
                None => return false,
            };
            if idx == 0 {
                log::warn!("rejected removal of the anchor point");
                return false;
            }
            inner.points.remove(idx);
            inner.rebuild(Superclock::MAX);
            start_sample = superclock_to_samples(sc, inner.sample_rate);
        }
        self.notify(start_sample, SamplePos::MAX);
        true
    }

    fn remove_flag_at(&self, at: SamplePos, flag: PointFlags) -> bool {
        let start_sample;
        {
            let mut inner = self.inner.write();
            let sc = samples_to_superclock(at, inner.sample_rate);
            let idx = match inner.find_exact_sclock(sc) {
                Some(idx) => idx,
                None => return false,
            };
            if !inner.points[idx].flags().contains(flag) {
                return false;
            }
            if idx == 0 {
                log::warn!("rejected removal of the anchor point");
                return false;
            }
            inner.points[idx].remove_flag(flag);
            if inner.points[idx].flags().is_empty() {
                inner.points.remove(idx);
            }
            inner.rebuild(Superclock::MAX);
            start_sample = superclock_to_samples(sc, inner.sample_rate);
        }
        self.notify(start_sample, SamplePos::MAX);
        true
    }

    /// False for the anchor's tempo: the initial tempo can never be
    /// removed.
    pub fn can_remove_tempo(&self, tempo: &Tempo) -> bool {
        !self.is_initial_tempo(tempo)
    }

    pub fn can_remove_meter(&self, meter: &Meter) -> bool {
        !self.is_initial_meter(meter)
    }

    pub fn is_initial_tempo(&self, tempo: &Tempo) -> bool {
        let inner = self.inner.read();
        inner
            .points
            .first()
            .and_then(|p| p.metric())
            .is_some_and(|m| m.tempo() == tempo)
    }

    pub fn is_initial_meter(&self, meter: &Meter) -> bool {
        let inner = self.inner.read();
        inner
            .points
            .first()
            .and_then(|p| p.metric())
            .is_some_and(|m| m.meter() == meter)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // In-place edits
    // ─────────────────────────────────────────────────────────────────────────────

    /// Replace the tempo of the explicit point at `at` and rebuild from
    /// there. Fails with `BadTempoMetricLookup` when no explicit tempo
    /// point sits at that position.
    pub fn change_tempo(&self, at: SamplePos, tempo: Tempo) -> TemporalResult<()> {
        let start_sample;
        {
            let mut inner = self.inner.write();
            let sc = samples_to_superclock(at, inner.sample_rate);
            let idx = inner
                .find_exact_sclock(sc)
                .filter(|&i| inner.points[i].is_explicit_tempo())
                .ok_or(TemporalError::BadTempoMetricLookup)?;
            inner.points[idx]
                .metric_mut()
                .ok_or(TemporalError::BadTempoMetricLookup)?
                .set_tempo(tempo);
            inner.rebuild(Superclock::MAX);
            start_sample = superclock_to_samples(sc, inner.sample_rate);
        }
        self.notify(start_sample, SamplePos::MAX);
        Ok(())
    }

    /// Relocate the explicit point at `current` to `destination`. With
    /// `push`, later points shift by the same delta; without it, a move
    /// that would reorder points is rejected. The anchor is immovable.
    pub fn move_to(&self, current: SamplePos, destination: SamplePos, push: bool) -> bool {
        let start_sample;
        {
            let mut inner = self.inner.write();
            let sr = inner.sample_rate;
            let sc_cur = samples_to_superclock(current, sr);
            let sc_dst = samples_to_superclock(destination, sr);
            let idx = match inner.find_exact_sclock(sc_cur) {
                Some(idx) => idx,
                None => return false,
            };
            if idx == 0 {
                log::warn!("rejected move of the anchor point");
                return false;
            }
            if sc_dst <= inner.points[idx - 1].sclock() {
                // cannot pass (or land on) the preceding point
                return false;
            }
            if push {
                let delta = sc_dst - sc_cur;
                for p in &mut inner.points[idx..] {
                    let sc = p.sclock();
                    p.set_sclock(sc + delta);
                }
            } else {
                if idx + 1 < inner.points.len() && sc_dst >= inner.points[idx + 1].sclock() {
                    return false;
                }
                inner.points[idx].set_sclock(sc_dst);
            }
            inner.rebuild(Superclock::MAX);
            start_sample = superclock_to_samples(sc_cur.min(sc_dst), sr);
        }
        self.notify(start_sample, SamplePos::MAX);
        true
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn tempo_at(&self, at: SamplePos) -> TemporalResult<Tempo> {
        let inner = self.inner.read();
        let sc = samples_to_superclock(at, inner.sample_rate);
        let idx = inner.index_at_sclock(sc)?;
        Ok(*inner.points[idx].tempo_in(&inner.points))
    }

    pub fn tempo_at_beats(&self, at: Beats) -> TemporalResult<Tempo> {
        let inner = self.inner.read();
        let idx = inner.index_at_quarters(at)?;
        Ok(*inner.points[idx].tempo_in(&inner.points))
    }

    pub fn tempo_at_bbt(&self, at: BbtTime) -> TemporalResult<Tempo> {
        let inner = self.inner.read();
        let idx = inner.index_at_bbt(at)?;
        Ok(*inner.points[idx].tempo_in(&inner.points))
    }

    pub fn meter_at(&self, at: SamplePos) -> TemporalResult<Meter> {
        let inner = self.inner.read();
        let sc = samples_to_superclock(at, inner.sample_rate);
        let idx = inner.index_at_sclock(sc)?;
        Ok(*inner.points[idx].meter_in(&inner.points))
    }

    pub fn meter_at_beats(&self, at: Beats) -> TemporalResult<Meter> {
        let inner = self.inner.read();
        let idx = inner.index_at_quarters(at)?;
        Ok(*inner.points[idx].meter_in(&inner.points))
    }

    pub fn meter_at_bbt(&self, at: BbtTime) -> TemporalResult<Meter> {
        let inner = self.inner.read();
        let idx = inner.index_at_bbt(at)?;
        Ok(*inner.points[idx].meter_in(&inner.points))
    }

    /// Quarter-note position of a sample position.
    pub fn quarter_note_at(&self, at: SamplePos) -> TemporalResult<Beats> {
        let inner = self.inner.read();
        let sc = samples_to_superclock(at, inner.sample_rate);
        inner.quarters_at_superclock(sc)
    }

    pub fn quarter_note_at_bbt(&self, at: BbtTime) -> TemporalResult<Beats> {
        self.inner.read().quarters_at_bbt(at)
    }

    /// Sample position of a quarter-note position.
    pub fn sample_at(&self, at: Beats) -> TemporalResult<SamplePos> {
        let inner = self.inner.read();
        let sc = inner.superclock_at_quarters(at)?;
        Ok(superclock_to_samples(sc, inner.sample_rate))
    }

    pub fn sample_at_bbt(&self, at: BbtTime) -> TemporalResult<SamplePos> {
        let inner = self.inner.read();
        let sc = inner.superclock_at_bbt(at)?;
        Ok(superclock_to_samples(sc, inner.sample_rate))
    }

    /// BBT position of a sample position.
    pub fn bbt_at(&self, at: SamplePos) -> TemporalResult<BbtTime> {
        let inner = self.inner.read();
        let sc = samples_to_superclock(at, inner.sample_rate);
        inner.bbt_at_superclock(sc)
    }

    pub fn bbt_at_beats(&self, at: Beats) -> TemporalResult<BbtTime> {
        self.inner.read().bbt_at_quarters(at)
    }

    /// Snap a BBT position to the nearest bar line under the meter in
    /// effect there.
    pub fn round_to_bar(&self, bbt: BbtTime) -> TemporalResult<BbtTime> {
        let inner = self.inner.read();
        let idx = inner.index_at_bbt(bbt)?;
        Ok(inner.points[idx].meter_in(&inner.points).round_to_bar(bbt))
    }

    pub fn n_tempos(&self) -> usize {
        self.inner.read().points.iter().filter(|p| p.is_explicit_tempo()).count()
    }

    pub fn n_meters(&self) -> usize {
        self.inner.read().points.iter().filter(|p| p.is_explicit_meter()).count()
    }

    /// The tempo of the explicit tempo point after the one holding
    /// `tempo`.
    pub fn next_tempo(&self, tempo: &Tempo) -> Option<Tempo> {
        let inner = self.inner.read();
        let mut seen = false;
        for p in inner.points.iter().filter(|p| p.is_explicit_tempo()) {
            let t = p.metric().expect("map points are explicit").tempo();
            if seen {
                return Some(*t);
            }
            if t == tempo {
                seen = true;
            }
        }
        None
    }

    pub fn next_meter(&self, meter: &Meter) -> Option<Meter> {
        let inner = self.inner.read();
        let mut seen = false;
        for p in inner.points.iter().filter(|p| p.is_explicit_meter()) {
            let m = p.metric().expect("map points are explicit").meter();
            if seen {
                return Some(*m);
            }
            if m == meter {
                seen = true;
            }
        }
        None
    }

    /// The explicit tempo point preceding the one that governs `at`.
    /// `at` is resolved with the same nearest-at-or-before semantics as
    /// the other queries; `None` when the governing tempo is the
    /// anchor's.
    pub fn previous_tempo(&self, at: SamplePos) -> Option<TempoMapPoint> {
        let inner = self.inner.read();
        let sc = samples_to_superclock(at, inner.sample_rate);
        let idx = inner.index_at_sclock(sc).ok()?;
        let governing = inner.points[..=idx].iter().rposition(|p| p.is_explicit_tempo())?;
        inner.points[..governing]
            .iter()
            .rev()
            .find(|p| p.is_explicit_tempo())
            .cloned()
    }

    /// All explicit points.
    pub fn get_points(&self) -> Vec<TempoMapPoint> {
        self.inner.read().points.iter().filter(|p| p.is_explicit()).cloned().collect()
    }

    pub fn get_tempos(&self) -> Vec<TempoMapPoint> {
        self.inner.read().points.iter().filter(|p| p.is_explicit_tempo()).cloned().collect()
    }

    pub fn get_meters(&self) -> Vec<TempoMapPoint> {
        self.inner.read().points.iter().filter(|p| p.is_explicit_meter()).cloned().collect()
    }

    /// Run `f` over the point list under the read lock. `f` must not
    /// call back into any mutator.
    pub fn with_points<R>(&self, f: impl FnOnce(&[TempoMapPoint]) -> R) -> R {
        let inner = self.inner.read();
        f(&inner.points)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Walking and distances
    // ─────────────────────────────────────────────────────────────────────────────

    /// Quarter-note span of the sample range `[start, start + distance)`.
    pub fn sample_delta_as_quarters(
        &self,
        start: SamplePos,
        distance: SampleCnt,
    ) -> TemporalResult<Beats> {
        let inner = self.inner.read();
        let a = inner.quarters_at_superclock(samples_to_superclock(start, inner.sample_rate))?;
        let b = inner
            .quarters_at_superclock(samples_to_superclock(start + distance, inner.sample_rate))?;
        Ok(b - a)
    }

    /// Quarter-note position reached by walking `distance` samples from
    /// `pos`.
    pub fn samplewalk_to_quarters(
        &self,
        pos: SamplePos,
        distance: SampleCnt,
    ) -> TemporalResult<Beats> {
        let inner = self.inner.read();
        inner.quarters_at_superclock(samples_to_superclock(pos + distance, inner.sample_rate))
    }

    /// Quarter-note position reached by walking `distance` samples from
    /// a quarter-note position.
    pub fn samplewalk_to_quarters_at_beats(
        &self,
        pos: Beats,
        distance: SampleCnt,
    ) -> TemporalResult<Beats> {
        let inner = self.inner.read();
        let sc = inner.superclock_at_quarters(pos)?;
        inner.quarters_at_superclock(sc + samples_to_superclock(distance, inner.sample_rate))
    }

    /// Sample position reached by walking `distance` quarters from a
    /// sample position.
    pub fn sample_plus_quarters_as_samples(
        &self,
        start: SamplePos,
        distance: Beats,
    ) -> TemporalResult<SamplePos> {
        let inner = self.inner.read();
        let q = inner.quarters_at_superclock(samples_to_superclock(start, inner.sample_rate))?;
        let sc = inner.superclock_at_quarters(q + distance)?;
        Ok(superclock_to_samples(sc, inner.sample_rate))
    }

    /// Audio duration of `distance` quarters starting at `start`.
    pub fn sample_quarters_delta_as_samples(
        &self,
        start: SamplePos,
        distance: Beats,
    ) -> TemporalResult<SampleCnt> {
        Ok(self.sample_plus_quarters_as_samples(start, distance)? - start)
    }

    /// Sample position reached by walking a BBT distance from a sample
    /// position.
    pub fn samplepos_plus_bbt(&self, pos: SamplePos, op: BbtOffset) -> TemporalResult<SamplePos> {
        let inner = self.inner.read();
        let sc = samples_to_superclock(pos, inner.sample_rate);
        let bbt = inner.bbt_at_superclock(sc)?;
        let idx = inner.index_at_bbt(bbt)?;
        let walked = inner.points[idx].meter_in(&inner.points).bbt_add(bbt, op);
        let sc = inner.superclock_at_bbt(walked)?;
        Ok(superclock_to_samples(sc, inner.sample_rate))
    }

    /// Walk a BBT distance from a BBT position, under the meter in
    /// effect there.
    pub fn bbt_walk(&self, bbt: BbtTime, op: BbtOffset) -> TemporalResult<BbtTime> {
        let inner = self.inner.read();
        let idx = inner.index_at_bbt(bbt)?;
        Ok(inner.points[idx].meter_in(&inner.points).bbt_add(bbt, op))
    }

    /// Quarter-note span of a BBT distance starting at a quarter-note
    /// position.
    pub fn bbtwalk_to_quarters(&self, start: Beats, distance: BbtOffset) -> TemporalResult<Beats> {
        let inner = self.inner.read();
        let bbt = inner.bbt_at_quarters(start)?;
        let idx = inner.index_at_bbt(bbt)?;
        let walked = inner.points[idx].meter_in(&inner.points).bbt_add(bbt, distance);
        Ok(inner.quarters_at_bbt(walked)? - start)
    }

    /// Audio duration of a BBT distance starting at `pos` (`dir < 0`
    /// walks backward).
    pub fn bbt_duration_at(
        &self,
        pos: SamplePos,
        op: BbtOffset,
        dir: i32,
    ) -> TemporalResult<SampleCnt> {
        let op = if dir < 0 { -op } else { op };
        let end = self.samplepos_plus_bbt(pos, op)?;
        Ok((end - pos).abs())
    }

    /// Instantaneous samples-per-quarter-note at `pos`, ramp-aware.
    pub fn samples_per_quarter_note_at(&self, pos: SamplePos) -> TemporalResult<SampleCnt> {
        let inner = self.inner.read();
        let sc = samples_to_superclock(pos, inner.sample_rate);
        let idx = inner.index_at_sclock(sc)?;
        let p = &inner.points[idx];
        let metric = p.metric_in(&inner.points);
        let scpnt = metric.superclock_per_note_type_at_superclock(sc - p.sclock());
        let scpq = (scpnt * metric.tempo().note_type() as Superclock) / 4;
        Ok(superclock_to_samples(scpq, inner.sample_rate))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Generation-guarded batch conversions (audio thread)
    // ─────────────────────────────────────────────────────────────────────────────

    /// Fill `beats` and `bbt` for `sample`, unless the caller's cached
    /// generation is still current. Returns the generation the outputs
    /// correspond to.
    pub fn update_music_times(
        &self,
        gen: i64,
        sample: SamplePos,
        beats: &mut Beats,
        bbt: &mut BbtTime,
        force: bool,
    ) -> TemporalResult<i64> {
        let inner = self.inner.read();
        if !force && gen == inner.generation {
            return Ok(gen);
        }
        let sc = samples_to_superclock(sample, inner.sample_rate);
        *beats = inner.quarters_at_superclock(sc)?;
        *bbt = inner.bbt_at_superclock(sc)?;
        Ok(inner.generation)
    }

    /// Fill `sample` and `beats` for `bbt`, generation-guarded.
    pub fn update_samples_and_beat_times(
        &self,
        gen: i64,
        bbt: BbtTime,
        sample: &mut SamplePos,
        beats: &mut Beats,
        force: bool,
    ) -> TemporalResult<i64> {
        let inner = self.inner.read();
        if !force && gen == inner.generation {
            return Ok(gen);
        }
        *beats = inner.quarters_at_bbt(bbt)?;
        *sample = superclock_to_samples(inner.superclock_at_bbt(bbt)?, inner.sample_rate);
        Ok(inner.generation)
    }

    /// Fill `sample` and `bbt` for `beats`, generation-guarded.
    pub fn update_samples_and_bbt_times(
        &self,
        gen: i64,
        beats: Beats,
        sample: &mut SamplePos,
        bbt: &mut BbtTime,
        force: bool,
    ) -> TemporalResult<i64> {
        let inner = self.inner.read();
        if !force && gen == inner.generation {
            return Ok(gen);
        }
        *sample = superclock_to_samples(inner.superclock_at_quarters(beats)?, inner.sample_rate);
        *bbt = inner.bbt_at_quarters(beats)?;
        Ok(inner.generation)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Grids
    // ─────────────────────────────────────────────────────────────────────────────

    /// Emit a point every `resolution` quarters within `[start, end]`.
    ///
    /// With `resolution == 0` the grid falls on whole beats and the
    /// emitted points may be implicit views into this map, valid only
    /// until the next mutation. With a non-zero resolution every emitted
    /// point is standalone and owns a metric copy.
    pub fn get_grid(
        &self,
        out: &mut Vec<TempoMapPoint>,
        start: SamplePos,
        end: SamplePos,
        resolution: Beats,
    ) -> TemporalResult<()> {
        let inner = self.inner.read();
        if inner.points.is_empty() {
            return Err(TemporalError::EmptyMap);
        }
        let implicit_ok = resolution == Beats::ZERO;
        let step = if implicit_ok { Beats::new(1, 0) } else { resolution };
        let step_ticks = step.to_ticks().max(1);

        let sc_start = samples_to_superclock(start, inner.sample_rate);
        let sc_end = samples_to_superclock(end, inner.sample_rate);
        let q_start = inner.quarters_at_superclock(sc_start)?;

        // first grid line at or after the start
        let mut q = Beats::from_ticks(
            q_start.to_ticks().div_euclid(step_ticks) * step_ticks,
        );
        if q < q_start {
            q = Beats::from_ticks(q.to_ticks() + step_ticks);
        }

        loop {
            let idx = inner.index_at_quarters(q)?;
            let p = &inner.points[idx];
            let sc = p.sclock() + p.walk_to_superclock(&inner.points, q - p.quarters());
            if sc > sc_end {
                break;
            }
            if sc >= sc_start {
                let bbt = p.bbt_at(&inner.points, q);
                if implicit_ok {
                    if p.sclock() == sc {
                        out.push(p.clone());
                    } else {
                        out.push(TempoMapPoint::implicit(idx, sc, q, bbt));
                    }
                } else {
                    out.push(TempoMapPoint::explicit(
                        PointFlags::EXPLICIT_POSITION,
                        *p.metric_in(&inner.points),
                        sc,
                        q,
                        bbt,
                    ));
                }
            }
            q = Beats::from_ticks(q.to_ticks() + step_ticks);
        }
        Ok(())
    }

    /// Emit one point per `bar_gap` bars within `[start, end]`. A meter
    /// change inside the range emits an extra point and restarts the bar
    /// cadence there. Every emitted point is standalone.
    pub fn get_bar_grid(
        &self,
        out: &mut Vec<TempoMapPoint>,
        start: SamplePos,
        end: SamplePos,
        bar_gap: i32,
    ) -> TemporalResult<()> {
        let inner = self.inner.read();
        if inner.points.is_empty() {
            return Err(TemporalError::EmptyMap);
        }
        let gap = bar_gap.max(1);
        let sc_start = samples_to_superclock(start, inner.sample_rate);
        let sc_end = samples_to_superclock(end, inner.sample_rate);

        let start_bbt = inner.bbt_at_superclock(sc_start)?;
        let mut bar = if start_bbt.is_bar_start() {
            start_bbt.bars
        } else {
            start_bbt.bars + 1
        };

        loop {
            let bbt = BbtTime::new(bar, 1, 0);
            let sc = inner.superclock_at_bbt(bbt)?;
            if sc > sc_end {
                break;
            }
            let idx = inner.index_at_bbt(bbt)?;
            let q = inner.quarters_at_bbt(bbt)?;
            out.push(TempoMapPoint::explicit(
                PointFlags::EXPLICIT_POSITION,
                *inner.points[idx].metric_in(&inner.points),
                sc,
                q,
                bbt,
            ));

            // a meter change before the next stepped bar restarts the
            // cadence at its own bar
            let next_bar = bar + gap;
            let restart = inner
                .points
                .iter()
                .filter(|p| p.is_explicit_meter())
                .map(|p| p.bbt().bars)
                .find(|&b| b > bar && b < next_bar);
            bar = restart.unwrap_or(next_bar);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Rebuild entry points
    // ─────────────────────────────────────────────────────────────────────────────

    /// Rebuild derived data up to `limit` superclocks.
    pub fn rebuild(&self, limit: Superclock) {
        let mut inner = self.inner.write();
        inner.rebuild(limit);
    }

    pub fn full_rebuild(&self) {
        self.rebuild(Superclock::MAX);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // State
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn get_state(&self) -> TempoMapState {
        let inner = self.inner.read();
        TempoMapState {
            points: inner
                .points
                .iter()
                .filter(|p| p.is_explicit())
                .map(|p| {
                    let metric = p.metric().expect("map points are explicit");
                    TempoMapPointState {
                        flags: p.flags().bits(),
                        sclock: p.sclock(),
                        quarters: p.quarters(),
                        bbt: p.bbt(),
                        tempo: Some(*metric.tempo()),
                        meter: Some(*metric.meter()),
                    }
                })
                .collect(),
        }
    }

    /// Replace the map contents from a state snapshot. On failure the
    /// map is left exactly as it was.
    pub fn set_state(&self, state: &TempoMapState) -> TemporalResult<()> {
        let points = Self::points_from_state(state)?;
        let start_sample;
        {
            let mut inner = self.inner.write();
            inner.points = points;
            inner.rebuild(Superclock::MAX);
            start_sample = 0;
        }
        log::debug!("tempo map state loaded: {} points", state.points.len());
        self.notify(start_sample, SamplePos::MAX);
        Ok(())
    }

    fn points_from_state(state: &TempoMapState) -> TemporalResult<Vec<TempoMapPoint>> {
        let mut points = Vec::with_capacity(state.points.len());
        let mut prev_sclock: Option<Superclock> = None;

        for (i, ps) in state.points.iter().enumerate() {
            let flags = PointFlags::from_bits(ps.flags)
                .ok_or_else(|| TemporalError::State(format!("invalid point flags {:#x}", ps.flags)))?;
            if flags.is_empty() {
                return Err(TemporalError::State(format!(
                    "point {} has no explicit flags",
                    i
                )));
            }
            let tempo = ps
                .tempo
                .ok_or_else(|| TemporalError::State(format!("point {} is missing a tempo", i)))?;
            let meter = ps
                .meter
                .ok_or_else(|| TemporalError::State(format!("point {} is missing a meter", i)))?;
            if i == 0 {
                if ps.sclock != 0 {
                    return Err(TemporalError::State(
                        "first point must sit at superclock zero".to_string(),
                    ));
                }
                if !flags.contains(PointFlags::EXPLICIT_TEMPO | PointFlags::EXPLICIT_METER) {
                    return Err(TemporalError::State(
                        "first point must carry both a tempo and a meter".to_string(),
                    ));
                }
            }
            if let Some(prev) = prev_sclock {
                if ps.sclock <= prev {
                    return Err(TemporalError::State(format!(
                        "point {} is out of order (superclock {} after {})",
                        i, ps.sclock, prev
                    )));
                }
            }
            prev_sclock = Some(ps.sclock);
            points.push(TempoMapPoint::explicit(
                flags,
                TempoMetric::new(tempo, meter),
                ps.sclock,
                ps.quarters,
                ps.bbt,
            ));
        }
        Ok(points)
    }

    /// Write a human-readable listing of the map.
    pub fn dump<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        let inner = self.inner.read();
        writeln!(
            w,
            "TempoMap @ {} Hz, generation {}, {} points",
            inner.sample_rate,
            inner.generation,
            inner.points.len()
        )?;
        for p in &inner.points {
            writeln!(w, "  {}", p)?;
        }
        Ok(())
    }
}
