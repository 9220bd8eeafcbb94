//! TempoMap Integration Tests
//!
//! Cross-module scenarios for the temporal core:
//! - conversion scenarios across tempo and meter changes
//! - ramped-tempo interpolation behavior
//! - global invariants (sort order, anchor, coordinate coherence)
//! - round trips between the three coordinate systems
//! - state persistence and reload
//! - concurrent readers against a mutating writer

use bl_temporal::{
    BbtOffset, BbtTime, Beats, Meter, PointFlags, SamplePos, Tempo, TempoMap,
    SUPERCLOCK_TICKS_PER_SECOND,
};
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

const SR: u32 = 48000;

fn default_map() -> TempoMap {
    TempoMap::new(Tempo::new(120.0, 4), Meter::new(4, 4), SR)
}

/// A map with three tempos and two meters, mixing constant and ramped
/// segments.
fn busy_map() -> TempoMap {
    let map = default_map();
    map.set_tempo(Tempo::new_ramped(90.0, 150.0, 4), 96000).unwrap();
    map.set_tempo(Tempo::new(150.0, 4), 480000).unwrap();
    map.set_meter_at_bbt(Meter::new(3, 4), BbtTime::new(3, 1, 0)).unwrap();
    map.set_meter_at_bbt(Meter::new(7, 8), BbtTime::new(9, 1, 0)).unwrap();
    map
}

fn assert_npm(tempo: &Tempo, npm: f64) {
    assert!(
        (tempo.note_types_per_minute() - npm).abs() < 1e-6,
        "expected {} npm, got {}",
        npm,
        tempo.note_types_per_minute()
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVERSION SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_four_beats_at_120_bpm_is_two_seconds() {
    let map = default_map();
    assert_eq!(map.sample_at(Beats::new(4, 0)).unwrap(), 2 * SR as SamplePos);
    assert_eq!(map.quarter_note_at(2 * SR as SamplePos).unwrap(), Beats::new(4, 0));
}

#[test]
fn test_tempo_change_at_bar_two() {
    let map = default_map();
    map.set_tempo_at_bbt(Tempo::new(60.0, 4), BbtTime::new(2, 1, 0)).unwrap();

    assert_npm(&map.tempo_at_bbt(BbtTime::new(3, 1, 0)).unwrap(), 60.0);

    // bar 3 is four quarters past bar 2, each a full second at 60 bpm
    let bar2 = map.sample_at_bbt(BbtTime::new(2, 1, 0)).unwrap();
    let bar3 = map.sample_at_bbt(BbtTime::new(3, 1, 0)).unwrap();
    assert_eq!(bar2, 96000);
    assert_eq!(bar3, bar2 + 4 * SR as SamplePos);
}

#[test]
fn test_meter_change_at_bar_five() {
    let map = default_map();
    map.set_meter_at_bbt(Meter::new(3, 4), BbtTime::new(5, 1, 0)).unwrap();

    let bar7 = BbtTime::new(7, 1, 0);
    let sample = map.sample_at_bbt(bar7).unwrap();
    assert_eq!(map.bbt_at(sample).unwrap(), bar7);

    // one beat past {5,3,0} wraps into bar 6 under the new 3/4 meter
    assert_eq!(
        map.bbt_walk(BbtTime::new(5, 3, 0), BbtOffset::new(0, 1, 0)).unwrap(),
        BbtTime::new(6, 1, 0)
    );
}

#[test]
fn test_quarter_notes_unaffected_by_meter_changes() {
    // meter changes re-group beats into bars but never move them in time
    let map = default_map();
    let before = map.sample_at(Beats::new(10, 0)).unwrap();
    map.set_meter_at_bbt(Meter::new(3, 4), BbtTime::new(2, 1, 0)).unwrap();
    assert_eq!(map.sample_at(Beats::new(10, 0)).unwrap(), before);
}

// ═══════════════════════════════════════════════════════════════════════════════
// RAMPED TEMPO
// ═══════════════════════════════════════════════════════════════════════════════

/// Sample position where an 8-quarter ramp from `npm` to `end_npm` ends.
fn ramp_end_sample(npm: f64, end_npm: f64) -> SamplePos {
    let scpq0 = SUPERCLOCK_TICKS_PER_SECOND as f64 * 60.0 / npm;
    let c = (npm / end_npm).ln() / 8.0;
    let total_sc = (scpq0 / c) * ((c * 8.0).exp() - 1.0);
    (total_sc * SR as f64 / SUPERCLOCK_TICKS_PER_SECOND as f64).round() as SamplePos
}

#[test]
fn test_ramp_is_monotonic_in_time() {
    let map = TempoMap::new(Tempo::new_ramped(60.0, 120.0, 4), Meter::new(4, 4), SR);
    let end = ramp_end_sample(60.0, 120.0);
    map.set_tempo(Tempo::new(120.0, 4), end).unwrap();

    let mut prev = map.quarter_note_at(0).unwrap();
    for sample in (0..=end).step_by(4800) {
        let q = map.quarter_note_at(sample).unwrap();
        assert!(q >= prev, "not monotonic at sample {}: {} < {}", sample, q, prev);
        prev = q;
    }
}

#[test]
fn test_ramp_midpoint_position() {
    // Decelerating from 120 to 60 bpm over 8 quarters: at the time
    // midpoint, more than half the beats have passed, but not five.
    let map = TempoMap::new(Tempo::new_ramped(120.0, 60.0, 4), Meter::new(4, 4), SR);
    let end = ramp_end_sample(120.0, 60.0);
    map.set_tempo(Tempo::new(60.0, 4), end).unwrap();

    let mid = map.quarter_note_at(end / 2).unwrap();
    assert!(
        mid > Beats::new(4, 0) && mid < Beats::new(5, 0),
        "midpoint at {} quarters",
        mid
    );
}

#[test]
fn test_ramp_segment_end_lands_on_eight_quarters() {
    let map = TempoMap::new(Tempo::new_ramped(60.0, 120.0, 4), Meter::new(4, 4), SR);
    let end = ramp_end_sample(60.0, 120.0);
    map.set_tempo(Tempo::new(120.0, 4), end).unwrap();

    let q = map.quarter_note_at(end).unwrap();
    assert!(
        (q - Beats::new(8, 0)).to_ticks().abs() <= 1,
        "ramp end at {} quarters",
        q
    );
}

#[test]
fn test_ramp_round_trip_within_a_tick() {
    let map = TempoMap::new(Tempo::new_ramped(60.0, 120.0, 4), Meter::new(4, 4), SR);
    let end = ramp_end_sample(60.0, 120.0);
    map.set_tempo(Tempo::new(120.0, 4), end).unwrap();

    for b in [Beats::new(1, 0), Beats::new(3, 960), Beats::new(6, 480), Beats::new(12, 0)] {
        let s = map.sample_at(b).unwrap();
        let back = map.quarter_note_at(s).unwrap();
        assert!(
            (back - b).to_ticks().abs() <= 1,
            "round trip of {} drifted to {}",
            b,
            back
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GLOBAL INVARIANTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_sort_order_in_all_three_coordinate_systems() {
    let map = busy_map();
    map.with_points(|points| {
        for pair in points.windows(2) {
            assert!(pair[0].sclock() < pair[1].sclock());
            assert!(pair[0].quarters() < pair[1].quarters());
            assert!(pair[0].bbt() < pair[1].bbt());
        }
    });
}

#[test]
fn test_anchor_invariant() {
    let map = busy_map();
    map.with_points(|points| {
        assert_eq!(points[0].sclock(), 0);
        assert!(points[0].is_explicit());
        assert_eq!(points[0].quarters(), Beats::ZERO);
        assert_eq!(points[0].bbt(), BbtTime::ONE);
    });
}

#[test]
fn test_coordinate_coherence_after_rebuild() {
    let map = busy_map();
    map.with_points(|points| {
        for i in 1..points.len() {
            let a = &points[i - 1];
            let p = &points[i];
            let dq = a.walk_to_quarters(points, p.sclock() - a.sclock());
            assert_eq!(
                a.quarters() + dq,
                p.quarters(),
                "quarters of point {} disagree with a walk from its predecessor",
                i
            );
            let meter = a.meter_in(points);
            assert_eq!(
                meter.bbt_add(a.bbt(), meter.to_bbt_offset(dq)),
                p.bbt(),
                "bbt of point {} disagrees with a walk from its predecessor",
                i
            );
        }
    });
}

#[test]
fn test_implicit_grid_points_reference_earlier_explicit_points() {
    let map = busy_map();
    let mut grid = Vec::new();
    map.get_grid(&mut grid, 0, 10 * SR as SamplePos, Beats::ZERO).unwrap();
    assert!(!grid.is_empty());

    map.with_points(|points| {
        for p in grid.iter().filter(|p| p.is_implicit()) {
            let reference = p.reference().expect("implicit points carry a reference");
            assert!(points[reference].is_explicit());
            assert!(points[reference].sclock() < p.sclock());
        }
    });
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUND TRIPS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_beats_to_samples_round_trip_on_constant_segments() {
    let map = default_map();
    map.set_tempo(Tempo::new(97.0, 4), 200_000).unwrap();
    map.set_meter(Meter::new(5, 8), 400_000).unwrap();

    for ticks in [0i64, 1920, 2880, 7680, 19_200, 96_000, 192_001] {
        let b = Beats::from_ticks(ticks);
        let s = map.sample_at(b).unwrap();
        assert_eq!(
            map.quarter_note_at(s).unwrap(),
            b,
            "round trip failed for {} ticks",
            ticks
        );
    }
}

#[test]
fn test_bbt_to_samples_round_trip_on_constant_segments() {
    let map = default_map();
    map.set_meter_at_bbt(Meter::new(3, 4), BbtTime::new(4, 1, 0)).unwrap();
    map.set_tempo(Tempo::new(73.0, 4), 500_000).unwrap();

    for bbt in [
        BbtTime::new(1, 1, 0),
        BbtTime::new(2, 3, 480),
        BbtTime::new(4, 1, 0),
        BbtTime::new(5, 2, 960),
        BbtTime::new(12, 3, 0),
    ] {
        let s = map.sample_at_bbt(bbt).unwrap();
        assert_eq!(map.bbt_at(s).unwrap(), bbt, "round trip failed for {}", bbt);
    }
}

#[test]
fn test_walkers_agree_with_primary_queries() {
    let map = busy_map();

    let q = map.sample_delta_as_quarters(48000, 96000).unwrap();
    let expected =
        map.quarter_note_at(144000).unwrap() - map.quarter_note_at(48000).unwrap();
    assert_eq!(q, expected);

    let s = map.sample_plus_quarters_as_samples(48000, Beats::new(3, 0)).unwrap();
    let q0 = map.quarter_note_at(48000).unwrap();
    assert_eq!(s, map.sample_at(q0 + Beats::new(3, 0)).unwrap());

    let d = map.sample_quarters_delta_as_samples(48000, Beats::new(3, 0)).unwrap();
    assert_eq!(d, s - 48000);

    let walked = map.samplepos_plus_bbt(0, BbtOffset::new(1, 0, 0)).unwrap();
    assert_eq!(walked, map.sample_at_bbt(BbtTime::new(2, 1, 0)).unwrap());
}

// ═══════════════════════════════════════════════════════════════════════════════
// PERSISTENCE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_three_tempos_two_meters_survive_reload() {
    let map = busy_map();
    assert_eq!(map.n_tempos(), 3);
    assert_eq!(map.n_meters(), 3); // anchor meter + two changes

    let state = map.get_state();
    let json = serde_json::to_string_pretty(&state).unwrap();
    let reloaded = TempoMap::empty(SR);
    reloaded.set_state(&serde_json::from_str(&json).unwrap()).unwrap();

    let a = map.get_points();
    let b = reloaded.get_points();
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.flags(), y.flags());
        assert_eq!(x.sclock(), y.sclock());
        assert_eq!(x.quarters(), y.quarters());
        assert_eq!(x.bbt(), y.bbt());
        assert_eq!(x.metric().unwrap().tempo(), y.metric().unwrap().tempo());
        assert_eq!(x.metric().unwrap().meter(), y.metric().unwrap().meter());
    }
}

#[test]
fn test_sample_rate_is_not_persisted() {
    let map = busy_map();
    let state = map.get_state();

    let reloaded = TempoMap::empty(96000);
    reloaded.set_state(&state).unwrap();
    assert_eq!(reloaded.sample_rate(), 96000);

    // superclock positions are rate-independent; sample positions scale
    // (to within one sample of rounding)
    let bar3 = BbtTime::new(3, 1, 0);
    let scaled = map.sample_at_bbt(bar3).unwrap() * 2;
    assert!((reloaded.sample_at_bbt(bar3).unwrap() - scaled).abs() <= 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONCURRENCY
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_concurrent_readers_never_observe_torn_state() {
    const READERS: usize = 4;
    const ITERATIONS: usize = 2000;

    let map = Arc::new(default_map());

    std::thread::scope(|scope| {
        for _ in 0..READERS {
            let map = Arc::clone(&map);
            scope.spawn(move || {
                for i in 0..ITERATIONS {
                    let pos = (i as SamplePos % 8) * 24000;
                    let tempo = map.tempo_at(pos).expect("map is never empty");
                    let npm = tempo.note_types_per_minute();
                    assert!(
                        [120.0, 100.0, 140.0].iter().any(|t| (npm - t).abs() < 1e-6),
                        "observed tempo {} matches no consistent state",
                        npm
                    );
                    // derived coordinates stay self-consistent per read
                    let q = map.quarter_note_at(pos).expect("map is never empty");
                    assert!(q >= Beats::ZERO);
                }
            });
        }

        let writer_map = Arc::clone(&map);
        scope.spawn(move || {
            for i in 0..ITERATIONS / 4 {
                let npm = if i % 2 == 0 { 100.0 } else { 140.0 };
                writer_map.set_tempo(Tempo::new(npm, 4), 48000).unwrap();
            }
        });
    });

    // the final state reflects the writer's last mutation
    let final_tempo = map.tempo_at(96000).unwrap();
    let npm = final_tempo.note_types_per_minute();
    assert!((npm - 100.0).abs() < 1e-6 || (npm - 140.0).abs() < 1e-6);
}

#[test]
fn test_generation_advances_monotonically_under_writes() {
    let map = Arc::new(default_map());
    let mut last = map.generation();
    for i in 1..50 {
        map.set_tempo(Tempo::new(100.0 + i as f64, 4), 48000).unwrap();
        let gen = map.generation();
        assert!(gen > last);
        last = gen;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GRID POINTS ACROSS CHANGES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_standalone_grid_survives_mutation() {
    let map = default_map();
    let mut grid = Vec::new();
    map.get_grid(&mut grid, 0, 4 * SR as SamplePos, Beats::new(1, 0)).unwrap();
    let before: Vec<_> = grid.iter().map(|p| (p.sclock(), p.quarters())).collect();

    // standalone points own their metric; mutating the map cannot
    // invalidate them
    map.set_tempo(Tempo::new(90.0, 4), 48000).unwrap();
    for (p, (sc, q)) in grid.iter().zip(&before) {
        assert!(p.flags().contains(PointFlags::EXPLICIT_POSITION));
        assert_eq!(p.sclock(), *sc);
        assert_eq!(p.quarters(), *q);
        assert!(p.metric().is_some());
    }
}

#[test]
fn test_grid_crossing_a_tempo_change_bends_with_it() {
    let map = default_map();
    map.set_tempo(Tempo::new(60.0, 4), 96000).unwrap();

    let mut grid = Vec::new();
    map.get_grid(&mut grid, 0, 288000, Beats::new(1, 0)).unwrap();

    // beats 0..4 are half a second apart, beats 4..8 a full second
    let samples: Vec<_> = grid
        .iter()
        .map(|p| map.sample_at(p.quarters()).unwrap())
        .collect();
    assert_eq!(samples[1] - samples[0], 24000);
    assert_eq!(samples[5] - samples[4], 48000);
}
