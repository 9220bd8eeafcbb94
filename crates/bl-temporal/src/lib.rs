//! bl-temporal: musical time for Barline
//!
//! The temporal core of the DAW: conversion between audio time
//! (samples / superclocks), linear musical time (quarter notes) and
//! structured musical time (bars/beats/ticks), driven by a mutable,
//! query-optimized tempo map:
//! - exact fixed-point time types (`Beats`, `BbtTime`, superclocks)
//! - tempo and meter value types, including ramped tempos
//! - the `TempoMap` itself: sorted control points, rebuild engine,
//!   three-coordinate queries, grid generators
//! - one reader/writer lock; concurrent readers, serialized writers
//! - a generation counter so the audio thread can skip redundant
//!   conversions

mod bbt;
mod beats;
mod error;
mod map;
mod point;
mod superclock;
mod tempo;

pub use bbt::*;
pub use beats::*;
pub use error::*;
pub use map::*;
pub use point::*;
pub use superclock::*;
pub use tempo::*;
