//! Read-only reporting endpoints.
//!
//! Every report accepts `measure_timings=true` and then appends a
//! `timings` object with per-step and total seconds.

pub mod profits;
pub mod representatives;
pub mod sales;
pub mod snapshots;
pub mod timings;

pub use timings::{Stopwatch, Timed, TimingParams};
