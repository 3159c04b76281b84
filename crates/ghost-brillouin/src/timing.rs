//! Acquisition timing model.
//!
//! All durations derive from the scan clock frequency. The constants below
//! are empirically chosen safety margins for the GHOST/TFP combination;
//! they are named values so they can be tuned without touching the protocol
//! logic.

use std::time::Duration;

use ghost_core::{GhostError, Result};

use crate::config::ClockConfig;

/// Clock counts consumed by one scan+retract cycle of the TFP mechanism.
pub const CLOCK_COUNTS_PER_CYCLE: f64 = 2460.0;

/// Fraction of the theoretical acquisition time to wait before the first
/// STATUS poll. Polling earlier than this only produces spurious traffic
/// while the device cannot plausibly be done.
pub const MIN_WAIT_RATIO: f64 = 0.6;

/// Cycles worth of margin added to the theoretical time to form the timeout
/// ceiling.
pub const TIMEOUT_MARGIN_CYCLES: u32 = 10;

/// Extra per-cycle retract overhead. The GHOST counts retract clocks inside
/// the 2460-count cycle, so this defaults to zero; kept as a named value
/// for mechanisms with a separate retract pass.
pub const RETRACT_OVERHEAD: Duration = Duration::ZERO;

/// Delay between consecutive STATUS polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Consecutive IDLE replies required before completion is trusted. A single
/// IDLE can be a stale snapshot racing a device-internal transition.
pub const REQUIRED_IDLE_COUNT: u32 = 2;

/// Derived timing for one acquisition.
///
/// Computed once per `acquire_and_save` call and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionSchedule {
    /// Number of scan+retract cycles requested.
    pub cycles: u32,
    /// Duration of one full cycle.
    pub cycle_time: Duration,
    /// Scan half of the cycle.
    pub scan_time: Duration,
    /// Retract half of the cycle.
    pub retract_time: Duration,
    /// Theoretical total acquisition time for all cycles.
    pub theoretical_total: Duration,
    /// Guard wait before the first STATUS poll.
    pub min_wait: Duration,
    /// Worst-case wait before the acquisition is declared failed.
    pub timeout_ceiling: Duration,
}

impl AcquisitionSchedule {
    /// Compute the schedule for `cycles` cycles at the given clock.
    ///
    /// Fails with [`GhostError::Validation`] for a non-positive cycle count
    /// or an invalid clock configuration.
    pub fn new(clock: &ClockConfig, cycles: u32) -> Result<Self> {
        clock.validate()?;
        if cycles == 0 {
            return Err(GhostError::Validation(
                "cycle count must be positive".to_string(),
            ));
        }

        let cycle_time = clock.cycle_time();
        let scan_time = cycle_time / 2;
        let retract_time = cycle_time - scan_time;
        let theoretical_total = (cycle_time + RETRACT_OVERHEAD) * cycles;
        let min_wait = theoretical_total.mul_f64(MIN_WAIT_RATIO);
        let timeout_ceiling = theoretical_total + cycle_time * TIMEOUT_MARGIN_CYCLES;

        Ok(Self {
            cycles,
            cycle_time,
            scan_time,
            retract_time,
            theoretical_total,
            min_wait,
            timeout_ceiling,
        })
    }
}
