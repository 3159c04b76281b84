//! `ghost-brillouin`
//!
//! Acquisition controller for the GHOST program driving a tandem
//! Fabry-Pérot (TFP) Brillouin spectrometer.
//!
//! Protocol overview:
//! - Format: ASCII command/response over TCP (default `localhost:4000`)
//! - Command terminator: CR+LF (`\r\n`), replies likewise
//! - Maximum command length: 80 bytes including the terminator
//! - Commands: `OBSERVE`, `STATUS`, `START n`, `STOP`, `SAVE name`,
//!   `DELETE`, `WDIR path`, plus `OVERRIDE`/`RESTORE` for remote control
//!   and `SET{n}` for the MCA channel count
//!
//! Acquisition durations are governed by the spectrometer's scan clock: one
//! scan+retract cycle consumes 2460 clock counts, so a 4 kHz clock yields
//! 615 ms per cycle and the 10 kHz high-speed mode 246 ms. The controller
//! derives a per-acquisition [`AcquisitionSchedule`] from the configured
//! clock, waits out a guard fraction of the theoretical time before polling
//! `STATUS`, requires two consecutive IDLE replies before trusting
//! completion, and bounds the whole wait with a timeout ceiling.
//!
//! # Usage
//!
//! ```rust,ignore
//! use ghost_brillouin::{GhostSpectrometer, SpectrometerConfig};
//!
//! let mut spec = GhostSpectrometer::new(SpectrometerConfig::default())?;
//! spec.initialize().await?;
//! spec.set_working_directory("C:/data/run_042").await?;
//! spec.acquire_and_save(10, "spectrum_001.DAT").await?;
//! spec.close().await?;
//! ```

pub mod commands;
pub mod config;
pub mod spectrometer;
pub mod status;
pub mod timing;

pub use config::{ClockConfig, SpectrometerConfig};
pub use spectrometer::GhostSpectrometer;
pub use status::DeviceStatus;
pub use timing::AcquisitionSchedule;

// Shared layer re-exports so downstream code needs only this crate.
pub use ghost_core::{GhostError, LineTransport, Result, RetryPolicy};
