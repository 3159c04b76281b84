//! `ghost-core`
//!
//! Transport layer and shared types for talking to the GHOST
//! instrument-control program over its line-oriented TCP protocol.
//!
//! This crate knows nothing about acquisition semantics. It provides:
//!
//! - [`LineTransport`]: CR+LF framed command send and reply receive with
//!   per-operation timeouts and stale-input draining;
//! - [`GhostError`]: the error taxonomy shared with the higher-level
//!   acquisition controller;
//! - [`RetryPolicy`]: an explicit, independently testable retry value used
//!   when absorbing transient transport failures.
//!
//! The transport enforces a single-flight discipline through ownership: all
//! I/O methods take `&mut self`, so a connection can never have two commands
//! in flight from concurrent callers.

pub mod error;
pub mod retry;
pub mod transport;

pub use error::{GhostError, Result};
pub use retry::RetryPolicy;
pub use transport::LineTransport;
