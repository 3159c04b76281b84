//! The GHOST command vocabulary.
//!
//! These tokens are fixed by the GHOST program's wire protocol and must be
//! sent verbatim; every command the controller emits is built here so the
//! literals exist in exactly one place.

/// Put the spectrometer into observation mode. No reply.
pub const OBSERVE: &str = "OBSERVE";

/// Query the device operating state. Replies with a multi-line report
/// closed by an `END OF REPORT` line.
pub const STATUS: &str = "STATUS";

/// Stop any ongoing acquisition. No reply.
pub const STOP: &str = "STOP";

/// Delete the currently accumulated data. No reply.
pub const DELETE: &str = "DELETE";

/// Take remote control of the GHOST program. Acknowledged with a text
/// line that is drained, not inspected.
pub const OVERRIDE: &str = "OVERRIDE";

/// Return control to the local GHOST operator. No reply inspected.
pub const RESTORE: &str = "RESTORE";

/// Bare `WDIR` queries the current working directory. Replies with the path.
pub const WDIR_QUERY: &str = "WDIR";

/// Begin an acquisition of `cycles` scan+retract cycles. No reply.
pub fn start(cycles: u32) -> String {
    format!("START {cycles}")
}

/// Save the accumulated data under `name` in the working directory. No reply.
pub fn save(name: &str) -> String {
    format!("SAVE {name}")
}

/// Set the working directory on the device. No reply.
pub fn wdir(path: &str) -> String {
    format!("WDIR {path}")
}

/// Select the MCA channel count for the configured mode. Acknowledged
/// with a text line that is drained, not inspected.
pub fn set_channels(count: u32) -> String {
    format!("SET{count}")
}
