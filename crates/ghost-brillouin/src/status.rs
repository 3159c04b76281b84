//! Parsing of the status report returned by `STATUS`.

/// Line closing every STATUS report. The controller consumes report lines
/// until this one arrives, so no residue can answer a later query.
pub const REPORT_END: &str = "END OF REPORT";

/// Device operating state reported by the GHOST program.
///
/// Every STATUS read is a snapshot that can be stale or racing a
/// device-internal transition; the controller therefore never acts on a
/// single `Idle` observation (see
/// [`REQUIRED_IDLE_COUNT`](crate::timing::REQUIRED_IDLE_COUNT)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    /// The device reports no acquisition in progress.
    Idle,
    /// The device reports any non-idle state; carries the raw reply for
    /// diagnostics.
    Busy(String),
}

impl DeviceStatus {
    /// Parse a status reply line.
    ///
    /// The GHOST replies with lines like `GHOST STATUS REPORT : IDLE`; any
    /// line that does not announce IDLE is treated as busy, because
    /// assuming an unclear device is still acquiring is the safe direction.
    pub fn parse(reply: &str) -> Self {
        if reply.to_uppercase().contains("IDLE") {
            Self::Idle
        } else {
            Self::Busy(reply.trim().to_string())
        }
    }

    /// Classify a full STATUS report.
    ///
    /// The report body (terminator line excluded) is scanned for a line
    /// announcing IDLE. A busy report carries its state line for
    /// diagnostics, falling back to the first non-empty line.
    pub fn from_report(lines: &[String]) -> Self {
        if lines.iter().any(|line| Self::parse(line).is_idle()) {
            return Self::Idle;
        }
        let detail = lines
            .iter()
            .find(|line| line.to_uppercase().contains("STATE"))
            .or_else(|| lines.iter().find(|line| !line.trim().is_empty()));
        match detail {
            Some(line) => Self::Busy(line.trim().to_string()),
            None => Self::Busy("empty status report".to_string()),
        }
    }

    /// Whether the device reported itself idle.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Busy(raw) => write!(f, "{raw}"),
        }
    }
}
