//! Acquisition controller for the GHOST spectrometer program.
//!
//! Translates intent ("acquire N cycles, save as F") into a bounded
//! sequence of protocol commands, tolerating transient device
//! unresponsiveness. One controller owns one connection; every suspension
//! point is an explicit `.await` with no concurrent command in flight.

use std::time::Duration;

use ghost_core::transport::validate_command;
use ghost_core::{GhostError, LineTransport, Result, RetryPolicy};
use tokio::time::{sleep, Instant};

use crate::commands;
use crate::config::SpectrometerConfig;
use crate::status::{DeviceStatus, REPORT_END};
use crate::timing::{AcquisitionSchedule, POLL_INTERVAL, REQUIRED_IDLE_COUNT};

/// Time for the GHOST welcome banner to land after connecting.
const WELCOME_SETTLE: Duration = Duration::from_secs(3);

/// Settle delay after control and mode commands.
const CONTROL_SETTLE: Duration = Duration::from_millis(100);

/// Settle delay after data-clearing commands.
const COMMAND_SETTLE: Duration = Duration::from_millis(50);

/// Settle delay between `START` and the completion wait.
const START_SETTLE: Duration = Duration::from_millis(20);

/// Whole-sequence retries permitted per acquisition session.
const SEQUENCE_RETRIES: u32 = 1;

/// Upper bound on STATUS report length; a longer stream without the
/// terminator line is a protocol violation.
const MAX_REPORT_LINES: usize = 64;

/// Controller for the GHOST Brillouin spectrometer software.
///
/// Manages the connection lifecycle, remote control, working directory and
/// the acquisition state machine. Acquisition methods take `&mut self`, so
/// two acquisitions on the same controller cannot overlap by construction.
pub struct GhostSpectrometer {
    config: SpectrometerConfig,
    retry: RetryPolicy,
    transport: Option<LineTransport>,
    has_control: bool,
    working_directory: Option<String>,
}

/// Ephemeral state for one `acquire_and_save` call.
#[derive(Debug)]
struct AcquisitionSession {
    schedule: AcquisitionSchedule,
    name: String,
    attempt: u32,
    last_state: String,
}

impl GhostSpectrometer {
    /// Create a controller from a validated configuration.
    ///
    /// The controller starts disconnected; call
    /// [`initialize`](Self::initialize) before issuing operations.
    pub fn new(config: SpectrometerConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            clock_khz = config.clock.clock_frequency_khz,
            channels = config.clock.channel_count,
            cycle_time = ?config.clock.cycle_time(),
            "spectrometer controller configured"
        );
        Ok(Self {
            config,
            retry: RetryPolicy::default(),
            transport: None,
            has_control: false,
            working_directory: None,
        })
    }

    /// Replace the retry policy applied during status polling.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The configuration this controller was built with.
    pub fn config(&self) -> &SpectrometerConfig {
        &self.config
    }

    /// Whether the controller holds remote control of the GHOST program.
    pub fn has_control(&self) -> bool {
        self.has_control
    }

    /// The last working directory the device confirmed, if any.
    pub fn working_directory(&self) -> Option<&str> {
        self.working_directory.as_deref()
    }

    /// Whether a live connection to the GHOST program exists.
    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(LineTransport::is_connected)
    }

    /// Connect to the GHOST program and perform the startup handshake.
    ///
    /// Takes remote control (`OVERRIDE`), selects the configured channel
    /// count, enters observation mode, and clears any acquisition left over
    /// from a previous session. On failure the connection is released
    /// again, so a later call can retry cleanly.
    pub async fn initialize(&mut self) -> Result<()> {
        let transport = LineTransport::connect(
            &self.config.host,
            self.config.port,
            self.config.connect_timeout(),
        )
        .await?;
        self.initialize_with_transport(transport).await
    }

    /// Perform the startup handshake over an already-open transport.
    ///
    /// Used by tests to drive the controller over an in-memory stream; the
    /// handshake is identical to [`initialize`](Self::initialize).
    pub async fn initialize_with_transport(&mut self, transport: LineTransport) -> Result<()> {
        self.transport = Some(transport);
        match self.handshake().await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Never leave a half-initialized connection behind.
                let _ = self.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        // The GHOST prints a welcome banner on connect. Let it land, then
        // discard it so it is never matched against a command.
        sleep(WELCOME_SETTLE).await;
        self.transport()?.drain().await?;

        self.command(commands::OVERRIDE).await?;
        self.has_control = true;
        sleep(CONTROL_SETTLE).await;
        // OVERRIDE acknowledges with a text line; discard it so it is never
        // matched against a later query.
        self.transport()?.drain().await?;

        let channels = commands::set_channels(self.config.clock.channel_count);
        self.command(&channels).await?;
        self.command(commands::OBSERVE).await?;
        sleep(CONTROL_SETTLE).await;
        // SET{n} acknowledges too.
        self.transport()?.drain().await?;

        // Clear anything a previous session may have left on the device.
        self.command(commands::STOP).await?;
        sleep(COMMAND_SETTLE).await;
        self.command(commands::DELETE).await?;

        tracing::info!("connection to GHOST software established");
        Ok(())
    }

    /// Close the connection, returning control to the local operator first.
    ///
    /// Safe on every exit path and idempotent; a closed controller can be
    /// re-initialized later.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(transport) = self.transport.as_mut() {
            if self.has_control && transport.is_connected() {
                if let Err(e) = transport.send_command(commands::RESTORE).await {
                    tracing::warn!(error = %e, "failed to return control on close");
                }
            }
            transport.close().await?;
        }
        self.transport = None;
        self.has_control = false;
        Ok(())
    }

    /// Cancel an in-progress acquisition best-effort.
    ///
    /// Sends `STOP`, discards any late replies so the next command starts
    /// from a clean slate, and leaves the controller usable.
    pub async fn cancel(&mut self) -> Result<()> {
        if let Some(transport) = self.transport.as_mut() {
            if transport.is_connected() {
                if let Err(e) = transport.send_command(commands::STOP).await {
                    tracing::warn!(error = %e, "failed to send STOP during cancellation");
                }
                let _ = transport.drain().await;
            }
        }
        Ok(())
    }

    /// Query the device operating state once.
    ///
    /// The device answers `STATUS` with a multi-line report closed by an
    /// `END OF REPORT` line; the whole report is consumed here so no
    /// residue can answer a later query.
    pub async fn status(&mut self) -> Result<DeviceStatus> {
        let reply_timeout = self.config.command_timeout();
        let transport = self.transport()?;
        transport.send_command(commands::STATUS).await?;

        let mut lines = Vec::new();
        loop {
            let line = transport.read_reply(reply_timeout).await?;
            if line.trim().eq_ignore_ascii_case(REPORT_END) {
                break;
            }
            if lines.len() >= MAX_REPORT_LINES {
                return Err(GhostError::Transport(format!(
                    "status report exceeded {MAX_REPORT_LINES} lines without {REPORT_END:?}"
                )));
            }
            lines.push(line);
        }
        Ok(DeviceStatus::from_report(&lines))
    }

    /// Set the working directory on the device and confirm it took effect.
    ///
    /// The device is queried back after the set; a mismatch is a
    /// [`GhostError::Validation`], never silently ignored. Setting the same
    /// path twice is idempotent.
    pub async fn set_working_directory(&mut self, path: &str) -> Result<()> {
        self.require_control()?;
        let path = path.trim();
        if path.is_empty() {
            return Err(GhostError::Validation(
                "working directory must not be empty".to_string(),
            ));
        }
        validate_command(&commands::wdir(path))?;

        let reply_timeout = self.config.command_timeout();
        let transport = self.transport()?;
        transport.send_command(&commands::wdir(path)).await?;
        sleep(COMMAND_SETTLE).await;

        transport.send_command(commands::WDIR_QUERY).await?;
        let reply = transport.read_reply(reply_timeout).await?;
        if reply.trim() != path {
            return Err(GhostError::Validation(format!(
                "device reports working directory {reply:?} after setting {path:?}"
            )));
        }

        self.working_directory = Some(path.to_string());
        tracing::debug!(path, "working directory confirmed");
        Ok(())
    }

    /// Acquire `cycles` scan+retract cycles and save the result as `name`.
    ///
    /// Runs the full sequence: clear previous data, `OBSERVE`, `START n`,
    /// wait out the minimum-wait guard, poll `STATUS` until two consecutive
    /// IDLE replies confirm completion, then `SAVE name`. Transient
    /// transport failures during polling are absorbed up to the retry
    /// policy; a failing sequence is retried once as a whole before the
    /// session fails with [`GhostError::Acquisition`]. Exceeding the
    /// timeout ceiling aborts with [`GhostError::Timeout`] after a
    /// best-effort `STOP`.
    pub async fn acquire_and_save(&mut self, cycles: u32, name: &str) -> Result<()> {
        let schedule = AcquisitionSchedule::new(&self.config.clock, cycles)?;
        if name.trim().is_empty() {
            return Err(GhostError::Validation(
                "save name must not be empty".to_string(),
            ));
        }
        // Reject a SAVE that could never be sent before any I/O happens.
        validate_command(&commands::save(name))?;
        self.require_control()?;

        let mut session = AcquisitionSession {
            schedule,
            name: name.to_string(),
            attempt: 0,
            last_state: "UNKNOWN".to_string(),
        };

        tracing::info!(
            cycles,
            name,
            theoretical = ?schedule.theoretical_total,
            ceiling = ?schedule.timeout_ceiling,
            "starting acquisition"
        );
        let started = Instant::now();

        loop {
            match self.run_sequence(&mut session).await {
                Ok(()) => {
                    tracing::info!(
                        name = %session.name,
                        elapsed = ?started.elapsed(),
                        "acquisition saved"
                    );
                    return Ok(());
                }
                Err(e @ GhostError::Timeout(_)) => {
                    tracing::error!(error = %e, "acquisition timed out; sending best-effort STOP");
                    self.cancel().await?;
                    return Err(e);
                }
                Err(e @ GhostError::Transport(_)) if !self.is_connected() => {
                    // Device-side state is unknown after a disconnect; the
                    // sequence must not be retried.
                    let _ = self.close().await;
                    return Err(e);
                }
                Err(e @ GhostError::Transport(_)) if session.attempt < SEQUENCE_RETRIES => {
                    session.attempt += 1;
                    tracing::warn!(
                        error = %e,
                        attempt = session.attempt,
                        "acquisition sequence failed; retrying"
                    );
                    self.cancel().await?;
                    sleep(self.retry.backoff_delay).await;
                }
                Err(e @ GhostError::Transport(_)) => {
                    let _ = self.cancel().await;
                    return Err(GhostError::Acquisition {
                        message: e.to_string(),
                        last_state: session.last_state.clone(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One pass of the acquisition state machine, up to and including SAVE.
    async fn run_sequence(&mut self, session: &mut AcquisitionSession) -> Result<()> {
        // Previous data must not leak into this acquisition.
        self.command(commands::DELETE).await?;
        sleep(COMMAND_SETTLE).await;

        self.command(commands::OBSERVE).await?;
        self.command(&commands::start(session.schedule.cycles)).await?;
        let started = Instant::now();
        sleep(START_SETTLE).await;

        self.wait_for_completion(session, started).await?;

        self.command(&commands::save(&session.name)).await?;
        Ok(())
    }

    /// Wait until the device confirms completion or the ceiling passes.
    async fn wait_for_completion(
        &mut self,
        session: &mut AcquisitionSession,
        started: Instant,
    ) -> Result<()> {
        let schedule = session.schedule;
        tracing::debug!(
            min_wait = ?schedule.min_wait,
            ceiling = ?schedule.timeout_ceiling,
            "waiting for acquisition to finish"
        );

        // Do not poll before the device could plausibly be done; early
        // polls only produce false-busy traffic.
        sleep(schedule.min_wait).await;

        let mut idle_count = 0u32;
        loop {
            if started.elapsed() > schedule.timeout_ceiling {
                tracing::warn!(
                    elapsed = ?started.elapsed(),
                    "acquisition exceeded its timeout ceiling"
                );
                return Err(GhostError::Timeout(format!(
                    "no completion within {:?}",
                    schedule.timeout_ceiling
                )));
            }

            match self.poll_status().await? {
                DeviceStatus::Idle => {
                    idle_count += 1;
                    session.last_state = DeviceStatus::Idle.to_string();
                    if idle_count >= REQUIRED_IDLE_COUNT {
                        tracing::debug!(idle_count, "completion confirmed");
                        return Ok(());
                    }
                }
                DeviceStatus::Busy(raw) => {
                    // A busy snapshot voids any earlier IDLE observation.
                    if idle_count > 0 {
                        tracing::trace!(idle_count, "busy reply resets completion confirmation");
                    }
                    idle_count = 0;
                    session.last_state = raw;
                }
            }

            sleep(POLL_INTERVAL).await;
        }
    }

    /// One STATUS poll, absorbing transient failures per the retry policy.
    ///
    /// A lost connection is never retried; the device-side session state is
    /// unknown after a disconnect.
    async fn poll_status(&mut self) -> Result<DeviceStatus> {
        let mut last_error: Option<GhostError> = None;
        for attempt in 0..=self.retry.max_attempts {
            if attempt > 0 {
                sleep(self.retry.backoff_delay).await;
                // A late reply to the failed poll must not answer this one.
                self.transport()?.drain().await?;
                tracing::debug!(attempt, max = self.retry.max_attempts, "retrying STATUS poll");
            }
            match self.status().await {
                Ok(status) => return Ok(status),
                Err(e) if e.is_transient() && self.is_connected() => {
                    tracing::warn!(error = %e, "transient failure while polling STATUS");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            GhostError::Timeout("status poll retries exhausted".to_string())
        }))
    }

    async fn command(&mut self, text: &str) -> Result<()> {
        self.transport()?.send_command(text).await
    }

    fn transport(&mut self) -> Result<&mut LineTransport> {
        self.transport
            .as_mut()
            .ok_or_else(|| GhostError::Validation("spectrometer is not initialized".to_string()))
    }

    fn require_control(&self) -> Result<()> {
        if self.transport.is_none() {
            return Err(GhostError::Validation(
                "spectrometer is not initialized".to_string(),
            ));
        }
        if !self.has_control {
            return Err(GhostError::Validation(
                "no remote control over the GHOST program".to_string(),
            ));
        }
        Ok(())
    }
}
