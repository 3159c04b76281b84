//! End-to-end controller tests against a scripted in-memory device.
//!
//! The mock device speaks the GHOST wire protocol over `tokio::io::duplex`:
//! it logs every command it receives, acknowledges `OVERRIDE` and `SET{n}`,
//! answers `STATUS` with a full report whose state line comes from a script,
//! and answers a bare `WDIR` with its current working directory. All tests
//! run with `start_paused`, so multi-second schedules complete instantly
//! under virtual time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ghost_brillouin::{
    ClockConfig, GhostError, GhostSpectrometer, LineTransport, SpectrometerConfig,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const IDLE_REPLY: &str = "STATE : IDLE";
const BUSY_REPLY: &str = "STATE : ACQUIRING";

/// Script token for "swallow this STATUS without replying".
const SILENT: &str = "<silent>";

type CommandLog = Arc<Mutex<Vec<String>>>;

struct DeviceScript {
    statuses: VecDeque<String>,
    default_status: String,
    corrupt_wdir: bool,
    close_after_statuses: Option<usize>,
}

impl DeviceScript {
    fn with_statuses(statuses: &[&str]) -> Self {
        Self {
            statuses: statuses.iter().map(|s| (*s).to_string()).collect(),
            default_status: IDLE_REPLY.to_string(),
            corrupt_wdir: false,
            close_after_statuses: None,
        }
    }

    fn always_idle() -> Self {
        Self::with_statuses(&[])
    }

    fn default_status(mut self, reply: &str) -> Self {
        self.default_status = reply.to_string();
        self
    }

    fn corrupt_wdir(mut self) -> Self {
        self.corrupt_wdir = true;
        self
    }

    fn close_after_statuses(mut self, count: usize) -> Self {
        self.close_after_statuses = Some(count);
        self
    }
}

async fn run_device(stream: DuplexStream, mut script: DeviceScript, log: CommandLog) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader);

    let _ = writer.write_all(b"WELCOME TO THE GHOST SERVER\r\n").await;

    let mut wdir = String::from("C:\\GHOST");
    let mut statuses_served = 0usize;
    let mut line = String::new();
    loop {
        line.clear();
        match lines.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let command = line.trim_end_matches(['\r', '\n']).to_string();
        log.lock().await.push(command.clone());

        if command == "STATUS" {
            let state = script
                .statuses
                .pop_front()
                .unwrap_or_else(|| script.default_status.clone());
            if state != SILENT {
                let report = format!(
                    "GHOST STATUS REPORT :\r\n {state}\r\nEND OF REPORT\r\n"
                );
                let _ = writer.write_all(report.as_bytes()).await;
            }
            statuses_served += 1;
            if script
                .close_after_statuses
                .is_some_and(|n| statuses_served >= n)
            {
                break;
            }
        } else if command == "OVERRIDE" {
            let _ = writer.write_all(b"Remote control granted\r\n").await;
        } else if command.starts_with("SET") {
            let _ = writer.write_all(format!("{command} OK\r\n").as_bytes()).await;
        } else if command == "WDIR" {
            let _ = writer.write_all(format!("{wdir}\r\n").as_bytes()).await;
        } else if let Some(path) = command.strip_prefix("WDIR ") {
            wdir = if script.corrupt_wdir {
                format!("{path}~1")
            } else {
                path.to_string()
            };
        }
    }
}

fn high_speed_config() -> SpectrometerConfig {
    SpectrometerConfig {
        clock: ClockConfig::high_speed(),
        ..SpectrometerConfig::default()
    }
}

async fn connected_controller(
    config: SpectrometerConfig,
    script: DeviceScript,
) -> Result<(GhostSpectrometer, CommandLog, JoinHandle<()>)> {
    let (host, device) = tokio::io::duplex(1024);
    let log: CommandLog = Arc::new(Mutex::new(Vec::new()));
    let handle = tokio::spawn(run_device(host, script, Arc::clone(&log)));

    let mut spec = GhostSpectrometer::new(config)?;
    spec.initialize_with_transport(LineTransport::from_stream(device))
        .await?;
    Ok((spec, log, handle))
}

/// Snapshot the command log once `cond` holds.
///
/// The device task processes commands asynchronously, so after a
/// fire-and-forget send the last command may not have been logged yet;
/// assertions poll under virtual time instead of racing the write.
async fn logged_commands<F>(log: &CommandLog, cond: F) -> Vec<String>
where
    F: Fn(&[String]) -> bool,
{
    for _ in 0..1000 {
        {
            let log = log.lock().await;
            if cond(log.as_slice()) {
                return log.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let log = log.lock().await;
    panic!("device log never reached the expected state, got {:?}", *log);
}

fn last_is(commands: &[String], expected: &str) -> bool {
    commands.last().map(String::as_str) == Some(expected)
}

/// Commands logged after the last occurrence of `marker`.
fn commands_after(log: &[String], marker: &str) -> Vec<String> {
    let idx = log
        .iter()
        .rposition(|c| c == marker)
        .unwrap_or_else(|| panic!("command {marker:?} not found in {log:?}"));
    log[idx + 1..].to_vec()
}

fn count_of(commands: &[String], token: &str) -> usize {
    commands.iter().filter(|c| *c == token).count()
}

#[tokio::test(start_paused = true)]
async fn test_initialization_handshake_sequence() -> Result<()> {
    let (spec, log, _device) =
        connected_controller(high_speed_config(), DeviceScript::always_idle()).await?;

    assert!(spec.is_connected());
    assert!(spec.has_control());
    let log = logged_commands(&log, |l| last_is(l, "DELETE")).await;
    assert_eq!(log, vec!["OVERRIDE", "SET512", "OBSERVE", "STOP", "DELETE"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_acquire_polls_until_two_consecutive_idles_then_saves() -> Result<()> {
    let script = DeviceScript::with_statuses(&[BUSY_REPLY, BUSY_REPLY, IDLE_REPLY, IDLE_REPLY]);
    let (mut spec, log, _device) = connected_controller(high_speed_config(), script).await?;

    spec.acquire_and_save(4, "spectrum_001.DAT").await?;

    let log = logged_commands(&log, |l| last_is(l, "SAVE spectrum_001.DAT")).await;
    let after_start = commands_after(&log, "START 4");
    assert_eq!(count_of(&after_start, "STATUS"), 4);
    assert_eq!(count_of(&after_start, "SAVE spectrum_001.DAT"), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_busy_flicker_resets_idle_confirmation() -> Result<()> {
    // IDLE, BUSY, IDLE must not be treated as completion; the flicker voids
    // the first IDLE and two more consecutive IDLEs are required.
    let script = DeviceScript::with_statuses(&[BUSY_REPLY, IDLE_REPLY, BUSY_REPLY]);
    let (mut spec, log, _device) = connected_controller(high_speed_config(), script).await?;

    spec.acquire_and_save(4, "spectrum_002.DAT").await?;

    let log = logged_commands(&log, |l| last_is(l, "SAVE spectrum_002.DAT")).await;
    let after_start = commands_after(&log, "START 4");
    assert_eq!(count_of(&after_start, "STATUS"), 5);
    assert_eq!(count_of(&after_start, "SAVE spectrum_002.DAT"), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_never_idle_device_times_out_and_is_stopped() -> Result<()> {
    let script = DeviceScript::always_idle().default_status(BUSY_REPLY);
    let (mut spec, log, _device) = connected_controller(high_speed_config(), script).await?;

    let err = spec.acquire_and_save(4, "spectrum_003.DAT").await.unwrap_err();
    assert!(matches!(err, GhostError::Timeout(_)));

    // The device is told to stop, and nothing is saved.
    let log = logged_commands(&log, |l| last_is(l, "STOP")).await;
    let after_start = commands_after(&log, "START 4");
    assert_eq!(count_of(&after_start, "SAVE spectrum_003.DAT"), 0);
    // The controller stays usable after the timeout.
    assert!(spec.is_connected());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dropped_status_reply_is_retried_and_acquisition_succeeds() -> Result<()> {
    // First STATUS gets no reply at all; the poll times out, is retried per
    // the retry policy and the acquisition still completes.
    let mut config = high_speed_config();
    config.command_timeout_ms = 500;
    let script = DeviceScript::with_statuses(&[SILENT, IDLE_REPLY, IDLE_REPLY]);
    let (mut spec, log, _device) = connected_controller(config, script).await?;

    spec.acquire_and_save(4, "spectrum_004.DAT").await?;

    let log = logged_commands(&log, |l| last_is(l, "SAVE spectrum_004.DAT")).await;
    let after_start = commands_after(&log, "START 4");
    assert_eq!(count_of(&after_start, "STATUS"), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_exhausts_sequence_retry_into_acquisition_error() -> Result<()> {
    // The device confirms completion, then dies before SAVE can be sent.
    // The whole sequence is retried once; the retry fails on its first
    // write, and the session surfaces an acquisition error carrying the
    // last observed device state.
    let script = DeviceScript::with_statuses(&[IDLE_REPLY, IDLE_REPLY]).close_after_statuses(2);
    let (mut spec, log, _device) = connected_controller(high_speed_config(), script).await?;

    let err = spec.acquire_and_save(4, "spectrum_005.DAT").await.unwrap_err();
    match err {
        GhostError::Acquisition { last_state, .. } => {
            assert_eq!(last_state, "IDLE");
        }
        other => panic!("expected acquisition error, got {other:?}"),
    }

    let log = log.lock().await;
    assert_eq!(count_of(&log, "SAVE spectrum_005.DAT"), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_polling_is_fatal() -> Result<()> {
    // The device closes the connection while a STATUS reply is pending.
    // Connection loss is never retried; the controller tears down.
    let script = DeviceScript::with_statuses(&[BUSY_REPLY, SILENT]).close_after_statuses(2);
    let (mut spec, _log, _device) = connected_controller(high_speed_config(), script).await?;

    let err = spec.acquire_and_save(4, "spectrum_006.DAT").await.unwrap_err();
    assert!(matches!(err, GhostError::Transport(_)));
    assert!(!spec.is_connected());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_set_working_directory_confirms_and_is_idempotent() -> Result<()> {
    let (mut spec, log, _device) =
        connected_controller(high_speed_config(), DeviceScript::always_idle()).await?;

    spec.set_working_directory("C:/data/run_042").await?;
    assert_eq!(spec.working_directory(), Some("C:/data/run_042"));

    spec.set_working_directory("C:/data/run_042").await?;
    assert_eq!(spec.working_directory(), Some("C:/data/run_042"));

    let log = log.lock().await;
    assert_eq!(count_of(&log, "WDIR C:/data/run_042"), 2);
    assert_eq!(count_of(&log, "WDIR"), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_working_directory_mismatch_is_rejected() -> Result<()> {
    let script = DeviceScript::always_idle().corrupt_wdir();
    let (mut spec, _log, _device) = connected_controller(high_speed_config(), script).await?;

    let err = spec.set_working_directory("C:/data/run_042").await.unwrap_err();
    assert!(matches!(err, GhostError::Validation(_)));
    assert_eq!(spec.working_directory(), None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancel_sends_stop() -> Result<()> {
    let (mut spec, log, _device) =
        connected_controller(high_speed_config(), DeviceScript::always_idle()).await?;

    spec.cancel().await?;

    let log = logged_commands(&log, |l| last_is(l, "STOP")).await;
    assert!(!log.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_close_returns_control_and_is_idempotent() -> Result<()> {
    let (mut spec, log, _device) =
        connected_controller(high_speed_config(), DeviceScript::always_idle()).await?;

    spec.close().await?;
    assert!(!spec.is_connected());
    assert!(!spec.has_control());
    spec.close().await?;

    let log = logged_commands(&log, |l| last_is(l, "RESTORE")).await;
    assert_eq!(count_of(&log, "RESTORE"), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_status_consumes_whole_report() -> Result<()> {
    let script = DeviceScript::with_statuses(&[BUSY_REPLY]);
    let (mut spec, _log, _device) = connected_controller(high_speed_config(), script).await?;

    let status = spec.status().await?;
    assert!(!status.is_idle());
    let status = spec.status().await?;
    assert!(status.is_idle());

    // Each STATUS consumed its report up to the terminator line, so the
    // next reply-bearing exchange must not see leftovers.
    spec.set_working_directory("C:/data/after_status").await?;
    assert_eq!(spec.working_directory(), Some("C:/data/after_status"));
    Ok(())
}
