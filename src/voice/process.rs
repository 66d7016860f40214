//! Subprocess plumbing for the synthesizer and player
//!
//! Builds the piper / aplay / sox command lines, drains child stderr on
//! background threads, and terminates children with a bounded wait.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::{PlayerConfig, SynthConfig};
use crate::voice::VoiceProfile;

/// Environment variables that carry the engine's thread-count hint
const THREAD_ENV_VARS: &[&str] = &[
    "OMP_NUM_THREADS",
    "OPENBLAS_NUM_THREADS",
    "MKL_NUM_THREADS",
    "NUMEXPR_NUM_THREADS",
];

/// Poll interval while waiting for a child to exit
const WAIT_POLL: Duration = Duration::from_millis(10);

/// Lines of stderr kept for error reports
const STDERR_TAIL_LINES: usize = 20;

/// Build the streaming synthesizer command (raw PCM on stdout)
///
/// With `json_input` the engine expects one `{"text": ...}` object per line.
#[must_use]
pub fn synth_command(config: &SynthConfig, profile: &VoiceProfile, json_input: bool) -> Command {
    let mut cmd = Command::new(&config.binary);
    cmd.arg("-m")
        .arg(&profile.model_path)
        .arg("-c")
        .arg(&profile.config_path)
        .arg("--output_raw");

    if json_input {
        cmd.arg("--json-input");
    }

    let tuning = [
        ("--sentence_silence", config.sentence_silence),
        ("--length_scale", config.length_scale),
        ("--noise_scale", config.noise_scale),
        ("--noise_w", config.noise_w),
    ];
    for (flag, value) in tuning {
        if let Some(value) = value {
            cmd.arg(flag).arg(value.to_string());
        }
    }

    let threads = config.threads.to_string();
    for var in THREAD_ENV_VARS {
        cmd.env(var, &threads);
    }

    cmd
}

/// Build the raw PCM player command (S16_LE mono at `sample_rate`)
#[must_use]
pub fn player_command(config: &PlayerConfig, sample_rate: u32) -> Command {
    let rate = sample_rate.to_string();

    if config.fade {
        let mut cmd = Command::new("sox");
        cmd.args(["-t", "raw", "-r", &rate, "-b", "16", "-e", "signed-integer", "-c", "1", "-", "-d"])
            .args(["fade", "t", &format!("{:.3}", config.fade_ms / 1000.0)]);
        cmd
    } else {
        let mut cmd = Command::new(&config.binary);
        cmd.args(["-q", "-D", &config.device, "-f", "S16_LE", "-r", &rate, "-c", "1"]);
        cmd
    }
}

/// Log every stderr line of a child on a background thread
///
/// The thread ends when the pipe closes. Callers never wait on it.
pub fn drain_stderr<R>(source: &'static str, stderr: R) -> Option<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{source}-stderr"))
        .spawn(move || {
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(line) if line.trim().is_empty() => {}
                    Ok(line) => tracing::debug!(source, "{}", line.trim_end()),
                    Err(_) => break,
                }
            }
        })
        .map_err(|e| tracing::warn!(source, error = %e, "failed to spawn stderr drain"))
        .ok()
}

/// Drain a child's stderr, keeping the last lines for an error report
pub fn collect_stderr<R>(source: &'static str, stderr: R) -> JoinHandle<String>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut tail = std::collections::VecDeque::with_capacity(STDERR_TAIL_LINES);
        for line in BufReader::new(stderr).lines().map_while(std::result::Result::ok) {
            tracing::debug!(source, "{}", line.trim_end());
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        Vec::from(tail).join("\n")
    })
}

/// Wait for a child to exit, giving up after `timeout`
///
/// # Errors
///
/// Returns error if the child's status cannot be queried
pub fn wait_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(WAIT_POLL);
    }
}

/// Stop a child: close its stdin, wait up to `grace`, then kill
pub fn terminate(child: &mut Child, source: &'static str, grace: Duration) {
    drop(child.stdin.take());

    match wait_timeout(child, grace) {
        Ok(Some(status)) => {
            tracing::debug!(source, pid = child.id(), %status, "process exited");
        }
        Ok(None) => {
            tracing::debug!(source, pid = child.id(), "process did not exit in time, killing");
            kill(child, source);
        }
        Err(e) => {
            tracing::warn!(source, error = %e, "failed to wait for process, killing");
            kill(child, source);
        }
    }
}

fn kill(child: &mut Child, source: &'static str) {
    if let Err(e) = child.kill() {
        tracing::warn!(source, error = %e, "kill failed");
    }
    if let Err(e) = child.wait() {
        tracing::warn!(source, error = %e, "failed to reap process");
    }
}
