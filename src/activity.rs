// src/activity.rs - User-presence and display gating
use std::process::Command;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How often the system probe is sampled.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// An idle reading below this means the user just produced input.
const FRESH_INPUT_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivitySample {
    pub idle_secs: f64,
    pub display_on: bool,
}

/// OS-specific sensing lives behind this seam so the gating logic stays
/// deterministic and testable.
pub trait ActivityProbe: Send + 'static {
    fn sample(&mut self) -> ActivitySample;
}

/// Decides whether the pipeline should run. Pure transition logic; feeding it
/// samples is the poller's job.
pub struct ActivityGate {
    idle_pause_threshold: f64,
    enabled: bool,
    active: bool,
}

impl ActivityGate {
    pub fn new(idle_pause_threshold: f64, enabled: bool) -> Self {
        Self {
            idle_pause_threshold,
            enabled,
            active: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Apply one sample. Returns the new activity state when it flipped.
    pub fn evaluate(&mut self, sample: ActivitySample) -> Option<bool> {
        if !self.enabled {
            return None;
        }
        if self.active {
            if sample.idle_secs > self.idle_pause_threshold || !sample.display_on {
                self.active = false;
                return Some(false);
            }
        } else if sample.idle_secs < FRESH_INPUT_SECS && sample.display_on {
            self.active = true;
            return Some(true);
        }
        None
    }
}

/// Probes the OS with a chain of fallbacks. When no method answers, reports
/// the user present and the display on.
pub struct SystemActivityProbe;

impl SystemActivityProbe {
    pub fn new() -> Self {
        Self
    }

    fn idle_secs() -> f64 {
        // macOS: HIDIdleTime is reported in nanoseconds.
        if let Some(out) = run_capture("ioreg", &["-c", "IOHIDSystem", "-d", "4"]) {
            if let Some(line) = out.lines().find(|l| l.contains("HIDIdleTime")) {
                if let Some(ns) = line
                    .rsplit('=')
                    .next()
                    .and_then(|v| v.trim().parse::<f64>().ok())
                {
                    return ns / 1e9;
                }
            }
        }
        // X11 fallback, milliseconds.
        if let Some(out) = run_capture("xprintidle", &[]) {
            if let Ok(ms) = out.trim().parse::<f64>() {
                return ms / 1e3;
            }
        }
        0.0
    }

    fn display_on() -> bool {
        if let Some(out) = run_capture("brightnessctl", &["get"]) {
            if let Ok(brightness) = out.trim().parse::<i64>() {
                return brightness > 0;
            }
        }
        if let Some(out) = run_capture("system_profiler", &["SPDisplaysDataType"]) {
            return out.contains("Resolution:");
        }
        true
    }
}

fn run_capture(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
}

impl ActivityProbe for SystemActivityProbe {
    fn sample(&mut self) -> ActivitySample {
        ActivitySample {
            idle_secs: Self::idle_secs(),
            display_on: Self::display_on(),
        }
    }
}

/// Periodic sampling task. Publishes only transitions over the watch channel
/// and stops once every receiver is gone. Runs on a blocking thread because
/// the system probe shells out.
pub fn spawn_poller(
    mut probe: Box<dyn ActivityProbe>,
    mut gate: ActivityGate,
    tx: watch::Sender<bool>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !tx.is_closed() {
            let sample = probe.sample();
            if let Some(active) = gate.evaluate(sample) {
                tracing::info!(
                    active,
                    idle_secs = sample.idle_secs,
                    display_on = sample.display_on,
                    "activity state changed"
                );
                if tx.send(active).is_err() {
                    break;
                }
            }
            std::thread::sleep(poll_interval);
        }
    })
}
