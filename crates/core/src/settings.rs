use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[cfg(target_os = "windows")]
const DEFAULT_EXECUTABLE: &str = "C:/Program Files (x86)/Microsoft/Edge/Application/msedge.exe";
#[cfg(target_os = "windows")]
const DEFAULT_PROCESS: &str = "msedge.exe";
#[cfg(not(target_os = "windows"))]
const DEFAULT_EXECUTABLE: &str = "chromium";
#[cfg(not(target_os = "windows"))]
const DEFAULT_PROCESS: &str = "chromium";

/// What to do when the monitor count differs from `Settings::monitors`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MismatchPolicy {
    /// Stop the program.
    Fail,
    /// Show as many slots as the available monitors allow.
    #[default]
    Pass,
    /// Show nothing until the topology matches again.
    None,
}

/// Global settings, read from the `Settings` table of the config script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Settings {
    /// The browser executable to run.
    pub executable_name: String,
    /// Process name the browser's windows belong to.
    pub process_name: String,
    /// Extra arguments passed to every launch.
    pub start_args: String,
    pub monitor_mode: MismatchPolicy,
    /// Expected number of monitors.
    pub monitors: usize,
    /// Seconds between reconciliation passes.
    pub refresh_time: f64,
    /// Seconds to wait after spawning before looking for the new window.
    pub load_time: f64,
    /// Close every window of `process_name` before the first pass.
    pub close_all_on_start: bool,
    /// Passes that keep sending the shift burst after a window was moved.
    pub nudges: u32,
    /// Pause after each synthetic key event.
    pub key_delay_ms: u64,
    /// Pause after each move request before re-checking the bounds.
    pub settle_ms: u64,
    /// Name of the global table holding the window list.
    pub configuration: String,
    /// Optional plain URL list used when the configuration table is absent.
    pub urls_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            executable_name: DEFAULT_EXECUTABLE.to_string(),
            process_name: DEFAULT_PROCESS.to_string(),
            start_args: String::new(),
            monitor_mode: MismatchPolicy::Pass,
            monitors: 1,
            refresh_time: 2.0,
            load_time: 1.0,
            close_all_on_start: true,
            nudges: 5,
            key_delay_ms: 10,
            settle_ms: 100,
            configuration: "Kiosk".to_string(),
            urls_file: None,
        }
    }
}

/// Longest `RefreshTime` or `LoadTime` accepted, in seconds.
pub const MAX_DELAY_SECS: f64 = 24.0 * 60.0 * 60.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{field} must be a number of seconds no larger than one day, got {value}")]
pub struct InvalidDelay {
    pub field: &'static str,
    pub value: f64,
}

/// Negative values mean no wait; anything unrepresentable is capped.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_DELAY_SECS)).unwrap_or(Duration::ZERO)
}

impl Settings {
    pub fn tick_interval(&self) -> Duration {
        seconds(self.refresh_time)
    }

    pub fn load_delay(&self) -> Duration {
        seconds(self.load_time)
    }

    /// Reject delays that are not finite or exceed [`MAX_DELAY_SECS`].
    pub fn validate(&self) -> Result<(), InvalidDelay> {
        for (field, value) in [("RefreshTime", self.refresh_time), ("LoadTime", self.load_time)] {
            if !value.is_finite() || value > MAX_DELAY_SECS {
                return Err(InvalidDelay { field, value });
            }
        }
        Ok(())
    }

    pub fn start_args(&self) -> Vec<String> {
        split_args(&self.start_args)
    }
}

/// Split on whitespace, keeping double-quoted runs together.
pub fn split_args(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;
    for c in args.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            c if c.is_whitespace() && !quoted => {
                if pending {
                    out.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if pending {
        out.push(current);
    }
    out
}
