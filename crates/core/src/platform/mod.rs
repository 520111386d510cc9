pub mod stub;

#[cfg(target_os = "windows")]
pub mod win32;

#[cfg(all(target_os = "linux", feature = "x11"))]
pub mod x11;

use std::io;
use std::sync::Arc;

use crate::keymap::{Key, Modifiers};
use crate::logger;
use crate::types::*;

/// OS-level window control surface. Every call is fire-and-forget from the
/// caller's point of view; results must be verified by reading state back.
pub trait Platform: Send + Sync {
    /// Short backend name for logs and startup checks.
    fn name(&self) -> &'static str;
    /// Display rectangles ordered left to right, then top to bottom.
    fn enumerate_monitors(&self) -> Vec<Rect>;
    /// Start `executable` with `args`. Does not wait for a window.
    fn spawn(&self, executable: &str, args: &[String]) -> io::Result<()>;
    /// All visible top-level windows belonging to processes named `process_name`.
    fn enumerate_windows(&self, process_name: &str) -> Vec<(ProcessId, WindowId)>;
    fn is_window_valid(&self, handle: WindowId) -> bool;
    fn is_fullscreen(&self, handle: WindowId) -> bool;
    fn move_window(&self, handle: WindowId, area: Rect);
    fn get_window_bounds(&self, handle: WindowId) -> Option<Rect>;
    fn send_key(&self, handle: WindowId, key: Key, modifiers: Modifiers);
    fn send_click(&self, handle: WindowId, x: i32, y: i32, button: MouseButton);
    /// Ask the window to close. Does not wait for it to go away.
    fn close_window(&self, handle: WindowId);
}

/// Create the platform appropriate for the current OS.
pub fn create_platform(force_stub: bool) -> Arc<dyn Platform> {
    if force_stub {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        return Arc::new(stub::StubPlatform::new(stub::default_monitors()));
    }
    #[cfg(target_os = "windows")]
    {
        logger::register_prefix("win32", logger::COLOR_GRAY);
        return Arc::new(win32::Win32Platform::new());
    }
    #[cfg(all(target_os = "linux", feature = "x11"))]
    {
        logger::register_prefix("x11", logger::COLOR_GRAY);
        match x11::X11Platform::connect() {
            Ok(p) => return Arc::new(p),
            Err(e) => logger::error_p("x11", &format!("cannot open display, using stub: {}", e)),
        }
    }
    simulated_fallback()
}

/// Start `executable` detached from us with its output discarded.
#[cfg(any(target_os = "windows", all(target_os = "linux", feature = "x11")))]
fn spawn_detached(executable: &str, args: &[String]) -> io::Result<()> {
    use std::process::{Command, Stdio};

    let mut cmd = Command::new(executable);
    cmd.args(args).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
    #[cfg(target_os = "linux")]
    {
        if std::env::var_os("DISPLAY").is_none() {
            cmd.env("DISPLAY", ":0");
        }
    }
    cmd.spawn().map(drop)
}

fn simulated_fallback() -> Arc<dyn Platform> {
    logger::register_prefix("stub", logger::COLOR_GRAY);
    logger::warn("no native window backend in this build, running against the simulated desktop");
    Arc::new(stub::StubPlatform::new(stub::default_monitors()))
}
