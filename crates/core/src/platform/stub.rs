use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::keymap::{Key, Modifiers};
use crate::logger;
use crate::types::*;
use super::Platform;

/// Two side-by-side 1080p screens.
pub fn default_monitors() -> Vec<Rect> {
    vec![Rect::new(0, 0, 1920, 1080), Rect::new(1920, 0, 1920, 1080)]
}

/// Every observable call made against the simulated desktop, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubEvent {
    Spawn { executable: String, args: Vec<String> },
    Move(WindowId, Rect),
    Key(WindowId, Key, Modifiers),
    Click(WindowId, i32, i32, MouseButton),
    Close(WindowId),
}

#[derive(Debug, Clone)]
pub struct StubWindow {
    pub pid: ProcessId,
    pub process: String,
    pub url: String,
    pub bounds: Rect,
    pub fullscreen: bool,
}

struct Desktop {
    monitors: Vec<Rect>,
    windows: BTreeMap<WindowId, StubWindow>,
    events: Vec<StubEvent>,
    windows_per_spawn: usize,
    next_window: WindowId,
    next_pid: ProcessId,
}

/// In-memory desktop: spawned browsers open a restored window on the first
/// monitor, F11 toggles full-screen onto the monitor under the window, and
/// moving a full-screen window drops it back to a restored one.
pub struct StubPlatform {
    desktop: Mutex<Desktop>,
}

impl StubPlatform {
    pub fn new(mut monitors: Vec<Rect>) -> Self {
        sort_monitors(&mut monitors);
        StubPlatform {
            desktop: Mutex::new(Desktop {
                monitors,
                windows: BTreeMap::new(),
                events: Vec::new(),
                windows_per_spawn: 1,
                next_window: 10001,
                next_pid: 4001,
            }),
        }
    }

    fn desktop(&self) -> MutexGuard<'_, Desktop> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.desktop.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the monitor layout (hot-plug simulation).
    pub fn set_monitors(&self, mut monitors: Vec<Rect>) {
        sort_monitors(&mut monitors);
        self.desktop().monitors = monitors;
    }

    /// How many windows each spawn produces: 0 simulates a slow start,
    /// 2 or more an ambiguous launch.
    pub fn set_windows_per_spawn(&self, n: usize) {
        self.desktop().windows_per_spawn = n;
    }

    /// Remove a window without a close request (crash simulation).
    pub fn crash(&self, handle: WindowId) {
        self.desktop().windows.remove(&handle);
    }

    /// Add a window that no slot launched.
    pub fn open_foreign(&self, process: &str, url: &str) -> WindowId {
        let mut d = self.desktop();
        let area = d.monitors.first().copied().unwrap_or_default();
        let pid = d.next_pid;
        d.next_pid += 1;
        d.add_window(pid, process, url, restored(area))
    }

    pub fn windows(&self) -> Vec<(WindowId, StubWindow)> {
        self.desktop().windows.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    pub fn window(&self, handle: WindowId) -> Option<StubWindow> {
        self.desktop().windows.get(&handle).cloned()
    }

    pub fn events(&self) -> Vec<StubEvent> {
        self.desktop().events.clone()
    }

    pub fn take_events(&self) -> Vec<StubEvent> {
        std::mem::take(&mut self.desktop().events)
    }
}

impl Desktop {
    fn add_window(&mut self, pid: ProcessId, process: &str, url: &str, bounds: Rect) -> WindowId {
        let id = self.next_window;
        self.next_window += 1;
        self.windows.insert(id, StubWindow {
            pid,
            process: process.to_string(),
            url: url.to_string(),
            bounds,
            fullscreen: false,
        });
        id
    }

    fn monitor_under(&self, area: Rect) -> Rect {
        let cx = area.left + area.width / 2;
        let cy = area.top + area.height / 2;
        self.monitors
            .iter()
            .find(|m| cx >= m.left && cx < m.right() && cy >= m.top && cy < m.bottom())
            .or(self.monitors.first())
            .copied()
            .unwrap_or(area)
    }
}

/// A restored browser window sits inset from the monitor edges.
fn restored(area: Rect) -> Rect {
    Rect::new(area.left + 40, area.top + 40, area.width * 2 / 3, area.height * 2 / 3)
}

impl Platform for StubPlatform {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn enumerate_monitors(&self) -> Vec<Rect> {
        self.desktop().monitors.clone()
    }

    fn spawn(&self, executable: &str, args: &[String]) -> io::Result<()> {
        logger::info_p("stub", &format!("spawn(\"{}\", {:?})", executable, args));
        let process = Path::new(executable)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "empty executable name"))?;
        let url = args.iter().find(|a| !a.starts_with("--")).cloned().unwrap_or_default();

        let mut d = self.desktop();
        d.events.push(StubEvent::Spawn { executable: executable.to_string(), args: args.to_vec() });
        let area = d.monitors.first().copied().unwrap_or(Rect::new(0, 0, 1280, 800));
        let pid = d.next_pid;
        d.next_pid += 1;
        for _ in 0..d.windows_per_spawn {
            d.add_window(pid, &process, &url, restored(area));
        }
        Ok(())
    }

    fn enumerate_windows(&self, process_name: &str) -> Vec<(ProcessId, WindowId)> {
        self.desktop()
            .windows
            .iter()
            .filter(|(_, w)| w.process.eq_ignore_ascii_case(process_name))
            .map(|(id, w)| (w.pid, *id))
            .collect()
    }

    fn is_window_valid(&self, handle: WindowId) -> bool {
        self.desktop().windows.contains_key(&handle)
    }

    fn is_fullscreen(&self, handle: WindowId) -> bool {
        self.desktop().windows.get(&handle).is_some_and(|w| w.fullscreen)
    }

    fn move_window(&self, handle: WindowId, area: Rect) {
        logger::info_p("stub", &format!("win({}).move({})", handle, area));
        let mut d = self.desktop();
        d.events.push(StubEvent::Move(handle, area));
        if let Some(w) = d.windows.get_mut(&handle) {
            w.fullscreen = false;
            w.bounds = area;
        }
    }

    fn get_window_bounds(&self, handle: WindowId) -> Option<Rect> {
        self.desktop().windows.get(&handle).map(|w| w.bounds)
    }

    fn send_key(&self, handle: WindowId, key: Key, modifiers: Modifiers) {
        logger::debug_p("stub", &format!("win({}).key({:?}, {:?})", handle, key, modifiers));
        let mut d = self.desktop();
        d.events.push(StubEvent::Key(handle, key, modifiers));
        if key != Key::FULLSCREEN || modifiers != Modifiers::NONE {
            return;
        }
        let Some(bounds) = d.windows.get(&handle).map(|w| w.bounds) else { return };
        let monitor = d.monitor_under(bounds);
        if let Some(w) = d.windows.get_mut(&handle) {
            w.fullscreen = !w.fullscreen;
            w.bounds = if w.fullscreen { monitor } else { restored(monitor) };
        }
    }

    fn send_click(&self, handle: WindowId, x: i32, y: i32, button: MouseButton) {
        logger::info_p("stub", &format!("win({}).click({}, {}, {:?})", handle, x, y, button));
        self.desktop().events.push(StubEvent::Click(handle, x, y, button));
    }

    fn close_window(&self, handle: WindowId) {
        logger::info_p("stub", &format!("win({}).close()", handle));
        let mut d = self.desktop();
        d.events.push(StubEvent::Close(handle));
        d.windows.remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_opens_restored_window_on_first_monitor() {
        let p = StubPlatform::new(default_monitors());
        p.spawn("/usr/bin/chromium", &["https://a.example".into(), "--new-window".into()]).unwrap();
        let windows = p.enumerate_windows("chromium");
        assert_eq!(windows.len(), 1);
        let w = p.window(windows[0].1).unwrap();
        assert_eq!(w.url, "https://a.example");
        assert!(!w.fullscreen);
        assert!(!w.bounds.approximately(&default_monitors()[0]));
    }

    #[test]
    fn f11_fills_the_monitor_under_the_window() {
        let p = StubPlatform::new(default_monitors());
        p.spawn("chromium", &[]).unwrap();
        let (_, id) = p.enumerate_windows("chromium")[0];
        p.move_window(id, default_monitors()[1]);
        p.send_key(id, Key::FULLSCREEN, Modifiers::NONE);
        assert!(p.is_fullscreen(id));
        assert_eq!(p.get_window_bounds(id), Some(default_monitors()[1]));

        p.move_window(id, default_monitors()[0]);
        assert!(!p.is_fullscreen(id));
    }

    #[test]
    fn closed_and_crashed_windows_are_invalid() {
        let p = StubPlatform::new(default_monitors());
        p.set_windows_per_spawn(2);
        p.spawn("chromium", &[]).unwrap();
        let ids: Vec<_> = p.enumerate_windows("chromium").into_iter().map(|(_, w)| w).collect();
        assert_eq!(ids.len(), 2);
        p.close_window(ids[0]);
        p.crash(ids[1]);
        assert!(!p.is_window_valid(ids[0]));
        assert!(!p.is_window_valid(ids[1]));
        assert_eq!(p.events().last(), Some(&StubEvent::Close(ids[0])));
    }
}
