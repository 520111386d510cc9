//! Shared fixtures for the integration harnesses.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use libtest_mimic::Trial;

use kiosk_core::hooks::Controls;
use kiosk_core::keymap::{Key, Modifiers};
use kiosk_core::platform::stub::StubPlatform;
use kiosk_core::platform::Platform;
use kiosk_core::reconciler::Reconciler;
use kiosk_core::settings::{MismatchPolicy, Settings};
use kiosk_core::types::*;

/// Wrap an `anyhow` scenario as a libtest-mimic trial.
pub fn trial(name: &str, scenario: fn() -> anyhow::Result<()>) -> Trial {
    Trial::test(name, move || scenario().map_err(|e| format!("{:#}", e).into()))
}

/// Settings tuned for tests: no waits, one nudge burst.
pub fn settings(monitors: usize, mode: MismatchPolicy) -> Settings {
    Settings {
        executable_name: "chromium".into(),
        process_name: "chromium".into(),
        monitors,
        monitor_mode: mode,
        load_time: 0.0,
        key_delay_ms: 0,
        settle_ms: 0,
        nudges: 1,
        ..Settings::default()
    }
}

/// `count` side-by-side 1080p screens.
pub fn screens(count: usize) -> Vec<Rect> {
    (0..count).map(|i| Rect::new(1920 * i as i32, 0, 1920, 1080)).collect()
}

/// A stub desktop with `available` screens and a reconciler expecting `expected`.
pub fn stub_reconciler(available: usize, expected: usize, mode: MismatchPolicy) -> (Arc<StubPlatform>, Reconciler) {
    let platform = Arc::new(StubPlatform::new(screens(available)));
    let reconciler = Reconciler::new(settings(expected, mode), platform.clone(), Controls::new());
    (platform, reconciler)
}

/// Handles bound by the reconciler, in slot order.
pub fn handles(reconciler: &Reconciler) -> Vec<Option<WindowId>> {
    reconciler.windows().iter().map(|w| w.handle()).collect()
}

/// Every call a [`ScriptedPlatform`] received that changes the desktop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Spawn(String),
    Move(WindowId),
    Key(WindowId, Key),
    Click(WindowId),
    Close(WindowId),
}

#[derive(Default)]
struct Script {
    windows: BTreeMap<WindowId, ProcessId>,
    spawns: VecDeque<Vec<(ProcessId, WindowId)>>,
    calls: Vec<Call>,
}

/// A desktop whose windows appear exactly as the test scripts them. Each
/// spawn opens the next queued batch; an empty queue opens nothing.
pub struct ScriptedPlatform {
    monitors: Vec<Rect>,
    script: Mutex<Script>,
}

impl ScriptedPlatform {
    pub fn new(monitors: Vec<Rect>) -> Self {
        ScriptedPlatform { monitors, script: Mutex::new(Script::default()) }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_window(&self, pid: ProcessId, handle: WindowId) {
        self.script().windows.insert(handle, pid);
    }

    pub fn on_spawn(&self, batch: Vec<(ProcessId, WindowId)>) {
        self.script().spawns.push_back(batch);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.clone()
    }
}

impl Platform for ScriptedPlatform {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn enumerate_monitors(&self) -> Vec<Rect> {
        self.monitors.clone()
    }

    fn spawn(&self, _executable: &str, args: &[String]) -> io::Result<()> {
        let mut s = self.script();
        s.calls.push(Call::Spawn(args.first().cloned().unwrap_or_default()));
        if let Some(batch) = s.spawns.pop_front() {
            s.windows.extend(batch.into_iter().map(|(pid, handle)| (handle, pid)));
        }
        Ok(())
    }

    fn enumerate_windows(&self, _process_name: &str) -> Vec<(ProcessId, WindowId)> {
        self.script().windows.iter().map(|(handle, pid)| (*pid, *handle)).collect()
    }

    fn is_window_valid(&self, handle: WindowId) -> bool {
        self.script().windows.contains_key(&handle)
    }

    fn is_fullscreen(&self, _handle: WindowId) -> bool {
        true
    }

    fn move_window(&self, handle: WindowId, _area: Rect) {
        self.script().calls.push(Call::Move(handle));
    }

    fn get_window_bounds(&self, _handle: WindowId) -> Option<Rect> {
        self.monitors.first().copied()
    }

    fn send_key(&self, handle: WindowId, key: Key, _modifiers: Modifiers) {
        self.script().calls.push(Call::Key(handle, key));
    }

    fn send_click(&self, handle: WindowId, _x: i32, _y: i32, _button: MouseButton) {
        self.script().calls.push(Call::Click(handle));
    }

    fn close_window(&self, handle: WindowId) {
        let mut s = self.script();
        s.calls.push(Call::Close(handle));
        s.windows.remove(&handle);
    }
}
