use std::rc::Rc;
use std::sync::Arc;
use std::time::SystemTime;

use crate::desired::{assign_monitors, DesiredState, DesiredStateEntry};
use crate::hooks::{Controls, GlobalHook};
use crate::launch::LaunchError;
use crate::logger;
use crate::platform::Platform;
use crate::settings::{MismatchPolicy, Settings};
use crate::types::*;
use crate::watch::{Action, DispatchedAction, WatchSet};
use crate::window::{ManagedWindow, WindowEnv};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("monitor count mismatch: expected {expected}, found {found}")]
    MonitorMismatch { expected: usize, found: usize },
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed,
    /// The monitor count was wrong under `MismatchPolicy::None`; every
    /// window was closed.
    Cleared,
    /// A launch could not be verified. Every browser window was closed and
    /// the next pass rebuilds the slots from the last applied state.
    Reset,
}

/// Close every window of `process_name`, tracked or not.
pub fn close_all_existing(platform: &dyn Platform, process_name: &str) {
    let windows = platform.enumerate_windows(process_name);
    if !windows.is_empty() {
        logger::info(&format!("closing {} {} window(s)", windows.len(), process_name));
    }
    for (_, handle) in windows {
        platform.close_window(handle);
    }
}

/// How `install` treats windows that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Install {
    /// A new desired state: entries are re-read and watches re-armed.
    Apply,
    /// Same desired state on a different monitor layout.
    Relayout,
}

/// Owns the managed windows and drives them toward the desired state.
pub struct Reconciler {
    settings: Settings,
    env: WindowEnv,
    windows: Vec<ManagedWindow>,
    desired: DesiredState,
    watches: WatchSet,
    on_tick: Option<Rc<dyn GlobalHook>>,
    global_tick: usize,
    controls: Controls,
    previous_monitors: Option<Vec<Rect>>,
    rebuild_pending: bool,
    ticks: u64,
    last_tick: Option<chrono::DateTime<chrono::Local>>,
}

impl Reconciler {
    pub fn new(settings: Settings, platform: Arc<dyn Platform>, controls: Controls) -> Self {
        logger::register_prefix("watch", logger::COLOR_GREEN);
        Reconciler {
            env: WindowEnv::new(platform, &settings),
            settings,
            windows: Vec::new(),
            desired: DesiredState::default(),
            watches: WatchSet::default(),
            on_tick: None,
            global_tick: 0,
            controls,
            previous_monitors: None,
            rebuild_pending: false,
            ticks: 0,
            last_tick: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Swap in reloaded settings; bound windows are kept.
    pub fn set_settings(&mut self, settings: Settings) {
        self.env = WindowEnv::new(Arc::clone(&self.env.platform), &settings);
        self.settings = settings;
    }

    pub fn platform(&self) -> &dyn Platform {
        self.env.platform.as_ref()
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    pub fn windows(&self) -> &[ManagedWindow] {
        &self.windows
    }

    pub fn global_tick(&self) -> usize {
        self.global_tick
    }

    pub fn status(&self) -> Status {
        Status {
            slots: self.windows.iter().map(ManagedWindow::status).collect(),
            monitors: self.previous_monitors.clone().unwrap_or_default(),
            expected_monitors: self.settings.monitors,
            ticks: self.ticks,
            last_tick: self.last_tick,
            error: None,
        }
    }

    /// Make `desired` the new target and run one pass to materialize it.
    pub fn apply(&mut self, desired: DesiredState) -> Result<TickOutcome, ReconcileError> {
        self.desired = desired;
        self.rebuild_pending = false;
        let monitors = self.platform().enumerate_monitors();
        self.install(&monitors, Install::Apply);
        self.tick()
    }

    /// Derive the window collection from the current desired state. Windows
    /// showing the same URL are reused unless the entry forces a reload;
    /// everything not reused is closed before the new set takes over.
    ///
    /// A relayout reuses by URL regardless of `force_reload` and leaves
    /// reused windows and all watch timers untouched: the desired state did
    /// not change, only the monitors did.
    fn install(&mut self, monitors: &[Rect], mode: Install) {
        let now = SystemTime::now();
        let mut previous = std::mem::take(&mut self.windows);

        let mut enabled: Vec<&DesiredStateEntry> = self.desired.entries.iter().filter(|e| e.enabled).collect();
        enabled.sort_by_key(|e| e.key);
        let resolved = assign_monitors(&enabled);

        let mut next = Vec::with_capacity(enabled.len());
        for (entry, monitor) in enabled.into_iter().zip(resolved) {
            if monitor >= monitors.len() {
                logger::debug(&format!(
                    "dropping {} (monitor {} of {})",
                    entry.url,
                    monitor,
                    monitors.len()
                ));
                continue;
            }
            let reused = (mode == Install::Relayout || !entry.force_reload)
                .then(|| previous.iter().position(|w| w.url() == entry.url))
                .flatten();
            match reused {
                Some(i) => {
                    let mut window = previous.remove(i);
                    if mode == Install::Apply {
                        window.update_from_entry(entry, monitor, now);
                    }
                    next.push(window);
                }
                None => next.push(ManagedWindow::from_entry(entry, monitor, now)),
            }
        }

        for mut stale in previous {
            stale.close(self.env.platform.as_ref());
        }

        next.sort_by_key(|w| w.monitor());
        self.windows = next;
        if mode == Install::Apply {
            self.watches = WatchSet::from_specs(&self.desired.watches, now);
            self.on_tick = self.desired.on_tick.clone();
        }
    }

    /// One reconciliation pass.
    pub fn tick(&mut self) -> Result<TickOutcome, ReconcileError> {
        let monitors = self.platform().enumerate_monitors();
        self.ticks += 1;
        self.last_tick = Some(chrono::Local::now());

        if self.rebuild_pending {
            self.rebuild_pending = false;
            logger::info("rebuilding windows after reset");
            self.windows.clear();
            self.install(&monitors, Install::Apply);
        } else if let Some(previous) = &self.previous_monitors {
            if !same_topology(previous, &monitors) {
                logger::info(&format!(
                    "monitor layout changed: {} -> {} monitor(s)",
                    previous.len(),
                    monitors.len()
                ));
                self.install(&monitors, Install::Relayout);
            }
        }
        self.previous_monitors = Some(monitors.clone());

        if monitors.len() != self.settings.monitors {
            match self.settings.monitor_mode {
                MismatchPolicy::Fail => {
                    return Err(ReconcileError::MonitorMismatch {
                        expected: self.settings.monitors,
                        found: monitors.len(),
                    });
                }
                MismatchPolicy::None => {
                    if !self.windows.is_empty() {
                        logger::warn(&format!(
                            "expected {} monitor(s), found {}; closing all windows",
                            self.settings.monitors,
                            monitors.len()
                        ));
                    }
                    self.close_tracked();
                    return Ok(TickOutcome::Cleared);
                }
                MismatchPolicy::Pass => self.clamp(monitors.len()),
            }
        }

        for i in 0..self.windows.len() {
            if let Err(e) = self.tick_window(i, &monitors) {
                return Ok(self.reset(e));
            }
        }

        let now = SystemTime::now();
        let mut fired: Vec<DispatchedAction> = Vec::new();
        for window in &mut self.windows {
            fired.extend(window.poll_watches(now));
        }
        fired.extend(self.watches.evaluate(now));
        for action in &fired {
            if let Err(e) = self.dispatch(action) {
                return Ok(self.reset(e));
            }
        }

        self.run_global_hook();
        Ok(TickOutcome::Completed)
    }

    fn owned_handles_except(&self, index: usize) -> Vec<WindowId> {
        self.windows
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .filter_map(|(_, w)| w.handle())
            .collect()
    }

    fn tick_window(&mut self, index: usize, monitors: &[Rect]) -> Result<(), LaunchError> {
        let excluded = self.owned_handles_except(index);
        let env = &self.env;
        let window = &mut self.windows[index];

        if !window.probe(env.platform.as_ref()) {
            window.start(env, &excluded)?;
        }
        let mut corrected = false;
        if let Some(area) = window.monitor().and_then(|m| monitors.get(m)) {
            if !window.in_position(env.platform.as_ref(), area) {
                window.correct_position(env, area);
                corrected = true;
            }
        }
        // A correction already sent its own burst and refilled the budget
        if !corrected {
            window.nudge(env);
        }
        window.run_tick_hook(env);
        self.apply_tick_sync();
        Ok(())
    }

    fn dispatch(&mut self, fired: &DispatchedAction) -> Result<(), LaunchError> {
        for &target in &fired.targets {
            let slots: Vec<usize> = (0..self.windows.len())
                .filter(|&i| self.windows[i].monitor() == Some(target))
                .collect();
            if slots.is_empty() {
                logger::debug_p("watch", &format!("no window on monitor {}", target));
            }
            for i in slots {
                match fired.action {
                    Action::Reset => {
                        logger::info_p("watch", &format!("resetting {}", self.windows[i].url()));
                        let excluded = self.owned_handles_except(i);
                        self.windows[i].start(&self.env, &excluded)?;
                    }
                    Action::Refresh => {
                        logger::info_p("watch", &format!("refreshing {}", self.windows[i].url()));
                        self.windows[i].refresh(&self.env);
                    }
                }
            }
        }
        Ok(())
    }

    fn run_global_hook(&mut self) {
        let current = self.global_tick;
        self.global_tick = current + 1;
        if let Some(hook) = self.on_tick.clone() {
            match hook.call(current) {
                Ok(Some(true)) => self.global_tick = 0,
                Ok(_) => {}
                Err(e) => logger::warn(&format!("global OnTick failed: {:#}", e)),
            }
        }
        self.apply_tick_sync();
    }

    fn apply_tick_sync(&mut self) {
        if let Some(value) = self.controls.take_tick_sync() {
            for window in &mut self.windows {
                window.set_tick(value);
            }
        }
    }

    /// Close and drop windows assigned past the last available monitor.
    fn clamp(&mut self, available: usize) {
        let platform = Arc::clone(&self.env.platform);
        self.windows.retain_mut(|w| {
            let keep = w.monitor().is_some_and(|m| m < available);
            if !keep {
                logger::warn(&format!("monitor {:?} unavailable, closing {}", w.monitor(), w.url()));
                w.close(platform.as_ref());
            }
            keep
        });
    }

    fn close_tracked(&mut self) {
        for mut window in self.windows.drain(..) {
            window.close(self.env.platform.as_ref());
        }
    }

    /// Answer an unverifiable launch: close every browser window, forget
    /// all handles and rebuild on the next pass.
    fn reset(&mut self, cause: LaunchError) -> TickOutcome {
        logger::warn(&format!("failed to register window and will reset: {}", cause));
        close_all_existing(self.env.platform.as_ref(), self.env.broker.process_name());
        for window in &mut self.windows {
            window.forget();
        }
        self.rebuild_pending = true;
        TickOutcome::Reset
    }

    /// Close and relaunch the slot at `index` (console request).
    pub fn relaunch(&mut self, index: usize) -> TickOutcome {
        if index >= self.windows.len() {
            return TickOutcome::Completed;
        }
        let excluded = self.owned_handles_except(index);
        match self.windows[index].start(&self.env, &excluded) {
            Ok(()) => TickOutcome::Completed,
            Err(e) => self.reset(e),
        }
    }

    /// Close everything this instance knows about plus any stray browser windows.
    pub fn shutdown(&mut self) {
        self.close_tracked();
        close_all_existing(self.env.platform.as_ref(), &self.settings.process_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::keymap::Key;
    use crate::platform::stub::{default_monitors, StubEvent, StubPlatform};
    use crate::watch::WatchSpec;
    use crate::window::NUDGE_BURST;

    fn settings(monitors: usize, mode: MismatchPolicy) -> Settings {
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

    fn reconciler(mode: MismatchPolicy) -> (Arc<StubPlatform>, Reconciler) {
        let platform = Arc::new(StubPlatform::new(default_monitors()));
        let r = Reconciler::new(settings(2, mode), platform.clone(), Controls::new());
        (platform, r)
    }

    fn two_boards() -> DesiredState {
        DesiredState::new(vec![
            DesiredStateEntry::new(1, "https://a.example"),
            DesiredStateEntry::new(2, "https://b.example"),
        ])
    }

    fn shifts(events: &[StubEvent], handle: WindowId) -> usize {
        events.iter().filter(|e| matches!(e, StubEvent::Key(h, Key::Shift, _) if *h == handle)).count()
    }

    #[test]
    fn apply_places_each_slot_fullscreen_on_its_monitor() {
        let (platform, mut r) = reconciler(MismatchPolicy::Pass);
        assert_eq!(r.apply(two_boards()).unwrap(), TickOutcome::Completed);

        let monitors = default_monitors();
        for (i, w) in r.windows().iter().enumerate() {
            let handle = w.handle().unwrap();
            assert_eq!(w.monitor(), Some(i));
            assert!(platform.window(handle).unwrap().bounds.approximately(&monitors[i]));
            assert!(platform.is_fullscreen(handle));
        }
        assert_ne!(r.windows()[0].handle(), r.windows()[1].handle());
    }

    #[test]
    fn reapplying_the_same_urls_keeps_the_windows() {
        let (platform, mut r) = reconciler(MismatchPolicy::Pass);
        r.apply(two_boards()).unwrap();
        let before: Vec<_> = r.windows().iter().map(|w| w.handle()).collect();
        r.apply(two_boards()).unwrap();
        let after: Vec<_> = r.windows().iter().map(|w| w.handle()).collect();
        assert_eq!(before, after);
        assert_eq!(platform.windows().len(), 2);
    }

    #[test]
    fn force_reload_launches_a_fresh_window() {
        let (platform, mut r) = reconciler(MismatchPolicy::Pass);
        r.apply(two_boards()).unwrap();
        let old = r.windows()[0].handle();

        let mut desired = two_boards();
        desired.entries[0].force_reload = true;
        r.apply(desired).unwrap();
        assert_ne!(r.windows()[0].handle(), old);
        assert_eq!(platform.windows().len(), 2);
    }

    #[test]
    fn crashed_window_is_relaunched_on_the_next_pass() {
        let (platform, mut r) = reconciler(MismatchPolicy::Pass);
        r.apply(two_boards()).unwrap();
        let crashed = r.windows()[1].handle().unwrap();
        platform.crash(crashed);

        assert_eq!(r.tick().unwrap(), TickOutcome::Completed);
        let replacement = r.windows()[1].handle().unwrap();
        assert_ne!(replacement, crashed);
        assert!(platform.is_fullscreen(replacement));
    }

    #[test]
    fn ambiguous_launch_resets_then_rebuilds() {
        let (platform, mut r) = reconciler(MismatchPolicy::Pass);
        platform.open_foreign("chromium", "https://stray.example");
        assert_eq!(r.apply(two_boards()).unwrap(), TickOutcome::Reset);
        assert!(platform.windows().is_empty());
        assert!(r.windows().iter().all(|w| w.handle().is_none()));

        assert_eq!(r.tick().unwrap(), TickOutcome::Completed);
        assert_eq!(platform.windows().len(), 2);
    }

    #[test]
    fn fail_policy_reports_mismatch() {
        let (platform, mut r) = reconciler(MismatchPolicy::Fail);
        platform.set_monitors(vec![default_monitors()[0]]);
        let err = r.apply(two_boards()).unwrap_err();
        assert!(matches!(err, ReconcileError::MonitorMismatch { expected: 2, found: 1 }));
    }

    #[test]
    fn none_policy_clears_until_layout_returns() {
        let (platform, mut r) = reconciler(MismatchPolicy::None);
        r.apply(two_boards()).unwrap();
        platform.set_monitors(vec![default_monitors()[0]]);
        assert_eq!(r.tick().unwrap(), TickOutcome::Cleared);
        assert!(r.windows().is_empty());
        assert!(platform.windows().is_empty());

        platform.set_monitors(default_monitors());
        assert_eq!(r.tick().unwrap(), TickOutcome::Completed);
        assert_eq!(r.windows().len(), 2);
    }

    #[test]
    fn pass_policy_drops_slots_past_the_last_monitor() {
        let (platform, mut r) = reconciler(MismatchPolicy::Pass);
        r.apply(two_boards()).unwrap();
        platform.set_monitors(vec![default_monitors()[0]]);
        assert_eq!(r.tick().unwrap(), TickOutcome::Completed);
        assert_eq!(r.windows().len(), 1);
        assert_eq!(r.windows()[0].url(), "https://a.example");
        assert_eq!(platform.windows().len(), 1);
    }

    #[test]
    fn synchronise_ticks_applies_to_every_window() {
        let (_, mut r) = reconciler(MismatchPolicy::Pass);
        let controls = r.controls().clone();
        let mut desired = two_boards();
        desired.on_tick = Some(Rc::new(move |_: usize| -> anyhow::Result<Option<bool>> {
            controls.synchronise_ticks(10);
            Ok(None)
        }));
        r.apply(desired).unwrap();
        assert!(r.windows().iter().all(|w| w.tick_count() == 10));
        assert_eq!(r.global_tick(), 1);
    }

    #[test]
    fn correcting_pass_sends_one_burst_and_keeps_the_budget() {
        let (platform, mut r) = reconciler(MismatchPolicy::Pass);
        r.apply(two_boards()).unwrap();
        let handle = r.windows()[0].handle().unwrap();
        assert_eq!(shifts(&platform.take_events(), handle), NUDGE_BURST);
        assert_eq!(r.windows()[0].nudges(), 1);

        r.tick().unwrap();
        assert_eq!(shifts(&platform.take_events(), handle), NUDGE_BURST);
        assert_eq!(r.windows()[0].nudges(), 0);

        r.tick().unwrap();
        assert_eq!(shifts(&platform.take_events(), handle), 0);
    }

    #[test]
    fn layout_change_keeps_forced_windows_and_watch_timers() {
        let (platform, mut r) = reconciler(MismatchPolicy::Pass);
        let mut desired = two_boards();
        desired.entries[0].force_reload = true;
        desired.entries[0].watches.push(WatchSpec::interval(Duration::from_secs(60), Action::Refresh));
        r.apply(desired).unwrap();
        let handles: Vec<_> = r.windows().iter().map(|w| w.handle()).collect();
        let armed = r.windows()[0].watches()[0].timestamp();
        platform.take_events();

        std::thread::sleep(Duration::from_millis(5));
        let moved = vec![default_monitors()[0], Rect::new(1920, 0, 2560, 1440)];
        platform.set_monitors(moved.clone());
        assert_eq!(r.tick().unwrap(), TickOutcome::Completed);

        let after: Vec<_> = r.windows().iter().map(|w| w.handle()).collect();
        assert_eq!(after, handles);
        assert_eq!(r.windows()[0].watches()[0].timestamp(), armed);
        let events = platform.take_events();
        assert!(!events.iter().any(|e| matches!(e, StubEvent::Spawn { .. } | StubEvent::Close(_))));
        let second = handles[1].unwrap();
        assert!(platform.window(second).unwrap().bounds.approximately(&moved[1]));
    }
}
