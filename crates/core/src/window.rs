use std::rc::Rc;
use std::sync::Arc;
use std::time::SystemTime;

use crate::desired::DesiredStateEntry;
use crate::hooks::{WindowContext, WindowHook};
use crate::keymap::{Key, Modifiers};
use crate::launch::{LaunchBroker, LaunchError};
use crate::logger;
use crate::platform::Platform;
use crate::settings::Settings;
use crate::sleep;
use crate::types::*;
use crate::watch::{self, DispatchedAction, Watch};

/// Move attempts per correction before giving up until the next pass.
pub const PLACEMENT_ATTEMPTS: usize = 5;
/// Shift presses per nudge burst.
pub const NUDGE_BURST: usize = 10;

/// Everything window operations need from the outside world.
pub struct WindowEnv {
    pub platform: Arc<dyn Platform>,
    pub broker: LaunchBroker,
    pub key_delay_ms: u64,
    pub settle_ms: u64,
    pub nudges: u32,
}

impl WindowEnv {
    pub fn new(platform: Arc<dyn Platform>, settings: &Settings) -> Self {
        WindowEnv {
            platform,
            broker: LaunchBroker::new(settings),
            key_delay_ms: settings.key_delay_ms,
            settle_ms: settings.settle_ms,
            nudges: settings.nudges,
        }
    }

    fn press(&self, handle: WindowId, key: Key, modifiers: Modifiers) {
        self.platform.send_key(handle, key, modifiers);
        sleep::sleep_ms(self.key_delay_ms);
    }
}

/// One display slot and the browser window bound to it.
///
/// Lifecycle: unbound (no handle) until a launch succeeds, bound while the
/// OS still reports the handle as a live window, and closed explicitly
/// through [`ManagedWindow::close`] before the slot is dropped.
pub struct ManagedWindow {
    url: String,
    monitor: Option<usize>,
    pid: Option<ProcessId>,
    handle: Option<WindowId>,
    tick_count: usize,
    watches: Vec<Watch>,
    cache_bust: bool,
    nudges: u32,
    on_tick: Option<Rc<dyn WindowHook>>,
    on_open: Option<Rc<dyn WindowHook>>,
}

impl ManagedWindow {
    pub fn new(url: impl Into<String>, monitor: Option<usize>) -> Self {
        ManagedWindow {
            url: url.into(),
            monitor,
            pid: None,
            handle: None,
            tick_count: 0,
            watches: Vec::new(),
            cache_bust: false,
            nudges: 0,
            on_tick: None,
            on_open: None,
        }
    }

    pub fn from_entry(entry: &DesiredStateEntry, monitor: usize, now: SystemTime) -> Self {
        let mut w = ManagedWindow::new(entry.url.clone(), Some(monitor));
        w.update_from_entry(entry, monitor, now);
        w
    }

    /// Re-apply the configurable parts of `entry`, keeping the bound window.
    pub fn update_from_entry(&mut self, entry: &DesiredStateEntry, monitor: usize, now: SystemTime) {
        self.monitor = Some(monitor);
        self.cache_bust = entry.cache_bust;
        self.on_tick = entry.on_tick.clone();
        self.on_open = entry.on_open.clone();
        self.watches = entry.watches.iter().map(|s| Watch::from_spec(s, Some(monitor), now)).collect();
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn monitor(&self) -> Option<usize> {
        self.monitor
    }

    pub fn handle(&self) -> Option<WindowId> {
        self.handle
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    pub fn tick_count(&self) -> usize {
        self.tick_count
    }

    pub fn set_tick(&mut self, value: usize) {
        self.tick_count = value;
    }

    pub fn nudges(&self) -> u32 {
        self.nudges
    }

    pub fn watches(&self) -> &[Watch] {
        &self.watches
    }

    pub fn status(&self) -> SlotStatus {
        SlotStatus {
            monitor: self.monitor,
            url: self.url.clone(),
            handle: self.handle,
            tick: self.tick_count,
            nudges: self.nudges,
        }
    }

    /// URL to open, with the cache-busting token appended when enabled.
    pub fn launch_url(&self) -> String {
        if !self.cache_bust {
            return self.url.clone();
        }
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.url, sep, watch::newest_timestamp_millis(&self.watches))
    }

    /// Re-probe the bound handle. A dead window drops back to unbound.
    pub fn probe(&mut self, platform: &dyn Platform) -> bool {
        let Some(handle) = self.handle else { return false };
        if platform.is_window_valid(handle) {
            return true;
        }
        logger::warn(&format!("window {} for {} has gone away", handle, self.url));
        self.forget();
        false
    }

    /// Launch a fresh window, closing the current one first if it is alive.
    /// `excluded` holds the handles owned by every other slot.
    pub fn start(&mut self, env: &WindowEnv, excluded: &[WindowId]) -> Result<(), LaunchError> {
        let mut excluded = excluded.to_vec();
        // A window we just asked to close may linger past the load delay
        if let Some(old) = self.handle.filter(|h| env.platform.is_window_valid(*h)) {
            excluded.push(old);
        }
        self.close(env.platform.as_ref());

        let (pid, handle) = env.broker.launch(env.platform.as_ref(), &self.launch_url(), &excluded)?;
        self.pid = Some(pid);
        self.handle = Some(handle);

        if let Some(hook) = self.on_open.clone() {
            let mut ctx = self.context(env, self.tick_count);
            if let Err(e) = hook.call(self.tick_count, &mut ctx) {
                logger::warn(&format!("OnOpen for {} failed: {:#}", self.url, e));
            }
            self.tick_count = ctx.tick;
        }
        Ok(())
    }

    /// Ask the OS to close the window and release the handle. Does not wait.
    pub fn close(&mut self, platform: &dyn Platform) {
        if let Some(handle) = self.handle {
            if platform.is_window_valid(handle) {
                platform.close_window(handle);
            }
        }
        self.forget();
    }

    /// Release the handle without touching the OS window.
    pub fn forget(&mut self) {
        self.handle = None;
        self.pid = None;
    }

    /// On the right monitor and full-screen.
    pub fn in_position(&self, platform: &dyn Platform, area: &Rect) -> bool {
        let Some(handle) = self.handle else { return false };
        platform.get_window_bounds(handle).is_some_and(|b| b.approximately(area))
            && platform.is_fullscreen(handle)
    }

    /// Move the window onto `area` and full-screen it, retrying a bounded
    /// number of times. Returns true if the window ended up in place; a
    /// window that could not be placed keeps running where it is.
    pub fn correct_position(&mut self, env: &WindowEnv, area: &Rect) -> bool {
        let Some(handle) = self.handle else { return false };
        let platform = env.platform.as_ref();

        let mut attempts = 0;
        while !self.in_position(platform, area) && attempts < PLACEMENT_ATTEMPTS {
            attempts += 1;
            platform.move_window(handle, *area);
            sleep::sleep_ms(env.settle_ms);
            // Moving drops full-screen, so this only fires when it is needed
            if !platform.is_fullscreen(handle) {
                env.press(handle, Key::FULLSCREEN, Modifiers::NONE);
            }
        }

        let placed = self.in_position(platform, area);
        if !placed {
            logger::warn(&format!(
                "could not place {} on monitor {:?} after {} attempts",
                self.url, self.monitor, PLACEMENT_ATTEMPTS
            ));
        }

        // The browser shows an "exit full screen" hint after F11; key
        // presses make it go away sooner
        self.send_nudge(env, handle);
        self.nudges = env.nudges;
        placed
    }

    /// Count down the nudge budget, sending one burst per pass while it lasts.
    pub fn nudge(&mut self, env: &WindowEnv) {
        let Some(handle) = self.handle else { return };
        if self.nudges > 0 {
            self.nudges -= 1;
            self.send_nudge(env, handle);
        }
    }

    fn send_nudge(&self, env: &WindowEnv, handle: WindowId) {
        for _ in 0..NUDGE_BURST {
            env.press(handle, Key::Shift, Modifiers::NONE);
        }
    }

    /// Run the per-window hook and advance the tick count.
    pub fn run_tick_hook(&mut self, env: &WindowEnv) {
        let current = self.tick_count;
        let Some(hook) = self.on_tick.clone() else {
            self.tick_count = current + 1;
            return;
        };
        let mut ctx = self.context(env, current + 1);
        match hook.call(current, &mut ctx) {
            Ok(Some(true)) => self.tick_count = 0,
            Ok(_) => self.tick_count = ctx.tick,
            Err(e) => {
                logger::warn(&format!("OnTick for {} failed: {:#}", self.url, e));
                self.tick_count = ctx.tick;
            }
        }
    }

    /// Poll this window's own watches.
    pub fn poll_watches(&mut self, now: SystemTime) -> Vec<DispatchedAction> {
        watch::evaluate(&mut self.watches, now)
    }

    pub fn refresh(&self, env: &WindowEnv) {
        if let Some(handle) = self.handle {
            env.press(handle, Key::REFRESH, Modifiers::NONE);
        }
    }

    fn context(&self, env: &WindowEnv, tick: usize) -> WindowContext {
        WindowContext {
            tick,
            monitor: self.monitor,
            url: self.url.clone(),
            handle: self.handle,
            platform: Arc::clone(&env.platform),
            key_delay_ms: env.key_delay_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use crate::platform::stub::{default_monitors, StubEvent, StubPlatform};
    use crate::watch::{Action, WatchSpec};

    fn env(platform: Arc<StubPlatform>) -> WindowEnv {
        let settings = Settings {
            executable_name: "chromium".into(),
            process_name: "chromium".into(),
            load_time: 0.0,
            key_delay_ms: 0,
            settle_ms: 0,
            nudges: 2,
            ..Settings::default()
        };
        WindowEnv::new(platform, &settings)
    }

    #[test]
    fn cache_bust_appends_token_with_the_right_separator() {
        let now = SystemTime::now();
        let mut entry = DesiredStateEntry::new(0, "https://a.example/board");
        entry.cache_bust = true;
        entry.watches.push(WatchSpec::file("board.json", Action::Reset));
        let w = ManagedWindow::from_entry(&entry, 0, now);
        let token = watch::newest_timestamp_millis(w.watches());
        assert_eq!(w.launch_url(), format!("https://a.example/board?{}", token));

        entry.url = "https://a.example/board?team=1".into();
        let w = ManagedWindow::from_entry(&entry, 0, now);
        assert_eq!(w.launch_url(), format!("https://a.example/board?team=1&{}", token));

        entry.cache_bust = false;
        let w = ManagedWindow::from_entry(&entry, 0, now);
        assert_eq!(w.launch_url(), "https://a.example/board?team=1");
    }

    #[test]
    fn correction_fullscreens_onto_target_and_nudges() {
        let platform = Arc::new(StubPlatform::new(default_monitors()));
        let env = env(platform.clone());
        let mut w = ManagedWindow::new("https://a.example", Some(1));
        w.start(&env, &[]).unwrap();
        let handle = w.handle().unwrap();
        let target = default_monitors()[1];

        assert!(!w.in_position(platform.as_ref(), &target));
        assert!(w.correct_position(&env, &target));
        assert!(platform.is_fullscreen(handle));
        assert_eq!(w.nudges(), 2);

        let shifts = platform
            .events()
            .iter()
            .filter(|e| matches!(e, StubEvent::Key(_, Key::Shift, _)))
            .count();
        assert_eq!(shifts, NUDGE_BURST);

        w.nudge(&env);
        w.nudge(&env);
        w.nudge(&env);
        assert_eq!(w.nudges(), 0);
    }

    #[test]
    fn probe_unbinds_crashed_window() {
        let platform = Arc::new(StubPlatform::new(default_monitors()));
        let env = env(platform.clone());
        let mut w = ManagedWindow::new("https://a.example", Some(0));
        w.start(&env, &[]).unwrap();
        assert!(w.probe(platform.as_ref()));
        platform.crash(w.handle().unwrap());
        assert!(!w.probe(platform.as_ref()));
        assert_eq!(w.handle(), None);
    }

    #[test]
    fn tick_hook_controls_the_counter() {
        let platform = Arc::new(StubPlatform::new(default_monitors()));
        let env = env(platform);
        let seen = Rc::new(Cell::new(usize::MAX));

        let mut entry = DesiredStateEntry::new(0, "https://a.example");
        let seen_in_hook = Rc::clone(&seen);
        entry.on_tick = Some(Rc::new(move |tick: usize, _: &mut WindowContext| -> anyhow::Result<Option<bool>> {
            seen_in_hook.set(tick);
            Ok(Some(tick == 2))
        }));
        let mut w = ManagedWindow::from_entry(&entry, 0, SystemTime::now());

        w.run_tick_hook(&env);
        w.run_tick_hook(&env);
        assert_eq!((seen.get(), w.tick_count()), (1, 2));
        w.run_tick_hook(&env);
        assert_eq!((seen.get(), w.tick_count()), (2, 0));

        entry.on_tick = Some(Rc::new(|_: usize, ctx: &mut WindowContext| -> anyhow::Result<Option<bool>> {
            ctx.tick = 40;
            Ok(None)
        }));
        w.update_from_entry(&entry, 0, SystemTime::now());
        w.run_tick_hook(&env);
        assert_eq!(w.tick_count(), 40);
    }
}
