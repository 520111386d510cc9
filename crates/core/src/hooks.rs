use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;

use crate::keymap::{Key, Modifiers};
use crate::platform::Platform;
use crate::sleep;
use crate::types::*;

/// What a window hook sees and may act on while it runs.
#[derive(Clone)]
pub struct WindowContext {
    /// Tick count the window will hold after the hook returns. Hooks may
    /// overwrite it.
    pub tick: usize,
    pub monitor: Option<usize>,
    pub url: String,
    pub handle: Option<WindowId>,
    pub platform: Arc<dyn Platform>,
    pub key_delay_ms: u64,
}

impl WindowContext {
    /// Send `key` to the window. No-op while unbound.
    pub fn press(&self, key: Key, modifiers: Modifiers) {
        if let Some(handle) = self.handle {
            self.platform.send_key(handle, key, modifiers);
            sleep::sleep_ms(self.key_delay_ms);
        }
    }

    pub fn click(&self, x: i32, y: i32, button: MouseButton) {
        if let Some(handle) = self.handle {
            self.platform.send_click(handle, x, y, button);
        }
    }

    pub fn refresh(&self) {
        self.press(Key::REFRESH, Modifiers::NONE);
    }
}

/// Per-window extension point, run once per pass (`OnTick`) or after a
/// launch (`OnOpen`) with the window's current tick count. Returning
/// `Some(true)` from a tick hook resets the window's tick count.
pub trait WindowHook {
    fn call(&self, tick: usize, ctx: &mut WindowContext) -> Result<Option<bool>>;
}

impl<F> WindowHook for F
where
    F: Fn(usize, &mut WindowContext) -> Result<Option<bool>>,
{
    fn call(&self, tick: usize, ctx: &mut WindowContext) -> Result<Option<bool>> {
        self(tick, ctx)
    }
}

/// Extension point run once per pass after every window; receives the
/// global tick count.
pub trait GlobalHook {
    fn call(&self, tick: usize) -> Result<Option<bool>>;
}

impl<F> GlobalHook for F
where
    F: Fn(usize) -> Result<Option<bool>>,
{
    fn call(&self, tick: usize) -> Result<Option<bool>> {
        self(tick)
    }
}

#[derive(Default)]
struct ControlState {
    state_changed: Cell<bool>,
    tick_sync: Cell<Option<usize>>,
}

/// Requests the config side can raise while the reconciler is mid-pass.
/// Cheap to clone; every clone shares the same flags.
#[derive(Clone, Default)]
pub struct Controls {
    inner: Rc<ControlState>,
}

impl Controls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for the desired state to be re-applied before the next natural reload.
    pub fn state_has_changed(&self) {
        self.inner.state_changed.set(true);
    }

    /// Force every window's tick count to `value`.
    pub fn synchronise_ticks(&self, value: usize) {
        self.inner.tick_sync.set(Some(value));
    }

    pub fn take_state_changed(&self) -> bool {
        self.inner.state_changed.replace(false)
    }

    pub fn take_tick_sync(&self) -> Option<usize> {
        self.inner.tick_sync.take()
    }
}
