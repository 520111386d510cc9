use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use crate::hooks::{GlobalHook, WindowHook};
use crate::watch::WatchSpec;

/// One display slot as the configuration describes it.
#[derive(Clone)]
pub struct DesiredStateEntry {
    /// Author-assigned ordering key.
    pub key: i64,
    pub url: String,
    pub monitor: Option<usize>,
    /// Always launch a fresh window, even if one already shows `url`.
    pub force_reload: bool,
    pub enabled: bool,
    pub cache_bust: bool,
    pub watches: Vec<WatchSpec>,
    pub on_tick: Option<Rc<dyn WindowHook>>,
    pub on_open: Option<Rc<dyn WindowHook>>,
}

impl DesiredStateEntry {
    pub fn new(key: i64, url: impl Into<String>) -> Self {
        DesiredStateEntry {
            key,
            url: url.into(),
            monitor: None,
            force_reload: false,
            enabled: true,
            cache_bust: false,
            watches: Vec::new(),
            on_tick: None,
            on_open: None,
        }
    }

    pub fn on_monitor(mut self, monitor: usize) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

impl fmt::Debug for DesiredStateEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DesiredStateEntry")
            .field("key", &self.key)
            .field("url", &self.url)
            .field("monitor", &self.monitor)
            .field("force_reload", &self.force_reload)
            .field("enabled", &self.enabled)
            .field("cache_bust", &self.cache_bust)
            .field("watches", &self.watches)
            .field("on_tick", &self.on_tick.is_some())
            .field("on_open", &self.on_open.is_some())
            .finish()
    }
}

/// A complete desired-state snapshot.
#[derive(Clone, Default)]
pub struct DesiredState {
    pub entries: Vec<DesiredStateEntry>,
    /// Watches not owned by any one window; they need explicit targets.
    pub watches: Vec<WatchSpec>,
    pub on_tick: Option<Rc<dyn GlobalHook>>,
}

impl DesiredState {
    pub fn new(entries: Vec<DesiredStateEntry>) -> Self {
        DesiredState { entries, ..DesiredState::default() }
    }
}

impl fmt::Debug for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DesiredState")
            .field("entries", &self.entries)
            .field("watches", &self.watches)
            .field("on_tick", &self.on_tick.is_some())
            .finish()
    }
}

/// Resolve a monitor for every entry. Explicit indices are kept; the rest
/// take the lowest index no other entry claims, in key order. Returns
/// indices aligned with `entries`.
pub fn assign_monitors(entries: &[&DesiredStateEntry]) -> Vec<usize> {
    let mut claimed: BTreeSet<usize> = entries.iter().filter_map(|e| e.monitor).collect();
    let mut resolved: Vec<Option<usize>> = entries.iter().map(|e| e.monitor).collect();

    let mut unassigned: Vec<usize> = (0..entries.len()).filter(|&i| entries[i].monitor.is_none()).collect();
    unassigned.sort_by_key(|&i| entries[i].key);

    let mut next = 0;
    for i in unassigned {
        while claimed.contains(&next) {
            next += 1;
        }
        claimed.insert(next);
        resolved[i] = Some(next);
    }
    resolved.into_iter().map(|m| m.unwrap_or_default()).collect()
}
