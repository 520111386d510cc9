use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{anyhow, bail, Context, Result};
use mlua::prelude::*;

use crate::desired::{DesiredState, DesiredStateEntry};
use crate::hooks::{Controls, GlobalHook, WindowContext, WindowHook};
use crate::keymap::{Key, Modifiers};
use crate::logger;
use crate::settings::Settings;
use crate::sleep;
use crate::types::*;
use crate::watch::{period_from_secs, Action, WatchSpec};

/// The window a script hook is running for.
struct LuaWindow(WindowContext);

impl LuaWindow {
    fn press(&self, keys: LuaVariadic<String>, modifiers: Modifiers) {
        for name in keys.iter() {
            match name.parse::<Key>() {
                Ok(key) => self.0.press(key, modifiers),
                Err(e) => logger::warn_p("lua", &e.to_string()),
            }
        }
    }
}

impl LuaUserData for LuaWindow {
    fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("Tick", |_, this| Ok(this.0.tick));
        fields.add_field_method_set("Tick", |_, this, tick: usize| {
            this.0.tick = tick;
            Ok(())
        });
        fields.add_field_method_get("Monitor", |_, this| Ok(this.0.monitor));
        fields.add_field_method_get("Url", |_, this| Ok(this.0.url.clone()));
    }

    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("Press", |_, this, keys: LuaVariadic<String>| {
            this.press(keys, Modifiers::NONE);
            Ok(())
        });
        methods.add_method("ShiftPress", |_, this, keys: LuaVariadic<String>| {
            this.press(keys, Modifiers { shift: true, ..Modifiers::NONE });
            Ok(())
        });
        methods.add_method("ControlPress", |_, this, keys: LuaVariadic<String>| {
            this.press(keys, Modifiers { control: true, ..Modifiers::NONE });
            Ok(())
        });
        methods.add_method("AltPress", |_, this, keys: LuaVariadic<String>| {
            this.press(keys, Modifiers { alt: true, ..Modifiers::NONE });
            Ok(())
        });
        methods.add_method(
            "MixedPress",
            |_, this, (shift, control, alt, keys): (bool, bool, bool, LuaVariadic<String>)| {
                this.press(keys, Modifiers { shift, control, alt });
                Ok(())
            },
        );
        methods.add_method("Click", |_, this, (x, y, button): (i32, i32, Option<i64>)| {
            let button = match button {
                None => MouseButton::Left,
                Some(i) => MouseButton::from_index(i)
                    .ok_or_else(|| LuaError::runtime(format!("invalid mouse button {}", i)))?,
            };
            this.0.click(x, y, button);
            Ok(())
        });
        methods.add_method("Refresh", |_, this, ()| {
            this.0.refresh();
            Ok(())
        });
    }
}

/// Helper to convert mlua::Error -> anyhow::Error
fn lua_err(e: mlua::Error) -> anyhow::Error {
    anyhow!("{}", e)
}

fn hook_result(value: LuaValue) -> Option<bool> {
    match value {
        LuaValue::Boolean(b) => Some(b),
        _ => None,
    }
}

enum WindowHookKind {
    /// `OnTick(tick, win)`
    Tick,
    /// `OnOpen(win)`
    Open,
}

/// A script function bound as a window hook.
struct LuaWindowHook {
    lua: Lua,
    func: LuaFunction,
    kind: WindowHookKind,
}

impl WindowHook for LuaWindowHook {
    fn call(&self, tick: usize, ctx: &mut WindowContext) -> Result<Option<bool>> {
        let win = self.lua.create_userdata(LuaWindow(ctx.clone())).map_err(lua_err)?;
        let result = match self.kind {
            WindowHookKind::Tick => self.func.call::<LuaValue>((tick, win.clone())),
            WindowHookKind::Open => self.func.call::<LuaValue>(win.clone()),
        }
        .map_err(lua_err)?;
        ctx.tick = win.borrow::<LuaWindow>().map_err(lua_err)?.0.tick;
        Ok(hook_result(result))
    }
}

/// The configuration table's own `OnTick(tick)`.
struct LuaGlobalHook {
    func: LuaFunction,
}

impl GlobalHook for LuaGlobalHook {
    fn call(&self, tick: usize) -> Result<Option<bool>> {
        let result = self.func.call::<LuaValue>(tick).map_err(lua_err)?;
        Ok(hook_result(result))
    }
}

/// Table keys the configuration table reserves for itself.
const RESERVED_KEYS: [&str; 2] = ["OnTick", "Watches"];

/// A loaded configuration script, owning its own Lua VM. The VM lives as
/// long as this value so hooks handed to the reconciler stay callable.
pub struct LuaConfig {
    lua: Lua,
    path: Option<PathBuf>,
}

impl LuaConfig {
    /// Create the VM, register globals and run the script at `path`.
    pub fn load(path: &Path, controls: Controls) -> Result<Self> {
        let lua = Lua::new();
        register_globals(&lua, controls).map_err(lua_err)?;

        // Set package.path so require() finds modules next to the script
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            let dir_str = dir.to_string_lossy();
            let pkg: LuaTable = lua.globals().get("package").map_err(lua_err)?;
            pkg.set("path", format!("{}/?.lua;{}/?/init.lua", dir_str, dir_str)).map_err(lua_err)?;
        }

        let config = LuaConfig { lua, path: Some(path.to_path_buf()) };
        config.run_file()?;
        Ok(config)
    }

    /// Run `code` as the configuration script (no backing file).
    pub fn from_source(code: &str, controls: Controls) -> Result<Self> {
        let lua = Lua::new();
        register_globals(&lua, controls).map_err(lua_err)?;
        lua.load(code).set_name("=config").exec().map_err(lua_err)?;
        Ok(LuaConfig { lua, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-run the script in the same VM. Globals the new script does not
    /// assign keep their previous values.
    pub fn reload(&self) -> Result<()> {
        self.run_file()
    }

    fn run_file(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let code = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        self.lua
            .load(code.as_str())
            .set_name(format!("@{}", path.display()))
            .exec()
            .map_err(lua_err)
    }

    /// Read the global `Settings` table; absent means all defaults.
    pub fn settings(&self) -> Result<Settings> {
        let value: LuaValue = self.lua.globals().get("Settings").map_err(lua_err)?;
        if value.is_nil() {
            return Ok(Settings::default());
        }
        let settings: Settings = self.lua.from_value(value).map_err(|e| anyhow!("invalid Settings table: {}", e))?;
        settings.validate().context("invalid Settings table")?;
        Ok(settings)
    }

    /// Map the table named by `Settings.Configuration` into a desired state.
    /// Returns `None` when the script defines no such table.
    pub fn desired_state(&self, settings: &Settings) -> Result<Option<DesiredState>> {
        let name = &settings.configuration;
        let value: LuaValue = self.lua.globals().get(name.as_str()).map_err(lua_err)?;
        let table = match value {
            LuaValue::Nil => return Ok(None),
            LuaValue::Table(t) => t,
            other => bail!("configuration {} must be a table, found {}", name, other.type_name()),
        };

        let mut slots: Vec<(SlotKey, LuaTable)> = Vec::new();
        for pair in table.pairs::<LuaValue, LuaValue>() {
            let (k, v) = pair.map_err(lua_err)?;
            let key = match k {
                LuaValue::Integer(i) => SlotKey::Index(i),
                LuaValue::String(s) => {
                    let s = s.to_str().map_err(lua_err)?.to_string();
                    if RESERVED_KEYS.contains(&s.as_str()) {
                        continue;
                    }
                    SlotKey::Name(s)
                }
                _ => continue,
            };
            if let LuaValue::Table(entry) = v {
                slots.push((key, entry));
            }
        }
        slots.sort_by(|a, b| a.0.cmp(&b.0));

        let mut entries = Vec::with_capacity(slots.len());
        for (ordinal, (key, entry)) in slots.into_iter().enumerate() {
            let parsed = self
                .entry_from_table(ordinal as i64, &entry)
                .with_context(|| format!("{}[{}]", name, key))?;
            entries.push(parsed);
        }

        let watches = match table.get::<Option<LuaTable>>("Watches").map_err(lua_err)? {
            Some(list) => watches_from_table(&list).with_context(|| format!("{}.Watches", name))?,
            None => Vec::new(),
        };
        let on_tick = table
            .get::<Option<LuaFunction>>("OnTick")
            .map_err(lua_err)?
            .map(|func| Rc::new(LuaGlobalHook { func }) as Rc<dyn GlobalHook>);

        Ok(Some(DesiredState { entries, watches, on_tick }))
    }

    fn entry_from_table(&self, key: i64, table: &LuaTable) -> Result<DesiredStateEntry> {
        let url: String = table
            .get::<Option<String>>("Url")
            .map_err(lua_err)?
            .ok_or_else(|| anyhow!("missing Url"))?;
        let mut entry = DesiredStateEntry::new(key, url);

        // Negative indices mean "pick one for me"
        entry.monitor = table
            .get::<Option<i64>>("Monitor")
            .map_err(lua_err)?
            .and_then(|m| usize::try_from(m).ok());
        entry.enabled = table.get::<Option<bool>>("Enabled").map_err(lua_err)?.unwrap_or(true);
        entry.force_reload = table.get::<Option<bool>>("ForceLoad").map_err(lua_err)?.unwrap_or(false);
        entry.cache_bust = table.get::<Option<bool>>("CacheBuster").map_err(lua_err)?.unwrap_or(false);
        if let Some(list) = table.get::<Option<LuaTable>>("Watches").map_err(lua_err)? {
            entry.watches = watches_from_table(&list)?;
        }
        entry.on_tick = self.window_hook(table, "OnTick", WindowHookKind::Tick)?;
        entry.on_open = self.window_hook(table, "OnOpen", WindowHookKind::Open)?;
        Ok(entry)
    }

    fn window_hook(&self, table: &LuaTable, name: &str, kind: WindowHookKind) -> Result<Option<Rc<dyn WindowHook>>> {
        let func = table.get::<Option<LuaFunction>>(name).map_err(lua_err)?;
        Ok(func.map(|func| Rc::new(LuaWindowHook { lua: self.lua.clone(), func, kind }) as Rc<dyn WindowHook>))
    }
}

/// Configuration table keys: integers first in numeric order, then names.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SlotKey {
    Index(i64),
    Name(String),
}

impl Ord for SlotKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SlotKey::Index(a), SlotKey::Index(b)) => a.cmp(b),
            (SlotKey::Name(a), SlotKey::Name(b)) => a.cmp(b),
            (SlotKey::Index(_), SlotKey::Name(_)) => Ordering::Less,
            (SlotKey::Name(_), SlotKey::Index(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for SlotKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotKey::Index(i) => write!(f, "{}", i),
            SlotKey::Name(s) => write!(f, "{:?}", s),
        }
    }
}

fn watches_from_table(list: &LuaTable) -> Result<Vec<WatchSpec>> {
    let mut watches = Vec::new();
    for (i, value) in list.sequence_values::<LuaTable>().enumerate() {
        let table = value.map_err(lua_err)?;
        watches.push(watch_from_table(&table).with_context(|| format!("watch {}", i + 1))?);
    }
    Ok(watches)
}

fn watch_from_table(table: &LuaTable) -> Result<WatchSpec> {
    let action = match table.get::<Option<String>>("Action").map_err(lua_err)? {
        Some(name) => name.parse::<Action>()?,
        None => Action::Reset,
    };
    let path = table.get::<Option<String>>("Path").map_err(lua_err)?;
    let interval = table.get::<Option<f64>>("Interval").map_err(lua_err)?;

    let mut spec = match (path, interval) {
        (Some(path), None) => WatchSpec::file(path, action),
        (None, Some(secs)) => WatchSpec::interval(period_from_secs(secs)?, action),
        (Some(_), Some(_)) => bail!("a watch takes either Path or Interval, not both"),
        (None, None) => bail!("a watch needs a Path or an Interval"),
    };
    if let Some(targets) = table.get::<Option<Vec<usize>>>("Targets").map_err(lua_err)? {
        spec = spec.with_targets(targets);
    }
    Ok(spec)
}

/// Register the script-facing globals.
fn register_globals(lua: &Lua, controls: Controls) -> mlua::Result<()> {
    logger::register_prefix("lua", logger::COLOR_BLUE);
    let globals = lua.globals();

    let sync = controls.clone();
    globals.set(
        "SynchroniseTicks",
        lua.create_function(move |_, value: Option<usize>| {
            sync.synchronise_ticks(value.unwrap_or(0));
            Ok(())
        })?,
    )?;

    globals.set(
        "StateHasChanged",
        lua.create_function(move |_, ()| {
            controls.state_has_changed();
            Ok(())
        })?,
    )?;

    globals.set(
        "Sleep",
        lua.create_function(|_, ms: u64| {
            sleep::sleep_ms(ms);
            Ok(())
        })?,
    )?;

    globals.set(
        "Log",
        lua.create_function(|_, msg: String| {
            logger::info_p("lua", &msg);
            Ok(())
        })?,
    )?;

    Ok(())
}
