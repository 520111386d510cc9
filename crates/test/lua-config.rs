use std::sync::Arc;

use anyhow::{ensure, Context};
use libtest_mimic::Arguments;

use kiosk_core::hooks::Controls;
use kiosk_core::keymap::{Key, Modifiers};
use kiosk_core::lua_rt::LuaConfig;
use kiosk_core::orchestrator::load_desired;
use kiosk_core::platform::stub::{StubEvent, StubPlatform};
use kiosk_core::reconciler::Reconciler;
use kiosk_core::settings::Settings;
use kiosk_core::watch::{Action, TriggerSpec};
use kiosk_test::*;

const TEST_SETTINGS: &str = r#"
    Settings = {
        ExecutableName = "chromium", ProcessName = "chromium",
        Monitors = 2, LoadTime = 0, KeyDelayMs = 0, Nudges = 0,
    }
"#;

/// Evaluate `body` after the shared settings and build a reconciler over a
/// two-screen stub desktop.
fn setup(body: &str) -> anyhow::Result<(Arc<StubPlatform>, LuaConfig, Reconciler)> {
    let controls = Controls::new();
    let config = LuaConfig::from_source(&format!("{}\n{}", TEST_SETTINGS, body), controls.clone())?;
    let mut settings = config.settings()?;
    settings.settle_ms = 0;
    let platform = Arc::new(StubPlatform::new(screens(2)));
    let reconciler = Reconciler::new(settings, platform.clone(), controls);
    Ok((platform, config, reconciler))
}

fn keys_sent(platform: &StubPlatform, key: Key) -> usize {
    platform
        .events()
        .iter()
        .filter(|e| matches!(e, StubEvent::Key(_, k, Modifiers::NONE) if *k == key))
        .count()
}

fn window_hook_runs_every_pass() -> anyhow::Result<()> {
    let (platform, config, mut r) = setup(
        r#"
        Kiosk = {
            { Url = "https://a.example",
              OnTick = function(tick, win) if tick % 2 == 1 then win:Press("F5") end end },
        }
        "#,
    )?;
    let desired = load_desired(&config, r.settings())?;
    r.apply(desired)?;
    platform.take_events();
    for _ in 0..3 {
        r.tick()?;
    }
    let refreshes = keys_sent(&platform, Key::REFRESH);
    ensure!(refreshes == 2, "{} refreshes over ticks 1..=3", refreshes);
    ensure!(r.windows()[0].tick_count() == 4, "tick count {}", r.windows()[0].tick_count());
    Ok(())
}

fn hook_can_rewind_its_tick() -> anyhow::Result<()> {
    let (_, config, mut r) = setup(
        r#"
        Kiosk = {
            { Url = "https://a.example", OnTick = function(tick, win) return tick >= 1 end },
            { Url = "https://b.example", OnTick = function(tick, win) win.Tick = 100 end },
        }
        "#,
    )?;
    r.apply(load_desired(&config, r.settings())?)?;
    r.tick()?;
    let ticks: Vec<_> = r.windows().iter().map(|w| w.tick_count()).collect();
    ensure!(ticks == vec![0, 100], "ticks {:?}", ticks);
    Ok(())
}

fn global_hook_resets_and_synchronises() -> anyhow::Result<()> {
    let (_, config, mut r) = setup(
        r#"
        Kiosk = {
            { Url = "https://a.example" },
            { Url = "https://b.example" },
            OnTick = function(tick)
                if tick == 1 then SynchroniseTicks(7) end
                return tick == 2
            end,
        }
        "#,
    )?;
    r.apply(load_desired(&config, r.settings())?)?;
    r.tick()?;
    ensure!(r.windows().iter().all(|w| w.tick_count() == 7), "ticks were not synchronised");
    r.tick()?;
    ensure!(r.global_tick() == 0, "global tick {}", r.global_tick());
    Ok(())
}

fn open_hook_runs_after_launch() -> anyhow::Result<()> {
    let (platform, config, mut r) = setup(
        r#"
        Kiosk = {
            { Url = "https://a.example", OnOpen = function(win) win:Click(5, 6, 2) end },
        }
        "#,
    )?;
    r.apply(load_desired(&config, r.settings())?)?;
    let handle = r.windows()[0].handle().context("unbound")?;
    let clicked = platform
        .events()
        .contains(&StubEvent::Click(handle, 5, 6, kiosk_core::types::MouseButton::Right));
    ensure!(clicked, "OnOpen click missing");
    Ok(())
}

fn cache_buster_tags_the_launch_url() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let data = dir.path().join("board.json");
    std::fs::write(&data, "{}")?;
    let (platform, config, mut r) = setup(&format!(
        r#"Kiosk = {{ {{ Url = "https://a.example/board", CacheBuster = true,
                       Watches = {{ {{ Path = {:?}, Action = "RESET" }} }} }} }}"#,
        data.display().to_string()
    ))?;
    r.apply(load_desired(&config, r.settings())?)?;
    let handle = r.windows()[0].handle().context("unbound")?;
    let url = platform.window(handle).context("window gone")?.url;
    let token = url.strip_prefix("https://a.example/board?").context(url.clone())?;
    ensure!(token.parse::<u128>().is_ok(), "token {:?}", token);
    Ok(())
}

fn disabled_entries_are_skipped() -> anyhow::Result<()> {
    let (platform, config, mut r) = setup(
        r#"
        Kiosk = {
            { Url = "https://a.example", Enabled = false },
            { Url = "https://b.example" },
        }
        "#,
    )?;
    r.apply(load_desired(&config, r.settings())?)?;
    ensure!(r.windows().len() == 1, "{} windows", r.windows().len());
    ensure!(r.windows()[0].url() == "https://b.example", "wrong entry kept");
    ensure!(r.windows()[0].monitor() == Some(0), "disabled entry claimed a monitor");
    ensure!(platform.windows().len() == 1, "{} windows open", platform.windows().len());
    Ok(())
}

fn urls_file_backs_a_script_without_a_table() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = dir.path().join("Kiosk.lua");
    std::fs::write(&script, r#"Settings = { UrlsFile = "URLs.txt", Monitors = 2 }"#)?;
    std::fs::write(
        dir.path().join("URLs.txt"),
        "# lobby\nhttps://a.example\n\nhttps://b.example REFRESH 30\n",
    )?;

    let config = LuaConfig::load(&script, Controls::new())?;
    let desired = load_desired(&config, &config.settings()?)?;
    ensure!(desired.entries.len() == 2, "{} entries", desired.entries.len());
    let watch = desired.entries[1].watches.first().context("no watch on second entry")?;
    ensure!(watch.action == Action::Refresh, "action {:?}", watch.action);
    ensure!(
        watch.trigger == TriggerSpec::Interval(std::time::Duration::from_secs(30)),
        "trigger {:?}",
        watch.trigger
    );
    Ok(())
}

fn reload_swaps_only_changed_slots() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = dir.path().join("Kiosk.lua");
    let write = |second: &str| {
        std::fs::write(
            &script,
            format!("{}\nKiosk = {{ {{ Url = \"https://a.example\" }}, {{ Url = \"{}\" }} }}", TEST_SETTINGS, second),
        )
    };
    write("https://b.example")?;

    let controls = Controls::new();
    let config = LuaConfig::load(&script, controls.clone())?;
    let settings = Settings { settle_ms: 0, ..config.settings()? };
    let platform = Arc::new(StubPlatform::new(screens(2)));
    let mut r = Reconciler::new(settings, platform.clone(), controls);
    r.apply(load_desired(&config, r.settings())?)?;
    let before = handles(&r);

    write("https://c.example")?;
    config.reload()?;
    r.apply(load_desired(&config, r.settings())?)?;
    let after = handles(&r);
    ensure!(after[0] == before[0], "unchanged slot relaunched");
    ensure!(after[1] != before[1], "changed slot kept");
    ensure!(r.windows()[1].url() == "https://c.example", "url {}", r.windows()[1].url());
    ensure!(platform.windows().len() == 2, "{} windows open", platform.windows().len());
    Ok(())
}

fn main() {
    let args = Arguments::from_args();
    let tests = vec![
        trial("hooks::window_hook_runs_every_pass", window_hook_runs_every_pass),
        trial("hooks::hook_can_rewind_its_tick", hook_can_rewind_its_tick),
        trial("hooks::global_hook_resets_and_synchronises", global_hook_resets_and_synchronises),
        trial("hooks::open_hook_runs_after_launch", open_hook_runs_after_launch),
        trial("config::cache_buster_tags_the_launch_url", cache_buster_tags_the_launch_url),
        trial("config::disabled_entries_are_skipped", disabled_entries_are_skipped),
        trial("config::urls_file_backs_a_script_without_a_table", urls_file_backs_a_script_without_a_table),
        trial("config::reload_swaps_only_changed_slots", reload_swaps_only_changed_slots),
    ];
    libtest_mimic::run(&args, tests).exit();
}
