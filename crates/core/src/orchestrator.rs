use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use anyhow::{bail, Result};

use crate::desired::DesiredState;
use crate::hooks::Controls;
use crate::logger;
use crate::lua_rt::LuaConfig;
use crate::platform::Platform;
use crate::reconciler::{self, ReconcileError, Reconciler, TickOutcome};
use crate::settings::Settings;
use crate::sleep;
use crate::startup;
use crate::types::*;
use crate::urls;

/// How often the wait between passes checks for console commands.
const COMMAND_POLL: Duration = Duration::from_millis(100);
/// Pause after a recoverable error so a persistent fault does not spin.
const ERROR_COOLDOWN: Duration = Duration::from_secs(5);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Modification time of `path`, if it can be read.
fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Resolve the desired state: the configuration table if the script has
/// one, otherwise the plain URL list named by `UrlsFile`.
pub fn load_desired(config: &LuaConfig, settings: &Settings) -> Result<DesiredState> {
    if let Some(desired) = config.desired_state(settings)? {
        return Ok(desired);
    }
    if let Some(list) = urls_path(config, settings) {
        return urls::load(&list);
    }
    bail!("the script defines no {} table and no UrlsFile", settings.configuration)
}

/// `UrlsFile`, relative paths taken from the script's directory.
fn urls_path(config: &LuaConfig, settings: &Settings) -> Option<PathBuf> {
    let list = settings.urls_file.as_ref()?;
    let base = config.path().and_then(Path::parent).unwrap_or(Path::new(""));
    Some(base.join(list))
}

enum Step {
    Continue,
    Quit,
}

/// The long-running driver: owns the script VM and the reconciler and
/// paces reconciliation passes.
pub struct Orchestrator {
    config: LuaConfig,
    reconciler: Reconciler,
    watched: Vec<PathBuf>,
    loaded_at: Option<SystemTime>,
    status: Arc<Mutex<Status>>,
    state: Arc<Mutex<OrchestratorState>>,
    last_error: Option<String>,
}

impl Orchestrator {
    /// Load the script, run startup checks, optionally close stray browser
    /// windows, then apply the initial desired state.
    pub fn start(
        script: &Path,
        platform: Arc<dyn Platform>,
        status: Arc<Mutex<Status>>,
        state: Arc<Mutex<OrchestratorState>>,
    ) -> Result<Self> {
        let controls = Controls::new();
        let config = LuaConfig::load(script, controls.clone())?;
        let settings = config.settings()?;
        logger::info(&format!("loaded {} ({} backend)", script.display(), platform.name()));

        startup::run(&settings, platform.name() == "x11");
        if settings.close_all_on_start {
            reconciler::close_all_existing(platform.as_ref(), &settings.process_name);
        }

        let desired = load_desired(&config, &settings)?;
        let mut orchestrator = Orchestrator {
            watched: Vec::new(),
            loaded_at: None,
            reconciler: Reconciler::new(settings, platform, controls),
            config,
            status,
            state,
            last_error: None,
        };
        orchestrator.track_sources();
        orchestrator.apply(desired)?;
        *lock(&orchestrator.state) = OrchestratorState::Running;
        orchestrator.publish();
        Ok(orchestrator)
    }

    /// Remember which files feed the desired state and when they were last read.
    fn track_sources(&mut self) {
        self.watched = self.config.path().map(Path::to_path_buf).into_iter().collect();
        self.watched.extend(urls_path(&self.config, self.reconciler.settings()));
        self.loaded_at = self.watched.iter().filter_map(|p| modified(p)).max();
    }

    fn sources_changed(&self) -> bool {
        let newest = self.watched.iter().filter_map(|p| modified(p)).max();
        match (newest, self.loaded_at) {
            (Some(now), Some(then)) => now > then,
            (Some(_), None) => true,
            _ => false,
        }
    }

    fn apply(&mut self, desired: DesiredState) -> Result<()> {
        let outcome = self.reconciler.apply(desired)?;
        if outcome != TickOutcome::Completed {
            logger::info(&format!("initial pass ended with {:?}", outcome));
        }
        Ok(())
    }

    /// Re-read settings and desired state from the live VM. Nothing changes
    /// unless both are valid.
    fn reapply(&mut self) -> Result<()> {
        let settings = self.config.settings()?;
        let desired = load_desired(&self.config, &settings)?;
        self.reconciler.set_settings(settings);
        self.apply(desired)
    }

    /// Re-run the script file, then re-apply.
    fn reload(&mut self) -> Result<()> {
        logger::info("reloading configuration");
        self.config.reload()?;
        self.reapply()?;
        self.track_sources();
        Ok(())
    }

    fn publish(&self) {
        let mut status = self.reconciler.status();
        status.error = self.last_error.clone();
        *lock(&self.status) = status;
    }

    fn is_running(&self) -> bool {
        *lock(&self.state) == OrchestratorState::Running
    }

    /// Drain pending commands. Returns false on Quit.
    fn process_commands(&mut self, cmd_rx: &mpsc::Receiver<Command>) -> bool {
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                Command::Quit => return false,
                Command::PauseResume => {
                    let mut state = lock(&self.state);
                    *state = match *state {
                        OrchestratorState::Running => OrchestratorState::Paused,
                        _ => OrchestratorState::Running,
                    };
                    logger::info(&format!("orchestrator {:?}", *state).to_lowercase());
                }
                Command::Restart(idx) => {
                    if let Some(slot) = self.reconciler.windows().get(idx) {
                        logger::info(&format!("relaunching {}", slot.url()));
                        self.reconciler.relaunch(idx);
                        self.publish();
                    }
                }
                Command::Reload => {
                    if let Err(e) = self.reload() {
                        self.record_error(&e);
                    }
                }
            }
        }
        true
    }

    fn record_error(&mut self, e: &anyhow::Error) {
        logger::error(&format!("{:#}", e));
        self.last_error = Some(format!("{:#}", e));
        self.publish();
    }

    /// Wait one refresh interval, then run a pass and follow up on any
    /// requests it raised.
    fn step(&mut self, cmd_rx: &mpsc::Receiver<Command>) -> Result<Step> {
        let interval = self.reconciler.settings().tick_interval();
        if sleep::sleep_interruptible(interval, COMMAND_POLL, || !self.process_commands(cmd_rx)) {
            return Ok(Step::Quit);
        }
        if !self.is_running() {
            return Ok(Step::Continue);
        }

        let outcome = self.reconciler.tick()?;
        if outcome == TickOutcome::Reset {
            logger::info("windows will be rebuilt on the next pass");
        }

        if self.reconciler.controls().take_state_changed() {
            logger::info("state change requested by script");
            self.reapply()?;
        }
        if self.sources_changed() {
            self.reload()?;
        }

        self.last_error = None;
        self.publish();
        Ok(Step::Continue)
    }

    /// Run until Quit or a fatal error. Windows are closed either way.
    pub fn run(mut self, cmd_rx: mpsc::Receiver<Command>) -> Result<()> {
        let result = loop {
            match self.step(&cmd_rx) {
                Ok(Step::Continue) => {}
                Ok(Step::Quit) => break Ok(()),
                Err(e) if e.downcast_ref::<ReconcileError>().is_some() => break Err(e),
                Err(e) => {
                    self.record_error(&e);
                    logger::info(&format!("restarting in {}s", ERROR_COOLDOWN.as_secs()));
                    if sleep::sleep_interruptible(ERROR_COOLDOWN, COMMAND_POLL, || !self.process_commands(&cmd_rx)) {
                        break Ok(());
                    }
                    // A broken script stays broken until it is edited again
                    self.track_sources();
                }
            }
        };

        logger::info("shutting down");
        if let Err(e) = &result {
            self.last_error = Some(format!("{:#}", e));
        }
        self.reconciler.shutdown();
        *lock(&self.state) = OrchestratorState::Stopped;
        self.publish();
        result
    }
}

/// Thread entry point: start from `script` and run until Quit.
pub fn orchestrate(
    script: PathBuf,
    platform: Arc<dyn Platform>,
    status: Arc<Mutex<Status>>,
    state: Arc<Mutex<OrchestratorState>>,
    cmd_rx: mpsc::Receiver<Command>,
) -> Result<()> {
    let started = Orchestrator::start(&script, platform, Arc::clone(&status), Arc::clone(&state));
    let orchestrator = match started {
        Ok(o) => o,
        Err(e) => {
            logger::error(&format!("{:#}", e));
            lock(&status).error = Some(format!("{:#}", e));
            *lock(&state) = OrchestratorState::Stopped;
            return Err(e);
        }
    };
    orchestrator.run(cmd_rx)
}
