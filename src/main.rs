use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    execute,
    event::{EnableMouseCapture, DisableMouseCapture},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use kiosk_core::{logger, orchestrator};
use kiosk_core::platform::create_platform;
use kiosk_core::types::{Command, OrchestratorState, Status};

/// Keep browser windows full-screen on their assigned monitors.
#[derive(Parser, Debug)]
#[command(name = "kiosk", version, about, long_about = None)]
struct Cli {
    /// Lua configuration script
    #[arg(value_name = "SCRIPT", default_value = "Kiosk.lua")]
    config: PathBuf,

    /// Run against the simulated desktop instead of the real one
    #[arg(long)]
    stub: bool,

    /// No console UI; log to stderr and stop on Ctrl-C
    #[arg(long)]
    headless: bool,

    /// Directory for kiosk.log
    #[arg(long, value_name = "DIR", default_value = "logs")]
    log_dir: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logger::init(&cli.log_dir).with_context(|| format!("cannot create log file in {}", cli.log_dir.display()))?;
    let platform = create_platform(cli.stub);

    let status = Arc::new(Mutex::new(Status::default()));
    let orch_state = Arc::new(Mutex::new(OrchestratorState::Stopped));
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();

    let log_rx = if cli.headless {
        logger::set_echo(true);
        None
    } else {
        let (log_tx, log_rx) = mpsc::channel::<String>();
        logger::set_tui_sender(log_tx);
        Some(log_rx)
    };
    logger::info("kiosk started");

    let driver = {
        let status = Arc::clone(&status);
        let state = Arc::clone(&orch_state);
        let script = cli.config.clone();
        thread::spawn(move || orchestrator::orchestrate(script, platform, status, state, cmd_rx))
    };

    match log_rx {
        None => {
            let quit_tx = cmd_tx.clone();
            ctrlc::set_handler(move || {
                logger::info("interrupted");
                let _ = quit_tx.send(Command::Quit);
            })
            .context("cannot install Ctrl-C handler")?;
        }
        Some(log_rx) => {
            let mut app = kiosk_tui::App::new(Arc::clone(&status), Arc::clone(&orch_state), log_rx, cmd_tx);
            run_console(&mut app)?;
        }
    }

    match driver.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("orchestrator thread panicked"),
    }
}

/// Own the terminal for the lifetime of the console.
fn run_console(app: &mut kiosk_tui::App) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = kiosk_tui::event::run(&mut terminal, app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}
