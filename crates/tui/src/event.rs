use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, MouseEventKind};
use ratatui::{Terminal, backend::CrosstermBackend};

use crate::App;
use crate::ui;

pub fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> anyhow::Result<()> {
    loop {
        if app.should_quit || app.orchestrator_failed() {
            return Ok(());
        }

        app.drain_logs();
        app.clamp_selection();

        terminal.draw(|f| ui::draw(f, app))?;

        // 100ms keeps the status view fresh between passes
        if event::poll(Duration::from_millis(100))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if app.confirm.is_some() {
                        handle_confirm_key(app, key);
                    } else {
                        handle_key(app, key);
                    }
                }
                Event::Mouse(mouse) => match mouse.kind {
                    MouseEventKind::ScrollUp => app.scroll_log_up(3),
                    MouseEventKind::ScrollDown => app.scroll_log_down(3),
                    _ => {}
                },
                _ => {}
            }
        }
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => app.ask_quit(),
        KeyCode::Up | KeyCode::Char('k') | KeyCode::Char('K') => app.move_up(),
        KeyCode::Down | KeyCode::Char('j') | KeyCode::Char('J') => app.move_down(),
        KeyCode::Char('r') | KeyCode::Char('R') => app.restart_selected(),
        KeyCode::Char('c') | KeyCode::Char('C') => app.reload(),
        KeyCode::Char('s') | KeyCode::Char('S') => app.pause_resume(),
        KeyCode::Char('l') | KeyCode::Char('L') => app.toggle_log(),
        KeyCode::PageUp => app.scroll_log_up(10),
        KeyCode::PageDown => app.scroll_log_down(10),
        _ => {}
    }
}

fn handle_confirm_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Left | KeyCode::Right | KeyCode::Tab | KeyCode::Char('h') | KeyCode::Char('l') => {
            if let Some(dialog) = app.confirm.as_mut() {
                dialog.toggle();
            }
        }
        KeyCode::Char('y') | KeyCode::Char('Y') => app.quit(),
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.confirm = None,
        KeyCode::Enter => app.answer_confirm(),
        _ => {}
    }
}
