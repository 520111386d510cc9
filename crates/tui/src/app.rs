use std::sync::{Arc, Mutex, MutexGuard, mpsc};

use kiosk_core::types::{Command, OrchestratorState, Status};

use crate::confirm::ConfirmDialog;

/// Most log lines kept in memory for the log pane.
const LOG_CAPACITY: usize = 2000;

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct App {
    pub status: Arc<Mutex<Status>>,
    pub orch_state: Arc<Mutex<OrchestratorState>>,
    pub selected: usize,
    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // scroll offset from bottom (0 = latest)
    pub log_rx: mpsc::Receiver<String>,
    pub cmd_tx: mpsc::Sender<Command>,
    pub confirm: Option<ConfirmDialog>,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        status: Arc<Mutex<Status>>,
        orch_state: Arc<Mutex<OrchestratorState>>,
        log_rx: mpsc::Receiver<String>,
        cmd_tx: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            status,
            orch_state,
            selected: 0,
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            cmd_tx,
            confirm: None,
            should_quit: false,
        }
    }

    /// The orchestrator stopped by itself on a fatal error; nothing is left
    /// to supervise, so the console should close and let main report it.
    pub fn orchestrator_failed(&self) -> bool {
        let stopped = *lock(&self.orch_state) == OrchestratorState::Stopped;
        stopped && lock(&self.status).error.is_some()
    }

    pub fn drain_logs(&mut self) {
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
        }
        if self.log_messages.len() > LOG_CAPACITY {
            let excess = self.log_messages.len() - LOG_CAPACITY;
            self.log_messages.drain(..excess);
        }
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n);
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    fn slot_count(&self) -> usize {
        lock(&self.status).slots.len()
    }

    pub fn move_up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn move_down(&mut self) {
        let count = self.slot_count();
        if count > 0 && self.selected < count - 1 {
            self.selected += 1;
        }
    }

    /// Keep the cursor inside the slot list after it shrinks.
    pub fn clamp_selection(&mut self) {
        let count = self.slot_count();
        self.selected = self.selected.min(count.saturating_sub(1));
    }

    fn send(&self, cmd: Command) {
        // The orchestrator only goes away on quit
        let _ = self.cmd_tx.send(cmd);
    }

    pub fn restart_selected(&mut self) {
        if self.selected < self.slot_count() {
            self.send(Command::Restart(self.selected));
        }
    }

    pub fn reload(&mut self) {
        self.send(Command::Reload);
    }

    pub fn pause_resume(&mut self) {
        self.send(Command::PauseResume);
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    pub fn ask_quit(&mut self) {
        self.confirm = Some(ConfirmDialog::new("Close all windows and quit?"));
    }

    /// Close the dialog; quit if Yes was chosen.
    pub fn answer_confirm(&mut self) {
        if let Some(dialog) = self.confirm.take() {
            if dialog.selected {
                self.quit();
            }
        }
    }

    pub fn quit(&mut self) {
        self.send(Command::Quit);
        self.should_quit = true;
    }
}
