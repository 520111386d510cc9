use std::fmt;

/// OS process identifier (pid on Linux, DWORD on Windows)
pub type ProcessId = u32;

/// Window identifier (X11 Window on Linux, HWND on Windows)
pub type WindowId = u64;

/// Screen-coordinate rectangle of a monitor or window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    /// Largest per-field difference still treated as the same rectangle.
    pub const LEEWAY: i32 = 3;

    pub const fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self { left, top, width, height }
    }

    /// True if every field is within `LEEWAY` units of `other`.
    pub fn approximately(&self, other: &Rect) -> bool {
        within(self.left, other.left)
            && within(self.top, other.top)
            && within(self.width, other.width)
            && within(self.height, other.height)
    }

    pub fn right(&self) -> i32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.top + self.height
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.left, self.top)
    }
}

fn within(l: i32, r: i32) -> bool {
    (l - r).abs() <= Rect::LEEWAY
}

/// Order monitors left to right, then top to bottom.
pub fn sort_monitors(monitors: &mut [Rect]) {
    monitors.sort_by(|a, b| a.left.cmp(&b.left).then(a.top.cmp(&b.top)));
}

/// True if both monitor sets have the same length and matching rects.
pub fn same_topology(a: &[Rect], b: &[Rect]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(l, r)| l.approximately(r))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    /// Script-facing numbering: 1 = left, 2 = right, 3 = middle.
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            1 => Some(MouseButton::Left),
            2 => Some(MouseButton::Right),
            3 => Some(MouseButton::Middle),
            _ => None,
        }
    }
}

/// Snapshot of one managed slot, published for the console.
#[derive(Debug, Clone, Default)]
pub struct SlotStatus {
    pub monitor: Option<usize>,
    pub url: String,
    pub handle: Option<WindowId>,
    pub tick: usize,
    pub nudges: u32,
}

/// Snapshot of the reconciler, published after every pass.
#[derive(Debug, Clone, Default)]
pub struct Status {
    pub slots: Vec<SlotStatus>,
    pub monitors: Vec<Rect>,
    pub expected_monitors: usize,
    pub ticks: u64,
    pub last_tick: Option<chrono::DateTime<chrono::Local>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Running,
    Paused,
    Stopped,
}

/// Command from the console to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Close and relaunch the slot at this position in the status list.
    Restart(usize),
    /// Re-read the configuration script.
    Reload,
    /// Toggle between running and paused.
    PauseResume,
    Quit,
}
