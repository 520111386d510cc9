use std::io;

use anyhow::{Context, Result};
use x11rb::connection::Connection;
use x11rb::protocol::xinerama::ConnectionExt as _;
use x11rb::protocol::xproto::{
    self, AtomEnum, ClientMessageEvent, ConfigureWindowAux, ConnectionExt as _, EventMask, InputFocus, StackMode,
};
use x11rb::protocol::xtest::ConnectionExt as _;
use x11rb::rust_connection::RustConnection;
use x11rb::CURRENT_TIME;

use crate::keymap::{Key, Modifiers};
use crate::logger;
use crate::types::*;
use super::Platform;

struct Atoms {
    client_list: u32,
    wm_pid: u32,
    wm_state: u32,
    wm_state_fullscreen: u32,
    wm_protocols: u32,
    wm_delete_window: u32,
}

/// Xinerama/EWMH backend. One connection for the life of the process.
pub struct X11Platform {
    conn: RustConnection,
    root: u32,
    atoms: Atoms,
    min_keycode: u8,
    keysyms_per_keycode: u8,
    keysyms: Vec<u32>,
}

fn atom(conn: &RustConnection, name: &[u8]) -> Result<u32> {
    Ok(conn.intern_atom(false, name)?.reply()?.atom)
}

fn keysym(key: Key) -> u32 {
    match key {
        Key::Char(c) => c.to_ascii_lowercase() as u32,
        Key::F(n) => 0xffbe + u32::from(n.saturating_sub(1)),
        Key::Enter => 0xff0d,
        Key::Escape => 0xff1b,
        Key::Tab => 0xff09,
        Key::Space => 0x20,
        Key::Backspace => 0xff08,
        Key::Delete => 0xffff,
        Key::Home => 0xff50,
        Key::Left => 0xff51,
        Key::Up => 0xff52,
        Key::Right => 0xff53,
        Key::Down => 0xff54,
        Key::PageUp => 0xff55,
        Key::PageDown => 0xff56,
        Key::End => 0xff57,
        Key::Shift => 0xffe1,
        Key::Control => 0xffe3,
        Key::Alt => 0xffe9,
    }
}

fn process_name(pid: u32) -> Option<String> {
    std::fs::read_to_string(format!("/proc/{pid}/comm"))
        .ok()
        .map(|name| name.trim_end_matches('\n').to_owned())
}

impl X11Platform {
    pub fn connect() -> Result<Self> {
        let (conn, screen) = RustConnection::connect(None).context("failed to connect to X11")?;
        let setup = conn.setup();
        let root = setup.roots[screen].root;
        let min_keycode = setup.min_keycode;
        let count = setup.max_keycode - min_keycode + 1;

        let mapping = conn.get_keyboard_mapping(min_keycode, count)?.reply()?;
        let atoms = Atoms {
            client_list: atom(&conn, b"_NET_CLIENT_LIST_STACKING")?,
            wm_pid: atom(&conn, b"_NET_WM_PID")?,
            wm_state: atom(&conn, b"_NET_WM_STATE")?,
            wm_state_fullscreen: atom(&conn, b"_NET_WM_STATE_FULLSCREEN")?,
            wm_protocols: atom(&conn, b"WM_PROTOCOLS")?,
            wm_delete_window: atom(&conn, b"WM_DELETE_WINDOW")?,
        };

        Ok(X11Platform {
            conn,
            root,
            atoms,
            min_keycode,
            keysyms_per_keycode: mapping.keysyms_per_keycode,
            keysyms: mapping.keysyms,
        })
    }

    fn keycode(&self, key: Key) -> Option<u8> {
        let sym = keysym(key);
        let per = usize::from(self.keysyms_per_keycode.max(1));
        self.keysyms
            .chunks(per)
            .position(|syms| syms.contains(&sym))
            .and_then(|i| u8::try_from(i + usize::from(self.min_keycode)).ok())
    }

    fn window(handle: WindowId) -> u32 {
        handle as u32
    }

    fn property32(&self, window: u32, property: u32, kind: AtomEnum) -> Result<Vec<u32>> {
        let reply = self.conn.get_property(false, window, property, kind, 0, u32::MAX)?.reply()?;
        Ok(reply.value32().map(|v| v.collect()).unwrap_or_default())
    }

    fn monitors(&self) -> Result<Vec<Rect>> {
        let reply = self.conn.xinerama_query_screens()?.reply()?;
        Ok(reply
            .screen_info
            .iter()
            .map(|s| Rect::new(i32::from(s.x_org), i32::from(s.y_org), i32::from(s.width), i32::from(s.height)))
            .collect())
    }

    fn bounds(&self, window: u32) -> Result<Rect> {
        let geometry = self.conn.get_geometry(window)?.reply()?;
        let origin = self.conn.translate_coordinates(window, self.root, 0, 0)?.reply()?;
        Ok(Rect::new(
            i32::from(origin.dst_x),
            i32::from(origin.dst_y),
            i32::from(geometry.width),
            i32::from(geometry.height),
        ))
    }

    fn focus(&self, window: u32) -> Result<()> {
        self.conn.configure_window(window, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))?;
        self.conn.set_input_focus(InputFocus::PARENT, window, CURRENT_TIME)?;
        Ok(())
    }

    fn fake(&self, event: u8, detail: u8) -> Result<()> {
        self.conn.xtest_fake_input(event, detail, CURRENT_TIME, self.root, 0, 0, 0)?;
        Ok(())
    }

    fn key(&self, window: u32, key: Key, modifiers: Modifiers) -> Result<()> {
        let Some(code) = self.keycode(key) else {
            logger::warn_p("x11", &format!("no keycode for {:?}", key));
            return Ok(());
        };
        let held: Vec<u8> = [(modifiers.shift, Key::Shift), (modifiers.control, Key::Control), (modifiers.alt, Key::Alt)]
            .into_iter()
            .filter(|(on, _)| *on)
            .filter_map(|(_, k)| self.keycode(k))
            .collect();

        self.focus(window)?;
        for m in &held {
            self.fake(xproto::KEY_PRESS_EVENT, *m)?;
        }
        self.fake(xproto::KEY_PRESS_EVENT, code)?;
        self.fake(xproto::KEY_RELEASE_EVENT, code)?;
        for m in held.iter().rev() {
            self.fake(xproto::KEY_RELEASE_EVENT, *m)?;
        }
        self.conn.flush()?;
        Ok(())
    }

    fn click(&self, window: u32, x: i32, y: i32, button: MouseButton) -> Result<()> {
        let detail = match button {
            MouseButton::Left => 1,
            MouseButton::Middle => 2,
            MouseButton::Right => 3,
        };
        let origin = self.bounds(window)?;
        let to_i16 = |v: i32| v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;

        self.focus(window)?;
        self.conn.xtest_fake_input(
            xproto::MOTION_NOTIFY_EVENT,
            0,
            CURRENT_TIME,
            self.root,
            to_i16(origin.left + x),
            to_i16(origin.top + y),
            0,
        )?;
        self.fake(xproto::BUTTON_PRESS_EVENT, detail)?;
        self.fake(xproto::BUTTON_RELEASE_EVENT, detail)?;
        self.conn.flush()?;
        Ok(())
    }

    fn delete(&self, window: u32) -> Result<()> {
        let event = ClientMessageEvent::new(
            32,
            window,
            self.atoms.wm_protocols,
            [self.atoms.wm_delete_window, CURRENT_TIME, 0, 0, 0],
        );
        self.conn.send_event(false, window, EventMask::NO_EVENT, event)?;
        self.conn.flush()?;
        Ok(())
    }
}

/// Log a failed request and fall back to `default`.
fn or_log<T>(what: &str, result: Result<T>, default: T) -> T {
    result.unwrap_or_else(|e| {
        logger::debug_p("x11", &format!("{} failed: {:#}", what, e));
        default
    })
}

impl Platform for X11Platform {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn enumerate_monitors(&self) -> Vec<Rect> {
        let mut monitors = or_log("xinerama", self.monitors(), Vec::new());
        sort_monitors(&mut monitors);
        monitors
    }

    fn spawn(&self, executable: &str, args: &[String]) -> io::Result<()> {
        super::spawn_detached(executable, args)
    }

    fn enumerate_windows(&self, process: &str) -> Vec<(ProcessId, WindowId)> {
        let clients = or_log("client list", self.property32(self.root, self.atoms.client_list, AtomEnum::WINDOW), Vec::new());
        clients
            .into_iter()
            .filter_map(|window| {
                let pid = self.property32(window, self.atoms.wm_pid, AtomEnum::CARDINAL).ok()?.first().copied()?;
                (process_name(pid)? == process).then_some((pid, WindowId::from(window)))
            })
            .collect()
    }

    fn is_window_valid(&self, handle: WindowId) -> bool {
        self.conn
            .get_window_attributes(Self::window(handle))
            .map_err(anyhow::Error::from)
            .and_then(|cookie| cookie.reply().map_err(anyhow::Error::from))
            .is_ok()
    }

    fn is_fullscreen(&self, handle: WindowId) -> bool {
        self.property32(Self::window(handle), self.atoms.wm_state, AtomEnum::ATOM)
            .is_ok_and(|state| state.contains(&self.atoms.wm_state_fullscreen))
    }

    fn move_window(&self, handle: WindowId, area: Rect) {
        logger::debug_p("x11", &format!("move {} to {}", handle, area));
        let aux = ConfigureWindowAux::new()
            .x(area.left)
            .y(area.top)
            .width(area.width.max(1) as u32)
            .height(area.height.max(1) as u32);
        let result = self
            .conn
            .configure_window(Self::window(handle), &aux)
            .map_err(anyhow::Error::from)
            .and_then(|_| self.conn.flush().map_err(anyhow::Error::from));
        or_log("move", result, ());
    }

    fn get_window_bounds(&self, handle: WindowId) -> Option<Rect> {
        self.bounds(Self::window(handle)).ok()
    }

    fn send_key(&self, handle: WindowId, key: Key, modifiers: Modifiers) {
        or_log("key", self.key(Self::window(handle), key, modifiers), ());
    }

    fn send_click(&self, handle: WindowId, x: i32, y: i32, button: MouseButton) {
        or_log("click", self.click(Self::window(handle), x, y, button), ());
    }

    fn close_window(&self, handle: WindowId) {
        or_log("close", self.delete(Self::window(handle)), ());
    }
}
