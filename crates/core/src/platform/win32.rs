use std::io;
use std::mem;

use windows::core::PWSTR;
use windows::Win32::Foundation::*;
use windows::Win32::Graphics::Gdi::{
    EnumDisplayMonitors, GetMonitorInfoW, MonitorFromWindow, HDC, HMONITOR, MONITORINFO, MONITOR_DEFAULTTONEAREST,
};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_FORMAT, PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::Input::KeyboardAndMouse::*;
use windows::Win32::UI::WindowsAndMessaging::*;

use crate::keymap::{Key, Modifiers};
use crate::logger;
use crate::types::*;
use super::Platform;

const MK_LBUTTON: usize = 0x0001;
const MK_RBUTTON: usize = 0x0002;
const MK_MBUTTON: usize = 0x0010;

/// Win32 backend: EnumDisplayMonitors/EnumWindows for discovery, SendInput
/// for keys, window messages for clicks and close requests.
pub struct Win32Platform;

impl Win32Platform {
    pub fn new() -> Self {
        Win32Platform
    }
}

fn hwnd(handle: WindowId) -> HWND {
    HWND(handle as usize as *mut _)
}

fn handle_of(hwnd: HWND) -> WindowId {
    hwnd.0 as usize as WindowId
}

fn rect_from(r: &RECT) -> Rect {
    Rect::new(r.left, r.top, r.right - r.left, r.bottom - r.top)
}

fn virtual_key(key: Key) -> VIRTUAL_KEY {
    match key {
        Key::Char(c) => VIRTUAL_KEY(c.to_ascii_uppercase() as u16),
        Key::F(n) => VIRTUAL_KEY(VK_F1.0 + u16::from(n.saturating_sub(1))),
        Key::Enter => VK_RETURN,
        Key::Escape => VK_ESCAPE,
        Key::Tab => VK_TAB,
        Key::Space => VK_SPACE,
        Key::Backspace => VK_BACK,
        Key::Delete => VK_DELETE,
        Key::Up => VK_UP,
        Key::Down => VK_DOWN,
        Key::Left => VK_LEFT,
        Key::Right => VK_RIGHT,
        Key::Home => VK_HOME,
        Key::End => VK_END,
        Key::PageUp => VK_PRIOR,
        Key::PageDown => VK_NEXT,
        Key::Shift => VK_SHIFT,
        Key::Control => VK_CONTROL,
        Key::Alt => VK_MENU,
    }
}

fn key_input(vk: VIRTUAL_KEY, up: bool) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: vk,
                wScan: 0,
                dwFlags: if up { KEYEVENTF_KEYUP } else { KEYBD_EVENT_FLAGS(0) },
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

/// File name of the executable behind `pid`, e.g. `msedge.exe`.
fn process_name(pid: u32) -> Option<String> {
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid).ok()?;
        let mut buf = [0u16; 260];
        let mut len = buf.len() as u32;
        let ok = QueryFullProcessImageNameW(handle, PROCESS_NAME_FORMAT(0), PWSTR(buf.as_mut_ptr()), &mut len);
        let _ = CloseHandle(handle);
        ok.ok()?;
        let path = String::from_utf16_lossy(&buf[..len as usize]);
        path.rsplit('\\').next().map(str::to_string)
    }
}

unsafe extern "system" fn collect_monitor(_: HMONITOR, _: HDC, rect: *mut RECT, data: LPARAM) -> BOOL {
    let monitors = &mut *(data.0 as *mut Vec<Rect>);
    if let Some(r) = rect.as_ref() {
        monitors.push(rect_from(r));
    }
    TRUE
}

unsafe extern "system" fn collect_window(hwnd: HWND, data: LPARAM) -> BOOL {
    let windows = &mut *(data.0 as *mut Vec<HWND>);
    if IsWindowVisible(hwnd).as_bool() {
        windows.push(hwnd);
    }
    TRUE
}

impl Platform for Win32Platform {
    fn name(&self) -> &'static str {
        "win32"
    }

    fn enumerate_monitors(&self) -> Vec<Rect> {
        let mut monitors: Vec<Rect> = Vec::new();
        unsafe {
            if !EnumDisplayMonitors(HDC::default(), None, Some(collect_monitor), LPARAM(&mut monitors as *mut _ as isize))
                .as_bool()
            {
                logger::warn_p("win32", "EnumDisplayMonitors failed");
            }
        }
        sort_monitors(&mut monitors);
        monitors
    }

    fn spawn(&self, executable: &str, args: &[String]) -> io::Result<()> {
        super::spawn_detached(executable, args)
    }

    fn enumerate_windows(&self, process: &str) -> Vec<(ProcessId, WindowId)> {
        let mut windows: Vec<HWND> = Vec::new();
        unsafe {
            if let Err(e) = EnumWindows(Some(collect_window), LPARAM(&mut windows as *mut _ as isize)) {
                logger::warn_p("win32", &format!("EnumWindows failed: {}", e));
            }
        }
        windows
            .into_iter()
            .filter_map(|w| {
                let mut pid = 0u32;
                unsafe { GetWindowThreadProcessId(w, Some(&mut pid)) };
                let name = process_name(pid)?;
                name.eq_ignore_ascii_case(process).then_some((pid, handle_of(w)))
            })
            .collect()
    }

    fn is_window_valid(&self, handle: WindowId) -> bool {
        unsafe { IsWindow(hwnd(handle)).as_bool() }
    }

    /// Captionless and covering the monitor it sits on.
    fn is_fullscreen(&self, handle: WindowId) -> bool {
        let w = hwnd(handle);
        unsafe {
            let style = GetWindowLongW(w, GWL_STYLE) as u32;
            if style & WS_CAPTION.0 != 0 {
                return false;
            }
            let mut info = MONITORINFO { cbSize: mem::size_of::<MONITORINFO>() as u32, ..Default::default() };
            if !GetMonitorInfoW(MonitorFromWindow(w, MONITOR_DEFAULTTONEAREST), &mut info).as_bool() {
                return false;
            }
            self.get_window_bounds(handle).is_some_and(|b| b.approximately(&rect_from(&info.rcMonitor)))
        }
    }

    fn move_window(&self, handle: WindowId, area: Rect) {
        let w = hwnd(handle);
        unsafe {
            if IsZoomed(w).as_bool() || IsIconic(w).as_bool() {
                let _ = ShowWindow(w, SW_RESTORE);
            }
            if let Err(e) = SetWindowPos(
                w,
                HWND::default(),
                area.left,
                area.top,
                area.width,
                area.height,
                SWP_NOZORDER | SWP_SHOWWINDOW,
            ) {
                logger::debug_p("win32", &format!("SetWindowPos({}) failed: {}", handle, e));
            }
        }
    }

    fn get_window_bounds(&self, handle: WindowId) -> Option<Rect> {
        let mut rect = RECT::default();
        unsafe { GetWindowRect(hwnd(handle), &mut rect).ok()? };
        Some(rect_from(&rect))
    }

    fn send_key(&self, handle: WindowId, key: Key, modifiers: Modifiers) {
        let held: Vec<VIRTUAL_KEY> = [(modifiers.shift, VK_SHIFT), (modifiers.control, VK_CONTROL), (modifiers.alt, VK_MENU)]
            .into_iter()
            .filter_map(|(on, vk)| on.then_some(vk))
            .collect();
        let vk = virtual_key(key);

        let mut inputs: Vec<INPUT> = held.iter().map(|m| key_input(*m, false)).collect();
        inputs.push(key_input(vk, false));
        inputs.push(key_input(vk, true));
        inputs.extend(held.iter().rev().map(|m| key_input(*m, true)));

        unsafe {
            // SendInput goes to whatever has focus
            let _ = SetForegroundWindow(hwnd(handle));
            SendInput(&inputs, mem::size_of::<INPUT>() as i32);
        }
    }

    fn send_click(&self, handle: WindowId, x: i32, y: i32, button: MouseButton) {
        let (down, up, mk) = match button {
            MouseButton::Left => (WM_LBUTTONDOWN, WM_LBUTTONUP, MK_LBUTTON),
            MouseButton::Right => (WM_RBUTTONDOWN, WM_RBUTTONUP, MK_RBUTTON),
            MouseButton::Middle => (WM_MBUTTONDOWN, WM_MBUTTONUP, MK_MBUTTON),
        };
        let pos = LPARAM((((y & 0xffff) << 16) | (x & 0xffff)) as isize);
        let w = hwnd(handle);
        unsafe {
            let _ = SetForegroundWindow(w);
            SendMessageW(w, down, WPARAM(mk), pos);
            SendMessageW(w, up, WPARAM(mk), pos);
        }
    }

    fn close_window(&self, handle: WindowId) {
        unsafe {
            if let Err(e) = PostMessageW(hwnd(handle), WM_CLOSE, WPARAM(0), LPARAM(0)) {
                logger::debug_p("win32", &format!("WM_CLOSE to {} failed: {}", handle, e));
            }
        }
    }
}
