use std::path::Path;

use crate::logger;
use crate::settings::Settings;

const CHROMIUM_FAMILY: [&str; 5] = ["chrome", "chromium", "msedge", "edge", "brave"];

/// Something about the environment that will probably stop windows from
/// being placed. None of these are fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartupIssue {
    #[error("not running in an X11 session (found: {0})")]
    NotX11(String),
    #[error("{0} does not look like a Chromium-based browser; F11 and --new-window may not behave")]
    NotChromium(String),
    #[error("Monitors is 0, nothing will be shown")]
    NoMonitors,
}

/// Inspect `settings` and the session. `session_type` is the value of
/// `XDG_SESSION_TYPE` when the native X11 backend is in use, `None` otherwise.
pub fn check(settings: &Settings, session_type: Option<Option<&str>>) -> Vec<StartupIssue> {
    let mut issues = Vec::new();

    if let Some(session) = session_type {
        if session != Some("x11") {
            issues.push(StartupIssue::NotX11(session.unwrap_or("unset").to_string()));
        }
    }

    let stem = Path::new(&settings.executable_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !CHROMIUM_FAMILY.iter().any(|name| stem.contains(name)) {
        issues.push(StartupIssue::NotChromium(settings.executable_name.clone()));
    }

    if settings.monitors == 0 {
        issues.push(StartupIssue::NoMonitors);
    }
    issues
}

/// Run [`check`] against the live session and log every issue.
pub fn run(settings: &Settings, native_x11: bool) -> bool {
    let session = std::env::var("XDG_SESSION_TYPE").ok();
    let session_type = native_x11.then_some(session.as_deref());
    let issues = check(settings, session_type);
    for issue in &issues {
        logger::warn(&issue.to_string());
    }
    issues.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(exe: &str) -> Settings {
        Settings { executable_name: exe.into(), ..Settings::default() }
    }

    #[test]
    fn chromium_family_passes() {
        for exe in ["chromium", "/usr/bin/google-chrome-stable", "C:/Edge/Application/msedge.exe", "brave-browser"] {
            assert!(check(&settings(exe), None).is_empty(), "{}", exe);
        }
    }

    #[test]
    fn other_browsers_and_sessions_are_flagged() {
        assert_eq!(check(&settings("firefox"), None), vec![StartupIssue::NotChromium("firefox".into())]);
        assert_eq!(
            check(&settings("chromium"), Some(Some("wayland"))),
            vec![StartupIssue::NotX11("wayland".into())]
        );
        assert_eq!(check(&settings("chromium"), Some(None)), vec![StartupIssue::NotX11("unset".into())]);
        assert!(check(&settings("chromium"), Some(Some("x11"))).is_empty());
    }

    #[test]
    fn zero_monitors_is_flagged() {
        let s = Settings { monitors: 0, ..settings("chromium") };
        assert_eq!(check(&s, None), vec![StartupIssue::NoMonitors]);
    }
}
