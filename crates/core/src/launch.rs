use std::io;
use std::time::Duration;

use crate::logger;
use crate::platform::Platform;
use crate::settings::Settings;
use crate::types::*;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to start {executable}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: io::Error,
    },
    #[error("no new {process} window appeared, consider increasing LoadTime")]
    NoWindow { process: String },
    #[error("{count} new {process} windows appeared, cannot tell which one was launched")]
    Ambiguous { process: String, count: usize },
}

/// Spawns a browser for one URL and works out which window it produced.
///
/// There is no way to ask the OS for "the window this spawn created", so the
/// broker waits `load_delay`, lists every window of the browser process and
/// discards the ones already owned by other slots. Anything other than
/// exactly one survivor is a failure the caller must answer with a full reset.
#[derive(Debug, Clone)]
pub struct LaunchBroker {
    executable: String,
    process_name: String,
    start_args: Vec<String>,
    load_delay: Duration,
}

impl LaunchBroker {
    pub fn new(settings: &Settings) -> Self {
        logger::register_prefix("launch", logger::COLOR_MAGENTA);
        LaunchBroker {
            executable: settings.executable_name.clone(),
            process_name: settings.process_name.clone(),
            start_args: settings.start_args(),
            load_delay: settings.load_delay(),
        }
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    fn args_for(&self, url: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(self.start_args.len() + 2);
        args.push(url.to_string());
        args.extend(self.start_args.iter().cloned());
        if !args.iter().any(|a| a == "--new-window") {
            args.push("--new-window".to_string());
        }
        args
    }

    pub fn launch(
        &self,
        platform: &dyn Platform,
        url: &str,
        excluded: &[WindowId],
    ) -> Result<(ProcessId, WindowId), LaunchError> {
        logger::info_p("launch", &format!("opening {}", url));
        platform
            .spawn(&self.executable, &self.args_for(url))
            .map_err(|source| LaunchError::Spawn { executable: self.executable.clone(), source })?;

        std::thread::sleep(self.load_delay);

        let candidates: Vec<_> = platform
            .enumerate_windows(&self.process_name)
            .into_iter()
            .filter(|(_, handle)| !excluded.contains(handle))
            .collect();

        match candidates.as_slice() {
            [found] => {
                logger::info_p("launch", &format!("bound window {} (pid {})", found.1, found.0));
                Ok(*found)
            }
            [] => Err(LaunchError::NoWindow { process: self.process_name.clone() }),
            many => Err(LaunchError::Ambiguous { process: self.process_name.clone(), count: many.len() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::stub::{default_monitors, StubEvent, StubPlatform};

    fn broker() -> LaunchBroker {
        LaunchBroker::new(&Settings {
            executable_name: "chromium".into(),
            process_name: "chromium".into(),
            start_args: "--kiosk".into(),
            load_time: 0.0,
            ..Settings::default()
        })
    }

    #[test]
    fn binds_the_single_new_window() {
        let platform = StubPlatform::new(default_monitors());
        let owned = platform.open_foreign("chromium", "https://owned.example");
        let (_, handle) = broker().launch(&platform, "https://new.example", &[owned]).unwrap();
        assert_ne!(handle, owned);
        assert_eq!(platform.window(handle).unwrap().url, "https://new.example");
        assert_eq!(
            platform.events(),
            vec![StubEvent::Spawn {
                executable: "chromium".into(),
                args: vec!["https://new.example".into(), "--kiosk".into(), "--new-window".into()],
            }]
        );
    }

    #[test]
    fn no_new_window_is_reported() {
        let platform = StubPlatform::new(default_monitors());
        platform.set_windows_per_spawn(0);
        let err = broker().launch(&platform, "https://a.example", &[]).unwrap_err();
        assert!(matches!(err, LaunchError::NoWindow { .. }));
    }

    #[test]
    fn unowned_stray_window_makes_launch_ambiguous() {
        let platform = StubPlatform::new(default_monitors());
        platform.open_foreign("chromium", "https://stray.example");
        let err = broker().launch(&platform, "https://a.example", &[]).unwrap_err();
        assert!(matches!(err, LaunchError::Ambiguous { count: 2, .. }));
    }
}
