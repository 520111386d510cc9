use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// What a fired watch does to its target slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    /// Close and relaunch the window.
    Reset,
    /// Send a single reload key to the window.
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid watch action {0:?}, acceptable options are RESET or REFRESH")]
pub struct InvalidAction(pub String);

impl FromStr for Action {
    type Err = InvalidAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "RESET" => Ok(Action::Reset),
            "REFRESH" => Ok(Action::Refresh),
            _ => Err(InvalidAction(s.to_string())),
        }
    }
}

/// Longest accepted interval.
pub const MAX_PERIOD: Duration = Duration::from_secs(366 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("interval must be more than 0 and at most one year, got {0} seconds")]
pub struct InvalidPeriod(pub f64);

/// Interval length for a configured number of seconds.
pub fn period_from_secs(secs: f64) -> Result<Duration, InvalidPeriod> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero() && *d <= MAX_PERIOD)
        .ok_or(InvalidPeriod(secs))
}

/// `now + period`, saturating instead of overflowing the clock.
fn deadline(now: SystemTime, period: Duration) -> SystemTime {
    now.checked_add(period.min(MAX_PERIOD)).unwrap_or(now)
}

/// Config-side trigger description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSpec {
    File(PathBuf),
    Interval(Duration),
}

/// Config-side watch description; turned into a live `Watch` when the
/// desired state is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSpec {
    pub trigger: TriggerSpec,
    pub action: Action,
    /// Monitor indices to act on. `None` on a per-window watch means the
    /// window that declared it.
    pub targets: Option<BTreeSet<usize>>,
}

impl WatchSpec {
    pub fn file(path: impl Into<PathBuf>, action: Action) -> Self {
        WatchSpec { trigger: TriggerSpec::File(path.into()), action, targets: None }
    }

    pub fn interval(period: Duration, action: Action) -> Self {
        WatchSpec { trigger: TriggerSpec::Interval(period), action, targets: None }
    }

    pub fn with_targets(mut self, targets: impl IntoIterator<Item = usize>) -> Self {
        self.targets = Some(targets.into_iter().collect());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    File { path: PathBuf, last_seen: SystemTime },
    Interval { period: Duration, next_fire: SystemTime },
}

/// A live trigger bound to an action and a set of target slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    pub trigger: Trigger,
    pub action: Action,
    pub targets: BTreeSet<usize>,
}

/// One fired watch, ready to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedAction {
    pub action: Action,
    pub targets: BTreeSet<usize>,
}

impl Watch {
    /// Arm a watch at `now`. File watches ignore changes made before `now`;
    /// interval watches first fire one period after `now`.
    pub fn from_spec(spec: &WatchSpec, owner: Option<usize>, now: SystemTime) -> Self {
        let targets = match &spec.targets {
            Some(t) => t.clone(),
            None => owner.into_iter().collect(),
        };
        let trigger = match &spec.trigger {
            TriggerSpec::File(path) => Trigger::File { path: path.clone(), last_seen: now },
            TriggerSpec::Interval(period) => Trigger::Interval { period: *period, next_fire: deadline(now, *period) },
        };
        Watch { trigger, action: spec.action, targets }
    }

    /// Check the trigger and advance its state. Returns true if it fired.
    pub fn poll(&mut self, now: SystemTime) -> bool {
        match &mut self.trigger {
            Trigger::File { path, last_seen } => {
                let Some(modified) = modified_time(path) else { return false };
                if modified > *last_seen {
                    // Stamp with `now`, not the mtime, so one change fires once
                    *last_seen = now;
                    true
                } else {
                    false
                }
            }
            Trigger::Interval { period, next_fire } => {
                if now > *next_fire {
                    *next_fire = deadline(now, *period);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Time of the last observed change or fire.
    pub fn timestamp(&self) -> SystemTime {
        match &self.trigger {
            Trigger::File { last_seen, .. } => *last_seen,
            Trigger::Interval { period, next_fire } => next_fire.checked_sub(*period).unwrap_or(UNIX_EPOCH),
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Poll every watch; fired watches with no targets are dropped here.
pub fn evaluate(watches: &mut [Watch], now: SystemTime) -> Vec<DispatchedAction> {
    watches
        .iter_mut()
        .filter_map(|w| {
            let fired = w.poll(now);
            (fired && !w.targets.is_empty())
                .then(|| DispatchedAction { action: w.action, targets: w.targets.clone() })
        })
        .collect()
}

/// Global watches not owned by any single window.
#[derive(Debug, Clone, Default)]
pub struct WatchSet {
    watches: Vec<Watch>,
}

impl WatchSet {
    pub fn from_specs(specs: &[WatchSpec], now: SystemTime) -> Self {
        WatchSet { watches: specs.iter().map(|s| Watch::from_spec(s, None, now)).collect() }
    }

    pub fn evaluate(&mut self, now: SystemTime) -> Vec<DispatchedAction> {
        evaluate(&mut self.watches, now)
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }
}

/// Milliseconds since the epoch of the newest watch; 0 without watches.
pub fn newest_timestamp_millis(watches: &[Watch]) -> u128 {
    watches
        .iter()
        .map(Watch::timestamp)
        .max()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    #[test]
    fn action_parses_case_insensitively() {
        assert_eq!("reset".parse::<Action>(), Ok(Action::Reset));
        assert_eq!(" Refresh ".parse::<Action>(), Ok(Action::Refresh));
        assert!("RELOAD".parse::<Action>().is_err());
    }

    #[test]
    fn file_watch_fires_once_per_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard.html");
        let file = File::create(&path).unwrap();
        file.set_modified(at(0)).unwrap();

        let spec = WatchSpec::file(&path, Action::Reset);
        let mut watch = Watch::from_spec(&spec, Some(0), at(10));
        assert!(!watch.poll(at(20)), "older mtime must not fire");

        file.set_modified(at(30)).unwrap();
        assert!(watch.poll(at(40)));
        assert_eq!(watch.timestamp(), at(40));
        assert!(!watch.poll(at(50)), "same change must not fire twice");
    }

    #[test]
    fn missing_file_never_fires() {
        let dir = tempfile::tempdir().unwrap();
        let mut watch = Watch::from_spec(&WatchSpec::file(dir.path().join("gone"), Action::Refresh), Some(1), at(0));
        assert!(!watch.poll(at(100)));
    }

    #[test]
    fn interval_watch_does_not_catch_up_missed_periods() {
        let spec = WatchSpec::interval(Duration::from_secs(5), Action::Refresh);
        let mut watch = Watch::from_spec(&spec, Some(0), at(0));
        assert!(!watch.poll(at(5)), "fires strictly after the deadline");
        assert!(watch.poll(at(23)));
        assert_eq!(watch.trigger, Trigger::Interval { period: Duration::from_secs(5), next_fire: at(28) });
        assert!(!watch.poll(at(24)));
        assert!(!watch.poll(at(28)));
        assert!(watch.poll(at(29)));
    }

    #[test]
    fn periods_outside_the_accepted_range_are_rejected() {
        assert_eq!(period_from_secs(2.5), Ok(Duration::from_millis(2500)));
        for secs in [0.0, -1.0, 1e30, f64::INFINITY, MAX_PERIOD.as_secs_f64() + 1.0] {
            assert!(period_from_secs(secs).is_err(), "{}", secs);
        }
        assert!(period_from_secs(f64::NAN).is_err());
    }

    #[test]
    fn huge_period_saturates_instead_of_overflowing() {
        let spec = WatchSpec::interval(Duration::MAX, Action::Reset);
        let mut watch = Watch::from_spec(&spec, Some(0), at(0));
        assert!(!watch.poll(at(1)));
        assert!(watch.poll(at(0) + MAX_PERIOD + Duration::from_secs(1)));
    }

    #[test]
    fn per_window_watch_targets_its_owner_unless_told_otherwise() {
        let own = Watch::from_spec(&WatchSpec::interval(Duration::from_secs(1), Action::Reset), Some(2), at(0));
        assert_eq!(own.targets, BTreeSet::from([2]));

        let spec = WatchSpec::interval(Duration::from_secs(1), Action::Reset).with_targets([0, 1]);
        let listed = Watch::from_spec(&spec, Some(2), at(0));
        assert_eq!(listed.targets, BTreeSet::from([0, 1]));
    }

    #[test]
    fn empty_target_set_is_a_no_op() {
        let mut set = WatchSet::from_specs(
            &[WatchSpec::interval(Duration::from_secs(1), Action::Reset)],
            at(0),
        );
        assert_eq!(set.len(), 1);
        assert!(set.evaluate(at(10)).is_empty());
        assert!(WatchSet::default().evaluate(at(10)).is_empty());
    }

    #[test]
    fn evaluate_reports_fired_watches_with_targets() {
        let mut set = WatchSet::from_specs(
            &[
                WatchSpec::interval(Duration::from_secs(1), Action::Reset).with_targets([0]),
                WatchSpec::interval(Duration::from_secs(60), Action::Refresh).with_targets([1]),
            ],
            at(0),
        );
        assert_eq!(
            set.evaluate(at(2)),
            vec![DispatchedAction { action: Action::Reset, targets: BTreeSet::from([0]) }]
        );
    }

    #[test]
    fn newest_timestamp_picks_latest_watch() {
        let watches = vec![
            Watch::from_spec(&WatchSpec::file("a", Action::Reset), Some(0), at(5)),
            Watch::from_spec(&WatchSpec::file("b", Action::Reset), Some(0), at(9)),
        ];
        let expected = at(9).duration_since(UNIX_EPOCH).unwrap().as_millis();
        assert_eq!(newest_timestamp_millis(&watches), expected);
        assert_eq!(newest_timestamp_millis(&[]), 0);
    }
}
