//! Plain URL list: one URL per line, optionally followed by a periodic
//! action, e.g. `https://board.example REFRESH 60`. Blank lines and lines
//! starting with `#` are skipped.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::desired::{DesiredState, DesiredStateEntry};
use crate::watch::{Action, InvalidAction, WatchSpec, MAX_PERIOD};

#[derive(Debug, thiserror::Error)]
pub enum UrlListError {
    #[error("line {line}: {source}")]
    Action {
        line: usize,
        #[source]
        source: InvalidAction,
    },
    #[error("line {line}: expected a delay of at most one year in whole seconds after {action}")]
    Delay { line: usize, action: String },
}

pub fn parse(text: &str) -> Result<DesiredState, UrlListError> {
    let mut entries = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut words = line.split_whitespace();
        let Some(url) = words.next() else { continue };
        let mut entry = DesiredStateEntry::new(entries.len() as i64, url);

        if let Some(word) = words.next() {
            let action = word
                .parse::<Action>()
                .map_err(|source| UrlListError::Action { line: i + 1, source })?;
            let secs = words
                .next()
                .and_then(|d| d.parse::<u64>().ok())
                .filter(|&s| s > 0 && Duration::from_secs(s) <= MAX_PERIOD)
                .ok_or_else(|| UrlListError::Delay { line: i + 1, action: word.to_string() })?;
            entry.watches.push(WatchSpec::interval(Duration::from_secs(secs), action));
        }
        entries.push(entry);
    }
    Ok(DesiredState::new(entries))
}

pub fn load(path: &Path) -> Result<DesiredState> {
    let text = std::fs::read_to_string(path).with_context(|| format!("unable to read URL list {}", path.display()))?;
    parse(&text).with_context(|| format!("in {}", path.display()))
}
