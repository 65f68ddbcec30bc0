//! Source selection: priority-ordered candidates with a last-resort scan.
//!
//! Order: network URL (when the strategy allows), caller-preferred local
//! indices, then every index that enumeration reports. First success wins.

use crate::opener::{OpenedSource, SourceOpener};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_SCAN_LIMIT: u32 = 8;

/// Which candidates the selector may try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStrategy {
    /// URL first when one is configured, then local cameras.
    #[default]
    Auto,
    /// Only the configured URL.
    Url,
    /// Only local cameras; a configured URL is ignored.
    Local,
}

impl FromStr for SourceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "url" => Ok(Self::Url),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown source strategy '{other}' (expected auto, url or local)")),
        }
    }
}

impl fmt::Display for SourceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Url => "url",
            Self::Local => "local",
        })
    }
}

/// Everything the selector needs. Kept verbatim by the frame stream so a
/// reopen replays exactly the same selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionArgs {
    pub strategy: SourceStrategy,
    pub url: Option<String>,
    pub preferred_indices: Vec<u32>,
    pub preferred_width: u32,
    pub preferred_height: u32,
    pub scan_limit: u32,
}

impl Default for SelectionArgs {
    fn default() -> Self {
        Self {
            strategy: SourceStrategy::Auto,
            url: None,
            preferred_indices: Vec::new(),
            preferred_width: 640,
            preferred_height: 480,
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }
}

impl SelectionArgs {
    fn usable_url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

/// Identity of the selected source as reported in status and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectedId {
    Local(u32),
    Network,
}

impl fmt::Display for SelectedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectedId::Local(index) => write!(f, "{index}"),
            SelectedId::Network => f.write_str("None"),
        }
    }
}

/// The winning candidate.
#[derive(Debug)]
pub struct Selection {
    pub id: SelectedId,
    pub source: OpenedSource,
}

impl Selection {
    pub fn backend_name(&self) -> &str {
        self.source.backend_name()
    }
}

#[derive(Error, Debug)]
#[error("no video source available ({attempts} candidates tried, strategy {strategy})")]
pub struct NoSourceError {
    pub attempts: usize,
    pub strategy: SourceStrategy,
}

/// Run the selection policy once.
pub fn select(opener: &SourceOpener, args: &SelectionArgs) -> Result<Selection, NoSourceError> {
    let mut attempts = 0usize;

    if args.strategy != SourceStrategy::Local {
        if let Some(url) = args.usable_url() {
            attempts += 1;
            match opener.open_network(url) {
                Ok(source) => {
                    return Ok(Selection {
                        id: SelectedId::Network,
                        source,
                    })
                }
                Err(error) => tracing::warn!(%error, "network source unavailable"),
            }
        }
    }

    if args.strategy == SourceStrategy::Url {
        tracing::warn!(attempts, "url strategy: not falling back to local cameras");
        return Err(NoSourceError {
            attempts,
            strategy: args.strategy,
        });
    }

    for &index in &args.preferred_indices {
        attempts += 1;
        match opener.open_local(index, args.preferred_width, args.preferred_height) {
            Ok(source) => {
                return Ok(Selection {
                    id: SelectedId::Local(index),
                    source,
                })
            }
            Err(error) => tracing::warn!(index, %error, "preferred camera unavailable"),
        }
    }

    for index in opener.list_local_indices(args.scan_limit) {
        attempts += 1;
        match opener.open_local(index, args.preferred_width, args.preferred_height) {
            Ok(source) => {
                return Ok(Selection {
                    id: SelectedId::Local(index),
                    source,
                })
            }
            Err(error) => tracing::debug!(index, %error, "scanned camera unusable"),
        }
    }

    tracing::error!(attempts, "could not open any video source");
    Err(NoSourceError {
        attempts,
        strategy: args.strategy,
    })
}

impl SourceOpener {
    /// Convenience for [`select`].
    pub fn select(&self, args: &SelectionArgs) -> Result<Selection, NoSourceError> {
        select(self, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CaptureBackend;
    use crate::opener::testing::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn opener(backend: FakeBackend, urls: &[&str], log: &Log) -> SourceOpener {
        let reachable: HashMap<String, Behavior> =
            urls.iter().map(|u| (u.to_string(), streaming())).collect();
        SourceOpener::new(
            vec![Box::new(backend) as Box<dyn CaptureBackend>],
            Box::new(FakeNetwork {
                reachable,
                log: Rc::clone(log),
            }),
        )
        .with_warmup(no_delay())
    }

    fn args(strategy: SourceStrategy, url: Option<&str>, preferred: &[u32]) -> SelectionArgs {
        SelectionArgs {
            strategy,
            url: url.map(str::to_string),
            preferred_indices: preferred.to_vec(),
            ..SelectionArgs::default()
        }
    }

    #[test]
    fn test_url_first_short_circuits() {
        let log = Log::default();
        let backend = FakeBackend::new("A", &log).with(0, streaming());
        let o = opener(backend, &["http://cam"], &log);
        let sel = select(&o, &args(SourceStrategy::Auto, Some("http://cam"), &[0])).unwrap();
        assert_eq!(sel.id, SelectedId::Network);
        assert_eq!(sel.backend_name(), "URL");
        assert!(!log.borrow().iter().any(|l| l.starts_with("open A")));
    }

    #[test]
    fn test_auto_falls_back_to_preferred() {
        let log = Log::default();
        let backend = FakeBackend::new("A", &log).with(2, streaming());
        let o = opener(backend, &[], &log);
        let sel = select(&o, &args(SourceStrategy::Auto, Some("http://down"), &[5, 2])).unwrap();
        assert_eq!(sel.id, SelectedId::Local(2));
        let log = log.borrow();
        assert_eq!(log[0], "open URL http://down");
        assert_eq!(log[1], "open A 5");
        assert_eq!(log[2], "open A 2");
    }

    #[test]
    fn test_scan_when_preferred_fail() {
        let log = Log::default();
        let backend = FakeBackend::new("A", &log)
            .with(1, Behavior::Streams(Vec::new(), Read::Empty))
            .with(3, streaming());
        let o = opener(backend, &[], &log);
        let sel = select(&o, &args(SourceStrategy::Auto, None, &[7])).unwrap();
        // Index 1 opens but never streams; 3 is the first usable scan hit.
        assert_eq!(sel.id, SelectedId::Local(3));
    }

    #[test]
    fn test_url_strategy_never_touches_local() {
        let log = Log::default();
        let backend = FakeBackend::new("A", &log).with(0, streaming());
        let o = opener(backend, &[], &log);
        let err = select(&o, &args(SourceStrategy::Url, Some("http://down"), &[0])).unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(!log.borrow().iter().any(|l| l.starts_with("open A")));
    }

    #[test]
    fn test_local_strategy_ignores_url() {
        let log = Log::default();
        let backend = FakeBackend::new("A", &log).with(0, streaming());
        let o = opener(backend, &["http://cam"], &log);
        let sel = select(&o, &args(SourceStrategy::Local, Some("http://cam"), &[])).unwrap();
        assert_eq!(sel.id, SelectedId::Local(0));
        assert!(!log.borrow().iter().any(|l| l.starts_with("open URL")));
    }

    #[test]
    fn test_blank_url_is_ignored() {
        let log = Log::default();
        let backend = FakeBackend::new("A", &log).with(0, streaming());
        let o = opener(backend, &[], &log);
        let sel = select(&o, &args(SourceStrategy::Auto, Some("   "), &[])).unwrap();
        assert_eq!(sel.id, SelectedId::Local(0));
    }

    #[test]
    fn test_no_source() {
        let log = Log::default();
        let o = opener(FakeBackend::new("A", &log), &[], &log);
        let err = select(&o, &args(SourceStrategy::Auto, None, &[0, 1])).unwrap_err();
        assert_eq!(err.attempts, 2);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("URL".parse::<SourceStrategy>().unwrap(), SourceStrategy::Url);
        assert_eq!(" local ".parse::<SourceStrategy>().unwrap(), SourceStrategy::Local);
        assert!("remote".parse::<SourceStrategy>().is_err());
        assert_eq!(SourceStrategy::Auto.to_string(), "auto");
    }

    #[test]
    fn test_selected_id_display() {
        assert_eq!(SelectedId::Local(4).to_string(), "4");
        assert_eq!(SelectedId::Network.to_string(), "None");
    }
}
