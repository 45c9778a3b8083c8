//! Cassette options
//!
//! Options arrive as loose JSON (from configuration and from insert requests).
//! Known keys are interpreted; everything else is skipped so that callers written
//! against newer option sets keep working.

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// How a cassette treats requests it has no recording for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordMode {
    /// Record when the cassette file is new, otherwise replay only
    #[default]
    Once,
    /// Replay what is recorded, record anything new
    NewEpisodes,
    /// Replay only
    None,
    /// Never replay, record everything
    All,
}

impl RecordMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordMode::Once => "once",
            RecordMode::NewEpisodes => "new_episodes",
            RecordMode::None => "none",
            RecordMode::All => "all",
        }
    }
}

impl fmt::Display for RecordMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(RecordMode::Once),
            "new_episodes" => Ok(RecordMode::NewEpisodes),
            "none" => Ok(RecordMode::None),
            "all" => Ok(RecordMode::All),
            other => Err(format!("unknown record mode: {}", other)),
        }
    }
}

/// Request attribute compared when looking for a recorded interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOn {
    Method,
    Uri,
    Host,
    Path,
    Body,
}

impl FromStr for MatchOn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "method" => Ok(MatchOn::Method),
            "uri" => Ok(MatchOn::Uri),
            "host" => Ok(MatchOn::Host),
            "path" => Ok(MatchOn::Path),
            "body" => Ok(MatchOn::Body),
            other => Err(format!("unknown request matcher: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CassetteOptions {
    pub record: RecordMode,
    pub match_requests_on: Vec<MatchOn>,
    pub allow_playback_repeats: bool,
}

impl Default for CassetteOptions {
    fn default() -> Self {
        Self {
            record: RecordMode::Once,
            match_requests_on: vec![MatchOn::Method, MatchOn::Uri],
            allow_playback_repeats: false,
        }
    }
}

impl CassetteOptions {
    /// Apply `defaults` then `overrides` on top of the built-in defaults
    pub fn resolve(defaults: &Map<String, Value>, overrides: &Map<String, Value>) -> Self {
        let mut options = Self::default();
        for (key, value) in defaults.iter().chain(overrides.iter()) {
            options.apply(key, value);
        }
        options
    }

    fn apply(&mut self, key: &str, value: &Value) {
        match key {
            "record" => match value.as_str().map(str::parse::<RecordMode>) {
                Some(Ok(mode)) => self.record = mode,
                _ => warn!("ignoring invalid cassette option record={}", value),
            },
            "match_requests_on" => {
                let Some(items) = value.as_array() else {
                    warn!("ignoring invalid cassette option match_requests_on={}", value);
                    return;
                };
                self.match_requests_on = items
                    .iter()
                    .filter_map(|item| match item.as_str().map(str::parse::<MatchOn>) {
                        Some(Ok(m)) => Some(m),
                        _ => {
                            debug!("ignoring request matcher {}", item);
                            None
                        }
                    })
                    .collect();
            }
            "allow_playback_repeats" => match value.as_bool() {
                Some(b) => self.allow_playback_repeats = b,
                None => warn!("ignoring invalid cassette option allow_playback_repeats={}", value),
            },
            "cassette_library_dir" => {
                debug!("cassette_library_dir is fixed under the install folder; ignoring {}", value)
            }
            other => debug!("ignoring unsupported cassette option {}", other),
        }
    }
}
