//! On-disk cassette format

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use testbridge_common::{Error, Result};

/// Header name to every value sent under it, in order
pub type RecordedHeaders = BTreeMap<String, Vec<String>>;

/// Message body: UTF-8 text as is, anything else base64 encoded
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordedBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_string: Option<String>,
}

impl RecordedBody {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::text(text),
            Err(_) => Self {
                string: None,
                base64_string: Some(STANDARD.encode(bytes)),
            },
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            string: Some(text.into()),
            base64_string: None,
        }
    }

    /// Original bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match (&self.string, &self.base64_string) {
            (Some(text), _) => Ok(text.as_bytes().to_vec()),
            (None, Some(encoded)) => STANDARD
                .decode(encoded)
                .map_err(|e| Error::Cassette(format!("invalid base64 body: {}", e))),
            (None, None) => Ok(Vec::new()),
        }
    }

    /// Body text, `None` for binary bodies
    pub fn as_str(&self) -> Option<&str> {
        self.string.as_deref()
    }
}

/// Outbound request as it was sent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedRequest {
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub headers: RecordedHeaders,
    #[serde(default)]
    pub body: RecordedBody,
}

/// Response as it was received
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: RecordedHeaders,
    #[serde(default)]
    pub body: RecordedBody,
}

impl RecordedResponse {
    /// Body as text, lossily decoded when binary
    pub fn text(&self) -> String {
        match self.body.as_str() {
            Some(text) => text.to_string(),
            None => String::from_utf8_lossy(&self.body.to_bytes().unwrap_or_default()).into_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    pub request: RecordedRequest,
    pub response: RecordedResponse,
    pub recorded_at: DateTime<Utc>,
}

/// Named, ordered list of interactions stored as `{name}.yml`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cassette {
    pub name: String,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    pub recorded_with: String,
}

impl Cassette {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interactions: Vec::new(),
            recorded_with: format!("testbridge {}", testbridge_common::VERSION),
        }
    }

    /// Read a cassette; `Ok(None)` when the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let cassette = serde_yaml::from_str(&content).map_err(|e| {
            Error::Cassette(format!("failed to parse {}: {}", path.display(), e))
        })?;
        Ok(Some(cassette))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| Error::Cassette(format!("failed to serialize {}: {}", self.name, e)))?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}
