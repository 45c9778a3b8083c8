//! Record/replay engine for outbound HTTP
//!
//! Application code sends outbound requests through [`Recorder::send`]. While a
//! cassette is inserted, requests are answered from the cassette or performed
//! and recorded, depending on the record mode. With no cassette inserted,
//! requests go straight to the network.

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use testbridge_common::{Configuration, Error, Result};

use super::cassette::{
    Cassette, Interaction, RecordedBody, RecordedHeaders, RecordedRequest, RecordedResponse,
};
use super::options::{CassetteOptions, MatchOn, RecordMode};

struct ActiveCassette {
    name: String,
    path: PathBuf,
    options: CassetteOptions,
    file_existed: bool,
    recorded: Vec<Interaction>,
    played: Vec<bool>,
    new_interactions: Vec<Interaction>,
}

impl ActiveCassette {
    fn can_record(&self) -> bool {
        match self.options.record {
            RecordMode::All | RecordMode::NewEpisodes => true,
            RecordMode::Once => !self.file_existed,
            RecordMode::None => false,
        }
    }

    fn playback(&mut self, request: &RecordedRequest) -> Option<RecordedResponse> {
        if self.options.record == RecordMode::All {
            return None;
        }
        let repeats = self.options.allow_playback_repeats;
        let matchers = &self.options.match_requests_on;

        let index = self.recorded.iter().enumerate().position(|(i, interaction)| {
            (repeats || !self.played[i]) && requests_match(matchers, &interaction.request, request)
        })?;
        self.played[index] = true;
        Some(self.recorded[index].response.clone())
    }
}

/// Holds at most one inserted cassette at a time
pub struct Recorder {
    library_dir: PathBuf,
    defaults: Map<String, Value>,
    client: reqwest::Client,
    active: Mutex<Option<ActiveCassette>>,
}

impl Recorder {
    pub fn new(library_dir: impl Into<PathBuf>, defaults: Map<String, Value>) -> Self {
        Self {
            library_dir: library_dir.into(),
            defaults,
            client: reqwest::Client::new(),
            active: Mutex::new(None),
        }
    }

    /// Library under the install folder, defaults from `vcr_options`
    pub fn from_configuration(config: &Configuration) -> Self {
        Self::new(config.cassette_library_dir(), config.vcr_options.clone())
    }

    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    /// Underlying client, for building requests passed to [`send`](Self::send)
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn current_cassette(&self) -> Option<String> {
        self.active.lock().as_ref().map(|c| c.name.clone())
    }

    pub fn is_inserted(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Path of the cassette file for `name`
    pub fn cassette_path(&self, name: &str) -> Result<PathBuf> {
        let trimmed = name.trim_matches('/');
        let trimmed = if trimmed.is_empty() { "index" } else { trimmed };
        if trimmed.contains('\\') || trimmed.split('/').any(|s| s.is_empty() || s == "..") {
            return Err(Error::Cassette(format!("invalid cassette name: {}", name)));
        }
        Ok(self.library_dir.join(format!("{}.yml", trimmed)))
    }

    /// Insert a cassette; options override the configured defaults
    pub fn insert_cassette(&self, name: &str, options: &Map<String, Value>) -> Result<()> {
        let path = self.cassette_path(name)?;
        let options = CassetteOptions::resolve(&self.defaults, options);

        let mut active = self.active.lock();
        if let Some(current) = active.as_ref() {
            return Err(Error::Cassette(format!(
                "cassette {} is already inserted",
                current.name
            )));
        }

        let existing = Cassette::load(&path)?;
        let file_existed = existing.is_some();
        let recorded = existing.map(|c| c.interactions).unwrap_or_default();

        info!(
            "Inserted cassette {} (record: {}, {} recorded interactions)",
            name,
            options.record,
            recorded.len()
        );

        *active = Some(ActiveCassette {
            name: name.to_string(),
            path,
            options,
            file_existed,
            played: vec![false; recorded.len()],
            recorded,
            new_interactions: Vec::new(),
        });
        Ok(())
    }

    /// Eject the current cassette, writing newly recorded interactions
    ///
    /// Ejecting with nothing inserted is a no-op and returns `Ok(None)`.
    pub fn eject_cassette(&self) -> Result<Option<String>> {
        let Some(active) = self.active.lock().take() else {
            debug!("No cassette inserted; nothing to eject");
            return Ok(None);
        };

        if !active.new_interactions.is_empty() {
            let mut cassette = Cassette::new(active.name.clone());
            if active.options.record != RecordMode::All {
                cassette.interactions = active.recorded;
            }
            cassette.interactions.extend(active.new_interactions);
            cassette.save(&active.path)?;
            info!(
                "Wrote {} interactions to {}",
                cassette.interactions.len(),
                active.path.display()
            );
        }

        info!("Ejected cassette {}", active.name);
        Ok(Some(active.name))
    }

    /// Send a request through the inserted cassette
    pub async fn send(&self, request: reqwest::Request) -> Result<RecordedResponse> {
        let recorded_request = describe_request(&request);

        let cassette_name = {
            let mut active = self.active.lock();
            match active.as_mut() {
                None => None,
                Some(cassette) => {
                    if let Some(response) = cassette.playback(&recorded_request) {
                        debug!(
                            "Replayed {} {} from cassette {}",
                            recorded_request.method, recorded_request.uri, cassette.name
                        );
                        return Ok(response);
                    }
                    if !cassette.can_record() {
                        return Err(Error::Cassette(format!(
                            "unhandled request {} {} for cassette {} (record: {})",
                            recorded_request.method,
                            recorded_request.uri,
                            cassette.name,
                            cassette.options.record
                        )));
                    }
                    Some(cassette.name.clone())
                }
            }
        };

        let response = self.perform(request).await?;

        if let Some(name) = cassette_name {
            let mut active = self.active.lock();
            match active.as_mut() {
                Some(cassette) if cassette.name == name => {
                    debug!(
                        "Recorded {} {} into cassette {}",
                        recorded_request.method, recorded_request.uri, name
                    );
                    cassette.new_interactions.push(Interaction {
                        request: recorded_request,
                        response: response.clone(),
                        recorded_at: Utc::now(),
                    });
                }
                _ => debug!("Cassette {} ejected mid-request; not recording", name),
            }
        }

        Ok(response)
    }

    async fn perform(&self, request: reqwest::Request) -> Result<RecordedResponse> {
        let url = request.url().to_string();
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| Error::Cassette(format!("request to {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let headers = header_map(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Cassette(format!("reading response from {} failed: {}", url, e)))?;

        Ok(RecordedResponse {
            status,
            headers,
            body: RecordedBody::from_bytes(&body),
        })
    }
}

fn header_map(headers: &reqwest::header::HeaderMap) -> RecordedHeaders {
    let mut map = RecordedHeaders::new();
    for (name, value) in headers {
        map.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    map
}

fn describe_request(request: &reqwest::Request) -> RecordedRequest {
    let body = request
        .body()
        .and_then(|b| b.as_bytes())
        .map(RecordedBody::from_bytes)
        .unwrap_or_default();

    RecordedRequest {
        method: request.method().as_str().to_string(),
        uri: request.url().to_string(),
        headers: header_map(request.headers()),
        body,
    }
}

fn requests_match(matchers: &[MatchOn], recorded: &RecordedRequest, actual: &RecordedRequest) -> bool {
    matchers.iter().all(|m| match m {
        MatchOn::Method => recorded.method.eq_ignore_ascii_case(&actual.method),
        MatchOn::Uri => recorded.uri == actual.uri,
        MatchOn::Body => recorded.body == actual.body,
        MatchOn::Host => url_part(&recorded.uri, |u| u.host_str().map(String::from))
            == url_part(&actual.uri, |u| u.host_str().map(String::from)),
        MatchOn::Path => url_part(&recorded.uri, |u| Some(u.path().to_string()))
            == url_part(&actual.uri, |u| Some(u.path().to_string())),
    })
}

fn url_part(uri: &str, f: impl Fn(&reqwest::Url) -> Option<String>) -> Option<String> {
    reqwest::Url::parse(uri).ok().as_ref().and_then(f)
}
