//! Remote relay node speaking the Lavalink v4 REST api.
//!
//! Only the lookup endpoints are used, the node's resolved page urls are
//! streamed locally through songbird. The node only searches when asked to,
//! so plain text is sent as an explicit search.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use crate::error::BackendError;
use crate::playback::{AudioBackend, StreamLocator, Track};

#[derive(Debug, Clone)]
pub struct RelayNode {
    http: reqwest::Client,
    base: Url,
    password: String,
}

impl RelayNode {
    pub fn new(
        http: reqwest::Client,
        host: &str,
        port: u16,
        password: impl Into<String>,
        secure: bool,
    ) -> Result<Self, BackendError> {
        let scheme = if secure { "https" } else { "http" };
        let base = Url::parse(&format!("{scheme}://{host}:{port}/"))?;
        Ok(Self {
            http,
            base,
            password: password.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<reqwest::Response, BackendError> {
        let url = self.base.join(path)?;
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, &self.password)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(BackendError::Status(status))
        }
    }
}

#[async_trait]
impl AudioBackend for RelayNode {
    async fn probe(&self) -> Result<(), BackendError> {
        let version = self.get("version", &[]).await?.text().await?;
        tracing::debug!("Relay node at {} runs {version}", self.base);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn lookup(&self, query: &str) -> Result<Option<Track>, BackendError> {
        let identifier = if is_identifier(query) {
            query.to_string()
        } else {
            self.search_directive(query)
        };
        let body = self
            .get("v4/loadtracks", &[("identifier", identifier.as_str())])
            .await?
            .bytes()
            .await?;
        let response: LoadResponse = serde_json::from_slice(&body)?;
        response.first_track()
    }
}

/// Whether the node can load `query` as is: a web url or a `<source>search:` query.
fn is_identifier(query: &str) -> bool {
    if let Ok(url) = Url::parse(query) {
        if matches!(url.scheme(), "http" | "https") {
            return true;
        }
    }
    query
        .split_once(':')
        .is_some_and(|(source, _)| source.ends_with("search") && !source.contains(char::is_whitespace))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadResponse {
    load_type: LoadType,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LoadType {
    Track,
    Playlist,
    Search,
    Empty,
    Error,
}

#[derive(Debug, Deserialize)]
struct RelayTrack {
    info: TrackInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackInfo {
    title: String,
    uri: Option<String>,
    /// Milliseconds.
    length: u64,
    is_stream: bool,
}

#[derive(Debug, Deserialize)]
struct Playlist {
    tracks: Vec<RelayTrack>,
}

#[derive(Debug, Deserialize)]
struct LoadError {
    message: Option<String>,
    cause: Option<String>,
}

impl LoadResponse {
    fn first_track(self) -> Result<Option<Track>, BackendError> {
        let track = match self.load_type {
            LoadType::Track => Some(serde_json::from_value::<RelayTrack>(self.data)?),
            LoadType::Search => serde_json::from_value::<Vec<RelayTrack>>(self.data)?
                .into_iter()
                .next(),
            LoadType::Playlist => serde_json::from_value::<Playlist>(self.data)?
                .tracks
                .into_iter()
                .next(),
            LoadType::Empty => None,
            LoadType::Error => {
                let error: LoadError = serde_json::from_value(self.data)?;
                let message = error
                    .message
                    .or(error.cause)
                    .unwrap_or_else(|| "unknown error".to_string());
                return Err(BackendError::LoadFailed { message });
            }
        };
        Ok(track.and_then(RelayTrack::into_track))
    }
}

impl RelayTrack {
    fn into_track(self) -> Option<Track> {
        let TrackInfo {
            title,
            uri,
            length,
            is_stream,
        } = self.info;
        let duration = (!is_stream).then(|| Duration::from_millis(length));
        Some(Track {
            title,
            locator: StreamLocator::Page(uri?),
            duration,
        })
    }
}
