use crate::Error;
use crate::ServiceApiError;
use crate::Session;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Display;
use strum_macros::{AsRefStr, EnumString};

static USER_AGENT: &str = "Android-Music/1413 (tilapia KOT49H)";

/// Services of the `sj` API used by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr)]
pub enum Service {
    /// Delta feed of library tracks
    #[strum(serialize = "trackfeed")]
    TrackFeed,
    /// Delta feed of playlists
    #[strum(serialize = "playlistfeed")]
    PlaylistFeed,
    /// Delta feed of entries of the user's own playlists
    #[strum(serialize = "plentryfeed")]
    PlaylistEntryFeed,
    /// Batched entry lookup for shared playlists, keyed by share token
    #[strum(serialize = "plentries/shared")]
    SharedPlaylistEntries,
    /// Track mutations
    #[strum(serialize = "trackbatch")]
    TrackBatch,
    /// Playlist mutations
    #[strum(serialize = "playlistbatch")]
    PlaylistBatch,
    /// Playlist entry mutations
    #[strum(serialize = "plentriesbatch")]
    PlaylistEntryBatch,
    /// Library size and upload progress
    #[strum(serialize = "getstatus")]
    GetStatus,
    /// Account settings
    #[strum(serialize = "loadsettings")]
    LoadSettings,
}

impl Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// A single call to a named service: query parameters plus an optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRequest {
    pub service: Service,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ServiceRequest {
    pub fn new(service: Service) -> Self {
        Self {
            service,
            query: Vec::new(),
            body: None,
        }
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Look up a query parameter by name.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// The authenticated service-call boundary.
///
/// Implementations send `request` with the session's credentials attached and
/// return the raw response body of a successful call. Non-success outcomes are
/// errors; a rejected session is [`Error::NotAuthenticated`].
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ServiceCall: Send + Sync {
    async fn call(&self, session: &Session, request: ServiceRequest) -> Result<String, Error>;
}

#[derive(Debug, Deserialize)]
struct ServiceApiErrorEnvelope {
    error: ServiceApiError,
}

/// Default [`ServiceCall`] implementation over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpService {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, service: Service) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), service)
    }
}

#[async_trait::async_trait]
impl ServiceCall for HttpService {
    async fn call(&self, session: &Session, request: ServiceRequest) -> Result<String, Error> {
        let url = self.url(request.service);

        let mut req = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, session.authorization_header())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .query(&request.query);

        if let Some(body) = &request.body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();

        if status.is_success() {
            return Ok(resp.text().await?);
        }

        let body = resp.text().await.unwrap_or_default();

        if status == StatusCode::UNAUTHORIZED {
            log::debug!("Requested URL: {url}");
            log::debug!("Session rejected: {body}");
            return Err(Error::NotAuthenticated);
        }

        let mut err = match serde_json::from_str::<ServiceApiErrorEnvelope>(&body) {
            Ok(envelope) => envelope.error,
            Err(_) => ServiceApiError {
                service: String::new(),
                status: status.as_u16(),
                message: body,
            },
        };
        err.service = request.service.to_string();

        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Requested URL: {url}");
            log::debug!("Service API Error: {err}");
        }

        Err(Error::ServiceApiError(err))
    }
}
