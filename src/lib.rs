#![doc = include_str!("../README.md")]

mod account;
mod assemble;
mod collection;
mod feed;
pub mod jsarray;
mod library;
mod mutation;
mod playlist;
mod reconcile;
mod service;
mod session;
pub mod sort;
mod stream;
mod track;

pub use account::*;
pub use assemble::*;
pub use collection::*;
pub use feed::*;
pub use library::*;
pub use mutation::*;
pub use playlist::*;
pub use reconcile::*;
pub use service::*;
pub use session::*;
pub use stream::*;
pub use track::*;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

pub(crate) static SJ_API_BASE_URL: &str = "https://www.googleapis.com/sj/v1.4";

pub(crate) const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Error response from the music service.
///
/// Non-success responses carry a JSON body of the form
/// `{"error": {"code": 404, "message": "..."}}`. When the body cannot be parsed
/// the HTTP status and raw body text are used instead.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceApiError {
    /// Name of the service that failed (e.g. "trackfeed")
    #[serde(default)]
    pub service: String,
    /// HTTP status code
    #[serde(alias = "code")]
    pub status: u16,
    /// Human-readable error message
    #[serde(default)]
    pub message: String,
}

impl Display for ServiceApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "service '{}' failed: {} {}",
            self.service, self.status, self.message
        )
    }
}

/// Errors that can occur when using the gmusicrs library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed (network issues, timeouts, etc.)
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The service answered with a non-success status
    #[error("Service API error: {0}")]
    ServiceApiError(ServiceApiError),
    /// The session is missing, expired, or was rejected by the service
    #[error("Not authenticated - have you set a session on the client?")]
    NotAuthenticated,
    /// JSON serialization/deserialization failed
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    /// A response body did not have the expected shape
    #[error("Protocol decode error: {0}")]
    Decode(String),
    /// A required argument was missing or out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// No stream URL deriver has been configured on the client
    #[error("No stream URL deriver configured")]
    NoStreamUrlDeriver,
    /// No primary streaming URL available for the track
    #[error("No primary streaming URL available")]
    NoPrimaryUrl,
    /// Failed to initialize audio stream
    #[error("Stream initialization error: {0}")]
    StreamInitializationError(String),
}

impl Error {
    /// Whether the error means the response could not be mapped into the expected shape.
    pub fn is_protocol_decode(&self) -> bool {
        matches!(self, Error::Decode(_) | Error::SerdeJson(_))
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }
}

/// Callback invoked with a context message whenever an operation recovers from an error.
///
/// Collection-level and mutation operations never hand service or decode errors
/// back to the caller; they report them here and return `None` or `false`.
pub type ErrorCallback = Arc<dyn Fn(&str, &Error) + Send + Sync>;

/// Main client for the music service.
///
/// `MusicClient` holds the session, the transport used to reach the service, and
/// the configuration for feed paging. Library synchronization lives in
/// [`MusicClient::update_tracks`] and [`MusicClient::update_playlists`].
///
/// # Example
///
/// ```no_run
/// use gmusicrs::{MusicClient, Session};
///
/// # async fn example() {
/// let client = MusicClient::new()
///     .with_session(Session::new("auth_token".to_string()))
///     .with_error_callback(|message, error| eprintln!("{message}: {error}"));
///
/// if let Some(tracks) = client.get_all_tracks().await {
///     println!("{} tracks in library", tracks.len());
/// }
/// # }
/// ```
///
/// # Thread Safety
///
/// `MusicClient` is `Send + Sync`. The session is swapped atomically, so it can be
/// replaced or cleared while other tasks are issuing requests.
pub struct MusicClient {
    pub client: reqwest::Client,
    service: Option<Arc<dyn ServiceCall>>,
    session: ArcSwapOption<Session>,
    base_url: Option<String>,
    page_size: Option<u32>,
    on_error_callback: Option<ErrorCallback>,
    stream_url_deriver: Option<Arc<dyn StreamUrlDeriver>>,
}

impl Default for MusicClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MusicClient {
    /// Create a new, unauthenticated client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            service: None,
            session: ArcSwapOption::from(None),
            base_url: None,
            page_size: None,
            on_error_callback: None,
            stream_url_deriver: None,
        }
    }

    /// Set a custom HTTP client using the builder pattern.
    ///
    /// The client is used by the default transport and for stream downloads.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Replace the transport used for service calls.
    ///
    /// This is the seam for proxies, request signing, recording, or test doubles.
    /// When unset, requests go through [`HttpService`].
    pub fn with_service<S>(mut self, service: S) -> Self
    where
        S: ServiceCall + 'static,
    {
        self.service = Some(Arc::new(service));
        self
    }

    /// Set an existing session using the builder pattern.
    ///
    /// Sessions are plain values: a session obtained by one client can be cloned
    /// and handed to another.
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = ArcSwapOption::from_pointee(session);
        self
    }

    /// Set the base URL of the service using the builder pattern.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Set the number of items requested per feed page using the builder pattern.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Set the error sink using the builder pattern.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use gmusicrs::MusicClient;
    ///
    /// let client = MusicClient::new().with_error_callback(|message, error| {
    ///     eprintln!("{message}: {error}");
    /// });
    /// ```
    pub fn with_error_callback<F>(mut self, error_callback: F) -> Self
    where
        F: Fn(&str, &Error) + Send + Sync + 'static,
    {
        self.on_error_callback = Some(Arc::new(error_callback));
        self
    }

    /// Set the deriver used to obtain signed stream URLs using the builder pattern.
    pub fn with_stream_url_deriver<D>(mut self, deriver: D) -> Self
    where
        D: StreamUrlDeriver + 'static,
    {
        self.stream_url_deriver = Some(Arc::new(deriver));
        self
    }

    /// Get the base URL of the service.
    ///
    /// Returns the explicitly set URL or the public `sj` endpoint.
    pub fn get_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| SJ_API_BASE_URL.to_string())
    }

    /// Get the number of items requested per feed page.
    pub fn get_page_size(&self) -> u32 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Get the current session.
    ///
    /// Returns `None` if the client is not authenticated. The returned value can be
    /// persisted or passed to another client.
    pub fn get_session(&self) -> Option<Arc<Session>> {
        self.session.load_full()
    }

    /// Replace the current session.
    pub fn set_session(&self, session: Session) {
        self.session.store(Some(Arc::new(session)));
    }

    /// Drop the current session. Subsequent operations fail with
    /// [`Error::NotAuthenticated`] until a new session is set.
    pub fn logout(&self) {
        self.session.store(None);
    }

    /// Whether the client holds a session that has not expired.
    pub fn is_logged_in(&self) -> bool {
        self.get_session()
            .map(|session| !session.is_expired())
            .unwrap_or(false)
    }

    /// Set the error sink.
    pub fn on_error<F>(&mut self, f: F)
    where
        F: Fn(&str, &Error) + Send + Sync + 'static,
    {
        self.on_error_callback = Some(Arc::new(f));
    }

    pub(crate) fn get_stream_url_deriver(&self) -> Option<Arc<dyn StreamUrlDeriver>> {
        self.stream_url_deriver.clone()
    }

    /// Issue one authenticated service call.
    ///
    /// Fails with [`Error::NotAuthenticated`] without touching the network when
    /// there is no usable session.
    pub(crate) async fn call_service(&self, request: ServiceRequest) -> Result<String, Error> {
        let session = match self.get_session() {
            Some(session) if !session.is_expired() => session,
            _ => return Err(Error::NotAuthenticated),
        };

        let service = request.service;
        log::debug!("Calling service '{service}'");

        let body = match &self.service {
            Some(transport) => transport.call(&session, request).await?,
            None => {
                HttpService::new(self.client.clone(), self.get_base_url())
                    .call(&session, request)
                    .await?
            }
        };

        if log::log_enabled!(log::Level::Trace) {
            log::trace!("Service '{service}' responded: {body}");
        }

        Ok(body)
    }

    /// Report an error recovered at an operation boundary.
    pub(crate) fn report(&self, message: &str, error: &Error) {
        log::warn!("{message}: {error}");
        if let Some(cb) = &self.on_error_callback {
            cb(message, error);
        }
    }
}

// Utility function to deserialize a null value as a default value
pub(crate) fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::deserialize(deserializer).map(|opt| opt.unwrap_or_default())
}

// The service sends most numbers as strings ("durationMillis": "215000").
// Accept numbers, numeric strings, and null (as the default value).
pub(crate) fn deserialize_lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Default,
    T::Err: Display,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(serde_json::Value::Number(n)) => n.to_string().parse().map_err(de::Error::custom),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(T::default()),
        Some(serde_json::Value::String(s)) => s.trim().parse().map_err(de::Error::custom),
        Some(other) => Err(de::Error::custom(format!(
            "expected a number or numeric string, found {other}"
        ))),
    }
}

// Microseconds since the epoch; zero and negative values mean "not set".
pub(crate) fn deserialize_micros<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let micros: i64 = deserialize_lenient(deserializer)?;
    Ok(micros_to_datetime(micros))
}

pub(crate) fn micros_to_datetime(micros: i64) -> Option<DateTime<Utc>> {
    if micros > 0 {
        DateTime::from_timestamp_micros(micros)
    } else {
        None
    }
}
