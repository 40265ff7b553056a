use chrono::{DateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};

const SESSION_ID_LENGTH: usize = 12;

/// An authenticated session with the music service.
///
/// The credential exchange that produces the auth token happens outside this
/// crate. A `Session` is an ordinary value: it can be serialized to skip the
/// exchange next time, and one client can hand its session to another.
///
/// # Example
///
/// ```no_run
/// use gmusicrs::{MusicClient, Session};
///
/// let session = Session::new("auth_token".to_string());
/// let library = MusicClient::new().with_session(session.clone());
/// let player = MusicClient::new().with_session(session);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// Token sent with every service call
    pub auth_token: String,
    /// Streaming session id, mixed into signed stream URLs
    pub session_id: String,
    /// When the service stops accepting this session, if known
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a session for an auth token with a fresh random streaming session id.
    pub fn new(auth_token: String) -> Self {
        Self {
            auth_token,
            session_id: random_session_id(),
            expires: None,
        }
    }

    pub fn with_session_id(mut self, session_id: String) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_expiry(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|expires| expires <= Utc::now())
    }

    /// Value of the `Authorization` header for service calls.
    pub fn authorization_header(&self) -> String {
        format!("GoogleLogin auth={}", self.auth_token)
    }
}

fn random_session_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LENGTH)
        .map(char::from)
        .collect()
}
