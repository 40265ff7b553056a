//! Shared helpers for the integration tests: a scripted transport that records
//! every request it receives.

#![allow(dead_code)]

use gmusicrs::{Error, MusicClient, Service, ServiceCall, ServiceRequest, Session};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

type Handler = dyn Fn(&ServiceRequest) -> Result<String, Error> + Send + Sync;

/// A [`ServiceCall`] that answers from a closure and keeps a log of requests.
#[derive(Clone)]
pub struct ScriptedService {
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<ServiceRequest>>>,
}

impl ScriptedService {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ServiceRequest) -> Result<String, Error> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<ServiceRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Answer `request` without recording it.
    pub fn call_handler(&self, request: &ServiceRequest) -> Result<String, Error> {
        (self.handler)(request)
    }

    pub fn calls_to(&self, service: Service) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.service == service)
            .count()
    }
}

#[async_trait::async_trait]
impl ServiceCall for ScriptedService {
    async fn call(&self, _session: &Session, request: ServiceRequest) -> Result<String, Error> {
        let response = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        response
    }
}

/// Collects everything passed to the error sink.
#[derive(Clone, Default)]
pub struct ErrorLog {
    entries: Arc<Mutex<Vec<(String, String, bool)>>>,
}

impl ErrorLog {
    /// (context message, error text, whether the error is a protocol decode failure)
    pub fn entries(&self) -> Vec<(String, String, bool)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

/// An authenticated client that talks to `service` and reports into `errors`.
pub fn client(service: &ScriptedService, errors: &ErrorLog) -> MusicClient {
    let _ = env_logger::builder().is_test(true).try_init();

    let entries = errors.entries.clone();
    MusicClient::new()
        .with_session(Session::new("test_token".to_string()))
        .with_service(service.clone())
        .with_error_callback(move |message, error| {
            entries.lock().unwrap().push((
                message.to_string(),
                error.to_string(),
                error.is_protocol_decode(),
            ));
        })
}

/// The `start-token` of a feed request, if any.
pub fn start_token(request: &ServiceRequest) -> Option<String> {
    request
        .body
        .as_ref()
        .and_then(|body| body.get("start-token"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// A JSON feed page.
pub fn feed_page(kind: &str, items: Vec<Value>, next: Option<&str>) -> String {
    let mut page = json!({ "kind": kind, "data": { "items": items } });
    if let Some(next) = next {
        page["nextPageToken"] = json!(next);
    }
    page.to_string()
}

pub fn track(id: &str, title: &str) -> Value {
    json!({
        "kind": "sj#track",
        "id": id,
        "title": title,
        "artist": "Artist",
        "album": "Album",
        "durationMillis": "180000",
        "deleted": false,
    })
}

pub fn deleted_track(id: &str) -> Value {
    json!({ "kind": "sj#track", "id": id, "deleted": true })
}

pub fn playlist(id: &str, name: &str) -> Value {
    json!({ "kind": "sj#playlist", "id": id, "name": name, "type": "USER_GENERATED" })
}

pub fn shared_playlist(id: &str, name: &str, share_token: &str) -> Value {
    json!({
        "kind": "sj#playlist",
        "id": id,
        "name": name,
        "type": "SHARED",
        "shareToken": share_token,
        "ownerName": "Someone Else",
    })
}

pub fn entry(id: &str, playlist_id: &str, track_id: &str, position: u64) -> Value {
    json!({
        "kind": "sj#playlistEntry",
        "id": id,
        "playlistId": playlist_id,
        "trackId": track_id,
        "absolutePosition": format!("{position:020}"),
        "source": "1",
        "deleted": false,
    })
}

pub fn ok_mutation(ids: &[&str]) -> String {
    let results: Vec<Value> = ids
        .iter()
        .map(|id| json!({ "id": id, "response_code": "OK" }))
        .collect();
    json!({ "mutate_response": results }).to_string()
}
