use crate::Error;
use crate::MusicClient;
use crate::collection::{Collection, Item};
use crate::jsarray;
use crate::reconcile;
use crate::service::{Service, ServiceRequest};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::fmt::Display;

/// The collections served as delta feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Tracks,
    Playlists,
    PlaylistEntries,
}

impl FeedKind {
    pub fn service(&self) -> Service {
        match self {
            FeedKind::Tracks => Service::TrackFeed,
            FeedKind::Playlists => Service::PlaylistFeed,
            FeedKind::PlaylistEntries => Service::PlaylistEntryFeed,
        }
    }
}

impl Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedKind::Tracks => f.write_str("tracks"),
            FeedKind::Playlists => f.write_str("playlists"),
            FeedKind::PlaylistEntries => f.write_str("playlist entries"),
        }
    }
}

/// An item that can be decoded from a feed page.
///
/// JSON envelopes decode items with serde; bracketed-array envelopes hand each
/// row to [`FeedItem::from_slots`].
pub trait FeedItem: Item + DeserializeOwned + Clone + Send + Sync {
    fn from_slots(slots: &[Value]) -> Result<Self, Error>;
}

/// One decoded page of a feed.
#[derive(Debug, Clone)]
pub struct FeedPage<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` on the last page
    pub next_page_token: Option<String>,
}

impl<T> FeedPage<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_page_token: None,
        }
    }

    pub fn is_last(&self) -> bool {
        self.next_page_token.is_none()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: DeserializeOwned"))]
struct FeedEnvelope<T> {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    data: Option<FeedData<T>>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct FeedData<T> {
    #[serde(default)]
    items: Vec<T>,
}

/// Decode a feed response body.
///
/// An empty body or an envelope without `data` decodes to an empty last page.
/// Bodies starting with `[` are bracketed-array envelopes with the rows at
/// `[1][0]`; they never carry a cursor.
///
/// # Example
///
/// ```
/// use gmusicrs::{FeedPage, Track, decode_page};
///
/// let page: FeedPage<Track> = decode_page(r#"{"kind": "sj#trackList"}"#).unwrap();
/// assert!(page.items.is_empty());
/// assert!(page.is_last());
/// ```
pub fn decode_page<T: FeedItem>(body: &str) -> Result<FeedPage<T>, Error> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(FeedPage::empty());
    }

    if body.starts_with('[') || body.starts_with(")]}'") {
        return decode_rows(body);
    }

    let envelope: FeedEnvelope<T> = serde_json::from_str(body)?;
    let items = envelope.data.map(|data| data.items).unwrap_or_default();
    let next_page_token = envelope.next_page_token.filter(|token| !token.is_empty());

    Ok(FeedPage {
        items,
        next_page_token,
    })
}

fn decode_rows<T: FeedItem>(body: &str) -> Result<FeedPage<T>, Error> {
    let document = jsarray::parse(body)?;

    let rows = match document.get(1).and_then(|v| v.get(0)) {
        None | Some(Value::Null) => return Ok(FeedPage::empty()),
        Some(Value::Array(rows)) => rows,
        Some(other) => {
            return Err(Error::Decode(format!(
                "expected an array of rows, found {other}"
            )));
        }
    };

    let items = rows
        .iter()
        .map(|row| match row {
            Value::Array(slots) => T::from_slots(slots),
            other => Err(Error::Decode(format!("expected a row, found {other}"))),
        })
        .collect::<Result<Vec<T>, Error>>()?;

    Ok(FeedPage {
        items,
        next_page_token: None,
    })
}

/// The `updated-min` parameter for a watermark, in microseconds since the epoch.
///
/// No watermark, or one at or before the epoch, gives 0: a full fetch.
pub fn updated_min(since: Option<DateTime<Utc>>) -> i64 {
    since
        .map(|since| since.timestamp_micros())
        .filter(|micros| *micros > 0)
        .unwrap_or(0)
}

// A full fetch as the caller sees it: merged into nothing, so tombstones and
// duplicate ids are gone.
pub(crate) fn materialize<T: Item + Clone>(delta: Collection<T>) -> Collection<T> {
    let last_updated = delta.last_updated();
    reconcile::merge_at(&Collection::new(), &delta, last_updated)
        .unwrap_or_else(|| Collection::from_unique(Vec::new(), last_updated))
}

impl MusicClient {
    fn feed_request(
        &self,
        kind: FeedKind,
        since: Option<DateTime<Utc>>,
        cursor: Option<&str>,
    ) -> ServiceRequest {
        let mut body = json!({ "max-results": self.get_page_size() });
        if let Some(cursor) = cursor {
            body["start-token"] = json!(cursor);
        }

        ServiceRequest::new(kind.service())
            .with_query("alt", "json")
            .with_query("include-tracks", "true")
            .with_query("updated-min", updated_min(since))
            .with_body(body)
    }

    /// Fetch the first page of a feed.
    ///
    /// # Arguments
    ///
    /// * `kind` - Which feed to read
    /// * `since` - Lower bound of the fetch; `None` fetches everything, tombstones included
    pub async fn fetch_delta<T: FeedItem>(
        &self,
        kind: FeedKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<FeedPage<T>, Error> {
        let body = self.call_service(self.feed_request(kind, since, None)).await?;
        decode_page(&body)
    }

    /// Fetch the page of a feed that `cursor` points at.
    pub async fn fetch_continue<T: FeedItem>(
        &self,
        kind: FeedKind,
        since: Option<DateTime<Utc>>,
        cursor: &str,
    ) -> Result<FeedPage<T>, Error> {
        let body = self
            .call_service(self.feed_request(kind, since, Some(cursor)))
            .await?;
        decode_page(&body)
    }

    /// Fetch every page of a feed into one delta collection.
    ///
    /// A failure of the first page is returned. A failure of a later page is
    /// passed to the error sink and ends the fetch with the pages read so far.
    /// The result keeps tombstones; its watermark is the completion time.
    pub async fn fetch_feed<T: FeedItem>(
        &self,
        kind: FeedKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Collection<T>, Error> {
        let first = self.fetch_delta::<T>(kind, since).await?;

        let mut items = first.items;
        let mut cursor = first.next_page_token;
        let mut seen = HashSet::new();
        let mut pages = 1usize;

        while let Some(token) = cursor.take() {
            if !seen.insert(token.clone()) {
                self.report(
                    &format!("Fetching {kind} stopped"),
                    &Error::Decode(format!("continuation token repeated after {pages} pages")),
                );
                break;
            }

            match self.fetch_continue::<T>(kind, since, &token).await {
                Ok(page) => {
                    pages += 1;
                    log::debug!("Fetched page {pages} of {kind}: {} items", page.items.len());
                    items.extend(page.items);
                    cursor = page.next_page_token;
                }
                Err(e) => {
                    self.report(&format!("Fetching page {} of {kind} failed", pages + 1), &e);
                    break;
                }
            }
        }

        log::debug!("Fetched {} {kind} in {pages} pages", items.len());

        Ok(Collection::from_items(items, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Track;
    use crate::{MockServiceCall, Session};

    fn page(ids: &[&str], next: Option<&str>) -> String {
        let items: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
        let mut envelope = json!({ "kind": "sj#trackList", "data": { "items": items } });
        if let Some(next) = next {
            envelope["nextPageToken"] = json!(next);
        }
        envelope.to_string()
    }

    #[test]
    fn test_updated_min() {
        assert_eq!(updated_min(None), 0);
        assert_eq!(updated_min(Some(DateTime::<Utc>::default())), 0);
        let since = DateTime::from_timestamp_micros(1_400_000_000_123_456).unwrap();
        assert_eq!(updated_min(Some(since)), 1_400_000_000_123_456);
        let before_epoch = DateTime::from_timestamp_micros(-5).unwrap();
        assert_eq!(updated_min(Some(before_epoch)), 0);
    }

    #[test]
    fn test_decode_empty_envelopes() {
        for body in ["", "  ", r#"{"kind": "sj#trackList"}"#, r#"{"data": null}"#, r#"{"data": {}}"#] {
            let page: FeedPage<Track> = decode_page(body).unwrap();
            assert!(page.items.is_empty(), "body {body:?}");
            assert!(page.is_last());
        }
    }

    #[test]
    fn test_decode_empty_token_is_last_page() {
        let page: FeedPage<Track> = decode_page(&page(&["a"], Some(""))).unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.is_last());
    }

    #[test]
    fn test_decode_rows() {
        let body = r#"[["x"],[[["t1","One"],["t2","Two",,"Artist"]]]]"#;
        let page: FeedPage<Track> = decode_page(body).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[1].artist, "Artist");
        assert!(page.is_last());

        let page: FeedPage<Track> = decode_page("[[],[]]").unwrap();
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_decode_malformed_is_protocol_error() {
        let err = decode_page::<Track>(r#"{"data": {"items": 5}}"#).unwrap_err();
        assert!(err.is_protocol_decode());
    }

    #[tokio::test]
    async fn test_fetch_feed_follows_cursor() {
        let mut service = MockServiceCall::new();
        service.expect_call().times(2).returning(|_, request| {
            let body = request.body.unwrap_or_default();
            match body.get("start-token").and_then(Value::as_str) {
                None => Ok(page(&["a", "b"], Some("p2"))),
                Some("p2") => Ok(page(&["c"], None)),
                Some(other) => panic!("unexpected token {other}"),
            }
        });

        let client = MusicClient::new()
            .with_session(Session::new("token".to_string()))
            .with_service(service);

        let tracks = client
            .fetch_feed::<Track>(FeedKind::Tracks, None)
            .await
            .unwrap();
        assert_eq!(tracks.ids().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_fetch_feed_stops_on_repeated_token() {
        let mut service = MockServiceCall::new();
        service
            .expect_call()
            .times(2)
            .returning(|_, _| Ok(page(&["a"], Some("same"))));

        let client = MusicClient::new()
            .with_session(Session::new("token".to_string()))
            .with_service(service);

        let tracks = client
            .fetch_feed::<Track>(FeedKind::Tracks, None)
            .await
            .unwrap();
        assert_eq!(tracks.len(), 1);
    }

    #[tokio::test]
    async fn test_feed_request_shape() {
        let mut service = MockServiceCall::new();
        service
            .expect_call()
            .withf(|_, request| {
                request.service == Service::PlaylistFeed
                    && request.query_value("alt") == Some("json")
                    && request.query_value("include-tracks") == Some("true")
                    && request.query_value("updated-min") == Some("0")
                    && request.body == Some(json!({ "max-results": 25 }))
            })
            .times(1)
            .returning(|_, _| Ok(String::new()));

        let client = MusicClient::new()
            .with_session(Session::new("token".to_string()))
            .with_page_size(25)
            .with_service(service);

        let page = client
            .fetch_delta::<crate::Playlist>(FeedKind::Playlists, None)
            .await
            .unwrap();
        assert!(page.items.is_empty());
    }
}
