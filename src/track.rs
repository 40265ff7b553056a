use crate::Error;
use crate::MusicClient;
use crate::collection::{Collection, Item, Tracklist};
use crate::feed::{FeedItem, FeedKind};
use crate::jsarray;
use crate::mutation::Mutation;
use crate::service::Service;
use crate::sort::{SortKeys, SortSource};
use crate::{deserialize_lenient, deserialize_micros, deserialize_null_default};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A track in the user's library.
///
/// Tracks are immutable once decoded: the normalized [`SortKeys`] are computed
/// when the record is built from the wire format.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", from = "TrackRecord")]
pub struct Track {
    /// Library id, or the store id / nid while the server has not assigned one
    pub id: String,
    pub client_id: Option<String>,
    /// Catalog identifier for store tracks
    pub store_id: Option<String>,
    pub nid: Option<String>,

    pub title: String,
    pub artist: String,
    pub composer: String,
    pub album: String,
    pub album_artist: String,
    pub genre: String,
    pub comment: String,
    pub year: u32,

    pub track_number: u32,
    pub total_track_count: u32,
    pub disc_number: u32,
    pub total_disc_count: u32,

    pub duration_millis: u64,
    pub beats_per_minute: u32,
    pub play_count: u32,
    /// Rating from 0 (unrated) to 5
    pub rating: u8,
    pub estimated_size: u64,
    pub track_type: u32,

    pub album_id: Option<String>,
    pub artist_id: Vec<String>,
    pub album_art_ref: Vec<ArtRef>,
    pub artist_art_ref: Vec<ArtRef>,

    /// Tombstone flag
    pub deleted: bool,

    #[serde(serialize_with = "chrono::serde::ts_microseconds_option::serialize")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(serialize_with = "chrono::serde::ts_microseconds_option::serialize")]
    pub last_modified_timestamp: Option<DateTime<Utc>>,
    #[serde(serialize_with = "chrono::serde::ts_microseconds_option::serialize")]
    pub recent_timestamp: Option<DateTime<Utc>>,

    /// Normalized keys used for ordering
    #[serde(skip_serializing)]
    pub sort_keys: SortKeys,

    /// Set on synthetic tracks that only carry an id
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub placeholder: bool,
}

/// Reference to a piece of artwork.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ArtRef {
    pub url: String,
}

impl ArtRef {
    // Art URLs are often protocol-relative ("//lh3...").
    fn normalized(self) -> Self {
        if self.url.starts_with("//") {
            Self {
                url: format!("http:{}", self.url),
            }
        } else {
            self
        }
    }
}

// Wire shape of a track, shared by the JSON feed and the positional rows.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct TrackRecord {
    #[serde(deserialize_with = "deserialize_null_default")]
    id: String,
    client_id: Option<String>,
    store_id: Option<String>,
    nid: Option<String>,
    #[serde(deserialize_with = "deserialize_null_default")]
    title: String,
    #[serde(deserialize_with = "deserialize_null_default")]
    artist: String,
    #[serde(deserialize_with = "deserialize_null_default")]
    composer: String,
    #[serde(deserialize_with = "deserialize_null_default")]
    album: String,
    #[serde(deserialize_with = "deserialize_null_default")]
    album_artist: String,
    #[serde(deserialize_with = "deserialize_null_default")]
    genre: String,
    #[serde(deserialize_with = "deserialize_null_default")]
    comment: String,
    #[serde(deserialize_with = "deserialize_lenient")]
    year: u32,
    #[serde(deserialize_with = "deserialize_lenient")]
    track_number: u32,
    #[serde(deserialize_with = "deserialize_lenient")]
    total_track_count: u32,
    #[serde(deserialize_with = "deserialize_lenient")]
    disc_number: u32,
    #[serde(deserialize_with = "deserialize_lenient")]
    total_disc_count: u32,
    #[serde(deserialize_with = "deserialize_lenient")]
    duration_millis: u64,
    #[serde(deserialize_with = "deserialize_lenient")]
    beats_per_minute: u32,
    #[serde(deserialize_with = "deserialize_lenient")]
    play_count: u32,
    #[serde(deserialize_with = "deserialize_lenient")]
    rating: u8,
    #[serde(deserialize_with = "deserialize_lenient")]
    estimated_size: u64,
    #[serde(deserialize_with = "deserialize_lenient")]
    track_type: u32,
    album_id: Option<String>,
    #[serde(deserialize_with = "deserialize_null_default")]
    artist_id: Vec<String>,
    #[serde(deserialize_with = "deserialize_null_default")]
    album_art_ref: Vec<ArtRef>,
    #[serde(deserialize_with = "deserialize_null_default")]
    artist_art_ref: Vec<ArtRef>,
    #[serde(deserialize_with = "deserialize_null_default")]
    deleted: bool,
    #[serde(deserialize_with = "deserialize_micros")]
    creation_timestamp: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "deserialize_micros")]
    last_modified_timestamp: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "deserialize_micros")]
    recent_timestamp: Option<DateTime<Utc>>,
    title_norm: Option<String>,
    artist_norm: Option<String>,
    album_norm: Option<String>,
    album_artist_norm: Option<String>,
    placeholder: bool,
}

impl From<TrackRecord> for Track {
    fn from(record: TrackRecord) -> Self {
        let sort_keys = SortKeys::new(SortSource {
            title: &record.title,
            artist: &record.artist,
            album: &record.album,
            album_artist: &record.album_artist,
            title_norm: record.title_norm.as_deref(),
            artist_norm: record.artist_norm.as_deref(),
            album_norm: record.album_norm.as_deref(),
            album_artist_norm: record.album_artist_norm.as_deref(),
        });

        let id = [Some(&record.id), record.store_id.as_ref(), record.nid.as_ref()]
            .into_iter()
            .flatten()
            .find(|id| !id.is_empty())
            .cloned()
            .unwrap_or_default();

        Track {
            id,
            client_id: record.client_id,
            store_id: record.store_id,
            nid: record.nid,
            title: record.title,
            artist: record.artist,
            composer: record.composer,
            album: record.album,
            album_artist: record.album_artist,
            genre: record.genre,
            comment: record.comment,
            year: record.year,
            track_number: record.track_number,
            total_track_count: record.total_track_count,
            disc_number: record.disc_number,
            total_disc_count: record.total_disc_count,
            duration_millis: record.duration_millis,
            beats_per_minute: record.beats_per_minute,
            play_count: record.play_count,
            rating: record.rating,
            estimated_size: record.estimated_size,
            track_type: record.track_type,
            album_id: record.album_id,
            artist_id: record.artist_id,
            album_art_ref: record.album_art_ref.into_iter().map(ArtRef::normalized).collect(),
            artist_art_ref: record.artist_art_ref.into_iter().map(ArtRef::normalized).collect(),
            deleted: record.deleted,
            creation_timestamp: record.creation_timestamp,
            last_modified_timestamp: record.last_modified_timestamp,
            recent_timestamp: record.recent_timestamp,
            sort_keys,
            placeholder: record.placeholder,
        }
    }
}

impl Track {
    /// A synthetic track carrying only an id.
    ///
    /// Used when a playlist entry arrives without its embedded track data.
    pub fn placeholder(track_id: &str) -> Self {
        Track {
            id: track_id.to_string(),
            placeholder: true,
            ..Default::default()
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// The artist, or the album artist when the artist is empty.
    pub fn artist_unified(&self) -> &str {
        if self.artist.is_empty() {
            &self.album_artist
        } else {
            &self.artist
        }
    }

    /// The album artist, or the artist when the album artist is empty.
    pub fn album_artist_unified(&self) -> &str {
        if self.album_artist.is_empty() {
            &self.artist
        } else {
            &self.album_artist
        }
    }

    /// Position within an album: `disc * 1000 + track`.
    pub fn album_position(&self) -> u64 {
        u64::from(self.disc_number) * 1000 + u64::from(self.track_number)
    }

    pub fn primary_art_url(&self) -> Option<&str> {
        self.album_art_ref.first().map(|art| art.url.as_str())
    }
}

impl Item for Track {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

impl FeedItem for Track {
    fn from_slots(slots: &[Value]) -> Result<Self, Error> {
        jsarray::track_from_slots(slots)
    }
}

/// A single metadata edit for [`MusicClient::update_track_metadata`].
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataChange {
    Title(String),
    Artist(String),
    Album(String),
    AlbumArtist(String),
    Composer(String),
    Genre(String),
    Comment(String),
    Year(u32),
    TrackNumber(u32),
    TotalTrackCount(u32),
    DiscNumber(u32),
    TotalDiscCount(u32),
    PlayCount(u32),
    BeatsPerMinute(u32),
    /// 0 (unrated) to 5
    Rating(u8),
}

impl MetadataChange {
    /// Wire field name and value of the change.
    pub fn field(&self) -> (&'static str, Value) {
        match self {
            MetadataChange::Title(v) => ("title", json!(v)),
            MetadataChange::Artist(v) => ("artist", json!(v)),
            MetadataChange::Album(v) => ("album", json!(v)),
            MetadataChange::AlbumArtist(v) => ("albumArtist", json!(v)),
            MetadataChange::Composer(v) => ("composer", json!(v)),
            MetadataChange::Genre(v) => ("genre", json!(v)),
            MetadataChange::Comment(v) => ("comment", json!(v)),
            MetadataChange::Year(v) => ("year", json!(v)),
            MetadataChange::TrackNumber(v) => ("trackNumber", json!(v)),
            MetadataChange::TotalTrackCount(v) => ("totalTrackCount", json!(v)),
            MetadataChange::DiscNumber(v) => ("discNumber", json!(v)),
            MetadataChange::TotalDiscCount(v) => ("totalDiscCount", json!(v)),
            MetadataChange::PlayCount(v) => ("playCount", json!(v)),
            MetadataChange::BeatsPerMinute(v) => ("beatsPerMinute", json!(v)),
            // The service expects the rating as a string
            MetadataChange::Rating(v) => ("rating", json!(v.to_string())),
        }
    }
}

impl MusicClient {
    /// Fetch the whole track library.
    ///
    /// Performs a full fetch and drops tombstones. The returned collection's
    /// watermark is the fetch-completion time, ready for [`MusicClient::update_tracks`].
    ///
    /// # Returns
    ///
    /// Returns `None` if the fetch failed; the error is passed to the error sink.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example(client: gmusicrs::MusicClient) {
    /// if let Some(tracks) = client.get_all_tracks().await {
    ///     for track in &tracks {
    ///         println!("{} - {}", track.artist_unified(), track.title);
    ///     }
    /// }
    /// # }
    /// ```
    pub async fn get_all_tracks(&self) -> Option<Tracklist> {
        match self.fetch_feed::<Track>(FeedKind::Tracks, None).await {
            Ok(delta) => Some(crate::feed::materialize(delta)),
            Err(e) => {
                self.report("Fetching all tracks failed", &e);
                None
            }
        }
    }

    /// Fetch the tracks changed since `since`, tombstones included.
    ///
    /// # Arguments
    ///
    /// * `since` - Lower bound of the fetch; the Unix epoch fetches everything
    pub async fn get_tracks(&self, since: DateTime<Utc>) -> Option<Tracklist> {
        match self.fetch_feed::<Track>(FeedKind::Tracks, Some(since)).await {
            Ok(delta) => Some(delta),
            Err(e) => {
                self.report("Fetching tracks failed", &e);
                None
            }
        }
    }

    /// Bring a cached track library up to date.
    ///
    /// Fetches the changes since the collection's watermark and merges them in.
    /// When nothing changed the collection keeps its items and only its watermark
    /// moves forward.
    ///
    /// # Returns
    ///
    /// `true` if any track was added, replaced or removed. A failed fetch returns
    /// `false`, leaves the collection untouched and is passed to the error sink.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example(client: gmusicrs::MusicClient, mut tracks: gmusicrs::Tracklist) {
    /// if client.update_tracks(&mut tracks).await {
    ///     println!("library changed, now {} tracks", tracks.len());
    /// }
    /// # }
    /// ```
    pub async fn update_tracks(&self, tracks: &mut Tracklist) -> bool {
        let since = tracks.last_updated();

        let delta = match self.fetch_feed::<Track>(FeedKind::Tracks, Some(since)).await {
            Ok(delta) => delta,
            Err(e) => {
                self.report("Updating tracks failed", &e);
                return false;
            }
        };

        match tracks.merge(&delta) {
            Some(merged) => {
                log::debug!("Track library updated: {} tracks", merged.len());
                *tracks = merged;
                true
            }
            None => {
                tracks.refresh_watermark(delta.last_updated());
                false
            }
        }
    }

    /// Edit metadata of a library track.
    ///
    /// # Arguments
    ///
    /// * `track_id` - Library id of the track
    /// * `changes` - Fields to change
    ///
    /// # Returns
    ///
    /// `Ok(true)` if the service accepted the edit. Service failures are passed to
    /// the error sink and give `Ok(false)`. An empty id or change list, or a rating
    /// above 5, is an [`Error::InvalidArgument`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// use gmusicrs::MetadataChange;
    ///
    /// # async fn example(client: gmusicrs::MusicClient) -> Result<(), gmusicrs::Error> {
    /// client
    ///     .update_track_metadata("track-id", &[MetadataChange::Rating(5), MetadataChange::Year(1969)])
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn update_track_metadata(
        &self,
        track_id: &str,
        changes: &[MetadataChange],
    ) -> Result<bool, Error> {
        if track_id.is_empty() {
            return Err(Error::invalid_argument("track id must not be empty"));
        }
        if changes.is_empty() {
            return Err(Error::invalid_argument("metadata changes must not be empty"));
        }
        if let Some(MetadataChange::Rating(rating)) = changes
            .iter()
            .find(|c| matches!(c, MetadataChange::Rating(r) if *r > 5))
        {
            return Err(Error::invalid_argument(format!(
                "rating must be between 0 and 5, got {rating}"
            )));
        }

        let mut update = Map::new();
        update.insert("id".to_string(), json!(track_id));
        for change in changes {
            let (field, value) = change.field();
            update.insert(field.to_string(), value);
        }

        let mutation = Mutation::Update(Value::Object(update));
        Ok(self
            .mutate(Service::TrackBatch, vec![mutation])
            .await
            .is_some())
    }

    /// Delete tracks from the library.
    ///
    /// # Returns
    ///
    /// `Ok(true)` if every deletion was accepted. An empty id list or an empty id
    /// is an [`Error::InvalidArgument`].
    pub async fn delete_tracks(&self, track_ids: &[&str]) -> Result<bool, Error> {
        if track_ids.is_empty() {
            return Err(Error::invalid_argument("track id list must not be empty"));
        }
        if track_ids.iter().any(|id| id.is_empty()) {
            return Err(Error::invalid_argument("track ids must not be empty"));
        }

        let mutations = track_ids
            .iter()
            .map(|id| Mutation::Delete(id.to_string()))
            .collect();

        Ok(self.mutate(Service::TrackBatch, mutations).await.is_some())
    }
}

impl Collection<Track> {
    /// Tracks sorted by title, then artist, then album.
    pub fn sorted_by_title(&self) -> Vec<&Track> {
        let mut tracks: Vec<&Track> = self.iter().collect();
        tracks.sort_by(|a, b| crate::sort::compare_by_title(&a.sort_keys, &b.sort_keys));
        tracks
    }

    /// Tracks sorted by artist, then title, then album.
    pub fn sorted_by_artist(&self) -> Vec<&Track> {
        let mut tracks: Vec<&Track> = self.iter().collect();
        tracks.sort_by(|a, b| crate::sort::compare_by_artist(&a.sort_keys, &b.sort_keys));
        tracks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_from_feed_json() {
        let json = r#"{
            "kind": "sj#track",
            "id": "5924d75a-931c-30ed-8790-f7fce8943c85",
            "clientId": "+eGFGTbiyMktbPuvB5MpQA",
            "title": "Bad Moon Rising",
            "artist": "Creedence Clearwater Revival",
            "album": "Green River",
            "albumArtist": "",
            "trackNumber": 2,
            "discNumber": 1,
            "year": 1969,
            "durationMillis": "141000",
            "rating": "5",
            "playCount": 3,
            "albumArtRef": [{"url": "//lh3.example.com/art"}],
            "artistId": ["A1"],
            "deleted": false,
            "creationTimestamp": "1400000000000000",
            "lastModifiedTimestamp": "1400000000000001"
        }"#;

        let track: Track = serde_json::from_str(json).unwrap();

        assert_eq!(track.id, "5924d75a-931c-30ed-8790-f7fce8943c85");
        assert_eq!(track.duration_millis, 141000);
        assert_eq!(track.rating, 5);
        assert_eq!(track.album_position(), 1002);
        assert_eq!(track.album_artist_unified(), "Creedence Clearwater Revival");
        assert_eq!(track.sort_keys.album_artist, "creedence clearwater revival");
        assert_eq!(track.primary_art_url(), Some("http://lh3.example.com/art"));
        assert_eq!(
            track.creation_timestamp.unwrap().timestamp_micros(),
            1_400_000_000_000_000
        );
        assert!(!track.is_placeholder());
    }

    #[test]
    fn test_track_id_falls_back_to_store_id() {
        let track: Track =
            serde_json::from_str(r#"{"id": "", "storeId": "Tabc", "nid": "n1", "title": "x"}"#)
                .unwrap();
        assert_eq!(track.id, "Tabc");

        let track: Track = serde_json::from_str(r#"{"nid": "n1"}"#).unwrap();
        assert_eq!(track.id, "n1");
    }

    #[test]
    fn test_null_fields_default() {
        let track: Track =
            serde_json::from_str(r#"{"id": "a", "title": null, "year": null, "deleted": null}"#)
                .unwrap();
        assert_eq!(track.title, "");
        assert_eq!(track.year, 0);
        assert!(!track.deleted);
    }

    #[test]
    fn test_serialized_track_reads_back() {
        let track: Track = serde_json::from_str(
            r#"{"id": "a", "title": "The End", "artist": "The Doors", "creationTimestamp": 1400000000000000}"#,
        )
        .unwrap();

        let json = serde_json::to_string(&track).unwrap();
        let back: Track = serde_json::from_str(&json).unwrap();

        assert_eq!(back, track);
        assert_eq!(back.sort_keys.artist, "doors, the");
    }

    #[test]
    fn test_placeholder_track() {
        let track = Track::placeholder("t-1");
        assert_eq!(track.id, "t-1");
        assert!(track.is_placeholder());
        assert!(track.title.is_empty());
    }

    #[test]
    fn test_metadata_change_fields() {
        assert_eq!(MetadataChange::Rating(4).field(), ("rating", json!("4")));
        assert_eq!(
            MetadataChange::AlbumArtist("X".to_string()).field(),
            ("albumArtist", json!("X"))
        );
    }
}
