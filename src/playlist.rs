use crate::Error;
use crate::MusicClient;
use crate::assemble::{SharedLookup, apply_entry_delta, assemble_entries, group_entry_deltas};
use crate::collection::{Collection, Item, PlaylistEntrylist, Playlists};
use crate::feed::{FeedItem, FeedKind, materialize};
use crate::jsarray;
use crate::mutation::{Mutation, generate_client_id};
use crate::service::Service;
use crate::track::Track;
use crate::{deserialize_lenient, deserialize_micros, deserialize_null_default};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use strum_macros::{AsRefStr, EnumString};

/// Kind of playlist.
#[derive(
    Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, Hash, AsRefStr, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaylistType {
    /// Created by the user
    #[default]
    UserGenerated,
    /// Owned by someone else; entries are looked up by share token
    Shared,
    /// Generated by the service
    Magic,
    #[serde(other)]
    Unknown,
}

/// A playlist and, once resolved, its ordered entries.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Playlist {
    #[serde(deserialize_with = "deserialize_null_default")]
    pub id: String,
    #[serde(deserialize_with = "deserialize_null_default")]
    pub name: String,
    #[serde(deserialize_with = "deserialize_null_default")]
    pub description: String,
    #[serde(rename = "type", deserialize_with = "deserialize_null_default")]
    pub playlist_type: PlaylistType,
    /// Token used to look up the entries of a shared playlist
    pub share_token: Option<String>,
    #[serde(deserialize_with = "deserialize_null_default")]
    pub owner_name: String,
    pub owner_profile_photo_url: Option<String>,
    #[serde(deserialize_with = "deserialize_null_default")]
    pub access_controlled: bool,
    /// Tombstone flag
    #[serde(deserialize_with = "deserialize_null_default")]
    pub deleted: bool,

    #[serde(
        serialize_with = "chrono::serde::ts_microseconds_option::serialize",
        deserialize_with = "deserialize_micros"
    )]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(
        serialize_with = "chrono::serde::ts_microseconds_option::serialize",
        deserialize_with = "deserialize_micros"
    )]
    pub last_modified_timestamp: Option<DateTime<Utc>>,
    #[serde(
        serialize_with = "chrono::serde::ts_microseconds_option::serialize",
        deserialize_with = "deserialize_micros"
    )]
    pub recent_timestamp: Option<DateTime<Utc>>,

    /// Entries ordered by position; empty until resolved
    #[serde(deserialize_with = "deserialize_null_default")]
    pub entries: Vec<PlaylistEntry>,
}

impl Playlist {
    pub fn is_shared(&self) -> bool {
        self.playlist_type == PlaylistType::Shared
    }

    /// The entries' tracks, in playlist order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.entries.iter().map(|entry| &entry.track)
    }

    // A shared playlist without a token cannot be resolved.
    pub(crate) fn shared_token(&self) -> Option<&str> {
        if self.is_shared() {
            self.share_token.as_deref().filter(|token| !token.is_empty())
        } else {
            None
        }
    }
}

impl Item for Playlist {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

impl FeedItem for Playlist {
    fn from_slots(slots: &[Value]) -> Result<Self, Error> {
        jsarray::playlist_from_slots(slots)
    }
}

/// A track's membership in a playlist.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", from = "PlaylistEntryRecord")]
pub struct PlaylistEntry {
    pub id: String,
    pub client_id: Option<String>,
    pub playlist_id: String,
    /// Ordering key within the playlist
    pub absolute_position: u64,
    pub track_id: String,
    pub source: u32,
    /// Tombstone flag
    pub deleted: bool,
    #[serde(serialize_with = "chrono::serde::ts_microseconds_option::serialize")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(serialize_with = "chrono::serde::ts_microseconds_option::serialize")]
    pub last_modified_timestamp: Option<DateTime<Utc>>,
    /// Copy of the track; a placeholder when the server sent none
    pub track: Track,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct PlaylistEntryRecord {
    #[serde(deserialize_with = "deserialize_null_default")]
    id: String,
    client_id: Option<String>,
    #[serde(deserialize_with = "deserialize_null_default")]
    playlist_id: String,
    #[serde(deserialize_with = "deserialize_lenient")]
    absolute_position: u64,
    #[serde(deserialize_with = "deserialize_null_default")]
    track_id: String,
    #[serde(deserialize_with = "deserialize_lenient")]
    source: u32,
    #[serde(deserialize_with = "deserialize_null_default")]
    deleted: bool,
    #[serde(deserialize_with = "deserialize_micros")]
    creation_timestamp: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "deserialize_micros")]
    last_modified_timestamp: Option<DateTime<Utc>>,
    track: Option<Track>,
}

impl From<PlaylistEntryRecord> for PlaylistEntry {
    fn from(record: PlaylistEntryRecord) -> Self {
        let track = match record.track {
            Some(track) if !track.id.is_empty() => track,
            _ => Track::placeholder(&record.track_id),
        };

        PlaylistEntry {
            id: record.id,
            client_id: record.client_id,
            playlist_id: record.playlist_id,
            absolute_position: record.absolute_position,
            track_id: record.track_id,
            source: record.source,
            deleted: record.deleted,
            creation_timestamp: record.creation_timestamp,
            last_modified_timestamp: record.last_modified_timestamp,
            track,
        }
    }
}

impl Item for PlaylistEntry {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

impl FeedItem for PlaylistEntry {
    fn from_slots(_slots: &[Value]) -> Result<Self, Error> {
        Err(Error::Decode(
            "playlist entries are not served as positional rows".to_string(),
        ))
    }
}

// Library tracks use source 1, catalog tracks (ids starting with 'T') source 2.
fn entry_source(track_id: &str) -> u32 {
    if track_id.starts_with('T') { 2 } else { 1 }
}

impl MusicClient {
    /// Fetch all playlists with their entries resolved.
    ///
    /// Entries of the user's own playlists come from the entry feed. Entries of
    /// shared playlists come from one batched lookup by share token and never
    /// from the entry feed. Playlists with nothing to show get an empty list.
    ///
    /// # Returns
    ///
    /// Returns `None` if any of the fetches failed; the error is passed to the
    /// error sink.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example(client: gmusicrs::MusicClient) {
    /// if let Some(playlists) = client.get_all_playlists().await {
    ///     for playlist in &playlists {
    ///         println!("{} ({} entries)", playlist.name, playlist.entries.len());
    ///     }
    /// }
    /// # }
    /// ```
    pub async fn get_all_playlists(&self) -> Option<Playlists> {
        let playlists = match self.fetch_feed::<Playlist>(FeedKind::Playlists, None).await {
            Ok(delta) => materialize(delta),
            Err(e) => {
                self.report("Fetching all playlists failed", &e);
                return None;
            }
        };

        let entries = match self
            .fetch_feed::<PlaylistEntry>(FeedKind::PlaylistEntries, None)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                self.report("Fetching playlist entries failed", &e);
                return None;
            }
        };

        let mut grouped = assemble_entries(entries);

        let lookups: Vec<SharedLookup> = playlists
            .iter()
            .filter_map(|playlist| {
                playlist
                    .shared_token()
                    .map(|token| SharedLookup::new(&playlist.id, token, None))
            })
            .collect();

        let mut shared = match self.resolve_shared_entries(&lookups).await {
            Ok(shared) => shared,
            Err(e) => {
                self.report("Fetching shared playlist entries failed", &e);
                return None;
            }
        };

        let last_updated = playlists.last_updated();
        let resolved = playlists
            .into_items()
            .into_iter()
            .map(|mut playlist| {
                // Shared playlists only ever take entries from the token lookup.
                playlist.entries = if playlist.is_shared() {
                    shared
                        .remove(&playlist.id)
                        .and_then(|delta| apply_entry_delta(&[], &delta))
                        .unwrap_or_default()
                } else {
                    grouped.remove(&playlist.id).unwrap_or_default()
                };
                playlist
            })
            .collect();

        Some(Collection::from_unique(resolved, last_updated))
    }

    /// Fetch the playlists changed since `since`, tombstones included.
    ///
    /// Entries are not resolved.
    pub async fn get_playlists(&self, since: DateTime<Utc>) -> Option<Playlists> {
        match self
            .fetch_feed::<Playlist>(FeedKind::Playlists, Some(since))
            .await
        {
            Ok(delta) => Some(delta),
            Err(e) => {
                self.report("Fetching playlists failed", &e);
                None
            }
        }
    }

    /// Fetch the playlist entries changed since `since`, tombstones included.
    pub async fn get_playlist_entries(&self, since: DateTime<Utc>) -> Option<PlaylistEntrylist> {
        match self
            .fetch_feed::<PlaylistEntry>(FeedKind::PlaylistEntries, Some(since))
            .await
        {
            Ok(delta) => Some(delta),
            Err(e) => {
                self.report("Fetching playlist entries failed", &e);
                None
            }
        }
    }

    /// Bring cached playlists up to date.
    ///
    /// Playlist and entry changes since the collection's watermark are merged in.
    /// Replaced playlists keep their resolved entries; entry changes are applied
    /// per playlist. Shared playlists are refreshed with one batched lookup.
    ///
    /// # Returns
    ///
    /// `true` if any playlist or entry changed. When nothing changed only the
    /// watermark moves. A failed fetch returns `false`, leaves the collection
    /// untouched and is passed to the error sink.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example(client: gmusicrs::MusicClient) {
    /// let mut playlists = client.get_all_playlists().await.unwrap_or_default();
    /// // later
    /// if client.update_playlists(&mut playlists).await {
    ///     println!("playlists changed");
    /// }
    /// # }
    /// ```
    pub async fn update_playlists(&self, playlists: &mut Playlists) -> bool {
        let since = playlists.last_updated();

        let playlist_delta = match self
            .fetch_feed::<Playlist>(FeedKind::Playlists, Some(since))
            .await
        {
            Ok(delta) => delta,
            Err(e) => {
                self.report("Updating playlists failed", &e);
                return false;
            }
        };

        let entry_delta = match self
            .fetch_feed::<PlaylistEntry>(FeedKind::PlaylistEntries, Some(since))
            .await
        {
            Ok(delta) => delta,
            Err(e) => {
                self.report("Updating playlist entries failed", &e);
                return false;
            }
        };

        let merged = playlists.merge(&playlist_delta);
        let mut changed = merged.is_some();

        let replaced: HashSet<&str> = playlist_delta.ids().collect();
        let mut working: Vec<Playlist> = merged
            .as_ref()
            .unwrap_or(playlists)
            .iter()
            .cloned()
            .map(|mut playlist| {
                if replaced.contains(playlist.id.as_str()) {
                    if let Some(previous) = playlists.get(&playlist.id) {
                        playlist.entries = previous.entries.clone();
                    }
                }
                playlist
            })
            .collect();

        let mut entry_deltas = group_entry_deltas(entry_delta);
        for playlist in working.iter_mut().filter(|p| !p.is_shared()) {
            if let Some(delta) = entry_deltas.remove(&playlist.id) {
                if let Some(entries) = apply_entry_delta(&playlist.entries, &delta) {
                    playlist.entries = entries;
                    changed = true;
                }
            }
        }

        // Playlists that were already shared only need the changes. New ones and
        // ones that just became shared are read in full.
        let known_shared: HashSet<String> = playlists
            .iter()
            .filter(|playlist| playlist.is_shared())
            .map(|playlist| playlist.id.clone())
            .collect();

        let lookups: Vec<SharedLookup> = working
            .iter()
            .filter_map(|playlist| {
                let token = playlist.shared_token()?;
                let since = known_shared.contains(&playlist.id).then_some(since);
                Some(SharedLookup::new(&playlist.id, token, since))
            })
            .collect();

        let mut shared = match self.resolve_shared_entries(&lookups).await {
            Ok(shared) => shared,
            Err(e) => {
                self.report("Updating shared playlist entries failed", &e);
                return false;
            }
        };

        for playlist in working.iter_mut().filter(|p| p.is_shared()) {
            let delta = shared.remove(&playlist.id);
            if known_shared.contains(&playlist.id) {
                let updated = delta.and_then(|d| apply_entry_delta(&playlist.entries, &d));
                if let Some(entries) = updated {
                    playlist.entries = entries;
                    changed = true;
                }
            } else {
                // Entries from before the switch belong to the old playlist.
                let entries = delta
                    .and_then(|d| apply_entry_delta(&[], &d))
                    .unwrap_or_default();
                if entries != playlist.entries {
                    playlist.entries = entries;
                    changed = true;
                }
            }
        }

        if !changed {
            playlists.refresh_watermark(playlist_delta.last_updated());
            return false;
        }

        let last_updated = merged
            .as_ref()
            .map(|merged| merged.last_updated())
            .unwrap_or_else(|| playlist_delta.last_updated().max(since));

        log::debug!("Playlists updated: {} playlists", working.len());
        *playlists = Collection::from_unique(working, last_updated);
        true
    }

    /// Create a playlist.
    ///
    /// # Returns
    ///
    /// The id of the new playlist, or `Ok(None)` if the service failed (passed to
    /// the error sink). An empty name is an [`Error::InvalidArgument`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example(client: gmusicrs::MusicClient) -> Result<(), gmusicrs::Error> {
    /// if let Some(id) = client.create_playlist("Road Trip", Some("Songs for the car")).await? {
    ///     client.add_to_playlist(&id, &["track-1", "track-2"]).await?;
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_playlist(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Option<String>, Error> {
        if name.is_empty() {
            return Err(Error::invalid_argument("playlist name must not be empty"));
        }

        let mutation = Mutation::Create(json!({
            "creationTimestamp": "-1",
            "deleted": false,
            "lastModifiedTimestamp": "0",
            "name": name,
            "description": description.unwrap_or_default(),
            "type": PlaylistType::UserGenerated.as_ref(),
            "shareState": "PRIVATE",
        }));

        Ok(self
            .mutate(Service::PlaylistBatch, vec![mutation])
            .await
            .and_then(|results| results.into_iter().next())
            .and_then(|result| result.id))
    }

    /// Delete a playlist.
    pub async fn delete_playlist(&self, playlist_id: &str) -> Result<bool, Error> {
        if playlist_id.is_empty() {
            return Err(Error::invalid_argument("playlist id must not be empty"));
        }

        let mutation = Mutation::Delete(playlist_id.to_string());
        Ok(self
            .mutate(Service::PlaylistBatch, vec![mutation])
            .await
            .is_some())
    }

    /// Rename a playlist, optionally changing its description.
    pub async fn rename_playlist(
        &self,
        playlist_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<bool, Error> {
        if playlist_id.is_empty() {
            return Err(Error::invalid_argument("playlist id must not be empty"));
        }
        if name.is_empty() {
            return Err(Error::invalid_argument("playlist name must not be empty"));
        }

        let mut update = json!({ "id": playlist_id, "name": name });
        if let Some(description) = description {
            update["description"] = json!(description);
        }

        Ok(self
            .mutate(Service::PlaylistBatch, vec![Mutation::Update(update)])
            .await
            .is_some())
    }

    /// Append tracks to a playlist, in the given order.
    ///
    /// # Returns
    ///
    /// `Ok(true)` if every entry was created. An empty playlist id, an empty track
    /// list or an empty track id is an [`Error::InvalidArgument`].
    pub async fn add_to_playlist(
        &self,
        playlist_id: &str,
        track_ids: &[&str],
    ) -> Result<bool, Error> {
        if playlist_id.is_empty() {
            return Err(Error::invalid_argument("playlist id must not be empty"));
        }
        if track_ids.is_empty() {
            return Err(Error::invalid_argument("track id list must not be empty"));
        }
        if track_ids.iter().any(|id| id.is_empty()) {
            return Err(Error::invalid_argument("track ids must not be empty"));
        }

        let client_ids: Vec<String> = track_ids.iter().map(|_| generate_client_id()).collect();

        // New entries are chained to each other so the service keeps their order.
        let mutations = track_ids
            .iter()
            .enumerate()
            .map(|(i, track_id)| {
                let mut entry = json!({
                    "clientId": client_ids[i],
                    "creationTimestamp": "-1",
                    "deleted": false,
                    "lastModifiedTimestamp": "0",
                    "playlistId": playlist_id,
                    "source": entry_source(track_id),
                    "trackId": track_id,
                });
                if i > 0 {
                    entry["precedingEntryId"] = json!(client_ids[i - 1]);
                }
                if let Some(next) = client_ids.get(i + 1) {
                    entry["followingEntryId"] = json!(next);
                }
                Mutation::Create(entry)
            })
            .collect();

        Ok(self
            .mutate(Service::PlaylistEntryBatch, mutations)
            .await
            .is_some())
    }

    /// Remove entries from their playlists.
    pub async fn remove_from_playlist(&self, entry_ids: &[&str]) -> Result<bool, Error> {
        if entry_ids.is_empty() {
            return Err(Error::invalid_argument("entry id list must not be empty"));
        }
        if entry_ids.iter().any(|id| id.is_empty()) {
            return Err(Error::invalid_argument("entry ids must not be empty"));
        }

        let mutations = entry_ids
            .iter()
            .map(|id| Mutation::Delete(id.to_string()))
            .collect();

        Ok(self
            .mutate(Service::PlaylistEntryBatch, mutations)
            .await
            .is_some())
    }

    /// Move an entry between two neighbours.
    ///
    /// # Arguments
    ///
    /// * `entry` - The entry to move
    /// * `preceding` - Entry that should come right before it, `None` for the start
    /// * `following` - Entry that should come right after it, `None` for the end
    pub async fn reorder_playlist_entry(
        &self,
        entry: &PlaylistEntry,
        preceding: Option<&PlaylistEntry>,
        following: Option<&PlaylistEntry>,
    ) -> Result<bool, Error> {
        if entry.id.is_empty() {
            return Err(Error::invalid_argument("entry id must not be empty"));
        }
        if [preceding, following]
            .into_iter()
            .flatten()
            .any(|neighbour| neighbour.id == entry.id)
        {
            return Err(Error::invalid_argument(
                "an entry cannot be its own neighbour",
            ));
        }

        let mut update = json!({
            "id": entry.id,
            "clientId": entry.client_id.as_deref().unwrap_or(&entry.id),
            "playlistId": entry.playlist_id,
            "trackId": entry.track_id,
            "source": entry.source,
            "absolutePosition": entry.absolute_position.to_string(),
            "deleted": false,
            "creationTimestamp": entry.creation_timestamp.map(|t| t.timestamp_micros().to_string()),
            "lastModifiedTimestamp": "0",
        });
        if let Some(preceding) = preceding {
            update["precedingEntryId"] = json!(preceding.client_id.as_deref().unwrap_or(&preceding.id));
        }
        if let Some(following) = following {
            update["followingEntryId"] = json!(following.client_id.as_deref().unwrap_or(&following.id));
        }

        Ok(self
            .mutate(Service::PlaylistEntryBatch, vec![Mutation::Update(update)])
            .await
            .is_some())
    }
}
