use crate::Error;
use crate::MusicClient;
use crate::collection::{Collection, Playlists};
use crate::feed::updated_min;
use crate::playlist::PlaylistEntry;
use crate::reconcile;
use crate::service::{Service, ServiceRequest};
use crate::track::Track;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};

/// Group playlist entries by playlist, each group ordered by position.
///
/// Tombstones are dropped. Entries with equal positions keep their fetch order.
pub fn assemble_entries<I>(raw: I) -> HashMap<String, Vec<PlaylistEntry>>
where
    I: IntoIterator<Item = PlaylistEntry>,
{
    let mut grouped: HashMap<String, Vec<PlaylistEntry>> = HashMap::new();

    for entry in raw.into_iter().filter(|entry| !entry.deleted) {
        grouped
            .entry(entry.playlist_id.clone())
            .or_default()
            .push(entry);
    }

    for entries in grouped.values_mut() {
        entries.sort_by_key(|entry| entry.absolute_position);
    }

    grouped
}

// Entry changes grouped by playlist, tombstones kept, in fetch order.
pub(crate) fn group_entry_deltas<I>(raw: I) -> HashMap<String, Vec<PlaylistEntry>>
where
    I: IntoIterator<Item = PlaylistEntry>,
{
    let mut grouped: HashMap<String, Vec<PlaylistEntry>> = HashMap::new();
    for entry in raw {
        grouped
            .entry(entry.playlist_id.clone())
            .or_default()
            .push(entry);
    }
    grouped
}

/// Apply entry changes to a playlist's entries.
///
/// The entries are reconciled like any collection (tombstones purge, the last
/// change for an id wins) and re-ordered by position. Returns `None` when the
/// result is the same as `entries`, which covers an empty delta and one that
/// only removes entries that were never there.
pub fn apply_entry_delta(
    entries: &[PlaylistEntry],
    delta: &[PlaylistEntry],
) -> Option<Vec<PlaylistEntry>> {
    let baseline = Collection::from_unique(entries.to_vec(), DateTime::<Utc>::default());
    let delta = Collection::from_unique(delta.to_vec(), DateTime::<Utc>::default());

    let merged = reconcile::merge_at(&baseline, &delta, DateTime::<Utc>::default())?;

    let mut updated = merged.into_items();
    updated.sort_by_key(|entry| entry.absolute_position);
    (updated != entries).then_some(updated)
}

/// Replace placeholder tracks in playlist entries with copies from a library.
///
/// Returns a new collection with the same watermark. Entries whose track is not
/// in the library keep their placeholder.
pub fn fill_placeholder_tracks(playlists: &Playlists, tracks: &Collection<Track>) -> Playlists {
    let library: HashMap<&str, &Track> = tracks
        .iter()
        .map(|track| (track.id.as_str(), track))
        .collect();

    let filled = playlists
        .iter()
        .cloned()
        .map(|mut playlist| {
            for entry in playlist
                .entries
                .iter_mut()
                .filter(|entry| entry.track.is_placeholder())
            {
                if let Some(track) = library.get(entry.track_id.as_str()) {
                    entry.track = Track::clone(track);
                }
            }
            playlist
        })
        .collect();

    Collection::from_unique(filled, playlists.last_updated())
}

/// A shared playlist whose entries should be looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedLookup {
    pub playlist_id: String,
    pub share_token: String,
    /// Only changes after this time; `None` reads every entry
    pub since: Option<DateTime<Utc>>,
}

impl SharedLookup {
    pub fn new(playlist_id: &str, share_token: &str, since: Option<DateTime<Utc>>) -> Self {
        Self {
            playlist_id: playlist_id.to_string(),
            share_token: share_token.to_string(),
            since,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct SharedEntriesResponse {
    #[serde(default)]
    entries: Vec<SharedEntries>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SharedEntries {
    share_token: String,
    #[serde(default)]
    response_code: Option<String>,
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    playlist_entry: Vec<PlaylistEntry>,
}

impl MusicClient {
    fn shared_entries_request(&self, pending: &[(&SharedLookup, Option<String>)]) -> ServiceRequest {
        let entries: Vec<Value> = pending
            .iter()
            .map(|(lookup, cursor)| {
                let mut entry = json!({
                    "shareToken": lookup.share_token,
                    "updated-min": updated_min(lookup.since),
                    "max-results": self.get_page_size(),
                });
                if let Some(cursor) = cursor {
                    entry["start-token"] = json!(cursor);
                }
                entry
            })
            .collect();

        ServiceRequest::new(Service::SharedPlaylistEntries)
            .with_query("alt", "json")
            .with_body(json!({ "entries": entries }))
    }

    /// Look up the entries of shared playlists, keyed by playlist id.
    ///
    /// Every round is a single batched request covering all share tokens that
    /// still have pages left. Returned entries are assigned the owning playlist's
    /// id. Tombstones are kept so the result can be applied as a delta.
    ///
    /// A failure of the first round is returned. A failure of a later round is
    /// passed to the error sink and ends the lookup with the entries read so far.
    /// With no lookups no request is made.
    pub async fn resolve_shared_entries(
        &self,
        lookups: &[SharedLookup],
    ) -> Result<HashMap<String, Vec<PlaylistEntry>>, Error> {
        let mut resolved: HashMap<String, Vec<PlaylistEntry>> = HashMap::new();
        let by_token: HashMap<&str, &SharedLookup> = lookups
            .iter()
            .map(|lookup| (lookup.share_token.as_str(), lookup))
            .collect();

        let mut pending: Vec<(&SharedLookup, Option<String>)> =
            by_token.values().map(|lookup| (*lookup, None)).collect();
        let mut seen_cursors: HashSet<String> = HashSet::new();
        let mut round = 0usize;

        while !pending.is_empty() {
            round += 1;
            let request = self.shared_entries_request(&pending);

            let response = match self.call_service(request).await.and_then(|body| {
                serde_json::from_str::<SharedEntriesResponse>(&body).map_err(Error::from)
            }) {
                Ok(response) => response,
                Err(e) if round == 1 => return Err(e),
                Err(e) => {
                    self.report(
                        &format!("Fetching round {round} of shared playlist entries failed"),
                        &e,
                    );
                    break;
                }
            };

            let mut next = Vec::new();
            for shared in response.entries {
                let Some(lookup) = by_token.get(shared.share_token.as_str()) else {
                    log::debug!("Ignoring entries for unknown share token {}", shared.share_token);
                    continue;
                };

                if let Some(code) = shared.response_code.as_deref().filter(|code| *code != "OK") {
                    self.report(
                        &format!("Shared playlist {} could not be read", lookup.playlist_id),
                        &Error::Decode(format!("response code {code}")),
                    );
                    continue;
                }

                let entries = resolved.entry(lookup.playlist_id.clone()).or_default();
                entries.extend(shared.playlist_entry.into_iter().map(|mut entry| {
                    entry.playlist_id = lookup.playlist_id.clone();
                    entry
                }));

                if let Some(cursor) = shared.next_page_token.filter(|c| !c.is_empty()) {
                    if seen_cursors.insert(cursor.clone()) {
                        next.push((*lookup, Some(cursor)));
                    }
                }
            }

            log::debug!(
                "Shared entry round {round}: {} playlists resolved, {} with more pages",
                resolved.len(),
                next.len()
            );
            pending = next;
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockServiceCall, Playlist, Session};

    fn entry(id: &str, playlist_id: &str, position: u64) -> PlaylistEntry {
        serde_json::from_value(json!({
            "id": id,
            "playlistId": playlist_id,
            "trackId": format!("track-{id}"),
            "absolutePosition": format!("{position:020}"),
        }))
        .unwrap()
    }

    fn tombstone(id: &str, playlist_id: &str) -> PlaylistEntry {
        PlaylistEntry {
            deleted: true,
            ..entry(id, playlist_id, 0)
        }
    }

    fn ids(entries: &[PlaylistEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_assemble_groups_and_orders() {
        let grouped = assemble_entries(vec![
            entry("e3", "p1", 300),
            entry("x1", "p2", 5),
            entry("e1", "p1", 100),
            tombstone("e9", "p1"),
            entry("e2", "p1", 200),
        ]);

        assert_eq!(grouped.len(), 2);
        assert_eq!(ids(&grouped["p1"]), vec!["e1", "e2", "e3"]);
        assert_eq!(ids(&grouped["p2"]), vec!["x1"]);
    }

    #[test]
    fn test_assemble_ties_keep_fetch_order() {
        let grouped = assemble_entries(vec![
            entry("b", "p", 10),
            entry("a", "p", 10),
            entry("c", "p", 1),
        ]);
        assert_eq!(ids(&grouped["p"]), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_apply_entry_delta() {
        let entries = vec![entry("e1", "p", 1), entry("e2", "p", 2)];
        let delta = vec![tombstone("e1", "p"), entry("e3", "p", 0)];

        let updated = apply_entry_delta(&entries, &delta).unwrap();
        assert_eq!(ids(&updated), vec!["e3", "e2"]);

        assert!(apply_entry_delta(&entries, &[]).is_none());
    }

    #[test]
    fn test_apply_entry_delta_without_effect() {
        let entries = vec![entry("e1", "p", 1), entry("e2", "p", 2)];

        // Removing an entry that was never there
        assert!(apply_entry_delta(&entries, &[tombstone("e7", "p")]).is_none());
        // Re-sending an unchanged entry
        assert!(apply_entry_delta(&entries, &[entry("e2", "p", 2)]).is_none());
        assert!(apply_entry_delta(&[], &[tombstone("e1", "p")]).is_none());
    }

    #[test]
    fn test_fill_placeholder_tracks() {
        let playlist = Playlist {
            id: "p1".to_string(),
            entries: vec![entry("e1", "p1", 1), entry("e2", "p1", 2)],
            ..Default::default()
        };
        let playlists = Collection::from_items(vec![playlist], Utc::now());
        let track: Track =
            serde_json::from_value(json!({ "id": "track-e1", "title": "Found" })).unwrap();
        let tracks = Collection::from_items(vec![track], Utc::now());

        let filled = fill_placeholder_tracks(&playlists, &tracks);

        let entries = &filled.get("p1").unwrap().entries;
        assert_eq!(entries[0].track.title, "Found");
        assert!(!entries[0].track.is_placeholder());
        assert!(entries[1].track.is_placeholder());
        assert_eq!(filled.last_updated(), playlists.last_updated());
    }

    #[tokio::test]
    async fn test_no_lookups_makes_no_request() {
        let mut service = MockServiceCall::new();
        service.expect_call().times(0);

        let client = MusicClient::new()
            .with_session(Session::new("token".to_string()))
            .with_service(service);

        let resolved = client.resolve_shared_entries(&[]).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn test_shared_rounds_follow_cursors() {
        let mut service = MockServiceCall::new();
        service.expect_call().times(2).returning(|_, request| {
            let body = request.body.unwrap_or_default();
            let requested = body["entries"].as_array().cloned().unwrap_or_default();
            let continued = requested.iter().any(|e| e.get("start-token").is_some());

            let response = if continued {
                assert_eq!(requested.len(), 1);
                json!({ "entries": [
                    { "shareToken": "tokA", "responseCode": "OK",
                      "playlistEntry": [{ "id": "a2", "absolutePosition": "2", "trackId": "t" }] }
                ]})
            } else {
                assert_eq!(requested.len(), 2);
                json!({ "entries": [
                    { "shareToken": "tokA", "responseCode": "OK", "nextPageToken": "more",
                      "playlistEntry": [{ "id": "a1", "absolutePosition": "1", "trackId": "t" }] },
                    { "shareToken": "tokB", "responseCode": "OK",
                      "playlistEntry": [{ "id": "b1", "absolutePosition": "1", "trackId": "t" }] }
                ]})
            };
            Ok(response.to_string())
        });

        let client = MusicClient::new()
            .with_session(Session::new("token".to_string()))
            .with_service(service);

        let lookups = vec![
            SharedLookup::new("pA", "tokA", None),
            SharedLookup::new("pB", "tokB", None),
        ];
        let resolved = client.resolve_shared_entries(&lookups).await.unwrap();

        assert_eq!(ids(&resolved["pA"]), vec!["a1", "a2"]);
        assert_eq!(ids(&resolved["pB"]), vec!["b1"]);
        assert!(resolved["pA"].iter().all(|e| e.playlist_id == "pA"));
    }
}
