use crate::collection::Tracklist;
use crate::sort::{compare_by_album, compare_by_album_artist};
use crate::track::Track;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An album derived from the tracks of a library.
///
/// Albums are grouped by title together with the normalized album artist, so
/// same-titled albums by different artists stay apart.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub album: String,
    /// Display name of the album artist
    pub album_artist: String,
    /// Normalized album artist the album was grouped by
    pub album_artist_sort: String,
    /// Tracks ordered by disc and track number
    pub tracks: Vec<Track>,
}

/// An album artist derived from the tracks of a library.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlbumArtist {
    /// Display name of the album artist
    pub album_artist: String,
    /// Normalized album artist the tracks were grouped by
    pub album_artist_sort: String,
    /// Tracks ordered by title, then album
    pub tracks: Vec<Track>,
}

// Stable grouping: groups in order of first appearance, members in input order.
fn group_by<K, F>(tracks: Vec<&Track>, key: F) -> Vec<(K, Vec<Track>)>
where
    K: Eq + std::hash::Hash + Clone,
    F: Fn(&Track) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<Track>)> = Vec::new();

    for track in tracks {
        let k = key(track);
        match index.get(&k) {
            Some(&i) => groups[i].1.push(track.clone()),
            None => {
                index.insert(k.clone(), groups.len());
                groups.push((k, vec![track.clone()]));
            }
        }
    }

    groups
}

/// Group a library into albums.
///
/// Tracks are sorted by album artist, album and `disc * 1000 + track`, then
/// grouped by (album, normalized album artist).
///
/// # Example
///
/// ```no_run
/// # async fn example(client: gmusicrs::MusicClient) {
/// let tracks = client.get_all_tracks().await.unwrap_or_default();
/// for album in gmusicrs::group_by_album(&tracks) {
///     println!("{} - {} ({} tracks)", album.album_artist, album.album, album.tracks.len());
/// }
/// # }
/// ```
pub fn group_by_album(tracks: &Tracklist) -> Vec<Album> {
    let mut sorted: Vec<&Track> = tracks.iter().collect();
    sorted.sort_by(|a, b| {
        compare_by_album(&a.sort_keys, a.album_position(), &b.sort_keys, b.album_position())
    });

    group_by(sorted, |track| {
        (track.album.clone(), track.sort_keys.album_artist.clone())
    })
    .into_iter()
    .map(|((album, album_artist_sort), tracks)| Album {
        album,
        album_artist: tracks[0].album_artist_unified().to_string(),
        album_artist_sort,
        tracks,
    })
    .collect()
}

/// Group a library by album artist.
///
/// Tracks are sorted by album artist, title and album, then grouped by the
/// normalized album artist. Only literally equal keys share a group: "the
/// beatles" (sorted as "beatles, the") and "beatles, john" stay apart.
pub fn group_by_album_artist(tracks: &Tracklist) -> Vec<AlbumArtist> {
    let mut sorted: Vec<&Track> = tracks.iter().collect();
    sorted.sort_by(|a, b| compare_by_album_artist(&a.sort_keys, &b.sort_keys));

    group_by(sorted, |track| track.sort_keys.album_artist.clone())
        .into_iter()
        .map(|(album_artist_sort, tracks)| AlbumArtist {
            album_artist: tracks[0].album_artist_unified().to_string(),
            album_artist_sort,
            tracks,
        })
        .collect()
}
