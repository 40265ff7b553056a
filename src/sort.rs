//! Normalized sort keys and the comparators built on them.
//!
//! Sort keys are computed once when a [`Track`](crate::Track) is decoded and never
//! change afterwards. Display fields are left untouched: the leading-article
//! rearrangement ("the band" -> "band, the") only ever applies to keys.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::LazyLock;
use unaccent::unaccent;

static LEADING_ARTICLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<article>[Tt]he)\s+(?P<body>.+)$").expect("leading article pattern")
});

/// Move a leading definite article to the end: `"the band"` becomes `"band, the"`.
///
/// Strings without a leading article are returned unchanged.
pub fn rearrange_article(s: &str) -> String {
    match LEADING_ARTICLE.captures(s) {
        Some(caps) => format!("{}, {}", &caps["body"], &caps["article"]),
        None => s.to_string(),
    }
}

/// Normalized keys of a track, precomputed at ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKeys {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
}

/// Raw inputs for [`SortKeys::new`].
///
/// `*_norm` fields are the server-provided normalized values, which take
/// precedence over the display fields when present.
#[derive(Debug, Clone, Copy, Default)]
pub struct SortSource<'a> {
    pub title: &'a str,
    pub artist: &'a str,
    pub album: &'a str,
    pub album_artist: &'a str,
    pub title_norm: Option<&'a str>,
    pub artist_norm: Option<&'a str>,
    pub album_norm: Option<&'a str>,
    pub album_artist_norm: Option<&'a str>,
}

impl SortKeys {
    pub fn new(source: SortSource<'_>) -> Self {
        // Artist and album artist stand in for each other when one is missing.
        let artist = non_empty(source.artist).unwrap_or(source.album_artist);
        let album_artist = non_empty(source.album_artist).unwrap_or(source.artist);

        Self {
            title: norm(source.title_norm, source.title),
            artist: rearrange_article(&norm(source.artist_norm, artist)),
            album: norm(source.album_norm, source.album),
            album_artist: rearrange_article(&norm(source.album_artist_norm, album_artist)),
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() { None } else { Some(s) }
}

fn norm(server: Option<&str>, display: &str) -> String {
    match server.and_then(non_empty) {
        Some(norm) => norm.to_string(),
        None => display.to_lowercase(),
    }
}

/// Fold a key for comparison: strip accents, drop symbol characters, lowercase.
pub fn fold(s: &str) -> String {
    unaccent(s)
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Compare two keys ignoring accents, case and symbol characters.
///
/// Keys that fold to the same string fall back to a plain comparison so the
/// order stays total.
pub fn compare_sort_keys(a: &str, b: &str) -> Ordering {
    fold(a).cmp(&fold(b)).then_with(|| a.cmp(b))
}

/// Order by title, then artist, then album.
pub fn compare_by_title(a: &SortKeys, b: &SortKeys) -> Ordering {
    compare_sort_keys(&a.title, &b.title)
        .then_with(|| compare_sort_keys(&a.artist, &b.artist))
        .then_with(|| compare_sort_keys(&a.album, &b.album))
}

/// Order by artist, then title, then album.
pub fn compare_by_artist(a: &SortKeys, b: &SortKeys) -> Ordering {
    compare_sort_keys(&a.artist, &b.artist)
        .then_with(|| compare_sort_keys(&a.title, &b.title))
        .then_with(|| compare_sort_keys(&a.album, &b.album))
}

/// Order by album artist, then title, then album.
pub fn compare_by_album_artist(a: &SortKeys, b: &SortKeys) -> Ordering {
    compare_sort_keys(&a.album_artist, &b.album_artist)
        .then_with(|| compare_sort_keys(&a.title, &b.title))
        .then_with(|| compare_sort_keys(&a.album, &b.album))
}

/// Order by album artist, then album, then `disc * 1000 + track`.
pub fn compare_by_album(a: &SortKeys, a_pos: u64, b: &SortKeys, b_pos: u64) -> Ordering {
    compare_sort_keys(&a.album_artist, &b.album_artist)
        .then_with(|| compare_sort_keys(&a.album, &b.album))
        .then_with(|| a_pos.cmp(&b_pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(title: &str, artist: &str, album: &str, album_artist: &str) -> SortKeys {
        SortKeys::new(SortSource {
            title,
            artist,
            album,
            album_artist,
            ..Default::default()
        })
    }

    #[test]
    fn test_rearrange_article() {
        assert_eq!(rearrange_article("the band"), "band, the");
        assert_eq!(rearrange_article("The Band"), "Band, The");
        assert_eq!(rearrange_article("theory"), "theory");
        assert_eq!(rearrange_article("beatles, john"), "beatles, john");
        assert_eq!(rearrange_article("the"), "the");
    }

    #[test]
    fn test_keys_are_lowercased_and_rearranged() {
        let k = keys("Help!", "The Beatles", "Help!", "");
        assert_eq!(k.title, "help!");
        assert_eq!(k.artist, "beatles, the");
        assert_eq!(k.album_artist, "beatles, the");
        assert_eq!(k.album, "help!");
    }

    #[test]
    fn test_server_norms_take_precedence() {
        let k = SortKeys::new(SortSource {
            title: "Title",
            artist: "Artist",
            title_norm: Some("server title"),
            artist_norm: Some("the server artist"),
            ..Default::default()
        });
        assert_eq!(k.title, "server title");
        assert_eq!(k.artist, "server artist, the");
    }

    #[test]
    fn test_empty_server_norm_is_ignored() {
        let k = SortKeys::new(SortSource {
            title: "Title",
            title_norm: Some(""),
            ..Default::default()
        });
        assert_eq!(k.title, "title");
    }

    #[test]
    fn test_fold_ignores_accents_and_symbols() {
        assert_eq!(fold("Beyoncé"), "beyonce");
        assert_eq!(fold("AC/DC"), "acdc");
        assert_eq!(fold("Sigur Rós"), fold("sigur ros"));
        // "aha" sorts after "abba" once the hyphen is dropped
        assert_eq!(compare_sort_keys("a-ha", "abba"), Ordering::Greater);
    }

    #[test]
    fn test_compare_by_album_orders_by_disc_and_track() {
        let a = keys("B", "X", "Album", "X");
        let b = keys("A", "X", "Album", "X");
        assert_eq!(compare_by_album(&a, 1001, &b, 2001), Ordering::Less);
        assert_eq!(compare_by_album(&a, 1002, &b, 1001), Ordering::Greater);
    }

    #[test]
    fn test_compare_by_artist_then_title() {
        let a = keys("Yesterday", "The Beatles", "Help!", "");
        let b = keys("Blackbird", "The Beatles", "White Album", "");
        let c = keys("Zebra", "Beatles, John", "Other", "");
        assert_eq!(compare_by_artist(&a, &b), Ordering::Greater);
        assert_eq!(compare_by_artist(&b, &c), Ordering::Greater);
        assert_ne!(b.artist, c.artist);
    }
}
