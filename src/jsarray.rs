//! Decoding of the bracketed-array wire format used by the web endpoints.
//!
//! The web endpoints answer with JavaScript array literals rather than JSON:
//! elided slots (`[1,,3]`) and trailing commas are allowed, and the body may start
//! with an anti-hijacking prefix. [`parse`] rewrites such text into JSON and
//! hands it to `serde_json`.
//!
//! Records are then projected positionally. Each entity kind has a fixed table
//! mapping an array index to a typed field tag; unlisted slots are ignored.

use crate::Error;
use crate::playlist::Playlist;
use crate::track::Track;
use serde_json::{Map, Value, json};
use strum_macros::AsRefStr;

const XSSI_PREFIX: &str = ")]}'";

/// Parse a bracketed-array document into a JSON value.
///
/// # Example
///
/// ```
/// let value = gmusicrs::jsarray::parse(r#"[1,,"a,b",[],]"#).unwrap();
/// assert_eq!(value, serde_json::json!([1, null, "a,b", []]));
/// ```
pub fn parse(text: &str) -> Result<Value, Error> {
    let text = text.trim_start();
    let text = text.strip_prefix(XSSI_PREFIX).unwrap_or(text);

    let normalized = normalize(text);
    serde_json::from_str(&normalized)
        .map_err(|e| Error::Decode(format!("malformed bracketed array: {e}")))
}

// Fill elided slots with null and drop trailing commas, leaving string
// contents untouched.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    let mut last = None;
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' if matches!(last, Some('[') | Some(',')) => out.push_str("null,"),
            ']' if last == Some(',') => {
                if let Some(pos) = out.rfind(',') {
                    out.truncate(pos);
                }
                out.push(']');
            }
            c if c.is_whitespace() => continue,
            c => out.push(c),
        }

        last = Some(c);
    }

    out
}

/// Fields of a track that can appear in a positional row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "camelCase")]
pub enum TrackField {
    Id,
    Title,
    #[strum(serialize = "albumArtRef")]
    AlbumArtUrl,
    Artist,
    Album,
    AlbumArtist,
    TitleNorm,
    ArtistNorm,
    AlbumNorm,
    AlbumArtistNorm,
    Composer,
    Genre,
    DurationMillis,
    TrackNumber,
    TotalTrackCount,
    DiscNumber,
    TotalDiscCount,
    Year,
    Deleted,
    PlayCount,
    Rating,
    CreationTimestamp,
    LastModifiedTimestamp,
    StoreId,
    Nid,
    TrackType,
    Comment,
    AlbumId,
    ArtistId,
    RecentTimestamp,
    #[strum(serialize = "artistArtRef")]
    ArtistArtUrl,
}

impl TrackField {
    // Rows carry single values where the JSON feed carries lists.
    fn project(self, value: Value) -> Value {
        match self {
            TrackField::AlbumArtUrl | TrackField::ArtistArtUrl => json!([{ "url": value }]),
            TrackField::ArtistId => json!([value]),
            // Flags come as 0/1
            TrackField::Deleted => match value {
                Value::Number(n) => json!(n.as_i64().unwrap_or_default() != 0),
                other => other,
            },
            _ => value,
        }
    }
}

/// Fields of a playlist that can appear in a positional row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "camelCase")]
pub enum PlaylistField {
    Id,
    Name,
    CreationTimestamp,
    LastModifiedTimestamp,
    Type,
    ShareToken,
    OwnerName,
    OwnerProfilePhotoUrl,
}

/// Index -> field table for track rows.
pub const TRACK_SLOTS: [Option<TrackField>; 39] = {
    use TrackField::*;
    [
        Some(Id),
        Some(Title),
        Some(AlbumArtUrl),
        Some(Artist),
        Some(Album),
        Some(AlbumArtist),
        Some(TitleNorm),
        Some(ArtistNorm),
        Some(AlbumNorm),
        Some(AlbumArtistNorm),
        Some(Composer),
        Some(Genre),
        None,
        Some(DurationMillis),
        Some(TrackNumber),
        Some(TotalTrackCount),
        Some(DiscNumber),
        Some(TotalDiscCount),
        Some(Year),
        Some(Deleted),
        None,
        None,
        Some(PlayCount),
        Some(Rating),
        Some(CreationTimestamp),
        Some(LastModifiedTimestamp),
        None, // subject to curation
        Some(StoreId),
        Some(Nid),
        Some(TrackType),
        Some(Comment),
        None,
        Some(AlbumId),
        Some(ArtistId),
        None, // bitrate
        Some(RecentTimestamp),
        Some(ArtistArtUrl),
        None,
        None, // explicit type
    ]
};

/// Index -> field table for playlist rows.
pub const PLAYLIST_SLOTS: [Option<PlaylistField>; 11] = {
    use PlaylistField::*;
    [
        Some(Id),
        Some(Name),
        Some(CreationTimestamp),
        Some(LastModifiedTimestamp),
        Some(Type),
        Some(ShareToken),
        None,
        None,
        Some(OwnerName),
        None,
        Some(OwnerProfilePhotoUrl),
    ]
};

// Rows may be shorter than the table; missing trailing slots stay unset.
fn project_row<F>(
    slots: &[Value],
    table: &[Option<F>],
    project: impl Fn(F, Value) -> Value,
) -> Result<Map<String, Value>, Error>
where
    F: AsRef<str> + Copy,
{
    if slots.is_empty() {
        return Err(Error::Decode("empty positional row".to_string()));
    }

    let mut fields = Map::new();
    for (slot, field) in slots.iter().zip(table) {
        let Some(field) = field else { continue };
        if slot.is_null() {
            continue;
        }
        fields.insert(field.as_ref().to_string(), project(*field, slot.clone()));
    }

    Ok(fields)
}

/// Build a track from a positional row.
pub fn track_from_slots(slots: &[Value]) -> Result<Track, Error> {
    let fields = project_row(slots, &TRACK_SLOTS, TrackField::project)?;
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| Error::Decode(format!("track row: {e}")))
}

/// Build a playlist from a positional row.
pub fn playlist_from_slots(slots: &[Value]) -> Result<Playlist, Error> {
    let fields = project_row(slots, &PLAYLIST_SLOTS, |_, value| value)?;
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| Error::Decode(format!("playlist row: {e}")))
}
