use crate::reconcile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An entity the service tracks by id and deletes by tombstone.
pub trait Item {
    /// Stable identity of the item.
    fn id(&self) -> &str;
    /// Whether this record is a deletion marker.
    fn is_deleted(&self) -> bool;
}

/// An ordered set of items, unique by id, with a watermark recording how
/// current it is.
///
/// The watermark is the lower bound of the next incremental fetch. A new,
/// empty collection has the Unix epoch as watermark, which requests a full
/// fetch.
///
/// Collections serialize with serde so a library can be cached between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection<T> {
    items: Vec<T>,
    last_updated: DateTime<Utc>,
}

/// The user's tracks.
pub type Tracklist = Collection<crate::Track>;

/// The user's playlists.
pub type Playlists = Collection<crate::Playlist>;

/// A flat list of playlist entries.
pub type PlaylistEntrylist = Collection<crate::PlaylistEntry>;

impl<T: Item> Collection<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            last_updated: DateTime::<Utc>::default(),
        }
    }

    /// Build a collection from items in fetch order.
    ///
    /// When an id occurs more than once, only the last occurrence is kept, at its
    /// own position. Tombstones are kept; use [`Collection::merge`] against an
    /// empty baseline to drop them.
    pub fn from_items<I>(items: I, last_updated: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let items: Vec<T> = items.into_iter().collect();
        let mut seen = HashSet::with_capacity(items.len());
        let mut unique: Vec<T> = Vec::with_capacity(items.len());

        for item in items.into_iter().rev() {
            if seen.insert(item.id().to_string()) {
                unique.push(item);
            }
        }
        unique.reverse();

        Self {
            items: unique,
            last_updated,
        }
    }

    // Callers guarantee the ids are already unique.
    pub(crate) fn from_unique(items: Vec<T>, last_updated: DateTime<Utc>) -> Self {
        Self {
            items,
            last_updated,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Find an item by id.
    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.id())
    }

    /// The watermark: lower bound for the next incremental fetch.
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Merge a delta into this collection. See [`reconcile::merge`].
    pub fn merge(&self, delta: &Collection<T>) -> Option<Collection<T>>
    where
        T: Clone,
    {
        reconcile::merge(self, delta)
    }

    // A fetch that found nothing new still moves the watermark forward.
    pub(crate) fn refresh_watermark(&mut self, at: DateTime<Utc>) {
        if at > self.last_updated {
            self.last_updated = at;
        }
    }
}

impl<T: Item> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IntoIterator for Collection<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Collection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
