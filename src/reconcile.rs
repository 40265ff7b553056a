use crate::collection::{Collection, Item};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Merge a freshly fetched delta into a baseline collection.
///
/// Returns `None` when the delta is empty: nothing changed, and the caller
/// still owns the job of moving its watermark forward.
///
/// Otherwise every delta item is applied in delta order. Any item with the same
/// id is removed from the working set, and the delta item is appended unless it
/// is a tombstone. Duplicate ids within one delta therefore resolve to the last
/// one, and tombstoned items are purged rather than kept.
///
/// The merged collection's watermark is the completion time on the local
/// clock, never earlier than the baseline's.
///
/// # Example
///
/// ```
/// use gmusicrs::{Collection, Item, merge};
/// use chrono::Utc;
///
/// #[derive(Clone)]
/// struct Song { id: String, deleted: bool }
///
/// impl Item for Song {
///     fn id(&self) -> &str { &self.id }
///     fn is_deleted(&self) -> bool { self.deleted }
/// }
///
/// let song = |id: &str, deleted| Song { id: id.to_string(), deleted };
/// let baseline = Collection::from_items(vec![song("a", false)], Utc::now());
/// let delta = Collection::from_items(vec![song("a", true), song("b", false)], Utc::now());
///
/// let merged = merge(&baseline, &delta).unwrap();
/// assert_eq!(merged.ids().collect::<Vec<_>>(), vec!["b"]);
/// ```
pub fn merge<T>(baseline: &Collection<T>, delta: &Collection<T>) -> Option<Collection<T>>
where
    T: Item + Clone,
{
    merge_at(baseline, delta, Utc::now())
}

/// [`merge`] with an explicit fetch-completion time.
pub fn merge_at<T>(
    baseline: &Collection<T>,
    delta: &Collection<T>,
    completed_at: DateTime<Utc>,
) -> Option<Collection<T>>
where
    T: Item + Clone,
{
    if delta.is_empty() {
        return None;
    }

    let mut working: Vec<Option<T>> = baseline.iter().cloned().map(Some).collect();
    let mut positions: HashMap<String, usize> = baseline
        .iter()
        .enumerate()
        .map(|(index, item)| (item.id().to_string(), index))
        .collect();

    let mut removed = 0usize;
    let mut inserted = 0usize;

    for item in delta {
        if let Some(index) = positions.remove(item.id()) {
            working[index] = None;
            removed += 1;
        }

        if !item.is_deleted() {
            positions.insert(item.id().to_string(), working.len());
            working.push(Some(item.clone()));
            inserted += 1;
        }
    }

    log::debug!(
        "Merged {} delta items into {} items: {removed} removed, {inserted} inserted",
        delta.len(),
        baseline.len()
    );

    let last_updated = completed_at.max(baseline.last_updated());
    let items = working.into_iter().flatten().collect();

    Some(Collection::from_unique(items, last_updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Song {
        id: String,
        deleted: bool,
        title: String,
    }

    impl Item for Song {
        fn id(&self) -> &str {
            &self.id
        }
        fn is_deleted(&self) -> bool {
            self.deleted
        }
    }

    fn song(id: &str, title: &str) -> Song {
        Song {
            id: id.to_string(),
            deleted: false,
            title: title.to_string(),
        }
    }

    fn tombstone(id: &str) -> Song {
        Song {
            id: id.to_string(),
            deleted: true,
            title: String::new(),
        }
    }

    // Bypasses the id dedup in from_items so duplicate-id deltas can be tested.
    fn raw_delta(items: Vec<Song>) -> Collection<Song> {
        Collection::from_unique(items, Utc::now())
    }

    #[test]
    fn test_empty_delta_is_no_change() {
        let t0 = Utc::now() - Duration::minutes(5);
        let baseline = Collection::from_items(vec![song("a", "X")], t0);
        let empty: Collection<Song> = Collection::new();

        assert!(merge(&baseline, &empty).is_none());
        assert!(merge(&baseline, &empty).is_none());
        assert_eq!(baseline.len(), 1);
        assert_eq!(baseline.last_updated(), t0);
    }

    #[test]
    fn test_tombstone_replaces_and_new_item_appended() {
        let t0 = Utc::now() - Duration::minutes(5);
        let baseline = Collection::from_items(vec![song("a", "X")], t0);
        let delta = Collection::from_items(vec![tombstone("a"), song("b", "Y")], t0);

        let merged = merge(&baseline, &delta).unwrap();

        assert_eq!(merged.items(), &[song("b", "Y")]);
        assert!(merged.last_updated() > t0);
    }

    #[test]
    fn test_tombstone_purges_every_matching_id() {
        let baseline = Collection::from_items(
            vec![song("a", "A"), song("b", "B"), song("c", "C")],
            Utc::now(),
        );
        let delta = Collection::from_items(vec![tombstone("a"), tombstone("c")], Utc::now());

        let merged = merge(&baseline, &delta).unwrap();

        assert_eq!(merged.ids().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_tombstone_for_unknown_id_is_ignored() {
        let baseline = Collection::from_items(vec![song("a", "A")], Utc::now());
        let delta = Collection::from_items(vec![tombstone("zzz")], Utc::now());

        let merged = merge(&baseline, &delta).unwrap();

        assert_eq!(merged.items(), baseline.items());
    }

    #[test]
    fn test_last_write_wins_within_delta() {
        let baseline = Collection::from_items(vec![song("a", "old")], Utc::now());
        let delta = raw_delta(vec![song("a", "first"), song("b", "B"), song("a", "second")]);

        let merged = merge(&baseline, &delta).unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get("a").unwrap().title, "second");
        assert_eq!(merged.ids().collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn test_delete_then_recreate_within_delta() {
        let baseline = Collection::from_items(vec![song("a", "old")], Utc::now());
        let delta = raw_delta(vec![tombstone("a"), song("a", "new")]);

        let merged = merge(&baseline, &delta).unwrap();

        assert_eq!(merged.items(), &[song("a", "new")]);
    }

    #[test]
    fn test_untouched_items_keep_their_order() {
        let baseline = Collection::from_items(
            vec![song("a", "A"), song("b", "B"), song("c", "C")],
            Utc::now(),
        );
        let delta = Collection::from_items(vec![song("b", "B2")], Utc::now());

        let merged = merge(&baseline, &delta).unwrap();

        assert_eq!(merged.ids().collect::<Vec<_>>(), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_watermark_never_moves_backwards() {
        let future = Utc::now() + Duration::hours(1);
        let baseline = Collection::from_items(vec![song("a", "A")], future);
        let delta = Collection::from_items(vec![song("b", "B")], Utc::now());

        let merged = merge_at(&baseline, &delta, Utc::now()).unwrap();

        assert!(merged.last_updated() >= baseline.last_updated());
    }

    #[test]
    fn test_watermark_is_completion_time() {
        let t0 = Utc::now() - Duration::hours(1);
        let completed = t0 + Duration::minutes(30);
        let baseline = Collection::from_items(vec![song("a", "A")], t0);
        let delta = Collection::from_items(vec![song("b", "B")], t0);

        let merged = merge_at(&baseline, &delta, completed).unwrap();

        assert_eq!(merged.last_updated(), completed);
    }

    #[test]
    fn test_merge_into_empty_drops_tombstones() {
        let empty: Collection<Song> = Collection::new();
        let delta = Collection::from_items(
            vec![song("a", "A"), tombstone("b"), song("c", "C")],
            Utc::now(),
        );

        let merged = merge(&empty, &delta).unwrap();

        assert_eq!(merged.ids().collect::<Vec<_>>(), vec!["a", "c"]);
    }
}
