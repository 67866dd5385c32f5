//! Read-time projection of a unified playlist: manual songs plus everything
//! its criteria select, laid out in the user's saved order.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::criteria::filter_matching;
use crate::models::{Criteria, Song};

/// The concrete song list of a playlist along with its membership counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterializedPlaylist {
    pub songs: Vec<Song>,
    /// Distinct hand-picked songs.
    pub manual_count: usize,
    /// Songs selected by criteria that were not also added by hand.
    pub dynamic_count: usize,
    /// Size of the combined manual and dynamic membership.
    pub total_count: usize,
}

impl MaterializedPlaylist {
    /// Ids in display order, ready to be saved as the new custom order.
    pub fn song_ids(&self) -> Vec<i64> {
        self.songs.iter().map(|song| song.id).collect()
    }
}

/// Union of the songs matched by each criteria. Criteria are alternatives,
/// so a song only has to satisfy one of them.
pub fn dynamic_song_ids(songs: &[Song], criteria: &[Criteria]) -> BTreeSet<i64> {
    criteria
        .iter()
        .flat_map(|rules| filter_matching(songs, rules))
        .collect()
}

/// Build the ordered song list of a playlist.
///
/// Songs listed in `stored_order` come first, in that order, as long as they
/// still belong to the playlist; stale or repeated entries are skipped.
/// Members missing from `stored_order` follow in `all_songs` order. Nothing
/// here writes the order back.
pub fn materialize(
    manual_song_ids: &[i64],
    criteria: &[Criteria],
    all_songs: &[Song],
    stored_order: &[i64],
) -> MaterializedPlaylist {
    let manual: BTreeSet<i64> = manual_song_ids.iter().copied().collect();
    let dynamic = dynamic_song_ids(all_songs, criteria);
    let eligible: BTreeSet<i64> = manual.union(&dynamic).copied().collect();

    let mut by_id: HashMap<i64, &Song> = HashMap::with_capacity(all_songs.len());
    for song in all_songs {
        by_id.entry(song.id).or_insert(song);
    }

    let mut pending = eligible.clone();
    let mut songs = Vec::with_capacity(eligible.len());
    let mut dropped = 0usize;
    for id in stored_order {
        if !pending.remove(id) {
            dropped += 1;
            continue;
        }
        if let Some(song) = by_id.get(id) {
            songs.push((*song).clone());
        }
    }

    let ordered = songs.len();
    for song in all_songs {
        if pending.remove(&song.id) {
            songs.push(song.clone());
        }
    }

    debug!(
        ordered,
        appended = songs.len() - ordered,
        dropped,
        unresolved = pending.len(),
        "materialized playlist"
    );

    MaterializedPlaylist {
        songs,
        manual_count: manual.len(),
        dynamic_count: dynamic.difference(&manual).count(),
        total_count: eligible.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::RuleSet;
    use crate::models::Tag;
    use serde_json::json;

    fn song(id: i64, tag_ids: &[i64]) -> Song {
        Song {
            id,
            title: format!("Song {id}"),
            file_path: format!("/music/{id}.mp3"),
            tags: tag_ids
                .iter()
                .map(|tag_id| Tag {
                    id: *tag_id,
                    name: format!("tag-{tag_id}"),
                    group_id: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn tagged(tag_id: i64) -> Criteria {
        Criteria {
            id: tag_id,
            name: format!("tagged {tag_id}"),
            include: RuleSet::compile(&json!({ "tags": [tag_id] })),
            exclude: RuleSet::default(),
        }
    }

    #[test]
    fn test_stale_entries_dropped_and_new_members_appended() {
        let songs = vec![song(5, &[]), song(6, &[]), song(7, &[70])];
        let view = materialize(&[5], &[tagged(70)], &songs, &[5, 6]);

        assert_eq!(view.song_ids(), vec![5, 7]);
        assert_eq!(view.manual_count, 1);
        assert_eq!(view.dynamic_count, 1);
        assert_eq!(view.total_count, 2);
    }

    #[test]
    fn test_stored_order_wins_over_snapshot_order() {
        let songs = vec![song(1, &[]), song(2, &[]), song(3, &[])];
        let view = materialize(&[1, 2, 3], &[], &songs, &[3, 1, 2]);
        assert_eq!(view.song_ids(), vec![3, 1, 2]);
    }

    #[test]
    fn test_repeated_order_entries_emit_once() {
        let songs = vec![song(1, &[]), song(2, &[])];
        let view = materialize(&[1, 2], &[], &songs, &[2, 2, 1, 2]);
        assert_eq!(view.song_ids(), vec![2, 1]);
    }

    #[test]
    fn test_criteria_are_unioned() {
        let songs = vec![song(1, &[10]), song(2, &[20]), song(3, &[])];
        let criteria = [tagged(10), tagged(20)];

        assert_eq!(dynamic_song_ids(&songs, &criteria), BTreeSet::from([1, 2]));

        let view = materialize(&[], &criteria, &songs, &[]);
        assert_eq!(view.song_ids(), vec![1, 2]);
        assert_eq!(view.dynamic_count, 2);
    }

    #[test]
    fn test_manual_songs_matching_criteria_count_once() {
        let songs = vec![song(1, &[10]), song(2, &[10]), song(3, &[])];
        let view = materialize(&[2, 3, 3], &[tagged(10)], &songs, &[]);

        assert_eq!(view.song_ids(), vec![1, 2, 3]);
        assert_eq!(view.manual_count, 2);
        assert_eq!(view.dynamic_count, 1);
        assert_eq!(view.total_count, 3);
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let songs = vec![song(4, &[1]), song(2, &[]), song(9, &[1]), song(1, &[])];
        let criteria = [tagged(1)];
        let first = materialize(&[1, 2], &criteria, &songs, &[9, 42, 2]);
        let second = materialize(&[1, 2], &criteria, &songs, &[9, 42, 2]);

        assert_eq!(first, second);
        assert_eq!(first.song_ids(), vec![9, 2, 4, 1]);
    }

    #[test]
    fn test_manual_id_without_song_record_is_counted_but_not_emitted() {
        let songs = vec![song(1, &[])];
        let view = materialize(&[1, 99], &[], &songs, &[99, 1]);

        assert_eq!(view.song_ids(), vec![1]);
        assert_eq!(view.total_count, 2);
    }

    #[test]
    fn test_empty_playlist() {
        let songs = vec![song(1, &[])];
        let view = materialize(&[], &[], &songs, &[1]);
        assert!(view.songs.is_empty());
        assert_eq!(view.total_count, 0);
    }
}
