use std::collections::BTreeSet;

use crate::models::{Criteria, Song};

use super::rules::{Feature, FieldFilter};

/// Decide whether `song` belongs to the selection described by `criteria`.
///
/// Every include rule must hold (an empty include accepts everything), then
/// any exclude rule that holds rejects the song.
pub fn matches(song: &Song, criteria: &Criteria) -> bool {
    criteria
        .include
        .filters()
        .iter()
        .all(|filter| filter.matches(song))
        && !criteria
            .exclude
            .filters()
            .iter()
            .any(|filter| filter.matches(song))
}

/// Ids of every song in `songs` that matches `criteria`.
pub fn filter_matching<'a, I>(songs: I, criteria: &Criteria) -> BTreeSet<i64>
where
    I: IntoIterator<Item = &'a Song>,
{
    songs
        .into_iter()
        .filter(|song| matches(song, criteria))
        .map(|song| song.id)
        .collect()
}

impl FieldFilter {
    /// Evaluate this single rule. Lists match when any entry matches.
    pub fn matches(&self, song: &Song) -> bool {
        match self {
            FieldFilter::Tags(ids) => song.tags.iter().any(|tag| ids.contains(&tag.id)),
            FieldFilter::TagGroups(groups) => song
                .tags
                .iter()
                .filter_map(|tag| tag.group_id)
                .any(|group| groups.contains(&group)),
            FieldFilter::Artists(values) => equals_any(song.artist.as_deref(), values),
            FieldFilter::Albums(values) => equals_any(song.album.as_deref(), values),
            FieldFilter::Genres(values) => equals_any(song.genre.as_deref(), values),
            FieldFilter::Folders(values) => {
                let folder = song.folder();
                values.iter().any(|candidate| *candidate == folder)
            }
            FieldFilter::Paths(patterns) => patterns
                .iter()
                .any(|pattern| song.file_path.contains(pattern.as_str())),
            FieldFilter::Range(feature, range) => range.contains(feature.read(song)),
            FieldFilter::Invalid { .. } => false,
        }
    }
}

impl Feature {
    /// The song's value for this feature, if it was ever computed.
    pub fn read(self, song: &Song) -> Option<f64> {
        match self {
            Feature::Energy => song.energy,
            Feature::Valence => song.valence,
            Feature::Danceability => song.danceability,
            Feature::Tempo => song.tempo,
            Feature::Duration => song.duration,
            Feature::Year => song.year.map(|year| year as f64),
        }
    }
}

fn equals_any(value: Option<&str>, candidates: &[String]) -> bool {
    value.is_some_and(|value| candidates.iter().any(|candidate| candidate == value))
}
