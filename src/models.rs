//! Domain models that mirror the SQLite schema and get passed between the
//! store, the matching core and the TUI. They stay plain data holders so the
//! other layers can focus on persistence, matching and presentation.

use std::fmt;
use std::path::Path;

use crate::criteria::RuleSet;

/// A tag attached to songs. A tag belongs to at most one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub group_id: Option<i64>,
}

/// Named bucket of tags (for example "Mood" or "Instrument").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagGroup {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// In-memory representation of a library song. Metadata and audio features
/// come from the scanner and analyzer upstream; a `None` feature means the
/// value was never computed, which is different from zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Song {
    /// Primary key from the SQLite store.
    pub id: i64,
    /// Title displayed in lists.
    pub title: String,
    /// Full path of the audio file as recorded by the scanner.
    pub file_path: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i64>,
    /// Length in seconds.
    pub duration: Option<f64>,
    /// Beats per minute.
    pub tempo: Option<f64>,
    pub energy: Option<f64>,
    pub valence: Option<f64>,
    pub danceability: Option<f64>,
    pub tags: Vec<Tag>,
}

impl Song {
    /// Parent directory of the file path, or an empty string for a bare file
    /// name. Folder rules compare against this value verbatim.
    pub fn folder(&self) -> String {
        Path::new(&self.file_path)
            .parent()
            .map(|parent| parent.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn has_tag(&self, tag_id: i64) -> bool {
        self.tags.iter().any(|tag| tag.id == tag_id)
    }

    /// Compose a `Title - Artist` string that omits the hyphen when the
    /// artist is unknown.
    pub fn display_title(&self) -> String {
        match self.artist.as_deref().map(str::trim) {
            Some(artist) if !artist.is_empty() => format!("{} - {}", self.title, artist),
            _ => self.title.clone(),
        }
    }
}

/// A named, reusable filter. Songs matching `include` and not matching
/// `exclude` are pulled into every playlist the criteria is attached to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    pub id: i64,
    pub name: String,
    pub include: RuleSet,
    pub exclude: RuleSet,
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Playlist mixing hand-picked songs with criteria-selected ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnifiedPlaylist {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Songs added by hand, in the order they were added.
    pub manual_song_ids: Vec<i64>,
    /// Attached criteria in their configured order. A song qualifies when it
    /// matches any one of them.
    pub criteria: Vec<Criteria>,
    /// The user's chosen display order. It may mention songs that no longer
    /// belong to the playlist and omit songs that joined since it was saved.
    pub song_order: Vec<i64>,
}

impl UnifiedPlaylist {
    pub fn has_manual_song(&self, song_id: i64) -> bool {
        self.manual_song_ids.contains(&song_id)
    }
}

impl fmt::Display for UnifiedPlaylist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
