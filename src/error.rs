//! Domain failures surfaced by the library store. They travel inside
//! `anyhow::Error` chains so callers can `downcast_ref` when they need to
//! react to a specific case.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LibraryError {
    #[error("Playlist not found")]
    PlaylistNotFound,

    #[error("Song not found")]
    SongNotFound,

    #[error("Criteria not found")]
    CriteriaNotFound,

    #[error("Tag not found")]
    TagNotFound,

    #[error("Tag group not found")]
    TagGroupNotFound,

    #[error("Criteria name \"{0}\" already exists.")]
    DuplicateCriteriaName(String),

    #[error("Tag name \"{0}\" already exists.")]
    DuplicateTagName(String),

    #[error("Tag group name \"{0}\" already exists.")]
    DuplicateTagGroupName(String),

    #[error("Song already in playlist")]
    SongAlreadyInPlaylist,
}
