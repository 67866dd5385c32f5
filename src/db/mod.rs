//! Persistence module split across logical submodules.

mod connection;
mod criteria;
mod playlists;
mod songs;
mod tags;

pub use connection::{apply_schema, open_database};
pub use criteria::{
    create_criteria, delete_criteria, fetch_all_criteria, fetch_criteria,
    fetch_playlists_using_criteria, update_criteria,
};
pub use playlists::{
    add_manual_song, attach_criteria, create_playlist, delete_playlist, detach_criteria,
    fetch_playlist, fetch_playlist_songs, fetch_playlists, materialize_playlist,
    remove_manual_song, reorder_songs, update_playlist,
};
pub use songs::{
    add_tag_to_song, batch_tag_songs, create_song, delete_song, fetch_all_songs, fetch_song,
    remove_tag_from_song, update_song, TagBatchMode,
};
pub use tags::{
    create_tag, create_tag_group, delete_tag, delete_tag_group, fetch_tag_groups, fetch_tags,
    set_tag_group, update_tag, update_tag_group,
};
