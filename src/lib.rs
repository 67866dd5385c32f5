//! Core library surface for the Unified Playlists TUI application.
//!
//! Playlists combine hand-picked songs with songs selected by reusable
//! criteria. The matching core (`criteria`, `playlist`) is pure; `db` owns
//! the SQLite store and `ui` the terminal front-end.
pub mod config;
pub mod criteria;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod playlist;
pub mod ui;

pub use config::AppPaths;
pub use criteria::{filter_matching, matches, RuleSet, RuleWarning};
pub use db::{fetch_playlists, open_database};
pub use error::LibraryError;
pub use logging::init_logging;
pub use models::{Criteria, Song, Tag, TagGroup, UnifiedPlaylist};
pub use playlist::{materialize, MaterializedPlaylist};

/// The interactive application entry point and state container.
pub use ui::{run_app, App};
