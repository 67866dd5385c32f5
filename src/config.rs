//! Where the application keeps its files.

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use directories::BaseDirs;

/// Folder name used beneath the user's home directory for application data.
const DATA_DIR_NAME: &str = ".unified-playlists";
/// SQLite file name stored inside the application data directory.
const DB_FILE_NAME: &str = "library.sqlite";
/// Log file written next to the database.
const LOG_FILE_NAME: &str = "unified-playlists.log";

/// Environment variable that points the app at a specific database file.
pub const DB_PATH_ENV: &str = "UNIFIED_PLAYLISTS_DB";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_path: PathBuf,
}

impl AppPaths {
    /// Resolve paths from the environment, falling back to the home
    /// directory default.
    pub fn resolve() -> Result<Self> {
        match env::var_os(DB_PATH_ENV) {
            Some(raw) if !raw.is_empty() => Ok(Self::for_database(PathBuf::from(raw))),
            _ => Self::default_location(),
        }
    }

    /// Use an explicit database file; the log goes into the same directory.
    pub fn for_database(db_path: PathBuf) -> Self {
        let data_dir = db_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();
        Self {
            log_path: data_dir.join(LOG_FILE_NAME),
            data_dir,
            db_path,
        }
    }

    fn default_location() -> Result<Self> {
        let base_dirs = BaseDirs::new().ok_or_else(|| anyhow!("could not locate home directory"))?;
        let data_dir = base_dirs.home_dir().join(DATA_DIR_NAME);
        Ok(Self {
            db_path: data_dir.join(DB_FILE_NAME),
            log_path: data_dir.join(LOG_FILE_NAME),
            data_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_database_keeps_log_alongside() {
        let paths = AppPaths::for_database(PathBuf::from("/srv/music/library.db"));
        assert_eq!(paths.data_dir, PathBuf::from("/srv/music"));
        assert_eq!(paths.log_path, PathBuf::from("/srv/music/unified-playlists.log"));
    }

    #[test]
    fn test_bare_database_file_name_uses_working_directory() {
        let paths = AppPaths::for_database(PathBuf::from("library.db"));
        assert_eq!(paths.data_dir, PathBuf::new());
        assert_eq!(paths.log_path, PathBuf::from("unified-playlists.log"));
    }
}
