use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::debug;

/// Ensure the database file exists, run lazy migrations, and return a live
/// connection.
pub fn open_database(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("failed to create data directory")?;
    }

    let conn = Connection::open(db_path).context("failed to open SQLite database")?;
    apply_schema(&conn)?;
    debug!(path = %db_path.display(), "opened library database");
    Ok(conn)
}

/// Create every table if missing. Also toggles `PRAGMA foreign_keys = ON` so
/// the cascades below behave the same for in-memory test databases and the
/// real file.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])
        .context("failed to enable foreign keys")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS songs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            file_path TEXT NOT NULL,
            artist TEXT,
            album TEXT,
            genre TEXT,
            year INTEGER,
            duration REAL,
            tempo REAL,
            energy REAL,
            valence REAL,
            danceability REAL
        )",
        [],
    )
    .context("failed to create songs table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tag_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT
        )",
        [],
    )
    .context("failed to create tag_groups table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            group_id INTEGER,
            FOREIGN KEY(group_id) REFERENCES tag_groups(id) ON DELETE CASCADE
        )",
        [],
    )
    .context("failed to create tags table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS song_tags (
            song_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL,
            PRIMARY KEY (song_id, tag_id),
            FOREIGN KEY(song_id) REFERENCES songs(id) ON DELETE CASCADE,
            FOREIGN KEY(tag_id) REFERENCES tags(id) ON DELETE CASCADE
        )",
        [],
    )
    .context("failed to create song_tags table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS criteria (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            include_rules TEXT NOT NULL DEFAULT '{}',
            exclude_rules TEXT NOT NULL DEFAULT '{}'
        )",
        [],
    )
    .context("failed to create criteria table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS playlists (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            song_order TEXT NOT NULL DEFAULT '[]'
        )",
        [],
    )
    .context("failed to create playlists table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS playlist_manual_songs (
            playlist_id INTEGER NOT NULL,
            song_id INTEGER NOT NULL,
            PRIMARY KEY (playlist_id, song_id),
            FOREIGN KEY(playlist_id) REFERENCES playlists(id) ON DELETE CASCADE,
            FOREIGN KEY(song_id) REFERENCES songs(id) ON DELETE CASCADE
        )",
        [],
    )
    .context("failed to create playlist_manual_songs table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS playlist_criteria (
            playlist_id INTEGER NOT NULL,
            criteria_id INTEGER NOT NULL,
            position INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (playlist_id, criteria_id),
            FOREIGN KEY(playlist_id) REFERENCES playlists(id) ON DELETE CASCADE,
            FOREIGN KEY(criteria_id) REFERENCES criteria(id) ON DELETE CASCADE
        )",
        [],
    )
    .context("failed to create playlist_criteria table")?;

    Ok(())
}

#[cfg(test)]
pub(crate) fn test_connection() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory database");
    apply_schema(&conn).expect("schema");
    conn
}
