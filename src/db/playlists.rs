use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tracing::{debug, info};

use crate::criteria::id_from_json;
use crate::error::LibraryError;
use crate::models::UnifiedPlaylist;
use crate::playlist::{materialize, MaterializedPlaylist};

use super::criteria::fetch_criteria_for_playlist;
use super::songs::{ensure_exists, fetch_all_songs};

/// Playlist row before manual songs and criteria are attached.
fn playlist_from_row(row: &Row<'_>) -> rusqlite::Result<(UnifiedPlaylist, String)> {
    let playlist = UnifiedPlaylist {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        ..Default::default()
    };
    Ok((playlist, row.get(3)?))
}

/// Decode a stored order, skipping entries that are not ids. The
/// materializer already tolerates stale ids; junk entries are treated the
/// same way instead of failing the whole playlist.
fn decode_order(text: &str) -> Result<Vec<i64>> {
    let entries: Vec<Value> =
        serde_json::from_str(text).context("stored song order is not a JSON list")?;
    let ids: Vec<i64> = entries.iter().filter_map(id_from_json).collect();
    if ids.len() < entries.len() {
        debug!(skipped = entries.len() - ids.len(), "skipped non-integer song order entries");
    }
    Ok(ids)
}

/// Fill in manual songs, criteria and the saved order.
fn hydrate(conn: &Connection, mut playlist: UnifiedPlaylist, order: &str) -> Result<UnifiedPlaylist> {
    playlist.song_order = decode_order(order)?;
    playlist.manual_song_ids = fetch_manual_song_ids(conn, playlist.id)?;
    playlist.criteria = fetch_criteria_for_playlist(conn, playlist.id)?;
    Ok(playlist)
}

/// Retrieve every playlist, fully hydrated, ordered by name.
pub fn fetch_playlists(conn: &Connection) -> Result<Vec<UnifiedPlaylist>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, description, song_order
             FROM playlists
             ORDER BY name COLLATE NOCASE, id",
        )
        .context("failed to prepare playlist query")?;

    let rows = stmt
        .query_map([], playlist_from_row)
        .context("failed to load playlists")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect playlists")?;

    rows.into_iter()
        .map(|(playlist, order)| hydrate(conn, playlist, &order))
        .collect()
}

pub fn fetch_playlist(conn: &Connection, id: i64) -> Result<UnifiedPlaylist> {
    let (playlist, order) = conn
        .query_row(
            "SELECT id, name, description, song_order FROM playlists WHERE id = ?1",
            [id],
            playlist_from_row,
        )
        .optional()
        .context("failed to load playlist")?
        .ok_or(LibraryError::PlaylistNotFound)?;

    hydrate(conn, playlist, &order)
}

fn fetch_manual_song_ids(conn: &Connection, playlist_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn
        .prepare(
            "SELECT song_id FROM playlist_manual_songs
             WHERE playlist_id = ?1
             ORDER BY rowid",
        )
        .context("failed to prepare manual songs query")?;

    let ids = stmt
        .query_map([playlist_id], |row| row.get::<_, i64>(0))
        .context("failed to iterate manual songs")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect manual songs")?;

    Ok(ids)
}

fn fetch_song_order(conn: &Connection, playlist_id: i64) -> Result<Vec<i64>> {
    let order: String = conn
        .query_row(
            "SELECT song_order FROM playlists WHERE id = ?1",
            [playlist_id],
            |row| row.get(0),
        )
        .optional()
        .context("failed to load song order")?
        .ok_or(LibraryError::PlaylistNotFound)?;

    decode_order(&order)
}

fn store_song_order(conn: &Connection, playlist_id: i64, order: &[i64]) -> Result<()> {
    let encoded = serde_json::to_string(order).context("failed to encode song order")?;
    let updated = conn
        .execute(
            "UPDATE playlists SET song_order = ?1 WHERE id = ?2",
            params![encoded, playlist_id],
        )
        .context("failed to store song order")?;

    if updated == 0 {
        Err(LibraryError::PlaylistNotFound.into())
    } else {
        Ok(())
    }
}

/// Insert an empty playlist.
pub fn create_playlist(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
) -> Result<UnifiedPlaylist> {
    conn.execute(
        "INSERT INTO playlists (name, description, song_order) VALUES (?1, ?2, '[]')",
        params![name, description],
    )
    .context("failed to insert playlist")?;

    let playlist = UnifiedPlaylist {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        description: description.map(str::to_owned),
        ..Default::default()
    };
    info!(playlist_id = playlist.id, name, "created playlist");
    Ok(playlist)
}

pub fn update_playlist(
    conn: &Connection,
    id: i64,
    name: &str,
    description: Option<&str>,
) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE playlists SET name = ?1, description = ?2 WHERE id = ?3",
            params![name, description, id],
        )
        .context("failed to update playlist")?;

    if updated == 0 {
        Err(LibraryError::PlaylistNotFound.into())
    } else {
        Ok(())
    }
}

/// Remove a playlist. Manual links and criteria attachments cascade; the
/// criteria themselves stay in the library.
pub fn delete_playlist(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn
        .execute("DELETE FROM playlists WHERE id = ?1", params![id])
        .context("failed to delete playlist")?;

    if deleted == 0 {
        Err(LibraryError::PlaylistNotFound.into())
    } else {
        info!(playlist_id = id, "deleted playlist");
        Ok(())
    }
}

/// Hand-pick a song. It is also appended to the saved order so it shows up
/// at the end of the list rather than wherever leftovers land.
pub fn add_manual_song(conn: &Connection, playlist_id: i64, song_id: i64) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .context("failed to start transaction")?;

    let mut order = fetch_song_order(&tx, playlist_id)?;
    ensure_exists(&tx, "songs", song_id, LibraryError::SongNotFound)?;

    let inserted = tx
        .execute(
            "INSERT OR IGNORE INTO playlist_manual_songs (playlist_id, song_id) VALUES (?1, ?2)",
            params![playlist_id, song_id],
        )
        .context("failed to link song to playlist")?;
    if inserted == 0 {
        return Err(LibraryError::SongAlreadyInPlaylist.into());
    }

    if !order.contains(&song_id) {
        order.push(song_id);
        store_song_order(&tx, playlist_id, &order)?;
    }

    tx.commit().context("failed to commit manual song")?;
    info!(playlist_id, song_id, "added manual song");
    Ok(())
}

/// Drop a hand-picked song and forget its saved position. Returns whether a
/// manual link existed; a song still matched by criteria stays visible.
pub fn remove_manual_song(conn: &Connection, playlist_id: i64, song_id: i64) -> Result<bool> {
    let tx = conn
        .unchecked_transaction()
        .context("failed to start transaction")?;

    let mut order = fetch_song_order(&tx, playlist_id)?;
    ensure_exists(&tx, "songs", song_id, LibraryError::SongNotFound)?;

    let removed = tx
        .execute(
            "DELETE FROM playlist_manual_songs WHERE playlist_id = ?1 AND song_id = ?2",
            params![playlist_id, song_id],
        )
        .context("failed to unlink song from playlist")?;

    let before = order.len();
    order.retain(|id| *id != song_id);
    if order.len() != before {
        store_song_order(&tx, playlist_id, &order)?;
    }

    tx.commit().context("failed to commit manual song removal")?;
    info!(playlist_id, song_id, "removed manual song");
    Ok(removed > 0)
}

/// Replace the saved order verbatim. Ids are not validated; the materializer
/// skips whatever no longer belongs to the playlist.
pub fn reorder_songs(conn: &Connection, playlist_id: i64, order: &[i64]) -> Result<()> {
    store_song_order(conn, playlist_id, order)?;
    debug!(playlist_id, entries = order.len(), "stored song order");
    Ok(())
}

/// Attach a criteria after the ones already attached. Attaching twice is a
/// no-op.
pub fn attach_criteria(conn: &Connection, playlist_id: i64, criteria_id: i64) -> Result<()> {
    ensure_exists(conn, "playlists", playlist_id, LibraryError::PlaylistNotFound)?;
    ensure_exists(conn, "criteria", criteria_id, LibraryError::CriteriaNotFound)?;

    conn.execute(
        "INSERT OR IGNORE INTO playlist_criteria (playlist_id, criteria_id, position)
         SELECT ?1, ?2, COALESCE(MAX(position), -1) + 1
         FROM playlist_criteria WHERE playlist_id = ?1",
        params![playlist_id, criteria_id],
    )
    .context("failed to attach criteria")?;
    Ok(())
}

pub fn detach_criteria(conn: &Connection, playlist_id: i64, criteria_id: i64) -> Result<()> {
    let deleted = conn
        .execute(
            "DELETE FROM playlist_criteria WHERE playlist_id = ?1 AND criteria_id = ?2",
            params![playlist_id, criteria_id],
        )
        .context("failed to detach criteria")?;

    if deleted == 0 {
        Err(LibraryError::CriteriaNotFound.into())
    } else {
        Ok(())
    }
}

/// Materialize an already loaded playlist against the current library.
pub fn materialize_playlist(
    conn: &Connection,
    playlist: &UnifiedPlaylist,
) -> Result<MaterializedPlaylist> {
    let songs = fetch_all_songs(conn)?;
    debug!(
        playlist_id = playlist.id,
        library_size = songs.len(),
        criteria = playlist.criteria.len(),
        "materializing playlist"
    );
    Ok(materialize(
        &playlist.manual_song_ids,
        &playlist.criteria,
        &songs,
        &playlist.song_order,
    ))
}

/// Load a playlist and produce its ordered songs.
pub fn fetch_playlist_songs(conn: &Connection, playlist_id: i64) -> Result<MaterializedPlaylist> {
    let playlist = fetch_playlist(conn, playlist_id)?;
    materialize_playlist(conn, &playlist)
}
