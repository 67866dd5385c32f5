use std::collections::HashMap;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use crate::error::LibraryError;
use crate::models::{Song, Tag};

const SONG_COLUMNS: &str = "id, title, file_path, artist, album, genre, year, duration, tempo, \
                            energy, valence, danceability";

fn song_from_row(row: &Row<'_>) -> rusqlite::Result<Song> {
    Ok(Song {
        id: row.get(0)?,
        title: row.get(1)?,
        file_path: row.get(2)?,
        artist: row.get(3)?,
        album: row.get(4)?,
        genre: row.get(5)?,
        year: row.get(6)?,
        duration: row.get(7)?,
        tempo: row.get(8)?,
        energy: row.get(9)?,
        valence: row.get(10)?,
        danceability: row.get(11)?,
        tags: Vec::new(),
    })
}

/// Insert a song record produced by the scanner. The id and tags of `song`
/// are ignored; the stored copy comes back with its new id.
pub fn create_song(conn: &Connection, song: &Song) -> Result<Song> {
    conn.execute(
        "INSERT INTO songs (title, file_path, artist, album, genre, year, duration, tempo,
                            energy, valence, danceability)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            song.title,
            song.file_path,
            song.artist,
            song.album,
            song.genre,
            song.year,
            song.duration,
            song.tempo,
            song.energy,
            song.valence,
            song.danceability,
        ],
    )
    .context("failed to insert song")?;

    Ok(Song {
        id: conn.last_insert_rowid(),
        tags: Vec::new(),
        ..song.clone()
    })
}

/// Overwrite the metadata and features of song `id` with the values in
/// `song`. The id and tags carried by `song` are ignored.
pub fn update_song(conn: &Connection, id: i64, song: &Song) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE songs
             SET title = ?1, file_path = ?2, artist = ?3, album = ?4, genre = ?5, year = ?6,
                 duration = ?7, tempo = ?8, energy = ?9, valence = ?10, danceability = ?11
             WHERE id = ?12",
            params![
                song.title,
                song.file_path,
                song.artist,
                song.album,
                song.genre,
                song.year,
                song.duration,
                song.tempo,
                song.energy,
                song.valence,
                song.danceability,
                id,
            ],
        )
        .context("failed to update song")?;

    if updated == 0 {
        Err(LibraryError::SongNotFound.into())
    } else {
        Ok(())
    }
}

/// Fetch the whole library with tags attached, in ascending id order. This
/// is the snapshot the playlist materializer works from.
pub fn fetch_all_songs(conn: &Connection) -> Result<Vec<Song>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {SONG_COLUMNS} FROM songs ORDER BY id"))
        .context("failed to prepare all songs query")?;

    let mut songs = stmt
        .query_map([], song_from_row)
        .context("failed to iterate songs")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect songs")?;

    let mut tags = fetch_song_tags(conn)?;
    for song in &mut songs {
        if let Some(song_tags) = tags.remove(&song.id) {
            song.tags = song_tags;
        }
    }

    Ok(songs)
}

/// Load a single song with its tags.
pub fn fetch_song(conn: &Connection, id: i64) -> Result<Song> {
    let mut song = conn
        .query_row(
            &format!("SELECT {SONG_COLUMNS} FROM songs WHERE id = ?1"),
            [id],
            song_from_row,
        )
        .optional()
        .context("failed to load song")?
        .ok_or(LibraryError::SongNotFound)?;

    let mut stmt = conn
        .prepare(
            "SELECT t.id, t.name, t.group_id
             FROM tags t
             INNER JOIN song_tags st ON st.tag_id = t.id
             WHERE st.song_id = ?1
             ORDER BY t.id",
        )
        .context("failed to prepare song tags query")?;
    song.tags = stmt
        .query_map([id], |row| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
                group_id: row.get(2)?,
            })
        })
        .context("failed to iterate song tags")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect song tags")?;

    Ok(song)
}

/// Every tag assignment grouped by song id.
fn fetch_song_tags(conn: &Connection) -> Result<HashMap<i64, Vec<Tag>>> {
    let mut stmt = conn
        .prepare(
            "SELECT st.song_id, t.id, t.name, t.group_id
             FROM song_tags st
             INNER JOIN tags t ON t.id = st.tag_id
             ORDER BY st.song_id, t.id",
        )
        .context("failed to prepare tag assignment query")?;

    let mut rows = stmt.query([]).context("failed to execute tag assignment query")?;

    let mut by_song: HashMap<i64, Vec<Tag>> = HashMap::new();
    while let Some(row) = rows.next().context("failed to fetch tag assignment row")? {
        let song_id: i64 = row.get(0).context("failed to read song id")?;
        let tag = Tag {
            id: row.get(1).context("failed to read tag id")?,
            name: row.get(2).context("failed to read tag name")?,
            group_id: row.get(3).context("failed to read tag group")?,
        };
        by_song.entry(song_id).or_default().push(tag);
    }

    Ok(by_song)
}

/// Permanently delete a song. Tag links and manual playlist entries cascade;
/// saved playlist orders keep the id until the next reorder, which the
/// materializer tolerates.
pub fn delete_song(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn
        .execute("DELETE FROM songs WHERE id = ?1", params![id])
        .context("failed to delete song")?;

    if deleted == 0 {
        Err(LibraryError::SongNotFound.into())
    } else {
        Ok(())
    }
}

/// Tag a song. Repeating the call is a no-op.
pub fn add_tag_to_song(conn: &Connection, song_id: i64, tag_id: i64) -> Result<()> {
    ensure_exists(conn, "songs", song_id, LibraryError::SongNotFound)?;
    ensure_exists(conn, "tags", tag_id, LibraryError::TagNotFound)?;
    conn.execute(
        "INSERT OR IGNORE INTO song_tags (song_id, tag_id) VALUES (?1, ?2)",
        params![song_id, tag_id],
    )
    .context("failed to tag song")?;
    Ok(())
}

/// Remove a tag from a song, reporting when the song never carried it.
pub fn remove_tag_from_song(conn: &Connection, song_id: i64, tag_id: i64) -> Result<()> {
    let deleted = conn
        .execute(
            "DELETE FROM song_tags WHERE song_id = ?1 AND tag_id = ?2",
            params![song_id, tag_id],
        )
        .context("failed to untag song")?;

    if deleted == 0 {
        Err(LibraryError::TagNotFound.into())
    } else {
        Ok(())
    }
}

/// How [`batch_tag_songs`] combines the given tags with what each song
/// already carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagBatchMode {
    /// Keep existing tags and add the given ones.
    Add,
    /// Drop every existing tag, then add the given ones.
    Replace,
    /// Remove the given tags where present.
    Remove,
}

/// Apply `mode` with `tag_ids` to every song in `song_ids` in one
/// transaction. Any unknown song or tag aborts the whole batch. Returns the
/// number of songs processed.
pub fn batch_tag_songs(
    conn: &Connection,
    song_ids: &[i64],
    tag_ids: &[i64],
    mode: TagBatchMode,
) -> Result<usize> {
    let tx = conn
        .unchecked_transaction()
        .context("failed to start transaction")?;

    for &tag_id in tag_ids {
        ensure_exists(&tx, "tags", tag_id, LibraryError::TagNotFound)?;
    }

    for &song_id in song_ids {
        ensure_exists(&tx, "songs", song_id, LibraryError::SongNotFound)?;

        if mode == TagBatchMode::Replace {
            tx.execute("DELETE FROM song_tags WHERE song_id = ?1", [song_id])
                .context("failed to clear song tags")?;
        }

        for &tag_id in tag_ids {
            let sql = match mode {
                TagBatchMode::Add | TagBatchMode::Replace => {
                    "INSERT OR IGNORE INTO song_tags (song_id, tag_id) VALUES (?1, ?2)"
                }
                TagBatchMode::Remove => "DELETE FROM song_tags WHERE song_id = ?1 AND tag_id = ?2",
            };
            tx.execute(sql, params![song_id, tag_id])
                .context("failed to apply batch tag")?;
        }
    }

    tx.commit().context("failed to commit batch tag")?;
    info!(songs = song_ids.len(), tags = tag_ids.len(), ?mode, "batch tagged songs");
    Ok(song_ids.len())
}

/// Fail with `missing` unless `table` has a row with the given id.
pub(crate) fn ensure_exists(
    conn: &Connection,
    table: &str,
    id: i64,
    missing: LibraryError,
) -> Result<()> {
    let found = conn
        .query_row(
            &format!("SELECT 1 FROM {table} WHERE id = ?1"),
            [id],
            |_| Ok(()),
        )
        .optional()
        .with_context(|| format!("failed to look up {table} row"))?;

    match found {
        Some(()) => Ok(()),
        None => Err(missing.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_connection;
    use crate::db::{create_tag, create_tag_group};

    fn scanned(title: &str, path: &str) -> Song {
        Song {
            title: title.to_string(),
            file_path: path.to_string(),
            artist: Some("Artist".to_string()),
            energy: Some(0.4),
            year: Some(2001),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_fetch_round_trip() {
        let conn = test_connection();
        let created = create_song(&conn, &scanned("One", "/m/one.mp3")).unwrap();
        assert!(created.id > 0);

        let loaded = fetch_song(&conn, created.id).unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.valence, None);
    }

    #[test]
    fn test_fetch_all_songs_attaches_tags_in_id_order() {
        let conn = test_connection();
        let group = create_tag_group(&conn, "Mood", None).unwrap();
        let calm = create_tag(&conn, "calm", Some(group.id)).unwrap();
        let loud = create_tag(&conn, "loud", None).unwrap();

        let first = create_song(&conn, &scanned("One", "/m/one.mp3")).unwrap();
        let second = create_song(&conn, &scanned("Two", "/m/two.mp3")).unwrap();
        add_tag_to_song(&conn, second.id, loud.id).unwrap();
        add_tag_to_song(&conn, second.id, calm.id).unwrap();
        add_tag_to_song(&conn, second.id, calm.id).unwrap();

        let songs = fetch_all_songs(&conn).unwrap();
        assert_eq!(songs.iter().map(|s| s.id).collect::<Vec<_>>(), vec![first.id, second.id]);
        assert!(songs[0].tags.is_empty());
        assert_eq!(songs[1].tags, vec![calm.clone(), loud]);
        assert_eq!(songs[1].tags[0].group_id, Some(group.id));
    }

    #[test]
    fn test_tagging_unknown_rows_fails() {
        let conn = test_connection();
        let song = create_song(&conn, &scanned("One", "/m/one.mp3")).unwrap();

        let err = add_tag_to_song(&conn, song.id, 404).unwrap_err();
        assert_eq!(err.downcast_ref::<LibraryError>(), Some(&LibraryError::TagNotFound));

        let err = add_tag_to_song(&conn, 404, 1).unwrap_err();
        assert_eq!(err.downcast_ref::<LibraryError>(), Some(&LibraryError::SongNotFound));
    }

    #[test]
    fn test_update_song_keeps_tags() {
        let conn = test_connection();
        let tag = create_tag(&conn, "live", None).unwrap();
        let song = create_song(&conn, &scanned("One", "/m/one.mp3")).unwrap();
        add_tag_to_song(&conn, song.id, tag.id).unwrap();

        let edited = Song {
            title: "One (Live)".to_string(),
            file_path: "/m/live/one.mp3".to_string(),
            genre: Some("Rock".to_string()),
            tempo: Some(128.0),
            ..Default::default()
        };
        update_song(&conn, song.id, &edited).unwrap();

        let loaded = fetch_song(&conn, song.id).unwrap();
        assert_eq!(loaded.title, "One (Live)");
        assert_eq!(loaded.folder(), "/m/live");
        assert_eq!(loaded.artist, None);
        assert_eq!(loaded.energy, None);
        assert_eq!(loaded.tempo, Some(128.0));
        assert_eq!(loaded.tags, vec![tag]);

        let err = update_song(&conn, 404, &edited).unwrap_err();
        assert_eq!(err.downcast_ref::<LibraryError>(), Some(&LibraryError::SongNotFound));
    }

    #[test]
    fn test_batch_tag_modes() {
        let conn = test_connection();
        let calm = create_tag(&conn, "calm", None).unwrap();
        let loud = create_tag(&conn, "loud", None).unwrap();
        let live = create_tag(&conn, "live", None).unwrap();
        let one = create_song(&conn, &scanned("One", "/m/one.mp3")).unwrap();
        let two = create_song(&conn, &scanned("Two", "/m/two.mp3")).unwrap();
        add_tag_to_song(&conn, one.id, live.id).unwrap();

        let tag_ids = |id| {
            fetch_song(&conn, id)
                .unwrap()
                .tags
                .iter()
                .map(|tag| tag.id)
                .collect::<Vec<_>>()
        };

        let songs = [one.id, two.id];
        let tagged = batch_tag_songs(&conn, &songs, &[calm.id, loud.id], TagBatchMode::Add).unwrap();
        assert_eq!(tagged, 2);
        assert_eq!(tag_ids(one.id), vec![calm.id, loud.id, live.id]);
        assert_eq!(tag_ids(two.id), vec![calm.id, loud.id]);

        batch_tag_songs(&conn, &songs, &[loud.id], TagBatchMode::Remove).unwrap();
        assert_eq!(tag_ids(one.id), vec![calm.id, live.id]);
        assert_eq!(tag_ids(two.id), vec![calm.id]);

        batch_tag_songs(&conn, &[one.id], &[loud.id], TagBatchMode::Replace).unwrap();
        assert_eq!(tag_ids(one.id), vec![loud.id]);
        assert_eq!(tag_ids(two.id), vec![calm.id]);
    }

    #[test]
    fn test_batch_tag_is_all_or_nothing() {
        let conn = test_connection();
        let calm = create_tag(&conn, "calm", None).unwrap();
        let one = create_song(&conn, &scanned("One", "/m/one.mp3")).unwrap();

        let err = batch_tag_songs(&conn, &[one.id, 404], &[calm.id], TagBatchMode::Add).unwrap_err();
        assert_eq!(err.downcast_ref::<LibraryError>(), Some(&LibraryError::SongNotFound));
        assert!(fetch_song(&conn, one.id).unwrap().tags.is_empty());

        let err =
            batch_tag_songs(&conn, &[one.id], &[calm.id, 404], TagBatchMode::Replace).unwrap_err();
        assert_eq!(err.downcast_ref::<LibraryError>(), Some(&LibraryError::TagNotFound));
    }

    #[test]
    fn test_remove_tag_and_delete_song() {
        let conn = test_connection();
        let tag = create_tag(&conn, "live", None).unwrap();
        let song = create_song(&conn, &scanned("One", "/m/one.mp3")).unwrap();
        add_tag_to_song(&conn, song.id, tag.id).unwrap();

        remove_tag_from_song(&conn, song.id, tag.id).unwrap();
        assert!(fetch_song(&conn, song.id).unwrap().tags.is_empty());
        assert!(remove_tag_from_song(&conn, song.id, tag.id).is_err());

        delete_song(&conn, song.id).unwrap();
        let err = fetch_song(&conn, song.id).unwrap_err();
        assert_eq!(err.downcast_ref::<LibraryError>(), Some(&LibraryError::SongNotFound));
        assert!(delete_song(&conn, song.id).is_err());
    }
}
