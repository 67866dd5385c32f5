use anyhow::{Context, Result};
use rusqlite::{params, Connection, Error as SqlError, ErrorCode};
use tracing::info;

use crate::error::LibraryError;
use crate::models::{Tag, TagGroup};

use super::songs::ensure_exists;

/// Retrieve every tag group ordered by name.
pub fn fetch_tag_groups(conn: &Connection) -> Result<Vec<TagGroup>> {
    let mut stmt = conn
        .prepare("SELECT id, name, description FROM tag_groups ORDER BY name COLLATE NOCASE")
        .context("failed to prepare tag group query")?;

    let groups = stmt
        .query_map([], |row| {
            Ok(TagGroup {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
            })
        })
        .context("failed to load tag groups")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect tag groups")?;

    Ok(groups)
}

pub fn create_tag_group(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
) -> Result<TagGroup> {
    conn.execute(
        "INSERT INTO tag_groups (name, description) VALUES (?1, ?2)",
        params![name, description],
    )
    .map_err(|err| map_unique_name(err, LibraryError::DuplicateTagGroupName(name.to_string())))
    .context("failed to insert tag group")?;

    let group = TagGroup {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        description: description.map(str::to_owned),
    };
    info!(group_id = group.id, name, "created tag group");
    Ok(group)
}

pub fn update_tag_group(
    conn: &Connection,
    id: i64,
    name: &str,
    description: Option<&str>,
) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE tag_groups SET name = ?1, description = ?2 WHERE id = ?3",
            params![name, description, id],
        )
        .map_err(|err| map_unique_name(err, LibraryError::DuplicateTagGroupName(name.to_string())))
        .context("failed to update tag group")?;

    if updated == 0 {
        Err(LibraryError::TagGroupNotFound.into())
    } else {
        Ok(())
    }
}

/// Remove a group together with all of its tags.
pub fn delete_tag_group(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn
        .execute("DELETE FROM tag_groups WHERE id = ?1", params![id])
        .context("failed to delete tag group")?;

    if deleted == 0 {
        Err(LibraryError::TagGroupNotFound.into())
    } else {
        Ok(())
    }
}

/// Retrieve every tag ordered by name.
pub fn fetch_tags(conn: &Connection) -> Result<Vec<Tag>> {
    let mut stmt = conn
        .prepare("SELECT id, name, group_id FROM tags ORDER BY name COLLATE NOCASE")
        .context("failed to prepare tag query")?;

    let tags = stmt
        .query_map([], |row| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
                group_id: row.get(2)?,
            })
        })
        .context("failed to load tags")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect tags")?;

    Ok(tags)
}

pub fn create_tag(conn: &Connection, name: &str, group_id: Option<i64>) -> Result<Tag> {
    if let Some(group_id) = group_id {
        ensure_exists(conn, "tag_groups", group_id, LibraryError::TagGroupNotFound)?;
    }

    conn.execute(
        "INSERT INTO tags (name, group_id) VALUES (?1, ?2)",
        params![name, group_id],
    )
    .map_err(|err| map_unique_name(err, LibraryError::DuplicateTagName(name.to_string())))
    .context("failed to insert tag")?;

    let tag = Tag {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        group_id,
    };
    info!(tag_id = tag.id, name, "created tag");
    Ok(tag)
}

/// Rename a tag. Songs keep it under the new name.
pub fn update_tag(conn: &Connection, id: i64, name: &str) -> Result<()> {
    let updated = conn
        .execute("UPDATE tags SET name = ?1 WHERE id = ?2", params![name, id])
        .map_err(|err| map_unique_name(err, LibraryError::DuplicateTagName(name.to_string())))
        .context("failed to rename tag")?;

    if updated == 0 {
        Err(LibraryError::TagNotFound.into())
    } else {
        Ok(())
    }
}

/// Move a tag into a group, or out of any group with `None`.
pub fn set_tag_group(conn: &Connection, tag_id: i64, group_id: Option<i64>) -> Result<()> {
    if let Some(group_id) = group_id {
        ensure_exists(conn, "tag_groups", group_id, LibraryError::TagGroupNotFound)?;
    }

    let updated = conn
        .execute(
            "UPDATE tags SET group_id = ?1 WHERE id = ?2",
            params![group_id, tag_id],
        )
        .context("failed to update tag group")?;

    if updated == 0 {
        Err(LibraryError::TagNotFound.into())
    } else {
        Ok(())
    }
}

/// Remove a tag; song assignments cascade.
pub fn delete_tag(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn
        .execute("DELETE FROM tags WHERE id = ?1", params![id])
        .context("failed to delete tag")?;

    if deleted == 0 {
        Err(LibraryError::TagNotFound.into())
    } else {
        Ok(())
    }
}

/// Coerce SQLite constraint errors into the matching duplicate-name error.
pub(crate) fn map_unique_name(err: SqlError, duplicate: LibraryError) -> anyhow::Error {
    if matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::ConstraintViolation)
    ) {
        duplicate.into()
    } else {
        err.into()
    }
}
