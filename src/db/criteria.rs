use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, warn};

use crate::criteria::RuleSet;
use crate::error::LibraryError;
use crate::models::Criteria;

use super::tags::map_unique_name;

/// Raw criteria row; rule columns are still JSON text.
struct CriteriaRow {
    id: i64,
    name: String,
    include: String,
    exclude: String,
}

impl CriteriaRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            include: row.get(2)?,
            exclude: row.get(3)?,
        })
    }

    fn compile(self) -> Result<Criteria> {
        let include = decode_rules(&self.include)
            .with_context(|| format!("criteria \"{}\" has unreadable include rules", self.name))?;
        let exclude = decode_rules(&self.exclude)
            .with_context(|| format!("criteria \"{}\" has unreadable exclude rules", self.name))?;

        for warning in include.warnings().iter().chain(exclude.warnings().iter()) {
            warn!(criteria_id = self.id, %warning, "criteria rule will never match");
        }

        Ok(Criteria {
            id: self.id,
            name: self.name,
            include,
            exclude,
        })
    }
}

fn decode_rules(text: &str) -> Result<RuleSet> {
    serde_json::from_str(text).context("invalid JSON")
}

fn encode_rules(rules: &RuleSet) -> Result<String> {
    serde_json::to_string(rules).context("failed to encode rules")
}

/// Retrieve every criteria ordered by name.
pub fn fetch_all_criteria(conn: &Connection) -> Result<Vec<Criteria>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, include_rules, exclude_rules
             FROM criteria
             ORDER BY name COLLATE NOCASE",
        )
        .context("failed to prepare criteria query")?;

    let rows = stmt
        .query_map([], CriteriaRow::from_row)
        .context("failed to load criteria")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect criteria")?;

    rows.into_iter().map(CriteriaRow::compile).collect()
}

pub fn fetch_criteria(conn: &Connection, id: i64) -> Result<Criteria> {
    conn.query_row(
        "SELECT id, name, include_rules, exclude_rules FROM criteria WHERE id = ?1",
        [id],
        CriteriaRow::from_row,
    )
    .optional()
    .context("failed to load criteria")?
    .ok_or(LibraryError::CriteriaNotFound)?
    .compile()
}

/// Criteria attached to a playlist, in their configured order.
pub(crate) fn fetch_criteria_for_playlist(
    conn: &Connection,
    playlist_id: i64,
) -> Result<Vec<Criteria>> {
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.name, c.include_rules, c.exclude_rules
             FROM criteria c
             INNER JOIN playlist_criteria pc ON pc.criteria_id = c.id
             WHERE pc.playlist_id = ?1
             ORDER BY pc.position, c.id",
        )
        .context("failed to prepare playlist criteria query")?;

    let rows = stmt
        .query_map([playlist_id], CriteriaRow::from_row)
        .context("failed to load playlist criteria")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect playlist criteria")?;

    rows.into_iter().map(CriteriaRow::compile).collect()
}

/// Insert a new criteria. Names are unique across the library.
pub fn create_criteria(
    conn: &Connection,
    name: &str,
    include: &RuleSet,
    exclude: &RuleSet,
) -> Result<Criteria> {
    conn.execute(
        "INSERT INTO criteria (name, include_rules, exclude_rules) VALUES (?1, ?2, ?3)",
        params![name, encode_rules(include)?, encode_rules(exclude)?],
    )
    .map_err(|err| map_unique_name(err, LibraryError::DuplicateCriteriaName(name.to_string())))
    .context("failed to insert criteria")?;

    let criteria = Criteria {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        include: include.clone(),
        exclude: exclude.clone(),
    };
    info!(criteria_id = criteria.id, name, "created criteria");
    Ok(criteria)
}

/// Replace name and rules of an existing criteria. Every playlist using it
/// sees the change on its next materialization.
pub fn update_criteria(
    conn: &Connection,
    id: i64,
    name: &str,
    include: &RuleSet,
    exclude: &RuleSet,
) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE criteria SET name = ?1, include_rules = ?2, exclude_rules = ?3 WHERE id = ?4",
            params![name, encode_rules(include)?, encode_rules(exclude)?, id],
        )
        .map_err(|err| map_unique_name(err, LibraryError::DuplicateCriteriaName(name.to_string())))
        .context("failed to update criteria")?;

    if updated == 0 {
        Err(LibraryError::CriteriaNotFound.into())
    } else {
        info!(criteria_id = id, name, "updated criteria");
        Ok(())
    }
}

/// Remove a criteria; playlists using it lose the attachment.
pub fn delete_criteria(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn
        .execute("DELETE FROM criteria WHERE id = ?1", params![id])
        .context("failed to delete criteria")?;

    if deleted == 0 {
        Err(LibraryError::CriteriaNotFound.into())
    } else {
        info!(criteria_id = id, "deleted criteria");
        Ok(())
    }
}

/// Names of the playlists a criteria is attached to, for delete prompts.
pub fn fetch_playlists_using_criteria(conn: &Connection, criteria_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT p.name
             FROM playlists p
             INNER JOIN playlist_criteria pc ON pc.playlist_id = p.id
             WHERE pc.criteria_id = ?1
             ORDER BY p.name COLLATE NOCASE",
        )
        .context("failed to prepare criteria usage query")?;

    let names = stmt
        .query_map([criteria_id], |row| row.get::<_, String>(0))
        .context("failed to iterate criteria usage")?
        .collect::<Result<Vec<String>, _>>()
        .context("failed to collect criteria usage")?;

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_connection;
    use crate::db::{attach_criteria, create_playlist, fetch_playlist};
    use serde_json::json;

    fn rules(value: serde_json::Value) -> RuleSet {
        RuleSet::compile(&value)
    }

    #[test]
    fn test_create_and_fetch_keeps_rules() {
        let conn = test_connection();
        let include = rules(json!({"tags": [1, 2], "energy": {"min": 0.5}}));
        let exclude = rules(json!({"genres": ["Polka"]}));
        let created = create_criteria(&conn, "Upbeat", &include, &exclude).unwrap();

        let loaded = fetch_criteria(&conn, created.id).unwrap();
        assert_eq!(loaded, created);
        assert_eq!(fetch_all_criteria(&conn).unwrap(), vec![created]);
    }

    #[test]
    fn test_invalid_rules_survive_storage() {
        let conn = test_connection();
        let include = rules(json!({"moods": ["happy"], "tags": [3]}));
        let created = create_criteria(&conn, "Odd", &include, &RuleSet::default()).unwrap();

        let loaded = fetch_criteria(&conn, created.id).unwrap();
        assert_eq!(loaded.include.warnings().len(), 1);
        assert_eq!(
            loaded.include.to_json(),
            json!({"moods": ["happy"], "tags": [3]})
        );
    }

    #[test]
    fn test_names_are_unique() {
        let conn = test_connection();
        let first = create_criteria(&conn, "Chill", &RuleSet::default(), &RuleSet::default()).unwrap();
        let second = create_criteria(&conn, "Focus", &RuleSet::default(), &RuleSet::default()).unwrap();

        let err = create_criteria(&conn, "Chill", &RuleSet::default(), &RuleSet::default())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<LibraryError>(),
            Some(&LibraryError::DuplicateCriteriaName("Chill".to_string()))
        );

        let err = update_criteria(&conn, second.id, "Chill", &RuleSet::default(), &RuleSet::default())
            .unwrap_err();
        assert!(err.downcast_ref::<LibraryError>().is_some());

        // Keeping its own name is fine.
        update_criteria(&conn, first.id, "Chill", &rules(json!({"tags": [9]})), &RuleSet::default())
            .unwrap();
        assert_eq!(
            fetch_criteria(&conn, first.id).unwrap().include,
            rules(json!({"tags": [9]}))
        );
    }

    #[test]
    fn test_missing_criteria() {
        let conn = test_connection();
        let err = fetch_criteria(&conn, 7).unwrap_err();
        assert_eq!(err.downcast_ref::<LibraryError>(), Some(&LibraryError::CriteriaNotFound));
        assert!(update_criteria(&conn, 7, "x", &RuleSet::default(), &RuleSet::default()).is_err());
        assert!(delete_criteria(&conn, 7).is_err());
    }

    #[test]
    fn test_unreadable_stored_json_is_reported() {
        let conn = test_connection();
        conn.execute(
            "INSERT INTO criteria (name, include_rules, exclude_rules) VALUES ('Broken', '{oops', '{}')",
            [],
        )
        .unwrap();

        let err = fetch_all_criteria(&conn).unwrap_err();
        assert!(err.to_string().contains("Broken"));
    }

    #[test]
    fn test_delete_detaches_from_playlists() {
        let conn = test_connection();
        let criteria = create_criteria(&conn, "Any", &RuleSet::default(), &RuleSet::default()).unwrap();
        let playlist = create_playlist(&conn, "Mix", None).unwrap();
        attach_criteria(&conn, playlist.id, criteria.id).unwrap();
        assert_eq!(
            fetch_playlists_using_criteria(&conn, criteria.id).unwrap(),
            vec!["Mix".to_string()]
        );

        delete_criteria(&conn, criteria.id).unwrap();
        assert!(fetch_playlist(&conn, playlist.id).unwrap().criteria.is_empty());
        assert!(fetch_playlists_using_criteria(&conn, criteria.id).unwrap().is_empty());
    }
}
