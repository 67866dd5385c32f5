use anyhow::{anyhow, Result};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use serde_json::Value;

use crate::criteria::RuleSet;
use crate::models::{Criteria, Song, UnifiedPlaylist};

/// Internal representation of the playlist form fields.
#[derive(Default, Clone)]
pub(crate) struct PlaylistForm {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) active: PlaylistField,
    pub(crate) error: Option<String>,
}

#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub(crate) enum PlaylistField {
    #[default]
    Name,
    Description,
}

impl PlaylistForm {
    /// Populate the form from an existing playlist when editing.
    pub(crate) fn from_playlist(playlist: &UnifiedPlaylist) -> Self {
        Self {
            name: playlist.name.clone(),
            description: playlist.description.clone().unwrap_or_default(),
            active: PlaylistField::Name,
            error: None,
        }
    }

    pub(crate) fn toggle_field(&mut self) {
        self.active = match self.active {
            PlaylistField::Name => PlaylistField::Description,
            PlaylistField::Description => PlaylistField::Name,
        };
    }

    pub(crate) fn push_char(&mut self, ch: char) -> bool {
        if ch.is_control() {
            return false;
        }
        match self.active {
            PlaylistField::Name => self.name.push(ch),
            PlaylistField::Description => self.description.push(ch),
        }
        true
    }

    pub(crate) fn backspace(&mut self) {
        match self.active {
            PlaylistField::Name => {
                self.name.pop();
            }
            PlaylistField::Description => {
                self.description.pop();
            }
        }
    }

    /// Validate the inputs. A blank description is stored as `None`.
    pub(crate) fn parse_inputs(&self) -> Result<(String, Option<String>)> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(anyhow!("Playlist name is required."));
        }
        let description = self.description.trim();
        let description = (!description.is_empty()).then(|| description.to_string());
        Ok((name.to_string(), description))
    }

    pub(crate) fn build_line(&self, field_name: &str, field: PlaylistField) -> Line<'static> {
        let (value, placeholder) = match field {
            PlaylistField::Name => (&self.name, "<required>"),
            PlaylistField::Description => (&self.description, "<optional>"),
        };
        field_line(field_name, value, placeholder, self.active == field)
    }

    pub(crate) fn value_len(&self, field: PlaylistField) -> usize {
        match field {
            PlaylistField::Name => self.name.chars().count(),
            PlaylistField::Description => self.description.chars().count(),
        }
    }
}

/// Criteria editor. Rule sets are typed as single-line JSON objects.
#[derive(Default, Clone)]
pub(crate) struct CriteriaForm {
    pub(crate) name: String,
    pub(crate) include: String,
    pub(crate) exclude: String,
    pub(crate) active: CriteriaField,
    pub(crate) error: Option<String>,
}

#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub(crate) enum CriteriaField {
    #[default]
    Name,
    Include,
    Exclude,
}

impl CriteriaForm {
    pub(crate) fn from_criteria(criteria: &Criteria) -> Self {
        Self {
            name: criteria.name.clone(),
            include: compact_rules(&criteria.include),
            exclude: compact_rules(&criteria.exclude),
            active: CriteriaField::Name,
            error: None,
        }
    }

    pub(crate) fn toggle_field(&mut self) {
        self.active = match self.active {
            CriteriaField::Name => CriteriaField::Include,
            CriteriaField::Include => CriteriaField::Exclude,
            CriteriaField::Exclude => CriteriaField::Name,
        };
    }

    pub(crate) fn previous_field(&mut self) {
        self.active = match self.active {
            CriteriaField::Name => CriteriaField::Exclude,
            CriteriaField::Include => CriteriaField::Name,
            CriteriaField::Exclude => CriteriaField::Include,
        };
    }

    pub(crate) fn push_char(&mut self, ch: char) -> bool {
        if ch.is_control() {
            return false;
        }
        match self.active {
            CriteriaField::Name => self.name.push(ch),
            CriteriaField::Include => self.include.push(ch),
            CriteriaField::Exclude => self.exclude.push(ch),
        }
        true
    }

    pub(crate) fn backspace(&mut self) {
        match self.active {
            CriteriaField::Name => {
                self.name.pop();
            }
            CriteriaField::Include => {
                self.include.pop();
            }
            CriteriaField::Exclude => {
                self.exclude.pop();
            }
        }
    }

    /// Validate the name and parse both rule fields. Blank rule text means an
    /// empty object. Unknown keys are accepted here and reported as warnings
    /// once saved.
    pub(crate) fn parse_inputs(&self) -> Result<(String, RuleSet, RuleSet)> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(anyhow!("Criteria name is required."));
        }
        let include = parse_rules("Include", &self.include)?;
        let exclude = parse_rules("Exclude", &self.exclude)?;
        Ok((name.to_string(), include, exclude))
    }

    pub(crate) fn build_line(&self, field_name: &str, field: CriteriaField) -> Line<'static> {
        let (value, placeholder) = match field {
            CriteriaField::Name => (&self.name, "<required>"),
            CriteriaField::Include => (&self.include, "{} matches every song"),
            CriteriaField::Exclude => (&self.exclude, "{} excludes nothing"),
        };
        field_line(field_name, value, placeholder, self.active == field)
    }

    pub(crate) fn value_len(&self, field: CriteriaField) -> usize {
        match field {
            CriteriaField::Name => self.name.chars().count(),
            CriteriaField::Include => self.include.chars().count(),
            CriteriaField::Exclude => self.exclude.chars().count(),
        }
    }
}

fn compact_rules(rules: &RuleSet) -> String {
    if rules.is_empty() {
        String::new()
    } else {
        rules.to_json().to_string()
    }
}

fn parse_rules(label: &str, text: &str) -> Result<RuleSet> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(RuleSet::default());
    }
    let value: Value = serde_json::from_str(text)
        .map_err(|err| anyhow!("{label} rules are not valid JSON: {err}"))?;
    if !value.is_object() {
        return Err(anyhow!("{label} rules must be a JSON object."));
    }
    Ok(RuleSet::compile(&value))
}

fn field_line(field_name: &str, value: &str, placeholder: &str, is_active: bool) -> Line<'static> {
    let display = if value.is_empty() {
        placeholder.to_string()
    } else {
        value.to_string()
    };

    let style = if is_active {
        Style::default().fg(Color::Yellow)
    } else if value.is_empty() {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default()
    };

    Line::from(vec![
        Span::raw(format!("{field_name}: ")),
        Span::styled(display, style),
    ])
}

#[derive(Clone)]
pub(crate) struct ConfirmPlaylistDelete {
    pub(crate) id: i64,
    pub(crate) name: String,
}

impl ConfirmPlaylistDelete {
    pub(crate) fn from(playlist: &UnifiedPlaylist) -> Self {
        Self {
            id: playlist.id,
            name: playlist.name.clone(),
        }
    }
}

/// State for confirming the removal of a hand-picked song.
pub(crate) struct ConfirmSongRemove {
    pub(crate) playlist_id: i64,
    pub(crate) song: Song,
    /// Whether criteria also select the song, in which case it stays listed.
    pub(crate) still_matched: bool,
}

/// State for confirming criteria deletion, listing the playlists that lose it.
pub(crate) struct ConfirmCriteriaDelete {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) used_by: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_playlist_form_requires_name() {
        let mut form = PlaylistForm::default();
        assert!(form.parse_inputs().is_err());

        for ch in "  Evening ".chars() {
            form.push_char(ch);
        }
        form.toggle_field();
        form.push_char(' ');
        assert_eq!(
            form.parse_inputs().unwrap(),
            ("Evening".to_string(), None)
        );
    }

    #[test]
    fn test_playlist_form_round_trips_existing_playlist() {
        let playlist = UnifiedPlaylist {
            id: 4,
            name: "Focus".to_string(),
            description: Some("Deep work".to_string()),
            ..Default::default()
        };
        let mut form = PlaylistForm::from_playlist(&playlist);
        form.toggle_field();
        form.backspace();
        assert_eq!(
            form.parse_inputs().unwrap(),
            ("Focus".to_string(), Some("Deep wor".to_string()))
        );
    }

    #[test]
    fn test_criteria_form_parses_rules() {
        let form = CriteriaForm {
            name: "Upbeat".to_string(),
            include: r#"{"energy": {"min": 0.7}, "moods": ["x"]}"#.to_string(),
            exclude: String::new(),
            ..Default::default()
        };
        let (name, include, exclude) = form.parse_inputs().unwrap();
        assert_eq!(name, "Upbeat");
        assert!(exclude.is_empty());
        assert_eq!(include.filters().len(), 2);
        assert_eq!(include.warnings().len(), 1);
    }

    #[test]
    fn test_criteria_form_rejects_bad_json() {
        let mut form = CriteriaForm {
            name: "Broken".to_string(),
            include: "{tags: [1]".to_string(),
            ..Default::default()
        };
        let err = form.parse_inputs().unwrap_err();
        assert!(err.to_string().starts_with("Include rules are not valid JSON"));

        form.include = "[1, 2]".to_string();
        let err = form.parse_inputs().unwrap_err();
        assert_eq!(err.to_string(), "Include rules must be a JSON object.");
    }

    #[test]
    fn test_criteria_form_prefills_compact_json() {
        let criteria = Criteria {
            id: 1,
            name: "Rock".to_string(),
            include: RuleSet::compile(&json!({"genres": ["Rock"]})),
            exclude: RuleSet::default(),
        };
        let form = CriteriaForm::from_criteria(&criteria);
        assert_eq!(form.include, r#"{"genres":["Rock"]}"#);
        assert_eq!(form.exclude, "");

        let (_, include, exclude) = form.parse_inputs().unwrap();
        assert_eq!(include, criteria.include);
        assert_eq!(exclude, criteria.exclude);
    }

    #[test]
    fn test_criteria_form_field_cycle() {
        let mut form = CriteriaForm::default();
        form.toggle_field();
        assert!(form.active == CriteriaField::Include);
        form.previous_field();
        form.previous_field();
        assert!(form.active == CriteriaField::Exclude);
    }
}
