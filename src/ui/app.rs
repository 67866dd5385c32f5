use std::mem;

use anyhow::Result;
use crossterm::event::KeyCode;
use open::that as open_path;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::prelude::*;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use rusqlite::Connection;
use tracing::warn;

use crate::db::{
    add_manual_song, attach_criteria, create_criteria, create_playlist, delete_criteria,
    delete_playlist, detach_criteria, fetch_playlist, fetch_playlists, materialize_playlist,
    remove_manual_song, reorder_songs, update_criteria, update_playlist,
};
use crate::error::LibraryError;
use crate::models::UnifiedPlaylist;

use super::forms::{
    ConfirmCriteriaDelete, ConfirmPlaylistDelete, ConfirmSongRemove, CriteriaField, CriteriaForm,
    PlaylistField, PlaylistForm,
};
use super::helpers::{centered_rect, rule_lines, step_index, surface_error};
use super::screens::{CriteriaPickerState, CriteriaScreen, PlaylistScreen, SongPickerState};

/// Footer space reserved for status messages and instructions.
const FOOTER_HEIGHT: u16 = 3;
/// Rows skipped by PageUp/PageDown.
const PAGE: isize = 5;

/// High-level navigation states.
enum Screen {
    Playlists,
    Playlist(PlaylistScreen),
    Criteria(CriteriaScreen),
}

/// Fine-grained modes scoped to the current screen.
enum Mode {
    Normal,
    AddingPlaylist(PlaylistForm),
    EditingPlaylist { id: i64, form: PlaylistForm },
    ConfirmPlaylistDelete(ConfirmPlaylistDelete),
    PickingSongs(SongPickerState),
    ConfirmSongRemove(ConfirmSongRemove),
    PickingCriteria(CriteriaPickerState),
    AddingCriteria(CriteriaForm),
    EditingCriteria { id: i64, form: CriteriaForm },
    ConfirmCriteriaDelete(ConfirmCriteriaDelete),
}

/// Holds the footer message text plus its severity.
struct StatusMessage {
    text: String,
    kind: StatusKind,
}

enum StatusKind {
    Info,
    Warning,
    Error,
}

impl StatusKind {
    fn style(&self) -> Style {
        match self {
            StatusKind::Info => Style::default().fg(Color::Green),
            StatusKind::Warning => Style::default().fg(Color::Yellow),
            StatusKind::Error => Style::default().fg(Color::Red),
        }
    }
}

/// Central application state shared across the TUI.
pub struct App {
    conn: Connection,
    playlists: Vec<UnifiedPlaylist>,
    selected: usize,
    screen: Screen,
    mode: Mode,
    status: Option<StatusMessage>,
}

impl App {
    pub fn new(conn: Connection, playlists: Vec<UnifiedPlaylist>) -> Self {
        Self {
            conn,
            playlists,
            selected: 0,
            screen: Screen::Playlists,
            mode: Mode::Normal,
            status: None,
        }
    }

    /// Process one key press. Returns `true` when the app should exit.
    ///
    /// Store failures are shown in the status bar instead of ending the
    /// session; the pending modal is dropped.
    pub fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        let mut exit = false;
        let mode = mem::replace(&mut self.mode, Mode::Normal);

        self.mode = match self.dispatch_key(code, mode, &mut exit) {
            Ok(mode) => mode,
            Err(err) => {
                self.recover_from(&err);
                Mode::Normal
            }
        };
        Ok(exit)
    }

    fn dispatch_key(&mut self, code: KeyCode, mode: Mode, exit: &mut bool) -> Result<Mode> {
        Ok(match mode {
            Mode::Normal => self.handle_normal_key(code, exit)?,
            Mode::AddingPlaylist(form) => self.handle_playlist_form(code, None, form)?,
            Mode::EditingPlaylist { id, form } => {
                self.handle_playlist_form(code, Some(id), form)?
            }
            Mode::ConfirmPlaylistDelete(confirm) => {
                self.handle_confirm_playlist_delete(code, confirm)?
            }
            Mode::PickingSongs(state) => self.handle_pick_songs(code, state)?,
            Mode::ConfirmSongRemove(confirm) => self.handle_confirm_song_remove(code, confirm)?,
            Mode::PickingCriteria(state) => self.handle_pick_criteria(code, state)?,
            Mode::AddingCriteria(form) => self.handle_criteria_form(code, None, form)?,
            Mode::EditingCriteria { id, form } => {
                self.handle_criteria_form(code, Some(id), form)?
            }
            Mode::ConfirmCriteriaDelete(confirm) => {
                self.handle_confirm_criteria_delete(code, confirm)?
            }
        })
    }

    /// Report a failed action. A playlist that vanished from under the open
    /// view sends the user back to the list.
    fn recover_from(&mut self, err: &anyhow::Error) {
        warn!(error = %err, "action failed");
        let playlist_gone = err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<LibraryError>(),
                Some(LibraryError::PlaylistNotFound)
            )
        });

        if playlist_gone {
            if matches!(self.screen, Screen::Playlist(_)) {
                self.screen = Screen::Playlists;
            }
            if let Err(reload_err) = self.reload_playlists(None) {
                warn!(error = %reload_err, "failed to reload playlists");
            }
        }
        self.set_status(surface_error(err), StatusKind::Error);
    }

    fn handle_normal_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        match self.screen {
            Screen::Playlists => self.handle_playlists_key(code, exit),
            Screen::Playlist(_) => self.handle_playlist_key(code, exit),
            Screen::Criteria(_) => self.handle_criteria_key(code, exit),
        }
    }

    fn handle_playlists_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        let len = self.playlists.len();
        match code {
            KeyCode::Char('q') | KeyCode::Esc => *exit = true,
            KeyCode::Up => self.selected = step_index(self.selected, len, -1),
            KeyCode::Down => self.selected = step_index(self.selected, len, 1),
            KeyCode::PageUp => self.selected = step_index(self.selected, len, -PAGE),
            KeyCode::PageDown => self.selected = step_index(self.selected, len, PAGE),
            KeyCode::Home => self.selected = 0,
            KeyCode::End => self.selected = len.saturating_sub(1),
            KeyCode::Enter => {
                if let Some(id) = self.current_playlist().map(|p| p.id) {
                    self.clear_status();
                    self.open_playlist_view(id)?;
                } else {
                    self.set_status("No playlist selected.", StatusKind::Error);
                }
            }
            KeyCode::Char('+') => {
                self.clear_status();
                return Ok(Mode::AddingPlaylist(PlaylistForm::default()));
            }
            KeyCode::Char('e') | KeyCode::Char('E') => {
                if let Some(playlist) = self.current_playlist() {
                    let mode = Mode::EditingPlaylist {
                        id: playlist.id,
                        form: PlaylistForm::from_playlist(playlist),
                    };
                    self.clear_status();
                    return Ok(mode);
                }
                self.set_status("No playlist selected to edit.", StatusKind::Error);
            }
            KeyCode::Char('-') => {
                if let Some(playlist) = self.current_playlist() {
                    let confirm = ConfirmPlaylistDelete::from(playlist);
                    self.clear_status();
                    return Ok(Mode::ConfirmPlaylistDelete(confirm));
                }
                self.set_status("No playlist selected to delete.", StatusKind::Error);
            }
            KeyCode::Char('c') | KeyCode::Char('C') => {
                self.clear_status();
                self.open_criteria_view()?;
            }
            _ => {}
        }
        Ok(Mode::Normal)
    }

    fn handle_playlist_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        let Screen::Playlist(view) = &mut self.screen else {
            return Ok(Mode::Normal);
        };

        let mut status_to_set: Option<(String, StatusKind)> = None;
        let mut new_order: Option<(i64, Vec<i64>)> = None;
        let mut back = false;
        let mut reload = false;

        match code {
            KeyCode::Char('q') => *exit = true,
            KeyCode::Esc => back = true,
            KeyCode::Up => view.move_selection(-1),
            KeyCode::Down => view.move_selection(1),
            KeyCode::PageUp => view.move_selection(-PAGE),
            KeyCode::PageDown => view.move_selection(PAGE),
            KeyCode::Home => view.select_first(),
            KeyCode::End => view.select_last(),
            KeyCode::Char('K') => {
                if let Some(order) = view.shift_current(-1) {
                    new_order = Some((view.playlist_id(), order));
                }
            }
            KeyCode::Char('J') => {
                if let Some(order) = view.shift_current(1) {
                    new_order = Some((view.playlist_id(), order));
                }
            }
            KeyCode::Char('r') | KeyCode::Char('R') => reload = true,
            KeyCode::Enter => {
                if let Some(song) = view.current_song() {
                    status_to_set = Some(match open_path(&song.file_path) {
                        Ok(()) => (format!("Opened {}.", song.display_title()), StatusKind::Info),
                        Err(err) => (format!("Failed to open file: {err}"), StatusKind::Error),
                    });
                }
            }
            KeyCode::Char('+') => {
                let state = SongPickerState::load(&self.conn, &view.playlist)?;
                if state.is_empty() {
                    status_to_set = Some((
                        "Every song in the library is already hand-picked.".to_string(),
                        StatusKind::Info,
                    ));
                } else {
                    return Ok(Mode::PickingSongs(state));
                }
            }
            KeyCode::Char('-') => match view.current_song() {
                Some(song) if view.is_manual(song) => {
                    let still_matched = view
                        .playlist
                        .criteria
                        .iter()
                        .any(|criteria| crate::criteria::matches(song, criteria));
                    return Ok(Mode::ConfirmSongRemove(ConfirmSongRemove {
                        playlist_id: view.playlist_id(),
                        song: song.clone(),
                        still_matched,
                    }));
                }
                Some(song) => {
                    status_to_set = Some((
                        format!(
                            "'{}' comes from criteria. Detach or edit the criteria to drop it.",
                            song.display_title()
                        ),
                        StatusKind::Warning,
                    ));
                }
                None => {
                    status_to_set =
                        Some(("No song selected to remove.".to_string(), StatusKind::Error));
                }
            },
            KeyCode::Char('c') | KeyCode::Char('C') => {
                let state = CriteriaPickerState::load(&self.conn, &view.playlist)?;
                if state.is_empty() {
                    status_to_set = Some((
                        "No criteria yet. Create some from the criteria manager.".to_string(),
                        StatusKind::Info,
                    ));
                } else {
                    return Ok(Mode::PickingCriteria(state));
                }
            }
            KeyCode::Char('e') | KeyCode::Char('E') => {
                return Ok(Mode::EditingPlaylist {
                    id: view.playlist_id(),
                    form: PlaylistForm::from_playlist(&view.playlist),
                });
            }
            _ => {}
        }

        if back {
            self.clear_status();
            self.screen = Screen::Playlists;
            let focus = self.current_playlist().map(|p| p.id);
            self.reload_playlists(focus)?;
            return Ok(Mode::Normal);
        }

        if let Some((playlist_id, order)) = new_order {
            if let Err(err) = reorder_songs(&self.conn, playlist_id, &order) {
                warn!(playlist_id, error = %err, "failed to store song order");
                status_to_set = Some((surface_error(&err), StatusKind::Error));
            }
            reload = true;
        }

        if reload {
            self.refresh_playlist_view(None)?;
        }

        if let Some((text, kind)) = status_to_set {
            self.set_status(text, kind);
        }
        Ok(Mode::Normal)
    }

    fn handle_criteria_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        let Screen::Criteria(manager) = &mut self.screen else {
            return Ok(Mode::Normal);
        };

        match code {
            KeyCode::Char('q') => *exit = true,
            KeyCode::Esc => {
                self.clear_status();
                self.screen = Screen::Playlists;
                let focus = self.current_playlist().map(|p| p.id);
                self.reload_playlists(focus)?;
            }
            KeyCode::Up => manager.move_selection(-1),
            KeyCode::Down => manager.move_selection(1),
            KeyCode::PageUp => manager.move_selection(-PAGE),
            KeyCode::PageDown => manager.move_selection(PAGE),
            KeyCode::Home => manager.select_first(),
            KeyCode::End => manager.select_last(),
            KeyCode::Char('+') => {
                self.clear_status();
                return Ok(Mode::AddingCriteria(CriteriaForm::default()));
            }
            KeyCode::Char('e') | KeyCode::Char('E') => {
                if let Some(criteria) = manager.current() {
                    return Ok(Mode::EditingCriteria {
                        id: criteria.id,
                        form: CriteriaForm::from_criteria(criteria),
                    });
                }
                self.set_status("No criteria selected to edit.", StatusKind::Error);
            }
            KeyCode::Char('-') => {
                if let Some(criteria) = manager.current() {
                    return Ok(Mode::ConfirmCriteriaDelete(ConfirmCriteriaDelete {
                        id: criteria.id,
                        name: criteria.name.clone(),
                        used_by: manager.usage_for(criteria.id).to_vec(),
                    }));
                }
                self.set_status("No criteria selected to delete.", StatusKind::Error);
            }
            _ => {}
        }
        Ok(Mode::Normal)
    }

    fn handle_playlist_form(
        &mut self,
        code: KeyCode,
        id: Option<i64>,
        mut form: PlaylistForm,
    ) -> Result<Mode> {
        let mut keep_open = true;
        match code {
            KeyCode::Esc => {
                self.set_status("Cancelled.", StatusKind::Info);
                keep_open = false;
            }
            KeyCode::Tab | KeyCode::BackTab => form.toggle_field(),
            KeyCode::Backspace => form.backspace(),
            KeyCode::Enter => match self.save_playlist(id, &form) {
                Ok(()) => keep_open = false,
                Err(err) => {
                    let message = surface_error(&err);
                    form.error = Some(message.clone());
                    self.set_status(message, StatusKind::Error);
                }
            },
            KeyCode::Char(ch) => {
                if form.push_char(ch) {
                    form.error = None;
                }
            }
            _ => {}
        }

        Ok(match (keep_open, id) {
            (false, _) => Mode::Normal,
            (true, Some(id)) => Mode::EditingPlaylist { id, form },
            (true, None) => Mode::AddingPlaylist(form),
        })
    }

    fn handle_confirm_playlist_delete(
        &mut self,
        code: KeyCode,
        confirm: ConfirmPlaylistDelete,
    ) -> Result<Mode> {
        match code {
            KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') => {
                self.set_status("Deletion cancelled.", StatusKind::Info);
                Ok(Mode::Normal)
            }
            KeyCode::Enter | KeyCode::Char('y') | KeyCode::Char('Y') => {
                match delete_playlist(&self.conn, confirm.id) {
                    Ok(()) => {
                        self.reload_playlists(None)?;
                        self.set_status(format!("Deleted {}.", confirm.name), StatusKind::Info);
                        Ok(Mode::Normal)
                    }
                    Err(err) => {
                        self.set_status(surface_error(&err), StatusKind::Error);
                        Ok(Mode::ConfirmPlaylistDelete(confirm))
                    }
                }
            }
            _ => Ok(Mode::ConfirmPlaylistDelete(confirm)),
        }
    }

    fn handle_pick_songs(&mut self, code: KeyCode, mut state: SongPickerState) -> Result<Mode> {
        match code {
            KeyCode::Esc => return Ok(Mode::Normal),
            KeyCode::Up => state.move_selection(-1),
            KeyCode::Down => state.move_selection(1),
            KeyCode::PageUp => state.move_selection(-PAGE),
            KeyCode::PageDown => state.move_selection(PAGE),
            KeyCode::Char(' ') => state.toggle_current(),
            KeyCode::Enter => {
                let chosen = state.chosen_ids();
                if chosen.is_empty() {
                    self.set_status("No songs selected.", StatusKind::Warning);
                    return Ok(Mode::PickingSongs(state));
                }

                let mut added = 0usize;
                let mut last = None;
                for song_id in chosen {
                    if let Err(err) = add_manual_song(&self.conn, state.playlist_id, song_id) {
                        self.set_status(surface_error(&err), StatusKind::Error);
                        if added == 0 {
                            return Ok(Mode::PickingSongs(state));
                        }
                        self.refresh_playlist_view(last)?;
                        return Ok(Mode::Normal);
                    }
                    added += 1;
                    last = Some(song_id);
                }

                self.refresh_playlist_view(last)?;
                let message = if added == 1 {
                    "Song added to playlist.".to_string()
                } else {
                    format!("Added {added} songs to playlist.")
                };
                self.set_status(message, StatusKind::Info);
                return Ok(Mode::Normal);
            }
            _ => {}
        }
        Ok(Mode::PickingSongs(state))
    }

    fn handle_confirm_song_remove(
        &mut self,
        code: KeyCode,
        confirm: ConfirmSongRemove,
    ) -> Result<Mode> {
        match code {
            KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') => {
                self.set_status("Removal cancelled.", StatusKind::Info);
                Ok(Mode::Normal)
            }
            KeyCode::Enter | KeyCode::Char('y') | KeyCode::Char('Y') => {
                match remove_manual_song(&self.conn, confirm.playlist_id, confirm.song.id) {
                    Ok(_) => {
                        self.refresh_playlist_view(None)?;
                        let message = if confirm.still_matched {
                            "Song is no longer hand-picked but still matches a criteria."
                        } else {
                            "Song removed from playlist."
                        };
                        self.set_status(message, StatusKind::Info);
                        Ok(Mode::Normal)
                    }
                    Err(err) => {
                        self.set_status(surface_error(&err), StatusKind::Error);
                        Ok(Mode::ConfirmSongRemove(confirm))
                    }
                }
            }
            _ => Ok(Mode::ConfirmSongRemove(confirm)),
        }
    }

    fn handle_pick_criteria(
        &mut self,
        code: KeyCode,
        mut state: CriteriaPickerState,
    ) -> Result<Mode> {
        match code {
            KeyCode::Esc => return Ok(Mode::Normal),
            KeyCode::Up => state.move_selection(-1),
            KeyCode::Down => state.move_selection(1),
            KeyCode::PageUp => state.move_selection(-PAGE),
            KeyCode::PageDown => state.move_selection(PAGE),
            KeyCode::Char(' ') => state.toggle_current(),
            KeyCode::Enter => {
                let (attach, detach) = state.changes();
                let applied = attach
                    .iter()
                    .try_for_each(|id| attach_criteria(&self.conn, state.playlist_id, *id))
                    .and_then(|()| {
                        detach
                            .iter()
                            .try_for_each(|id| detach_criteria(&self.conn, state.playlist_id, *id))
                    });

                self.refresh_playlist_view(None)?;
                match applied {
                    Ok(()) if attach.is_empty() && detach.is_empty() => {
                        self.set_status("Criteria unchanged.", StatusKind::Info);
                    }
                    Ok(()) => {
                        self.set_status(
                            format!(
                                "Attached {} and detached {} criteria.",
                                attach.len(),
                                detach.len()
                            ),
                            StatusKind::Info,
                        );
                    }
                    Err(err) => self.set_status(surface_error(&err), StatusKind::Error),
                }
                return Ok(Mode::Normal);
            }
            _ => {}
        }
        Ok(Mode::PickingCriteria(state))
    }

    fn handle_criteria_form(
        &mut self,
        code: KeyCode,
        id: Option<i64>,
        mut form: CriteriaForm,
    ) -> Result<Mode> {
        let mut keep_open = true;
        match code {
            KeyCode::Esc => {
                self.set_status("Cancelled.", StatusKind::Info);
                keep_open = false;
            }
            KeyCode::Tab => form.toggle_field(),
            KeyCode::BackTab => form.previous_field(),
            KeyCode::Backspace => form.backspace(),
            KeyCode::Enter => match self.save_criteria(id, &form) {
                Ok(()) => keep_open = false,
                Err(err) => {
                    let message = surface_error(&err);
                    form.error = Some(message.clone());
                    self.set_status(message, StatusKind::Error);
                }
            },
            KeyCode::Char(ch) => {
                if form.push_char(ch) {
                    form.error = None;
                }
            }
            _ => {}
        }

        Ok(match (keep_open, id) {
            (false, _) => Mode::Normal,
            (true, Some(id)) => Mode::EditingCriteria { id, form },
            (true, None) => Mode::AddingCriteria(form),
        })
    }

    fn handle_confirm_criteria_delete(
        &mut self,
        code: KeyCode,
        confirm: ConfirmCriteriaDelete,
    ) -> Result<Mode> {
        match code {
            KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') => {
                self.set_status("Deletion cancelled.", StatusKind::Info);
                Ok(Mode::Normal)
            }
            KeyCode::Enter | KeyCode::Char('y') | KeyCode::Char('Y') => {
                match delete_criteria(&self.conn, confirm.id) {
                    Ok(()) => {
                        self.refresh_criteria_view(None)?;
                        self.set_status(format!("Deleted {}.", confirm.name), StatusKind::Info);
                        Ok(Mode::Normal)
                    }
                    Err(err) => {
                        self.set_status(surface_error(&err), StatusKind::Error);
                        Ok(Mode::ConfirmCriteriaDelete(confirm))
                    }
                }
            }
            _ => Ok(Mode::ConfirmCriteriaDelete(confirm)),
        }
    }

    pub(crate) fn draw(&self, frame: &mut Frame) {
        let area = frame.area();
        let footer_height = FOOTER_HEIGHT.min(area.height);

        let (content_area, footer_area) = if area.height > footer_height {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(0), Constraint::Length(footer_height)])
                .split(area);
            (chunks[0], chunks[1])
        } else {
            (area, area)
        };

        match &self.screen {
            Screen::Playlists => self.draw_playlists(frame, content_area),
            Screen::Playlist(view) => self.draw_playlist(frame, content_area, view),
            Screen::Criteria(manager) => self.draw_criteria(frame, content_area, manager),
        }

        if area.height >= footer_height {
            self.draw_footer(frame, footer_area);
        }

        match &self.mode {
            Mode::AddingPlaylist(form) => self.draw_playlist_form(frame, area, "New Playlist", form),
            Mode::EditingPlaylist { form, .. } => {
                self.draw_playlist_form(frame, area, "Edit Playlist", form)
            }
            Mode::ConfirmPlaylistDelete(confirm) => {
                let lines = vec![
                    Line::from(format!("Delete playlist '{}'?", confirm.name)),
                    Line::from("Songs and criteria stay in the library."),
                ];
                self.draw_confirm(frame, area, "Delete Playlist", lines);
            }
            Mode::PickingSongs(state) => self.draw_song_picker(frame, area, state),
            Mode::ConfirmSongRemove(confirm) => {
                let mut lines = vec![Line::from(format!(
                    "Remove '{}' from this playlist?",
                    confirm.song.display_title()
                ))];
                if confirm.still_matched {
                    lines.push(Line::from(
                        "An attached criteria still selects it, so it will stay listed.",
                    ));
                }
                self.draw_confirm(frame, area, "Remove Song", lines);
            }
            Mode::PickingCriteria(state) => self.draw_criteria_picker(frame, area, state),
            Mode::AddingCriteria(form) => self.draw_criteria_form(frame, area, "New Criteria", form),
            Mode::EditingCriteria { form, .. } => {
                self.draw_criteria_form(frame, area, "Edit Criteria", form)
            }
            Mode::ConfirmCriteriaDelete(confirm) => {
                let mut lines = vec![Line::from(format!(
                    "Delete criteria '{}'?",
                    confirm.name
                ))];
                if confirm.used_by.is_empty() {
                    lines.push(Line::from("No playlist uses it."));
                } else {
                    lines.push(Line::from(format!(
                        "It will be detached from: {}",
                        confirm.used_by.join(", ")
                    )));
                }
                self.draw_confirm(frame, area, "Delete Criteria", lines);
            }
            Mode::Normal => {}
        }
    }

    fn draw_playlists(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title("Playlists");
        if self.playlists.is_empty() {
            let message = Paragraph::new("No playlists yet. Press '+' to add one.")
                .alignment(Alignment::Center)
                .block(block);
            frame.render_widget(message, area);
            return;
        }

        let items: Vec<ListItem> = self
            .playlists
            .iter()
            .map(|playlist| {
                let mut lines = vec![Line::from(vec![
                    Span::styled(
                        playlist.name.clone(),
                        Style::default().add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(
                        format!(
                            "  {} hand-picked, {} criteria",
                            playlist.manual_song_ids.len(),
                            playlist.criteria.len()
                        ),
                        Style::default().fg(Color::Gray),
                    ),
                ])];
                if let Some(description) = &playlist.description {
                    lines.push(Line::from(Span::styled(
                        format!("  {description}"),
                        Style::default().fg(Color::DarkGray),
                    )));
                }
                ListItem::new(lines)
            })
            .collect();

        let list = List::new(items)
            .block(block)
            .highlight_style(Style::default().fg(Color::Yellow))
            .highlight_symbol("▶ ");
        let mut state = ListState::default();
        state.select(Some(self.selected));
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_playlist(&self, frame: &mut Frame, area: Rect, view: &PlaylistScreen) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(4), Constraint::Min(1)])
            .split(area);

        let criteria_names = if view.playlist.criteria.is_empty() {
            "no criteria".to_string()
        } else {
            view.playlist
                .criteria
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut title = vec![Span::styled(
            view.playlist.name.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        )];
        if let Some(description) = &view.playlist.description {
            title.push(Span::raw(format!("  {description}")));
        }
        let header = Paragraph::new(vec![
            Line::from(title),
            Line::from(vec![
                Span::raw(format!("{} songs: ", view.view.total_count)),
                Span::styled(
                    format!("{} manual", view.view.manual_count),
                    Style::default().fg(Color::Cyan),
                ),
                Span::raw(", "),
                Span::styled(
                    format!("{} dynamic", view.view.dynamic_count),
                    Style::default().fg(Color::Magenta),
                ),
                Span::styled(
                    format!("  ({criteria_names})"),
                    Style::default().fg(Color::Gray),
                ),
            ]),
        ])
        .block(Block::default().borders(Borders::ALL).title("Playlist"));
        frame.render_widget(header, chunks[0]);

        if view.view.songs.is_empty() {
            let message = Paragraph::new(
                "No songs yet. Press '+' to hand-pick songs or 'c' to attach criteria.",
            )
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
            frame.render_widget(message, chunks[1]);
            return;
        }

        let items: Vec<ListItem> = view
            .view
            .songs
            .iter()
            .enumerate()
            .map(|(index, song)| {
                let marker = if view.is_manual(song) {
                    Span::styled("[M] ", Style::default().fg(Color::Cyan))
                } else {
                    Span::styled("[D] ", Style::default().fg(Color::Magenta))
                };
                ListItem::new(Line::from(vec![
                    Span::raw(format!("{:>3}. ", index + 1)),
                    marker,
                    Span::raw(song.display_title()),
                    Span::styled(
                        format!("  {}", song.folder()),
                        Style::default().fg(Color::DarkGray),
                    ),
                ]))
            })
            .collect();

        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL))
            .highlight_style(Style::default().fg(Color::Yellow))
            .highlight_symbol("▶ ");
        let mut state = ListState::default();
        state.select(Some(view.selected));
        frame.render_stateful_widget(list, chunks[1], &mut state);
    }

    fn draw_criteria(&self, frame: &mut Frame, area: Rect, manager: &CriteriaScreen) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
            .split(area);

        let list_block = Block::default().borders(Borders::ALL).title("Criteria");
        if manager.criteria.is_empty() {
            let message = Paragraph::new("No criteria yet. Press '+' to add one.")
                .alignment(Alignment::Center)
                .block(list_block);
            frame.render_widget(message, area);
            return;
        }

        let items: Vec<ListItem> = manager
            .criteria
            .iter()
            .map(|criteria| {
                let mut spans = vec![Span::raw(criteria.name.clone())];
                let warnings = criteria.include.warnings().len() + criteria.exclude.warnings().len();
                if warnings > 0 {
                    spans.push(Span::styled(" !", Style::default().fg(Color::Red)));
                }
                ListItem::new(Line::from(spans))
            })
            .collect();
        let list = List::new(items)
            .block(list_block)
            .highlight_style(Style::default().fg(Color::Yellow))
            .highlight_symbol("▶ ");
        let mut state = ListState::default();
        state.select(Some(manager.selected));
        frame.render_stateful_widget(list, chunks[0], &mut state);

        let Some(criteria) = manager.current() else {
            return;
        };

        let mut lines = rule_lines("Include", &criteria.include);
        lines.push(Line::from(""));
        lines.extend(rule_lines("Exclude", &criteria.exclude));

        let warnings: Vec<_> = criteria
            .include
            .warnings()
            .into_iter()
            .chain(criteria.exclude.warnings())
            .collect();
        if !warnings.is_empty() {
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                "Never matches:",
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            )));
            for warning in warnings {
                lines.push(Line::from(Span::styled(
                    format!("  {warning}"),
                    Style::default().fg(Color::Red),
                )));
            }
        }

        lines.push(Line::from(""));
        let used_by = manager.usage_for(criteria.id);
        lines.push(Line::from(vec![
            Span::styled("Used by: ", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(if used_by.is_empty() {
                "no playlists".to_string()
            } else {
                used_by.join(", ")
            }),
        ]));

        let detail = Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title(criteria.name.clone()));
        frame.render_widget(detail, chunks[1]);
    }

    fn draw_footer(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::TOP);
        frame.render_widget(block.clone(), area);
        let inner = block.inner(area);

        let status_line = if let Some(status) = &self.status {
            Line::from(vec![Span::styled(status.text.clone(), status.kind.style())])
        } else {
            Line::from("")
        };

        let paragraph = Paragraph::new(vec![status_line, self.footer_instructions()])
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }

    fn footer_instructions(&self) -> Line<'static> {
        let key_style = Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD);
        let keys: &[(&str, &str)] = match (&self.screen, &self.mode) {
            (_, Mode::PickingSongs(_)) | (_, Mode::PickingCriteria(_)) => &[
                ("[↑↓]", "Navigate"),
                ("[Space]", "Toggle"),
                ("[Enter]", "Apply"),
                ("[Esc]", "Cancel"),
            ],
            (_, Mode::Normal) => match &self.screen {
                Screen::Playlists => &[
                    ("[↑↓]", "Select"),
                    ("[Enter]", "Open"),
                    ("[+]", "Add"),
                    ("[-]", "Delete"),
                    ("[e]", "Edit"),
                    ("[c]", "Criteria"),
                    ("[q]", "Quit"),
                ],
                Screen::Playlist(_) => &[
                    ("[↑↓]", "Select"),
                    ("[K/J]", "Move"),
                    ("[Enter]", "Play"),
                    ("[+]", "Add Songs"),
                    ("[-]", "Remove"),
                    ("[c]", "Criteria"),
                    ("[e]", "Edit"),
                    ("[r]", "Reload"),
                    ("[Esc]", "Back"),
                    ("[q]", "Quit"),
                ],
                Screen::Criteria(_) => &[
                    ("[↑↓]", "Select"),
                    ("[+]", "Add"),
                    ("[-]", "Delete"),
                    ("[e]", "Edit"),
                    ("[Esc]", "Back"),
                    ("[q]", "Quit"),
                ],
            },
            _ => &[],
        };

        let mut spans = Vec::with_capacity(keys.len() * 2);
        for (key, label) in keys {
            spans.push(Span::styled(*key, key_style));
            spans.push(Span::raw(format!(" {label}   ")));
        }
        Line::from(spans)
    }

    fn draw_playlist_form(&self, frame: &mut Frame, area: Rect, title: &str, form: &PlaylistForm) {
        let popup_area = centered_rect(60, 30, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default().title(title).borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let mut lines = vec![
            form.build_line("Name", PlaylistField::Name),
            form.build_line("Description", PlaylistField::Description),
            Line::from(""),
        ];
        lines.push(form_hint(form.error.as_deref()));

        frame.render_widget(Paragraph::new(lines), inner);

        let (prefix, row) = match form.active {
            PlaylistField::Name => ("Name: ", 0),
            PlaylistField::Description => ("Description: ", 1),
        };
        frame.set_cursor_position((
            inner.x + prefix.len() as u16 + form.value_len(form.active) as u16,
            inner.y + row,
        ));
    }

    fn draw_criteria_form(&self, frame: &mut Frame, area: Rect, title: &str, form: &CriteriaForm) {
        let popup_area = centered_rect(80, 40, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default().title(title).borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let lines = vec![
            form.build_line("Name", CriteriaField::Name),
            form.build_line("Include", CriteriaField::Include),
            form.build_line("Exclude", CriteriaField::Exclude),
            Line::from(""),
            Line::from(Span::styled(
                r#"Keys: tags, tag_groups, artists, albums, genres, folders, paths, or a feature with {"min", "max"}"#,
                Style::default().fg(Color::Gray),
            )),
            form_hint(form.error.as_deref()),
        ];

        frame.render_widget(Paragraph::new(lines), inner);

        let (prefix, row) = match form.active {
            CriteriaField::Name => ("Name: ", 0),
            CriteriaField::Include => ("Include: ", 1),
            CriteriaField::Exclude => ("Exclude: ", 2),
        };
        frame.set_cursor_position((
            inner.x + prefix.len() as u16 + form.value_len(form.active) as u16,
            inner.y + row,
        ));
    }

    fn draw_confirm(&self, frame: &mut Frame, area: Rect, title: &str, mut lines: Vec<Line<'static>>) {
        let popup_area = centered_rect(60, 30, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default().title(title.to_string()).borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Press Y to confirm or N / Esc to cancel.",
            Style::default().fg(Color::Gray),
        )));

        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Left)
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }

    fn draw_song_picker(&self, frame: &mut Frame, area: Rect, state: &SongPickerState) {
        let popup_area = centered_rect(70, 60, area);
        frame.render_widget(Clear, popup_area);

        let items: Vec<ListItem> = state
            .songs
            .iter()
            .map(|song| {
                let checkbox = if state.is_checked(song) { "[x]" } else { "[ ]" };
                ListItem::new(format!("{checkbox} {}", song.display_title()))
            })
            .collect();

        let list = List::new(items)
            .block(Block::default().title("Hand-pick Songs").borders(Borders::ALL))
            .highlight_style(Style::default().fg(Color::Yellow))
            .highlight_symbol("▶ ");
        let mut list_state = ListState::default();
        list_state.select(Some(state.selected));
        frame.render_stateful_widget(list, popup_area, &mut list_state);
    }

    fn draw_criteria_picker(&self, frame: &mut Frame, area: Rect, state: &CriteriaPickerState) {
        let popup_area = centered_rect(60, 50, area);
        frame.render_widget(Clear, popup_area);

        let items: Vec<ListItem> = state
            .criteria
            .iter()
            .map(|criteria| {
                let checkbox = if state.is_checked(criteria) { "[x]" } else { "[ ]" };
                ListItem::new(format!("{checkbox} {}", criteria.name))
            })
            .collect();

        let list = List::new(items)
            .block(Block::default().title("Attached Criteria").borders(Borders::ALL))
            .highlight_style(Style::default().fg(Color::Yellow))
            .highlight_symbol("▶ ");
        let mut list_state = ListState::default();
        list_state.select(Some(state.selected));
        frame.render_stateful_widget(list, popup_area, &mut list_state);
    }

    fn set_status<S: Into<String>>(&mut self, text: S, kind: StatusKind) {
        self.status = Some(StatusMessage {
            text: text.into(),
            kind,
        });
    }

    fn clear_status(&mut self) {
        self.status = None;
    }

    fn save_playlist(&mut self, id: Option<i64>, form: &PlaylistForm) -> Result<()> {
        let (name, description) = form.parse_inputs()?;
        let id = match id {
            Some(id) => {
                update_playlist(&self.conn, id, &name, description.as_deref())?;
                id
            }
            None => create_playlist(&self.conn, &name, description.as_deref())?.id,
        };
        self.reload_playlists(Some(id))?;
        self.refresh_playlist_view(None)?;
        self.set_status(format!("Saved {name}."), StatusKind::Info);
        Ok(())
    }

    fn save_criteria(&mut self, id: Option<i64>, form: &CriteriaForm) -> Result<()> {
        let (name, include, exclude) = form.parse_inputs()?;
        let id = match id {
            Some(id) => {
                update_criteria(&self.conn, id, &name, &include, &exclude)?;
                id
            }
            None => create_criteria(&self.conn, &name, &include, &exclude)?.id,
        };
        self.refresh_criteria_view(Some(id))?;

        let warnings = include.warnings().len() + exclude.warnings().len();
        if warnings == 0 {
            self.set_status(format!("Saved {name}."), StatusKind::Info);
        } else {
            self.set_status(
                format!("Saved {name}; {warnings} rule(s) will never match."),
                StatusKind::Warning,
            );
        }
        Ok(())
    }

    fn reload_playlists(&mut self, focus_id: Option<i64>) -> Result<()> {
        self.playlists = fetch_playlists(&self.conn)?;
        if let Some(index) = focus_id.and_then(|id| self.playlists.iter().position(|p| p.id == id)) {
            self.selected = index;
        } else {
            self.selected = step_index(self.selected, self.playlists.len(), 0);
        }
        Ok(())
    }

    fn open_playlist_view(&mut self, playlist_id: i64) -> Result<()> {
        let playlist = fetch_playlist(&self.conn, playlist_id)?;
        let view = materialize_playlist(&self.conn, &playlist)?;
        self.screen = Screen::Playlist(PlaylistScreen::new(playlist, view));
        Ok(())
    }

    /// Re-read the open playlist, if any, so the list reflects the store.
    fn refresh_playlist_view(&mut self, focus: Option<i64>) -> Result<()> {
        if let Screen::Playlist(ref mut view) = self.screen {
            let focus = focus.or_else(|| view.current_song().map(|song| song.id));
            let playlist = fetch_playlist(&self.conn, view.playlist_id())?;
            let songs = materialize_playlist(&self.conn, &playlist)?;
            view.set_contents(playlist, songs, focus);
        }
        Ok(())
    }

    fn open_criteria_view(&mut self) -> Result<()> {
        self.screen = Screen::Criteria(CriteriaScreen::load(&self.conn)?);
        Ok(())
    }

    fn refresh_criteria_view(&mut self, focus: Option<i64>) -> Result<()> {
        if let Screen::Criteria(ref mut manager) = self.screen {
            manager.reload(&self.conn, focus)?;
        }
        Ok(())
    }

    fn current_playlist(&self) -> Option<&UnifiedPlaylist> {
        self.playlists.get(self.selected)
    }
}

fn form_hint(error: Option<&str>) -> Line<'static> {
    match error {
        Some(error) => Line::from(Span::styled(
            error.to_string(),
            Style::default().fg(Color::Red),
        )),
        None => Line::from(Span::styled(
            "Enter to save • Tab to switch • Esc to cancel",
            Style::default().fg(Color::Gray),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::RuleSet;
    use crate::db::{apply_schema, create_song, fetch_playlist_songs};
    use crate::models::Song;
    use serde_json::json;

    fn app() -> App {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        App::new(conn, Vec::new())
    }

    fn type_text(app: &mut App, text: &str) {
        for ch in text.chars() {
            app.handle_key(KeyCode::Char(ch)).unwrap();
        }
    }

    fn add_song(app: &App, title: &str, genre: &str) -> Song {
        create_song(
            &app.conn,
            &Song {
                title: title.to_string(),
                file_path: format!("/music/{title}.flac"),
                genre: Some(genre.to_string()),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_create_playlist_through_form() {
        let mut app = app();
        app.handle_key(KeyCode::Char('+')).unwrap();
        type_text(&mut app, "Morning");
        app.handle_key(KeyCode::Enter).unwrap();

        assert!(matches!(app.mode, Mode::Normal));
        assert_eq!(app.playlists.len(), 1);
        assert_eq!(app.playlists[0].name, "Morning");
    }

    #[test]
    fn test_quit_keys() {
        let mut app = app();
        assert!(app.handle_key(KeyCode::Char('q')).unwrap());

        let mut app = self::app();
        app.handle_key(KeyCode::Char('+')).unwrap();
        assert!(!app.handle_key(KeyCode::Char('q')).unwrap());
    }

    #[test]
    fn test_pick_songs_and_reorder() {
        let mut app = app();
        let first = add_song(&app, "First", "Jazz");
        let second = add_song(&app, "Second", "Jazz");
        let playlist = create_playlist(&app.conn, "Mix", None).unwrap();
        app.reload_playlists(None).unwrap();

        app.handle_key(KeyCode::Enter).unwrap();
        app.handle_key(KeyCode::Char('+')).unwrap();
        app.handle_key(KeyCode::Char(' ')).unwrap();
        app.handle_key(KeyCode::Down).unwrap();
        app.handle_key(KeyCode::Char(' ')).unwrap();
        app.handle_key(KeyCode::Enter).unwrap();

        let view = fetch_playlist_songs(&app.conn, playlist.id).unwrap();
        assert_eq!(view.song_ids(), vec![first.id, second.id]);

        app.handle_key(KeyCode::Home).unwrap();
        app.handle_key(KeyCode::Char('J')).unwrap();
        let stored = fetch_playlist(&app.conn, playlist.id).unwrap().song_order;
        assert_eq!(stored, vec![second.id, first.id]);

        let Screen::Playlist(view) = &app.screen else {
            panic!("expected playlist screen");
        };
        assert_eq!(view.current_song().map(|s| s.id), Some(first.id));
    }

    #[test]
    fn test_reload_after_playlist_deleted_elsewhere() {
        let mut app = app();
        let keep = create_playlist(&app.conn, "Keep", None).unwrap();
        let gone = create_playlist(&app.conn, "Gone", None).unwrap();
        app.reload_playlists(Some(gone.id)).unwrap();

        app.handle_key(KeyCode::Enter).unwrap();
        assert!(matches!(app.screen, Screen::Playlist(_)));

        delete_playlist(&app.conn, gone.id).unwrap();
        assert!(!app.handle_key(KeyCode::Char('r')).unwrap());

        assert!(matches!(app.screen, Screen::Playlists));
        assert!(matches!(app.mode, Mode::Normal));
        let status = app.status.as_ref().expect("error status");
        assert!(matches!(status.kind, StatusKind::Error));
        assert_eq!(app.playlists.iter().map(|p| p.id).collect::<Vec<_>>(), vec![keep.id]);
    }

    #[test]
    fn test_picker_with_nothing_to_choose() {
        let mut app = app();
        let playlist = create_playlist(&app.conn, "Empty", None).unwrap();
        app.reload_playlists(None).unwrap();
        app.handle_key(KeyCode::Enter).unwrap();

        app.mode = Mode::PickingSongs(SongPickerState::new(playlist.id, Vec::new()));
        app.handle_key(KeyCode::Enter).unwrap();

        assert!(matches!(app.mode, Mode::PickingSongs(_)));
        let status = app.status.as_ref().expect("warning status");
        assert_eq!(status.text, "No songs selected.");
        assert!(matches!(status.kind, StatusKind::Warning));
    }

    #[test]
    fn test_dynamic_song_cannot_be_removed_by_hand() {
        let mut app = app();
        let song = add_song(&app, "Groove", "Funk");
        let playlist = create_playlist(&app.conn, "Funk", None).unwrap();
        let criteria = create_criteria(
            &app.conn,
            "Funk",
            &RuleSet::compile(&json!({"genres": ["Funk"]})),
            &RuleSet::default(),
        )
        .unwrap();
        attach_criteria(&app.conn, playlist.id, criteria.id).unwrap();
        app.reload_playlists(None).unwrap();

        app.handle_key(KeyCode::Enter).unwrap();
        app.handle_key(KeyCode::Char('-')).unwrap();

        assert!(matches!(app.mode, Mode::Normal));
        assert!(matches!(
            app.status,
            Some(StatusMessage {
                kind: StatusKind::Warning,
                ..
            })
        ));
        let view = fetch_playlist_songs(&app.conn, playlist.id).unwrap();
        assert_eq!(view.song_ids(), vec![song.id]);
    }

    #[test]
    fn test_criteria_picker_attaches() {
        let mut app = app();
        add_song(&app, "Blue", "Jazz");
        let playlist = create_playlist(&app.conn, "Jazz", None).unwrap();
        create_criteria(
            &app.conn,
            "Jazz",
            &RuleSet::compile(&json!({"genres": ["Jazz"]})),
            &RuleSet::default(),
        )
        .unwrap();
        app.reload_playlists(None).unwrap();

        app.handle_key(KeyCode::Enter).unwrap();
        app.handle_key(KeyCode::Char('c')).unwrap();
        app.handle_key(KeyCode::Char(' ')).unwrap();
        app.handle_key(KeyCode::Enter).unwrap();

        let loaded = fetch_playlist(&app.conn, playlist.id).unwrap();
        assert_eq!(loaded.criteria.len(), 1);
        let Screen::Playlist(view) = &app.screen else {
            panic!("expected playlist screen");
        };
        assert_eq!(view.view.dynamic_count, 1);
    }

    #[test]
    fn test_invalid_criteria_json_keeps_form_open() {
        let mut app = app();
        app.handle_key(KeyCode::Char('c')).unwrap();
        app.handle_key(KeyCode::Char('+')).unwrap();
        type_text(&mut app, "Broken");
        app.handle_key(KeyCode::Tab).unwrap();
        type_text(&mut app, "{nope");
        app.handle_key(KeyCode::Enter).unwrap();

        let Mode::AddingCriteria(form) = &app.mode else {
            panic!("form should stay open");
        };
        assert!(form.error.is_some());
    }
}
