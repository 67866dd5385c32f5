use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use rusqlite::Connection;

use crate::db::{fetch_all_criteria, fetch_all_songs, fetch_playlists_using_criteria};
use crate::models::{Criteria, Song, UnifiedPlaylist};
use crate::playlist::MaterializedPlaylist;

use super::helpers::step_index;

/// A single playlist with its materialized songs.
pub(crate) struct PlaylistScreen {
    pub(crate) playlist: UnifiedPlaylist,
    pub(crate) view: MaterializedPlaylist,
    pub(crate) selected: usize,
}

impl PlaylistScreen {
    pub(crate) fn new(playlist: UnifiedPlaylist, view: MaterializedPlaylist) -> Self {
        Self {
            playlist,
            view,
            selected: 0,
        }
    }

    pub(crate) fn playlist_id(&self) -> i64 {
        self.playlist.id
    }

    pub(crate) fn current_song(&self) -> Option<&Song> {
        self.view.songs.get(self.selected)
    }

    pub(crate) fn is_manual(&self, song: &Song) -> bool {
        self.playlist.has_manual_song(song.id)
    }

    pub(crate) fn move_selection(&mut self, offset: isize) {
        self.selected = step_index(self.selected, self.view.songs.len(), offset);
    }

    pub(crate) fn select_first(&mut self) {
        self.selected = 0;
    }

    pub(crate) fn select_last(&mut self) {
        self.selected = self.view.songs.len().saturating_sub(1);
    }

    /// Swap in freshly loaded data, keeping the cursor on `focus` when it is
    /// still listed.
    pub(crate) fn set_contents(
        &mut self,
        playlist: UnifiedPlaylist,
        view: MaterializedPlaylist,
        focus: Option<i64>,
    ) {
        self.playlist = playlist;
        self.view = view;
        if let Some(index) = focus.and_then(|id| self.view.songs.iter().position(|s| s.id == id)) {
            self.selected = index;
        } else {
            self.selected = step_index(self.selected, self.view.songs.len(), 0);
        }
    }

    /// Swap the selected song with its neighbour `offset` steps away and
    /// return the resulting order. `None` when the move would leave the list.
    pub(crate) fn shift_current(&mut self, offset: isize) -> Option<Vec<i64>> {
        let len = self.view.songs.len() as isize;
        let target = self.selected as isize + offset;
        if self.view.songs.is_empty() || target < 0 || target >= len {
            return None;
        }
        let target = target as usize;
        self.view.songs.swap(self.selected, target);
        self.selected = target;
        Some(self.view.song_ids())
    }
}

/// Criteria library with the playlists each one feeds.
pub(crate) struct CriteriaScreen {
    pub(crate) criteria: Vec<Criteria>,
    pub(crate) usage: HashMap<i64, Vec<String>>,
    pub(crate) selected: usize,
}

impl CriteriaScreen {
    pub(crate) fn load(conn: &Connection) -> Result<Self> {
        let mut screen = Self {
            criteria: Vec::new(),
            usage: HashMap::new(),
            selected: 0,
        };
        screen.reload(conn, None)?;
        Ok(screen)
    }

    pub(crate) fn reload(&mut self, conn: &Connection, focus: Option<i64>) -> Result<()> {
        self.criteria = fetch_all_criteria(conn)?;
        self.usage = HashMap::with_capacity(self.criteria.len());
        for criteria in &self.criteria {
            let names = fetch_playlists_using_criteria(conn, criteria.id)?;
            self.usage.insert(criteria.id, names);
        }

        if let Some(index) = focus.and_then(|id| self.criteria.iter().position(|c| c.id == id)) {
            self.selected = index;
        } else {
            self.selected = step_index(self.selected, self.criteria.len(), 0);
        }
        Ok(())
    }

    pub(crate) fn current(&self) -> Option<&Criteria> {
        self.criteria.get(self.selected)
    }

    pub(crate) fn usage_for(&self, criteria_id: i64) -> &[String] {
        self.usage
            .get(&criteria_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub(crate) fn move_selection(&mut self, offset: isize) {
        self.selected = step_index(self.selected, self.criteria.len(), offset);
    }

    pub(crate) fn select_first(&mut self) {
        self.selected = 0;
    }

    pub(crate) fn select_last(&mut self) {
        self.selected = self.criteria.len().saturating_sub(1);
    }
}

/// Checkbox list of library songs that are not yet hand-picked.
pub(crate) struct SongPickerState {
    pub(crate) playlist_id: i64,
    pub(crate) songs: Vec<Song>,
    pub(crate) selected: usize,
    pub(crate) checked: BTreeSet<i64>,
}

impl SongPickerState {
    pub(crate) fn load(conn: &Connection, playlist: &UnifiedPlaylist) -> Result<Self> {
        let songs = fetch_all_songs(conn)?
            .into_iter()
            .filter(|song| !playlist.has_manual_song(song.id))
            .collect();
        Ok(Self::new(playlist.id, songs))
    }

    pub(crate) fn new(playlist_id: i64, songs: Vec<Song>) -> Self {
        Self {
            playlist_id,
            songs,
            selected: 0,
            checked: BTreeSet::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub(crate) fn move_selection(&mut self, offset: isize) {
        self.selected = step_index(self.selected, self.songs.len(), offset);
    }

    pub(crate) fn is_checked(&self, song: &Song) -> bool {
        self.checked.contains(&song.id)
    }

    pub(crate) fn toggle_current(&mut self) {
        if let Some(song) = self.songs.get(self.selected) {
            if !self.checked.remove(&song.id) {
                self.checked.insert(song.id);
            }
        }
    }

    /// Songs to add in list order; the highlighted song when nothing is
    /// checked.
    pub(crate) fn chosen_ids(&self) -> Vec<i64> {
        if self.checked.is_empty() {
            return self.songs.get(self.selected).map(|s| s.id).into_iter().collect();
        }
        self.songs
            .iter()
            .filter(|song| self.checked.contains(&song.id))
            .map(|song| song.id)
            .collect()
    }
}

/// Checkbox list of every criteria, pre-checked with those attached.
pub(crate) struct CriteriaPickerState {
    pub(crate) playlist_id: i64,
    pub(crate) criteria: Vec<Criteria>,
    pub(crate) attached: BTreeSet<i64>,
    pub(crate) checked: BTreeSet<i64>,
    pub(crate) selected: usize,
}

impl CriteriaPickerState {
    pub(crate) fn load(conn: &Connection, playlist: &UnifiedPlaylist) -> Result<Self> {
        Ok(Self::new(playlist, fetch_all_criteria(conn)?))
    }

    pub(crate) fn new(playlist: &UnifiedPlaylist, criteria: Vec<Criteria>) -> Self {
        let attached: BTreeSet<i64> = playlist.criteria.iter().map(|c| c.id).collect();
        Self {
            playlist_id: playlist.id,
            criteria,
            checked: attached.clone(),
            attached,
            selected: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub(crate) fn move_selection(&mut self, offset: isize) {
        self.selected = step_index(self.selected, self.criteria.len(), offset);
    }

    pub(crate) fn is_checked(&self, criteria: &Criteria) -> bool {
        self.checked.contains(&criteria.id)
    }

    pub(crate) fn toggle_current(&mut self) {
        if let Some(criteria) = self.criteria.get(self.selected) {
            if !self.checked.remove(&criteria.id) {
                self.checked.insert(criteria.id);
            }
        }
    }

    /// Criteria to attach and to detach, each in list order.
    pub(crate) fn changes(&self) -> (Vec<i64>, Vec<i64>) {
        let mut attach = Vec::new();
        let mut detach = Vec::new();
        for criteria in &self.criteria {
            match (
                self.attached.contains(&criteria.id),
                self.checked.contains(&criteria.id),
            ) {
                (false, true) => attach.push(criteria.id),
                (true, false) => detach.push(criteria.id),
                _ => {}
            }
        }
        (attach, detach)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(id: i64) -> Song {
        Song {
            id,
            title: format!("Song {id}"),
            file_path: format!("/m/{id}.mp3"),
            ..Default::default()
        }
    }

    fn criteria(id: i64) -> Criteria {
        Criteria {
            id,
            name: format!("Criteria {id}"),
            ..Default::default()
        }
    }

    fn screen(ids: &[i64]) -> PlaylistScreen {
        let view = MaterializedPlaylist {
            songs: ids.iter().copied().map(song).collect(),
            manual_count: ids.len(),
            dynamic_count: 0,
            total_count: ids.len(),
        };
        PlaylistScreen::new(UnifiedPlaylist::default(), view)
    }

    #[test]
    fn test_shift_current_swaps_and_follows() {
        let mut screen = screen(&[1, 2, 3]);
        assert_eq!(screen.shift_current(-1), None);

        assert_eq!(screen.shift_current(1), Some(vec![2, 1, 3]));
        assert_eq!(screen.selected, 1);
        assert_eq!(screen.shift_current(1), Some(vec![2, 3, 1]));
        assert_eq!(screen.shift_current(1), None);
        assert_eq!(screen.current_song().map(|s| s.id), Some(1));
    }

    #[test]
    fn test_set_contents_keeps_focus() {
        let mut screen = screen(&[1, 2, 3]);
        screen.select_last();

        let replacement = MaterializedPlaylist {
            songs: vec![song(3), song(1)],
            ..Default::default()
        };
        screen.set_contents(UnifiedPlaylist::default(), replacement.clone(), Some(1));
        assert_eq!(screen.selected, 1);

        screen.set_contents(UnifiedPlaylist::default(), replacement, Some(42));
        assert_eq!(screen.selected, 1);

        screen.set_contents(UnifiedPlaylist::default(), MaterializedPlaylist::default(), None);
        assert_eq!(screen.selected, 0);
        assert!(screen.current_song().is_none());
    }

    #[test]
    fn test_song_picker_falls_back_to_highlighted() {
        let mut picker = SongPickerState::new(1, vec![song(5), song(6), song(7)]);
        picker.move_selection(1);
        assert_eq!(picker.chosen_ids(), vec![6]);

        picker.move_selection(1);
        picker.toggle_current();
        picker.move_selection(-2);
        picker.toggle_current();
        assert_eq!(picker.chosen_ids(), vec![5, 7]);

        picker.toggle_current();
        assert_eq!(picker.chosen_ids(), vec![7]);
    }

    #[test]
    fn test_criteria_picker_diffs_attachments() {
        let playlist = UnifiedPlaylist {
            id: 9,
            criteria: vec![criteria(2)],
            ..Default::default()
        };
        let mut picker = CriteriaPickerState::new(&playlist, vec![criteria(1), criteria(2), criteria(3)]);
        assert_eq!(picker.changes(), (vec![], vec![]));

        picker.toggle_current();
        picker.move_selection(1);
        picker.toggle_current();
        assert_eq!(picker.changes(), (vec![1], vec![2]));
        assert!(!picker.is_checked(&criteria(2)));
    }
}
