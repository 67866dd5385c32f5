//! Ratatui front-end: the playlist list, a single playlist's materialized
//! songs, and the criteria library. Forms and pickers are modal popups on
//! top of the current screen.

mod app;
mod forms;
mod helpers;
mod screens;
mod terminal;

pub use app::App;
pub use terminal::run_app;
