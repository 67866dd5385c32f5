//! Binary entry point: resolve paths, start file logging, open the library
//! and drive the Ratatui event loop until the user exits.
use tracing::info;
use unified_playlists::{fetch_playlists, init_logging, open_database, run_app, App, AppPaths};

fn main() -> anyhow::Result<()> {
    let paths = AppPaths::resolve()?;
    init_logging(&paths)?;
    info!(db = %paths.db_path.display(), "starting unified-playlists");

    let conn = open_database(&paths.db_path)?;
    let playlists = fetch_playlists(&conn)?;

    let mut app = App::new(conn, playlists);
    run_app(&mut app)
}
