use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub mod loader;
pub mod schema;
pub mod writer;

/// Opens a store connection with the pragmas every component relies on.
///
/// WAL keeps the parallel writer workers from starving the readers, and the
/// busy timeout covers the short commit races between writer chunks.
pub fn open_store(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_secs(30))?;
    Ok(conn)
}
