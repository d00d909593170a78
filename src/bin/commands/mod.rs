pub mod db;
pub mod migrate;

use anyhow::{anyhow, Result};
use quarry::{Connection, QuarryConfig};

/// Open the configured database, failing early when none is configured
pub(crate) fn connect(config: &QuarryConfig) -> Result<Connection> {
    let db = config.database();
    if !db.is_configured() {
        return Err(anyhow!(
            "no database configured; set `database.database` in the config file or QUARRY_DATABASE__DATABASE"
        ));
    }
    let conn = Connection::new(db);
    conn.open()?;
    Ok(conn)
}
