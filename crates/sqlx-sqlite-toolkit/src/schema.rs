//! Schema migrations for the coordinator database.
//!
//! Only the primary worker runs these, before any replica opens the file.

use sqlx::SqliteConnection;
use sqlx::migrate::Migrator;
use tracing::debug;

use crate::Result;

/// Embedded migrations from `migrations/`.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Bring the schema on `conn` up to date.
pub async fn update_schema(conn: &mut SqliteConnection) -> Result<()> {
   MIGRATOR.run_direct(&mut *conn).await?;
   debug!(
      migrations = MIGRATOR.iter().count(),
      "Database schema is up to date"
   );
   Ok(())
}
