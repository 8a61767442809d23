//! Options a worker receives with its `init` request

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Directory under the config dir that holds the database and its side files.
const SQL_DIR: &str = "sql";

/// File name of the database inside [`SQL_DIR`].
const DATABASE_FILE: &str = "db.sqlite";

/// Options sent to every worker inside its `init` request.
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_worker::InitOptions;
///
/// let options = InitOptions::new("/tmp/app", "1.0.0");
/// assert!(options.database_path().ends_with("sql/db.sqlite"));
///
/// let options = InitOptions {
///    key: Some("secret".into()),
///    ..InitOptions::new("/tmp/app", "1.0.0")
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOptions {
   /// Application config directory; the database lives under `<config_dir>/sql/`
   pub config_dir: PathBuf,

   /// Encryption key applied with `PRAGMA key` before anything else runs
   ///
   /// Only has an effect when SQLite is built with SQLCipher.
   ///
   /// Default: None
   pub key: Option<String>,

   /// Version of the application opening the database, reported in logs
   pub app_version: String,
}

impl InitOptions {
   pub fn new(config_dir: impl Into<PathBuf>, app_version: impl Into<String>) -> Self {
      Self {
         config_dir: config_dir.into(),
         key: None,
         app_version: app_version.into(),
      }
   }

   /// Absolute path of the database file.
   pub fn database_path(&self) -> PathBuf {
      self.config_dir.join(SQL_DIR).join(DATABASE_FILE)
   }
}
