//! Persisted UI preferences.
//!
//! The whole record lives under a single key of a small SQLite key-value
//! table, so it survives restarts and can grow new fields without migrations.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Storage key the preference record is namespaced under.
pub const PREFERENCES_KEY: &str = "workbench.preferences";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Database error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("Serialization error: {0}")]
  Serde(#[from] serde_json::Error),
  #[error("Could not determine data directory")]
  NoDataDir,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableDensity {
  Compact,
  #[default]
  Comfortable,
  Spacious,
}

impl std::str::FromStr for TableDensity {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "compact" => Ok(TableDensity::Compact),
      "comfortable" => Ok(TableDensity::Comfortable),
      "spacious" => Ok(TableDensity::Spacious),
      other => Err(format!("unknown table density '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
  pub table_density: TableDensity,
  pub sidebar_collapsed: bool,
}

/// SQLite-backed preference storage.
pub struct PreferenceStore {
  conn: Mutex<Connection>,
}

impl PreferenceStore {
  /// Open the store at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self, PrefsError> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    Self::from_connection(Connection::open(&path)?)
  }

  pub fn open_in_memory() -> Result<Self, PrefsError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self, PrefsError> {
    conn.execute_batch(SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, PrefsError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(PrefsError::NoDataDir)?;

    Ok(data_dir.join("workbench").join("prefs.db"))
  }

  /// Load preferences. A missing record reads as the defaults.
  pub fn load(&self) -> Result<Preferences, PrefsError> {
    let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
    let value: Option<String> = conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![PREFERENCES_KEY],
        |row| row.get(0),
      )
      .optional()?;

    match value {
      Some(json) => Ok(serde_json::from_str(&json)?),
      None => Ok(Preferences::default()),
    }
  }

  pub fn save(&self, prefs: &Preferences) -> Result<(), PrefsError> {
    let json = serde_json::to_string(prefs)?;
    let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
    conn.execute(
      "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, datetime('now'))",
      params![PREFERENCES_KEY, json],
    )?;
    Ok(())
  }

  /// Load, change and save in one step.
  pub fn update<F>(&self, f: F) -> Result<Preferences, PrefsError>
  where
    F: FnOnce(&mut Preferences),
  {
    let mut prefs = self.load()?;
    f(&mut prefs);
    self.save(&prefs)?;
    Ok(prefs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_missing_record_is_default() {
    let store = PreferenceStore::open_in_memory().unwrap();
    assert_eq!(store.load().unwrap(), Preferences::default());
  }

  #[test]
  fn test_update_persists() {
    let store = PreferenceStore::open_in_memory().unwrap();
    store
      .update(|p| {
        p.table_density = TableDensity::Compact;
        p.sidebar_collapsed = true;
      })
      .unwrap();

    let prefs = store.load().unwrap();
    assert_eq!(prefs.table_density, TableDensity::Compact);
    assert!(prefs.sidebar_collapsed);
  }

  #[test]
  fn test_unknown_fields_and_missing_fields_tolerated() {
    let raw = r#"{"sidebar_collapsed": true, "theme": "dark"}"#;
    let prefs: Preferences = serde_json::from_str(raw).unwrap();
    assert!(prefs.sidebar_collapsed);
    assert_eq!(prefs.table_density, TableDensity::Comfortable);
  }

  #[test]
  fn test_density_from_str() {
    assert_eq!("Compact".parse::<TableDensity>(), Ok(TableDensity::Compact));
    assert!("huge".parse::<TableDensity>().is_err());
  }
}
