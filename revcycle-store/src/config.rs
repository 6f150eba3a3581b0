use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use crate::repository::SqliteRepository;

/// Database file name that selects an in-memory SQLite database.
pub const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the database.
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Database file name inside `state_dir`, or `:memory:`.
    pub db_file: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let state_dir = env::var("REVCYCLE_STATE_DIR").ok();
        let db_file = env::var("REVCYCLE_DB_FILE").ok();
        Self::from_values(state_dir, db_file)
    }

    /// Build a config from optional raw values. Unset or blank values take
    /// their defaults.
    pub fn from_values(state_dir: Option<String>, db_file: Option<String>) -> Result<Self> {
        let state_dir = non_blank(state_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let db_file = non_blank(db_file).unwrap_or_else(|| "revcycle.db".to_string());
        if db_file != IN_MEMORY && PathBuf::from(&db_file).components().count() != 1 {
            anyhow::bail!(
                "REVCYCLE_DB_FILE must be a plain file name, got '{}'",
                db_file
            );
        }

        Ok(Config { state_dir, db_file })
    }

    /// Where the database lives; `:memory:` is passed through unchanged.
    pub fn database_path(&self) -> PathBuf {
        if self.db_file == IN_MEMORY {
            PathBuf::from(IN_MEMORY)
        } else {
            self.state_dir.join(&self.db_file)
        }
    }

    pub fn open_repository(&self) -> Result<SqliteRepository> {
        let path = self.database_path();
        SqliteRepository::new(&path)
            .with_context(|| format!("Failed to open review database at {}", path.display()))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
