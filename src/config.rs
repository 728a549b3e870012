//! Datastore location and connection settings.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_EXTENSION: &str = "db";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Where a datastore lives and how its connection is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatastoreConfig {
    /// Base folder of the database file
    pub folder: PathBuf,
    /// Folders nested under `folder`, outermost first
    #[serde(default)]
    pub subfolders: Vec<String>,
    /// Logical database name; the file is `name.extension`
    pub name: String,
    #[serde(default = "default_extension")]
    pub extension: String,
    /// How long SQLite waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl DatastoreConfig {
    /// Create a new config for `folder/name.db`
    pub fn new(folder: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            subfolders: Vec::new(),
            name: name.into(),
            extension: default_extension(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }

    pub fn with_subfolders<I, S>(mut self, subfolders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subfolders = subfolders.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_busy_timeout_ms(mut self, millis: u64) -> Self {
        self.busy_timeout_ms = millis;
        self
    }

    /// Reads a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: DatastoreConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects names and segments that would not compose into a file path
    /// inside `folder`.
    pub fn validate(&self) -> Result<()> {
        check_segment("name", &self.name)?;
        for subfolder in &self.subfolders {
            check_segment("subfolder", subfolder)?;
        }
        if !self.extension.is_empty() && self.extension.trim_start_matches('.').is_empty() {
            return Err(Error::InvalidPath(format!(
                "extension `{}` has no characters besides dots",
                self.extension
            )));
        }
        if self.extension.contains(['/', '\\']) {
            return Err(Error::InvalidPath(format!(
                "extension `{}` contains a path separator",
                self.extension
            )));
        }
        Ok(())
    }

    /// `folder` joined with every subfolder
    pub fn folder_path(&self) -> PathBuf {
        self.subfolders
            .iter()
            .fold(self.folder.clone(), |path, sub| path.join(sub))
    }

    /// File name of the database, e.g. `people.db`
    pub fn file_name(&self) -> String {
        if self.extension.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.extension.trim_start_matches('.'))
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.folder_path().join(self.file_name())
    }
}

fn check_segment(what: &str, segment: &str) -> Result<()> {
    if segment.trim().is_empty() {
        return Err(Error::InvalidPath(format!("{} must not be empty", what)));
    }
    if segment.contains(['/', '\\']) || segment == "." || segment == ".." {
        return Err(Error::InvalidPath(format!(
            "{} `{}` is not a single path segment",
            what, segment
        )));
    }
    Ok(())
}
