use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::Context;
use rustc_hash::FxHashMap;

use crate::base::{locked, trace};

/// The host's single opaque save slot: one text blob per key.
pub trait SaveSlot {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>>;

    fn write(&self, key: &str, blob: &str) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemorySlot {
    blobs: Mutex<FxHashMap<String, String>>,
}

/// One `<key>.json` file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileSlot {
    dir: PathBuf,
}

// Implementations

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SaveSlot for MemorySlot {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(locked(&self.blobs).get(key).cloned())
    }

    fn write(&self, key: &str, blob: &str) -> anyhow::Result<()> {
        locked(&self.blobs).insert(key.to_owned(), blob.to_owned());
        Ok(())
    }
}

impl FileSlot {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Slot under the platform data directory of the application.
    #[cfg(feature = "project_dir")]
    pub fn project(qualifier: &str, organization: &str, application: &str) -> anyhow::Result<Self> {
        let dirs = directories::ProjectDirs::from(qualifier, organization, application)
            .context("no home directory to derive the project data directory from")?;

        Ok(Self::new(dirs.data_dir()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl SaveSlot for FileSlot {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path(key);

        match fs::read_to_string(&path) {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    fn write(&self, key: &str, blob: &str) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let path = self.path(key);
        fs::write(&path, blob).with_context(|| format!("failed to write {}", path.display()))?;

        trace!(path = %path.display(), bytes = blob.len(), "wrote save slot");
        Ok(())
    }
}
