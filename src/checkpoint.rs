//! Persistence of the last fully scanned block.
//!
//! The checkpoint is a single decimal integer in a text file. A missing or
//! unreadable file means "never polled" and is never an error for the reader.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

pub trait CheckpointStore: Send + Sync {
    /// Last fully scanned block, `None` when absent or corrupt.
    fn read(&self) -> Option<u64>;

    /// Durably records `block_number`. On failure the previous value stays in effect.
    fn write(&self, block_number: u64) -> Result<()>;
}

pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn read(&self) -> Option<u64> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Could not read checkpoint {}: {}", self.path.display(), e);
                return None;
            }
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse() {
            Ok(block_number) => Some(block_number),
            Err(_) => {
                warn!(
                    "Ignoring corrupt checkpoint {}: {:?}",
                    self.path.display(),
                    trimmed
                );
                None
            }
        }
    }

    fn write(&self, block_number: u64) -> Result<()> {
        if let Some(directory) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(directory).with_context(|| {
                format!("Failed to create checkpoint directory {}", directory.display())
            })?;
        }

        // write-then-rename so a crash never leaves a half-written checkpoint
        let temp_path = self.temp_path();
        let mut file = std::fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        file.write_all(block_number.to_string().as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to replace checkpoint {}", self.path.display()))?;
        Ok(())
    }
}

/// Checkpoint kept in memory, for tests and dry runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    block_number: Mutex<Option<u64>>,
    writes: Mutex<Vec<u64>>,
}

impl MemoryCheckpointStore {
    pub fn new(initial: Option<u64>) -> Self {
        Self {
            block_number: Mutex::new(initial),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Every value written so far, oldest first.
    pub fn writes(&self) -> Vec<u64> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn read(&self) -> Option<u64> {
        *self.block_number.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self, block_number: u64) -> Result<()> {
        *self.block_number.lock().unwrap_or_else(|e| e.into_inner()) = Some(block_number);
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(block_number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_means_never_polled() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("last_polled_block"));
        assert_eq!(store.read(), None);
    }

    #[test]
    fn write_creates_directory_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("nested").join("last_polled_block");
        let store = FileCheckpointStore::new(&path);

        store.write(123_456).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "123456");
        assert_eq!(store.read(), Some(123_456));

        store.write(123_500).unwrap();
        assert_eq!(store.read(), Some(123_500));
    }

    #[test]
    fn corrupt_or_blank_content_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_polled_block");
        let store = FileCheckpointStore::new(&path);

        std::fs::write(&path, "not-a-block").unwrap();
        assert_eq!(store.read(), None);

        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(store.read(), None);

        std::fs::write(&path, "77\n").unwrap();
        assert_eq!(store.read(), Some(77));
    }

    #[test]
    fn failed_write_keeps_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_polled_block");
        let store = FileCheckpointStore::new(&path);
        store.write(10).unwrap();

        // A directory where the temp file should go makes the write fail.
        std::fs::create_dir(dir.path().join("last_polled_block.tmp")).unwrap();
        assert!(store.write(11).is_err());
        assert_eq!(store.read(), Some(10));
    }

    #[test]
    fn memory_store_records_writes() {
        let store = MemoryCheckpointStore::new(Some(5));
        assert_eq!(store.read(), Some(5));
        store.write(6).unwrap();
        store.write(9).unwrap();
        assert_eq!(store.read(), Some(9));
        assert_eq!(store.writes(), vec![6, 9]);
    }
}
