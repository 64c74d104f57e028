use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to store blob '{key}': {source}")]
    Io {
        key: String,
        source: std::io::Error,
    },
}

/// Destination for finished blobs.
///
/// Stored blobs are staged until [`commit`](DataSink::commit) publishes all of them at
/// once. [`abort`](DataSink::abort) drops everything staged since the last commit.
pub trait DataSink {
    fn store(&mut self, key: &str, header: &[u8], payload: &[u8]) -> Result<(), SinkError>;

    fn commit(&mut self) -> Result<(), SinkError>;

    fn abort(&mut self);
}

/// Collects committed blobs in memory, ordered by key.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    entries: BTreeMap<String, (Vec<u8>, Vec<u8>)>,
    pending: BTreeMap<String, (Vec<u8>, Vec<u8>)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<(&[u8], &[u8])> {
        self.entries
            .get(key)
            .map(|(header, payload)| (header.as_slice(), payload.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}

impl DataSink for MemorySink {
    fn store(&mut self, key: &str, header: &[u8], payload: &[u8]) -> Result<(), SinkError> {
        self.pending
            .insert(key.to_string(), (header.to_vec(), payload.to_vec()));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        self.entries.append(&mut self.pending);
        Ok(())
    }

    fn abort(&mut self) {
        self.pending.clear();
    }
}

const STAGING_DIR: &str = ".staging";

/// Writes each blob to `<root>/<key>.bin`, header followed by payload. Blobs are written
/// below `<root>/.staging` first and renamed into place on commit.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
    staged: Vec<String>,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            staged: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.bin"))
    }

    fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    fn staged_path_for(&self, key: &str) -> PathBuf {
        self.staging_root().join(format!("{key}.bin"))
    }

    fn clear_staging(&mut self) {
        self.staged.clear();
        let staging = self.staging_root();
        if staging.exists() {
            if let Err(error) = fs::remove_dir_all(&staging) {
                warn!(path = %staging.display(), %error, "Failed to remove staging directory.");
            }
        }
    }
}

fn io_error(key: &str) -> impl FnOnce(std::io::Error) -> SinkError + '_ {
    move |source| SinkError::Io {
        key: key.to_string(),
        source,
    }
}

impl DataSink for DirectorySink {
    fn store(&mut self, key: &str, header: &[u8], payload: &[u8]) -> Result<(), SinkError> {
        let path = self.staged_path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error(key))?;
        }
        let mut bytes = Vec::with_capacity(header.len() + payload.len());
        bytes.extend_from_slice(header);
        bytes.extend_from_slice(payload);
        fs::write(&path, bytes).map_err(io_error(key))?;
        self.staged.push(key.to_string());
        debug!(key, bytes = header.len() + payload.len(), "Staged blob.");
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        let staged = std::mem::take(&mut self.staged);
        let mut published = Vec::with_capacity(staged.len());
        for key in &staged {
            let target = self.path_for(key);
            let moved = target
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|()| fs::rename(self.staged_path_for(key), &target));
            if let Err(source) = moved {
                for path in &published {
                    let _ = fs::remove_file(path);
                }
                self.clear_staging();
                return Err(io_error(key)(source));
            }
            published.push(target);
        }
        self.clear_staging();
        debug!(blobs = published.len(), "Committed staged blobs.");
        Ok(())
    }

    fn abort(&mut self) {
        let dropped = self.staged.len();
        self.clear_staging();
        debug!(blobs = dropped, "Dropped staged blobs.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::interop::blob::{Blob, BlobKind, BlobSet};
    use tempfile::tempdir;

    fn sample_set() -> BlobSet {
        let mut set = BlobSet::new();
        set.insert(
            "sim0/jump-counts",
            Blob::from_table(BlobKind::JumpCounts, &[1, 2], &[1i32, 0]).unwrap(),
        );
        set
    }

    #[test]
    fn memory_sink_keeps_header_and_payload_apart() {
        let mut sink = MemorySink::new();
        sample_set().store_into(&mut sink).unwrap();
        assert!(sink.get("sim0/jump-counts").is_none());
        sink.commit().unwrap();
        let (header, payload) = sink.get("sim0/jump-counts").unwrap();
        assert_eq!(header.len(), 20);
        assert_eq!(payload.len(), 8);
    }

    #[test]
    fn directory_sink_writes_nested_keys() {
        let dir = tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path());
        sample_set().store_into(&mut sink).unwrap();
        sink.commit().unwrap();
        assert!(!dir.path().join(".staging").exists());
        let path = dir.path().join("sim0").join("jump-counts.bin");
        let bytes = fs::read(path).unwrap();
        let blob = Blob::from_bytes(&bytes).unwrap();
        assert_eq!(blob.values::<i32>().unwrap(), vec![1, 0]);
        assert_eq!(blob.dimensions(), vec![1, 2]);
    }

    #[test]
    fn aborted_blobs_never_reach_the_directory() {
        let dir = tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path());
        sample_set().store_into(&mut sink).unwrap();
        sink.abort();
        sink.commit().unwrap();
        assert!(!sink.path_for("sim0/jump-counts").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn memory_sink_abort_keeps_earlier_commits() {
        let mut sink = MemorySink::new();
        sample_set().store_into(&mut sink).unwrap();
        sink.commit().unwrap();
        sink.store("sim1/jump-counts", &[], &[]).unwrap();
        sink.abort();
        assert_eq!(sink.len(), 1);
        assert!(sink.get("sim1/jump-counts").is_none());
    }
}
