//! Resume point for an interrupted `join`.
//!
//! The checkpoint lives in the store's `meta` map and is written in the same
//! transaction as the license batch it describes, so the stored
//! `records_seen` always matches what has been committed.

use crate::config::CHECKPOINT_VERSION;
use crate::stats::JoinStats;
use crate::store::{Store, META};
use anyhow::{Context, Result};
use bincode::Options;
use redb::Table;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::SystemTime;
use tracing::{debug, info, warn};

pub const CHECKPOINT_KEY: &str = "join.checkpoint";

/// Upper bound for a decoded checkpoint; real ones are a few hundred bytes.
const CHECKPOINT_SIZE_LIMIT: u64 = 64 * 1024;

#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq, Eq)]
pub struct CheckpointStats {
    pub records_seen: u64,
    pub writes: u64,
    pub matched: u64,
    pub untitled: u64,
    pub unmatched: u64,
    pub malformed: u64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Checkpoint {
    pub version: u32,
    pub input_path: String,
    pub input_mtime: u64,
    pub input_size: u64,
    pub stats: CheckpointStats,
}

fn get_input_metadata(input_path: &str) -> Result<(u64, u64)> {
    let metadata = fs::metadata(input_path)
        .with_context(|| format!("Failed to get metadata for: {}", input_path))?;
    let mtime = metadata
        .modified()
        .context("Failed to get modification time")?
        .duration_since(SystemTime::UNIX_EPOCH)
        .context("Invalid modification time")?
        .as_secs();
    Ok((mtime, metadata.len()))
}

fn decode(bytes: &[u8]) -> Option<Checkpoint> {
    let options = bincode::options().with_limit(CHECKPOINT_SIZE_LIMIT);
    match options.deserialize(bytes) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(error = %e, "Checkpoint is corrupt or unreadable");
            None
        }
    }
}

/// Returns the stored checkpoint if it was written for this exact dump file.
pub fn load_if_valid(store: &Store, input_path: &str) -> Result<Option<Checkpoint>> {
    let txn = store.read()?;
    let meta = txn.open_table(META)?;
    let Some(raw) = meta.get(CHECKPOINT_KEY)? else {
        return Ok(None);
    };
    let Some(checkpoint) = decode(raw.value()) else {
        return Ok(None);
    };

    if checkpoint.version != CHECKPOINT_VERSION {
        info!(
            cached = checkpoint.version,
            current = CHECKPOINT_VERSION,
            "Checkpoint version mismatch"
        );
        return Ok(None);
    }

    if checkpoint.input_path != input_path {
        info!(
            cached = checkpoint.input_path,
            current = input_path,
            "Checkpoint input path mismatch"
        );
        return Ok(None);
    }

    let (mtime, size) = get_input_metadata(input_path)?;
    if checkpoint.input_mtime != mtime || checkpoint.input_size != size {
        info!(
            cached_mtime = checkpoint.input_mtime,
            current_mtime = mtime,
            cached_size = checkpoint.input_size,
            current_size = size,
            "Dump has changed since checkpoint was created"
        );
        return Ok(None);
    }

    info!(
        records = checkpoint.stats.records_seen,
        writes = checkpoint.stats.writes,
        "Loaded valid checkpoint"
    );

    Ok(Some(checkpoint))
}

/// Removes the checkpoint as part of an open write transaction.
pub fn clear(meta: &mut Table<'_, &'static str, &'static [u8]>) -> Result<()> {
    if meta.remove(CHECKPOINT_KEY)?.is_some() {
        debug!("Checkpoint cleared");
    }
    Ok(())
}

/// Captures the dump's identity once and stamps it onto every saved checkpoint.
pub struct CheckpointManager {
    input_path: String,
    input_mtime: u64,
    input_size: u64,
}

impl CheckpointManager {
    pub fn new(input_path: &str) -> Result<Self> {
        let (input_mtime, input_size) = get_input_metadata(input_path)?;
        Ok(Self {
            input_path: input_path.to_string(),
            input_mtime,
            input_size,
        })
    }

    pub fn save(
        &self,
        meta: &mut Table<'_, &'static str, &'static [u8]>,
        stats: &JoinStats,
    ) -> Result<()> {
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            input_path: self.input_path.clone(),
            input_mtime: self.input_mtime,
            input_size: self.input_size,
            stats: stats.to_checkpoint(),
        };

        let bytes = bincode::DefaultOptions::new()
            .serialize(&checkpoint)
            .context("Failed to serialize checkpoint")?;
        meta.insert(CHECKPOINT_KEY, bytes.as_slice())?;

        debug!(records = stats.records_seen, "Checkpoint staged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_input(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("dump.json");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "[]").unwrap();
        path
    }

    fn save_committed(store: &Store, manager: &CheckpointManager, stats: &JoinStats) {
        let txn = store.write().unwrap();
        {
            let mut meta = txn.open_table(META).unwrap();
            manager.save(&mut meta, stats).unwrap();
        }
        txn.commit().unwrap();
    }

    #[test]
    fn load_if_valid_returns_none_when_no_checkpoint() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let store = Store::open(dir.path().join("store.redb")).unwrap();
        assert!(load_if_valid(&store, input.to_str().unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn save_and_load() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let input_str = input.to_str().unwrap();
        let store = Store::open(dir.path().join("store.redb")).unwrap();

        let manager = CheckpointManager::new(input_str).unwrap();
        let stats = JoinStats {
            records_seen: 42,
            writes: 10,
            ..JoinStats::default()
        };
        save_committed(&store, &manager, &stats);

        let loaded = load_if_valid(&store, input_str).unwrap().unwrap();
        assert_eq!(loaded.stats.records_seen, 42);
        assert_eq!(loaded.stats.writes, 10);
    }

    #[test]
    fn checkpoint_invalidated_by_input_change() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let input_str = input.to_str().unwrap();
        let store = Store::open(dir.path().join("store.redb")).unwrap();

        let manager = CheckpointManager::new(input_str).unwrap();
        save_committed(&store, &manager, &JoinStats::new());

        let mut file = File::create(&input).unwrap();
        writeln!(file, "[{{\"title\": \"a longer dump than before\"}}]").unwrap();

        assert!(load_if_valid(&store, input_str).unwrap().is_none());
    }

    #[test]
    fn checkpoint_invalidated_by_other_dump() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let other = dir.path().join("other.json");
        fs::copy(&input, &other).unwrap();
        let store = Store::open(dir.path().join("store.redb")).unwrap();

        let manager = CheckpointManager::new(input.to_str().unwrap()).unwrap();
        save_committed(&store, &manager, &JoinStats::new());

        assert!(load_if_valid(&store, other.to_str().unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn clear_removes_checkpoint() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let input_str = input.to_str().unwrap();
        let store = Store::open(dir.path().join("store.redb")).unwrap();

        let manager = CheckpointManager::new(input_str).unwrap();
        save_committed(&store, &manager, &JoinStats::new());

        let txn = store.write().unwrap();
        {
            let mut meta = txn.open_table(META).unwrap();
            clear(&mut meta).unwrap();
            // clearing twice is fine
            clear(&mut meta).unwrap();
        }
        txn.commit().unwrap();

        assert!(load_if_valid(&store, input_str).unwrap().is_none());
    }

    #[test]
    fn corrupt_checkpoint_returns_none() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let store = Store::open(dir.path().join("store.redb")).unwrap();

        let txn = store.write().unwrap();
        {
            let mut meta = txn.open_table(META).unwrap();
            meta.insert(CHECKPOINT_KEY, b"not valid bincode".as_slice())
                .unwrap();
        }
        txn.commit().unwrap();

        assert!(load_if_valid(&store, input.to_str().unwrap())
            .unwrap()
            .is_none());
    }
}
