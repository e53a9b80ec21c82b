use crate::canon::{canonical_key, merge_id, split_ids};
use crate::config::PipelineConfig;
use crate::stats::BuildStats;
use crate::store::{Store, StrMap, FILE_TO_GNDS, GND_TO_FILE};
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use redb::{ReadableTable, ReadableTableMetadata, Table};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

const PROGRESS_TICK: u64 = 10_000;

#[derive(Debug, PartialEq, Eq)]
enum PairOutcome {
    Added,
    Duplicate,
    Skipped,
}

/// Files one forward-map pair under its canonical key.
fn index_pair(
    reverse: &mut Table<'_, &'static str, &'static str>,
    gnd: &str,
    file_title: &str,
) -> Result<PairOutcome> {
    let gnd = gnd.trim();
    if gnd.is_empty() {
        return Ok(PairOutcome::Skipped);
    }
    let Some(key) = canonical_key(file_title) else {
        return Ok(PairOutcome::Skipped);
    };

    let existing = reverse.get(key.as_str())?.map(|v| v.value().to_string());
    match merge_id(existing.as_deref(), gnd) {
        Some(merged) => {
            reverse.insert(key.as_str(), merged.as_str())?;
            Ok(PairOutcome::Added)
        }
        None => Ok(PairOutcome::Duplicate),
    }
}

/// Rebuilds the file -> GND ids index from the forward map.
///
/// The old index is dropped in the first batch, so it stays readable until
/// that batch commits.
pub fn build_reverse_index(store: &Store, config: &PipelineConfig) -> Result<BuildStats> {
    let interval = config.rev_commit_interval.max(1);
    let mut stats = BuildStats::default();

    let snapshot = store.read()?;
    let forward = snapshot.open_table(GND_TO_FILE)?;
    let total = forward.len()?;
    let mut pairs = forward.iter()?;

    info!(pairs = total, "Building reverse index");
    let pb = ProgressBar::new(total);

    let mut first_batch = true;
    let mut exhausted = false;
    while !exhausted {
        let txn = store.write()?;
        if first_batch {
            txn.delete_table(FILE_TO_GNDS)?;
            first_batch = false;
        }
        {
            let mut reverse = txn.open_table(FILE_TO_GNDS)?;
            let mut batch = 0u64;
            while batch < interval {
                let Some(entry) = pairs.next() else {
                    exhausted = true;
                    break;
                };
                let (gnd, file) = entry?;
                batch += 1;
                stats.pairs_seen += 1;

                match index_pair(&mut reverse, gnd.value(), file.value())? {
                    PairOutcome::Added => {}
                    PairOutcome::Duplicate => stats.duplicates += 1,
                    PairOutcome::Skipped => stats.pairs_skipped += 1,
                }

                if stats.pairs_seen % PROGRESS_TICK == 0 {
                    pb.set_position(stats.pairs_seen);
                }
            }
            if exhausted {
                stats.keys = reverse.len()?;
            }
        }
        txn.commit().context("Failed to commit reverse index batch")?;
        debug!(pairs = stats.pairs_seen, "Reverse index batch committed");
    }

    pb.finish_and_clear();

    info!(
        keys = stats.keys,
        pairs = stats.pairs_seen,
        skipped = stats.pairs_skipped,
        duplicates = stats.duplicates,
        "Reverse index built"
    );

    Ok(stats)
}

/// Read-only view of the reverse index, held in memory for one join run.
pub struct ReverseIndex {
    file_to_gnds: FxHashMap<String, String>,
}

impl ReverseIndex {
    pub fn load(store: &Store) -> Result<Self> {
        let txn = store.read()?;
        let table = txn.open_table(FILE_TO_GNDS)?;
        let mut file_to_gnds = FxHashMap::default();
        file_to_gnds.reserve(table.len()? as usize);

        for entry in table.iter()? {
            let (key, gnds) = entry?;
            file_to_gnds.insert(key.value().to_string(), gnds.value().to_string());
        }

        info!(
            keys = file_to_gnds.len(),
            map = StrMap::Reverse.name(),
            "Reverse index loaded"
        );
        Ok(Self { file_to_gnds })
    }

    pub fn from_map(file_to_gnds: FxHashMap<String, String>) -> Self {
        Self { file_to_gnds }
    }

    pub fn is_empty(&self) -> bool {
        self.file_to_gnds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.file_to_gnds.len()
    }

    /// GND ids referencing the file with this canonical key.
    pub fn gnd_ids(&self, key: &str) -> Option<impl Iterator<Item = &str>> {
        self.file_to_gnds.get(key).map(|set| split_ids(set))
    }
}
