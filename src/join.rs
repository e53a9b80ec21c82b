//! Streams the media-info dump against the reverse index and writes one
//! license record per referencing GND id.

use crate::canon::{canonical_key, dedup_join, strip_namespace};
use crate::checkpoint::{self, CheckpointManager};
use crate::config::{PipelineConfig, MAP_FILE_TO_GNDS};
use crate::error::PipelineError;
use crate::index::ReverseIndex;
use crate::models::{LicenseRecord, MediaInfo, RecordDefect};
use crate::parser::{DumpEntry, DumpReader};
use crate::stats::JoinStats;
use crate::store::{Store, GND_TO_LICENSE, META};
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use serde_json::Value;
use tracing::{debug, info, trace};

const PROGRESS_TICK: u64 = 1000;

/// What a single dump entity contributes to the license map.
#[derive(Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    Defect(RecordDefect),
    /// Title normalizes to nothing
    BlankTitle,
    /// No GND id references this file
    Unmatched,
    Matched {
        record: LicenseRecord,
        gnd_ids: Vec<String>,
    },
}

/// Resolves one dump entity against the index without touching the store.
pub fn match_record(
    value: &Value,
    index: &ReverseIndex,
    config: &PipelineConfig,
) -> RecordOutcome {
    let info = match MediaInfo::from_value(value) {
        Ok(info) => info,
        Err(defect) => return RecordOutcome::Defect(defect),
    };

    let file = strip_namespace(info.title());
    let Some(key) = canonical_key(info.title()) else {
        return RecordOutcome::BlankTitle;
    };
    let Some(gnds) = index.gnd_ids(&key) else {
        return RecordOutcome::Unmatched;
    };
    let gnd_ids: Vec<String> = gnds.map(str::to_string).collect();
    if gnd_ids.is_empty() {
        return RecordOutcome::Unmatched;
    }

    let record = LicenseRecord {
        file: file.to_string(),
        license: dedup_join(info.item_ids(&config.license_property)),
        status: dedup_join(info.item_ids(&config.status_property)),
    };
    RecordOutcome::Matched { record, gnd_ids }
}

/// Joins the dump at `dump_path` into the license map.
///
/// With `resume`, a checkpoint left by an interrupted run on the same dump
/// file is honoured and the already committed records are skipped.
pub fn run_join(
    store: &Store,
    dump_path: &str,
    config: &PipelineConfig,
    resume: bool,
) -> Result<JoinStats> {
    let index = ReverseIndex::load(store)?;
    if index.is_empty() {
        return Err(PipelineError::EmptyReverseIndex {
            map: MAP_FILE_TO_GNDS,
        }
        .into());
    }

    let checkpoint_mgr = CheckpointManager::new(dump_path)?;
    let mut reader = DumpReader::open(dump_path)?;
    let mut stats = JoinStats::new();

    if resume {
        match checkpoint::load_if_valid(store, dump_path)? {
            Some(cp) => {
                let skipped = reader
                    .skip_records(cp.stats.records_seen)
                    .context("Failed to fast-forward dump to checkpoint")?;
                stats = JoinStats::from_checkpoint(&cp.stats);
                info!(skipped, writes = stats.writes, "Resuming join from checkpoint");
            }
            None => info!("No valid checkpoint found, starting fresh"),
        }
    }

    let interval = config.join_commit_interval.max(1);
    let pb = ProgressBar::new_spinner();
    info!(dump = dump_path, keys = index.len(), "Joining dump");

    let mut exhausted = false;
    while !exhausted {
        let txn = store.write()?;
        {
            let mut licenses = txn.open_table(GND_TO_LICENSE)?;
            let mut batch = 0u64;
            while batch < interval {
                if config.limit.is_some_and(|limit| stats.records_seen >= limit) {
                    exhausted = true;
                    break;
                }
                let Some(entry) = reader.next() else {
                    exhausted = true;
                    break;
                };
                let entry = entry.with_context(|| {
                    format!(
                        "Unreadable dump {} after {} records",
                        dump_path, stats.records_seen
                    )
                })?;
                batch += 1;
                stats.records_seen += 1;

                match entry {
                    DumpEntry::Malformed(reason) => {
                        debug!(record = stats.records_seen, %reason, "Skipping malformed dump entry");
                        stats.malformed += 1;
                    }
                    DumpEntry::Entity(value) => match match_record(&value, &index, config) {
                        RecordOutcome::Matched { record, gnd_ids } => {
                            let encoded = record
                                .to_json()
                                .context("Failed to serialize license record")?;
                            for gnd in &gnd_ids {
                                licenses.insert(gnd.as_str(), encoded.as_str())?;
                            }
                            trace!(file = %record.file, gnds = gnd_ids.len(), "Matched");
                            stats.matched += 1;
                            stats.writes += gnd_ids.len() as u64;
                        }
                        RecordOutcome::Unmatched => stats.unmatched += 1,
                        RecordOutcome::BlankTitle => stats.untitled += 1,
                        RecordOutcome::Defect(defect) => {
                            debug!(?defect, record = stats.records_seen, "Skipping dump entity");
                            stats.untitled += 1;
                        }
                    },
                }

                if stats.records_seen % PROGRESS_TICK == 0 {
                    pb.tick();
                }
            }

            let mut meta = txn.open_table(META)?;
            if exhausted {
                checkpoint::clear(&mut meta)?;
            } else {
                checkpoint_mgr.save(&mut meta, &stats)?;
            }
        }
        txn.commit().context("Failed to commit license batch")?;
        info!(
            seen = stats.records_seen,
            writes = stats.writes,
            "Join progress"
        );
    }

    pb.finish_and_clear();

    info!(
        seen = stats.records_seen,
        writes = stats.writes,
        matched = stats.matched,
        unmatched = stats.unmatched,
        untitled = stats.untitled,
        malformed = stats.malformed,
        "Join complete"
    );

    Ok(stats)
}
