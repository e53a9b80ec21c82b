use crate::checkpoint::CheckpointStats;

/// Counters for one `build-rev` run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildStats {
    /// Forward-map pairs visited
    pub pairs_seen: u64,
    /// Pairs without a usable id or title
    pub pairs_skipped: u64,
    /// Pairs whose id was already listed under their key
    pub duplicates: u64,
    /// Distinct canonical keys in the finished index
    pub keys: u64,
}

/// Counters for one `load-forward` run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadStats {
    pub lines: u64,
    pub loaded: u64,
    /// Lines without an id or file reference
    pub skipped: u64,
}

/// Counters for one `join` run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JoinStats {
    pub records_seen: u64,
    /// License records written (one per GND id per matching entity)
    pub writes: u64,
    /// Entities whose file is referenced by at least one GND id
    pub matched: u64,
    /// Entities without a usable title
    pub untitled: u64,
    /// Entities whose file nobody references
    pub unmatched: u64,
    /// Entries that failed to parse
    pub malformed: u64,
}

impl JoinStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create stats initialized from a checkpoint
    pub fn from_checkpoint(cp: &CheckpointStats) -> Self {
        Self {
            records_seen: cp.records_seen,
            writes: cp.writes,
            matched: cp.matched,
            untitled: cp.untitled,
            unmatched: cp.unmatched,
            malformed: cp.malformed,
        }
    }

    /// Convert to checkpoint stats for persistence
    pub fn to_checkpoint(&self) -> CheckpointStats {
        CheckpointStats {
            records_seen: self.records_seen,
            writes: self.writes,
            matched: self.matched,
            untitled: self.untitled,
            unmatched: self.unmatched,
            malformed: self.malformed,
        }
    }
}
