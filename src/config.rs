use crate::error::PipelineError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// Forward map: GND id -> Commons file title
pub const MAP_GND_TO_FILE: &str = "gnd2file";

/// Reverse index: canonical file key -> `;`-joined GND ids
pub const MAP_FILE_TO_GNDS: &str = "file2gnds";

/// License map: GND id -> serialized license record
pub const MAP_GND_TO_LICENSE: &str = "gnd2license";

/// Bookkeeping (join checkpoint)
pub const MAP_META: &str = "meta";

/// Commit the reverse index every N forward-map pairs
pub const REV_COMMIT_INTERVAL: u64 = 100_000;

/// Commit the license map (and log progress) every N dump records
pub const JOIN_COMMIT_INTERVAL: u64 = 50_000;

/// Flush the export writer (and log progress) every N rows
pub const EXPORT_FLUSH_INTERVAL: u64 = 200_000;

/// Statement property holding the license
pub const LICENSE_PROPERTY: &str = "P275";

/// Statement property holding the copyright status
pub const STATUS_PROPERTY: &str = "P6216";

/// A namespace prefix is only stripped when its colon sits before this char position
pub const NAMESPACE_MAX_PREFIX: usize = 20;

/// Read buffer for dump input and digest computation
pub const READ_BUFFER_SIZE: usize = 1 << 20;

/// Write buffer for NDJSON export
pub const WRITE_BUFFER_SIZE: usize = 256 * 1024;

pub const CHECKPOINT_VERSION: u32 = 2;

pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 30;

const USER_AGENT: &str = concat!("commons-licenses/", env!("CARGO_PKG_VERSION"));

static SHA256_HEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{64}$").unwrap());

/// Settings shared by the store-backed pipeline stages.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub rev_commit_interval: u64,
    pub join_commit_interval: u64,
    pub export_flush_interval: u64,
    pub license_property: String,
    pub status_property: String,
    /// Stop the join after this many dump records
    pub limit: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rev_commit_interval: REV_COMMIT_INTERVAL,
            join_commit_interval: JOIN_COMMIT_INTERVAL,
            export_flush_interval: EXPORT_FLUSH_INTERVAL,
            license_property: LICENSE_PROPERTY.to_string(),
            status_property: STATUS_PROPERTY.to_string(),
            limit: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub connect_timeout: Duration,
    /// Whole-request deadline; `None` lets multi-gigabyte transfers run to completion
    pub timeout: Option<Duration>,
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS),
            timeout: None,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

/// Accepts a 64 character hex SHA-256 digest in either case.
pub fn validate_sha256(digest: &str) -> Result<String, PipelineError> {
    let trimmed = digest.trim();
    if SHA256_HEX.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(PipelineError::InvalidDigest(digest.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.rev_commit_interval, 100_000);
        assert_eq!(config.join_commit_interval, 50_000);
        assert_eq!(config.license_property, "P275");
        assert_eq!(config.status_property, "P6216");
        assert!(config.limit.is_none());
    }

    #[test]
    fn download_defaults_have_no_deadline() {
        let config = DownloadConfig::default();
        assert!(config.timeout.is_none());
        assert!(config.user_agent.starts_with("commons-licenses/"));
    }

    #[test]
    fn validate_sha256_accepts_mixed_case() {
        let digest = "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852b855";
        assert_eq!(validate_sha256(digest).unwrap(), digest);
    }

    #[test]
    fn validate_sha256_rejects_short_or_non_hex() {
        assert!(validate_sha256("abc123").is_err());
        let not_hex = "z".repeat(64);
        assert!(matches!(
            validate_sha256(&not_hex),
            Err(PipelineError::InvalidDigest(_))
        ));
    }
}
