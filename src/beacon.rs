//! Loads the GND -> Commons file concordance from a BEACON text file.

use crate::config::PipelineConfig;
use crate::stats::LoadStats;
use crate::store::{Store, GND_TO_FILE};
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use percent_encoding::percent_decode_str;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::{debug, info};

const FILE_PATH_MARKER: &str = "Special:FilePath/";
const WIKI_PATH_MARKER: &str = "/wiki/";

/// Reduces a Commons URL to the file title it points at.
///
/// Plain titles pass through unchanged.
pub fn file_reference(target: &str) -> Cow<'_, str> {
    let target = target.trim();
    let is_url = target.starts_with("http://") || target.starts_with("https://");
    let marker = [FILE_PATH_MARKER, WIKI_PATH_MARKER]
        .into_iter()
        .find_map(|m| target.find(m).map(|pos| pos + m.len()));

    match marker {
        Some(start) if is_url => {
            let rest = &target[start..];
            let rest = rest.split(['?', '#']).next().unwrap_or(rest);
            match percent_decode_str(rest).decode_utf8() {
                Ok(decoded) => Cow::Owned(decoded.into_owned()),
                Err(_) => Cow::Owned(percent_decode_str(rest).decode_utf8_lossy().into_owned()),
            }
        }
        _ => Cow::Borrowed(target),
    }
}

/// Splits one BEACON link line into `(source, file reference)`.
///
/// Returns `None` for meta lines, blank lines and lines lacking either part.
pub fn parse_line(line: &str) -> Option<(&str, Cow<'_, str>)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut fields = line.splitn(3, '|').map(str::trim);
    let source = fields.next().filter(|s| !s.is_empty())?;
    let second = fields.next().unwrap_or("");
    let target = match fields.next() {
        Some(target) if !target.is_empty() => target,
        _ => second,
    };
    if target.is_empty() {
        return None;
    }

    let file = file_reference(target);
    if file.trim().is_empty() {
        return None;
    }
    Some((source, file))
}

/// Fills the forward map from a BEACON file, overwriting repeated ids.
pub fn load_forward(store: &Store, path: &str, config: &PipelineConfig) -> Result<LoadStats> {
    let file = File::open(path).with_context(|| format!("Failed to open BEACON file: {}", path))?;
    let mut lines = BufReader::new(file).lines();
    let interval = config.rev_commit_interval.max(1);
    let mut stats = LoadStats::default();
    let pb = ProgressBar::new_spinner();

    info!(path, "Loading forward map");

    let mut exhausted = false;
    while !exhausted {
        let txn = store.write()?;
        {
            let mut forward = txn.open_table(GND_TO_FILE)?;
            let mut batch = 0u64;
            while batch < interval {
                let Some(line) = lines.next() else {
                    exhausted = true;
                    break;
                };
                let line = line.with_context(|| format!("Failed to read {}", path))?;
                stats.lines += 1;

                if line.trim_start().starts_with('#') || line.trim().is_empty() {
                    continue;
                }
                match parse_line(&line) {
                    Some((source, file)) => {
                        forward.insert(source, file.as_ref())?;
                        stats.loaded += 1;
                        batch += 1;
                    }
                    None => {
                        debug!(line = stats.lines, "Skipping BEACON line");
                        stats.skipped += 1;
                    }
                }
            }
        }
        txn.commit().context("Failed to commit forward map batch")?;
        pb.set_position(stats.lines);
    }

    pb.finish_and_clear();
    info!(
        lines = stats.lines,
        loaded = stats.loaded,
        skipped = stats.skipped,
        "Forward map loaded"
    );

    Ok(stats)
}
