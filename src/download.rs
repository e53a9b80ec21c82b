//! Resumable, digest-verified download of dump files.
//!
//! Bytes land in `<dest>.part` first. An interrupted transfer leaves the
//! partial file behind and the next call asks the server for the remainder
//! with a `Range` header. The partial file becomes `dest` only once the
//! optional SHA-256 digest checks out.

use crate::config::{DownloadConfig, READ_BUFFER_SIZE};
use crate::error::PipelineError;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub fn create_client(config: &DownloadConfig) -> Result<Client> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .user_agent(config.user_agent.as_str());
    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("Failed to build HTTP client")
}

/// `<dest>.part`, next to the destination.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Lowercase hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open for hashing: {:?}", path))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Moves the finished partial file onto `dest`.
fn promote(partial: &Path, dest: &Path) -> Result<()> {
    match fs::rename(partial, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            warn!(from = ?partial, to = ?dest, "Rename crosses devices, copying instead (not atomic)");
            fs::copy(partial, dest)
                .with_context(|| format!("Failed to copy {:?} to {:?}", partial, dest))?;
            fs::remove_file(partial)
                .with_context(|| format!("Failed to remove partial file: {:?}", partial))?;
            Ok(())
        }
        Err(e) => {
            Err(e).with_context(|| format!("Failed to move {:?} to {:?}", partial, dest))
        }
    }
}

/// Copies the body into `out`, flushing whatever arrived before an error.
fn stream_body(body: &mut impl Read, out: File, pb: &ProgressBar) -> io::Result<u64> {
    let mut writer = BufWriter::with_capacity(READ_BUFFER_SIZE, out);
    let mut buf = vec![0u8; 64 * 1024];
    let mut written = 0u64;
    let result = loop {
        match body.read(&mut buf) {
            Ok(0) => break Ok(written),
            Ok(n) => {
                if let Err(e) = writer.write_all(&buf[..n]) {
                    break Err(e);
                }
                written += n as u64;
                pb.inc(n as u64);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => break Err(e),
        }
    };
    let flushed = writer.flush();
    let written = result?;
    flushed?;
    Ok(written)
}

fn digest_matches(actual: &str, expected: &str) -> bool {
    actual.eq_ignore_ascii_case(expected.trim())
}

/// Full size announced by a `Content-Range: bytes */<len>` header.
fn complete_length(response: &Response) -> Option<u64> {
    let value = response.headers().get(CONTENT_RANGE)?.to_str().ok()?;
    parse_unsatisfied_range(value)
}

fn parse_unsatisfied_range(value: &str) -> Option<u64> {
    value.trim().strip_prefix("bytes */")?.trim().parse().ok()
}

/// Checks the finished partial file and moves it onto `dest`.
///
/// A partial file failing the digest is deleted so the next run starts over.
fn finish(partial: &Path, dest: &Path, expected: Option<&str>) -> Result<PathBuf> {
    if let Some(expected) = expected {
        let actual = sha256_file(partial)?;
        if !digest_matches(&actual, expected) {
            fs::remove_file(partial)
                .with_context(|| format!("Failed to remove partial file: {:?}", partial))?;
            return Err(PipelineError::DigestMismatch {
                expected: expected.to_string(),
                actual,
            }
            .into());
        }
        debug!(digest = %actual, "Digest verified");
    }

    promote(partial, dest)?;
    info!(path = ?dest, "Download ready");

    Ok(dest.to_path_buf())
}

/// Downloads `url` to `dest`, resuming a previous partial transfer.
///
/// Returns immediately when `dest` already exists and either no digest is
/// expected or its digest matches.
pub fn fetch(client: &Client, url: &str, dest: &Path, expected: Option<&str>) -> Result<PathBuf> {
    if dest.exists() {
        match expected {
            None => {
                info!(path = ?dest, "Destination exists, skipping download");
                return Ok(dest.to_path_buf());
            }
            Some(expected) => {
                let actual = sha256_file(dest)?;
                if digest_matches(&actual, expected) {
                    info!(path = ?dest, "Destination already verified, skipping download");
                    return Ok(dest.to_path_buf());
                }
                warn!(path = ?dest, expected, actual = %actual, "Destination digest differs, downloading again");
            }
        }
    }

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    let partial = partial_path(dest);
    let offset = fs::metadata(&partial).map(|m| m.len()).unwrap_or(0);

    let mut request = client.get(url);
    if offset > 0 {
        debug!(offset, "Requesting remaining bytes");
        request = request.header(RANGE, format!("bytes={}-", offset));
    }
    let mut response = request
        .send()
        .with_context(|| format!("Request failed: {}", url))?;

    let status = response.status();
    if status == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
        // the partial file may already hold every byte
        if complete_length(&response) == Some(offset) {
            info!(offset, path = ?partial, "Partial file already complete");
            return finish(&partial, dest, expected);
        }
        warn!(
            offset,
            path = ?partial,
            "Server rejected resume offset; delete the partial file to restart"
        );
    }

    let (out, start) = match status {
        StatusCode::PARTIAL_CONTENT => {
            info!(offset, "Server accepted resume, appending");
            let out = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&partial)
                .with_context(|| format!("Failed to open partial file: {:?}", partial))?;
            (out, offset)
        }
        StatusCode::OK => {
            if offset > 0 {
                warn!(offset, "Server ignored range request, restarting from zero");
            }
            let out = File::create(&partial)
                .with_context(|| format!("Failed to create partial file: {:?}", partial))?;
            (out, 0)
        }
        other => {
            return Err(PipelineError::HttpStatus {
                status: other.as_u16(),
                url: url.to_string(),
            }
            .into());
        }
    };

    let pb = match response.content_length() {
        Some(len) => {
            let pb = ProgressBar::new(start + len);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{bytes}/{total_bytes} [{bar:40}] {bytes_per_sec} eta {eta}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            pb.set_position(start);
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let received = stream_body(&mut response, out, &pb)
        .with_context(|| format!("Transfer interrupted: {} (partial kept at {:?})", url, partial))?;
    pb.finish_and_clear();
    info!(bytes = start + received, path = ?partial, "Transfer complete");

    finish(&partial, dest, expected)
}
