use crate::config::{PipelineConfig, WRITE_BUFFER_SIZE};
use crate::models::{ExportRow, LicenseRecord};
use crate::store::{Store, GND_TO_FILE, GND_TO_LICENSE};
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use redb::{Range, ReadOnlyTable, ReadableTableMetadata};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One export row per forward-map entry, in forward-map key order.
///
/// Reads from a snapshot taken at construction; build a new one to start over.
pub struct ExportRows {
    forward: Range<'static, &'static str, &'static str>,
    licenses: ReadOnlyTable<&'static str, &'static str>,
    len: u64,
}

impl ExportRows {
    pub fn new(store: &Store) -> Result<Self> {
        let txn = store.read()?;
        let forward_table = txn.open_table(GND_TO_FILE)?;
        let licenses = txn.open_table(GND_TO_LICENSE)?;
        let len = forward_table.len()?;
        let forward = forward_table.range::<&str>(..)?;
        Ok(Self {
            forward,
            licenses,
            len,
        })
    }

    /// Number of rows the sequence yields in total.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn license_for(&self, gnd: &str) -> Result<Option<LicenseRecord>> {
        let Some(raw) = self.licenses.get(gnd)? else {
            return Ok(None);
        };
        match LicenseRecord::from_json(raw.value()) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(gnd, error = %e, "Unreadable license record, exporting without licenses");
                Ok(None)
            }
        }
    }
}

impl Iterator for ExportRows {
    type Item = Result<ExportRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.forward.next()?;
        Some(entry.map_err(Into::into).and_then(|(gnd, file)| {
            let record = self.license_for(gnd.value())?;
            Ok(ExportRow::new(gnd.value(), file.value(), record.as_ref()))
        }))
    }
}

fn temp_path(out_path: &Path) -> PathBuf {
    let mut name = out_path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Writes every export row as one JSON object per line.
///
/// The file is assembled next to `out_path` and renamed into place at the end.
pub fn write_ndjson(store: &Store, out_path: &Path, config: &PipelineConfig) -> Result<u64> {
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    let rows = ExportRows::new(store)?;
    let pb = ProgressBar::new(rows.len());
    let flush_every = config.export_flush_interval.max(1);

    let tmp_path = temp_path(out_path);
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create export file: {:?}", tmp_path))?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

    let mut count = 0u64;
    for row in rows {
        let row = row?;
        serde_json::to_writer(&mut writer, &row).context("Failed to write export row")?;
        writer.write_all(b"\n")?;
        count += 1;

        if count % flush_every == 0 {
            writer.flush()?;
            pb.set_position(count);
            info!(rows = count, "Export progress");
        }
    }

    writer
        .into_inner()
        .map_err(|e| e.into_error())
        .and_then(|f| f.sync_all())
        .with_context(|| format!("Failed to finish export file: {:?}", tmp_path))?;

    fs::rename(&tmp_path, out_path)
        .with_context(|| format!("Failed to move export into place: {:?}", out_path))?;

    pb.finish_and_clear();
    info!(rows = count, path = ?out_path, "NDJSON exported");

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StrMap;
    use tempfile::TempDir;

    fn store_with(forward: &[(&str, &str)], licenses: &[(&str, &str)]) -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("store.redb")).unwrap();
        store.put_all(StrMap::Forward, forward.iter().copied()).unwrap();
        store.put_all(StrMap::License, licenses.iter().copied()).unwrap();
        (dir, store)
    }

    #[test]
    fn one_row_per_forward_entry() {
        let (_dir, store) = store_with(
            &[("g1", "File:Foo.jpg"), ("g2", "Bar.png")],
            &[("g1", r#"{"file":"Foo.jpg","license":"Q10;Q11","status":"Q20"}"#)],
        );

        let rows: Vec<ExportRow> = ExportRows::new(&store)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].gnd_uri, "g1");
        assert_eq!(rows[0].file, "Foo.jpg");
        assert_eq!(rows[0].license_qids, vec!["Q10", "Q11"]);
        assert_eq!(rows[0].status_qids, vec!["Q20"]);
        assert_eq!(rows[1].gnd_uri, "g2");
        assert!(rows[1].license_qids.is_empty());
        assert!(rows[1].status_qids.is_empty());
    }

    #[test]
    fn rows_restart_from_the_beginning() {
        let (_dir, store) = store_with(&[("g1", "A.jpg"), ("g2", "B.jpg")], &[]);
        let first: Vec<_> = ExportRows::new(&store).unwrap().take(1).collect();
        let again: Vec<_> = ExportRows::new(&store).unwrap().collect();
        assert_eq!(first.len(), 1);
        assert_eq!(again.len(), 2);
    }

    #[test]
    fn unreadable_license_value_exports_empty_lists() {
        let (_dir, store) = store_with(&[("g1", "A.jpg")], &[("g1", "not json")]);
        let row = ExportRows::new(&store).unwrap().next().unwrap().unwrap();
        assert!(row.license_qids.is_empty());
        assert!(row.status_qids.is_empty());
    }

    #[test]
    fn write_ndjson_emits_lines_and_removes_temp_file() {
        let (dir, store) = store_with(
            &[("g1", "File:Foo.jpg"), ("g2", "Bar.png")],
            &[("g1", r#"{"file":"Foo.jpg","license":"Q10","status":"Q20"}"#)],
        );
        let out = dir.path().join("out").join("export.ndjson");
        let config = PipelineConfig {
            export_flush_interval: 1,
            ..PipelineConfig::default()
        };

        let count = write_ndjson(&store, &out, &config).unwrap();
        assert_eq!(count, 2);
        assert!(!temp_path(&out).exists());

        let content = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"{"gnd_uri":"g1","file":"Foo.jpg","license_qids":["Q10"],"status_qids":["Q20"]}"#,
                r#"{"gnd_uri":"g2","file":"Bar.png","license_qids":[],"status_qids":[]}"#,
            ]
        );
    }

    #[test]
    fn empty_forward_map_writes_empty_file() {
        let (dir, store) = store_with(&[], &[]);
        let out = dir.path().join("export.ndjson");
        assert_eq!(write_ndjson(&store, &out, &PipelineConfig::default()).unwrap(), 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "");
    }

    #[test]
    fn unwritable_destination_fails() {
        let (dir, store) = store_with(&[("g1", "A.jpg")], &[]);
        // a regular file where a directory is expected
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let out = blocker.join("export.ndjson");
        assert!(write_ndjson(&store, &out, &PipelineConfig::default()).is_err());
    }
}
