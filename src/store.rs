//! The persistent store shared by all pipeline stages.
//!
//! One redb file holds every map. Stages hand data to each other only through
//! this file, so each command can be rerun on its own. Writes become durable
//! at `commit()`; an interrupted command loses at most its open batch.

use crate::config::{MAP_FILE_TO_GNDS, MAP_GND_TO_FILE, MAP_GND_TO_LICENSE, MAP_META};
use anyhow::{Context, Result};
use redb::{
    Database, ReadTransaction, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use std::path::{Path, PathBuf};
use tracing::info;

pub type StrMapDef = TableDefinition<'static, &'static str, &'static str>;

pub const GND_TO_FILE: StrMapDef = TableDefinition::new(MAP_GND_TO_FILE);
pub const FILE_TO_GNDS: StrMapDef = TableDefinition::new(MAP_FILE_TO_GNDS);
pub const GND_TO_LICENSE: StrMapDef = TableDefinition::new(MAP_GND_TO_LICENSE);
pub const META: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new(MAP_META);

/// The string-valued maps, addressable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrMap {
    Forward,
    Reverse,
    License,
}

impl StrMap {
    pub fn definition(self) -> StrMapDef {
        match self {
            StrMap::Forward => GND_TO_FILE,
            StrMap::Reverse => FILE_TO_GNDS,
            StrMap::License => GND_TO_LICENSE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StrMap::Forward => MAP_GND_TO_FILE,
            StrMap::Reverse => MAP_FILE_TO_GNDS,
            StrMap::License => MAP_GND_TO_LICENSE,
        }
    }
}

pub struct Store {
    db: Database,
    path: PathBuf,
}

impl Store {
    /// Opens the store, creating the file and any missing maps.
    ///
    /// The file is locked for the lifetime of the returned value; a second
    /// open of the same path fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(path)
            .with_context(|| format!("Failed to open store: {:?}", path))?;

        let txn = db.begin_write()?;
        txn.open_table(GND_TO_FILE)?;
        txn.open_table(FILE_TO_GNDS)?;
        txn.open_table(GND_TO_LICENSE)?;
        txn.open_table(META)?;
        txn.commit().context("Failed to initialise store maps")?;

        info!(path = ?path, "Store opened");

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<ReadTransaction> {
        self.db
            .begin_read()
            .context("Failed to begin read transaction")
    }

    pub fn write(&self) -> Result<WriteTransaction> {
        self.db
            .begin_write()
            .context("Failed to begin write transaction")
    }

    pub fn len(&self, map: StrMap) -> Result<u64> {
        let txn = self.read()?;
        let table = txn.open_table(map.definition())?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self, map: StrMap) -> Result<bool> {
        Ok(self.len(map)? == 0)
    }

    pub fn get(&self, map: StrMap, key: &str) -> Result<Option<String>> {
        let txn = self.read()?;
        let table = txn.open_table(map.definition())?;
        let value = table.get(key)?.map(|guard| guard.value().to_string());
        Ok(value)
    }

    /// Inserts all pairs in one commit; later pairs overwrite earlier ones.
    pub fn put_all<K, V, I>(&self, map: StrMap, entries: I) -> Result<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let txn = self.write()?;
        let mut count = 0u64;
        {
            let mut table = txn.open_table(map.definition())?;
            for (key, value) in entries {
                table.insert(key.as_ref(), value.as_ref())?;
                count += 1;
            }
        }
        txn.commit()
            .with_context(|| format!("Failed to commit map '{}'", map.name()))?;
        Ok(count)
    }

    /// Snapshot of a whole map in key order. Meant for small maps and tests.
    pub fn entries(&self, map: StrMap) -> Result<Vec<(String, String)>> {
        let txn = self.read()?;
        let table = txn.open_table(map.definition())?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            out.push((key.value().to_string(), value.value().to_string()));
        }
        Ok(out)
    }
}
