//! commons-licenses: joins GND authority records to Wikimedia Commons license data
//!
//! The pipeline turns a GND id -> Commons file concordance plus the Commons
//! media-info dump into one license record per GND id. Every stage is its own
//! command and hands data to the next through a single persistent store:
//!
//! 1. **Load** (optional) -- Fill the forward map (GND id -> file title) from a
//!    BEACON file
//! 2. **Reverse Index** -- Invert the forward map into canonical file key -> GND ids,
//!    de-duplicating ids per key
//! 3. **Join** -- Stream the (possibly compressed) JSON dump once, look up each
//!    entity's title in the reverse index and write its license and copyright
//!    status for every GND id that references it
//! 4. **Export** -- Emit one NDJSON line per forward-map entry
//!
//! A separate downloader fetches the dump with byte-range resume and SHA-256
//! verification.
//!
//! # Architecture
//!
//! - **Streaming JSON** -- Dump entities are decoded one at a time; memory is bounded
//!   by the reverse index plus the largest single entity
//! - **Batched commits** -- Each stage commits every N items, so an interrupted run
//!   loses at most one batch
//! - **Resumable join** -- A checkpoint committed with each license batch lets `join
//!   --resume` skip what is already stored
//! - **Canonical keys** -- Titles are compared after namespace stripping, separator
//!   folding and lowercasing
//!
//! # Key Modules
//!
//! - [`canon`] -- Canonical file keys and `;`-joined id sets
//! - [`store`] -- redb-backed persistent maps
//! - [`beacon`] -- BEACON concordance loader
//! - [`index`] -- Reverse index builder and in-memory lookup
//! - [`parser`] -- Streaming dump reader with gzip/bzip2 decompression
//! - [`join`] -- Dump joiner
//! - [`export`] -- NDJSON exporter
//! - [`download`] -- Resumable, digest-verified downloader
//! - [`models`] -- License records, export rows, media-info access
//! - [`checkpoint`] -- Join progress checkpointing
//! - [`stats`] -- Per-command counters
//! - [`config`] -- Constants and run settings
//! - [`error`] -- Errors callers match on
//!
//! # Example Usage
//!
//! ```bash
//! commons-licenses load-forward store.redb gnd-commons.beacon
//! commons-licenses build-rev store.redb
//! commons-licenses fetch https://dumps.wikimedia.org/other/wikibase/commonswiki/latest-mediainfo.json.gz dump.json.gz
//! commons-licenses join store.redb dump.json.gz --resume
//! commons-licenses export-json store.redb licenses.ndjson
//! ```

pub mod beacon;
pub mod canon;
pub mod checkpoint;
pub mod config;
pub mod download;
pub mod error;
pub mod export;
pub mod index;
pub mod join;
pub mod models;
pub mod parser;
pub mod stats;
pub mod store;
