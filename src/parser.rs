//! Single-pass reader over the Commons media-info JSON dump.
//!
//! The dump is either one top-level array of entities or a bare sequence of
//! objects (one per line in the NDJSON flavour). Entities are decoded one at
//! a time, so memory use is bounded by the largest single entity. An entry
//! that fails to parse is reported and skipped; the reader picks up again at
//! the next line.

use crate::config::READ_BUFFER_SIZE;
use anyhow::{bail, Context, Result};
use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};

/// Compression of a dump file, chosen from its name only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Bzip2,
    None,
}

impl Compression {
    pub fn from_path(path: &str) -> Self {
        if path.ends_with(".gz") {
            Compression::Gzip
        } else if path.ends_with(".bz2") {
            Compression::Bzip2
        } else {
            Compression::None
        }
    }
}

/// Opens `path`, transparently decompressing `.gz` and `.bz2` files.
pub fn open_maybe_compressed(path: &str) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("Failed to open dump: {}", path))?;
    let raw: Box<dyn Read> = match Compression::from_path(path) {
        Compression::Gzip => Box::new(MultiGzDecoder::new(BufReader::new(file))),
        Compression::Bzip2 => Box::new(MultiBzDecoder::new(BufReader::new(file))),
        Compression::None => Box::new(file),
    };
    Ok(Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, raw)))
}

/// One top-level item of the dump.
#[derive(Debug, Clone, PartialEq)]
pub enum DumpEntry {
    Entity(Value),
    /// Entry that failed to parse; the reader has moved past it
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayState {
    Start,
    AfterElement,
    AfterComma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// Not yet determined (nothing read)
    Unknown,
    /// Inside `[ ... ]`
    Array(ArrayState),
    /// Concatenated top-level values
    Sequence,
}

pub struct DumpReader {
    reader: Box<dyn BufRead>,
    layout: Layout,
    /// The last entry was malformed and the rest of its line was dropped
    resynced: bool,
    done: bool,
}

impl DumpReader {
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self::new(open_maybe_compressed(path)?))
    }

    pub fn new(reader: Box<dyn BufRead>) -> Self {
        Self {
            reader,
            layout: Layout::Unknown,
            resynced: false,
            done: false,
        }
    }

    /// Reads and discards up to `n` entries; returns how many were skipped.
    pub fn skip_records(&mut self, n: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < n {
            match self.next() {
                Some(entry) => {
                    entry?;
                    skipped += 1;
                }
                None => break,
            }
        }
        Ok(skipped)
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        loop {
            let buf = self.reader.fill_buf()?;
            let Some(&b) = buf.first() else {
                return Ok(None);
            };
            if b.is_ascii_whitespace() {
                self.reader.consume(1);
                continue;
            }
            // UTF-8 byte order mark at the very start
            if b == 0xEF && self.layout == Layout::Unknown && buf.starts_with(b"\xEF\xBB\xBF") {
                self.reader.consume(3);
                continue;
            }
            return Ok(Some(b));
        }
    }

    /// Discards input up to and including the next newline.
    fn skip_line(&mut self) -> io::Result<()> {
        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(());
            }
            match memchr::memchr(b'\n', buf) {
                Some(pos) => {
                    self.reader.consume(pos + 1);
                    return Ok(());
                }
                None => {
                    let len = buf.len();
                    self.reader.consume(len);
                }
            }
        }
    }

    /// Reads a bare number without looking past its last byte.
    fn read_number(&mut self) -> Result<DumpEntry> {
        let mut token = Vec::new();
        loop {
            let buf = self.reader.fill_buf()?;
            let len = buf
                .iter()
                .take_while(|&&b| matches!(b, b'0'..=b'9' | b'+' | b'-' | b'.' | b'e' | b'E'))
                .count();
            token.extend_from_slice(&buf[..len]);
            let more = len > 0 && len == buf.len();
            self.reader.consume(len);
            if !more {
                break;
            }
        }
        Ok(match serde_json::from_slice::<Value>(&token) {
            Ok(value) => DumpEntry::Entity(value),
            Err(e) => DumpEntry::Malformed(e.to_string()),
        })
    }

    /// Decodes the entry starting with `first`.
    ///
    /// Syntax errors inside an entry are recoverable: the rest of the line is
    /// dropped and the entry is reported as malformed. I/O failures and input
    /// ending mid-entry are not.
    fn read_entry(&mut self, first: u8) -> Result<DumpEntry> {
        if first == b'-' || first.is_ascii_digit() {
            return self.read_number();
        }
        let parsed = {
            let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
            Value::deserialize(&mut de)
        };
        match parsed {
            Ok(value) => Ok(DumpEntry::Entity(value)),
            Err(e) if e.is_syntax() || e.is_data() => {
                // column 0: the offending byte was the newline itself
                if e.column() != 0 {
                    self.skip_line()?;
                }
                self.resynced = true;
                Ok(DumpEntry::Malformed(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Positions the reader at the start of the next entry and returns its
    /// first byte, or `None` at end of input.
    fn advance(&mut self) -> Result<Option<u8>> {
        loop {
            let Some(b) = self.peek_byte()? else {
                if let Layout::Array(_) = self.layout {
                    bail!("Unexpected end of dump: unterminated top-level array");
                }
                return Ok(None);
            };

            match self.layout {
                Layout::Unknown => {
                    if b == b'[' {
                        self.reader.consume(1);
                        self.layout = Layout::Array(ArrayState::Start);
                    } else {
                        self.layout = Layout::Sequence;
                    }
                }
                Layout::Array(state) => match (state, b) {
                    (ArrayState::AfterComma, b']') => {
                        bail!("Trailing ',' before end of top-level array")
                    }
                    (_, b']') => {
                        self.reader.consume(1);
                        if self.peek_byte()?.is_some() {
                            bail!("Unexpected data after the top-level array");
                        }
                        return Ok(None);
                    }
                    (ArrayState::AfterElement, b',') => {
                        self.reader.consume(1);
                        self.layout = Layout::Array(ArrayState::AfterComma);
                        self.resynced = false;
                    }
                    (_, b',') => bail!("Unexpected ',' in top-level array"),
                    // a dropped line may have carried the separator
                    (ArrayState::AfterElement, _) if !self.resynced => bail!(
                        "Expected ',' or ']' between dump entities, found {:?}",
                        b as char
                    ),
                    _ => {
                        self.layout = Layout::Array(ArrayState::AfterElement);
                        self.resynced = false;
                        return Ok(Some(b));
                    }
                },
                Layout::Sequence => {
                    self.resynced = false;
                    return Ok(Some(b));
                }
            }
        }
    }
}

impl Iterator for DumpReader {
    type Item = Result<DumpEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = self.advance().and_then(|first| match first {
            Some(b) => self.read_entry(b).map(Some),
            None => Ok(None),
        });
        match step {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    fn reader(text: &str) -> DumpReader {
        DumpReader::new(Box::new(Cursor::new(text.as_bytes().to_vec())))
    }

    /// Titles in read order, `!` for a malformed entry.
    fn titles(text: &str) -> Vec<String> {
        reader(text)
            .map(|entry| match entry.unwrap() {
                DumpEntry::Entity(v) => v["title"].as_str().unwrap_or_default().to_string(),
                DumpEntry::Malformed(_) => "!".to_string(),
            })
            .collect()
    }

    #[test]
    fn compression_from_suffix() {
        assert_eq!(Compression::from_path("dump.json.gz"), Compression::Gzip);
        assert_eq!(Compression::from_path("dump.json.bz2"), Compression::Bzip2);
        assert_eq!(Compression::from_path("dump.json"), Compression::None);
        assert_eq!(Compression::from_path("dump.gz.json"), Compression::None);
    }

    #[test]
    fn reads_top_level_array() {
        let text = r#"[
            {"title": "File:A.jpg"},
            {"title": "File:B.jpg", "statements": {"P275": []}}
        ]"#;
        assert_eq!(titles(text), vec!["File:A.jpg", "File:B.jpg"]);
    }

    #[test]
    fn reads_object_sequence() {
        let text = "{\"title\":\"A\"}\n{\"title\":\"B\"}{\"title\":\"C\"}\n\n";
        assert_eq!(titles(text), vec!["A", "B", "C"]);
    }

    #[test]
    fn empty_inputs_yield_nothing() {
        assert!(titles("").is_empty());
        assert!(titles("  \n").is_empty());
        assert!(titles("[]").is_empty());
        assert!(titles(" [ \n ] \n").is_empty());
    }

    #[test]
    fn skips_byte_order_mark() {
        assert_eq!(titles("\u{FEFF}[{\"title\":\"A\"}]"), vec!["A"]);
    }

    #[test]
    fn malformed_line_is_skipped() {
        let text = "{\"title\":\"A\"}\n{\"title\": }\n{\"title\":\"C\"}\n";
        assert_eq!(titles(text), vec!["A", "!", "C"]);
    }

    #[test]
    fn malformed_array_element_is_skipped() {
        let text = "[\n{\"title\":\"A\"},\n{\"title\": },\n{\"title\":\"C\"}\n]";
        assert_eq!(titles(text), vec!["A", "!", "C"]);

        let leading_commas = "[\n{\"title\":\"A\"}\n,{\"title\": }\n,{\"title\":\"C\"}\n]";
        assert_eq!(titles(leading_commas), vec!["A", "!", "C"]);
    }

    #[test]
    fn raw_newline_in_string_keeps_next_line() {
        let text = "{\"title\":\"A\n{\"title\":\"B\"}\n";
        assert_eq!(titles(text), vec!["!", "B"]);
    }

    #[test]
    fn malformed_last_element_leaves_array_unterminated() {
        let mut r = reader("[{\"title\":\"A\"}, {\"title\": }]");
        assert!(matches!(r.next(), Some(Ok(DumpEntry::Entity(_)))));
        assert!(matches!(r.next(), Some(Ok(DumpEntry::Malformed(_)))));
        assert!(r.next().unwrap().is_err());
        assert!(r.next().is_none());
    }

    #[test]
    fn scalar_entries_keep_separators_intact() {
        let entries: Vec<DumpEntry> = reader("[1,{\"title\":\"A\"},-2.5e3,\"x\",null]")
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            entries,
            vec![
                DumpEntry::Entity(json!(1)),
                DumpEntry::Entity(json!({"title": "A"})),
                DumpEntry::Entity(json!(-2500.0)),
                DumpEntry::Entity(json!("x")),
                DumpEntry::Entity(Value::Null),
            ]
        );
        assert_eq!(titles("7\n{\"title\":\"A\"}\n"), vec!["", "A"]);
    }

    #[test]
    fn truncated_entity_is_an_error() {
        let results: Vec<_> = reader("{\"title\":\"A\"}\n{\"title\":\"B").collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn leading_comma_is_an_error() {
        let mut r = reader("[,{\"title\":\"A\"}]");
        assert!(r.next().unwrap().is_err());
        assert!(r.next().is_none());
    }

    #[test]
    fn unterminated_array_is_an_error() {
        let results: Vec<_> = reader("[{\"title\":\"A\"}").collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn trailing_comma_is_an_error() {
        let results: Vec<_> = reader("[{\"title\":\"A\"},]").collect();
        assert!(results.last().unwrap().is_err());
    }

    #[test]
    fn missing_separator_is_an_error() {
        let results: Vec<_> = reader("[{\"title\":\"A\"} {\"title\":\"B\"}]").collect();
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn skip_records_consumes_entities() {
        let mut r = reader("[{\"title\":\"A\"},{\"title\":\"B\"},{\"title\":\"C\"}]");
        assert_eq!(r.skip_records(2).unwrap(), 2);
        let next = r.next().unwrap().unwrap();
        assert_eq!(next, DumpEntry::Entity(json!({"title": "C"})));
        assert_eq!(r.skip_records(5).unwrap(), 0);
    }

    #[test]
    fn opens_gzip_and_bzip2_by_suffix() {
        let dir = TempDir::new().unwrap();
        let text = b"[{\"title\":\"A\"},{\"title\":\"B\"}]";

        let gz_path = dir.path().join("dump.json.gz");
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        gz.write_all(text).unwrap();
        std::fs::write(&gz_path, gz.finish().unwrap()).unwrap();

        let bz_path = dir.path().join("dump.json.bz2");
        let mut bz = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::fast());
        bz.write_all(text).unwrap();
        std::fs::write(&bz_path, bz.finish().unwrap()).unwrap();

        for path in [&gz_path, &bz_path] {
            let values: Vec<_> = DumpReader::open(path.to_str().unwrap())
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
            assert_eq!(values.len(), 2);
        }
    }

    #[test]
    fn compressed_suffix_on_plain_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.json.gz");
        std::fs::write(&path, b"[{\"title\":\"A\"}]").unwrap();

        let mut r = DumpReader::open(path.to_str().unwrap()).unwrap();
        assert!(r.next().unwrap().is_err());
    }

    #[test]
    fn missing_file_fails_to_open() {
        assert!(DumpReader::open("/nonexistent/dump.json").is_err());
    }
}
