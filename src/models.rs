use crate::canon::{split_ids, strip_namespace};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value stored per GND id in the license map.
///
/// `license` and `status` are `;`-joined, de-duplicated reference ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRecord {
    pub file: String,
    pub license: String,
    pub status: String,
}

impl LicenseRecord {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// One line of the NDJSON export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRow {
    pub gnd_uri: String,
    pub file: String,
    pub license_qids: Vec<String>,
    pub status_qids: Vec<String>,
}

impl ExportRow {
    pub fn new(gnd: &str, file_title: &str, record: Option<&LicenseRecord>) -> Self {
        let ids = |set: Option<&str>| -> Vec<String> {
            set.map(|s| split_ids(s).map(str::to_string).collect())
                .unwrap_or_default()
        };
        Self {
            gnd_uri: gnd.to_string(),
            file: strip_namespace(file_title).to_string(),
            license_qids: ids(record.map(|r| r.license.as_str())),
            status_qids: ids(record.map(|r| r.status.as_str())),
        }
    }
}

/// Why a dump entry could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordDefect {
    NotAnObject,
    MissingTitle,
    TitleNotString,
}

/// Typed read access to one media-info entity of the dump.
///
/// Missing or oddly shaped statement data reads as "no ids"; only the title
/// is mandatory.
#[derive(Debug, Clone, Copy)]
pub struct MediaInfo<'a> {
    title: &'a str,
    statements: Option<&'a Value>,
}

impl<'a> MediaInfo<'a> {
    pub fn from_value(value: &'a Value) -> Result<Self, RecordDefect> {
        let obj = value.as_object().ok_or(RecordDefect::NotAnObject)?;
        let title = match obj.get("title") {
            None | Some(Value::Null) => return Err(RecordDefect::MissingTitle),
            Some(Value::String(s)) => s.as_str(),
            Some(_) => return Err(RecordDefect::TitleNotString),
        };
        Ok(Self {
            title,
            statements: obj.get("statements"),
        })
    }

    pub fn title(&self) -> &'a str {
        self.title
    }

    /// Entity ids referenced by the statements of `property`, in dump order.
    ///
    /// Each statement carries its value at `mainsnak.datavalue.value.id`.
    pub fn item_ids(&self, property: &str) -> Vec<String> {
        let Some(Value::Array(statements)) = self.statements.and_then(|s| s.get(property))
        else {
            return Vec::new();
        };

        statements
            .iter()
            .filter_map(|statement| {
                let id = lookup(statement, &["mainsnak", "datavalue", "value", "id"])?;
                match id {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                }
            })
            .collect()
    }
}

/// Follows object keys; `None` at the first missing key or non-object.
fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, key| current.as_object()?.get(*key))
}
