//! Title canonicalization and the `;`-encoded id sets stored in the maps.
//!
//! The reverse-index builder and the dump joiner must derive keys through
//! [`canonical_key`] alone; any divergence between the two sides silently
//! drops matches.

use crate::config::NAMESPACE_MAX_PREFIX;
use memchr::memmem;
use rustc_hash::FxHashSet;

pub const ID_SEPARATOR: char = ';';

const NBSP: char = '\u{00A0}';

/// Drops a leading `Namespace:` prefix, e.g. `File:Foo.jpg` -> `Foo.jpg`.
///
/// Only a colon within the first [`NAMESPACE_MAX_PREFIX`] characters counts,
/// so names that merely contain a colon further in are left alone.
pub fn strip_namespace(title: &str) -> &str {
    let trimmed = title.trim();
    let colon = trimmed
        .char_indices()
        .take(NAMESPACE_MAX_PREFIX)
        .enumerate()
        .find(|(_, (_, c))| *c == ':');

    match colon {
        Some((pos, (byte_idx, _))) if pos > 0 => trimmed[byte_idx + 1..].trim(),
        _ => trimmed,
    }
}

/// Join key for a file title, or `None` if nothing is left after normalization.
///
/// The namespace is stripped from the raw title and once more after `_` and
/// NBSP become spaces, so `File:Foo: bar.jpg` and `Foo: bar.jpg` share a key.
pub fn canonical_key(title: &str) -> Option<String> {
    let spaced = strip_namespace(title).replace(['_', NBSP], " ");
    let stripped = strip_namespace(&spaced);
    if stripped.is_empty() {
        return None;
    }
    Some(stripped.to_lowercase())
}

/// Whether `id` occurs as a whole token of the `;`-joined `set`.
pub fn contains_id(set: &str, id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    let hay = set.as_bytes();
    let sep = ID_SEPARATOR as u8;

    memmem::find_iter(hay, id.as_bytes()).any(|start| {
        let end = start + id.len();
        let left_ok = start == 0 || hay[start - 1] == sep;
        let right_ok = end == hay.len() || hay[end] == sep;
        left_ok && right_ok
    })
}

/// Adds `id` to an existing set value.
///
/// Returns the new value to store, or `None` when `id` is already a member.
pub fn merge_id(existing: Option<&str>, id: &str) -> Option<String> {
    match existing {
        None | Some("") => Some(id.to_string()),
        Some(set) if contains_id(set, id) => None,
        Some(set) => {
            let mut merged = String::with_capacity(set.len() + 1 + id.len());
            merged.push_str(set);
            merged.push(ID_SEPARATOR);
            merged.push_str(id);
            Some(merged)
        }
    }
}

/// Joins ids with `;`, keeping the first occurrence of each.
pub fn dedup_join<I, S>(ids: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = FxHashSet::default();
    let mut out = String::new();
    for id in ids {
        let id = id.as_ref();
        if !seen.insert(id.to_string()) {
            continue;
        }
        if !out.is_empty() {
            out.push(ID_SEPARATOR);
        }
        out.push_str(id);
    }
    out
}

/// Iterates the non-empty members of a `;`-joined set.
pub fn split_ids(set: &str) -> impl Iterator<Item = &str> {
    set.split(ID_SEPARATOR)
        .map(str::trim)
        .filter(|id| !id.is_empty())
}
