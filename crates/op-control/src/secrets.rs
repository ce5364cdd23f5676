//! Structure-preserving `.env` merge and bulk secrets editing
//! (spec §4.8).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;

use crate::error::{Error, Result};

const MAX_SECRETS_BYTES: usize = 64 * 1024;

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value.contains('#')
        || value.contains('\'')
        || value.contains('"')
        || value.contains('\\')
        || value.contains('\n')
        || value.contains('\r')
        || value.contains('=')
        || value.starts_with(' ')
        || value.ends_with(' ')
}

/// Quote a value for writing: single quotes (literal) preferred, falling
/// back to double quotes with `\n`/`\r` escapes when the value itself
/// contains a single quote or a line break that a literal single-quoted
/// span would otherwise embed as-is, splitting one entry across lines.
fn quote_value(value: &str) -> String {
    if !needs_quoting(value) {
        return value.to_string();
    }
    if !value.contains('\'') && !value.contains('\n') && !value.contains('\r') {
        return format!("'{value}'");
    }
    let escaped = value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn unquote_value(raw: &str) -> String {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return raw[1..raw.len() - 1].to_string();
    }
    if bytes.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        let inner = &raw[1..raw.len() - 1];
        return inner
            .replace("\\n", "\n")
            .replace("\\r", "\r")
            .replace("\\\"", "\"")
            .replace("\\\\", "\\");
    }
    raw.to_string()
}

/// Parse a `.env`-family file into key/value pairs, ignoring blank and
/// comment lines, and unquoting values written by [`merge`].
pub fn parse(raw: &str) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    for line in raw.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = trimmed.split_once('=') {
            result.insert(key.to_string(), unquote_value(value));
        }
    }
    result
}

/// Structure-preserving merge: rewrite matching keys in place, append
/// unmatched ones at the end, never touch unrelated lines, comments, or
/// ordering.
pub fn merge(raw: &str, updates: &BTreeMap<String, String>, uncomment: bool) -> String {
    let mut remaining = updates.clone();
    let mut lines: Vec<String> = raw.lines().map(str::to_string).collect();

    for line in lines.iter_mut() {
        if remaining.is_empty() {
            break;
        }
        let leading_ws: String = line.chars().take_while(|c| c.is_whitespace()).collect();
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            continue;
        }

        let (is_comment, content) = if let Some(stripped) = trimmed.strip_prefix('#') {
            (true, stripped.trim_start())
        } else {
            (false, trimmed)
        };

        if is_comment && !uncomment {
            continue;
        }

        let Some((key, _)) = content.split_once('=') else {
            continue;
        };

        if let Some(value) = remaining.remove(key) {
            *line = format!("{leading_ws}{key}={}", quote_value(&value));
        }
    }

    let mut result = lines.join("\n");
    if !remaining.is_empty() {
        if !result.is_empty() {
            result.push('\n');
        }
        for (key, value) in &remaining {
            result.push_str(&format!("{key}={}\n", quote_value(value)));
        }
        result = result.trim_end_matches('\n').to_string();
    }
    result
}

static KEY_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

fn key_regex() -> Regex {
    Regex::new(KEY_PATTERN).expect("static regex is valid")
}

/// Read the raw bytes of the canonical secrets file, enforcing the size
/// bound.
pub fn read_secrets_raw(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)?;
    if raw.len() > MAX_SECRETS_BYTES {
        return Err(Error::Validation(format!(
            "secrets file exceeds {MAX_SECRETS_BYTES} bytes"
        )));
    }
    Ok(raw)
}

/// Validate and write the raw bytes of the canonical secrets file: size
/// bound, every non-comment line contains `=`, every key matches
/// `[A-Za-z_][A-Za-z0-9_]*`.
pub fn write_secrets_raw(path: &Path, raw: &str) -> Result<()> {
    if raw.len() > MAX_SECRETS_BYTES {
        return Err(Error::Validation(format!(
            "secrets file exceeds {MAX_SECRETS_BYTES} bytes"
        )));
    }

    let key_re = key_regex();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, _)) = trimmed.split_once('=') else {
            return Err(Error::Validation(format!("line missing '=': {trimmed}")));
        };
        if !key_re.is_match(key) {
            return Err(Error::Validation(format!("invalid key: {key}")));
        }
    }

    with_path_lock(path, || {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, raw)?;
        Ok(())
    })
}

/// Merge `updates` into the live file at `path`, holding a per-path lock
/// so concurrent admin mutations on the same file serialize (spec §5
/// "File-serialization").
pub fn merge_into_file(path: &Path, updates: &BTreeMap<String, String>, uncomment: bool) -> Result<()> {
    with_path_lock(path, || {
        let raw = if path.exists() { std::fs::read_to_string(path)? } else { String::new() };
        let merged = merge(&raw, updates, uncomment);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, merged)?;
        Ok(())
    })
}

static PATH_LOCKS: Mutex<Option<std::collections::HashMap<PathBuf, Arc<Mutex<()>>>>> = Mutex::new(None);

/// Run `f` while holding the lock scoped to `path`, so concurrent writers
/// to the same `.env`-family file serialize without blocking writers to
/// other files.
fn with_path_lock<T>(path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let mutex = {
        let mut table = PATH_LOCKS.lock();
        let map = table.get_or_insert_with(std::collections::HashMap::new);
        Arc::clone(map.entry(path.to_path_buf()).or_insert_with(|| Arc::new(Mutex::new(()))))
    };
    let _guard = mutex.lock();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_merge_round_trip_preserves_structure() {
        let raw = "# header comment\nFOO=bar\n\nBAZ=qux\n";
        let mut updates = BTreeMap::new();
        updates.insert("FOO".to_string(), "new-value".to_string());
        let merged = merge(raw, &updates, false);

        assert!(merged.contains("# header comment"));
        assert!(merged.contains("FOO=new-value"));
        assert!(merged.contains("BAZ=qux"));
        assert_eq!(parse(&merged).get("FOO").unwrap(), "new-value");
    }

    #[test]
    fn property_5_merge_round_trip_equals_union() {
        let raw = "A=1\nB=2\n";
        let mut updates = BTreeMap::new();
        updates.insert("B".to_string(), "22".to_string());
        updates.insert("C".to_string(), "3".to_string());

        let merged = merge(raw, &updates, false);
        let parsed = parse(&merged);

        let mut expected = parse(raw);
        for (k, v) in &updates {
            expected.insert(k.clone(), v.clone());
        }
        assert_eq!(parsed, expected);
    }

    #[test]
    fn unmatched_keys_are_appended() {
        let raw = "A=1\n";
        let mut updates = BTreeMap::new();
        updates.insert("NEW_KEY".to_string(), "value".to_string());
        let merged = merge(raw, &updates, false);
        assert!(merged.contains("NEW_KEY=value"));
        assert!(merged.contains("A=1"));
    }

    #[test]
    fn uncomment_activates_matching_commented_key() {
        let raw = "# SECRET=placeholder\n";
        let mut updates = BTreeMap::new();
        updates.insert("SECRET".to_string(), "real-value".to_string());
        let merged = merge(raw, &updates, true);
        assert!(!merged.trim_start().starts_with('#'));
        assert!(merged.contains("SECRET=real-value"));
    }

    #[test]
    fn comment_is_preserved_when_uncomment_disabled() {
        let raw = "# SECRET=placeholder\n";
        let mut updates = BTreeMap::new();
        updates.insert("SECRET".to_string(), "real-value".to_string());
        let merged = merge(raw, &updates, false);
        assert!(merged.contains("# SECRET=placeholder"));
        assert!(merged.contains("SECRET=real-value"));
    }

    #[test]
    fn property_6_value_with_special_characters_round_trips() {
        for v in ["has space", "has#hash", "has=equals", "has'quote", "line1\nline2", "trailing "] {
            let mut updates = BTreeMap::new();
            updates.insert("K".to_string(), v.to_string());
            let merged = merge("", &updates, false);
            assert_eq!(parse(&merged).get("K").unwrap(), v, "round-trip failed for {v:?}");
        }
    }

    #[test]
    fn quoting_prefers_single_quotes_unless_value_contains_one() {
        assert_eq!(quote_value("plain"), "plain");
        assert_eq!(quote_value("has space"), "'has space'");
        assert!(quote_value("it's quoted").starts_with('"'));
    }

    #[test]
    fn write_secrets_raw_rejects_missing_equals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        let result = write_secrets_raw(&path, "NOTVALID\n");
        assert!(result.is_err());
    }

    #[test]
    fn write_secrets_raw_rejects_invalid_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        let result = write_secrets_raw(&path, "1BAD=value\n");
        assert!(result.is_err());
    }

    #[test]
    fn write_secrets_raw_accepts_valid_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        write_secrets_raw(&path, "# comment\nGOOD_KEY=value\n").unwrap();
        assert_eq!(read_secrets_raw(&path).unwrap(), "# comment\nGOOD_KEY=value\n");
    }

    #[test]
    fn write_secrets_raw_rejects_oversized_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        let oversized = "K=".to_string() + &"x".repeat(MAX_SECRETS_BYTES + 1);
        let result = write_secrets_raw(&path, &oversized);
        assert!(result.is_err());
    }

    #[test]
    fn merge_into_file_creates_then_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/service.env");
        let mut updates = BTreeMap::new();
        updates.insert("A".to_string(), "1".to_string());
        merge_into_file(&path, &updates, false).unwrap();

        let mut updates2 = BTreeMap::new();
        updates2.insert("A".to_string(), "2".to_string());
        merge_into_file(&path, &updates2, false).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(parse(&contents).get("A").unwrap(), "2");
    }
}
