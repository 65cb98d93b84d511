//! Idempotent edits of line-oriented `key=value` configuration files.
//!
//! A line matches a key when it contains `=` and the text before the first
//! `=`, trimmed and with one leading `#` removed, equals the key. So both
//! `key=value` and `#key=value` are recognised as the directive for `key`.
//!
//! Existing files are rewritten into a temporary file next to them and renamed
//! over the original, so a failed edit never leaves a half-written file.
//! Rewritten and appended lines use the file's own line terminator (`\n` or
//! `\r\n`).

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// What to do with the line of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlainAction {
    /// Replace the line with `key=value`, appending it if the key is absent.
    Assign(String),
    /// Make sure the line is commented out.
    Comment,
    /// Make sure the line is active.
    UnComment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainChange {
    pub key: String,
    pub action: PlainAction,
}

impl PlainChange {
    pub fn assign(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            action: PlainAction::Assign(value.into()),
        }
    }

    pub fn comment(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            action: PlainAction::Comment,
        }
    }

    pub fn uncomment(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            action: PlainAction::UnComment,
        }
    }
}

/// Apply `changes` to `path` one after another, in order.
pub fn apply_changes(path: &Path, changes: &[PlainChange]) -> Result<()> {
    for change in changes {
        upsert(path, &change.key, &change.action)?;
    }
    Ok(())
}

/// Apply a single action for `key` to the file at `path`.
///
/// A missing file is created (with its parent directories) holding just
/// `key=value`. Comment directives against a missing file do nothing.
pub fn upsert(path: &Path, key: &str, action: &PlainAction) -> Result<()> {
    if !path.is_file() {
        return create_with(path, key, action);
    }

    let input = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(input);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut replacement = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;

    {
        let mut out = BufWriter::new(replacement.as_file_mut());
        let mut found = false;
        let mut ends_with_newline = true;
        let mut newline: Option<&'static str> = None;
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if read == 0 {
                break;
            }
            ends_with_newline = line.ends_with('\n');
            if newline.is_none() {
                newline = line_ending(&line);
            }

            if !line_matches(&line, key) {
                out.write_all(line.as_bytes())?;
                continue;
            }
            found = true;
            match action {
                PlainAction::UnComment => {
                    out.write_all(line.strip_prefix('#').unwrap_or(&line).as_bytes())?
                }
                PlainAction::Comment => {
                    if !line.starts_with('#') {
                        out.write_all(b"#")?;
                    }
                    out.write_all(line.as_bytes())?;
                }
                PlainAction::Assign(value) => {
                    let eol = line_ending(&line).or(newline).unwrap_or("\n");
                    write!(out, "{}={}{}", key, value, eol)?
                }
            }
        }

        if let (false, PlainAction::Assign(value)) = (found, action) {
            let eol = newline.unwrap_or("\n");
            if !ends_with_newline {
                out.write_all(eol.as_bytes())?;
            }
            write!(out, "{}={}{}", key, value, eol)?;
            debug!(file = %path.display(), key, "appended");
        }
        out.flush()
            .with_context(|| format!("Failed to write replacement for {}", path.display()))?;
    }

    let permissions = fs::metadata(path)?.permissions();
    fs::set_permissions(replacement.path(), permissions)?;
    replacement
        .persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

fn create_with(path: &Path, key: &str, action: &PlainAction) -> Result<()> {
    let PlainAction::Assign(value) = action else {
        debug!(file = %path.display(), key, "file absent, nothing to comment");
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let mut out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writeln!(out, "{}={}", key, value)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(file = %path.display(), key, "created");
    Ok(())
}

fn line_ending(line: &str) -> Option<&'static str> {
    if line.ends_with("\r\n") {
        Some("\r\n")
    } else if line.ends_with('\n') {
        Some("\n")
    } else {
        None
    }
}

fn line_matches(line: &str, key: &str) -> bool {
    let Some((lhs, _)) = line.split_once('=') else {
        return false;
    };
    let lhs = lhs.trim();
    lhs.strip_prefix('#').unwrap_or(lhs).trim() == key
}
