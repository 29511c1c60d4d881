//! Shared helpers for formatting output, quoting shell words and
//! resolving wildcard artifact paths.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};

/// Formats a duration in seconds into a human-readable string.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(format_duration(3661), "1h 1m 1s");
/// assert_eq!(format_duration(61), "1m 1s");
/// assert_eq!(format_duration(30), "30s");
/// ```
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    match (hours, minutes) {
        (0, 0) => format!("{}s", secs),
        (0, _) => format!("{}m {}s", minutes, secs),
        _ => format!("{}h {}m {}s", hours, minutes, secs),
    }
}

/// Truncates a string to a maximum length, appending "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_len {
        return Cow::Borrowed(s);
    }
    if max_len <= 3 {
        return Cow::Owned(s.chars().take(max_len).collect());
    }
    let head: String = s.chars().take(max_len - 3).collect();
    Cow::Owned(format!("{}...", head))
}

/// Quotes a word for POSIX shells. Plain words are passed through unchanged.
pub fn shell_quote(s: &str) -> Cow<'_, str> {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("'{}'", s.replace('\'', "'\\''")))
    }
}

/// Expands `*` and `?` wildcards in the file-name component of `pattern`.
///
/// Directory components are taken literally. Matches are returned sorted.
/// A pattern without wildcards yields the path itself if it exists.
pub fn expand_wildcard(pattern: &str) -> Result<Vec<PathBuf>> {
    let expanded = shellexpand::tilde(pattern);
    let path = Path::new(expanded.as_ref());

    let file_pattern = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| HarnessError::Config(format!("Invalid artifact path '{}'", pattern)))?;

    if !file_pattern.contains(['*', '?']) {
        return Ok(if path.exists() {
            vec![path.to_path_buf()]
        } else {
            Vec::new()
        });
    }

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let regex = wildcard_regex(file_pattern)?;
    let mut matches = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if regex.is_match(name) {
                matches.push(entry.path());
            }
        }
    }
    matches.sort();
    Ok(matches)
}

fn wildcard_regex(pattern: &str) -> Result<regex_lite::Regex> {
    let mut source = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex_lite::escape(&other.to_string())),
        }
    }
    source.push('$');
    regex_lite::Regex::new(&source)
        .map_err(|e| HarnessError::Config(format!("Invalid wildcard '{}': {}", pattern, e)))
}
