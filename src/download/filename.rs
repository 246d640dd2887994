//! Filename sanitization, composition, and collision-free path reservation.
//!
//! Names follow `{title}_{ordinal}_{hint}{ext}`. The ordinal is fixed before
//! any worker runs, so two candidates never compose the same base name
//! unless a prior run already left a file there; that case is settled by
//! exclusive create in [`reserve_unique_path`].

use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::fs::OpenOptions;
use tracing::debug;
use url::Url;

use super::constants::{
    FALLBACK_TITLE, MAX_COLLISION_SUFFIX, MAX_EXTENSION_BYTES, MAX_FILE_NAME_BYTES,
    MAX_HINT_BYTES, MAX_TITLE_BYTES,
};

/// Replaces filesystem-illegal, control, and whitespace characters with `_`,
/// collapsing runs, then trims separators and trailing dots.
#[must_use]
pub fn sanitize_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_start_matches(['_', '.'])
        .trim_end_matches(['_', '.', ' '])
        .to_string()
}

/// Cuts `value` to at most `max` bytes without splitting a character.
#[must_use]
pub fn truncate_bytes(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Splits `name` into stem and extension (with dot) when the suffix looks
/// like a real extension: ASCII alphanumerics with at least one letter, so
/// version numbers such as `1.2` stay in the stem.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => {
            let ext = &name[pos..];
            let plausible = ext.len() > 1
                && ext.len() <= MAX_EXTENSION_BYTES
                && ext[1..].chars().all(|c| c.is_ascii_alphanumeric())
                && ext[1..].chars().any(|c| c.is_ascii_alphabetic());
            if plausible {
                (&name[..pos], Some(ext))
            } else {
                (name, None)
            }
        }
        _ => (name, None),
    }
}

/// Lower-cased extension of the URL's last path segment.
#[must_use]
pub fn extension_from_url(url: &str) -> Option<String> {
    let name = name_from_url(url)?;
    let (_, ext) = split_extension(&name);
    ext.map(str::to_lowercase)
}

/// Sanitized last path segment of `url`, if any.
#[must_use]
pub fn name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    let cleaned = sanitize_component(&decoded);
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Time-based name for attachments with no usable hint or URL segment.
#[must_use]
pub fn synthesized_name() -> String {
    format!("file_{}.bin", Local::now().timestamp())
}

/// Composes the base file name for one candidate.
///
/// The hint falls back to the URL's last segment, then to a synthesized
/// name. When the hint carries no extension the URL's is appended. If the
/// result exceeds [`MAX_FILE_NAME_BYTES`] only the title portion shrinks.
#[must_use]
pub fn compose_file_name(title: &str, ordinal: u32, hint: &str, url: &str) -> String {
    let hint = {
        let cleaned = sanitize_component(hint);
        if cleaned.is_empty() {
            name_from_url(url).unwrap_or_else(synthesized_name)
        } else {
            cleaned
        }
    };

    let (stem, ext) = split_extension(&hint);
    let ext = ext
        .map(str::to_string)
        .or_else(|| extension_from_url(url))
        .unwrap_or_default();
    let stem = truncate_bytes(stem, MAX_HINT_BYTES).trim_end_matches(['_', '.', ' ']);
    let stem = if stem.is_empty() { "attachment" } else { stem };

    let title = sanitize_component(title);
    let title = if title.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        title
    };
    let mut title = truncate_bytes(&title, MAX_TITLE_BYTES);

    let fixed = format!("_{ordinal}_{stem}{ext}");
    if title.len() + fixed.len() > MAX_FILE_NAME_BYTES {
        let room = MAX_FILE_NAME_BYTES.saturating_sub(fixed.len()).max(1);
        title = truncate_bytes(title, room);
    }

    format!("{title}{fixed}")
}

/// Reserves `dir/name`, or `dir/{stem}_{n}{ext}` for the first free `n`,
/// by creating the file exclusively.
///
/// Only `AlreadyExists` moves on to the next suffix; any other error is
/// returned as-is. The reserved file is left empty and closed.
///
/// # Errors
///
/// Returns the underlying I/O error, or `AlreadyExists` once every suffix up
/// to [`MAX_COLLISION_SUFFIX`] is taken.
pub async fn reserve_unique_path(dir: &Path, name: &str) -> io::Result<PathBuf> {
    let (stem, ext) = split_extension(name);
    let ext = ext.unwrap_or("");

    for suffix in 0..=MAX_COLLISION_SUFFIX {
        let candidate = if suffix == 0 {
            dir.join(name)
        } else {
            dir.join(format!("{stem}_{suffix}{ext}"))
        };

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => {
                if suffix > 0 {
                    debug!(name, suffix, "name taken, using suffixed path");
                }
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for '{name}' after {MAX_COLLISION_SUFFIX} suffixes"),
    ))
}
