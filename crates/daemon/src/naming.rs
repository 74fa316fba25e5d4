//! Naming rules for published files.
//!
//! Every final path handed out by the ingestion pipeline goes through
//! [`secure_join`], so no client-supplied name can place a file outside its
//! library root.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Alphabet for short ids (no 0/O, 1/I/l look-alikes).
const SHORT_ID_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Length of a short id; 57^22 covers the full 128-bit space.
pub const SHORT_ID_LEN: usize = 22;

/// Longest stem kept from a client name, leaving room for a collision
/// suffix and extension within common 255-byte name limits.
const MAX_STEM_BYTES: usize = 200;

/// Errors from joining a name onto a root.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    /// Name is empty after sanitization
    #[error("Empty file name")]
    Empty,

    /// Name is not a single plain path component
    #[error("File name escapes library root: {0}")]
    Escapes(String),
}

/// Generate a collision-resistant short id from a random UUID.
pub fn short_id() -> String {
    encode_short_id(Uuid::new_v4().as_u128())
}

fn encode_short_id(mut value: u128) -> String {
    let base = SHORT_ID_ALPHABET.len() as u128;
    let mut out = Vec::with_capacity(SHORT_ID_LEN);
    while value > 0 {
        out.push(SHORT_ID_ALPHABET[(value % base) as usize]);
        value /= base;
    }
    while out.len() < SHORT_ID_LEN {
        out.push(SHORT_ID_ALPHABET[0]);
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

/// Reduce a client-supplied file name to a safe stem.
///
/// Keeps only the last path component, drops its extension, replaces the
/// variant marker, separators and control characters with `_`, and strips
/// leading dots and surrounding whitespace. May return an empty string.
pub fn sanitize_stem(file_name: &str) -> String {
    let last = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let stem = match last.rfind('.') {
        Some(idx) if idx > 0 => &last[..idx],
        _ => last,
    };

    let replaced: String = stem
        .chars()
        .map(|c| match c {
            '#' | '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let mut stem = replaced
        .trim_start_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string();
    if stem.len() > MAX_STEM_BYTES {
        let mut end = MAX_STEM_BYTES;
        while !stem.is_char_boundary(end) {
            end -= 1;
        }
        stem.truncate(end);
    }
    stem.trim_end().to_string()
}

/// Stem used after `base` collided with an existing file.
pub fn collision_stem(base: &str) -> String {
    format!("{}_{}", base, short_id())
}

/// Join `name` onto `root`, refusing anything but a single plain component.
pub fn secure_join(root: &Path, name: &str) -> Result<PathBuf, NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(NameError::Escapes(name.to_string()));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(root.join(name)),
        _ => Err(NameError::Escapes(name.to_string())),
    }
}
