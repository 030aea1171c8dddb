//! Version ordering for package versions
//!
//! Package versions are not semver. A version string is split on the first
//! `~` into a bare version and an optional pre-release part. Bare versions are
//! compared element by element (split on `.`) using a natural comparison, so
//! that `1.10` sorts after `1.9`. A missing element sorts lower, which makes
//! `1` lower than `1.0.0`. A version carrying a pre-release sorts below the
//! same bare version without one: `1~rc1 < 1`.

use std::cmp::Ordering;

/// One run of a natural-compare key
#[derive(Debug, PartialEq, Eq)]
enum Chunk<'a> {
    /// Digit run with leading zeros stripped
    Number(&'a str),
    /// Non-digit run, compared case-insensitively
    Text(String),
}

impl Ord for Chunk<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Chunk::Number(a), Chunk::Number(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Chunk::Text(a), Chunk::Text(b)) => a.cmp(b),
            (Chunk::Number(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Chunk<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn natural_key(text: &str) -> Vec<Chunk<'_>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    while start < bytes.len() {
        let is_digit = bytes[start].is_ascii_digit();
        let end = bytes[start..]
            .iter()
            .position(|b| b.is_ascii_digit() != is_digit)
            .map_or(bytes.len(), |offset| start + offset);

        let run = &text[start..end];
        if is_digit {
            let trimmed = run.trim_start_matches('0');
            chunks.push(Chunk::Number(trimmed));
        } else {
            chunks.push(Chunk::Text(run.to_lowercase()));
        }
        start = end;
    }

    chunks
}

/// Natural comparison of two strings
///
/// Digit runs are compared numerically (of arbitrary length), everything
/// else lexicographically ignoring case. A digit run sorts before text.
pub fn natural_compare(left: &str, right: &str) -> Ordering {
    natural_key(left).cmp(&natural_key(right))
}

/// Compare two bare versions (no pre-release part)
///
/// Elements are compared pairwise; when all shared elements are equal the
/// version with fewer elements is lower.
pub fn bare_version_compare(left: &str, right: &str) -> Ordering {
    let mut left_elements = left.split('.');
    let mut right_elements = right.split('.');

    loop {
        match (left_elements.next(), right_elements.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => match natural_compare(l, r) {
                Ordering::Equal => {}
                unequal => return unequal,
            },
        }
    }
}

/// Compare two versions that may carry a `~` pre-release part
///
/// # Examples
/// ```
/// use std::cmp::Ordering;
/// use buildmaster::core::version::version_compare;
///
/// assert_eq!(version_compare("1.10", "1.9"), Ordering::Greater);
/// assert_eq!(version_compare("1~rc1", "1"), Ordering::Less);
/// ```
pub fn version_compare(left: &str, right: &str) -> Ordering {
    let (left_bare, left_pre) = split_pre_release(left);
    let (right_bare, right_pre) = split_pre_release(right);

    match bare_version_compare(left_bare, right_bare) {
        Ordering::Equal => {}
        unequal => return unequal,
    }

    match (left_pre, right_pre) {
        (None, None) => Ordering::Equal,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(l), Some(r)) => natural_compare(l, r),
    }
}

fn split_pre_release(version: &str) -> (&str, Option<&str>) {
    match version.split_once('~') {
        Some((bare, pre)) => (bare, Some(pre)),
        None => (version, None),
    }
}
