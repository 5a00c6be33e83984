//! Substring-occurrence counting over captured log text.
//!
//! The default is case-sensitive, non-overlapping, left-to-right: once a
//! match is found the scan resumes after its end, so `"bar bar"` occurs once
//! in `"bar bar bar"` and twice in `"bar bar bar bar"`.
//!
//! Repeats are counted, not collapsed: `"X X"` contains `"X"` twice. A
//! needle that appears several times in one record is reported that many
//! times, deliberately, even where a caller might expect a single hit.

use serde::{Deserialize, Serialize};

/// How `count_occurrences` matches a needle against text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOptions {
    pub case_sensitive: bool,
    pub overlapping: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            overlapping: false,
        }
    }
}

impl MatchOptions {
    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    pub fn overlapping(mut self) -> Self {
        self.overlapping = true;
        self
    }
}

/// Counts how many times `needle` occurs in `haystack`.
///
/// An empty needle never matches.
pub fn count_occurrences(haystack: &str, needle: &str, options: MatchOptions) -> usize {
    if needle.is_empty() {
        return 0;
    }

    if options.case_sensitive {
        scan(haystack, needle, options.overlapping)
    } else {
        scan(
            &haystack.to_lowercase(),
            &needle.to_lowercase(),
            options.overlapping,
        )
    }
}

fn scan(haystack: &str, needle: &str, overlapping: bool) -> usize {
    let mut count = 0;
    let mut start = 0;

    while let Some(pos) = haystack[start..].find(needle) {
        count += 1;
        let found = start + pos;
        start = if overlapping {
            // Step one character so the next window may share text with this one.
            found
                + haystack[found..]
                    .chars()
                    .next()
                    .map(char::len_utf8)
                    .unwrap_or(1)
        } else {
            found + needle.len()
        };
        if start >= haystack.len() {
            break;
        }
    }

    count
}
