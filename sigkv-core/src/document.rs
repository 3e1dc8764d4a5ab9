//! The signed document record and its ordering.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Largest timestamp a document may carry (2^53 - 2 microseconds).
pub const MAX_TIMESTAMP: i64 = 9_007_199_254_740_990;

/// Default distance into the future a document timestamp may reach: 10 minutes.
pub const DEFAULT_FUTURE_TOLERANCE_MICROS: i64 = 10 * 60 * 1_000_000;

/// A signed, versioned record addressed by `(workspace, key, author)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub schema_version: String,
    pub workspace: String,
    pub key: String,
    pub value: String,
    /// Microseconds since the Unix epoch, supplied by the author.
    pub timestamp: i64,
    pub author: String,
    pub signature: String,
}

impl Document {
    /// Compares two documents by `(timestamp, signature)`.
    ///
    /// This is the ordering used both to pick which row survives for one
    /// `(key, author)` pair and to pick the winner for a key across authors.
    /// Signatures compare byte-wise, which matches SQLite's BINARY collation.
    pub fn cmp_recency(&self, other: &Document) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.signature.as_bytes().cmp(other.signature.as_bytes()))
    }

    /// Returns true if `self` strictly supersedes `other`.
    pub fn is_newer_than(&self, other: &Document) -> bool {
        self.cmp_recency(other) == Ordering::Greater
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.key)?;
        writeln!(f, "  author:    {}", self.author)?;
        writeln!(f, "  timestamp: {}", self.timestamp)?;
        write!(f, "  value:     {}", self.value)
    }
}

/// Current time in microseconds since the Unix epoch.
pub fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// Default future cutoff: now plus ten minutes.
pub fn default_future_cutoff() -> i64 {
    now_micros() + DEFAULT_FUTURE_TOLERANCE_MICROS
}
