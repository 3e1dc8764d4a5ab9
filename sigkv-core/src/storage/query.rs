//! Query options and their translation to SQL.

use sqlx::{QueryBuilder, Sqlite};

/// Filters for reading documents out of a [`super::Storage`].
///
/// Every field is optional; an absent field applies no filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Exact key match.
    pub key: Option<String>,
    /// Inclusive lower bound on the key.
    pub low_key: Option<String>,
    /// Exclusive upper bound on the key.
    pub high_key: Option<String>,
    /// Keys starting with this string. Matched literally and case-sensitively.
    pub prefix: Option<String>,
    /// Maximum number of documents returned.
    pub limit: Option<u64>,
    /// Return every retained `(key, author)` row instead of only the
    /// winner for each key.
    pub include_history: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// All retained documents, including every author's row.
    pub fn history() -> Self {
        Self {
            include_history: true,
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_low_key(mut self, low_key: impl Into<String>) -> Self {
        self.low_key = Some(low_key.into());
        self
    }

    pub fn with_high_key(mut self, high_key: impl Into<String>) -> Self {
        self.high_key = Some(high_key.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_history(mut self, include_history: bool) -> Self {
        self.include_history = include_history;
        self
    }
}

const COLUMNS: &str = "schema_version, workspace, key, value, timestamp, author, signature";

/// Build the SELECT for `query` within `workspace`.
///
/// Without history, the winner per key is picked with a window over the
/// filtered rows, ranking by `(timestamp, signature)` descending.
pub(crate) fn build_select(workspace: &str, query: &Query) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(COLUMNS);

    if query.include_history {
        qb.push(" FROM documents");
        push_filters(&mut qb, workspace, query);
        qb.push(" ORDER BY key ASC, timestamp DESC, signature DESC");
    } else {
        qb.push(" FROM (SELECT ");
        qb.push(COLUMNS);
        qb.push(
            ", ROW_NUMBER() OVER (PARTITION BY key ORDER BY timestamp DESC, signature DESC) AS row_rank",
        );
        qb.push(" FROM documents");
        push_filters(&mut qb, workspace, query);
        qb.push(") WHERE row_rank = 1 ORDER BY key ASC");
    }

    if let Some(limit) = query.limit {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }

    qb
}

fn push_filters(qb: &mut QueryBuilder<'static, Sqlite>, workspace: &str, query: &Query) {
    qb.push(" WHERE workspace = ");
    qb.push_bind(workspace.to_string());

    if let Some(key) = &query.key {
        qb.push(" AND key = ");
        qb.push_bind(key.clone());
    }
    if let Some(low_key) = &query.low_key {
        qb.push(" AND key >= ");
        qb.push_bind(low_key.clone());
    }
    if let Some(high_key) = &query.high_key {
        qb.push(" AND key < ");
        qb.push_bind(high_key.clone());
    }
    if let Some(prefix) = &query.prefix {
        // LIKE ignores ASCII case; the substr comparison keeps the match exact.
        qb.push(" AND key LIKE ");
        qb.push_bind(like_prefix_pattern(prefix));
        qb.push(" ESCAPE '\\' AND substr(key, 1, ");
        qb.push_bind(prefix.chars().count() as i64);
        qb.push(") = ");
        qb.push_bind(prefix.clone());
    }
}

/// Escape LIKE metacharacters in `prefix` and append the trailing wildcard.
pub(crate) fn like_prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
