/// Keywords that must never appear in a candidate query, covering data
/// definition and data modification.
pub(crate) const DEFAULT_BLOCKED_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "ALTER", "UPDATE", "INSERT", "CREATE", "TRUNCATE", "EXEC", "GRANT",
    "REVOKE", "MERGE", "CALL", "ATTACH", "DETACH", "PRAGMA", "VACUUM", "ANALYZE",
];

/// Syntactic read-only policy for candidate queries.
#[derive(Debug, Clone)]
pub(crate) struct SafetyPolicy {
    blocked: Vec<String>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCKED_KEYWORDS.iter().map(|s| s.to_string()))
    }
}

impl SafetyPolicy {
    pub(crate) fn new(blocked: impl IntoIterator<Item = String>) -> Self {
        Self {
            blocked: blocked.into_iter().map(|kw| kw.to_uppercase()).collect(),
        }
    }

    /// Returns true only if the trimmed, case-normalized query starts with
    /// `SELECT` and contains no blocked keyword.
    ///
    /// The denylist check is a plain substring match. That is deliberately
    /// conservative: a blocked word inside a string literal or identifier
    /// (e.g. a product named "Update Kit") also rejects the query. Known
    /// over-approximation; tightening it to a tokenizer would change
    /// observable behavior.
    pub(crate) fn is_safe(&self, query: &str) -> bool {
        let normalized = query.trim().to_uppercase();
        if !normalized.starts_with("SELECT") {
            return false;
        }
        !self.blocked.iter().any(|kw| normalized.contains(kw.as_str()))
    }
}
