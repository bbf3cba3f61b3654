pub(crate) mod analysis;
pub(crate) mod error;
pub(crate) mod prompts;
pub(crate) mod query;
pub(crate) mod safety;
pub(crate) mod state;

use safety::SafetyPolicy;

pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Knobs shared by both pipelines. These are data, not code branches.
#[derive(Debug, Clone)]
pub(crate) struct PipelineSettings {
    /// Attempt budget for the single-query retry loop.
    pub max_attempts: u32,
    pub policy: SafetyPolicy,
    /// Dialect rules injected verbatim into every synthesis prompt.
    pub dialect_directives: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            policy: SafetyPolicy::default(),
            dialect_directives: default_dialect_directives(),
        }
    }
}

pub(crate) fn default_dialect_directives() -> Vec<String> {
    [
        "The target database is SQLite.",
        "Date columns are stored as TEXT: compare with strftime, \
         e.g. strftime('%Y', order_date) = '2023'.",
        "Always alias aggregated columns.",
        "Join tables using the foreign keys listed in the schema.",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
