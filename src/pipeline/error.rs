use thiserror::Error;

/// Pipeline error taxonomy. Schema and decomposition failures are fatal and
/// short-circuit; synthesis, safety and execution failures are counted
/// against the attempt budget and retried; exhaustion is terminal but still
/// surfaced through the explanation step.
#[derive(Debug, Error)]
pub(crate) enum PipelineError {
    #[error("schema inspection failed: {0}")]
    Schema(String),
    #[error("query synthesis failed: {0}")]
    Synthesis(String),
    #[error("query rejected by safety policy: {0}")]
    SafetyRejection(String),
    #[error("query execution failed: {0}")]
    Execution(String),
    #[error("attempt budget exhausted after {attempts} attempts; last error: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("question decomposition failed: {0}")]
    Decomposition(String),
}
