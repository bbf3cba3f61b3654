use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::database::RowSet;

/// Working state of the single-query pipeline. Created fresh per request,
/// mutated only by pipeline steps in sequence, discarded after the report is
/// extracted.
#[derive(Debug, Clone)]
pub(crate) struct QueryState {
    pub question: String,
    /// Serialized schema description, set once per run.
    pub schema: Option<String>,
    /// Candidate query, overwritten on each retry.
    pub sql_query: Option<String>,
    pub result: Option<RowSet>,
    /// Cleared on each successful step.
    pub error: Option<String>,
    /// Incremented only by the execution step, on validation or execution
    /// failure. Never exceeds the configured maximum.
    pub attempts: u32,
    pub answer: Option<String>,
}

impl QueryState {
    pub(crate) fn new(question: &str) -> Self {
        Self {
            question: question.to_string(),
            schema: None,
            sql_query: None,
            result: None,
            error: None,
            attempts: 0,
            answer: None,
        }
    }
}

/// Stages of the single-query pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Inspect,
    Synthesize,
    Execute,
    Explain,
    Done,
}

/// Pure routing function for the single-query pipeline.
///
/// Reads only the state fields the decision needs, so routing is testable
/// without a model or a database. Schema failure aborts; an execution
/// failure within budget loops back to synthesis; success and exhaustion
/// both converge on the explanation step.
pub(crate) fn next_stage(stage: Stage, state: &QueryState, max_attempts: u32) -> Stage {
    match stage {
        Stage::Inspect => {
            if state.error.is_some() {
                Stage::Done
            } else {
                Stage::Synthesize
            }
        }
        Stage::Synthesize => Stage::Execute,
        Stage::Execute => {
            if state.error.is_some() && state.attempts < max_attempts {
                Stage::Synthesize
            } else {
                Stage::Explain
            }
        }
        Stage::Explain | Stage::Done => Stage::Done,
    }
}

/// One sub-question of the multi-query pipeline with whatever it produced.
/// Holding question, query and result in one record makes the alignment
/// between them structural.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub(crate) struct SubQuery {
    pub question: String,
    pub sql: Option<String>,
    pub result: Option<RowSet>,
    pub error: Option<String>,
}

impl SubQuery {
    pub(crate) fn new(question: String) -> Self {
        Self {
            question,
            sql: None,
            result: None,
            error: None,
        }
    }
}

/// Working state of the multi-query pipeline.
#[derive(Debug, Clone)]
pub(crate) struct AnalysisState {
    pub question: String,
    pub schema: Option<String>,
    pub sub_queries: Vec<SubQuery>,
    pub insights: Option<String>,
    pub chart: Option<ChartSpec>,
    pub error: Option<String>,
}

impl AnalysisState {
    pub(crate) fn new(question: &str) -> Self {
        Self {
            question: question.to_string(),
            schema: None,
            sub_queries: Vec::new(),
            insights: None,
            chart: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ChartKind {
    Bar,
    Line,
    Pie,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub(crate) struct Dataset {
    pub label: String,
    pub data: Vec<f64>,
}

/// Structured chart description handed to a rendering consumer. Either fully
/// present or entirely absent.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub(crate) struct ChartSpec {
    pub kind: ChartKind,
    pub title: String,
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
}

impl ChartSpec {
    /// Every dataset must carry exactly one value per label.
    pub(crate) fn is_well_formed(&self) -> bool {
        !self.labels.is_empty()
            && !self.datasets.is_empty()
            && self
                .datasets
                .iter()
                .all(|dataset| dataset.data.len() == self.labels.len())
    }
}

/// Structured output contract for query synthesis: exactly one SQL string,
/// no surrounding prose.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub(crate) struct SqlCandidate {
    pub sql_query: String,
}

/// Structured output contract for question decomposition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub(crate) struct Decomposition {
    pub sub_questions: Vec<String>,
}

/// Chart-builder contract: a populated spec, or `chart: null` for "no chart".
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub(crate) struct ChartDecision {
    pub chart: Option<ChartSpec>,
}
