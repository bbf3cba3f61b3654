//! Single-question pipeline: inspect the schema, ask the model for a query,
//! validate and execute it, retry on failure within the attempt budget, then
//! explain whatever the run produced.

use serde::Serialize;
use tracing::{info, warn};

use crate::database::{DataSource, RowSet};
use crate::llm::LanguageModel;

use super::error::PipelineError;
use super::prompts;
use super::state::{next_stage, QueryState, SqlCandidate, Stage};
use super::PipelineSettings;

/// Final result of a single-query run. Always well-formed: a non-null
/// `error` signals degraded output, never a crash.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub(crate) struct QueryReport {
    pub success: bool,
    pub error: Option<String>,
    pub sql_query: Option<String>,
    pub rows: Option<RowSet>,
    pub explanation: Option<String>,
    pub attempts: u32,
}

impl From<QueryState> for QueryReport {
    fn from(state: QueryState) -> Self {
        Self {
            success: state.error.is_none(),
            error: state.error,
            sql_query: state.sql_query,
            rows: state.result,
            explanation: state.answer,
            attempts: state.attempts,
        }
    }
}

pub(crate) struct QueryPipeline<'a, M, D> {
    model: &'a M,
    db: &'a D,
    settings: &'a PipelineSettings,
}

impl<'a, M: LanguageModel, D: DataSource> QueryPipeline<'a, M, D> {
    pub(crate) fn new(model: &'a M, db: &'a D, settings: &'a PipelineSettings) -> Self {
        Self {
            model,
            db,
            settings,
        }
    }

    pub(crate) async fn run(&self, question: &str) -> QueryReport {
        if question.trim().is_empty() {
            return QueryReport {
                success: false,
                error: Some("question must not be empty".to_string()),
                sql_query: None,
                rows: None,
                explanation: None,
                attempts: 0,
            };
        }

        let mut state = QueryState::new(question);
        let mut stage = Stage::Inspect;
        loop {
            match stage {
                Stage::Inspect => self.inspect(&mut state).await,
                Stage::Synthesize => self.synthesize(&mut state).await,
                Stage::Execute => self.execute(&mut state).await,
                Stage::Explain => self.explain(&mut state).await,
                Stage::Done => break,
            }
            stage = next_stage(stage, &state, self.settings.max_attempts);
        }
        QueryReport::from(state)
    }

    /// Schema is a hard prerequisite; failure here aborts the run.
    async fn inspect(&self, state: &mut QueryState) {
        match self.db.inspect_schema().await {
            Ok(schema) => match serde_json::to_string(&schema) {
                Ok(serialized) => {
                    state.schema = Some(serialized);
                    state.error = None;
                }
                Err(e) => {
                    state.error = Some(PipelineError::Schema(e.to_string()).to_string());
                }
            },
            Err(e) => {
                warn!("schema inspection failed: {e}");
                state.error = Some(PipelineError::Schema(e.to_string()).to_string());
            }
        }
    }

    /// On capability failure the candidate is left unchanged; the execute
    /// step unifies failure accounting through the one attempt counter.
    async fn synthesize(&self, state: &mut QueryState) {
        let prior = if state.attempts > 0 {
            state.sql_query.clone().zip(state.error.clone())
        } else {
            None
        };
        let schema = state.schema.clone().unwrap_or_default();
        let system = prompts::sql_system_prompt(
            &schema,
            &self.settings.dialect_directives,
            prior.as_ref().map(|(sql, error)| (sql.as_str(), error.as_str())),
        );

        match self
            .model
            .generate_structured::<SqlCandidate>(&system, &state.question)
            .await
        {
            Ok(candidate) => {
                let sql = candidate.sql_query.trim().to_string();
                info!("candidate query: {sql}");
                state.sql_query = Some(sql);
                state.error = None;
            }
            Err(e) => {
                warn!("query synthesis failed: {e}");
                state.error = Some(PipelineError::Synthesis(e.to_string()).to_string());
            }
        }
    }

    /// Validates and executes the candidate. A missing or unsafe query is
    /// treated identically to an execution failure: counted and retried, so
    /// the model gets a chance to self-correct.
    async fn execute(&self, state: &mut QueryState) {
        let Some(sql) = state.sql_query.clone() else {
            state.attempts += 1;
            state.error = Some(
                PipelineError::SafetyRejection("no candidate query to execute".to_string())
                    .to_string(),
            );
            return;
        };
        if !self.settings.policy.is_safe(&sql) {
            state.attempts += 1;
            state.error = Some(
                PipelineError::SafetyRejection(format!(
                    "query must be a single SELECT statement: {sql}"
                ))
                .to_string(),
            );
            return;
        }
        match self.db.run_select(&sql).await {
            Ok(rows) => {
                info!("query returned {} rows", rows.rows.len());
                state.result = Some(rows);
                state.error = None;
            }
            Err(e) => {
                state.attempts += 1;
                state.error = Some(PipelineError::Execution(e.to_string()).to_string());
            }
        }
    }

    /// Terminal step for both the success and the exhaustion path. A
    /// successful explanation must not erase an exhaustion error; the caller
    /// still needs to see that the budget ran out.
    async fn explain(&self, state: &mut QueryState) {
        let exhausted = state.error.is_some();
        if exhausted {
            let last = state.error.take().unwrap_or_default();
            state.error = Some(
                PipelineError::Exhausted {
                    attempts: state.attempts,
                    last,
                }
                .to_string(),
            );
        }

        let outcome = match &state.result {
            Some(rows) => rows.render(),
            None => format!(
                "The query could not be executed. Last error: {}",
                state.error.as_deref().unwrap_or("unknown")
            ),
        };
        let prompt = prompts::explanation_prompt(&state.question, &outcome);

        match self
            .model
            .generate_text(prompts::EXPLANATION_SYSTEM, &prompt)
            .await
        {
            Ok(text) => {
                state.answer = Some(text);
                if !exhausted {
                    state.error = None;
                }
            }
            Err(e) => {
                warn!("explanation failed: {e}");
                if !exhausted {
                    state.error = Some(format!("explanation failed: {e}"));
                }
            }
        }
    }
}
