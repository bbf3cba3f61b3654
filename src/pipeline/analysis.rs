//! Multi-question pipeline: decompose a complex question into sub-questions,
//! answer each with one query, synthesize cross-query insights, and build
//! chart data when the results support it. Strictly linear; partial failure
//! per sub-question is tolerated rather than corrected.

use serde::Serialize;
use tracing::{info, warn};

use crate::database::DataSource;
use crate::llm::LanguageModel;

use super::error::PipelineError;
use super::prompts;
use super::state::{AnalysisState, ChartDecision, ChartSpec, Decomposition, SqlCandidate, SubQuery};
use super::PipelineSettings;

const MAX_SUB_QUESTIONS: usize = 4;

/// Final result of a multi-query run.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct AnalysisReport {
    pub success: bool,
    pub error: Option<String>,
    pub sub_queries: Vec<SubQuery>,
    pub insights: Option<String>,
    pub chart: Option<ChartSpec>,
}

impl From<AnalysisState> for AnalysisReport {
    fn from(state: AnalysisState) -> Self {
        Self {
            success: state.error.is_none(),
            error: state.error,
            sub_queries: state.sub_queries,
            insights: state.insights,
            chart: state.chart,
        }
    }
}

pub(crate) struct AnalysisPipeline<'a, M, D> {
    model: &'a M,
    db: &'a D,
    settings: &'a PipelineSettings,
}

impl<'a, M: LanguageModel, D: DataSource> AnalysisPipeline<'a, M, D> {
    pub(crate) fn new(model: &'a M, db: &'a D, settings: &'a PipelineSettings) -> Self {
        Self {
            model,
            db,
            settings,
        }
    }

    pub(crate) async fn run(&self, question: &str) -> AnalysisReport {
        let mut state = AnalysisState::new(question);
        if question.trim().is_empty() {
            state.error = Some("question must not be empty".to_string());
            return AnalysisReport::from(state);
        }

        // Schema and decomposition failures are fatal; everything after them
        // degrades gracefully instead of aborting.
        if let Err(e) = self.inspect(&mut state).await {
            state.error = Some(e.to_string());
            return AnalysisReport::from(state);
        }
        if let Err(e) = self.decompose(&mut state).await {
            state.error = Some(e.to_string());
            return AnalysisReport::from(state);
        }

        self.execute_all(&mut state).await;
        self.synthesize_insights(&mut state).await;
        self.build_chart(&mut state).await;

        AnalysisReport::from(state)
    }

    async fn inspect(&self, state: &mut AnalysisState) -> Result<(), PipelineError> {
        let schema = self
            .db
            .inspect_schema()
            .await
            .map_err(|e| PipelineError::Schema(e.to_string()))?;
        let serialized =
            serde_json::to_string(&schema).map_err(|e| PipelineError::Schema(e.to_string()))?;
        state.schema = Some(serialized);
        Ok(())
    }

    async fn decompose(&self, state: &mut AnalysisState) -> Result<(), PipelineError> {
        let schema = state.schema.as_deref().unwrap_or_default();
        let system = prompts::decompose_system_prompt(schema);
        let decomposition = self
            .model
            .generate_structured::<Decomposition>(&system, &state.question)
            .await
            .map_err(|e| PipelineError::Decomposition(e.to_string()))?;

        let mut sub_questions = decomposition.sub_questions;
        sub_questions.retain(|q| !q.trim().is_empty());
        if sub_questions.is_empty() {
            return Err(PipelineError::Decomposition(
                "model returned no sub-questions".to_string(),
            ));
        }
        sub_questions.truncate(MAX_SUB_QUESTIONS);
        info!("decomposed into {} sub-questions", sub_questions.len());

        state.sub_queries = sub_questions.into_iter().map(SubQuery::new).collect();
        Ok(())
    }

    /// One attempt per sub-question, no retry loop: coverage over per-item
    /// correction. Failures are recorded on the sub-query and never abort
    /// the pipeline.
    async fn execute_all(&self, state: &mut AnalysisState) {
        let schema = state.schema.clone().unwrap_or_default();
        let system = prompts::sql_system_prompt(&schema, &self.settings.dialect_directives, None);

        for sub in &mut state.sub_queries {
            let sql = match self
                .model
                .generate_structured::<SqlCandidate>(&system, &sub.question)
                .await
            {
                Ok(candidate) => candidate.sql_query.trim().to_string(),
                Err(e) => {
                    warn!("sub-question synthesis failed: {e}");
                    sub.error = Some(PipelineError::Synthesis(e.to_string()).to_string());
                    continue;
                }
            };
            sub.sql = Some(sql.clone());

            if !self.settings.policy.is_safe(&sql) {
                sub.error = Some(
                    PipelineError::SafetyRejection(format!(
                        "query must be a single SELECT statement: {sql}"
                    ))
                    .to_string(),
                );
                continue;
            }
            match self.db.run_select(&sql).await {
                Ok(rows) => sub.result = Some(rows),
                Err(e) => {
                    sub.error = Some(PipelineError::Execution(e.to_string()).to_string());
                }
            }
        }
    }

    /// Narrates across all sub-results, including the error-marked ones.
    async fn synthesize_insights(&self, state: &mut AnalysisState) {
        let prompt = prompts::insights_prompt(&state.question, &state.sub_queries);
        match self
            .model
            .generate_text(prompts::INSIGHTS_SYSTEM, &prompt)
            .await
        {
            Ok(text) => state.insights = Some(text),
            Err(e) => {
                warn!("insight synthesis failed: {e}");
                state.error = Some(format!("failed to synthesize insights: {e}"));
            }
        }
    }

    /// Charting is strictly best-effort: any failure or malformed output is
    /// absorbed into "no chart".
    async fn build_chart(&self, state: &mut AnalysisState) {
        let prompt = prompts::sub_query_context(&state.sub_queries);
        match self
            .model
            .generate_structured::<ChartDecision>(prompts::CHART_SYSTEM, &prompt)
            .await
        {
            Ok(ChartDecision { chart: Some(chart) }) if chart.is_well_formed() => {
                state.chart = Some(chart);
            }
            Ok(ChartDecision { chart: Some(_) }) => {
                warn!("dropping malformed chart spec");
            }
            Ok(ChartDecision { chart: None }) => {}
            Err(e) => {
                info!("chart generation failed, continuing without a chart: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::database::test_db;
    use crate::llm::stub::{StubModel, StubReply};

    fn decomposition_reply() -> StubReply {
        StubReply::Json(json!({
            "sub_questions": [
                "What is the total sales amount per product?",
                "Which product has the most orders?",
                "How did sales develop per month?",
            ]
        }))
    }

    fn sql_reply(sql: &str) -> StubReply {
        StubReply::Json(json!({ "sql_query": sql }))
    }

    fn chart_reply() -> StubReply {
        StubReply::Json(json!({
            "chart": {
                "kind": "bar",
                "title": "Sales per product",
                "labels": ["Widget", "Update Kit"],
                "datasets": [{ "label": "Sales", "data": [25.5, 7.25] }]
            }
        }))
    }

    #[tokio::test]
    async fn full_run_produces_insights_and_chart() {
        let db = test_db::seeded().await;
        let model = StubModel::new(vec![
            decomposition_reply(),
            sql_reply("SELECT product_id, SUM(amount) AS total FROM orders GROUP BY product_id"),
            sql_reply(
                "SELECT product_id, COUNT(*) AS order_count FROM orders \
                 GROUP BY product_id ORDER BY order_count DESC",
            ),
            sql_reply(
                "SELECT strftime('%m', order_date) AS month, SUM(amount) AS total \
                 FROM orders GROUP BY month",
            ),
            StubReply::Text("Widgets dominate sales.".to_string()),
            chart_reply(),
        ]);
        let settings = PipelineSettings::default();

        let report = AnalysisPipeline::new(&model, &db, &settings)
            .run("how are sales doing across products and time?")
            .await;

        assert!(report.success);
        assert_eq!(report.sub_queries.len(), 3);
        assert!(report.sub_queries.iter().all(|s| s.error.is_none()));
        assert!(report.sub_queries.iter().all(|s| s.result.is_some()));
        assert_eq!(report.insights.as_deref(), Some("Widgets dominate sales."));
        let chart = report.chart.unwrap();
        assert_eq!(chart.labels.len(), 2);
    }

    #[tokio::test]
    async fn sub_question_failure_is_absorbed_into_its_record() {
        let db = test_db::seeded().await;
        let model = StubModel::new(vec![
            decomposition_reply(),
            sql_reply("SELECT product_id, SUM(amount) AS total FROM orders GROUP BY product_id"),
            StubReply::Fail("model timeout".to_string()),
            sql_reply("SELECT COUNT(*) AS order_count FROM orders"),
            StubReply::Text("Partial picture, but sales look healthy.".to_string()),
            StubReply::Json(json!({ "chart": null })),
        ]);
        let settings = PipelineSettings::default();

        let report = AnalysisPipeline::new(&model, &db, &settings)
            .run("complex question")
            .await;

        assert!(report.success);
        assert_eq!(report.sub_queries.len(), 3);
        assert!(report.sub_queries[0].error.is_none());
        let failed = &report.sub_queries[1];
        assert_eq!(failed.sql, None);
        assert_eq!(failed.result, None);
        assert!(failed.error.as_deref().unwrap().contains("model timeout"));
        assert!(report.sub_queries[2].result.is_some());
        assert!(report.insights.is_some());
        assert_eq!(report.chart, None);
    }

    #[tokio::test]
    async fn all_sub_questions_can_fail_without_aborting() {
        let db = test_db::seeded().await;
        let model = StubModel::new(vec![
            decomposition_reply(),
            sql_reply("DELETE FROM orders"),
            sql_reply("SELECT * FROM missing_table"),
            StubReply::Fail("model timeout".to_string()),
            StubReply::Text("Nothing could be answered.".to_string()),
            StubReply::Json(json!({ "chart": null })),
        ]);
        let settings = PipelineSettings::default();

        let report = AnalysisPipeline::new(&model, &db, &settings)
            .run("complex question")
            .await;

        assert!(report.success);
        assert_eq!(report.sub_queries.len(), 3);
        assert!(report.sub_queries.iter().all(|s| s.error.is_some()));
        assert!(report
            .sub_queries[0]
            .error
            .as_deref()
            .unwrap()
            .contains("safety policy"));
        assert!(report.insights.is_some());
    }

    #[tokio::test]
    async fn decomposition_failure_is_fatal() {
        let db = test_db::seeded().await;
        let model = StubModel::new(vec![StubReply::Fail("model offline".to_string())]);
        let settings = PipelineSettings::default();

        let report = AnalysisPipeline::new(&model, &db, &settings)
            .run("complex question")
            .await;

        assert!(!report.success);
        assert!(report
            .error
            .as_deref()
            .unwrap()
            .contains("question decomposition failed"));
        assert!(report.sub_queries.is_empty());
        assert_eq!(report.insights, None);
    }

    #[tokio::test]
    async fn empty_decomposition_is_fatal() {
        let db = test_db::seeded().await;
        let model = StubModel::new(vec![StubReply::Json(json!({ "sub_questions": [] }))]);
        let settings = PipelineSettings::default();

        let report = AnalysisPipeline::new(&model, &db, &settings)
            .run("complex question")
            .await;

        assert!(!report.success);
        assert!(report
            .error
            .as_deref()
            .unwrap()
            .contains("no sub-questions"));
    }

    #[tokio::test]
    async fn oversized_decomposition_is_truncated() {
        let db = test_db::seeded().await;
        let model = StubModel::new(vec![
            StubReply::Json(json!({
                "sub_questions": ["q1", "q2", "q3", "q4", "q5", "q6"]
            })),
            sql_reply("SELECT COUNT(*) AS n FROM orders"),
            sql_reply("SELECT COUNT(*) AS n FROM orders"),
            sql_reply("SELECT COUNT(*) AS n FROM orders"),
            sql_reply("SELECT COUNT(*) AS n FROM orders"),
            StubReply::Text("Counted.".to_string()),
            StubReply::Json(json!({ "chart": null })),
        ]);
        let settings = PipelineSettings::default();

        let report = AnalysisPipeline::new(&model, &db, &settings)
            .run("complex question")
            .await;

        assert!(report.success);
        assert_eq!(report.sub_queries.len(), 4);
    }

    #[tokio::test]
    async fn malformed_chart_is_absorbed_into_no_chart() {
        let db = test_db::seeded().await;
        let model = StubModel::new(vec![
            StubReply::Json(json!({ "sub_questions": ["total sales?"] })),
            sql_reply("SELECT SUM(amount) AS total FROM orders"),
            StubReply::Text("Sales total 32.75.".to_string()),
            // Two labels, one data point: length mismatch.
            StubReply::Json(json!({
                "chart": {
                    "kind": "line",
                    "title": "Broken",
                    "labels": ["a", "b"],
                    "datasets": [{ "label": "x", "data": [1.0] }]
                }
            })),
        ]);
        let settings = PipelineSettings::default();

        let report = AnalysisPipeline::new(&model, &db, &settings)
            .run("complex question")
            .await;

        assert!(report.success);
        assert_eq!(report.chart, None);
    }

    #[tokio::test]
    async fn chart_capability_failure_is_absorbed() {
        let db = test_db::seeded().await;
        let model = StubModel::new(vec![
            StubReply::Json(json!({ "sub_questions": ["total sales?"] })),
            sql_reply("SELECT SUM(amount) AS total FROM orders"),
            StubReply::Text("Sales total 32.75.".to_string()),
            StubReply::Fail("model timeout".to_string()),
        ]);
        let settings = PipelineSettings::default();

        let report = AnalysisPipeline::new(&model, &db, &settings)
            .run("complex question")
            .await;

        assert!(report.success);
        assert_eq!(report.chart, None);
        assert!(report.insights.is_some());
    }

    #[tokio::test]
    async fn insight_failure_marks_the_report_degraded() {
        let db = test_db::seeded().await;
        let model = StubModel::new(vec![
            StubReply::Json(json!({ "sub_questions": ["total sales?"] })),
            sql_reply("SELECT SUM(amount) AS total FROM orders"),
            StubReply::Fail("model timeout".to_string()),
            StubReply::Json(json!({ "chart": null })),
        ]);
        let settings = PipelineSettings::default();

        let report = AnalysisPipeline::new(&model, &db, &settings)
            .run("complex question")
            .await;

        assert!(!report.success);
        assert!(report
            .error
            .as_deref()
            .unwrap()
            .contains("failed to synthesize insights"));
        // Sub-query results are still returned.
        assert!(report.sub_queries[0].result.is_some());
    }
}
