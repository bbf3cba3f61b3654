//! Markdown rendering of pipeline reports for conversational and tool-call
//! consumers. Pure formatting, no logic.

use crate::database::DbSchema;
use crate::pipeline::analysis::AnalysisReport;
use crate::pipeline::query::QueryReport;

pub(crate) fn query_reply(report: &QueryReport) -> String {
    if !report.success && report.explanation.is_none() {
        return format!(
            "I couldn't answer that. Error: {}",
            report.error.as_deref().unwrap_or("unknown")
        );
    }

    let mut lines = Vec::new();
    if let Some(explanation) = &report.explanation {
        lines.push(explanation.clone());
    }
    if let Some(sql) = &report.sql_query {
        lines.push(format!("\n**Query used:**\n```sql\n{sql}\n```"));
    }
    if report.attempts > 0 {
        lines.push(format!("*(took {} retries)*", report.attempts));
    }
    if let Some(error) = &report.error {
        lines.push(format!("\n*Note: {error}*"));
    }
    lines.join("\n")
}

pub(crate) fn analysis_reply(report: &AnalysisReport) -> String {
    if !report.success && report.insights.is_none() {
        return format!(
            "Analysis failed. Error: {}",
            report.error.as_deref().unwrap_or("unknown")
        );
    }

    let mut lines = Vec::new();
    if let Some(insights) = &report.insights {
        lines.push(insights.clone());
    }
    if !report.sub_queries.is_empty() {
        lines.push("\n**This analysis ran the following sub-queries:**".to_string());
        for (i, sub) in report.sub_queries.iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, sub.question));
            match (&sub.sql, &sub.error) {
                (Some(sql), None) => lines.push(format!("```sql\n{sql}\n```")),
                (_, Some(error)) => lines.push(format!("   *failed: {error}*")),
                (None, None) => {}
            }
        }
    }
    // Chart data rides along as a fenced JSON marker for the front end.
    if let Some(chart) = &report.chart {
        if let Ok(json) = serde_json::to_string(chart) {
            lines.push(format!("\n**CHART_DATA:**\n```json\n{json}\n```"));
        }
    }
    lines.join("\n")
}

pub(crate) fn schema_overview(schema: &DbSchema) -> String {
    let mut lines = vec!["Here's what data I have access to:\n".to_string()];
    for (table, info) in schema {
        let fields = info
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("**{}**", title_case(table)));
        lines.push(format!("  Fields: {fields}"));
        if !info.foreign_keys.is_empty() {
            let refs = info
                .foreign_keys
                .iter()
                .map(|fk| fk.references.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("  Linked to: {refs}"));
        }
        lines.push(String::new());
    }
    lines.push(
        "You can ask me anything about this data: totals, trends, breakdowns, \
         comparisons, and more."
            .to_string(),
    );
    lines.join("\n")
}

fn title_case(name: &str) -> String {
    name.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
