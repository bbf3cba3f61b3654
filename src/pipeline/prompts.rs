//! Prompt construction for every model-backed step. The SQL synthesis prompt
//! is shared by both pipelines; they differ only in how often they call it.

use super::state::SubQuery;

pub(crate) const EXPLANATION_SYSTEM: &str = "\
You are a helpful data analyst. Explain the SQL results in plain English.
- Directly answer what the data shows
- Highlight key numbers, trends, or insights
- Avoid mentioning SQL, table names, or column names
- Be concise and clear
Respond with only the explanation.";

pub(crate) const INSIGHTS_SYSTEM: &str = "\
You are a senior data analyst. You have the results of multiple database
queries that together answer a complex business question.
Synthesize ALL the results into a single coherent analytical response:
- Answer the original question directly
- Highlight connections and correlations between the different results
- Call out the most important numbers, trends, and insights
- Use plain English, without SQL, column names, or table names
- Structure with short paragraphs or bullet points for readability";

pub(crate) const CHART_SYSTEM: &str = "\
You are a data visualization expert. Given query results, decide whether a
chart would help communicate the insights.
If yes, fill in the chart object: kind is one of \"bar\", \"line\" or
\"pie\"; labels name the points; every dataset carries one number per label.
If no chart is appropriate, set \"chart\" to null.";

/// Synthesis prompt shared by the single-query pipeline and the per
/// sub-question loop: schema, dialect directives, and on retry the failed
/// query plus the error it produced.
pub(crate) fn sql_system_prompt(
    schema: &str,
    directives: &[String],
    prior: Option<(&str, &str)>,
) -> String {
    let today = chrono::Utc::now().format("%Y-%m-%d");
    let rules = directives
        .iter()
        .map(|d| format!("- {d}"))
        .collect::<Vec<_>>()
        .join("\n");
    let mut prompt = format!(
        "You are an expert SQL assistant. Generate one correct SQL query that \
         answers the given question.\n\n\
         Database schema (tables with columns and foreign keys, JSON):\n{schema}\n\n\
         Rules:\n{rules}\n\
         - Use the exact table and column names from the schema.\n\
         - Return only the SQL query, with no explanation and no comments.\n\
         - Today's date is {today}. Timezone: UTC.\n"
    );
    if let Some((sql, error)) = prior {
        prompt.push_str(&format!(
            "\nThe previous query failed with this error:\n{error}\n\n\
             Failed query:\n{sql}\n\n\
             Fix the query based on the error above.\n"
        ));
    }
    prompt
}

pub(crate) fn decompose_system_prompt(schema: &str) -> String {
    format!(
        "You are an expert data analyst. Break the given complex question into \
         2-4 focused sub-questions that can each be answered with a single SQL \
         query.\n\nDatabase schema:\n{schema}\n"
    )
}

pub(crate) fn explanation_prompt(question: &str, outcome: &str) -> String {
    format!("Question: {question}\n\nResults: {outcome}")
}

pub(crate) fn insights_prompt(question: &str, sub_queries: &[SubQuery]) -> String {
    format!(
        "Original question: {question}\n\n{}",
        sub_query_context(sub_queries)
    )
}

/// Numbered sub-question/result context handed to the insight and chart
/// steps. Failed sub-queries contribute their error text so the model can
/// narrate around them.
pub(crate) fn sub_query_context(sub_queries: &[SubQuery]) -> String {
    sub_queries
        .iter()
        .enumerate()
        .map(|(i, sub)| {
            let outcome = match (&sub.result, &sub.error) {
                (Some(rows), _) => rows.render(),
                (None, Some(error)) => format!("ERROR: {error}"),
                (None, None) => "ERROR: no result".to_string(),
            };
            format!("Sub-question {}: {}\nResult: {}", i + 1, sub.question, outcome)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
