//! Prompt text sent to the language model.

use std::fmt::Write as _;

use roamreader_core::QueryRows;
use roamreader_store_sqlite::TableSchema;

const PLAN_INSTRUCTIONS: &str = "\
You translate travel-history questions into queries over a SQLite database.
Answer with exactly one JSON object choosing an intent:
  {\"intent\": \"date\", \"date\": \"YYYY-MM-DD\"}        places visited on a day
  {\"intent\": \"duration\", \"place\": \"...\"}         total time spent somewhere
  {\"intent\": \"list\", \"area\": \"...\"}              places visited within an area
  {\"intent\": \"summary\", \"level\": \"countries\"}    distinct countries (or \"states\")
  {\"intent\": \"travel_mode\", \"mode\": \"WALKING\"}   distance per travel mode; omit mode for all
If no intent fits, answer with a single read-only SQLite SELECT statement instead.
place_visits.duration_min is in minutes. visit_date is a YYYY-MM-DD string.
Do not add explanations or markdown.";

/// Prompt asking the model to plan a query for `question`.
#[must_use]
pub fn plan_prompt(question: &str, schema: &[TableSchema]) -> String {
    let mut prompt = String::from(PLAN_INSTRUCTIONS);
    prompt.push_str("\n\nTables:\n");
    for table in schema {
        let _ = writeln!(prompt, "  {}({})", table.table, table.columns.join(", "));
    }
    let _ = write!(prompt, "\nQuestion: {}", question.trim());
    prompt
}

/// Prompt asking the model to summarize query results for `question`.
#[must_use]
pub fn describe_prompt(question: &str, rows: &QueryRows) -> String {
    let mut prompt = format!(
        "Question: {}\nColumns: {}\nRows:\n{}\n",
        question.trim(),
        rows.columns.join(", "),
        rows.to_lines()
    );
    if rows.truncated {
        prompt.push_str("(more rows exist but were not shown)\n");
    }
    prompt.push_str("Answer the question in one or two sentences using only these rows.");
    prompt
}
