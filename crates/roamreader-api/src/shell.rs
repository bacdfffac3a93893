//! Natural-language question answering over the store.
//!
//! The model only chooses *what* to run: a known [`Intent`] or a single
//! read-only statement. Execution always goes through the store's bounded
//! read-only path.

use anyhow::{bail, Result};
use roamreader_core::{Answer, Intent, QueryPlan, QueryRows, MAX_ROWS_CEILING};
use roamreader_store_sqlite::{SqliteStore, TableSchema};

pub const NO_RESULTS: &str = "No matching records found.";

/// A model that can plan queries and describe their results.
pub trait LanguageModel {
    /// Choose a query plan for `question` given the store's tables.
    ///
    /// # Errors
    /// Returns an error when the model cannot be reached or its reply cannot
    /// be interpreted.
    fn plan(&self, question: &str, schema: &[TableSchema]) -> Result<QueryPlan>;

    /// Describe `rows` as an answer to `question`.
    ///
    /// # Errors
    /// Returns an error when the model cannot be reached.
    fn describe(&self, question: &str, rows: &QueryRows) -> Result<String>;
}

/// Answer `question` from the store, returning at most `max_rows` rows.
///
/// Summary intents are answered in prose without a second model call. Empty
/// results are reported without asking the model to describe nothing.
///
/// # Errors
/// Returns an error when the question is empty, the model fails, or the
/// planned query is rejected or fails to execute.
pub fn answer(
    store: &SqliteStore,
    model: &dyn LanguageModel,
    question: &str,
    max_rows: usize,
) -> Result<Answer> {
    let question = question.trim();
    if question.is_empty() {
        bail!("question is empty");
    }

    let schema = store.schema_description()?;
    let plan = model.plan(question, &schema)?;
    tracing::info!(plan = plan_label(&plan), "planned query");

    if let QueryPlan::Intent(Intent::Summary { level }) = &plan {
        let rows = store.query_read_only(&plan.to_query()?, MAX_ROWS_CEILING)?;
        if rows.truncated {
            tracing::warn!(level = level.as_str(), shown = rows.rows.len(), "summary truncated");
        }
        return Ok(Answer::Prose { text: level.describe_rows(&rows) });
    }

    let query = plan.to_query()?;
    let rows = store.query_read_only(&query, max_rows)?;
    tracing::debug!(rows = rows.rows.len(), truncated = rows.truncated, "query executed");

    let description =
        if rows.is_empty() { NO_RESULTS.to_string() } else { model.describe(question, &rows)? };

    Ok(Answer::Structured { query, rows, description })
}

fn plan_label(plan: &QueryPlan) -> &'static str {
    match plan {
        QueryPlan::Intent(intent) => intent.as_str(),
        QueryPlan::Sql(_) => "sql",
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::path::Path;

    use roamreader_core::{ActivitySegment, PlaceVisit, SummaryLevel, TimelineRecord};
    use serde_json::json;

    use super::*;

    struct ScriptedModel {
        plan: QueryPlan,
        describe_calls: Cell<usize>,
    }

    impl ScriptedModel {
        fn new(plan: QueryPlan) -> Self {
            Self { plan, describe_calls: Cell::new(0) }
        }
    }

    impl LanguageModel for ScriptedModel {
        fn plan(&self, _question: &str, schema: &[TableSchema]) -> Result<QueryPlan> {
            assert_eq!(schema.len(), 2);
            Ok(self.plan.clone())
        }

        fn describe(&self, _question: &str, rows: &QueryRows) -> Result<String> {
            self.describe_calls.set(self.describe_calls.get() + 1);
            Ok(format!("{} rows", rows.rows.len()))
        }
    }

    fn visit(address: &str, state: &str, country: &str, date: &str, minutes: i64) -> TimelineRecord {
        TimelineRecord::PlaceVisit(PlaceVisit {
            address: address.to_string(),
            state: state.to_string(),
            country: country.to_string(),
            visit_date: date.to_string(),
            arrival: format!("{date}T09:00:00Z"),
            duration_minutes: minutes,
            ..PlaceVisit::default()
        })
    }

    fn seeded_store() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.ensure_schema()?;
        store.insert_records(vec![
            visit("Louvre, Paris, France", "", "France", "2023-06-01", 120),
            visit("1 Main St, Austin, Texas, 78701", "Texas", "United States", "2023-06-02", 45),
            visit("2 Oak Ave, Dallas, Texas, 75201", "Texas", "United States", "2023-06-02", 30),
            TimelineRecord::ActivitySegment(ActivitySegment {
                mode_of_travel: "WALKING".to_string(),
                distance: 1200,
                ..ActivitySegment::default()
            }),
        ])?;
        Ok(store)
    }

    #[test]
    fn summary_is_answered_in_prose() -> Result<()> {
        let store = seeded_store()?;
        let model =
            ScriptedModel::new(QueryPlan::Intent(Intent::Summary { level: SummaryLevel::Countries }));
        let answer = answer(&store, &model, "Which countries have I been to?", 1)?;
        assert_eq!(answer, Answer::Prose { text: "Countries visited: France, United States".to_string() });
        assert_eq!(model.describe_calls.get(), 0);
        Ok(())
    }

    #[test]
    fn oversized_summary_is_marked_incomplete() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.ensure_schema()?;
        store.insert_records(
            (0..=MAX_ROWS_CEILING).map(|n| visit("x", "", &format!("Country {n:04}"), "2023-01-01", 1)),
        )?;

        let model =
            ScriptedModel::new(QueryPlan::Intent(Intent::Summary { level: SummaryLevel::Countries }));
        let Answer::Prose { text } = answer(&store, &model, "Where have I been?", 5)? else {
            panic!("expected prose answer");
        };
        assert!(text.starts_with("Countries visited: Country 0000, Country 0001"));
        assert!(text.ends_with("Country 0999, and more"));
        assert!(!text.contains("Country 1000"));
        Ok(())
    }

    #[test]
    fn intent_results_are_bounded_and_described() -> Result<()> {
        let store = seeded_store()?;
        let model = ScriptedModel::new(QueryPlan::Intent(Intent::Date { date: "2023-06-02".to_string() }));
        let Answer::Structured { rows, description, .. } = answer(&store, &model, "Where was I on June 2?", 1)?
        else {
            panic!("expected structured answer");
        };
        assert_eq!(rows.rows.len(), 1);
        assert!(rows.truncated);
        assert_eq!(description, "1 rows");
        Ok(())
    }

    #[test]
    fn duration_intent_sums_minutes() -> Result<()> {
        let store = seeded_store()?;
        let model = ScriptedModel::new(QueryPlan::Intent(Intent::Duration { place: "Texas".to_string() }));
        let Answer::Structured { rows, .. } = answer(&store, &model, "How long in Texas?", 5)? else {
            panic!("expected structured answer");
        };
        assert_eq!(rows.rows, vec![vec![json!(75), json!(2)]]);
        Ok(())
    }

    #[test]
    fn empty_results_skip_description() -> Result<()> {
        let store = seeded_store()?;
        let model = ScriptedModel::new(QueryPlan::Intent(Intent::TravelMode { mode: Some("CYCLING".to_string()) }));
        let Answer::Structured { description, .. } = answer(&store, &model, "How far did I cycle?", 5)? else {
            panic!("expected structured answer");
        };
        assert_eq!(description, NO_RESULTS);
        assert_eq!(model.describe_calls.get(), 0);
        Ok(())
    }

    #[test]
    fn raw_sql_plan_runs_read_only() -> Result<()> {
        let store = seeded_store()?;
        let model = ScriptedModel::new(QueryPlan::Sql("SELECT COUNT(*) FROM activity_segments;".to_string()));
        let Answer::Structured { rows, .. } = answer(&store, &model, "How many trips?", 5)? else {
            panic!("expected structured answer");
        };
        assert_eq!(rows.rows, vec![vec![json!(1)]]);
        Ok(())
    }

    #[test]
    fn destructive_sql_plan_is_rejected() -> Result<()> {
        let store = seeded_store()?;
        let model = ScriptedModel::new(QueryPlan::Sql("DELETE FROM place_visits".to_string()));
        assert!(answer(&store, &model, "Forget everything", 5).is_err());
        assert_eq!(store.counts()?.place_visits, 3);
        Ok(())
    }

    #[test]
    fn blank_question_is_rejected() -> Result<()> {
        let store = seeded_store()?;
        let model = ScriptedModel::new(QueryPlan::Sql("SELECT 1".to_string()));
        assert!(answer(&store, &model, "   ", 5).is_err());
        Ok(())
    }
}
