//! Structured queries the question-answering shell may run against the store.
//!
//! Intents compile to fixed parameterized SQL. Free-form SQL is only admitted
//! after [`validate_read_only_sql`]; the store re-checks read-only status when
//! it prepares the statement.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MAX_ROWS: usize = 5;
pub const MAX_ROWS_CEILING: usize = 1_000;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum QueryError {
    #[error("query is empty")]
    Empty,
    #[error("query contains more than one statement")]
    MultipleStatements,
    #[error("query is not read-only: {0}")]
    NotReadOnly(String),
    #[error("row limit must be between 1 and {MAX_ROWS_CEILING}, got {0}")]
    InvalidLimit(usize),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SummaryLevel {
    Countries,
    States,
}

impl SummaryLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Countries => "countries",
            Self::States => "states",
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Countries => "country",
            Self::States => "state",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Countries => "Countries",
            Self::States => "States",
        }
    }

    /// Prose rendering of a distinct-values summary.
    #[must_use]
    pub fn describe(self, values: &[String]) -> String {
        if values.is_empty() {
            format!("No {} found.", self.as_str())
        } else {
            format!("{} visited: {}", self.label(), values.join(", "))
        }
    }

    /// Prose rendering of summary query rows, noting when the row bound
    /// cut the list short.
    #[must_use]
    pub fn describe_rows(self, rows: &QueryRows) -> String {
        let text = self.describe(&rows.first_column_text());
        if rows.truncated {
            format!("{text}, and more")
        } else {
            text
        }
    }
}

/// The kinds of travel question the shell knows how to answer.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    /// Places visited on a `YYYY-MM-DD` date.
    Date { date: String },
    /// Total time spent in a state, country or address fragment.
    Duration { place: String },
    /// Places within an area.
    List { area: String },
    /// Distinct countries or states visited.
    Summary { level: SummaryLevel },
    /// Distance and leg counts per travel mode.
    TravelMode {
        #[serde(default)]
        mode: Option<String>,
    },
}

impl Intent {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Date { .. } => "date",
            Self::Duration { .. } => "duration",
            Self::List { .. } => "list",
            Self::Summary { .. } => "summary",
            Self::TravelMode { .. } => "travel_mode",
        }
    }

    #[must_use]
    pub fn to_query(&self) -> StructuredQuery {
        match self {
            Self::Date { date } => StructuredQuery::new(
                "SELECT address, arrival, departure, duration_min, state, country
                 FROM place_visits
                 WHERE visit_date = ?1
                 ORDER BY arrival",
                vec![QueryValue::Text(date.trim().to_string())],
            ),
            Self::Duration { place } => StructuredQuery::new(
                "SELECT COALESCE(SUM(duration_min), 0) AS total_minutes, COUNT(*) AS visits
                 FROM place_visits
                 WHERE state = ?1 OR country = ?1 OR address LIKE ?2 ESCAPE '\\'",
                place_params(place),
            ),
            Self::List { area } => StructuredQuery::new(
                "SELECT DISTINCT address, state, country
                 FROM place_visits
                 WHERE state = ?1 OR country = ?1 OR address LIKE ?2 ESCAPE '\\'
                 ORDER BY address",
                place_params(area),
            ),
            Self::Summary { level } => {
                let column = level.column();
                StructuredQuery::new(
                    format!(
                        "SELECT DISTINCT {column} FROM place_visits
                         WHERE {column} IS NOT NULL AND {column} != ''
                         ORDER BY {column}"
                    ),
                    Vec::new(),
                )
            }
            Self::TravelMode { mode: Some(mode) } => StructuredQuery::new(
                "SELECT mode_of_travel, COUNT(*) AS segments, COALESCE(SUM(distance), 0) AS total_distance
                 FROM activity_segments
                 WHERE mode_of_travel = ?1
                 GROUP BY mode_of_travel",
                vec![QueryValue::Text(mode.trim().to_string())],
            ),
            Self::TravelMode { mode: None } => StructuredQuery::new(
                "SELECT mode_of_travel, COUNT(*) AS segments, COALESCE(SUM(distance), 0) AS total_distance
                 FROM activity_segments
                 GROUP BY mode_of_travel
                 ORDER BY total_distance DESC",
                Vec::new(),
            ),
        }
    }
}

fn place_params(place: &str) -> Vec<QueryValue> {
    let place = place.trim();
    vec![QueryValue::Text(place.to_string()), QueryValue::Text(format!("%{}%", escape_like(place)))]
}

/// Escape `LIKE` wildcards so user text only matches literally.
#[must_use]
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum QueryValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

/// SQL text plus positional bind values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredQuery {
    pub sql: String,
    pub params: Vec<QueryValue>,
}

impl StructuredQuery {
    #[must_use]
    pub fn new(sql: impl Into<String>, params: Vec<QueryValue>) -> Self {
        Self { sql: sql.into(), params }
    }

    /// Free-form SQL, validated as a single read-only statement.
    ///
    /// # Errors
    /// Returns a [`QueryError`] when the text is empty, holds more than one
    /// statement or does not start with `SELECT`/`WITH`.
    pub fn raw(sql: &str) -> Result<Self, QueryError> {
        Ok(Self::new(validate_read_only_sql(sql)?, Vec::new()))
    }
}

/// What the language model decided to run for a question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "plan", content = "value", rename_all = "snake_case")]
pub enum QueryPlan {
    Intent(Intent),
    Sql(String),
}

impl QueryPlan {
    /// # Errors
    /// Returns a [`QueryError`] when a raw SQL plan fails validation.
    pub fn to_query(&self) -> Result<StructuredQuery, QueryError> {
        match self {
            Self::Intent(intent) => Ok(intent.to_query()),
            Self::Sql(sql) => StructuredQuery::raw(sql),
        }
    }
}

/// Rows returned by a bounded read-only query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub truncated: bool,
}

impl QueryRows {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of every row rendered as text, skipping nulls.
    #[must_use]
    pub fn first_column_text(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.first())
            .filter_map(|value| match value {
                Value::Null => None,
                Value::String(text) => Some(text.clone()),
                other => Some(other.to_string()),
            })
            .collect()
    }

    /// One line per row, used when asking the model to describe results.
    #[must_use]
    pub fn to_lines(&self) -> String {
        self.rows
            .iter()
            .map(|row| {
                let cells = row.iter().map(Value::to_string).collect::<Vec<_>>();
                format!("({})", cells.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Shell response: query results with a description, or plain prose.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Answer {
    Structured { query: StructuredQuery, rows: QueryRows, description: String },
    Prose { text: String },
}

/// # Errors
/// Returns [`QueryError::InvalidLimit`] for zero or over-ceiling limits.
pub fn validate_limit(max_rows: usize) -> Result<usize, QueryError> {
    if max_rows == 0 || max_rows > MAX_ROWS_CEILING {
        return Err(QueryError::InvalidLimit(max_rows));
    }
    Ok(max_rows)
}

/// Normalize free-form SQL and reject anything but a single `SELECT`/`WITH`.
///
/// Quoted literals, quoted identifiers and comments are skipped when looking
/// for statement separators and the leading keyword.
///
/// # Errors
/// Returns a [`QueryError`] describing the rejection.
pub fn validate_read_only_sql(sql: &str) -> Result<String, QueryError> {
    let code = code_chars(sql);
    let separator = code.iter().position(|&(_, c)| c == ';');
    let (statement, rest) = match separator {
        Some(position) => (&code[..position], &code[position + 1..]),
        None => (&code[..], &[][..]),
    };

    if rest.iter().any(|&(_, c)| c != ';' && !c.is_whitespace()) {
        return Err(QueryError::MultipleStatements);
    }
    if statement.iter().all(|&(_, c)| c.is_whitespace()) {
        return Err(QueryError::Empty);
    }

    let mut keyword = statement
        .iter()
        .map(|&(_, c)| c)
        .skip_while(|c| c.is_whitespace())
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_ascii_lowercase();
    if keyword.is_empty() {
        keyword = statement.iter().map(|&(_, c)| c).filter(|c| !c.is_whitespace()).take(1).collect();
    }
    if keyword != "select" && keyword != "with" {
        return Err(QueryError::NotReadOnly(keyword));
    }

    let end = separator.map_or(sql.len(), |position| code[position].0);
    Ok(sql[..end].trim().to_string())
}

/// Characters of `sql` outside literals and comments, with their byte
/// offsets. A literal collapses to a single `'` and a comment to a space.
fn code_chars(sql: &str) -> Vec<(usize, char)> {
    let mut code = Vec::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    while let Some((index, c)) = chars.next() {
        match c {
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                for (_, next) in chars.by_ref() {
                    if next == close {
                        break;
                    }
                }
                code.push((index, '\''));
            }
            '-' if chars.peek().is_some_and(|&(_, next)| next == '-') => {
                for (_, next) in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
                code.push((index, ' '));
            }
            '/' if chars.peek().is_some_and(|&(_, next)| next == '*') => {
                chars.next();
                let mut previous = '\0';
                for (_, next) in chars.by_ref() {
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
                code.push((index, ' '));
            }
            _ => code.push((index, c)),
        }
    }
    code
}
