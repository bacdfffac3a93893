//! Domain model and pure transformations for location-history ingestion.

pub mod address;
pub mod extract;
pub mod query;
pub mod record;
pub mod timestamp;

pub use address::{classify, Region, POSTAL_CODE_COUNTRY};
pub use extract::{extract, parse_document, ExtractError, TimelineRecords, TIMELINE_OBJECTS_KEY};
pub use query::{
    validate_limit, validate_read_only_sql, Answer, Intent, QueryError, QueryPlan, QueryRows,
    QueryValue, StructuredQuery, SummaryLevel, DEFAULT_MAX_ROWS, MAX_ROWS_CEILING,
};
pub use record::{coordinate_or_zero, ActivitySegment, PlaceVisit, TimelineRecord};
pub use timestamp::{date_part, duration_minutes, parse_timestamp, TimestampError};
