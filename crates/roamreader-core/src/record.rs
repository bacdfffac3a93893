use serde::{Deserialize, Serialize};

/// One real-world stop.
///
/// Coordinates are `None` when the export omitted them; the store persists
/// those as `0.0` to keep the table shape stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaceVisit {
    pub address: String,
    pub arrival: String,
    pub departure: String,
    pub duration_minutes: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub state: String,
    pub country: String,
    pub visit_date: String,
}

/// One travel leg between two points.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActivitySegment {
    pub start_time: String,
    pub end_time: String,
    pub start_latitude: Option<f64>,
    pub start_longitude: Option<f64>,
    pub end_latitude: Option<f64>,
    pub end_longitude: Option<f64>,
    pub mode_of_travel: String,
    pub distance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineRecord {
    PlaceVisit(PlaceVisit),
    ActivitySegment(ActivitySegment),
}

impl TimelineRecord {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlaceVisit(_) => "place_visit",
            Self::ActivitySegment(_) => "activity_segment",
        }
    }
}

impl From<PlaceVisit> for TimelineRecord {
    fn from(value: PlaceVisit) -> Self {
        Self::PlaceVisit(value)
    }
}

impl From<ActivitySegment> for TimelineRecord {
    fn from(value: ActivitySegment) -> Self {
        Self::ActivitySegment(value)
    }
}

/// Persisted value for a coordinate that may be absent.
#[must_use]
pub fn coordinate_or_zero(value: Option<f64>) -> f64 {
    value.unwrap_or(0.0)
}
