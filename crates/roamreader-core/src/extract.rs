//! Record extraction from a single timeline export document.
//!
//! The document is `{"timelineObjects": [...]}`. Every element carrying a
//! `placeVisit` with a `location` yields a [`PlaceVisit`]; every element
//! carrying an `activitySegment` yields an [`ActivitySegment`]. Anything else
//! is skipped so that newer export object kinds do not break ingestion.

use serde_json::{Map, Value};

use crate::address::classify;
use crate::record::{ActivitySegment, PlaceVisit, TimelineRecord};
use crate::timestamp::{date_part, duration_minutes};

pub const TIMELINE_OBJECTS_KEY: &str = "timelineObjects";

const E7_SCALE: f64 = 10_000_000.0;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("top-level JSON value is not an object")]
    NotAnObject,
    #[error("missing `{TIMELINE_OBJECTS_KEY}` key")]
    MissingTimelineObjects,
    #[error("`{TIMELINE_OBJECTS_KEY}` is not an array")]
    TimelineObjectsNotArray,
}

/// Parse export text and validate its top-level shape.
///
/// # Errors
/// Returns [`ExtractError::Json`] for malformed JSON and the structural
/// variants when the document is not a timeline export.
pub fn parse_document(text: &str) -> Result<Value, ExtractError> {
    let document: Value = serde_json::from_str(text)?;
    timeline_objects(&document)?;
    Ok(document)
}

/// Lazily walk the timeline objects of an export document.
///
/// The shape is validated up front, so an export with an empty
/// `timelineObjects` list is an empty success, distinct from a structural
/// failure.
///
/// # Errors
/// Returns a structural [`ExtractError`] when `document` is not an object with
/// a `timelineObjects` array.
pub fn extract(document: &Value) -> Result<TimelineRecords<'_>, ExtractError> {
    let objects = timeline_objects(document)?;
    Ok(TimelineRecords { objects: objects.iter(), pending: None })
}

fn timeline_objects(document: &Value) -> Result<&Vec<Value>, ExtractError> {
    let object = document.as_object().ok_or(ExtractError::NotAnObject)?;
    let objects = object.get(TIMELINE_OBJECTS_KEY).ok_or(ExtractError::MissingTimelineObjects)?;
    objects.as_array().ok_or(ExtractError::TimelineObjectsNotArray)
}

/// Single-pass iterator over the records of one export document.
#[derive(Debug)]
pub struct TimelineRecords<'a> {
    objects: std::slice::Iter<'a, Value>,
    pending: Option<TimelineRecord>,
}

impl Iterator for TimelineRecords<'_> {
    type Item = TimelineRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(record) = self.pending.take() {
            return Some(record);
        }

        for object in self.objects.by_ref() {
            let visit = place_visit(object).map(TimelineRecord::from);
            let segment = activity_segment(object).map(TimelineRecord::from);
            match (visit, segment) {
                (Some(visit), segment) => {
                    self.pending = segment;
                    return Some(visit);
                }
                (None, Some(segment)) => return Some(segment),
                (None, None) => {
                    tracing::debug!(kinds = ?object_kinds(object), "skipping timeline object");
                }
            }
        }

        None
    }
}

fn place_visit(object: &Value) -> Option<PlaceVisit> {
    let payload = object.get("placeVisit")?;
    let location = payload.get("location")?;

    let address = string_field(location, "address");
    let (arrival, departure) = duration_bounds(payload);
    let duration_minutes = visit_minutes(&arrival, &departure);
    let region = classify(&address);
    let visit_date = date_part(&arrival).to_string();

    Some(PlaceVisit {
        latitude: e7_field(location, "latitudeE7"),
        longitude: e7_field(location, "longitudeE7"),
        state: region.state,
        country: region.country,
        address,
        arrival,
        departure,
        duration_minutes,
        visit_date,
    })
}

fn activity_segment(object: &Value) -> Option<ActivitySegment> {
    let payload = object.get("activitySegment")?;
    let (start_time, end_time) = duration_bounds(payload);
    let start = payload.get("startLocation");
    let end = payload.get("endLocation");

    Some(ActivitySegment {
        start_time,
        end_time,
        start_latitude: start.and_then(|location| e7_field(location, "latitudeE7")),
        start_longitude: start.and_then(|location| e7_field(location, "longitudeE7")),
        end_latitude: end.and_then(|location| e7_field(location, "latitudeE7")),
        end_longitude: end.and_then(|location| e7_field(location, "longitudeE7")),
        mode_of_travel: string_field(payload, "activityType"),
        distance: distance_field(payload),
    })
}

fn visit_minutes(arrival: &str, departure: &str) -> i64 {
    if arrival.is_empty() || departure.is_empty() {
        return 0;
    }
    match duration_minutes(arrival, departure) {
        Ok(minutes) => minutes,
        Err(err) => {
            tracing::debug!(%err, "visit duration degraded to zero");
            0
        }
    }
}

fn duration_bounds(payload: &Value) -> (String, String) {
    payload.get("duration").map_or_else(
        || (String::new(), String::new()),
        |duration| (string_field(duration, "startTimestamp"), string_field(duration, "endTimestamp")),
    )
}

fn string_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn e7_field(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64).map(|scaled| scaled / E7_SCALE)
}

#[allow(clippy::cast_possible_truncation)]
fn distance_field(payload: &Value) -> i64 {
    match payload.get("distance") {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value.round() as i64))
            .unwrap_or_default(),
        _ => 0,
    }
}

/// Keys of a timeline object, for diagnostics on skipped objects.
#[must_use]
pub fn object_kinds(object: &Value) -> Vec<&str> {
    object.as_object().map(Map::keys).map(|keys| keys.map(String::as_str).collect()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn records(document: &Value) -> Vec<TimelineRecord> {
        match extract(document) {
            Ok(records) => records.collect(),
            Err(err) => panic!("extraction failed: {err}"),
        }
    }

    #[test]
    fn full_place_visit_is_normalized() {
        let document = json!({
            "timelineObjects": [{
                "placeVisit": {
                    "location": {
                        "address": "1 Main St, Austin, Texas, 78701",
                        "latitudeE7": 302_672_000,
                        "longitudeE7": -977_431_000
                    },
                    "duration": {
                        "startTimestamp": "2023-05-27T10:00:00.000Z",
                        "endTimestamp": "2023-05-27T12:15:00Z"
                    }
                }
            }]
        });

        let records = records(&document);
        assert_eq!(records.len(), 1);
        let TimelineRecord::PlaceVisit(visit) = &records[0] else {
            panic!("expected a place visit, got {:?}", records[0]);
        };
        assert_eq!(visit.duration_minutes, 135);
        assert_eq!(visit.state, "Texas");
        assert_eq!(visit.country, "United States");
        assert_eq!(visit.visit_date, "2023-05-27");
        assert_eq!(visit.latitude, Some(30.2672));
        assert_eq!(visit.longitude, Some(-97.7431));
    }

    #[test]
    fn bare_place_visit_degrades_to_defaults() {
        let document = json!({"timelineObjects": [{"placeVisit": {"location": {}}}]});
        let records = records(&document);
        assert_eq!(records, vec![TimelineRecord::PlaceVisit(PlaceVisit::default())]);
    }

    #[test]
    fn place_visit_without_location_is_skipped() {
        let document = json!({"timelineObjects": [{"placeVisit": {"duration": {}}}]});
        assert!(records(&document).is_empty());
    }

    #[test]
    fn unparseable_timestamp_zeroes_duration_but_keeps_date() {
        let document = json!({
            "timelineObjects": [{
                "placeVisit": {
                    "location": {"address": "x"},
                    "duration": {
                        "startTimestamp": "2023-05-27T10:00:00+02:00",
                        "endTimestamp": "2023-05-27T12:00:00Z"
                    }
                }
            }]
        });
        let records = records(&document);
        let TimelineRecord::PlaceVisit(visit) = &records[0] else {
            panic!("expected a place visit");
        };
        assert_eq!(visit.duration_minutes, 0);
        assert_eq!(visit.visit_date, "2023-05-27");
    }

    #[test]
    fn activity_segment_defaults_missing_fields() {
        let document = json!({
            "timelineObjects": [{
                "activitySegment": {
                    "startLocation": {"latitudeE7": 10_000_000},
                    "activityType": "IN_PASSENGER_VEHICLE",
                    "distance": 1234.6
                }
            }]
        });
        let records = records(&document);
        assert_eq!(
            records,
            vec![TimelineRecord::ActivitySegment(ActivitySegment {
                start_latitude: Some(1.0),
                mode_of_travel: "IN_PASSENGER_VEHICLE".to_string(),
                distance: 1235,
                ..ActivitySegment::default()
            })]
        );
    }

    #[test]
    fn object_with_both_payloads_yields_both_records() {
        let document = json!({
            "timelineObjects": [
                {"placeVisit": {"location": {}}, "activitySegment": {}},
                {"activitySegment": {"distance": 5}}
            ]
        });
        let kinds = records(&document).iter().map(TimelineRecord::as_str).collect::<Vec<_>>();
        assert_eq!(kinds, vec!["place_visit", "activity_segment", "activity_segment"]);
    }

    #[test]
    fn unknown_objects_are_skipped() {
        let document = json!({"timelineObjects": [{"somethingNew": {}}, 42, null]});
        assert!(records(&document).is_empty());
    }

    #[test]
    fn empty_export_is_an_empty_success() {
        let document = json!({"timelineObjects": []});
        assert!(records(&document).is_empty());
    }

    #[test]
    fn structural_failures_are_distinct() {
        assert!(matches!(extract(&json!([])), Err(ExtractError::NotAnObject)));
        assert!(matches!(extract(&json!({})), Err(ExtractError::MissingTimelineObjects)));
        assert!(matches!(
            extract(&json!({"timelineObjects": {}})),
            Err(ExtractError::TimelineObjectsNotArray)
        ));
        assert!(matches!(parse_document("{not json"), Err(ExtractError::Json(_))));
        assert!(matches!(parse_document("{}"), Err(ExtractError::MissingTimelineObjects)));
    }

    #[test]
    fn object_kinds_lists_keys() {
        assert_eq!(object_kinds(&json!({"a": 1, "b": 2})), vec!["a", "b"]);
        assert!(object_kinds(&json!(3)).is_empty());
    }
}
