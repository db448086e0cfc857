//! Wire format for the remote path store.
//!
//! Outgoing payloads omit absent fields entirely: the server treats an
//! omitted field differently from an explicit empty one, so `null` is never
//! sent. Incoming bodies are decoded leniently. Missing or mistyped optional
//! fields become `None` instead of failing the whole response.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{GeoPoint, OptionExt, PropulsionMethod, Result, SyncError, Track, Vessel, ViewportQuad};

// ============================================================================
// Timestamps
// ============================================================================

/// Seconds since the Unix epoch, with millisecond precision.
pub fn to_epoch_seconds(time: &DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

pub fn from_epoch_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt((seconds * 1000.0).round() as i64)
        .single()
}

// ============================================================================
// Upload
// ============================================================================

/// Body of a track upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadPayload {
    pub title: String,
    /// Epoch seconds
    pub created: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(rename = "totalTime")]
    pub total_time: f64,
    #[serde(rename = "totalDistance")]
    pub total_distance: f64,
    #[serde(rename = "averageSpeed")]
    pub average_speed: f64,
    #[serde(rename = "type")]
    pub track_type: String,
    pub state: String,
    /// Vessel name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vessel: Option<String>,
    /// Vessel remote ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vessel_id: Option<String>,
    pub points: Vec<UploadPoint>,
}

/// One point of an upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propulsion: Option<String>,
    /// Epoch seconds
    pub created: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// JSON cannot carry NaN or infinity; those become 0.
fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

impl UploadPayload {
    /// Build the payload from a track snapshot and its vessel, if any.
    pub fn from_track(track: &Track, vessel: Option<&Vessel>) -> Self {
        Self {
            title: track.title.clone(),
            created: to_epoch_seconds(&track.created_at),
            notes: track.notes.clone(),
            total_time: finite_or_zero(track.total_time),
            total_distance: finite_or_zero(track.total_distance),
            average_speed: finite_or_zero(track.average_speed),
            track_type: track.track_type.as_str().to_string(),
            state: track.state.as_str().to_string(),
            vessel: vessel.map(|v| v.name.clone()),
            vessel_id: vessel.and_then(|v| v.remote_id.clone()),
            points: track.points.iter().map(UploadPoint::from_point).collect(),
        }
    }
}

impl UploadPoint {
    pub fn from_point(point: &GeoPoint) -> Self {
        Self {
            latitude: point.latitude,
            longitude: point.longitude,
            propulsion: point.propulsion.map(|p| p.as_str().to_string()),
            created: to_epoch_seconds(&point.timestamp),
            notes: point.notes.clone(),
        }
    }
}

/// Successful upload response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UploadResponse {
    #[serde(default, deserialize_with = "lenient_string")]
    pub path_id: Option<String>,
}

impl UploadResponse {
    /// The server-assigned path ID; a response without one is undecodable.
    pub fn into_path_id(self) -> Result<String> {
        self.path_id
            .filter(|id| !id.is_empty())
            .ok_or_decode("path_id")
    }
}

// ============================================================================
// Fetch
// ============================================================================

/// A path as returned by fetch-by-ID (with points) or fetch-in-bounds (without).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemotePath {
    #[serde(rename = "_id", default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    /// Epoch seconds
    #[serde(default, deserialize_with = "lenient_f64")]
    pub created: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub notes: Option<String>,
    #[serde(rename = "totalTime", default, deserialize_with = "lenient_f64")]
    pub total_time: Option<f64>,
    #[serde(rename = "totalDistance", default, deserialize_with = "lenient_f64")]
    pub total_distance: Option<f64>,
    #[serde(rename = "averageSpeed", default, deserialize_with = "lenient_f64")]
    pub average_speed: Option<f64>,
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub track_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient_creator")]
    pub creator: Option<RemoteCreator>,
    #[serde(default, deserialize_with = "lenient_points")]
    pub points: Option<Vec<RemotePoint>>,
}

impl RemotePath {
    pub fn creator_username(&self) -> Option<&str> {
        self.creator.as_ref().and_then(|c| c.username.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemoteCreator {
    #[serde(default, deserialize_with = "lenient_string")]
    pub username: Option<String>,
}

/// A point inside a fetched path.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemotePoint {
    #[serde(rename = "_id", default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub longitude: Option<f64>,
    /// Epoch seconds
    #[serde(default, deserialize_with = "lenient_f64")]
    pub created: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub propulsion: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub notes: Option<String>,
}

impl RemotePoint {
    /// Convert to a local point. Points without a position are dropped;
    /// a missing timestamp falls back to `fallback_time`.
    pub fn to_geo_point(&self, fallback_time: DateTime<Utc>) -> Option<GeoPoint> {
        let (latitude, longitude) = (self.latitude?, self.longitude?);
        Some(GeoPoint {
            latitude,
            longitude,
            timestamp: self
                .created
                .and_then(from_epoch_seconds)
                .unwrap_or(fallback_time),
            propulsion: self.propulsion.as_deref().and_then(PropulsionMethod::from_raw),
            notes: self.notes.clone(),
            remote_id: self.id.clone(),
        })
    }
}

/// Fetch-in-bounds response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BoundsResponse {
    #[serde(default)]
    pub paths: Vec<RemotePath>,
}

// ============================================================================
// Decoding
// ============================================================================

fn decode<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(SyncError::DecodeError {
            message: "empty response body".to_string(),
        });
    }
    Ok(serde_json::from_slice(body)?)
}

pub fn decode_upload_response(body: &[u8]) -> Result<UploadResponse> {
    decode(body)
}

pub fn decode_path(body: &[u8]) -> Result<RemotePath> {
    decode(body)
}

pub fn decode_bounds_response(body: &[u8]) -> Result<BoundsResponse> {
    decode(body)
}

/// Accept a string or a number; anything else (including null) is absent.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Accept a number or a numeric string; anything else (including null) is absent.
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Accept a creator object or a bare username.
fn lenient_creator<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<RemoteCreator>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(username)) => Some(RemoteCreator {
            username: Some(username),
        }),
        Some(value @ Value::Object(_)) => serde_json::from_value(value).ok(),
        _ => None,
    })
}

/// Keep the entries that decode as points and drop the rest.
fn lenient_points<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Vec<RemotePoint>>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(entries)) => Some(
            entries
                .into_iter()
                .filter(Value::is_object)
                .filter_map(|entry| serde_json::from_value(entry).ok())
                .collect(),
        ),
        _ => None,
    })
}

// ============================================================================
// Bounds query
// ============================================================================

/// Encode a viewport as eight comma-separated floats: (longitude, latitude)
/// for the top-left, top-right, bottom-right and bottom-left corners.
pub fn bounds_query(quad: &ViewportQuad) -> String {
    quad.corners()
        .iter()
        .flat_map(|c| [c.longitude, c.latitude])
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TrackState, TrackType};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_payload_omits_absent_fields() {
        let mut track = Track::new("Morning Sail", at(1_466_000_000));
        track
            .points
            .push(GeoPoint::new(37.8, -122.4, at(1_466_000_010)));

        let json = serde_json::to_value(UploadPayload::from_track(&track, None)).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("notes"));
        assert!(!obj.contains_key("vessel"));
        assert!(!obj.contains_key("vessel_id"));
        assert_eq!(obj["created"], serde_json::json!(1_466_000_000.0));
        assert_eq!(obj["type"], "past");
        assert_eq!(obj["state"], "editing");

        let point = obj["points"][0].as_object().unwrap();
        assert!(!point.contains_key("propulsion"));
        assert!(!point.contains_key("notes"));
        assert!(!json.to_string().contains("null"));
    }

    #[test]
    fn test_payload_normalizes_non_finite_speed() {
        let mut track = Track::new("t", at(0));
        track.average_speed = f64::NAN;
        track.total_distance = f64::INFINITY;
        let payload = UploadPayload::from_track(&track, None);
        assert_eq!(payload.average_speed, 0.0);
        assert_eq!(payload.total_distance, 0.0);
    }

    #[test]
    fn test_payload_vessel_fields() {
        let track = Track::new("t", at(0));
        let mut vessel = Vessel::new("Dora", None);
        let payload = UploadPayload::from_track(&track, Some(&vessel));
        assert_eq!(payload.vessel.as_deref(), Some("Dora"));
        assert_eq!(payload.vessel_id, None);

        vessel.remote_id = Some("v-9".to_string());
        let payload = UploadPayload::from_track(&track, Some(&vessel));
        assert_eq!(payload.vessel_id.as_deref(), Some("v-9"));
    }

    #[test]
    fn test_decode_full_path() {
        let body = br#"{
            "_id": "abc123", "title": "Bay Loop", "created": 1466000000.5,
            "totalTime": 600, "totalDistance": "1234.5", "averageSpeed": 2.0,
            "type": "past", "state": "complete",
            "creator": {"username": "kim"},
            "points": [
                {"latitude": 37.8, "longitude": -122.4, "created": 1466000000, "propulsion": "Sail"},
                {"latitude": 37.9, "created": 1466000060},
                {"latitude": 37.81, "longitude": -122.41, "propulsion": ""}
            ]
        }"#;
        let path = decode_path(body).unwrap();
        assert_eq!(path.id.as_deref(), Some("abc123"));
        assert_eq!(path.total_distance, Some(1234.5));
        assert_eq!(path.creator_username(), Some("kim"));
        assert_eq!(TrackType::from_raw(path.track_type.as_deref().unwrap()), TrackType::Past);
        assert_eq!(TrackState::from_raw(path.state.as_deref().unwrap()), TrackState::Complete);

        let fallback = at(42);
        let points: Vec<GeoPoint> = path
            .points
            .unwrap()
            .iter()
            .filter_map(|p| p.to_geo_point(fallback))
            .collect();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].propulsion, Some(PropulsionMethod::Sail));
        assert_eq!(points[1].propulsion, None);
        assert_eq!(points[1].timestamp, fallback);
    }

    #[test]
    fn test_decode_tolerates_missing_and_null_fields() {
        let path = decode_path(br#"{"_id": 17, "notes": null}"#).unwrap();
        assert_eq!(path.id.as_deref(), Some("17"));
        assert_eq!(path.notes, None);
        assert_eq!(path.title, None);
        assert_eq!(path.points, None);
    }

    #[test]
    fn test_decode_accepts_bare_creator_and_skips_bad_points() {
        let path = decode_path(
            br#"{
                "_id": "a",
                "creator": "kim",
                "points": [null, {"latitude": 37.8, "longitude": -122.4}, "junk", 3]
            }"#,
        )
        .unwrap();
        assert_eq!(path.creator_username(), Some("kim"));
        let points = path.points.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].latitude, Some(37.8));

        let odd = decode_path(br#"{"_id": "b", "creator": 5, "points": {"latitude": 1}}"#).unwrap();
        assert_eq!(odd.creator, None);
        assert_eq!(odd.points, None);
    }

    #[test]
    fn test_decode_rejects_empty_or_malformed_body() {
        assert!(matches!(decode_path(b""), Err(SyncError::DecodeError { .. })));
        assert!(matches!(decode_path(b"{not json"), Err(SyncError::DecodeError { .. })));
    }

    #[test]
    fn test_upload_response_requires_path_id() {
        let ok = decode_upload_response(br#"{"path_id": "abc123"}"#).unwrap();
        assert_eq!(ok.into_path_id().unwrap(), "abc123");

        let missing = decode_upload_response(br#"{}"#).unwrap();
        assert!(matches!(missing.into_path_id(), Err(SyncError::DecodeError { .. })));
    }

    #[test]
    fn test_decode_bounds_response() {
        let response = decode_bounds_response(br#"{"paths": [{"_id": "a"}, {"_id": "b"}]}"#).unwrap();
        assert_eq!(response.paths.len(), 2);
        assert!(decode_bounds_response(br#"{}"#).unwrap().paths.is_empty());
    }

    #[test]
    fn test_bounds_query_corner_order() {
        let quad = ViewportQuad::from_edges(38.0, 37.0, -122.0, -123.0);
        assert_eq!(
            bounds_query(&quad),
            "-123,38,-122,38,-122,37,-123,37"
        );
    }

    #[test]
    fn test_epoch_round_trip_keeps_millis() {
        let t = at(1_466_000_000) + chrono::Duration::milliseconds(250);
        assert_eq!(to_epoch_seconds(&t), 1_466_000_000.25);
        assert_eq!(from_epoch_seconds(1_466_000_000.25), Some(t));
        assert_eq!(from_epoch_seconds(f64::NAN), None);
    }
}
