use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CivicEyeError;

// --- Geo Types ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    /// Reported GPS accuracy radius in meters.
    pub accuracy_radius_m: f64,
}

/// Haversine great-circle distance between two lat/lng points in meters.
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_M * c
}

impl GeoPoint {
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        haversine_m(self.lat, self.lng, other.lat, other.lng)
    }
}

// --- Media ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Parse a wire-level kind string. Anything other than the two
    /// supported kinds is rejected up front.
    pub fn parse(s: &str) -> Result<Self, CivicEyeError> {
        match s.to_lowercase().as_str() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            other => Err(CivicEyeError::UnsupportedMediaKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// One citizen submission. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSample {
    pub id: Uuid,
    pub bytes: Vec<u8>,
    pub kind: MediaKind,
    pub captured_at: DateTime<Utc>,
    pub location: GeoPoint,
    /// Optional free-text description from the submitter, carried
    /// through to the emitted report.
    pub description: Option<String>,
}

impl MediaSample {
    pub fn new(
        bytes: Vec<u8>,
        kind: MediaKind,
        captured_at: DateTime<Utc>,
        location: GeoPoint,
        description: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            bytes,
            kind,
            captured_at,
            location,
            description,
        }
    }
}

// --- Detection ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Pothole,
    GarbageOverflow,
    WaterLeak,
    BrokenLight,
    UnsafeArea,
    Unknown,
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueType::Pothole => write!(f, "pothole"),
            IssueType::GarbageOverflow => write!(f, "garbage_overflow"),
            IssueType::WaterLeak => write!(f, "water_leak"),
            IssueType::BrokenLight => write!(f, "broken_light"),
            IssueType::UnsafeArea => write!(f, "unsafe_area"),
            IssueType::Unknown => write!(f, "unknown"),
        }
    }
}

/// One classifier output for one media sample.
/// Produced once per pipeline run; owned by that run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Detection {
    pub issue_type: IssueType,
    /// Classifier confidence in the issue type, 0.0-1.0.
    pub confidence: f64,
    /// Raw model severity signal, 0.0-1.0. Contextless; the severity
    /// scorer tempers it with zone risk and affected area.
    pub raw_severity_signal: f64,
}

// --- Incident ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    InReview,
    Resolved,
}

impl IncidentStatus {
    /// Resolved incidents never receive merges; a new report at the same
    /// location starts a fresh incident.
    pub fn accepts_reports(&self) -> bool {
        matches!(self, IncidentStatus::Open | IncidentStatus::InReview)
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::Open => write!(f, "open"),
            IncidentStatus::InReview => write!(f, "in_review"),
            IncidentStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// The system's model of one physical real-world defect, distinct from
/// each individual citizen report of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    /// Location of the first report that created this incident.
    pub representative_location: GeoPoint,
    pub issue_type: IssueType,
    /// Number of detections clustered into this incident.
    pub report_count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Running max-weighted severity blend, 0.0-1.0. A single low
    /// report never directly depresses it; sustained lower reports
    /// pull it down through the decayed average.
    pub aggregated_severity: f64,
    pub status: IncidentStatus,
}

impl Incident {
    pub fn open(
        location: GeoPoint,
        issue_type: IssueType,
        seen_at: DateTime<Utc>,
        severity: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            representative_location: location,
            issue_type,
            report_count: 1,
            first_seen: seen_at,
            last_seen: seen_at,
            aggregated_severity: severity,
            status: IncidentStatus::Open,
        }
    }
}

// --- Priority ---

/// Derived ranking attached to an incident at query time. A view, not
/// a fact: recomputed whenever incident state changes, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityScore {
    pub value: f64,
    /// Tie-break key: older incidents rank first at equal value.
    pub first_seen: DateTime<Utc>,
}

impl PriorityScore {
    /// Total-order comparison: higher value first, then earliest
    /// first_seen.
    pub fn cmp_triage(&self, other: &PriorityScore) -> std::cmp::Ordering {
        other
            .value
            .partial_cmp(&self.value)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| self.first_seen.cmp(&other.first_seen))
    }
}

// --- Report ---

/// The emitted output record: one detection, its resolved incident, and
/// the priority at emission time. Immutable once emitted — later
/// detections update the incident but never past reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub sample_id: Uuid,
    pub detection: Detection,
    pub incident_id: Uuid,
    pub severity: f64,
    pub priority: f64,
    pub urgency: crate::triage::Urgency,
    pub location: GeoPoint,
    pub description: Option<String>,
    pub status: IncidentStatus,
    pub captured_at: DateTime<Utc>,
    pub emitted_at: DateTime<Utc>,
}

impl Report {
    /// Urgency on the original 1-10 reporting scale.
    pub fn urgency_score_10(&self) -> u8 {
        (1.0 + self.severity * 9.0).round().clamp(1.0, 10.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn haversine_sf_to_oakland() {
        // SF to Oakland is ~13km
        let dist = haversine_m(37.7749, -122.4194, 37.8044, -122.2712);
        assert!(
            (dist - 13_000.0).abs() < 2_000.0,
            "SF to Oakland should be ~13km, got {dist}m"
        );
    }

    #[test]
    fn haversine_same_point_is_zero() {
        let dist = haversine_m(44.9778, -93.265, 44.9778, -93.265);
        assert!(dist < 1.0, "Same point should be 0m, got {dist}");
    }

    #[test]
    fn haversine_fifty_meter_offset() {
        // ~50m north of a point: 50 / 111_320 degrees of latitude.
        let d_lat = 50.0 / 111_320.0;
        let dist = haversine_m(44.9778, -93.265, 44.9778 + d_lat, -93.265);
        assert!(
            (dist - 50.0).abs() < 1.0,
            "Offset should be ~50m, got {dist}"
        );
    }

    #[test]
    fn media_kind_parses_known_kinds() {
        assert_eq!(MediaKind::parse("image").unwrap(), MediaKind::Image);
        assert_eq!(MediaKind::parse("Video").unwrap(), MediaKind::Video);
    }

    #[test]
    fn media_kind_rejects_unknown_kind() {
        let err = MediaKind::parse("audio").unwrap_err();
        assert!(matches!(
            err,
            crate::error::CivicEyeError::UnsupportedMediaKind(_)
        ));
    }

    #[test]
    fn resolved_incidents_do_not_accept_reports() {
        assert!(IncidentStatus::Open.accepts_reports());
        assert!(IncidentStatus::InReview.accepts_reports());
        assert!(!IncidentStatus::Resolved.accepts_reports());
    }

    #[test]
    fn priority_orders_by_value_then_age() {
        let old = Utc::now() - chrono::Duration::days(3);
        let new = Utc::now();
        let a = PriorityScore {
            value: 0.9,
            first_seen: new,
        };
        let b = PriorityScore {
            value: 0.4,
            first_seen: old,
        };
        assert_eq!(a.cmp_triage(&b), std::cmp::Ordering::Less);

        let c = PriorityScore {
            value: 0.9,
            first_seen: old,
        };
        // Equal value: older first_seen wins.
        assert_eq!(c.cmp_triage(&a), std::cmp::Ordering::Less);
    }

    #[test]
    fn media_sample_bytes_round_trip_json() {
        let sample = MediaSample::new(
            vec![0xFF, 0xD8, 0x00, 0x42, 0xFF, 0xD9, 0x01],
            MediaKind::Image,
            Utc::now(),
            GeoPoint {
                lat: 44.97,
                lng: -93.26,
                accuracy_radius_m: 10.0,
            },
            Some("pothole on 5th".to_string()),
        );
        let json = serde_json::to_string(&sample).unwrap();
        let back: MediaSample = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bytes, sample.bytes);
        assert_eq!(back.id, sample.id);
    }

    #[test]
    fn issue_type_serializes_snake_case() {
        let json = serde_json::to_string(&IssueType::GarbageOverflow).unwrap();
        assert_eq!(json, "\"garbage_overflow\"");
    }
}
