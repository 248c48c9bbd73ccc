//! Severity scoring: the raw model signal is noisy and contextless, so
//! it is blended with the affected-area estimate and a zone risk class
//! a pure classifier cannot see.

use async_trait::async_trait;

use civiceye_common::{CivicEyeError, Detection, GeoPoint, IssueType, SeverityWeights};

/// Severity ceiling for Unknown detections. Low-confidence
/// classification must not drive high-priority triage.
const UNKNOWN_SEVERITY_CAP: f64 = 0.3;

/// Risk class of the zone a report came from. A pothole on a highway
/// outranks the same pothole in a quiet lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneRisk {
    Low,
    Medium,
    High,
}

impl ZoneRisk {
    pub fn value(&self) -> f64 {
        match self {
            ZoneRisk::Low => 0.0,
            ZoneRisk::Medium => 0.5,
            ZoneRisk::High => 1.0,
        }
    }
}

/// External zone lookup: geolocation to risk class.
#[async_trait]
pub trait ZoneRiskLookup: Send + Sync {
    async fn risk_class(&self, location: &GeoPoint) -> anyhow::Result<ZoneRisk>;
}

/// Fixed-risk lookup for deployments without zone data, and for tests.
pub struct UniformZoneRisk(pub ZoneRisk);

#[async_trait]
impl ZoneRiskLookup for UniformZoneRisk {
    async fn risk_class(&self, _location: &GeoPoint) -> anyhow::Result<ZoneRisk> {
        Ok(self.0)
    }
}

/// Weighted blend of model signal and context, clamped to [0, 1].
pub struct SeverityScorer {
    weights: SeverityWeights,
}

impl SeverityScorer {
    pub fn new(weights: SeverityWeights) -> Self {
        Self { weights }
    }

    pub fn score(
        &self,
        detection: &Detection,
        area_affected_ratio: f64,
        zone_risk: ZoneRisk,
    ) -> Result<f64, CivicEyeError> {
        for (field, value) in [
            ("raw_severity_signal", detection.raw_severity_signal),
            ("area_affected_ratio", area_affected_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) || value.is_nan() {
                return Err(CivicEyeError::InvalidModelOutput(format!(
                    "{field} out of [0,1]: {value}"
                )));
            }
        }

        let blended = self.weights.raw_signal * detection.raw_severity_signal
            + self.weights.area_affected * area_affected_ratio
            + self.weights.zone_risk * zone_risk.value();
        let severity = blended.clamp(0.0, 1.0);

        if detection.issue_type == IssueType::Unknown {
            Ok(severity.min(UNKNOWN_SEVERITY_CAP))
        } else {
            Ok(severity)
        }
    }
}
