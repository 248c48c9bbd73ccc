use serde::{Deserialize, Serialize};

/// Severity band boundaries for urgency display tiers.
pub const URGENCY_MEDIUM_MIN: f64 = 0.25;
pub const URGENCY_HIGH_MIN: f64 = 0.5;
pub const URGENCY_CRITICAL_MIN: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// Band a normalized severity into the display tier the review
    /// surface shows.
    pub fn from_severity(severity: f64) -> Self {
        if severity >= URGENCY_CRITICAL_MIN {
            Urgency::Critical
        } else if severity >= URGENCY_HIGH_MIN {
            Urgency::High
        } else if severity >= URGENCY_MEDIUM_MIN {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Urgency::Low => write!(f, "low"),
            Urgency::Medium => write!(f, "medium"),
            Urgency::High => write!(f, "high"),
            Urgency::Critical => write!(f, "critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_bands_cover_the_range() {
        assert_eq!(Urgency::from_severity(0.0), Urgency::Low);
        assert_eq!(Urgency::from_severity(0.24), Urgency::Low);
        assert_eq!(Urgency::from_severity(0.25), Urgency::Medium);
        assert_eq!(Urgency::from_severity(0.5), Urgency::High);
        assert_eq!(Urgency::from_severity(0.75), Urgency::Critical);
        assert_eq!(Urgency::from_severity(1.0), Urgency::Critical);
    }
}
