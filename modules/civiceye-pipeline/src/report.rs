//! Final assembly: one detection + its resolved incident + the priority
//! at emission time, frozen into an immutable record for downstream
//! review surfaces.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use civiceye_common::{
    CivicEyeError, Detection, Incident, MediaSample, PriorityScore, Report, Urgency,
};

/// Build the immutable report record. Deduplication must have resolved
/// the detection to an incident first; calling earlier is a pipeline
/// ordering bug, not a race.
pub fn build_report(
    sample: &MediaSample,
    detection: Detection,
    severity: f64,
    incident: Option<&Incident>,
    priority: Option<PriorityScore>,
) -> Result<Report, CivicEyeError> {
    let (incident, priority) = match (incident, priority) {
        (Some(i), Some(p)) => (i, p),
        _ => return Err(CivicEyeError::IncidentNotResolved),
    };

    Ok(Report {
        id: Uuid::new_v4(),
        sample_id: sample.id,
        detection,
        incident_id: incident.id,
        severity,
        priority: priority.value,
        urgency: Urgency::from_severity(severity),
        location: sample.location,
        description: sample.description.clone(),
        status: incident.status,
        captured_at: sample.captured_at,
        emitted_at: Utc::now(),
    })
}

/// Downstream consumer of the ordered report stream.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn emit(&self, report: Report) -> anyhow::Result<()>;
}

/// Collecting sink for tests and embedded hosts.
#[derive(Default)]
pub struct VecSink {
    reports: Mutex<Vec<Report>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn drain(&self) -> Vec<Report> {
        std::mem::take(&mut *self.reports.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.reports.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.reports.lock().await.is_empty()
    }
}

#[async_trait]
impl ReportSink for VecSink {
    async fn emit(&self, report: Report) -> anyhow::Result<()> {
        self.reports.lock().await.push(report);
        Ok(())
    }
}
