//! Deduplication: collapse repeated reports of one physical defect into
//! a single tracked incident. Matching is deterministic — nearest
//! qualifying candidate, distance ties broken by earliest first_seen —
//! so batch arrival order cannot change the clustering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use civiceye_common::{CivicEyeError, GeoPoint, Incident, IssueType, PipelineConfig};

use crate::store::{cell_block, cell_for, precision_for_radius, CellWrite, IncidentStore};

/// Aggregated severity keeps 90% of its prior value when a lower report
/// arrives; one spurious low report cannot depress a confirmed
/// incident, but sustained lower reports pull it down.
const SEVERITY_DECAY_KEEP: f64 = 0.9;
const SEVERITY_DECAY_BLEND: f64 = 0.1;

/// Resolves each scored detection to an incident: merge into the
/// nearest qualifying candidate or create a fresh one, atomically
/// within the report's cell block.
pub struct DedupEngine<S> {
    store: Arc<S>,
    radius_m: f64,
    window: Duration,
    precision: usize,
}

impl<S: IncidentStore> DedupEngine<S> {
    pub fn new(store: Arc<S>, config: &PipelineConfig) -> Self {
        Self {
            store,
            radius_m: config.radius_m,
            window: Duration::days(config.window_days),
            precision: precision_for_radius(config.radius_m),
        }
    }

    /// Match-or-create for one report. Returns the incident after the
    /// update and whether it was newly created.
    pub async fn resolve(
        &self,
        issue_type: IssueType,
        location: GeoPoint,
        captured_at: DateTime<Utc>,
        severity: f64,
    ) -> Result<(Incident, bool), CivicEyeError> {
        let block = cell_block(&location, self.precision)?;
        let home = cell_for(&location, self.precision)?;
        let radius_m = self.radius_m;
        let window = self.window;

        let created = Arc::new(AtomicBool::new(false));
        let created_flag = Arc::clone(&created);

        let incident = self
            .store
            .read_modify(
                &block,
                Box::new(move |candidates| {
                    match select_candidate(
                        candidates,
                        issue_type,
                        &location,
                        captured_at,
                        radius_m,
                        window,
                    ) {
                        Some(best) => {
                            CellWrite::Update(apply_report(best.clone(), captured_at, severity))
                        }
                        None => {
                            created_flag.store(true, Ordering::Relaxed);
                            CellWrite::Create {
                                cell: home,
                                incident: Incident::open(
                                    location,
                                    issue_type,
                                    captured_at,
                                    severity,
                                ),
                            }
                        }
                    }
                }),
            )
            .await?;

        let was_created = created.load(Ordering::Relaxed);
        debug!(
            incident = %incident.id,
            issue_type = %issue_type,
            created = was_created,
            report_count = incident.report_count,
            "Report resolved to incident"
        );
        Ok((incident, was_created))
    }
}

/// Nearest open/in_review candidate of the same issue type within the
/// spatial radius and time window. Ties in distance go to the earliest
/// first_seen; identical first_seen falls back to id order so the
/// choice is still stable.
pub fn select_candidate<'a>(
    candidates: &'a [Incident],
    issue_type: IssueType,
    location: &GeoPoint,
    captured_at: DateTime<Utc>,
    radius_m: f64,
    window: Duration,
) -> Option<&'a Incident> {
    candidates
        .iter()
        .filter(|c| c.status.accepts_reports())
        .filter(|c| c.issue_type == issue_type)
        .filter(|c| captured_at - c.last_seen <= window)
        .filter_map(|c| {
            let dist = location.distance_m(&c.representative_location);
            (dist <= radius_m).then_some((c, dist))
        })
        .min_by(|(a, da), (b, db)| {
            da.partial_cmp(db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.first_seen.cmp(&b.first_seen))
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|(c, _)| c)
}

/// Fold one report into an incident: bump the count, advance last_seen,
/// and re-derive aggregated severity as a max-weighted blend.
pub fn apply_report(mut incident: Incident, captured_at: DateTime<Utc>, severity: f64) -> Incident {
    incident.report_count += 1;
    incident.last_seen = incident.last_seen.max(captured_at);
    incident.aggregated_severity = blend_severity(incident.aggregated_severity, severity);
    incident
}

/// Take a higher severity outright; blend a lower one as a decayed
/// average.
pub fn blend_severity(old: f64, new: f64) -> f64 {
    if new > old {
        new
    } else {
        old * SEVERITY_DECAY_KEEP + new * SEVERITY_DECAY_BLEND
    }
}
