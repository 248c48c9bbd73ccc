//! End-to-end orchestration. One MediaSample is one unit of work;
//! failures are unit-scoped and nothing is committed to the incident
//! store until classification and scoring have succeeded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use tracing::{info, warn};

use civiceye_common::{
    CivicEyeError, Incident, MediaSample, PipelineConfig, PriorityScore, Report,
};

use crate::classify::{ClassifierAdapter, FrameClassifier};
use crate::dedup::DedupEngine;
use crate::extract::FeatureExtractor;
use crate::rank::PriorityRanker;
use crate::report::{build_report, ReportSink};
use crate::severity::{SeverityScorer, ZoneRiskLookup};
use crate::store::IncidentStore;

/// The full detection → scoring → dedup → ranking → report pipeline
/// with its injected collaborators.
pub struct Pipeline<C, Z, S, K> {
    extractor: FeatureExtractor,
    adapter: ClassifierAdapter<C>,
    scorer: SeverityScorer,
    dedup: DedupEngine<S>,
    ranker: PriorityRanker,
    zones: Z,
    store: Arc<S>,
    sink: K,
    unit_deadline: Duration,
    workers: usize,
}

impl<C, Z, S, K> Pipeline<C, Z, S, K>
where
    C: FrameClassifier,
    Z: ZoneRiskLookup,
    S: IncidentStore,
    K: ReportSink,
{
    pub fn new(classifier: C, zones: Z, store: Arc<S>, sink: K, config: &PipelineConfig) -> Self {
        Self {
            extractor: FeatureExtractor::new(config),
            adapter: ClassifierAdapter::new(classifier, config),
            scorer: SeverityScorer::new(config.severity_weights),
            dedup: DedupEngine::new(Arc::clone(&store), config),
            ranker: PriorityRanker::new(config),
            zones,
            store,
            sink,
            unit_deadline: config.unit_deadline,
            workers: config.workers.max(1),
        }
    }

    /// Process one sample end to end and emit its report.
    pub async fn process(&self, sample: MediaSample) -> Result<Report, CivicEyeError> {
        let (report, _) = self.process_inner(sample).await?;
        Ok(report)
    }

    async fn process_inner(&self, sample: MediaSample) -> Result<(Report, bool), CivicEyeError> {
        let deadline = Instant::now() + self.unit_deadline;

        let frames = self.extractor.extract(&sample)?;
        check_deadline(deadline, "classify")?;

        // The only external model call; everything before this point is
        // local and everything after is pure math plus the store.
        let classification = self.adapter.classify_sample(&frames).await?;
        check_deadline(deadline, "score")?;

        let zone = self.zones.risk_class(&sample.location).await?;
        let severity = self.scorer.score(
            &classification.aggregate,
            classification.area_affected_ratio,
            zone,
        )?;
        check_deadline(deadline, "dedup")?;

        let (incident, created) = self
            .dedup
            .resolve(
                classification.aggregate.issue_type,
                sample.location,
                sample.captured_at,
                severity,
            )
            .await?;

        let priority = self.ranker.score(&incident, Utc::now());
        let report = build_report(
            &sample,
            classification.aggregate,
            severity,
            Some(&incident),
            Some(priority),
        )?;

        self.sink
            .emit(report.clone())
            .await
            .map_err(|e| CivicEyeError::Store(format!("report sink: {e}")))?;

        info!(
            sample = %sample.id,
            incident = %incident.id,
            issue_type = %report.detection.issue_type,
            severity = report.severity,
            priority = report.priority,
            created,
            "Report emitted"
        );
        Ok((report, created))
    }

    /// Process a batch of independent units, bounded by the configured
    /// worker count. One unit's failure never blocks the rest.
    pub async fn process_batch(&self, samples: Vec<MediaSample>) -> BatchStats {
        let mut stats = BatchStats::default();
        let results: Vec<_> = stream::iter(samples.into_iter().map(|sample| {
            let sample_id = sample.id;
            async move { (sample_id, self.process_inner(sample).await) }
        }))
        .buffer_unordered(self.workers)
        .collect()
        .await;

        for (sample_id, result) in results {
            match result {
                Ok((_, created)) => {
                    stats.reports_emitted += 1;
                    if created {
                        stats.incidents_created += 1;
                    } else {
                        stats.reports_merged += 1;
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!(sample = %sample_id, error = %e, "Unit failed (retryable)");
                    stats.failed_retryable += 1;
                }
                Err(e) => {
                    warn!(sample = %sample_id, error = %e, "Unit failed, quarantined");
                    stats.quarantined += 1;
                }
            }
        }

        info!(
            emitted = stats.reports_emitted,
            created = stats.incidents_created,
            merged = stats.reports_merged,
            retryable = stats.failed_retryable,
            quarantined = stats.quarantined,
            "Batch complete"
        );
        stats
    }

    /// Current triage order over active incidents. A view, recomputed
    /// on every call.
    pub async fn triage_queue(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Incident, PriorityScore)>, CivicEyeError> {
        self.ranker.triage_queue(self.store.as_ref(), now).await
    }
}

fn check_deadline(deadline: Instant, stage: &'static str) -> Result<(), CivicEyeError> {
    if Instant::now() >= deadline {
        Err(CivicEyeError::DeadlineExceeded(stage))
    } else {
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub reports_emitted: u32,
    pub incidents_created: u32,
    pub reports_merged: u32,
    pub failed_retryable: u32,
    pub quarantined: u32,
}

impl std::fmt::Display for BatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Batch Complete ===")?;
        writeln!(f, "Reports emitted:   {}", self.reports_emitted)?;
        writeln!(f, "Incidents created: {}", self.incidents_created)?;
        writeln!(f, "Reports merged:    {}", self.reports_merged)?;
        writeln!(f, "Failed (retry):    {}", self.failed_retryable)?;
        writeln!(f, "Quarantined:       {}", self.quarantined)?;
        Ok(())
    }
}
