//! Priority ranking: a lazily computed view over the incident set,
//! never persisted as authoritative state.

use chrono::{DateTime, Duration, Utc};

use civiceye_common::{CivicEyeError, Incident, PipelineConfig, PriorityScore, PriorityWeights};

use crate::store::IncidentStore;

/// Days over which the post-staleness age boost ramps from 0 to its
/// full weight.
const AGE_RAMP_DAYS: f64 = 30.0;

/// priority = α·severity + β·ln(1 + report_count) − γ·age_decay.
///
/// The frequency term uses a log so a thousand duplicate reports cannot
/// crowd out everything else. age_decay is 0 until the staleness
/// threshold and then goes negative, so the subtraction turns into a
/// boost for incidents left open too long — neglected low-severity
/// issues eventually surface instead of starving.
pub struct PriorityRanker {
    weights: PriorityWeights,
    staleness: Duration,
}

impl PriorityRanker {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            weights: config.priority_weights,
            staleness: Duration::days(config.staleness_days),
        }
    }

    pub fn score(&self, incident: &Incident, now: DateTime<Utc>) -> PriorityScore {
        let frequency_factor = (1.0 + f64::from(incident.report_count)).ln();
        let age_decay = self.age_decay(incident, now);
        let value = self.weights.severity * incident.aggregated_severity
            + self.weights.frequency * frequency_factor
            - self.weights.age * age_decay;
        PriorityScore {
            value,
            first_seen: incident.first_seen,
        }
    }

    /// 0 until the incident has been open past the staleness threshold,
    /// then ramping to -1 over AGE_RAMP_DAYS.
    fn age_decay(&self, incident: &Incident, now: DateTime<Utc>) -> f64 {
        let open_for = now - incident.first_seen;
        let past_staleness = open_for - self.staleness;
        if past_staleness <= Duration::zero() {
            return 0.0;
        }
        let days = past_staleness.num_minutes() as f64 / (60.0 * 24.0);
        -(days / AGE_RAMP_DAYS).min(1.0)
    }

    /// All active incidents in triage order: highest priority first,
    /// ties to the earliest first_seen. Recomputed on every call.
    pub async fn triage_queue<S: IncidentStore>(
        &self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Incident, PriorityScore)>, CivicEyeError> {
        let mut ranked: Vec<(Incident, PriorityScore)> = store
            .active_incidents()
            .await?
            .into_iter()
            .map(|incident| {
                let score = self.score(&incident, now);
                (incident, score)
            })
            .collect();
        ranked.sort_by(|(_, a), (_, b)| a.cmp_triage(b));
        Ok(ranked)
    }
}
