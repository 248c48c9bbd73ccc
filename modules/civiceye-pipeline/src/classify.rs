//! The single seam where the external classification capability is
//! invoked. The concrete model is swappable; the pipeline depends only
//! on the `FrameClassifier` trait.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use civiceye_common::{CivicEyeError, Detection, IssueType, PipelineConfig};

use crate::extract::Frame;

/// Base backoff for transient classifier failures. Actual delay is
/// base * 2^attempt plus random jitter (0-500ms).
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_JITTER_MS: u64 = 500;

/// Raw per-frame model output. All scalar fields must be in [0, 1];
/// anything else marks the dependency as misbehaving.
#[derive(Debug, Clone, Copy)]
pub struct FrameSignal {
    pub issue_type: IssueType,
    pub confidence: f64,
    pub raw_severity_signal: f64,
    /// Fraction of the frame occupied by the defect. Only the model
    /// sees the frame, so the estimate rides on its output; classifiers
    /// without one report 0.0.
    pub area_affected_ratio: f64,
}

/// External classification capability: one normalized frame in, one
/// signal out. Implementations are free to call out over the network;
/// the adapter owns timeout and retry policy.
#[async_trait]
pub trait FrameClassifier: Send + Sync {
    async fn classify(&self, frame: &Frame) -> anyhow::Result<FrameSignal>;
    fn name(&self) -> &str;
}

/// Everything the downstream stages need from classification: the
/// aggregated sample-level detection plus the per-frame signals it was
/// derived from.
#[derive(Debug, Clone)]
pub struct Classification {
    pub aggregate: Detection,
    pub area_affected_ratio: f64,
    pub frame_signals: Vec<FrameSignal>,
}

/// Wraps a `FrameClassifier` with validation, bounded retry, and
/// majority-vote aggregation across frames.
pub struct ClassifierAdapter<C> {
    classifier: C,
    timeout: Duration,
    attempts: u32,
}

impl<C: FrameClassifier> ClassifierAdapter<C> {
    pub fn new(classifier: C, config: &PipelineConfig) -> Self {
        Self {
            classifier,
            timeout: config.classifier_timeout,
            attempts: config.classifier_attempts.max(1),
        }
    }

    /// Classify every frame and aggregate into one sample-level
    /// detection. Transient failures retry with backoff; out-of-range
    /// model output fails fast and quarantines the unit.
    pub async fn classify_sample(&self, frames: &[Frame]) -> Result<Classification, CivicEyeError> {
        let mut signals = Vec::with_capacity(frames.len());
        for frame in frames {
            let signal = self.classify_frame(frame).await?;
            validate_signal(&signal)?;
            signals.push(signal);
        }

        let (aggregate, area) = aggregate_signals(&signals)?;
        debug!(
            classifier = self.classifier.name(),
            frames = signals.len(),
            issue_type = %aggregate.issue_type,
            confidence = aggregate.confidence,
            "Sample classified"
        );
        Ok(Classification {
            aggregate,
            area_affected_ratio: area,
            frame_signals: signals,
        })
    }

    /// One frame with timeout and bounded exponential backoff. Only
    /// transport failures and timeouts retry; they exhaust into
    /// `ClassifierUnavailable`.
    async fn classify_frame(&self, frame: &Frame) -> Result<FrameSignal, CivicEyeError> {
        let mut last_error = String::new();
        for attempt in 0..self.attempts {
            if attempt > 0 {
                let backoff = RETRY_BASE * 2u32.pow(attempt - 1);
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..RETRY_JITTER_MS));
                tokio::time::sleep(backoff + jitter).await;
            }

            match tokio::time::timeout(self.timeout, self.classifier.classify(frame)).await {
                Ok(Ok(signal)) => return Ok(signal),
                Ok(Err(e)) => {
                    warn!(
                        classifier = self.classifier.name(),
                        attempt,
                        error = %e,
                        "Classifier call failed"
                    );
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(
                        classifier = self.classifier.name(),
                        attempt,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Classifier call timed out"
                    );
                    last_error = format!("timed out after {}ms", self.timeout.as_millis());
                }
            }
        }

        Err(CivicEyeError::ClassifierUnavailable(format!(
            "{} failed after {} attempts: {last_error}",
            self.classifier.name(),
            self.attempts
        )))
    }
}

/// Reject out-of-range model output before it can poison scoring.
fn validate_signal(signal: &FrameSignal) -> Result<(), CivicEyeError> {
    for (field, value) in [
        ("confidence", signal.confidence),
        ("raw_severity_signal", signal.raw_severity_signal),
        ("area_affected_ratio", signal.area_affected_ratio),
    ] {
        if !(0.0..=1.0).contains(&value) || value.is_nan() {
            return Err(CivicEyeError::InvalidModelOutput(format!(
                "{field} out of [0,1]: {value}"
            )));
        }
    }
    Ok(())
}

/// Majority issue-type vote weighted by confidence; ties broken by the
/// highest single-frame confidence. The aggregate's scalars are
/// confidence-weighted means over the winning type's frames.
fn aggregate_signals(signals: &[FrameSignal]) -> Result<(Detection, f64), CivicEyeError> {
    if signals.is_empty() {
        return Err(CivicEyeError::EmptyMedia(
            "no frame signals to aggregate".to_string(),
        ));
    }

    let mut votes: HashMap<IssueType, (f64, f64)> = HashMap::new(); // (weight, best_single)
    for s in signals {
        let entry = votes.entry(s.issue_type).or_insert((0.0, 0.0));
        entry.0 += s.confidence;
        entry.1 = entry.1.max(s.confidence);
    }

    let (winner, _) = votes
        .iter()
        .max_by(|(_, (wa, ba)), (_, (wb, bb))| {
            wa.partial_cmp(wb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ba.partial_cmp(bb).unwrap_or(std::cmp::Ordering::Equal))
        })
        .map(|(t, v)| (*t, *v))
        .ok_or_else(|| CivicEyeError::EmptyMedia("no votes".to_string()))?;

    let winning: Vec<&FrameSignal> = signals.iter().filter(|s| s.issue_type == winner).collect();
    let weight: f64 = winning.iter().map(|s| s.confidence).sum();
    let (confidence, severity, area) = if weight > 0.0 {
        (
            winning.iter().map(|s| s.confidence * s.confidence).sum::<f64>() / weight,
            winning
                .iter()
                .map(|s| s.raw_severity_signal * s.confidence)
                .sum::<f64>()
                / weight,
            winning
                .iter()
                .map(|s| s.area_affected_ratio * s.confidence)
                .sum::<f64>()
                / weight,
        )
    } else {
        // All-zero confidence: treat the sample as unclassifiable.
        (0.0, 0.0, 0.0)
    };

    Ok((
        Detection {
            issue_type: if weight > 0.0 { winner } else { IssueType::Unknown },
            confidence,
            raw_severity_signal: severity,
        },
        area,
    ))
}
