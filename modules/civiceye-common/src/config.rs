use std::env;
use std::time::Duration;

use crate::error::CivicEyeError;

/// Severity blend weights. The raw model signal dominates, tempered by
/// affected area and zone risk.
#[derive(Debug, Clone, Copy)]
pub struct SeverityWeights {
    pub raw_signal: f64,
    pub area_affected: f64,
    pub zone_risk: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            raw_signal: 0.6,
            area_affected: 0.25,
            zone_risk: 0.15,
        }
    }
}

/// Priority blend weights: severity leads, report frequency with
/// diminishing returns, age as an anti-starvation term.
#[derive(Debug, Clone, Copy)]
pub struct PriorityWeights {
    pub severity: f64,
    pub frequency: f64,
    pub age: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            severity: 0.6,
            frequency: 0.3,
            age: 0.1,
        }
    }
}

/// Pipeline configuration. Every knob has a documented default; env
/// vars override individually. Parse failures surface as `Config`
/// errors rather than panics.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Deduplication radius R in meters.
    pub radius_m: f64,
    /// Deduplication time window W in days.
    pub window_days: i64,
    /// Per-call classifier timeout.
    pub classifier_timeout: Duration,
    /// Bounded retry attempts for transient classifier failures.
    pub classifier_attempts: u32,
    /// Max concurrent units in a batch.
    pub workers: usize,
    pub severity_weights: SeverityWeights,
    pub priority_weights: PriorityWeights,
    /// Days an incident stays open before the age term starts boosting
    /// its priority.
    pub staleness_days: i64,
    /// Cooperative end-to-end deadline for one unit of work.
    pub unit_deadline: Duration,
    /// Max representative frames selected per video sample (K).
    pub max_frames: usize,
    /// Decode every Nth located video frame; never an exhaustive decode.
    pub frame_stride: usize,
    /// Side of the square frames fed to the classifier, in pixels.
    pub frame_px: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            radius_m: 50.0,
            window_days: 30,
            classifier_timeout: Duration::from_secs(20),
            classifier_attempts: 3,
            workers: 4,
            severity_weights: SeverityWeights::default(),
            priority_weights: PriorityWeights::default(),
            staleness_days: 14,
            unit_deadline: Duration::from_secs(120),
            max_frames: 5,
            frame_stride: 10,
            frame_px: 224,
        }
    }
}

impl PipelineConfig {
    /// Defaults with per-field env overrides.
    pub fn from_env() -> Result<Self, CivicEyeError> {
        let mut cfg = Self::default();

        if let Some(v) = parse_env::<f64>("CIVICEYE_RADIUS_M")? {
            cfg.radius_m = v;
        }
        if let Some(v) = parse_env::<i64>("CIVICEYE_WINDOW_DAYS")? {
            cfg.window_days = v;
        }
        if let Some(v) = parse_env::<u64>("CIVICEYE_CLASSIFIER_TIMEOUT_MS")? {
            cfg.classifier_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_env::<u32>("CIVICEYE_CLASSIFIER_ATTEMPTS")? {
            cfg.classifier_attempts = v.max(1);
        }
        if let Some(v) = parse_env::<usize>("CIVICEYE_WORKERS")? {
            cfg.workers = v.max(1);
        }
        if let Some(v) = parse_env::<i64>("CIVICEYE_STALENESS_DAYS")? {
            cfg.staleness_days = v;
        }
        if let Some(v) = parse_env::<u64>("CIVICEYE_UNIT_DEADLINE_MS")? {
            cfg.unit_deadline = Duration::from_millis(v);
        }
        if let Some(v) = parse_env::<usize>("CIVICEYE_MAX_FRAMES")? {
            cfg.max_frames = v.max(1);
        }
        if let Some(v) = parse_env::<f64>("CIVICEYE_SEVERITY_W_SIGNAL")? {
            cfg.severity_weights.raw_signal = v;
        }
        if let Some(v) = parse_env::<f64>("CIVICEYE_SEVERITY_W_AREA")? {
            cfg.severity_weights.area_affected = v;
        }
        if let Some(v) = parse_env::<f64>("CIVICEYE_SEVERITY_W_ZONE")? {
            cfg.severity_weights.zone_risk = v;
        }
        if let Some(v) = parse_env::<f64>("CIVICEYE_PRIORITY_W_SEVERITY")? {
            cfg.priority_weights.severity = v;
        }
        if let Some(v) = parse_env::<f64>("CIVICEYE_PRIORITY_W_FREQUENCY")? {
            cfg.priority_weights.frequency = v;
        }
        if let Some(v) = parse_env::<f64>("CIVICEYE_PRIORITY_W_AGE")? {
            cfg.priority_weights.age = v;
        }

        if cfg.radius_m <= 0.0 {
            return Err(CivicEyeError::Config(
                "CIVICEYE_RADIUS_M must be positive".to_string(),
            ));
        }
        if cfg.window_days <= 0 {
            return Err(CivicEyeError::Config(
                "CIVICEYE_WINDOW_DAYS must be positive".to_string(),
            ));
        }

        Ok(cfg)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, CivicEyeError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| CivicEyeError::Config(format!("{key} has invalid value: {raw}"))),
        Err(_) => Ok(None),
    }
}
