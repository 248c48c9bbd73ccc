//! Detection, scoring, deduplication, and prioritization pipeline for
//! citizen-submitted civic defect reports.
//!
//! One `MediaSample` flows media → extract → classify → score → dedup
//! (incident resolve/update) → rank → report. The classifier, zone-risk
//! lookup, incident store, and report sink are injected seams; the
//! pipeline owns only the algorithmic middle.

pub mod classify;
pub mod dedup;
pub mod extract;
pub mod pipeline;
pub mod rank;
pub mod report;
pub mod severity;
pub mod store;

pub use classify::{Classification, ClassifierAdapter, FrameClassifier, FrameSignal};
pub use dedup::DedupEngine;
pub use extract::{FeatureExtractor, Frame};
pub use pipeline::{BatchStats, Pipeline};
pub use rank::PriorityRanker;
pub use report::{build_report, ReportSink, VecSink};
pub use severity::{SeverityScorer, UniformZoneRisk, ZoneRisk, ZoneRiskLookup};
pub use store::{CellKey, IncidentStore, MemoryIncidentStore};
