pub mod config;
pub mod error;
pub mod triage;
pub mod types;

pub use config::{PipelineConfig, PriorityWeights, SeverityWeights};
pub use error::CivicEyeError;
pub use triage::*;
pub use types::*;
