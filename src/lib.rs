pub mod config;
pub mod history;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod reconciliation;
pub mod storage;
pub mod utils;
pub mod validation;

pub use config::PipelineConfig;
pub use pipeline::{EvidencePipeline, ProcessingReport};
pub use utils::TravelError;
