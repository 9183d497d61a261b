//! # Pipeline Stages
//!
//! The fixed two-stage chain: inference results are forwarded to the
//! evaluation queue, evaluation results are recorded in the catalog.

pub mod endpoint;
pub mod evaluation;
pub mod inference;
pub mod response;
pub mod stage;

pub use endpoint::{EndpointRequest, EndpointResponse, HttpStageEndpoint, StageEndpoint};
pub use evaluation::EvaluationHandler;
pub use inference::InferenceHandler;
pub use response::{
    HistogramDefinition, ResponseHeaderSummary, ResultRecord, StatusClass, StatusPolicy,
};
pub use stage::{
    MessageDisposition, StageContext, StageHandler, StageProcessor, StageSettings,
};
