//! Generation dispatch: parameter resolution, strategy selection and task
//! pipelines

pub mod dispatcher;
pub mod params;
pub mod pipeline;

pub use dispatcher::{Dispatcher, GenerationOutcome, GenerationRequest};
pub use params::{EffectiveParams, GenerationParams};
pub use pipeline::{ChatTurn, PipelineRequest, PipelineTask};
