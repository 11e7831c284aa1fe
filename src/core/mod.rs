pub mod cache;
pub mod engine;
pub mod error;
pub mod model;

pub use cache::PipelineCache;
pub use engine::{
    Candidate, EngineError, GenerationEngine, GenerationParams, GenerationPipeline,
    SamplingOptions,
};
pub use error::Error;
pub use model::{DevicePreference, ModelDescriptor, ModelName, ModelRegistry, Precision};

pub type Result<T> = std::result::Result<T, Error>;
