pub mod api;
pub mod app;
pub mod cmd;
pub mod core;
pub mod discover;
pub mod envconfig;
pub mod infra;
pub mod server;

pub use api::Client;
pub use app::{GenerationResult, GenerationService};
pub use self::core::{
    Candidate, EngineError, Error, GenerationEngine, GenerationParams, GenerationPipeline,
    ModelDescriptor, ModelName, ModelRegistry, PipelineCache, Result,
};
pub use envconfig::Config;
pub use server::{router, AppState};
