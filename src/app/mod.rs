pub mod arith;
pub mod service;

pub use service::{GenerationResult, GenerationService};
