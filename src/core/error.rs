//! Error taxonomy for the generation path.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

use super::engine::EngineError;

#[derive(Error, Debug)]
pub enum Error {
    /// Request rejected before any engine call.
    #[error("Invalid request: {message}")]
    Validation { message: String },

    /// The engine could not materialize a pipeline for a descriptor.
    #[error("Failed to load model {model_id}: {source}")]
    ModelLoad {
        model_id: String,
        #[source]
        source: EngineError,
    },

    /// A loaded pipeline failed while generating.
    #[error("Generation failed on {model_id}: {source}")]
    Generation {
        model_id: String,
        #[source]
        source: EngineError,
    },

    #[error("Request timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// HTTP status the server answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::ModelLoad { .. }
            | Self::Generation { .. }
            | Self::Config { .. }
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::validation("bad").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::Timeout { duration: Duration::from_secs(1) }.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );

        let load = Error::ModelLoad {
            model_id: "bigscience/bloom-1b1".to_string(),
            source: EngineError::NotFound("config.json".to_string()),
        };
        assert_eq!(load.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(load.to_string().contains("bigscience/bloom-1b1"));
    }
}
