use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::core::{DevicePreference, ModelDescriptor, Precision, SamplingOptions};

fn default_return_full_text() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

/// Body of `POST /llm`.
///
/// Every field is optional on the wire: a missing prompt is the empty
/// string, a missing model is the default model, and a missing `max_length`
/// takes the model's default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,
    #[serde(default = "default_return_full_text", skip_serializing_if = "is_true")]
    pub return_full_text: bool,
    #[serde(default, skip_serializing_if = "SamplingOptions::is_default")]
    pub options: SamplingOptions,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            max_length: None,
            return_full_text: true,
            options: SamplingOptions::default(),
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn max_length(mut self, max_length: i64) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn return_full_text(mut self, full: bool) -> Self {
        self.return_full_text = full;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Body of `POST /multiply`. Missing operands count as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiplyRequest {
    #[serde(default = "zero")]
    pub x: Number,
    #[serde(default = "zero")]
    pub y: Number,
}

fn zero() -> Number {
    Number::from(0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub model_id: String,
    pub device: DevicePreference,
    pub precision: Precision,
    pub default_max_length: usize,
    pub default: bool,
    pub loaded: bool,
}

impl ModelInfo {
    pub fn new(descriptor: &ModelDescriptor, default: bool, loaded: bool) -> Self {
        Self {
            name: descriptor.logical_name.to_string(),
            model_id: descriptor.model_id.clone(),
            device: descriptor.device,
            precision: descriptor.precision,
            default_max_length: descriptor.default_max_length,
            default,
            loaded,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub models: Vec<ModelInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_request_round_trip() {
        let requests = [
            GenerationRequest::new("Hello").model("bloom"),
            GenerationRequest::new("").max_length(12).return_full_text(false),
            GenerationRequest {
                options: SamplingOptions {
                    temperature: Some(0.7),
                    top_p: Some(0.9),
                    seed: Some(42),
                },
                ..GenerationRequest::new("What is a for loop in Java?").model("starcoder-3b")
            },
        ];

        for request in requests {
            let wire = serde_json::to_string(&request).unwrap();
            let decoded: GenerationRequest = serde_json::from_str(&wire).unwrap();
            assert_eq!(decoded, request);
        }
    }

    #[test]
    fn test_generation_request_defaults() {
        let request: GenerationRequest = serde_json::from_str("{}").unwrap();

        assert_eq!(request, GenerationRequest::new(""));
        assert!(request.return_full_text);
        assert!(request.model.is_none());
    }

    #[test]
    fn test_wire_shape() {
        let wire = serde_json::to_value(GenerationRequest::new("Hello").model("bloom")).unwrap();
        assert_eq!(wire, serde_json::json!({"prompt": "Hello", "model": "bloom"}));
    }

    #[test]
    fn test_multiply_request_defaults() {
        let request: MultiplyRequest = serde_json::from_str(r#"{"x": 3}"#).unwrap();
        assert_eq!(request.x, Number::from(3));
        assert_eq!(request.y, Number::from(0));
    }
}
