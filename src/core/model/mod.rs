pub mod registry;

pub use registry::ModelRegistry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default `max_length` applied when a request does not carry one.
pub const DEFAULT_MAX_LENGTH: usize = 50;

/// Logical model names the service knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelName {
    #[serde(rename = "bloom")]
    Bloom,
    #[serde(rename = "starcoder-3b")]
    Starcoder3b,
    #[serde(rename = "starcoder-15b")]
    Starcoder15b,
}

impl ModelName {
    pub const ALL: [ModelName; 3] = [Self::Bloom, Self::Starcoder3b, Self::Starcoder15b];

    /// Bloom is the fastest of the three and backs every unrecognized name.
    pub const DEFAULT: ModelName = Self::Bloom;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bloom => "bloom",
            Self::Starcoder3b => "starcoder-3b",
            Self::Starcoder15b => "starcoder-15b",
        }
    }

    /// Hugging Face repository the logical name points at.
    pub fn model_id(&self) -> &'static str {
        match self {
            Self::Bloom => "bigscience/bloom-1b1",
            Self::Starcoder3b => "bigcode/starcoder2-3b",
            Self::Starcoder15b => "bigcode/starcoder2-15b",
        }
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownModel;

impl FromStr for ModelName {
    type Err = UnknownModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or(UnknownModel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    Cpu,
    Gpu,
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Gpu => f.write_str("gpu"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Full,
    Half,
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Half => f.write_str("half"),
        }
    }
}

/// Everything needed to materialize one pipeline.
///
/// Descriptors are built once by the [`ModelRegistry`] and never mutated; the
/// pipeline cache keys on the whole value, so two descriptors differing only
/// in precision get distinct pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ModelDescriptor {
    pub logical_name: ModelName,
    pub model_id: String,
    pub device: DevicePreference,
    pub precision: Precision,
    pub default_max_length: usize,
}

impl ModelDescriptor {
    pub fn new(name: ModelName, device: DevicePreference, precision: Precision) -> Self {
        Self {
            logical_name: name,
            model_id: name.model_id().to_string(),
            device,
            precision,
            default_max_length: DEFAULT_MAX_LENGTH,
        }
    }

    pub fn with_default_max_length(mut self, max_length: usize) -> Self {
        self.default_max_length = max_length;
        self
    }
}

impl fmt::Display for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}, {})",
            self.logical_name, self.model_id, self.device, self.precision
        )
    }
}
