use std::collections::HashMap;

use super::{DevicePreference, ModelDescriptor, ModelName, Precision};

/// Immutable mapping from logical model names to descriptors.
///
/// Built once at startup from the probed device profile and shared read-only
/// for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    descriptors: HashMap<ModelName, ModelDescriptor>,
    default: ModelName,
}

impl ModelRegistry {
    pub fn new(device: DevicePreference, precision: Precision, default_max_length: usize) -> Self {
        let descriptors = ModelName::ALL
            .into_iter()
            .map(|name| {
                let descriptor = ModelDescriptor::new(name, device, precision)
                    .with_default_max_length(default_max_length);
                (name, descriptor)
            })
            .collect();

        Self {
            descriptors,
            default: ModelName::DEFAULT,
        }
    }

    /// Resolves a logical name, falling back to the default model.
    ///
    /// Unknown names are not an error: callers that pass a typo get the
    /// default model rather than a rejection.
    pub fn resolve(&self, name: &str) -> &ModelDescriptor {
        self.lookup(name).unwrap_or_else(|| self.default_descriptor())
    }

    pub fn lookup(&self, name: &str) -> Option<&ModelDescriptor> {
        let name = name.parse::<ModelName>().ok()?;
        self.descriptors.get(&name)
    }

    pub fn default_descriptor(&self) -> &ModelDescriptor {
        &self.descriptors[&self.default]
    }

    /// Descriptors in declaration order.
    pub fn descriptors(&self) -> Vec<&ModelDescriptor> {
        ModelName::ALL
            .iter()
            .filter_map(|name| self.descriptors.get(name))
            .collect()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(
            DevicePreference::Cpu,
            Precision::Full,
            super::DEFAULT_MAX_LENGTH,
        )
    }
}
