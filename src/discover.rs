//! Startup-time device capability probe.
//!
//! The probe runs once; its [`DeviceProfile`] is immutable afterwards and is
//! what the model registry stamps into every descriptor.

use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::core::{DevicePreference, Precision};
use crate::envconfig::{DeviceSetting, PrecisionSetting};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub vendor: String,
    pub name: String,
    pub total_vram: u64,
    pub free_vram: u64,
    pub compute_capability: Option<String>,
    pub driver_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceProfile {
    pub device: DevicePreference,
    pub precision: Precision,
    pub gpus: Vec<GpuInfo>,
}

impl DeviceProfile {
    pub fn probe(device: DeviceSetting, precision: PrecisionSetting) -> Self {
        let gpus = discover_nvidia_gpus();
        let cuda_usable = candle_core::utils::cuda_is_available() && !gpus.is_empty();

        let profile = Self::resolve(device, precision, cuda_usable, gpus);
        tracing::info!(
            device = %profile.device,
            precision = %profile.precision,
            gpus = profile.gpus.len(),
            cuda_compiled = candle_core::utils::cuda_is_available(),
            "Device profile"
        );
        profile
    }

    pub fn resolve(
        device: DeviceSetting,
        precision: PrecisionSetting,
        cuda_usable: bool,
        gpus: Vec<GpuInfo>,
    ) -> Self {
        let device = match device {
            DeviceSetting::Auto if cuda_usable => DevicePreference::Gpu,
            DeviceSetting::Auto | DeviceSetting::Cpu => DevicePreference::Cpu,
            DeviceSetting::Gpu => {
                if !cuda_usable {
                    tracing::warn!("GPU requested but CUDA is unavailable; model loads will fail");
                }
                DevicePreference::Gpu
            }
        };

        let precision = match precision {
            PrecisionSetting::Auto => match device {
                DevicePreference::Gpu => Precision::Half,
                DevicePreference::Cpu => Precision::Full,
            },
            PrecisionSetting::Full => Precision::Full,
            PrecisionSetting::Half => Precision::Half,
        };

        Self {
            device,
            precision,
            gpus,
        }
    }
}

pub fn discover_nvidia_gpus() -> Vec<GpuInfo> {
    let output = match Command::new("nvidia-smi")
        .args([
            "--query-gpu=name,memory.total,memory.free,compute_cap,driver_version",
            "--format=csv,noheader,nounits",
        ])
        .output()
    {
        Ok(o) => o,
        Err(_) => return Vec::new(),
    };

    if !output.status.success() {
        return Vec::new();
    }

    parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
}

fn parse_nvidia_smi(out: &str) -> Vec<GpuInfo> {
    out.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
            if parts.len() < 3 {
                return None;
            }

            Some(GpuInfo {
                vendor: "nvidia".to_string(),
                name: parts[0].to_string(),
                total_vram: parts[1].parse::<u64>().unwrap_or(0) * 1024 * 1024,
                free_vram: parts[2].parse::<u64>().unwrap_or(0) * 1024 * 1024,
                compute_capability: parts.get(3).map(|s| s.to_string()),
                driver_version: parts.get(4).map(|s| s.to_string()),
            })
        })
        .collect()
}
