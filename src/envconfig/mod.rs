use std::env;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::core::model::DEFAULT_MAX_LENGTH;
use crate::core::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_HUB_URL: &str = "https://huggingface.co";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSetting {
    Auto,
    Cpu,
    Gpu,
}

impl FromStr for DeviceSetting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "gpu" | "cuda" => Ok(Self::Gpu),
            other => Err(Error::config(format!("unknown device '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecisionSetting {
    Auto,
    Full,
    Half,
}

impl FromStr for PrecisionSetting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "full" | "f32" | "fp32" => Ok(Self::Full),
            "half" | "f16" | "fp16" => Ok(Self::Half),
            other => Err(Error::config(format!("unknown precision '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub host: String,
    pub port: u16,
}

impl Host {
    /// Parses `host` or `host:port`.
    pub fn parse(value: &str) -> Result<Self, Error> {
        match value.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| Error::config(format!("invalid port in '{value}'")))?;
                Ok(Self {
                    host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
                    port,
                })
            }
            None => Ok(Self {
                host: value.to_string(),
                port: DEFAULT_PORT,
            }),
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, Error> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::config(format!("cannot resolve {}:{}", self.host, self.port)))
    }
}

impl Default for Host {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: Host,
    pub models_dir: PathBuf,
    pub hub_url: String,
    pub hub_token: Option<String>,
    pub offline: bool,
    pub device: DeviceSetting,
    pub precision: PrecisionSetting,
    pub default_max_length: usize,
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: Host::default(),
            models_dir: default_models_dir(),
            hub_url: DEFAULT_HUB_URL.to_string(),
            hub_token: None,
            offline: false,
            device: DeviceSetting::Auto,
            precision: PrecisionSetting::Auto,
            default_max_length: DEFAULT_MAX_LENGTH,
            timeout: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("LLM_SERVICE_HOST") {
            config.host = Host::parse(&host)?;
        }

        if let Some(dir) = lookup("LLM_SERVICE_MODELS") {
            config.models_dir = expand_home(&dir);
        }

        if let Some(url) = lookup("LLM_SERVICE_HUB_URL") {
            config.hub_url = url.trim_end_matches('/').to_string();
        }

        config.hub_token = lookup("HF_TOKEN").filter(|t| !t.is_empty());

        if let Some(offline) = lookup("LLM_SERVICE_OFFLINE") {
            config.offline = parse_bool(&offline)
                .ok_or_else(|| Error::config(format!("invalid LLM_SERVICE_OFFLINE '{offline}'")))?;
        }

        if let Some(device) = lookup("LLM_SERVICE_DEVICE") {
            config.device = device.parse()?;
        }

        if let Some(precision) = lookup("LLM_SERVICE_PRECISION") {
            config.precision = precision.parse()?;
        }

        if let Some(max_length) = lookup("LLM_SERVICE_MAX_LENGTH") {
            config.default_max_length = match max_length.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(Error::config(format!(
                        "LLM_SERVICE_MAX_LENGTH must be a positive integer, got '{max_length}'"
                    )))
                }
            };
        }

        if let Some(secs) = lookup("LLM_SERVICE_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::config(format!("invalid LLM_SERVICE_TIMEOUT_SECS '{secs}'"))
            })?;
            config.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn default_models_dir() -> PathBuf {
    dirs::cache_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("llm-service")
        .join("models")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, Error> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.host, Host::default());
        assert_eq!(config.device, DeviceSetting::Auto);
        assert_eq!(config.default_max_length, DEFAULT_MAX_LENGTH);
        assert!(config.timeout.is_none());
        assert!(!config.offline);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("LLM_SERVICE_HOST", "0.0.0.0:8080"),
            ("LLM_SERVICE_MODELS", "/srv/models"),
            ("LLM_SERVICE_DEVICE", "cpu"),
            ("LLM_SERVICE_PRECISION", "fp16"),
            ("LLM_SERVICE_MAX_LENGTH", "128"),
            ("LLM_SERVICE_TIMEOUT_SECS", "30"),
            ("LLM_SERVICE_OFFLINE", "true"),
            ("LLM_SERVICE_HUB_URL", "http://mirror.local/"),
        ])
        .unwrap();

        assert_eq!(config.host.host, "0.0.0.0");
        assert_eq!(config.host.port, 8080);
        assert_eq!(config.models_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.device, DeviceSetting::Cpu);
        assert_eq!(config.precision, PrecisionSetting::Half);
        assert_eq!(config.default_max_length, 128);
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert!(config.offline);
        assert_eq!(config.hub_url, "http://mirror.local");
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = config_from(&[("LLM_SERVICE_TIMEOUT_SECS", "0")]).unwrap();
        assert!(config.timeout.is_none());
    }

    #[test]
    fn test_invalid_values() {
        assert!(config_from(&[("LLM_SERVICE_DEVICE", "tpu")]).is_err());
        assert!(config_from(&[("LLM_SERVICE_MAX_LENGTH", "0")]).is_err());
        assert!(config_from(&[("LLM_SERVICE_HOST", "localhost:http")]).is_err());
        assert!(config_from(&[("LLM_SERVICE_OFFLINE", "maybe")]).is_err());
    }

    #[test]
    fn test_host_without_port() {
        let host = Host::parse("localhost").unwrap();
        assert_eq!(host.port, DEFAULT_PORT);
    }
}
