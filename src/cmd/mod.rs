use anyhow::{Context, Result};
use serde_json::Number;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::api::types::GenerationRequest;
use crate::api::Client;
use crate::core::ModelRegistry;
use crate::discover::DeviceProfile;
use crate::envconfig::Config;

/// Installs the global subscriber. `RUST_LOG` wins over the `info` default.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

pub async fn serve(host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = Config::from_env().context("Failed to read configuration")?;
    if let Some(host) = host {
        config.host.host = host;
    }
    if let Some(port) = port {
        config.host.port = port;
    }
    crate::server::serve(config).await
}

pub async fn prompt(text: Vec<String>, model: Option<String>, max_length: Option<i64>) -> Result<()> {
    let client = Client::from_env()?;

    let mut request = GenerationRequest::new(text.join(" "));
    request.model = model;
    request.max_length = max_length;

    let message = client.llm(&request).await?;
    println!("{message}");
    Ok(())
}

pub async fn multiply(x: &str, y: &str) -> Result<()> {
    let client = Client::from_env()?;
    let message = client.multiply(parse_number(x)?, parse_number(y)?).await?;
    println!("{message}");
    Ok(())
}

fn parse_number(value: &str) -> Result<Number> {
    serde_json::from_str::<Number>(value.trim())
        .with_context(|| format!("'{value}' is not a number"))
}

pub async fn models() -> Result<()> {
    let config = Config::from_env().context("Failed to read configuration")?;
    let profile = DeviceProfile::probe(config.device, config.precision);
    let registry = ModelRegistry::new(profile.device, profile.precision, config.default_max_length);
    let default = registry.default_descriptor();

    println!(
        "\n{:<16} {:<28} {:<8} {:<10} {:<10}",
        "NAME", "MODEL ID", "DEVICE", "PRECISION", "MAX LENGTH"
    );
    println!("{}", "-".repeat(76));

    for d in registry.descriptors() {
        let marker = if d == default { " (default)" } else { "" };
        println!(
            "{:<16} {:<28} {:<8} {:<10} {:<10}{}",
            d.logical_name.as_str(),
            d.model_id,
            d.device.to_string(),
            d.precision.to_string(),
            d.default_max_length,
            marker
        );
    }

    for gpu in &profile.gpus {
        println!(
            "\nGPU: {} ({} MiB free of {} MiB)",
            gpu.name,
            gpu.free_vram / (1024 * 1024),
            gpu.total_vram / (1024 * 1024)
        );
    }
    Ok(())
}

pub async fn version() -> Result<()> {
    println!("llm-service version {}", env!("CARGO_PKG_VERSION"));

    if let Ok(client) = Client::from_env() {
        if let Ok(health) = client.health().await {
            println!("server at {}: {}", client.base_url(), health.status);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("3").unwrap(), Number::from(3));
        assert_eq!(parse_number(" 1.5 ").unwrap().as_f64(), Some(1.5));
        assert!(parse_number("three").is_err());
    }
}
