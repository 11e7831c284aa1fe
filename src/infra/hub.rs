//! Local model store backed by the Hugging Face hub.
//!
//! Files live under `<models_dir>/<model_id>/`. Anything missing is fetched
//! from `<hub_url>/<model_id>/resolve/main/<file>` unless the store is
//! offline. Downloads go to a `.part` file first and are renamed into place,
//! so an interrupted fetch never leaves a truncated weight file behind.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::StatusCode;

use crate::core::EngineError;

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
    hub_url: String,
    token: Option<String>,
    offline: bool,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>, hub_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            hub_url: hub_url.into(),
            token: None,
            offline: false,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn model_dir(&self, model_id: &str) -> PathBuf {
        self.root.join(model_id)
    }

    /// Makes sure config, tokenizer and weights for `model_id` are on disk.
    /// Blocking.
    pub fn resolve(&self, model_id: &str) -> Result<ModelFiles, EngineError> {
        let dir = self.model_dir(model_id);
        fs::create_dir_all(&dir)?;

        let config = self.ensure(&dir, model_id, CONFIG_FILE)?;
        let tokenizer = self.ensure(&dir, model_id, TOKENIZER_FILE)?;
        let weights = self.weights(&dir, model_id)?;

        Ok(ModelFiles {
            config,
            tokenizer,
            weights,
        })
    }

    fn weights(&self, dir: &Path, model_id: &str) -> Result<Vec<PathBuf>, EngineError> {
        let single = dir.join(WEIGHTS_FILE);
        if single.exists() {
            return Ok(vec![single]);
        }

        let index = dir.join(WEIGHTS_INDEX_FILE);
        if !index.exists() {
            if self.offline {
                return Err(EngineError::NotFound(format!(
                    "no weights for {model_id} in {}",
                    dir.display()
                )));
            }

            match self.download(dir, model_id, WEIGHTS_FILE) {
                Ok(path) => return Ok(vec![path]),
                Err(EngineError::NotFound(_)) => {
                    tracing::debug!(model_id, "No single weight file, trying sharded index");
                    self.download(dir, model_id, WEIGHTS_INDEX_FILE)?;
                }
                Err(e) => return Err(e),
            }
        }

        let shards = parse_index(&fs::read_to_string(&index)?)?;
        shards
            .iter()
            .map(|shard| self.ensure(dir, model_id, shard))
            .collect()
    }

    fn ensure(&self, dir: &Path, model_id: &str, file: &str) -> Result<PathBuf, EngineError> {
        let path = dir.join(file);
        if path.exists() {
            return Ok(path);
        }
        if self.offline {
            return Err(EngineError::NotFound(format!(
                "{} (offline mode)",
                path.display()
            )));
        }
        self.download(dir, model_id, file)
    }

    fn download(&self, dir: &Path, model_id: &str, file: &str) -> Result<PathBuf, EngineError> {
        let url = format!("{}/{}/resolve/main/{}", self.hub_url, model_id, file);
        let dest = dir.join(file);
        let partial = dir.join(format!("{file}.part"));

        tracing::info!(%url, dest = %dest.display(), "Downloading");
        let start = Instant::now();

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .build()
            .map_err(|e| EngineError::Download(e.to_string()))?;

        let mut request = client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let mut response = request
            .send()
            .map_err(|e| EngineError::Download(format!("{url}: {e}")))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(EngineError::NotFound(url)),
            status => return Err(EngineError::Download(format!("{url}: HTTP {status}"))),
        }

        let mut out = fs::File::create(&partial)?;
        let bytes = io::copy(&mut response, &mut out)
            .map_err(|e| EngineError::Download(format!("{url}: {e}")))?;
        out.flush()?;
        drop(out);
        fs::rename(&partial, &dest)?;

        tracing::info!(
            file,
            bytes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Download complete"
        );
        Ok(dest)
    }
}

#[derive(serde::Deserialize)]
struct WeightIndex {
    weight_map: std::collections::HashMap<String, String>,
}

/// Shard file names referenced by a `model.safetensors.index.json`.
fn parse_index(json: &str) -> Result<Vec<String>, EngineError> {
    let index: WeightIndex = serde_json::from_str(json)?;
    let shards: BTreeSet<String> = index.weight_map.into_values().collect();
    if shards.is_empty() {
        return Err(EngineError::NotFound("weight index lists no shards".to_string()));
    }
    Ok(shards.into_iter().collect())
}
