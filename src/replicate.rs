use std::collections::BTreeMap;

use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt;
use tokio::time::{Duration, Instant, sleep};

use crate::error::ApiError;
use crate::store::ImageLocation;

const REPLICATE_BASE_URL: &str = "https://api.replicate.com/v1";
const BASE_DIMENSION: u32 = 1024;
const SEED_MODULUS: u32 = 1_000_000_000;
const POLL_INTERVAL_MS: u64 = 2_000;
const POLL_TIMEOUT_MS: u64 = 5 * 60 * 1_000;

pub const DEFAULT_MODEL: &str = "flux-pro";
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";

/// Logical model key → backend model identifier. Built once at startup and
/// injected into the client.
#[derive(Clone, Debug)]
pub struct ModelRegistry {
    models: BTreeMap<String, String>,
}

impl ModelRegistry {
    pub fn flux_defaults() -> Self {
        let models = [
            ("flux-pro", "black-forest-labs/flux-pro"),
            ("flux-1.1-pro-ultra", "black-forest-labs/flux-1.1-pro-ultra"),
            ("flux-1.1-pro", "black-forest-labs/flux-1.1-pro"),
            ("flux-schnell-lora", "black-forest-labs/flux-schnell-lora"),
        ]
        .into_iter()
        .map(|(key, id)| (key.to_string(), id.to_string()))
        .collect();
        Self { models }
    }

    pub fn resolve(&self, key: &str) -> Option<&str> {
        self.models.get(key).map(String::as_str)
    }
}

/// Aspect ratio string → pixel dimensions. The larger dimension is pinned to
/// the base; the smaller is `floor(base * numerator / denominator)`.
#[derive(Clone, Debug)]
pub struct AspectRatioTable {
    ratios: BTreeMap<String, (u32, u32)>,
}

impl AspectRatioTable {
    pub fn with_base(base: u32) -> Self {
        let supported: [(u32, u32); 10] = [
            (1, 1),
            (4, 3),
            (16, 9),
            (21, 9),
            (3, 2),
            (2, 3),
            (4, 5),
            (5, 4),
            (9, 16),
            (3, 4),
        ];
        let ratios = supported
            .into_iter()
            .map(|(num, den)| {
                (
                    format!("{num}:{den}"),
                    scaled_dimensions(base, num, den),
                )
            })
            .collect();
        Self { ratios }
    }

    pub fn flux_defaults() -> Self {
        Self::with_base(BASE_DIMENSION)
    }

    pub fn dimensions(&self, aspect_ratio: &str) -> Option<(u32, u32)> {
        self.ratios.get(aspect_ratio).copied()
    }
}

fn scaled_dimensions(base: u32, num: u32, den: u32) -> (u32, u32) {
    if num >= den {
        (base, base * den / num)
    } else {
        (base * num / den, base)
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: Option<String>,
    status: Option<String>,
    output: Option<Value>,
    error: Option<Value>,
    logs: Option<String>,
}

/// One successful generation: where the image bytes are, plus the record
/// describing the request.
#[derive(Debug)]
pub struct Generation {
    pub location: ImageLocation,
    pub metadata: Value,
}

#[derive(Clone, Debug)]
pub struct ReplicateClient {
    http: Client,
    api_token: String,
    base_url: String,
    models: ModelRegistry,
    ratios: AspectRatioTable,
    buffer_output: bool,
}

impl ReplicateClient {
    pub fn new(
        http: Client,
        api_token: String,
        models: ModelRegistry,
        ratios: AspectRatioTable,
        buffer_output: bool,
    ) -> Self {
        Self {
            http,
            api_token,
            base_url: REPLICATE_BASE_URL.to_string(),
            models,
            ratios,
            buffer_output,
        }
    }

    /// Points the client at a different API root, e.g. a mock server in
    /// tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Validates inputs against the registry and ratio table before any
    /// network call, then runs one prediction to completion.
    pub async fn generate(
        &self,
        prompt: &str,
        model_key: &str,
        aspect_ratio: &str,
    ) -> Result<Generation, ApiError> {
        let model_id = self
            .models
            .resolve(model_key)
            .ok_or_else(|| ApiError::InvalidArgument(format!("Unsupported model: {model_key}")))?;
        let (width, height) = self.ratios.dimensions(aspect_ratio).ok_or_else(|| {
            ApiError::InvalidArgument(format!("Unsupported aspect ratio: {aspect_ratio}"))
        })?;
        let seed = rand::random::<u32>() % SEED_MODULUS;

        tracing::info!(model = model_key, aspect_ratio, width, height, seed, "starting prediction");

        let response = self
            .http
            .post(format!("{}/models/{model_id}/predictions", self.base_url))
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&json!({
                "input": {
                    "prompt": prompt,
                    "width": width,
                    "height": height,
                    "aspect_ratio": aspect_ratio,
                    "seed": seed
                }
            }))
            .send()
            .await?;
        let response = assert_ok_response(response).await?;
        let prediction: Prediction = response.json().await?;
        let prediction = self.wait_for_completion(prediction).await?;

        let output_url = prediction
            .output
            .as_ref()
            .and_then(first_output_url)
            .ok_or_else(|| ApiError::Upstream("Replicate returned no output".to_string()))?;

        let location = if self.buffer_output {
            ImageLocation::File(self.download_to_temp(&output_url).await?)
        } else {
            ImageLocation::Url(output_url)
        };

        Ok(Generation {
            location,
            metadata: json!({
                "model": model_key,
                "prompt": prompt,
                "aspect_ratio": aspect_ratio,
                "width": width,
                "height": height,
                "seed": seed
            }),
        })
    }

    async fn wait_for_completion(&self, mut prediction: Prediction) -> Result<Prediction, ApiError> {
        let deadline = Instant::now() + Duration::from_millis(POLL_TIMEOUT_MS);
        loop {
            match prediction.status.as_deref() {
                Some("succeeded") => return Ok(prediction),
                Some("failed") | Some("canceled") => {
                    let id = prediction.id.unwrap_or_default();
                    let detail = prediction
                        .error
                        .map(|err| err.to_string())
                        .unwrap_or_else(|| "unknown error".to_string());
                    if let Some(logs) = prediction.logs.filter(|logs| !logs.is_empty()) {
                        tracing::error!(prediction_id = %id, logs = %logs, "backend generation logs");
                    }
                    return Err(ApiError::UpstreamModel(format!(
                        "prediction {id} failed: {detail}"
                    )));
                }
                _ => {}
            }

            if Instant::now() > deadline {
                let id = prediction.id.unwrap_or_default();
                return Err(ApiError::Upstream(format!(
                    "prediction {id} timed out"
                )));
            }
            let id = prediction
                .id
                .clone()
                .ok_or_else(|| ApiError::Upstream("Replicate returned no prediction id".to_string()))?;
            sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;

            let response = self
                .http
                .get(format!("{}/predictions/{id}", self.base_url))
                .bearer_auth(&self.api_token)
                .send()
                .await?;
            let response = assert_ok_response(response).await?;
            prediction = response.json().await?;
        }
    }

    /// Drains the output byte stream into a scoped temp file. The returned
    /// `TempPath` owns the file and removes it on drop.
    async fn download_to_temp(&self, url: &str) -> Result<TempPath, ApiError> {
        let response = self.http.get(url).send().await?;
        let response = assert_ok_response(response).await?;

        let (file, temp_path) = NamedTempFile::new()
            .map_err(|err| ApiError::Storage(format!("create temp file: {err}")))?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        Ok(temp_path)
    }
}

fn first_output_url(output: &Value) -> Option<String> {
    match output {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items
            .iter()
            .find_map(|item| item.as_str().map(str::to_string)),
        _ => None,
    }
}

async fn assert_ok_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(ApiError::Upstream(format!(
        "Replicate request failed: {status} {text}"
    )))
}
