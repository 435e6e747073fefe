// DrawBench: text-to-image prompts, images scored by an external model.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use super::COT_PROMPT;
use crate::client::OpenAiClient;
use crate::dataset::{Record, field_text};
use crate::error::{CompletionError, ConfigError, DatasetError};
use crate::report::DetailRow;
use crate::retry::RetryPolicy;

pub fn build_example_prompt(record: &Record, index: usize) -> Result<String, DatasetError> {
    field_text(record, "prompts", index).or_else(|_| field_text(record, "prompt", index))
}

pub fn build_prompts(
    records: &[Record],
    fewshot: &[Record],
    cot: bool,
) -> Result<Vec<String>, DatasetError> {
    let few_shots = fewshot
        .iter()
        .enumerate()
        .map(|(i, example)| build_example_prompt(example, i))
        .collect::<Result<Vec<_>, _>>()?;

    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let prompt = build_example_prompt(record, i)?;
            if few_shots.is_empty() {
                return Ok(prompt);
            }
            let mut examples = few_shots.clone();
            examples.push(prompt);
            let joined = examples.join("\n\n");
            Ok(if cot {
                format!("{joined}{COT_PROMPT}")
            } else {
                joined
            })
        })
        .collect()
}

// only diffusion pipelines are wired up
pub fn check_pipeline(model: &str) -> Result<(), ConfigError> {
    if model.contains("stable-diffusion") {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field: "model_cfgs.model_name_or_path".to_string(),
            reason: format!("model '{model}' is not a supported image pipeline"),
        })
    }
}

// Image generation engine
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    // PNG bytes for a prompt
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, CompletionError>;
}

// Image scoring model
#[async_trait]
pub trait ImageScorer: Send + Sync {
    async fn score(&self, image_path: &Path, prompt: &str) -> Result<f64, CompletionError>;
}

// OpenAI compatible /images/generations
pub struct OpenAiImageGenerator {
    client: OpenAiClient,
    model: String,
}

impl OpenAiImageGenerator {
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[derive(Deserialize)]
struct ImagesResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, CompletionError> {
        let res = self
            .client
            .http()
            .post(self.client.endpoint("images/generations"))
            .bearer_auth(&self.client.credentials().api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": prompt,
                "n": 1,
                "response_format": "b64_json",
            }))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: ImagesResponse = res
            .json()
            .await
            .map_err(|e| CompletionError::Decode(e.to_string()))?;
        let encoded = body
            .data
            .into_iter()
            .find_map(|d| d.b64_json)
            .ok_or_else(|| CompletionError::Decode("response holds no image".to_string()))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| CompletionError::Decode(e.to_string()))
    }
}

// Scoring service: POST {"prompt", "image_path"} -> {"score"}
pub struct HttpImageScorer {
    client: reqwest::Client,
    url: String,
}

impl HttpImageScorer {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[derive(Deserialize)]
struct ScoreResponse {
    score: f64,
}

#[async_trait]
impl ImageScorer for HttpImageScorer {
    async fn score(&self, image_path: &Path, prompt: &str) -> Result<f64, CompletionError> {
        let res = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "prompt": prompt,
                "image_path": image_path.to_string_lossy(),
            }))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body: ScoreResponse = res
            .json()
            .await
            .map_err(|e| CompletionError::Decode(e.to_string()))?;
        Ok(body.score)
    }
}

// generate one image per prompt into `task_dir/image_<n>.png`
pub async fn generate_images(
    generator: &dyn ImageGenerator,
    prompts: &[String],
    task_dir: &Path,
    retry: RetryPolicy,
) -> anyhow::Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(task_dir).await?;

    let mut paths = Vec::with_capacity(prompts.len());
    for (idx, prompt) in prompts.iter().enumerate() {
        let attempted = retry.run(move |_| generator.generate(prompt)).await;
        let bytes = attempted.result.map_err(|e| {
            anyhow::anyhow!(
                "image generation failed for prompt {} after {} attempts: {e}",
                idx + 1,
                attempted.attempts
            )
        })?;
        let path = task_dir.join(format!("image_{}.png", idx + 1));
        tokio::fs::write(&path, bytes).await?;
        info!(image = %path.display(), "generated {}/{}", idx + 1, prompts.len());
        paths.push(path);
    }
    Ok(paths)
}

// mean score over every generated image
pub async fn evaluate(
    scorer: &dyn ImageScorer,
    prompts: &[String],
    image_paths: &[PathBuf],
) -> anyhow::Result<(f64, Vec<DetailRow>)> {
    let mut total = 0.0;
    let mut rows = Vec::with_capacity(prompts.len());
    for (prompt, path) in prompts.iter().zip(image_paths) {
        let score = scorer.score(path, prompt).await?;
        total += score;
        rows.push(DetailRow::scored(
            prompt.clone(),
            path.display().to_string(),
            score,
        ));
    }
    let mean = if rows.is_empty() {
        0.0
    } else {
        total / rows.len() as f64
    };
    Ok((mean, rows))
}
