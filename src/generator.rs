//! Ollama story generation.
//!
//! Sends the assembled prompt to Ollama's /api/generate endpoint with the
//! user's sampling knobs passed through unmodified. Unlike grammar-fixup
//! flows there is no original text to fall back to, so failures surface
//! as errors instead of degraded output.

use std::time::Instant;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{OllamaConfig, SamplingConfig};

/// Sampling knobs forwarded to the model, bounded to the UI slider ranges.
#[derive(Debug, Clone)]
pub struct SamplingParams {
    /// Model name override; falls back to the configured model.
    pub model: Option<String>,
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub seed: u32,
    pub max_tokens: u32,
}

impl SamplingParams {
    pub fn from_config(config: &SamplingConfig) -> Self {
        Self {
            model: None,
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            seed: config.seed,
            max_tokens: config.max_tokens,
        }
    }

    /// Clamp every knob into its slider range.
    pub fn clamped(mut self) -> Self {
        self.temperature = self.temperature.clamp(0.1, 1.2);
        self.top_p = self.top_p.clamp(0.1, 1.0);
        self.top_k = self.top_k.clamp(10, 200);
        self.seed = self.seed.min(9999);
        self.max_tokens = self.max_tokens.clamp(80, 400);
        self
    }
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Ollama request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Ollama returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed generation response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("model returned an empty completion")]
    EmptyCompletion,
}

/// Subset of Ollama's /api/generate reply we care about.
#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    pub model: String,
    pub response: String,
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub eval_duration: Option<u64>,
}

/// One raw completion plus bookkeeping for history records.
#[derive(Debug, Clone)]
pub struct Generated {
    pub text: String,
    pub model: String,
    pub latency_ms: i64,
}

pub struct StoryGenerator {
    model: String,
    host: String,
    client: Client,
}

impl StoryGenerator {
    pub fn new(config: &OllamaConfig) -> Result<Self, GeneratorError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            host: config.host.clone(),
            client,
        })
    }

    pub fn default_model(&self) -> &str {
        &self.model
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Request one completion for the prompt.
    pub async fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<Generated, GeneratorError> {
        let t_start = Instant::now();
        let body = request_body(prompt, params, &self.model);
        let model = params.model.as_deref().unwrap_or(&self.model);

        debug!("Sending prompt to Ollama model '{model}' ({} chars)", prompt.len());

        let url = format!("{}/api/generate", self.host);
        let resp = self.client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            return Err(GeneratorError::Status(resp.status()));
        }

        let text = resp.text().await?;
        let parsed: GenerateResponse = serde_json::from_str(&text)?;
        debug!(
            "Ollama reply: done={} reason={:?} tokens={:?} total={:?}ns eval={:?}ns",
            parsed.done,
            parsed.done_reason,
            parsed.eval_count,
            parsed.total_duration,
            parsed.eval_duration,
        );

        let completion = parsed.response.trim();
        if completion.is_empty() {
            return Err(GeneratorError::EmptyCompletion);
        }

        let latency_ms = t_start.elapsed().as_millis() as i64;
        info!(
            "Generated {} chars with {} in {latency_ms}ms",
            completion.len(),
            parsed.model,
        );

        Ok(Generated {
            text: completion.to_string(),
            model: parsed.model,
            latency_ms,
        })
    }
}

/// Build the /api/generate request body.
fn request_body(prompt: &str, params: &SamplingParams, default_model: &str) -> serde_json::Value {
    json!({
        "model": params.model.as_deref().unwrap_or(default_model),
        "prompt": prompt,
        "stream": false,
        "options": {
            "temperature": params.temperature,
            "top_k": params.top_k,
            "top_p": params.top_p,
            "seed": params.seed,
            "num_predict": params.max_tokens
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> SamplingParams {
        SamplingParams::from_config(&SamplingConfig::default())
    }

    #[test]
    fn request_body_passes_knobs_through() {
        let body = request_body("Story:\n", &params(), "llama3.2:3b");
        assert_eq!(body["model"], "llama3.2:3b");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["temperature"], 0.9);
        assert_eq!(body["options"]["top_k"], 50);
        assert_eq!(body["options"]["top_p"], 0.95);
        assert_eq!(body["options"]["seed"], 42);
        assert_eq!(body["options"]["num_predict"], 200);
    }

    #[test]
    fn request_body_honors_model_override() {
        let mut p = params();
        p.model = Some("llama3.2:1b".into());
        let body = request_body("x", &p, "llama3.2:3b");
        assert_eq!(body["model"], "llama3.2:1b");
    }

    #[test]
    fn clamping_bounds_every_knob() {
        let wild = SamplingParams {
            model: None,
            temperature: 5.0,
            top_k: 1,
            top_p: 0.0,
            seed: 123_456,
            max_tokens: 10_000,
        }
        .clamped();
        assert_eq!(wild.temperature, 1.2);
        assert_eq!(wild.top_k, 10);
        assert_eq!(wild.top_p, 0.1);
        assert_eq!(wild.seed, 9999);
        assert_eq!(wild.max_tokens, 400);
    }

    #[test]
    fn parses_generate_response() {
        let sample = json!({
            "model": "llama3.2:3b",
            "created_at": "2025-06-01T12:00:00.000Z",
            "response": "Once upon a time, Maya the Cat set sail.",
            "done": true,
            "done_reason": "stop",
            "total_duration": 2_100_000_000u64,
            "prompt_eval_count": 38u64,
            "eval_count": 112u64,
            "eval_duration": 1_900_000_000u64
        });

        let parsed: GenerateResponse = serde_json::from_value(sample).unwrap();
        assert!(parsed.done);
        assert_eq!(parsed.eval_count, Some(112));
        assert!(parsed.response.starts_with("Once upon a time"));
    }

    #[test]
    fn missing_timing_fields_default_to_none() {
        let sample = json!({
            "model": "llama3.2:3b",
            "response": "A tale.",
            "done": true
        });
        let parsed: GenerateResponse = serde_json::from_value(sample).unwrap();
        assert_eq!(parsed.total_duration, None);
        assert_eq!(parsed.eval_count, None);
    }
}
