//! HTTP server for the story generator.
//!
//! Serves the single-page UI at / and a small JSON API under /api, plus
//! exported narration WAVs under /audio. Runs on port 8768 (configurable)
//! using axum.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::generator::{SamplingParams, StoryGenerator};
use crate::history::{save_record, StoryRecord};
use crate::postprocess::tidy_story;
use crate::prompt::{build_prompt, StoryFields};
use crate::tts::SpeechEngine;

const INDEX_HTML: &str = include_str!("../assets/index.html");

#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<StoryGenerator>,
    pub speech: Option<Arc<SpeechEngine>>,
    pub config: Arc<Config>,
    pub stories_generated: Arc<AtomicU64>,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct GenerateRequest {
    #[serde(flatten)]
    fields: StoryFields,
    #[serde(default)]
    params: ParamOverrides,
    #[serde(default)]
    narrate: bool,
}

/// Per-request overrides of the configured sampling defaults.
#[derive(Debug, Default, Deserialize)]
struct ParamOverrides {
    model: Option<String>,
    temperature: Option<f64>,
    top_k: Option<u32>,
    top_p: Option<f64>,
    seed: Option<u32>,
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct NarrateRequest {
    text: String,
    #[serde(default)]
    seed: Option<u32>,
}

#[derive(Serialize)]
struct StoryReply {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    story: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    words: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_duration_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl StoryReply {
    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            story: None,
            model: None,
            seed: None,
            latency_ms: None,
            words: None,
            audio: None,
            audio_duration_s: None,
            audio_error: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Serialize)]
struct NarrateReply {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl NarrateReply {
    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            file: None,
            duration_s: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    model: String,
    ollama_host: String,
    tts_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    voices: Vec<String>,
    stories_generated: u64,
}

// --- Router ---

/// Build the axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/api/generate", post(handle_generate))
        .route("/api/narrate", post(handle_narrate))
        .route("/api/status", get(handle_status))
        .route("/audio/{name}", get(handle_audio))
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(state: AppState, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Story server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

// --- Handlers ---

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        model: state.generator.default_model().to_string(),
        ollama_host: state.generator.host().to_string(),
        tts_available: state.speech.is_some(),
        voice: state.speech.as_ref().map(|s| s.voice().to_string()),
        voices: state
            .speech
            .as_ref()
            .map(|s| s.list_voices())
            .unwrap_or_default(),
        stories_generated: state.stories_generated.load(Ordering::Relaxed),
    })
}

async fn handle_generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Json<StoryReply> {
    let fields = req.fields.cleaned();
    let params = merge_params(&state.config.sampling, &req.params).clamped();

    info!(
        "Generate request: character=\"{}\" setting=\"{}\" mood={} seed={}",
        fields.character, fields.setting, fields.mood, params.seed,
    );

    let prompt = build_prompt(&fields);
    let generated = match state.generator.generate(&prompt, &params).await {
        Ok(g) => g,
        Err(e) => {
            warn!("Generation failed: {e}");
            return Json(StoryReply::err(e.to_string()));
        }
    };

    let story = tidy_story(&generated.text, &prompt, state.config.story.wrap_width);
    if story.is_empty() {
        return Json(StoryReply::err("model produced no usable story"));
    }
    let words = story.split_whitespace().count();

    // Optional narration in the same request
    let (audio, audio_duration_s, audio_error) = if req.narrate {
        narrate_to_file(&state, &story, params.seed).await
    } else {
        (None, None, None)
    };

    state.stories_generated.fetch_add(1, Ordering::Relaxed);

    save_record(&StoryRecord {
        timestamp: chrono::Local::now()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string(),
        character: fields.character.clone(),
        setting: fields.setting.clone(),
        mood: fields.mood.clone(),
        theme: fields.theme.clone(),
        model: generated.model.clone(),
        seed: params.seed,
        temperature: params.temperature,
        top_k: params.top_k,
        top_p: params.top_p,
        max_tokens: params.max_tokens,
        story_chars: story.chars().count(),
        story_words: words,
        generate_latency_ms: generated.latency_ms,
        narrated: audio.is_some(),
        audio_file: audio.clone(),
    });

    Json(StoryReply {
        status: "ok".into(),
        story: Some(story),
        model: Some(generated.model),
        seed: Some(params.seed),
        latency_ms: Some(generated.latency_ms),
        words: Some(words),
        audio,
        audio_duration_s,
        audio_error,
        error: None,
    })
}

async fn handle_narrate(
    State(state): State<AppState>,
    Json(req): Json<NarrateRequest>,
) -> Json<NarrateReply> {
    if req.text.trim().is_empty() {
        return Json(NarrateReply::err("empty text"));
    }

    let seed = req.seed.unwrap_or(0);
    let (file, duration_s, error) = narrate_to_file(&state, &req.text, seed).await;

    match (file, error) {
        (Some(file), _) => Json(NarrateReply {
            status: "ok".into(),
            file: Some(file),
            duration_s,
            error: None,
        }),
        (None, Some(e)) => Json(NarrateReply::err(e)),
        (None, None) => Json(NarrateReply::err("narration failed")),
    }
}

async fn handle_audio(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    if !valid_audio_name(&name) {
        return (StatusCode::BAD_REQUEST, "invalid audio name").into_response();
    }

    let path = PathBuf::from(&state.config.story.audio_dir).join(&name);
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "audio/wav")],
            bytes,
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "no such audio file").into_response(),
    }
}

// --- Helpers ---

/// Run the speech engine on a blocking thread and export `story_{seed}.wav`.
/// Returns (file name, duration, error) with at most one of file/error set.
async fn narrate_to_file(
    state: &AppState,
    text: &str,
    seed: u32,
) -> (Option<String>, Option<f64>, Option<String>) {
    let Some(engine) = state.speech.clone() else {
        return (None, None, Some("narration is disabled".into()));
    };

    let file_name = format!("story_{seed}.wav");
    let out_path = PathBuf::from(&state.config.story.audio_dir).join(&file_name);
    let text = text.to_string();

    let result =
        tokio::task::spawn_blocking(move || engine.export_wav(&text, &out_path)).await;

    match result {
        Ok(Ok(export)) => {
            info!(
                "Narrated {file_name}: {:.0}ms synth, {:.1}s audio ({} samples)",
                export.synth_ms, export.duration_s, export.sample_count,
            );
            (Some(file_name), Some(export.duration_s), None)
        }
        Ok(Err(e)) => {
            warn!("Narration failed: {e}");
            (None, None, Some(e))
        }
        Err(e) => {
            warn!("Narration task panicked: {e}");
            (None, None, Some("narration task failed".into()))
        }
    }
}

/// Merge request overrides over the configured sampling defaults.
fn merge_params(
    defaults: &crate::config::SamplingConfig,
    overrides: &ParamOverrides,
) -> SamplingParams {
    let mut params = SamplingParams::from_config(defaults);
    params.model = overrides.model.clone();
    if let Some(v) = overrides.temperature {
        params.temperature = v;
    }
    if let Some(v) = overrides.top_k {
        params.top_k = v;
    }
    if let Some(v) = overrides.top_p {
        params.top_p = v;
    }
    if let Some(v) = overrides.seed {
        params.seed = v;
    }
    if let Some(v) = overrides.max_tokens {
        params.max_tokens = v;
    }
    params
}

/// Audio names are server-generated (`story_{seed}.wav`); anything else,
/// including path separators or dot-dot, is rejected.
fn valid_audio_name(name: &str) -> bool {
    name.ends_with(".wav")
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplingConfig;

    #[test]
    fn overrides_merge_over_defaults() {
        let overrides = ParamOverrides {
            seed: Some(7),
            temperature: Some(1.0),
            ..Default::default()
        };
        let params = merge_params(&SamplingConfig::default(), &overrides);
        assert_eq!(params.seed, 7);
        assert_eq!(params.temperature, 1.0);
        assert_eq!(params.top_k, 50);
        assert_eq!(params.max_tokens, 200);
    }

    #[test]
    fn generate_request_parses_flat_fields() {
        let req: GenerateRequest = serde_json::from_str(
            r#"{
                "character": "Maya the Cat",
                "setting": "a floating island in the clouds",
                "mood": "happy",
                "theme": "friendship",
                "params": {"seed": 7},
                "narrate": true
            }"#,
        )
        .unwrap();
        assert_eq!(req.fields.character, "Maya the Cat");
        assert_eq!(req.params.seed, Some(7));
        assert!(req.narrate);
    }

    #[test]
    fn params_and_narrate_are_optional() {
        let req: GenerateRequest = serde_json::from_str(
            r#"{"character": "a", "setting": "b", "mood": "c", "theme": "d"}"#,
        )
        .unwrap();
        assert!(req.params.seed.is_none());
        assert!(!req.narrate);
    }

    #[test]
    fn audio_names_are_validated() {
        assert!(valid_audio_name("story_42.wav"));
        assert!(!valid_audio_name("../etc/passwd"));
        assert!(!valid_audio_name("story_42.mp3"));
        assert!(!valid_audio_name("a/b.wav"));
        assert!(!valid_audio_name("..wav"));
    }
}
