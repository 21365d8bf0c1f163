//! story-cli: one-shot client for the story-weaver service.
//!
//! Sends a generate request to a running story-weaver-rs server, prints the
//! story to stdout, and can save or play the narration WAV. Carries its own
//! wire structs; it is a client of the HTTP API, not of the crate internals.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(name = "story-cli", about = "Generate a children's story from the terminal")]
struct Args {
    /// Base URL of the story-weaver service
    #[arg(long, default_value = "http://127.0.0.1:8768")]
    server: String,

    /// Main character name
    #[arg(long, default_value = "Maya the Cat")]
    character: String,

    /// Story setting
    #[arg(long, default_value = "a floating island in the clouds")]
    setting: String,

    /// Mood (happy, mysterious, adventurous, calm, silly)
    #[arg(long, default_value = "happy")]
    mood: String,

    /// One-line theme
    #[arg(long, default_value = "friendship and courage")]
    theme: String,

    /// Model name override
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    temperature: Option<f64>,

    #[arg(long)]
    top_k: Option<u32>,

    #[arg(long)]
    top_p: Option<f64>,

    #[arg(long)]
    seed: Option<u32>,

    #[arg(long)]
    max_tokens: Option<u32>,

    /// Also synthesize narration and download the WAV
    #[arg(long)]
    narrate: bool,

    /// Play the narration after download (implies --narrate)
    #[arg(long)]
    play: bool,

    /// Write the story text to this file
    #[arg(long)]
    out: Option<PathBuf>,

    /// Print service status and exit
    #[arg(long)]
    status: bool,
}

// --- Wire types (mirror of the service API) ---

#[derive(Serialize)]
struct GenerateRequest {
    character: String,
    setting: String,
    mood: String,
    theme: String,
    narrate: bool,
    params: Params,
}

#[derive(Serialize)]
struct Params {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct StoryReply {
    status: String,
    story: Option<String>,
    model: Option<String>,
    seed: Option<u32>,
    latency_ms: Option<i64>,
    words: Option<usize>,
    audio: Option<String>,
    audio_error: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    model: String,
    ollama_host: String,
    tts_available: bool,
    voice: Option<String>,
    stories_generated: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("story-cli: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), String> {
    let client = Client::builder()
        .connect_timeout(Duration::from_millis(500))
        .timeout(Duration::from_secs(180))
        .build()
        .map_err(|e| format!("failed to build HTTP client: {e}"))?;

    // Connectivity check first, so a dead server gives a short message
    // instead of a generate timeout
    let status = client
        .get(format!("{}/api/status", args.server))
        .send()
        .await
        .map_err(|_| format!("cannot reach story-weaver service at {}", args.server))?
        .json::<StatusResponse>()
        .await
        .map_err(|e| format!("malformed status response: {e}"))?;

    if args.status {
        println!("model:              {}", status.model);
        println!("ollama host:        {}", status.ollama_host);
        println!(
            "narration:          {}",
            if status.tts_available {
                format!("available ({})", status.voice.as_deref().unwrap_or("?"))
            } else {
                "disabled".to_string()
            }
        );
        println!("stories generated:  {}", status.stories_generated);
        return Ok(());
    }

    let narrate = args.narrate || args.play;
    if narrate && !status.tts_available {
        return Err("narration requested but the service has it disabled".into());
    }

    let request = GenerateRequest {
        character: args.character,
        setting: args.setting,
        mood: args.mood,
        theme: args.theme,
        narrate,
        params: Params {
            model: args.model,
            temperature: args.temperature,
            top_k: args.top_k,
            top_p: args.top_p,
            seed: args.seed,
            max_tokens: args.max_tokens,
        },
    };

    eprintln!("Generating story...");
    let reply = client
        .post(format!("{}/api/generate", args.server))
        .json(&request)
        .send()
        .await
        .map_err(|e| format!("generate request failed: {e}"))?
        .json::<StoryReply>()
        .await
        .map_err(|e| format!("malformed generate response: {e}"))?;

    if reply.status != "ok" {
        return Err(reply.error.unwrap_or_else(|| "generation failed".into()));
    }
    let story = reply.story.ok_or("response contained no story")?;

    println!("{story}");
    eprintln!(
        "\n{} words · {} · seed {} · {}ms",
        reply.words.unwrap_or(0),
        reply.model.as_deref().unwrap_or("?"),
        reply.seed.unwrap_or(0),
        reply.latency_ms.unwrap_or(0),
    );

    if let Some(path) = &args.out {
        let mut file =
            std::fs::File::create(path).map_err(|e| format!("cannot create {}: {e}", path.display()))?;
        writeln!(file, "{story}").map_err(|e| format!("cannot write {}: {e}", path.display()))?;
        eprintln!("Story saved to {}", path.display());
    }

    if let Some(error) = &reply.audio_error {
        return Err(format!("narration failed: {error}"));
    }

    if let Some(audio_name) = &reply.audio {
        let bytes = client
            .get(format!("{}/audio/{audio_name}", args.server))
            .send()
            .await
            .map_err(|e| format!("audio download failed: {e}"))?
            .bytes()
            .await
            .map_err(|e| format!("audio download failed: {e}"))?;

        let audio_path = PathBuf::from(audio_name);
        std::fs::write(&audio_path, &bytes)
            .map_err(|e| format!("cannot write {}: {e}", audio_path.display()))?;
        eprintln!("Narration saved to {}", audio_path.display());

        if args.play {
            play_wav(&audio_path)?;
        }
    }

    Ok(())
}

/// Decode and play a WAV file, blocking until playback finishes.
fn play_wav(path: &std::path::Path) -> Result<(), String> {
    let stream = rodio::OutputStreamBuilder::open_default_stream()
        .map_err(|e| format!("failed to open audio output: {e}"))?;
    let sink = rodio::Sink::connect_new(stream.mixer());

    let file = std::fs::File::open(path).map_err(|e| format!("cannot open {}: {e}", path.display()))?;
    let source = rodio::Decoder::new(std::io::BufReader::new(file))
        .map_err(|e| format!("cannot decode {}: {e}", path.display()))?;

    eprintln!("Playing narration...");
    sink.append(source);
    sink.sleep_until_end();
    Ok(())
}
