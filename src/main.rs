//! story-weaver-rs: children's story generator with optional narration.

mod config;
mod generator;
mod history;
mod postprocess;
mod prompt;
mod server;
mod tts;

use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "story-weaver-rs", about = "Children's story generator service")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Disable narration even if enabled in config
    #[arg(long)]
    no_tts: bool,

    /// Print a Markdown story report for a date (YYYY-MM-DD) and exit
    #[arg(long, value_name = "DATE", num_args = 0..=1, default_missing_value = "today")]
    report: Option<String>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy ort internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info")
    } else {
        EnvFilter::new("info,ort=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(date) = &args.report {
        println!("{}", history::generate_report(date));
        let dates = history::list_available_dates();
        if !dates.is_empty() {
            println!("\nAvailable dates: {}", dates.join(", "));
        }
        return Ok(());
    }

    info!("story-weaver-rs starting");

    // Load config
    let config = config::Config::load(args.config.as_deref());
    let port = args.port.unwrap_or(config.server.port);

    // Ollama generation client (built once, shared for the process lifetime)
    let generator = Arc::new(generator::StoryGenerator::new(&config.ollama)?);
    info!(
        "Using Ollama model '{}' at {}",
        generator.default_model(),
        generator.host()
    );

    // Narration engine is optional: a failed load degrades the service
    // instead of stopping it
    let speech = if config.tts.enabled && !args.no_tts {
        info!("Loading Kokoro narration engine...");
        match tts::SpeechEngine::load(&config.tts) {
            Ok(engine) => {
                info!("Narration ready (voice: {}, speed: {})", config.tts.voice, config.tts.speed);
                Some(Arc::new(engine))
            }
            Err(e) => {
                tracing::warn!("Failed to load narration engine: {e}");
                info!("Narration disabled — continuing text-only");
                None
            }
        }
    } else {
        info!("Narration disabled");
        None
    };

    let state = server::AppState {
        generator,
        speech,
        config: Arc::new(config),
        stories_generated: Arc::new(AtomicU64::new(0)),
    };

    server::serve(state, port).await
}
