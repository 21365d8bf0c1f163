//! Kokoro narration engine: story text → ONNX inference → WAV on disk.
//!
//! Pipeline:
//! 1. Story → sentences (split on .!?)
//! 2. Sentence → phonemes (misaki-rs G2P)
//! 3. Phonemes → token IDs (tokenizer.json vocabulary)
//! 4. Token IDs + voice style + speed → ONNX inference → f32 audio (24kHz)
//! 5. Concatenated audio → 16-bit mono WAV via hound

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use ndarray::{Array2, Array3};
use ndarray_npy::NpzReader;
use ort::value::Tensor;
use tracing::{debug, info};

use crate::config::TtsConfig;

const SAMPLE_RATE: u32 = 24000;
const MAX_TOKENS: usize = 510; // Voice style array first dimension

// Pause inserted between sentences when stitching the story into one file.
const SENTENCE_GAP_S: f32 = 0.25;

/// Result of a WAV export with timing breakdown.
pub struct WavExport {
    pub duration_s: f64,
    pub synth_ms: f64,
    pub sample_count: usize,
}

/// Loaded voice style data, squeezed to shape (510, 256).
struct VoiceData {
    styles: Array2<f32>,
}

/// Native Kokoro narration engine. Fully loaded on construction; a missing
/// model file means the service runs with narration disabled.
pub struct SpeechEngine {
    // ONNX model (Mutex because ort 2.0 Session::run needs &mut)
    session: Mutex<ort::session::Session>,

    // Phonemizer (misaki-rs G2P)
    phonemizer: misaki_rs::G2P,

    // Tokenizer vocabulary: char → token ID
    vocab: HashMap<char, i64>,

    // Voices: name → style data
    voices: HashMap<String, VoiceData>,

    voice: String,
    speed: f32,
}

impl SpeechEngine {
    /// Load tokenizer, voices, ONNX session, and phonemizer.
    /// Blocking; call once at startup.
    pub fn load(config: &TtsConfig) -> Result<Self, String> {
        let t0 = Instant::now();
        let base_dir = std::env::current_dir().unwrap_or_default();

        let resolve = |configured: &str, default_name: &str| -> PathBuf {
            if configured.is_empty() {
                base_dir.join(default_name)
            } else {
                PathBuf::from(configured)
            }
        };

        let model_path = resolve(&config.model_path, "kokoro-v1.0.onnx");
        let voices_path = resolve(&config.voices_path, "voices-v1.0.bin");
        let tokenizer_path = resolve(&config.tokenizer_path, "tokenizer.json");

        info!("Loading tokenizer from {}", tokenizer_path.display());
        let vocab = load_tokenizer(&tokenizer_path)?;
        info!("Tokenizer loaded: {} tokens", vocab.len());

        info!("Loading voices from {}", voices_path.display());
        let voices = load_voices(&voices_path)?;
        info!("Loaded {} voices", voices.len());

        if !voices.contains_key(&config.voice) {
            let mut known: Vec<&str> = voices.keys().map(String::as_str).collect();
            known.sort_unstable();
            return Err(format!(
                "Unknown voice '{}' (available: {})",
                config.voice,
                known.join(", ")
            ));
        }

        info!("Loading ONNX model from {}", model_path.display());
        let session = ort::session::Session::builder()
            .map_err(|e| format!("Failed to create ONNX session builder: {e}"))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| format!("Failed to set optimization level: {e}"))?
            .with_intra_threads(4)
            .map_err(|e| format!("Failed to set thread count: {e}"))?
            .commit_from_file(&model_path)
            .map_err(|e| format!("Failed to load ONNX model: {e}"))?;

        info!("Initializing misaki-rs phonemizer...");
        let phonemizer = misaki_rs::G2P::new(misaki_rs::Language::EnglishUS);

        let load_ms = t0.elapsed().as_millis();
        info!("Kokoro narration engine loaded in {load_ms}ms");

        Ok(Self {
            session: Mutex::new(session),
            phonemizer,
            vocab,
            voices,
            voice: config.voice.clone(),
            speed: config.speed,
        })
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn list_voices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.voices.keys().cloned().collect();
        names.sort();
        names
    }

    /// Synthesize the whole story into one sample buffer, sentence by
    /// sentence with a short pause stitched in between.
    pub fn synthesize(&self, text: &str) -> Result<Vec<f32>, String> {
        let sentences = split_sentences(text.trim());
        if sentences.is_empty() {
            return Err("nothing to narrate".into());
        }

        let gap = vec![0.0f32; (SENTENCE_GAP_S * SAMPLE_RATE as f32) as usize];
        let mut samples: Vec<f32> = Vec::new();

        for (i, sentence) in sentences.iter().enumerate() {
            let rendered = self.render_sentence(sentence)?;
            if rendered.is_empty() {
                continue;
            }
            if !samples.is_empty() {
                samples.extend_from_slice(&gap);
            }
            debug!(
                "Sentence {}/{}: {} samples ({:.1}s)",
                i + 1,
                sentences.len(),
                rendered.len(),
                rendered.len() as f32 / SAMPLE_RATE as f32
            );
            samples.extend(rendered);
        }

        if samples.is_empty() {
            return Err("synthesis produced no audio".into());
        }
        Ok(samples)
    }

    /// Synthesize and write a mono 16-bit WAV.
    pub fn export_wav(&self, text: &str, path: &Path) -> Result<WavExport, String> {
        let t0 = Instant::now();
        let samples = self.synthesize(text)?;
        let synth_ms = t0.elapsed().as_secs_f64() * 1000.0;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
            }
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(path, spec)
            .map_err(|e| format!("Failed to create {}: {e}", path.display()))?;
        for s in pcm_i16(&samples) {
            writer
                .write_sample(s)
                .map_err(|e| format!("Failed to write sample: {e}"))?;
        }
        writer
            .finalize()
            .map_err(|e| format!("Failed to finalize WAV: {e}"))?;

        let duration_s = samples.len() as f64 / f64::from(SAMPLE_RATE);
        info!(
            "Exported {:.1}s of narration to {} (synth {synth_ms:.0}ms)",
            duration_s,
            path.display()
        );

        Ok(WavExport {
            duration_s,
            synth_ms,
            sample_count: samples.len(),
        })
    }

    /// Generate audio samples for a single sentence.
    fn render_sentence(&self, text: &str) -> Result<Vec<f32>, String> {
        // 1. Text → phonemes via misaki-rs G2P
        let (phonemes, _tokens) = self
            .phonemizer
            .g2p(text)
            .map_err(|e| format!("Phonemization failed: {e}"))?;

        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        // 2. Phonemes → token IDs, padded and capped at the style table size
        let mut token_ids: Vec<i64> = Vec::with_capacity(phonemes.len() + 2);
        token_ids.push(0);
        for ch in phonemes.chars() {
            if let Some(&id) = self.vocab.get(&ch) {
                token_ids.push(id);
            }
            // Skip unknown characters silently
        }
        token_ids.push(0);

        let n_tokens = token_ids.len().min(MAX_TOKENS);
        token_ids.truncate(n_tokens);

        // 3. Voice style vector indexed by token count
        let voice_data = self
            .voices
            .get(&self.voice)
            .ok_or_else(|| format!("Voice not found: {}", self.voice))?;
        let style_idx = (n_tokens.saturating_sub(2)).min(voice_data.styles.nrows() - 1);
        let style_vec: Vec<f32> = voice_data.styles.row(style_idx).to_vec();

        // 4. Build ONNX input tensors
        let tokens_array = ndarray::Array2::from_shape_vec((1, n_tokens), token_ids)
            .map_err(|e| format!("Failed to create tokens tensor: {e}"))?;
        let tokens_tensor = Tensor::from_array(tokens_array)
            .map_err(|e| format!("Failed to create tokens ort tensor: {e}"))?;

        let style_array = ndarray::Array2::from_shape_vec((1, 256), style_vec)
            .map_err(|e| format!("Failed to create style tensor: {e}"))?;
        let style_tensor = Tensor::from_array(style_array)
            .map_err(|e| format!("Failed to create style ort tensor: {e}"))?;

        let speed_array = ndarray::Array1::from_vec(vec![self.speed]);
        let speed_tensor = Tensor::from_array(speed_array)
            .map_err(|e| format!("Failed to create speed ort tensor: {e}"))?;

        // 5. Run inference
        let mut session = self
            .session
            .lock()
            .map_err(|_| "ONNX session lock poisoned".to_string())?;
        let outputs = session
            .run(ort::inputs![
                "tokens" => tokens_tensor,
                "style" => style_tensor,
                "speed" => speed_tensor
            ])
            .map_err(|e| format!("ONNX inference failed: {e}"))?;

        // 6. Extract audio samples from the first output
        let first_output = outputs
            .iter()
            .next()
            .ok_or("No output tensor from model")?;
        let (_shape, audio_slice) = first_output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("Failed to extract audio tensor: {e}"))?;

        Ok(audio_slice.to_vec())
    }
}

// --- Helper functions ---

/// f32 [-1, 1] → i16 PCM.
fn pcm_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// Load tokenizer vocabulary from tokenizer.json.
fn load_tokenizer(path: &Path) -> Result<HashMap<char, i64>, String> {
    let contents =
        fs::read_to_string(path).map_err(|e| format!("Failed to read tokenizer: {e}"))?;

    let data: serde_json::Value =
        serde_json::from_str(&contents).map_err(|e| format!("Failed to parse tokenizer JSON: {e}"))?;

    let vocab = data["model"]["vocab"]
        .as_object()
        .ok_or("Missing model.vocab in tokenizer.json")?;

    let mut map = HashMap::new();
    for (token, id) in vocab {
        let id = id.as_i64().ok_or("Token ID is not an integer")?;
        // Each token should be a single character
        if let Some(ch) = token.chars().next() {
            map.insert(ch, id);
        }
    }

    Ok(map)
}

/// Load all voice styles from an NPZ file.
fn load_voices(path: &Path) -> Result<HashMap<String, VoiceData>, String> {
    let file = fs::File::open(path).map_err(|e| format!("Failed to open voices file: {e}"))?;

    let mut npz =
        NpzReader::new(file).map_err(|e| format!("Failed to read NPZ voices file: {e}"))?;

    let names: Vec<String> = npz
        .names()
        .map_err(|e| format!("Failed to list NPZ entries: {e}"))?
        .into_iter()
        .map(|n| n.trim_end_matches(".npy").to_string())
        .collect();

    let mut voices = HashMap::new();
    for name in &names {
        let npy_name = format!("{name}.npy");
        let arr: Array3<f32> = npz
            .by_name(&npy_name)
            .map_err(|e| format!("Failed to read voice '{name}': {e}"))?;

        // Shape is (510, 1, 256). Squeeze the middle dimension to (510, 256).
        let dim0 = arr.shape()[0];
        let dim2 = arr.shape()[2];
        let styles = arr
            .into_shape_with_order((dim0, dim2))
            .map_err(|e| format!("Failed to reshape voice '{name}': {e}"))?;

        voices.insert(name.clone(), VoiceData { styles });
    }

    Ok(voices)
}

/// Split text into sentences at .!? boundaries followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_break = match chars.peek() {
                Some(&(_, next)) => next.is_whitespace(),
                None => false,
            };
            if at_break {
                let s = text[start..=i].trim();
                if !s.is_empty() {
                    sentences.push(s);
                }
                start = i + 1;
            }
        }
    }

    let s = text[start..].trim();
    if !s.is_empty() {
        sentences.push(s);
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentences_split_at_terminal_punctuation() {
        let story = "Maya sailed away. The wind sang! Was she scared? Never.";
        assert_eq!(
            split_sentences(story),
            vec!["Maya sailed away.", "The wind sang!", "Was she scared?", "Never."]
        );
    }

    #[test]
    fn abbreviation_mid_word_does_not_split() {
        // No whitespace after the dot, so no boundary
        assert_eq!(split_sentences("v1.0 rocks"), vec!["v1.0 rocks"]);
    }

    #[test]
    fn trailing_fragment_is_kept() {
        assert_eq!(
            split_sentences("The end. almost"),
            vec!["The end.", "almost"]
        );
    }

    #[test]
    fn pcm_conversion_clamps() {
        let pcm = pcm_i16(&[0.0, 1.0, -1.0, 2.0, -2.0]);
        assert_eq!(pcm[0], 0);
        assert_eq!(pcm[1], 32767);
        assert_eq!(pcm[3], 32767);
        assert_eq!(pcm[4], -32768);
    }
}
