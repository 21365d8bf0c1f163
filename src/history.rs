//! Story history and reporting.
//!
//! Stores generated stories as daily JSONL files in ~/.story-weaver-history/
//! and renders a Markdown report per day.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, error};

/// Directory for history JSONL files.
fn history_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".story-weaver-history")
}

/// Get the history file path for a given date.
fn history_file(date: &str) -> PathBuf {
    let date_str = if date == "today" {
        Local::now().format("%Y-%m-%d").to_string()
    } else {
        date.to_string()
    };
    history_dir().join(format!("{date_str}.jsonl"))
}

/// Record of a single generated story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryRecord {
    pub timestamp: String,
    pub character: String,
    pub setting: String,
    pub mood: String,
    pub theme: String,
    pub model: String,
    pub seed: u32,
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub max_tokens: u32,
    pub story_chars: usize,
    pub story_words: usize,
    pub generate_latency_ms: i64,
    pub narrated: bool,
    pub audio_file: Option<String>,
}

/// Append a story record to the daily history file.
pub fn save_record(record: &StoryRecord) {
    let dir = history_dir();
    if let Err(e) = fs::create_dir_all(&dir) {
        error!("Failed to create history dir: {e}");
        return;
    }

    let path = history_file("today");
    match fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(mut file) => match serde_json::to_string(record) {
            Ok(json) => {
                if let Err(e) = writeln!(file, "{json}") {
                    error!("Failed to write history record: {e}");
                } else {
                    debug!("Saved story record to {}", path.display());
                }
            }
            Err(e) => error!("Failed to serialize record: {e}"),
        },
        Err(e) => error!("Failed to open history file: {e}"),
    }
}

/// Load all story records for a given date.
pub fn load_records(date: &str) -> Vec<StoryRecord> {
    let path = history_file(date);
    if !path.exists() {
        return Vec::new();
    }

    let mut records = Vec::new();
    match fs::File::open(&path) {
        Ok(file) => {
            for line in std::io::BufReader::new(file).lines().map_while(Result::ok) {
                let line = line.trim();
                if !line.is_empty() {
                    match serde_json::from_str::<StoryRecord>(line) {
                        Ok(record) => records.push(record),
                        Err(e) => debug!("Skipping malformed history line: {e}"),
                    }
                }
            }
        }
        Err(e) => error!("Failed to load history records: {e}"),
    }

    records
}

/// List all dates with history records (newest first).
pub fn list_available_dates() -> Vec<String> {
    let dir = history_dir();
    if !dir.exists() {
        return Vec::new();
    }

    let mut dates: Vec<String> = fs::read_dir(&dir)
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".jsonl") {
                Some(name.trim_end_matches(".jsonl").to_string())
            } else {
                None
            }
        })
        .collect();

    dates.sort_by(|a, b| b.cmp(a)); // newest first
    dates
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

/// Generate a Markdown report for a given date.
pub fn generate_report(date: &str) -> String {
    let display_date = if date == "today" {
        Local::now().format("%Y-%m-%d").to_string()
    } else {
        date.to_string()
    };
    render_report(&load_records(date), &display_date)
}

fn render_report(records: &[StoryRecord], display_date: &str) -> String {
    if records.is_empty() {
        return format!("# StoryWeaver Report - {display_date}\n\nNo stories generated.");
    }

    let total_chars: usize = records.iter().map(|r| r.story_chars).sum();
    let total_words: usize = records.iter().map(|r| r.story_words).sum();
    let narrated = records.iter().filter(|r| r.narrated).count();

    let avg_latency = records
        .iter()
        .map(|r| r.generate_latency_ms as f64)
        .sum::<f64>()
        / records.len() as f64;

    let mut lines = vec![
        format!("# StoryWeaver Report - {display_date}"),
        String::new(),
        "## Summary".to_string(),
        format!("- **Stories**: {}", records.len()),
        format!("- **Total characters**: {total_chars}"),
        format!("- **Total words**: {total_words}"),
        format!("- **Narrated**: {narrated}"),
        format!("- **Average generation latency**: {avg_latency:.0}ms"),
        String::new(),
        "## Story Log".to_string(),
        String::new(),
        "| Time | Character | Setting | Mood | Seed | Words | Audio |".to_string(),
        "|------|-----------|---------|------|------|-------|-------|".to_string(),
    ];

    for r in records {
        let time_str = if r.timestamp.len() >= 19 {
            // Extract HH:MM:SS from ISO 8601 timestamp
            &r.timestamp[11..19]
        } else {
            &r.timestamp[..8.min(r.timestamp.len())]
        };

        lines.push(format!(
            "| {time_str} | {} | {} | {} | {} | {} | {} |",
            truncate(&r.character, 20),
            truncate(&r.setting, 25),
            r.mood,
            r.seed,
            r.story_words,
            if r.narrated { "yes" } else { "-" },
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seed: u32, words: usize, narrated: bool) -> StoryRecord {
        StoryRecord {
            timestamp: "2025-06-01T09:30:15.123456".into(),
            character: "Maya the Cat".into(),
            setting: "a floating island in the clouds".into(),
            mood: "adventurous".into(),
            theme: "friendship and courage".into(),
            model: "llama3.2:3b".into(),
            seed,
            temperature: 0.9,
            top_k: 50,
            top_p: 0.95,
            max_tokens: 200,
            story_chars: words * 5,
            story_words: words,
            generate_latency_ms: 1800,
            narrated,
            audio_file: narrated.then(|| format!("story_{seed}.wav")),
        }
    }

    #[test]
    fn record_round_trips_through_jsonl() {
        let json = serde_json::to_string(&record(42, 120, true)).unwrap();
        let parsed: StoryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.seed, 42);
        assert_eq!(parsed.audio_file.as_deref(), Some("story_42.wav"));
    }

    #[test]
    fn empty_report_says_so() {
        let report = render_report(&[], "2025-06-01");
        assert!(report.contains("No stories generated."));
    }

    #[test]
    fn report_summarizes_and_tabulates() {
        let records = vec![record(42, 100, true), record(7, 140, false)];
        let report = render_report(&records, "2025-06-01");
        assert!(report.contains("- **Stories**: 2"));
        assert!(report.contains("- **Total words**: 240"));
        assert!(report.contains("- **Narrated**: 1"));
        assert!(report.contains("| 09:30:15 |"));
        assert!(report.contains("| Maya the Cat |"));
    }

    #[test]
    fn long_settings_are_truncated_in_table() {
        let report = render_report(&[record(1, 50, false)], "2025-06-01");
        assert!(report.contains("a floating island in t..."));
    }
}
