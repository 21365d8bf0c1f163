//! Story post-processing.
//!
//! Small models echo the prompt and run out of tokens mid-sentence, so the
//! raw completion gets three passes: strip the echoed prompt, cut at the
//! last sentence end, wrap to a readable column width.

/// Apply all three passes in order.
pub fn tidy_story(raw: &str, prompt: &str, width: usize) -> String {
    let story = strip_prompt_echo(raw, prompt);
    let story = trim_to_sentence_end(story);
    wrap_text(story, width)
}

/// Drop the prompt prefix if the model echoed it back.
pub fn strip_prompt_echo<'a>(raw: &'a str, prompt: &str) -> &'a str {
    match raw.strip_prefix(prompt) {
        Some(rest) => rest.trim(),
        None => raw.trim(),
    }
}

/// Cut at the last sentence-ending punctuation (. ! ?) so the story never
/// stops mid-sentence. Text with no sentence end is kept whole.
pub fn trim_to_sentence_end(text: &str) -> &str {
    match text.rfind(['.', '!', '?']) {
        Some(idx) => text[..=idx].trim_end(),
        None => text.trim_end(),
    }
}

/// Greedy word-wrap to `width` characters per line. Whitespace runs
/// (including newlines in the raw completion) collapse to single spaces;
/// a word longer than the width stands on its own line.
pub fn wrap_text(text: &str, width: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();
    let mut line_chars = 0usize;

    for word in text.split_whitespace() {
        let word_chars = word.chars().count();
        if line_chars > 0 && line_chars + 1 + word_chars > width {
            lines.push(std::mem::take(&mut line));
            line_chars = 0;
        }
        if line_chars > 0 {
            line.push(' ');
            line_chars += 1;
        }
        line.push_str(word);
        line_chars += word_chars;
    }

    if !line.is_empty() {
        lines.push(line);
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoed_prompt_is_stripped() {
        let prompt = "Write a story.\n\nStory:\n";
        let raw = "Write a story.\n\nStory:\nOnce there was a fox.";
        assert_eq!(strip_prompt_echo(raw, prompt), "Once there was a fox.");
    }

    #[test]
    fn non_echoed_output_is_only_trimmed() {
        assert_eq!(strip_prompt_echo("  A tale.  ", "Story:\n"), "A tale.");
    }

    #[test]
    fn dangling_clause_is_dropped() {
        let text = "The owl flew home. It was late and the moon";
        assert_eq!(trim_to_sentence_end(text), "The owl flew home.");
    }

    #[test]
    fn exclamation_and_question_marks_end_sentences() {
        assert_eq!(
            trim_to_sentence_end("They cheered! And then the"),
            "They cheered!"
        );
        assert_eq!(trim_to_sentence_end("Who was there? Nobody knew wh"), "Who was there?");
    }

    #[test]
    fn text_without_sentence_end_is_kept() {
        assert_eq!(trim_to_sentence_end("a fragment with no ending "), "a fragment with no ending");
    }

    #[test]
    fn wrap_respects_width() {
        let wrapped = wrap_text("one two three four five six seven", 10);
        for line in wrapped.lines() {
            assert!(line.chars().count() <= 10, "line too long: {line:?}");
        }
        assert_eq!(wrapped.split_whitespace().count(), 7);
    }

    #[test]
    fn wrap_collapses_newlines() {
        let wrapped = wrap_text("a story\nsplit over\n\nlines", 90);
        assert_eq!(wrapped, "a story split over lines");
    }

    #[test]
    fn oversized_word_stands_alone() {
        let wrapped = wrap_text("hi Honorificabilitudinitatibus ok", 10);
        assert_eq!(wrapped.lines().count(), 3);
    }

    #[test]
    fn multibyte_text_wraps_without_panic() {
        let wrapped = wrap_text("ein Märchen über Mut und Freundschaft für Kinder", 12);
        assert!(wrapped.lines().all(|l| l.chars().count() <= 12));
    }

    #[test]
    fn tidy_runs_all_passes() {
        let prompt = "Prompt:\nStory:\n";
        let raw = "Prompt:\nStory:\nMaya found a key. She opened the";
        assert_eq!(tidy_story(raw, prompt, 90), "Maya found a key.");
    }
}
