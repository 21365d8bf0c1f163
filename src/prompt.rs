//! Prompt construction for story generation.
//!
//! Interpolates the four story fields into a fixed instruction block.
//! The model sees exactly this layout, so field cleaning happens here.

use serde::Deserialize;

const PROMPT_TEMPLATE: &str = r#"Write a short, imaginative story for kids.
Character: {character}
Setting: {setting}
Mood: {mood}
Theme: {theme}

Story:
"#;

/// The four free-text inputs that shape a story.
#[derive(Debug, Clone, Deserialize)]
pub struct StoryFields {
    pub character: String,
    pub setting: String,
    pub mood: String,
    pub theme: String,
}

impl StoryFields {
    /// Normalize each field: trim ends, collapse whitespace runs (including
    /// newlines) to single spaces. Fields are single-line by construction.
    pub fn cleaned(&self) -> Self {
        Self {
            character: clean_field(&self.character),
            setting: clean_field(&self.setting),
            mood: clean_field(&self.mood),
            theme: clean_field(&self.theme),
        }
    }
}

fn clean_field(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the generation prompt from cleaned story fields.
pub fn build_prompt(fields: &StoryFields) -> String {
    let fields = fields.cleaned();
    PROMPT_TEMPLATE
        .replace("{character}", &fields.character)
        .replace("{setting}", &fields.setting)
        .replace("{mood}", &fields.mood)
        .replace("{theme}", &fields.theme)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> StoryFields {
        StoryFields {
            character: "Maya the Cat".into(),
            setting: "a floating island in the clouds".into(),
            mood: "adventurous".into(),
            theme: "friendship and courage".into(),
        }
    }

    #[test]
    fn prompt_has_expected_layout() {
        let prompt = build_prompt(&fields());
        assert!(prompt.starts_with("Write a short, imaginative story for kids.\n"));
        assert!(prompt.contains("Character: Maya the Cat\n"));
        assert!(prompt.contains("Setting: a floating island in the clouds\n"));
        assert!(prompt.contains("Mood: adventurous\n"));
        assert!(prompt.contains("Theme: friendship and courage\n"));
        assert!(prompt.ends_with("Story:\n"));
    }

    #[test]
    fn fields_are_collapsed_to_single_lines() {
        let messy = StoryFields {
            character: "  Maya\nthe   Cat  ".into(),
            setting: "a\tcave".into(),
            mood: "calm".into(),
            theme: String::new(),
        };
        let prompt = build_prompt(&messy);
        assert!(prompt.contains("Character: Maya the Cat\n"));
        assert!(prompt.contains("Setting: a cave\n"));
        // Empty theme still produces a well-formed line
        assert!(prompt.contains("Theme: \n"));
    }

    #[test]
    fn cleaning_handles_non_ascii() {
        let f = StoryFields {
            character: "  Müller  the  Brave ".into(),
            setting: "ein Schloss".into(),
            mood: "happy".into(),
            theme: "Mut".into(),
        };
        assert_eq!(f.cleaned().character, "Müller the Brave");
    }
}
