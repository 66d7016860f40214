//! Keyword safety filter for user input and model replies

use regex::{Regex, RegexBuilder};

use crate::{Error, Result};

/// Case-insensitive whole-word blocklist
#[derive(Debug, Clone)]
pub struct SafetyFilter {
    pattern: Option<Regex>,
}

impl SafetyFilter {
    /// Build a filter from blocked words; blank entries are ignored
    ///
    /// # Errors
    ///
    /// Returns error if the combined pattern cannot be compiled
    pub fn new<I, S>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_string())
            .filter(|w| !w.is_empty())
            .map(|w| regex::escape(&w))
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = RegexBuilder::new(&format!(r"\b(?:{})\b", alternatives.join("|")))
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Config(format!("invalid blocked word list: {e}")))?;

        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// First blocked word found in `text`
    #[must_use]
    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.pattern
            .as_ref()
            .and_then(|p| p.find(text))
            .map(|m| m.as_str())
    }

    /// Whether `text` contains a blocked word
    #[must_use]
    pub fn is_blocked(&self, text: &str) -> bool {
        self.find(text).is_some()
    }
}

/// Line spoken in place of blocked content
#[must_use]
pub fn refusal(language: &str) -> &'static str {
    match language {
        "de" => "Darüber möchte ich lieber nicht sprechen. Lass uns über etwas anderes reden!",
        _ => "I'd rather not talk about that. Let's talk about something else!",
    }
}
