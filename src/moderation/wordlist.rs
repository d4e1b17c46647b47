//! Local bad-words filter
//!
//! Runs before the remote classifier and stands in for it when no token is
//! configured or the remote call fails.

use regex::Regex;

const DEFAULT_WORDS: &[&str] = &[
    "asshole",
    "bastard",
    "bitch",
    "bullshit",
    "cunt",
    "dickhead",
    "fuck",
    "fucker",
    "fucking",
    "motherfucker",
    "shit",
    "slut",
    "whore",
];

/// Whole-word, case-insensitive matcher
#[derive(Debug, Clone)]
pub struct WordList {
    pattern: Option<Regex>,
}

impl WordList {
    pub fn new<I, S>(words: I) -> Self
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
            return Self { pattern: None };
        }

        let source = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
        match Regex::new(&source) {
            Ok(pattern) => Self {
                pattern: Some(pattern),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Invalid bad-words pattern, filter disabled");
                Self { pattern: None }
            }
        }
    }

    pub fn is_profane(&self, text: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(text))
    }
}

impl Default for WordList {
    fn default() -> Self {
        Self::new(DEFAULT_WORDS)
    }
}
