//! Keyword matching shared by the lead trigger and reply policies.

use regex::Regex;
use tracing::warn;

/// Lowercases and strips Spanish diacritics so `Teléfono` matches `telefono`.
pub fn fold(input: &str) -> String {
    input
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            other => other,
        })
        .collect()
}

/// A compiled set of whole-word keywords.
///
/// Keywords and text are both folded, and a keyword only matches on word
/// boundaries: `precio` matches "¿qué precio tiene?" but not "te aprecio".
#[derive(Debug, Clone)]
pub struct KeywordSet {
    pattern: Option<Regex>,
}

impl KeywordSet {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = keywords
            .into_iter()
            .map(|k| fold(k.as_ref().trim()))
            .filter(|k| !k.is_empty())
            .map(|k| regex::escape(&k))
            .collect();
        if alternatives.is_empty() {
            return Self { pattern: None };
        }

        let source = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
        let pattern = match Regex::new(&source) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!(error = %e, "Keyword pattern rejected, matching disabled");
                None
            }
        };
        Self { pattern }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern
            .as_ref()
            .is_some_and(|p| p.is_match(&fold(text)))
    }
}
