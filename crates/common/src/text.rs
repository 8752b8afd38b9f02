//! Text folding shared by every place that compares user input with
//! configured keywords.

use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Fold case, strip diacritics and collapse whitespace.
///
/// Global command keywords, rule match alternatives and inbound text all go
/// through this function, both when stored and when looked up.
pub fn normalize_text(input: &str) -> String {
    let stripped: String = input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical form of a step name: trimmed and lowercased.
pub fn normalize_step(step: &str) -> String {
    step.trim().to_lowercase()
}

/// Split a comma separated list, normalizing each entry and dropping empties.
pub fn split_alternatives(spec: &str) -> Vec<String> {
    spec.split(',')
        .map(normalize_text)
        .filter(|s| !s.is_empty())
        .collect()
}
