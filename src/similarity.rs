//! Operation-name similarity for skill matching (spec.md §4.7, §9 "any
//! metric satisfying symmetry, normalization, and the scenario thresholds
//! is acceptable"). Case-insensitive character-trigram Jaccard/Dice ratio,
//! symmetric and normalized to `[0, 1]`.

use std::collections::HashSet;

/// Trigrams of `text`, lowercased. Strings shorter than 3 characters yield
/// the whole (lowercased) string as a single "trigram" so short operation
/// names still compare sensibly instead of producing an empty set.
fn trigrams(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    let chars: Vec<char> = lower.chars().collect();
    if chars.len() < 3 {
        let mut set = HashSet::new();
        if !chars.is_empty() {
            set.insert(lower);
        }
        return set;
    }
    chars
        .windows(3)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

/// Symmetric similarity in `[0, 1]`: the Dice coefficient over each
/// string's trigram set. `1.0` for identical strings (modulo case),
/// `0.0` when the two share no trigrams.
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    (2 * shared) as f64 / (ta.len() + tb.len()) as f64
}
