//! Reference similarity scoring with a per-run memo cache.

use std::collections::HashMap;

/// Cell contents that mean "no value" once trimmed and lower-cased.
pub const NULL_MARKERS: &[&str] = &["nan", "none", "null", "n/a", "nat", "<na>"];

/// Cached entries are dropped wholesale past this size.
const MAX_CACHE_ENTRIES: usize = 500_000;

/// Trim + lower-case. `None` for empty strings and null markers.
pub fn normalize(s: &str) -> Option<String> {
    let norm = s.trim().to_lowercase();
    if norm.is_empty() || NULL_MARKERS.contains(&norm.as_str()) {
        None
    } else {
        Some(norm)
    }
}

/// Indel similarity ratio on characters: `200 * LCS / (len_a + len_b)`, rounded.
pub fn ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100;
    }
    let lcs = lcs_len(&a, &b);
    ((200 * lcs + total / 2) / total) as u8
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    // Iterate over the longer string, keep rows the size of the shorter one.
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut prev = vec![0usize; short.len() + 1];
    let mut curr = vec![0usize; short.len() + 1];
    for &lc in long {
        for (j, &sc) in short.iter().enumerate() {
            curr[j + 1] = if lc == sc {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[short.len()]
}

/// String-similarity scorer owned by a single run.
#[derive(Debug, Default)]
pub struct FuzzyScorer {
    cache: HashMap<(String, String), u8>,
    hits: u64,
    misses: u64,
}

impl FuzzyScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Similarity of two raw references, 0..=100. Symmetric.
    pub fn score(&mut self, a: &str, b: &str) -> u8 {
        match (normalize(a), normalize(b)) {
            (Some(a), Some(b)) => self.score_normalized(&a, &b),
            _ => 0,
        }
    }

    /// Like [`score`](Self::score) for inputs already passed through [`normalize`].
    pub(crate) fn score_normalized(&mut self, a: &str, b: &str) -> u8 {
        if a == b {
            return 100;
        }
        let key = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        if let Some(&cached) = self.cache.get(&key) {
            self.hits += 1;
            return cached;
        }
        self.misses += 1;
        let score = ratio(&key.0, &key.1);
        if self.cache.len() >= MAX_CACHE_ENTRIES {
            log::debug!("fuzzy cache reached {MAX_CACHE_ENTRIES} entries, clearing");
            self.cache.clear();
        }
        self.cache.insert(key, score);
        score
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop cached scores. Counters are kept for reporting.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.cache.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_after_normalization_is_100() {
        let mut scorer = FuzzyScorer::new();
        assert_eq!(scorer.score("  INV100 ", "inv100"), 100);
        assert_eq!(scorer.misses(), 0);
    }

    #[test]
    fn empty_and_null_markers_score_zero() {
        let mut scorer = FuzzyScorer::new();
        assert_eq!(scorer.score("", "abc"), 0);
        assert_eq!(scorer.score("abc", "   "), 0);
        assert_eq!(scorer.score("NaN", "nan"), 0);
        assert_eq!(scorer.score("None", "abc"), 0);
    }

    #[test]
    fn typo_scores_high() {
        let mut scorer = FuzzyScorer::new();
        // LCS("payment abc", "paymnt abc") = 10, lengths 11 + 10.
        assert_eq!(scorer.score("Payment ABC", "Paymnt ABC"), 95);
    }

    #[test]
    fn unrelated_scores_low() {
        let mut scorer = FuzzyScorer::new();
        assert!(scorer.score("garbage", "unrelated") < 50);
        assert_eq!(scorer.score("abc", "xyz"), 0);
    }

    #[test]
    fn cache_is_keyed_by_unordered_pair() {
        let mut scorer = FuzzyScorer::new();
        let ab = scorer.score("alpha", "alpine");
        let ba = scorer.score("alpine", "alpha");
        assert_eq!(ab, ba);
        assert_eq!(scorer.misses(), 1);
        assert_eq!(scorer.hits(), 1);
        assert_eq!(scorer.cache_len(), 1);

        scorer.clear();
        assert_eq!(scorer.cache_len(), 0);
        assert_eq!(scorer.hits(), 1);
    }

    #[test]
    fn ratio_handles_unicode() {
        assert_eq!(ratio("café", "cafe"), 75);
        assert_eq!(ratio("", ""), 100);
    }
}
