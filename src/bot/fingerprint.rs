// src/bot/fingerprint.rs - Order-independent token hash sets for near-duplicate detection

use ahash::AHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use unicode_normalization::UnicodeNormalization;

/// Characters dropped outright before tokenizing. Chat clients append the
/// invisible tag character U+E0000 to bypass duplicate-message checks.
const STRIPPED_CHARS: &[char] = &[
    '\u{200B}', // zero width space
    '\u{200C}', // zero width non-joiner
    '\u{200D}', // zero width joiner
    '\u{2060}', // word joiner
    '\u{FEFF}', // byte order mark
    '\u{E0000}',
    '\u{034F}', // combining grapheme joiner
    '\'',
    '\u{2019}',
];

/// Case-fold, apply compatibility decomposition, drop invisible characters and
/// collapse every run of punctuation or whitespace into a single space.
pub fn normalize(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.nfkc().flat_map(char::to_lowercase) {
        if STRIPPED_CHARS.contains(&c) {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_space && !normalized.is_empty() {
                normalized.push(' ');
            }
            pending_space = false;
            normalized.push(c);
        } else {
            pending_space = true;
        }
    }

    normalized
}

/// Split already-normalized text into tokens
pub fn tokenize(normalized: &str) -> Vec<String> {
    normalized.split_whitespace().map(String::from).collect()
}

/// Stable 64-bit hash of one token
pub fn hash_token(token: &str) -> u64 {
    let mut hasher = AHasher::default();
    token.hash(&mut hasher);
    hasher.finish()
}

/// Set of token hashes for one message, duplicates collapsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint {
    hashes: HashSet<u64>,
}

impl Fingerprint {
    /// Fingerprint raw message text
    pub fn from_text(text: &str) -> Self {
        Self::from_tokens(normalize(text).split_whitespace())
    }

    /// Fingerprint tokens that are already normalized
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hashes: tokens.into_iter().map(|t| hash_token(t.as_ref())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Jaccard index `|A ∩ B| / |A ∪ B|`; zero when both sets are empty.
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        let (small, large) = if self.hashes.len() <= other.hashes.len() {
            (&self.hashes, &other.hashes)
        } else {
            (&other.hashes, &self.hashes)
        };

        let intersection = small.iter().filter(|h| large.contains(h)).count();
        let union = self.hashes.len() + other.hashes.len() - intersection;
        if union == 0 {
            return 0.0;
        }
        intersection as f64 / union as f64
    }
}
