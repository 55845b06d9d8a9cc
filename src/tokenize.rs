// src/tokenize.rs
//! Japanese tokenization behind a stable trait.
//!
//! Two backends: a morphological analyzer (lindera + embedded IPADIC, behind
//! the `lindera` feature) that yields part-of-speech tags and dictionary
//! lemmas, and a Unicode word-boundary fallback that keeps the word-cloud
//! path working without the dictionary build.
//!
//! Tokenizer construction is expensive, so instances are cached per split
//! mode in a caller-owned [`TokenizerRegistry`] — no hidden globals.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::TokenizeError;

/// Split granularity, mirroring Sudachi's A/B/C convention: A is the finest
/// segmentation, C the coarsest. Purely a tuning knob; no mode is "correct".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SplitMode {
    A,
    B,
    C,
}

impl Default for SplitMode {
    fn default() -> Self {
        SplitMode::B
    }
}

impl SplitMode {
    pub fn parse(s: &str) -> Option<SplitMode> {
        match s.trim() {
            "A" | "a" => Some(SplitMode::A),
            "B" | "b" => Some(SplitMode::B),
            "C" | "c" => Some(SplitMode::C),
            _ => None,
        }
    }
}

impl fmt::Display for SplitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitMode::A => write!(f, "A"),
            SplitMode::B => write!(f, "B"),
            SplitMode::C => write!(f, "C"),
        }
    }
}

/// Coarse part-of-speech group of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PosGroup {
    Noun,
    Verb,
    Adjective,
    Other,
    /// Backend could not tag the token (Unicode fallback, unknown words).
    Untagged,
}

impl PosGroup {
    /// Whether the token should feed the word clouds: only nouns, verbs and
    /// adjectives qualify. Untagged tokens do not — backends without POS
    /// information report `tags_pos() == false` and skip this gate entirely.
    pub fn is_content_word(&self) -> bool {
        matches!(self, PosGroup::Noun | PosGroup::Verb | PosGroup::Adjective)
    }
}

/// One token: surface form, coarse POS group, and dictionary base form
/// (falls back to the surface form when the backend has no lemma).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub surface: String,
    pub pos: PosGroup,
    pub lemma: String,
}

/// Trait for tokenizers that convert text into tokens. Implementations must
/// be safe to call concurrently; they are shared across analysis tasks.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Result<Vec<Token>, TokenizeError>;

    /// Whether this backend emits real part-of-speech tags. When false the
    /// word-cloud path skips the POS gate instead of filtering on `Untagged`.
    fn tags_pos(&self) -> bool;

    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Bundled Japanese stopword list, applied only in the word-cloud path.
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    include_str!("../stopwords_ja.txt")
        .lines()
        .map(str::trim)
        .filter(|w| !w.is_empty() && !w.starts_with('#'))
        .collect()
});

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(word)
}

// ------------------------------------------------------------
// Unicode word-boundary fallback
// ------------------------------------------------------------

/// Segments on Unicode word boundaries (UAX #29). No POS tags or lemmas;
/// every token comes back `Untagged` with its surface as the lemma.
#[derive(Debug, Clone, Default)]
pub struct UnicodeWordTokenizer;

impl UnicodeWordTokenizer {
    pub fn new() -> Self {
        UnicodeWordTokenizer
    }
}

impl Tokenizer for UnicodeWordTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<Token>, TokenizeError> {
        Ok(text
            .unicode_words()
            .map(|w| Token {
                surface: w.to_string(),
                pos: PosGroup::Untagged,
                lemma: w.to_string(),
            })
            .collect())
    }

    fn tags_pos(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "unicode_word"
    }
}

// ------------------------------------------------------------
// Lindera morphological backend (feature `lindera`)
// ------------------------------------------------------------

#[cfg(feature = "lindera")]
mod morphological {
    use super::*;
    use lindera::dictionary::{load_dictionary_from_kind, DictionaryKind};
    use lindera::mode::{Mode, Penalty};
    use lindera::segmenter::Segmenter;
    use lindera::tokenizer::Tokenizer as LinderaInner;

    /// Morphological tokenizer over the embedded IPADIC dictionary.
    ///
    /// The three split modes map onto lindera's compound handling: A uses an
    /// aggressive decompose penalty (shortest units), B the default penalty,
    /// C dictionary units unchanged.
    pub struct LinderaTokenizer {
        inner: LinderaInner,
    }

    impl LinderaTokenizer {
        pub fn new(mode: SplitMode) -> Result<Self, TokenizeError> {
            let dictionary = load_dictionary_from_kind(DictionaryKind::IPADIC)
                .map_err(|e| TokenizeError::Backend(e.to_string()))?;
            let lindera_mode = match mode {
                SplitMode::A => Mode::Decompose(Penalty {
                    kanji_penalty_length_threshold: 1,
                    kanji_penalty_length_penalty: 6000,
                    other_penalty_length_threshold: 4,
                    other_penalty_length_penalty: 3400,
                }),
                SplitMode::B => Mode::Decompose(Penalty::default()),
                SplitMode::C => Mode::Normal,
            };
            let segmenter = Segmenter::new(lindera_mode, dictionary, None);
            Ok(Self {
                inner: LinderaInner::new(segmenter),
            })
        }
    }

    fn pos_group(tag: &str) -> PosGroup {
        match tag {
            "名詞" => PosGroup::Noun,
            "動詞" => PosGroup::Verb,
            "形容詞" => PosGroup::Adjective,
            "UNK" => PosGroup::Untagged,
            _ => PosGroup::Other,
        }
    }

    impl super::Tokenizer for LinderaTokenizer {
        fn tokenize(&self, text: &str) -> Result<Vec<Token>, TokenizeError> {
            let mut tokens = self
                .inner
                .tokenize(text)
                .map_err(|e| TokenizeError::Backend(e.to_string()))?;
            Ok(tokens
                .iter_mut()
                .map(|t| {
                    let surface = t.text.to_string();
                    let details = t.details();
                    let pos = details.first().map(|d| pos_group(d)).unwrap_or(PosGroup::Untagged);
                    // IPADIC detail slot 6 is the dictionary base form; "*"
                    // means none recorded.
                    let lemma = match details.get(6) {
                        Some(base) if *base != "*" => base.to_string(),
                        _ => surface.clone(),
                    };
                    Token {
                        surface,
                        pos,
                        lemma,
                    }
                })
                .collect())
        }

        fn tags_pos(&self) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "lindera_ipadic"
        }
    }
}

#[cfg(feature = "lindera")]
pub use morphological::LinderaTokenizer;

// ------------------------------------------------------------
// Registry
// ------------------------------------------------------------

/// Construct-once-per-mode cache of tokenizer instances. There are only
/// three valid modes, so the map never grows past three entries. Owned by
/// the caller and passed by reference into the scheduler and aggregator.
pub struct TokenizerRegistry {
    cache: Mutex<HashMap<SplitMode, Arc<dyn Tokenizer>>>,
}

impl TokenizerRegistry {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch (building on first use) the tokenizer for `mode`.
    pub fn get(&self, mode: SplitMode) -> Result<Arc<dyn Tokenizer>, TokenizeError> {
        let mut cache = self.cache.lock().expect("poisoned tokenizer cache");
        if let Some(tok) = cache.get(&mode) {
            return Ok(Arc::clone(tok));
        }
        let built = build_backend(mode)?;
        cache.insert(mode, Arc::clone(&built));
        Ok(built)
    }
}

impl Default for TokenizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "lindera")]
fn build_backend(mode: SplitMode) -> Result<Arc<dyn Tokenizer>, TokenizeError> {
    Ok(Arc::new(LinderaTokenizer::new(mode)?))
}

#[cfg(not(feature = "lindera"))]
fn build_backend(_mode: SplitMode) -> Result<Arc<dyn Tokenizer>, TokenizeError> {
    Ok(Arc::new(UnicodeWordTokenizer::new()))
}

/// Space-joined surface forms, the shape the classification prompt receives.
pub fn join_surfaces(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| t.surface.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
