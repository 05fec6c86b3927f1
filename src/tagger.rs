//! Sentence tagging capability.
//!
//! A [`TokenClassifier`] produces BIO-labelled token predictions; a
//! [`NerTagger`] merges those into one `class -> entity text` map per
//! sentence. [`TaggerManager`] owns the tagger and reinitializes it when a
//! request carries a different confidence threshold.

use std::{collections::HashMap, path::Path};

use tracing::{debug, info};

use crate::{
    document::Tags,
    error::{Error, Result},
};

pub const LEXICON_ENV_VAR: &str = "CHUNKSCOPE_LEXICON";
pub const DEFAULT_TAGGING_CONFIDENCE: f32 = 0.5;

/// Marker a tokenizer puts in front of a token that starts a new word.
const WORD_START: char = 'Ġ';

/// One token-level prediction from a classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPrediction {
    /// BIO label such as `B-ORG` or `I-ORG`.
    pub entity: String,
    pub word: String,
    pub score: f32,
}

impl TokenPrediction {
    pub fn new(entity: &str, word: &str, score: f32) -> Self {
        Self {
            entity: entity.to_string(),
            word: word.to_string(),
            score,
        }
    }
}

pub trait TokenClassifier: Send + Sync {
    fn classify(&self, sentence: &str) -> Result<Vec<TokenPrediction>>;
}

/// Turns one sentence into its tag map.
pub trait Tagger: Send + Sync {
    fn tag(&self, sentence: &str) -> Result<Tags>;
}

/// Builds a tagger for a given confidence threshold.
pub trait TaggerLoader: Send + Sync {
    fn load(&self, threshold: f32) -> Result<Box<dyn Tagger>>;
}

/// Named-entity tagger over a BIO token classifier.
pub struct NerTagger<C> {
    classifier: C,
    threshold: f32,
    entity_map: HashMap<String, String>,
}

impl<C: TokenClassifier> NerTagger<C> {
    pub fn new(classifier: C, threshold: f32) -> Self {
        Self {
            classifier,
            threshold,
            entity_map: HashMap::new(),
        }
    }

    /// Override the class name reported for a `B-*` label.
    pub fn with_entity_map(mut self, entity_map: HashMap<String, String>) -> Self {
        self.entity_map = entity_map;
        self
    }

    fn class_of(&self, label: &str) -> String {
        if let Some(class) = self.entity_map.get(label) {
            return class.clone();
        }
        label
            .split_once('-')
            .map(|(_, class)| class)
            .unwrap_or(label)
            .to_string()
    }

    /// Merge BIO predictions into `class -> entity text`.
    pub fn merge(&self, predictions: &[TokenPrediction]) -> Tags {
        let mut tags = Tags::new();
        let mut current: Option<(String, String)> = None;

        for pred in predictions {
            if pred.score < self.threshold {
                continue;
            }

            if pred.entity.starts_with("B-") {
                if let Some((class, text)) = current.take() {
                    tags.insert(class, text);
                }
                let word = pred.word.trim_start_matches(WORD_START);
                current = Some((self.class_of(&pred.entity), word.to_string()));
            } else if let Some((_, text)) = current.as_mut() {
                match pred.word.strip_prefix(WORD_START) {
                    Some(word) => {
                        text.push(' ');
                        text.push_str(word);
                    }
                    None => text.push_str(&pred.word),
                }
            }
        }

        if let Some((class, text)) = current {
            tags.insert(class, text);
        }
        tags
    }
}

impl<C: TokenClassifier> Tagger for NerTagger<C> {
    fn tag(&self, sentence: &str) -> Result<Tags> {
        let predictions = self.classifier.classify(sentence)?;
        Ok(self.merge(&predictions))
    }
}

enum TaggerState {
    Uninitialized,
    Ready {
        threshold: f32,
        tagger: Box<dyn Tagger>,
    },
}

/// Owns the tagging capability and its lazy (re)initialization.
pub struct TaggerManager {
    loader: Option<Box<dyn TaggerLoader>>,
    state: TaggerState,
}

impl TaggerManager {
    pub fn new(loader: Box<dyn TaggerLoader>) -> Self {
        Self {
            loader: Some(loader),
            state: TaggerState::Uninitialized,
        }
    }

    /// A manager with no tagging capability; any tagging request fails.
    pub fn unavailable() -> Self {
        Self {
            loader: None,
            state: TaggerState::Uninitialized,
        }
    }

    pub fn is_available(&self) -> bool {
        self.loader.is_some()
    }

    /// Threshold of the currently loaded tagger, if any.
    pub fn threshold(&self) -> Option<f32> {
        match &self.state {
            TaggerState::Uninitialized => None,
            TaggerState::Ready { threshold, .. } => Some(*threshold),
        }
    }

    /// Make sure a tagger for `threshold` is loaded and return it.
    pub fn ensure_ready(&mut self, threshold: f32) -> Result<&dyn Tagger> {
        let reload = match &self.state {
            TaggerState::Uninitialized => true,
            TaggerState::Ready { threshold: t, .. } => *t != threshold,
        };

        if reload {
            let loader = self.loader.as_ref().ok_or_else(|| {
                Error::CapabilityUnavailable {
                    capability: "tagger",
                    reason: format!(
                        "no lexicon configured (set --lexicon or {LEXICON_ENV_VAR})"
                    ),
                }
            })?;
            let tagger = loader.load(threshold).map_err(|e| match e {
                e @ Error::CapabilityUnavailable { .. } => e,
                other => Error::CapabilityUnavailable {
                    capability: "tagger",
                    reason: other.to_string(),
                },
            })?;
            info!(threshold, "tagger initialized");
            self.state = TaggerState::Ready { threshold, tagger };
        }

        match &self.state {
            TaggerState::Ready { tagger, .. } => Ok(tagger.as_ref()),
            TaggerState::Uninitialized => Err(Error::CapabilityUnavailable {
                capability: "tagger",
                reason: "tagger not initialized".to_string(),
            }),
        }
    }
}

/// Lexicon-backed token classifier.
///
/// Matches lexicon terms case-insensitively on word boundaries and emits
/// `B-`/`I-` predictions with confidence 1.0. Longer terms win when terms
/// overlap.
#[derive(Debug, Clone, Default)]
pub struct GazetteerClassifier {
    /// `(label, lowercased term words)`, longest first.
    terms: Vec<(String, Vec<String>)>,
}

impl GazetteerClassifier {
    pub fn new(lexicon: HashMap<String, Vec<String>>) -> Self {
        let mut terms: Vec<(String, Vec<String>)> = lexicon
            .into_iter()
            .flat_map(|(label, terms)| {
                terms.into_iter().filter_map(move |term| {
                    let words: Vec<String> = term
                        .split_whitespace()
                        .map(|w| w.to_lowercase())
                        .collect();
                    (!words.is_empty()).then(|| (label.clone(), words))
                })
            })
            .collect();
        terms.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.cmp(b)));
        Self { terms }
    }

    /// Load a lexicon file: a JSON object `{ "LABEL": ["term", ...] }`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let lexicon: HashMap<String, Vec<String>> =
            serde_json::from_slice(&bytes)?;
        debug!(path = %path.display(), labels = lexicon.len(), "loaded lexicon");
        Ok(Self::new(lexicon))
    }
}

fn normalize_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

impl TokenClassifier for GazetteerClassifier {
    fn classify(&self, sentence: &str) -> Result<Vec<TokenPrediction>> {
        let raw: Vec<&str> = sentence.split_whitespace().collect();
        let words: Vec<String> = raw.iter().map(|w| normalize_word(w)).collect();
        let mut predictions = Vec::new();

        let mut i = 0;
        while i < words.len() {
            let hit = self.terms.iter().find(|(_, term)| {
                words.len() - i >= term.len()
                    && term.iter().zip(&words[i..]).all(|(t, w)| t == w)
            });

            match hit {
                Some((label, term)) => {
                    for (offset, word) in raw[i..i + term.len()].iter().enumerate() {
                        let prefix = if offset == 0 { "B" } else { "I" };
                        let word = word.trim_matches(|c: char| !c.is_alphanumeric());
                        predictions.push(TokenPrediction {
                            entity: format!("{prefix}-{label}"),
                            word: format!("{WORD_START}{word}"),
                            score: 1.0,
                        });
                    }
                    i += term.len();
                }
                None => i += 1,
            }
        }

        Ok(predictions)
    }
}

/// Loads a [`GazetteerClassifier`] from a lexicon file on each (re)init.
#[derive(Debug, Clone)]
pub struct LexiconLoader {
    path: std::path::PathBuf,
}

impl LexiconLoader {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl TaggerLoader for LexiconLoader {
    fn load(&self, threshold: f32) -> Result<Box<dyn Tagger>> {
        let classifier =
            GazetteerClassifier::from_file(&self.path).map_err(|e| {
                Error::CapabilityUnavailable {
                    capability: "tagger",
                    reason: format!(
                        "failed to load lexicon {}: {e}",
                        self.path.display()
                    ),
                }
            })?;
        Ok(Box::new(NerTagger::new(classifier, threshold)))
    }
}
