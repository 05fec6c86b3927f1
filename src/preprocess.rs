//! Sentence splitting and per-sentence tagging.

use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    document::Tags,
    error::Result,
    tagger::{Tagger, TaggerManager},
};

// A line holding only whitespace still separates paragraphs.
static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("Invalid paragraph regex pattern"));

// Terminators, then any closing quotes or brackets, then whitespace or end of
// text. Periods inside tokens such as "3.5" are not followed by whitespace.
static SENTENCE_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[.!?]+["'”’)\]]*(?:\s+|$)"#).expect("Invalid sentence regex pattern")
});

/// Index-aligned sentences and tag maps for one document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PreprocessedDocument {
    pub sentences: Vec<String>,
    pub tags: Vec<Tags>,
}

impl PreprocessedDocument {
    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn clean(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split raw text into cleaned, non-empty sentences.
///
/// Blank lines (including lines of only whitespace) always end a sentence.
/// Within a paragraph a sentence ends after `.`, `!` or `?` (plus any
/// closing quotes or brackets) followed by whitespace. Abbreviations are not
/// special-cased, so "Dr. Smith" splits after "Dr.".
///
/// # Examples
///
/// ```
/// use chunkscope::preprocess::split_sentences;
///
/// let s = split_sentences("Revenue grew.  Costs fell!\n \nOutlook: stable");
/// assert_eq!(s, vec!["Revenue grew.", "Costs fell!", "Outlook: stable"]);
/// ```
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();

    for paragraph in PARAGRAPH_BREAK.split(text) {
        let paragraph = clean(paragraph);
        let mut last_end = 0;

        for mat in SENTENCE_END.find_iter(&paragraph) {
            let sentence = paragraph[last_end..mat.end()].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            last_end = mat.end();
        }

        let rest = paragraph[last_end..].trim();
        if !rest.is_empty() {
            sentences.push(rest.to_string());
        }
    }

    sentences
}

/// Turns raw document text into sentences plus per-sentence tags.
pub struct Preprocessor {
    tagger: TaggerManager,
}

impl Preprocessor {
    pub fn new(tagger: TaggerManager) -> Self {
        Self { tagger }
    }

    pub fn tagger(&self) -> &TaggerManager {
        &self.tagger
    }

    /// Ensure the tagger is ready for `threshold` when tagging is requested.
    ///
    /// Call once per request before fanning out over documents so that a
    /// threshold change reinitializes the tagger exactly once.
    pub fn prepare(&mut self, tag: bool, threshold: f32) -> Result<()> {
        if tag {
            self.tagger.ensure_ready(threshold)?;
        }
        Ok(())
    }

    /// Split one document and, if `tag` is set, tag every sentence.
    ///
    /// When tagging is off, every tag map is empty.
    pub fn split_and_tag(
        &mut self,
        raw_text: &str,
        tag: bool,
        threshold: f32,
    ) -> Result<PreprocessedDocument> {
        let sentences = split_sentences(raw_text);

        let tags = if tag {
            let tagger = self.tagger.ensure_ready(threshold)?;
            tag_all(tagger, &sentences)?
        } else {
            vec![Tags::new(); sentences.len()]
        };

        debug!(sentences = sentences.len(), tagged = tag, "preprocessed document");
        Ok(PreprocessedDocument { sentences, tags })
    }
}

fn tag_all(tagger: &dyn Tagger, sentences: &[String]) -> Result<Vec<Tags>> {
    sentences
        .par_iter()
        .map(|sentence| tagger.tag(sentence))
        .collect()
}
