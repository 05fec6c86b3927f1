//! Corpus data model: documents own ordered sentence chunks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type DocumentId = String;
pub type ChunkId = String;

/// Structured tags attached by the tagging capability, e.g. `{"ORG": "Acme"}`.
pub type Tags = BTreeMap<String, String>;

/// Match annotation key holding the parent document's label.
pub const PARENT_TEXT_TAG: &str = "parent_text";
/// Match annotation key holding the reconstructed context window.
pub const CONTEXT_TAG: &str = "context";

/// Generate a fresh, globally unique id (uuid v4, simple hex form).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A single sentence of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub parent_id: DocumentId,
    pub text: String,
    /// Attached by the embedding capability; persisted separately.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub tags: Tags,
}

/// A source document. Chunk order is the canonical sentence order and
/// defines adjacency for context windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub text: Option<String>,
    pub chunks: Vec<Chunk>,
    #[serde(default)]
    pub tags: Tags,
}

impl Document {
    /// Build a document from index-aligned sentences and tag maps.
    ///
    /// Missing tag maps (when `tags` is shorter than `sentences`) are empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunkscope::document::{Document, Tags};
    ///
    /// let doc = Document::from_sentences(
    ///     Some("report.txt".to_string()),
    ///     vec!["First.".to_string(), "Second.".to_string()],
    ///     vec![Tags::new(), Tags::new()],
    /// );
    /// assert_eq!(doc.chunks.len(), 2);
    /// assert!(doc.chunks.iter().all(|c| c.parent_id == doc.id));
    /// ```
    pub fn from_sentences(
        text: Option<String>,
        sentences: Vec<String>,
        tags: Vec<Tags>,
    ) -> Self {
        let id = new_id();
        let mut tags = tags.into_iter();
        let chunks = sentences
            .into_iter()
            .map(|sentence| Chunk {
                id: new_id(),
                parent_id: id.clone(),
                text: sentence,
                embedding: None,
                tags: tags.next().unwrap_or_default(),
            })
            .collect();

        Self {
            id,
            text,
            chunks,
            tags: Tags::new(),
        }
    }

    /// The label reported as `parent_text` on matches.
    pub fn label(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// A chunk-level search hit.
///
/// `score` is `round(1 - distance, 2)`, so higher means more similar.
/// `tags` holds the chunk's own tags merged with the `parent_text` and
/// `context` annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub chunk_id: ChunkId,
    pub parent_id: DocumentId,
    pub text: String,
    pub score: f32,
    pub tags: Tags,
}
