//! Versioned request and response types for the service boundary.
//!
//! Responses carry `schema_version`; a match is either a [`BasicMatch`] or,
//! when tags are requested, a [`TaggedMatch`].

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    document::{DocumentId, Match, Tags},
    rank::{Aggregation, DocumentMatch},
    tag_counter::TagCounts,
    tagger::DEFAULT_TAGGING_CONFIDENCE,
};

pub const SCHEMA_VERSION: u32 = 2;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_CONTEXT_LENGTH: usize = 5;
pub const DEFAULT_FILTER_METHOD: &str = "OR";

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_context_length() -> usize {
    DEFAULT_CONTEXT_LENGTH
}

fn default_filter_method() -> String {
    DEFAULT_FILTER_METHOD.to_string()
}

fn default_confidence() -> f32 {
    DEFAULT_TAGGING_CONFIDENCE
}

fn default_true() -> bool {
    true
}

/// One input document: a name (used for the cache fingerprint and as the
/// document label) and its raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NamedText {
    pub name: String,
    pub text: String,
}

impl NamedText {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexRequest {
    pub documents: Vec<NamedText>,
    /// Clear the store before adding.
    #[serde(default)]
    pub reload: bool,
    /// Ignore a cached preprocessing result and overwrite it.
    #[serde(default)]
    pub reload_persisted: bool,
    /// Run the tagger over every sentence.
    #[serde(default)]
    pub tag: bool,
    #[serde(default = "default_confidence")]
    pub tagging_confidence: f32,
}

impl IndexRequest {
    pub fn new(documents: Vec<NamedText>) -> Self {
        Self {
            documents,
            reload: false,
            reload_persisted: false,
            tag: false,
            tagging_confidence: DEFAULT_TAGGING_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IndexReport {
    pub fingerprint: String,
    /// Preprocessing was served from the content cache.
    pub cache_hit: bool,
    pub documents_added: usize,
    pub chunks_added: usize,
    /// Documents in the store after the operation.
    pub total_documents: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Sentences on each side of a match included in its context.
    #[serde(default = "default_context_length")]
    pub context_length: usize,
    /// Predicates as `{tag_key: tag_value}` maps.
    #[serde(default)]
    pub filter_by_tags: Vec<Tags>,
    /// `OR` or `AND`; anything else is treated as `OR`.
    #[serde(default = "default_filter_method")]
    pub filter_by_tags_method: String,
    /// Roll chunk matches up to documents with this aggregation.
    #[serde(default)]
    pub rank_by: Option<Aggregation>,
    #[serde(default = "default_true")]
    pub include_tags: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: DEFAULT_TOP_K,
            context_length: DEFAULT_CONTEXT_LENGTH,
            filter_by_tags: Vec::new(),
            filter_by_tags_method: default_filter_method(),
            rank_by: None,
            include_tags: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BasicMatch {
    /// Chunk id, or the document id for ranked results.
    pub doc_id: String,
    pub parent_id: DocumentId,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaggedMatch {
    pub doc_id: String,
    pub parent_id: DocumentId,
    pub text: String,
    pub score: f32,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum MatchView {
    Tagged(TaggedMatch),
    Basic(BasicMatch),
}

impl MatchView {
    pub fn from_match(m: Match, include_tags: bool) -> Self {
        if include_tags {
            Self::Tagged(TaggedMatch {
                doc_id: m.chunk_id,
                parent_id: m.parent_id,
                text: m.text,
                score: m.score,
                tags: m.tags,
            })
        } else {
            Self::Basic(BasicMatch {
                doc_id: m.chunk_id,
                parent_id: m.parent_id,
                text: m.text,
                score: m.score,
            })
        }
    }

    pub fn from_document_match(d: DocumentMatch, include_tags: bool) -> Self {
        let mut view = Self::from_match(d.representative, include_tags);
        if let Self::Tagged(tagged) = &mut view {
            tagged
                .tags
                .insert("aggregation".to_string(), d.aggregation.to_string());
        }
        view
    }

    pub fn doc_id(&self) -> &str {
        match self {
            Self::Tagged(m) => &m.doc_id,
            Self::Basic(m) => &m.doc_id,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Tagged(m) => &m.text,
            Self::Basic(m) => &m.text,
        }
    }

    pub fn score(&self) -> f32 {
        match self {
            Self::Tagged(m) => m.score,
            Self::Basic(m) => m.score,
        }
    }

    pub fn tags(&self) -> Option<&Tags> {
        match self {
            Self::Tagged(m) => Some(&m.tags),
            Self::Basic(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchResponse {
    pub schema_version: u32,
    /// Set when matches are ranked parent documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_by: Option<Aggregation>,
    pub matches: Vec<MatchView>,
}

impl SearchResponse {
    pub fn new(matches: Vec<MatchView>, rank_by: Option<Aggregation>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            rank_by,
            matches,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TagsRequest {
    /// Document or chunk ids; empty means the whole store.
    #[serde(default)]
    pub doc_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TagsResponse {
    pub schema_version: u32,
    pub tags: BTreeMap<String, BTreeMap<String, usize>>,
}

impl From<TagCounts> for TagsResponse {
    fn from(tags: TagCounts) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_request_defaults() {
        let req: SearchRequest =
            serde_json::from_str(r#"{"query": "revenue"}"#).unwrap();
        assert_eq!(req.top_k, 5);
        assert_eq!(req.context_length, 5);
        assert!(req.filter_by_tags.is_empty());
        assert_eq!(req.filter_by_tags_method, "OR");
        assert_eq!(req.rank_by, None);
        assert!(req.include_tags);
    }

    #[test]
    fn search_request_with_filters_and_rank() {
        let req: SearchRequest = serde_json::from_str(
            r#"{"query": "q", "filter_by_tags": [{"ORG": "Acme"}], "filter_by_tags_method": "AND", "rank_by": "mean_min"}"#,
        )
        .unwrap();
        assert_eq!(req.filter_by_tags[0]["ORG"], "Acme");
        assert_eq!(req.rank_by, Some(Aggregation::MeanMin));
    }

    #[test]
    fn index_request_defaults() {
        let req: IndexRequest = serde_json::from_str(
            r#"{"documents": [{"name": "a.txt", "text": "Hello."}]}"#,
        )
        .unwrap();
        assert!(!req.reload && !req.reload_persisted && !req.tag);
        assert_eq!(req.tagging_confidence, DEFAULT_TAGGING_CONFIDENCE);
    }

    fn sample_match() -> Match {
        let mut tags = Tags::new();
        tags.insert("parent_text".to_string(), "a.txt".to_string());
        Match {
            chunk_id: "c1".to_string(),
            parent_id: "d1".to_string(),
            text: "Hello.".to_string(),
            score: 0.7,
            tags,
        }
    }

    #[test]
    fn basic_and_tagged_views_serialize_differently() {
        let tagged = serde_json::to_value(MatchView::from_match(sample_match(), true)).unwrap();
        assert_eq!(tagged["doc_id"], "c1");
        assert_eq!(tagged["tags"]["parent_text"], "a.txt");

        let basic = serde_json::to_value(MatchView::from_match(sample_match(), false)).unwrap();
        assert!(basic.get("tags").is_none());
        assert_eq!(basic["parent_id"], "d1");
    }

    #[test]
    fn views_deserialize_to_the_right_variant() {
        let tagged = MatchView::from_match(sample_match(), true);
        let json = serde_json::to_string(&tagged).unwrap();
        assert_eq!(serde_json::from_str::<MatchView>(&json).unwrap(), tagged);

        let basic = MatchView::from_match(sample_match(), false);
        let json = serde_json::to_string(&basic).unwrap();
        assert_eq!(serde_json::from_str::<MatchView>(&json).unwrap(), basic);
    }

    #[test]
    fn response_carries_schema_version() {
        let resp = SearchResponse::new(vec![], None);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["schema_version"], SCHEMA_VERSION);
        assert!(json.get("rank_by").is_none());
    }
}
