use rayon::prelude::*;
use tracing::debug;

use crate::{
    document::{CONTEXT_TAG, Chunk, Document, Match, PARENT_TEXT_TAG},
    embedding::{cosine_distance, score_from_distance},
    store::DocumentStore,
    tag_index::Candidates,
};

/// Space-joined text of the chunks in `[i - context_length, i + context_length]`,
/// clamped to the document.
///
/// # Examples
///
/// ```
/// use chunkscope::{document::Document, matcher::context_window};
///
/// let doc = Document::from_sentences(
///     None,
///     ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect(),
///     vec![],
/// );
/// assert_eq!(context_window(&doc, 0, 2), "a b c");
/// assert_eq!(context_window(&doc, 4, 2), "c d e");
/// ```
pub fn context_window(document: &Document, index: usize, context_length: usize) -> String {
    let len = document.chunks.len();
    if index >= len {
        return String::new();
    }
    let start = index.saturating_sub(context_length);
    let end = index.saturating_add(context_length).saturating_add(1).min(len);
    document.chunks[start..end]
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Nearest-neighbor search of `query` over the candidate chunks.
///
/// Returns up to `top_k` matches, best (smallest cosine distance) first;
/// ties keep store order. Candidate ids the store no longer holds and
/// chunks without a compatible embedding are skipped.
pub fn search(
    store: &DocumentStore,
    query: &[f32],
    candidates: &Candidates,
    top_k: usize,
    context_length: usize,
) -> Vec<Match> {
    if top_k == 0 || store.is_empty() {
        return Vec::new();
    }

    let pool: Vec<&Chunk> = store
        .chunks()
        .filter(|c| candidates.contains(&c.id))
        .collect();

    let mut scored: Vec<(usize, f32)> = pool
        .par_iter()
        .enumerate()
        .filter_map(|(i, chunk)| {
            let embedding = chunk.embedding.as_deref()?;
            if embedding.len() != query.len() {
                return None;
            }
            Some((i, cosine_distance(query, embedding)))
        })
        .collect();

    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    scored.truncate(top_k);

    let matches: Vec<Match> = scored
        .into_iter()
        .filter_map(|(i, distance)| to_match(store, pool[i], distance, context_length))
        .collect();

    debug!(
        candidates = pool.len(),
        matches = matches.len(),
        "chunk search complete"
    );
    matches
}

fn to_match(
    store: &DocumentStore,
    chunk: &Chunk,
    distance: f32,
    context_length: usize,
) -> Option<Match> {
    let (parent, index) = store.chunk(&chunk.id)?;

    let mut tags = chunk.tags.clone();
    tags.insert(PARENT_TEXT_TAG.to_string(), parent.label().to_string());
    tags.insert(
        CONTEXT_TAG.to_string(),
        context_window(parent, index, context_length),
    );

    Some(Match {
        chunk_id: chunk.id.clone(),
        parent_id: parent.id.clone(),
        text: chunk.text.clone(),
        score: score_from_distance(distance),
        tags,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::document::Tags;

    fn doc_with_vectors(label: &str, rows: &[(&str, [f32; 2])]) -> Document {
        let mut doc = Document::from_sentences(
            Some(label.to_string()),
            rows.iter().map(|(s, _)| s.to_string()).collect(),
            vec![],
        );
        for (chunk, (_, v)) in doc.chunks.iter_mut().zip(rows) {
            chunk.embedding = Some(v.to_vec());
        }
        doc
    }

    fn five_chunk_store() -> (DocumentStore, Document) {
        let doc = doc_with_vectors(
            "five.txt",
            &[
                ("s0", [1.0, 0.0]),
                ("s1", [0.0, 1.0]),
                ("s2", [0.0, 1.0]),
                ("s3", [0.0, 1.0]),
                ("s4", [-1.0, 0.0]),
            ],
        );
        let mut store = DocumentStore::new();
        store.append(vec![doc.clone()]).unwrap();
        (store, doc)
    }

    #[test]
    fn context_clamps_at_edges() {
        let (store, _) = five_chunk_store();

        let first = search(&store, &[1.0, 0.0], &Candidates::All, 1, 2);
        assert_eq!(first[0].text, "s0");
        assert_eq!(first[0].tags[CONTEXT_TAG], "s0 s1 s2");

        let last = search(&store, &[-1.0, 0.0], &Candidates::All, 1, 2);
        assert_eq!(last[0].text, "s4");
        assert_eq!(last[0].tags[CONTEXT_TAG], "s2 s3 s4");
    }

    #[test]
    fn context_window_bounds_are_inclusive() {
        let (_, doc) = five_chunk_store();
        assert_eq!(context_window(&doc, 2, 1), "s1 s2 s3");
        assert_eq!(context_window(&doc, 2, 0), "s2");
        assert_eq!(context_window(&doc, 2, 100), "s0 s1 s2 s3 s4");
        assert_eq!(context_window(&doc, 9, 1), "");
    }

    #[test]
    fn score_is_one_minus_distance() {
        let c = 0.7f32;
        let doc = doc_with_vectors("d", &[("only", [c, (1.0 - c * c).sqrt()])]);
        let mut store = DocumentStore::new();
        store.append(vec![doc]).unwrap();

        let m = search(&store, &[1.0, 0.0], &Candidates::All, 5, 0);
        assert_eq!(m[0].score, 0.70);
    }

    #[test]
    fn results_are_ordered_and_truncated() {
        let (store, doc) = five_chunk_store();
        let m = search(&store, &[1.0, 0.1], &Candidates::All, 3, 0);
        assert_eq!(m.len(), 3);
        assert_eq!(m[0].chunk_id, doc.chunks[0].id);
        assert!(m[0].score >= m[1].score);
        assert!(m[1].score >= m[2].score);
        // Equal distances keep store order.
        assert_eq!(m[1].text, "s1");
        assert_eq!(m[2].text, "s2");
    }

    #[test]
    fn candidates_restrict_the_pool() {
        let (store, doc) = five_chunk_store();
        let only = Candidates::Only(HashSet::from([
            doc.chunks[3].id.clone(),
            "gone".to_string(),
        ]));
        let m = search(&store, &[1.0, 0.0], &only, 5, 1);
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].text, "s3");
        assert_eq!(m[0].parent_id, doc.id);
    }

    #[test]
    fn annotations_merge_with_chunk_tags() {
        let mut tags = Tags::new();
        tags.insert("ORG".to_string(), "Acme".to_string());
        tags.insert(CONTEXT_TAG.to_string(), "stale".to_string());
        let mut doc = Document::from_sentences(
            Some("report.txt".to_string()),
            vec!["Acme grew.".to_string()],
            vec![tags],
        );
        doc.chunks[0].embedding = Some(vec![1.0, 0.0]);
        let mut store = DocumentStore::new();
        store.append(vec![doc]).unwrap();

        let m = search(&store, &[1.0, 0.0], &Candidates::All, 1, 3);
        assert_eq!(m[0].tags["ORG"], "Acme");
        assert_eq!(m[0].tags[PARENT_TEXT_TAG], "report.txt");
        assert_eq!(m[0].tags[CONTEXT_TAG], "Acme grew.");
    }

    #[test]
    fn zero_top_k_and_empty_store() {
        let (store, _) = five_chunk_store();
        assert!(search(&store, &[1.0, 0.0], &Candidates::All, 0, 2).is_empty());
        assert!(search(&DocumentStore::new(), &[1.0, 0.0], &Candidates::All, 5, 2).is_empty());
    }

    #[test]
    fn chunks_without_embeddings_are_skipped() {
        let doc = Document::from_sentences(None, vec!["bare".to_string()], vec![]);
        let mut store = DocumentStore::new();
        store.append(vec![doc]).unwrap();
        assert!(search(&store, &[1.0, 0.0], &Candidates::All, 5, 2).is_empty());
    }
}
