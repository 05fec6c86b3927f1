use std::collections::BTreeMap;

use crate::{
    document::{Document, Tags},
    error::{Error, Result},
    store::DocumentStore,
};

/// `tag key -> tag value -> occurrences`.
pub type TagCounts = BTreeMap<String, BTreeMap<String, usize>>;

fn add(counts: &mut TagCounts, tags: &Tags) {
    for (key, value) in tags {
        *counts
            .entry(key.clone())
            .or_default()
            .entry(value.clone())
            .or_default() += 1;
    }
}

fn add_document(counts: &mut TagCounts, document: &Document) {
    add(counts, &document.tags);
    for chunk in &document.chunks {
        add(counts, &chunk.tags);
    }
}

/// Count tag values over the given documents or chunks, or the whole store
/// when `ids` is empty.
///
/// A document id counts the document's own tags plus its chunks' tags; a
/// chunk id counts that chunk only. Unknown ids are an error.
pub fn count_tags<S: AsRef<str>>(store: &DocumentStore, ids: &[S]) -> Result<TagCounts> {
    let mut counts = TagCounts::new();

    if ids.is_empty() {
        for document in store.documents() {
            add_document(&mut counts, document);
        }
        return Ok(counts);
    }

    for id in ids {
        let id = id.as_ref();
        if let Some(document) = store.get(id) {
            add_document(&mut counts, document);
        } else if let Some((parent, index)) = store.chunk(id) {
            add(&mut counts, &parent.chunks[index].tags);
        } else {
            return Err(Error::NotFound {
                kind: "document or chunk",
                name: id.to_string(),
            });
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn store() -> (DocumentStore, Document, Document) {
        let a = Document::from_sentences(
            Some("a".to_string()),
            vec!["x".to_string(), "y".to_string(), "z".to_string()],
            vec![
                tags(&[("ORG", "Acme")]),
                Tags::new(),
                tags(&[("ORG", "Acme"), ("LOC", "Berlin")]),
            ],
        );
        let mut b = Document::from_sentences(
            Some("b".to_string()),
            vec!["w".to_string()],
            vec![tags(&[("ORG", "Globex")])],
        );
        b.tags = tags(&[("LOC", "Paris")]);

        let mut store = DocumentStore::new();
        store.append(vec![a.clone(), b.clone()]).unwrap();
        (store, a, b)
    }

    #[test]
    fn counts_everything_when_no_ids() {
        let (store, _, _) = store();
        let none: [&str; 0] = [];
        let counts = count_tags(&store, &none).unwrap();

        assert_eq!(counts["ORG"]["Acme"], 2);
        assert_eq!(counts["ORG"]["Globex"], 1);
        assert_eq!(counts["LOC"]["Berlin"], 1);
        assert_eq!(counts["LOC"]["Paris"], 1);
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn counts_selected_documents_and_chunks() {
        let (store, a, b) = store();

        let counts = count_tags(&store, &[b.id.as_str()]).unwrap();
        assert_eq!(counts["ORG"]["Globex"], 1);
        assert!(!counts["ORG"].contains_key("Acme"));

        let counts = count_tags(&store, &[a.chunks[2].id.as_str()]).unwrap();
        assert_eq!(counts["ORG"]["Acme"], 1);
        assert_eq!(counts["LOC"]["Berlin"], 1);
    }

    #[test]
    fn unknown_id_is_an_error() {
        let (store, _, _) = store();
        let err = count_tags(&store, &["nope"]).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn empty_store_has_no_counts() {
        let none: [&str; 0] = [];
        assert!(count_tags(&DocumentStore::new(), &none).unwrap().is_empty());
    }
}
