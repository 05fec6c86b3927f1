//! In-memory document/chunk hierarchy.
//!
//! Documents keep insertion order; each carries its ordered chunks. Lookups
//! by document id and chunk id go through position maps that are rebuilt
//! after removals. A write generation is bumped on every append and clear so
//! that derived indexes can tell when they are stale.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::{
    document::{Chunk, ChunkId, Document, DocumentId},
    error::{Error, Result},
};

/// A stored document with its insertion sequence number.
#[derive(Debug, Clone)]
pub struct Slot {
    pub seq: u64,
    pub document: Document,
}

/// What a [`DocumentStore::delete`] call removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteOutcome {
    /// Whole documents removed.
    pub documents: Vec<DocumentId>,
    /// Individual chunks removed from documents that remain.
    pub chunks: Vec<ChunkId>,
    /// Documents that lost chunks but still exist.
    pub touched: Vec<DocumentId>,
}

impl DeleteOutcome {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.chunks.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    slots: Vec<Slot>,
    doc_pos: HashMap<DocumentId, usize>,
    chunk_pos: HashMap<ChunkId, (usize, usize)>,
    next_seq: u64,
    generation: u64,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted slots, ordered by sequence number.
    pub fn restore(mut slots: Vec<Slot>) -> Self {
        slots.sort_by_key(|s| s.seq);
        let next_seq = slots.last().map(|s| s.seq + 1).unwrap_or(0);
        let mut store = Self {
            slots,
            next_seq,
            ..Self::default()
        };
        store.reindex();
        store
    }

    fn reindex(&mut self) {
        self.doc_pos.clear();
        self.chunk_pos.clear();
        for (d, slot) in self.slots.iter().enumerate() {
            self.doc_pos.insert(slot.document.id.clone(), d);
            for (c, chunk) in slot.document.chunks.iter().enumerate() {
                self.chunk_pos.insert(chunk.id.clone(), (d, c));
            }
        }
    }

    fn index_slot(&mut self, d: usize) {
        let document = &self.slots[d].document;
        self.doc_pos.insert(document.id.clone(), d);
        for (c, chunk) in document.chunks.iter().enumerate() {
            self.chunk_pos.insert(chunk.id.clone(), (d, c));
        }
    }

    fn check_new_ids(&self, documents: &[Document]) -> Result<()> {
        let mut docs = HashSet::new();
        let mut chunks = HashSet::new();
        for document in documents {
            if self.doc_pos.contains_key(&document.id)
                || !docs.insert(document.id.as_str())
            {
                return Err(Error::Config(format!(
                    "duplicate document id {}",
                    document.id
                )));
            }
            for chunk in &document.chunks {
                if self.chunk_pos.contains_key(&chunk.id)
                    || !chunks.insert(chunk.id.as_str())
                {
                    return Err(Error::Config(format!(
                        "duplicate chunk id {}",
                        chunk.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Prepare documents for appending without touching the store.
    ///
    /// Assigns sequence numbers and parent ids. With `replacing` set, ids are
    /// only checked within the batch, since the store is about to be cleared.
    /// Pass the result to [`DocumentStore::install`] once it is persisted.
    pub fn stage_append(
        &self,
        documents: Vec<Document>,
        replacing: bool,
    ) -> Result<Vec<Slot>> {
        if replacing {
            DocumentStore::new().check_new_ids(&documents)?;
        } else {
            self.check_new_ids(&documents)?;
        }

        Ok(documents
            .into_iter()
            .zip(self.next_seq..)
            .map(|(mut document, seq)| {
                for chunk in &mut document.chunks {
                    chunk.parent_id = document.id.clone();
                }
                Slot { seq, document }
            })
            .collect())
    }

    /// Add staged slots at the end of the store.
    pub fn install(&mut self, slots: Vec<Slot>) {
        let count = slots.len();
        for slot in slots {
            self.next_seq = self.next_seq.max(slot.seq + 1);
            self.slots.push(slot);
            self.index_slot(self.slots.len() - 1);
        }

        self.generation += 1;
        debug!(
            documents = count,
            generation = self.generation,
            "appended documents"
        );
    }

    /// Append documents at the end of the store.
    ///
    /// Returns the slots assigned to them. Fails without modifying the store
    /// if any document or chunk id is already present.
    pub fn append(&mut self, documents: Vec<Document>) -> Result<Vec<Slot>> {
        let slots = self.stage_append(documents, false)?;
        self.install(slots.clone());
        Ok(slots)
    }

    /// Build the replacement slot for a document without touching the store.
    ///
    /// Returns `None` (with a warning) when no such document exists.
    pub fn stage_update(&self, mut document: Document) -> Result<Option<Slot>> {
        let Some(&d) = self.doc_pos.get(&document.id) else {
            warn!(id = %document.id, "update of unknown document ignored");
            return Ok(None);
        };

        for chunk in &mut document.chunks {
            chunk.parent_id = document.id.clone();
            if let Some(&(other, _)) = self.chunk_pos.get(&chunk.id)
                && other != d
            {
                return Err(Error::Config(format!(
                    "chunk id {} belongs to another document",
                    chunk.id
                )));
            }
        }

        Ok(Some(Slot {
            seq: self.slots[d].seq,
            document,
        }))
    }

    /// Swap in a slot built by [`DocumentStore::stage_update`].
    pub fn commit_update(&mut self, slot: Slot) {
        let Some(&d) = self.doc_pos.get(&slot.document.id) else {
            return;
        };
        for chunk in &self.slots[d].document.chunks {
            self.chunk_pos.remove(&chunk.id);
        }
        self.slots[d] = slot;
        self.index_slot(d);
    }

    /// Replace the document with the same id, keeping its position.
    ///
    /// Returns the updated slot, or `None` (with a warning) when no such
    /// document exists; nothing is inserted in that case.
    pub fn update(&mut self, document: Document) -> Result<Option<Slot>> {
        let staged = self.stage_update(document)?;
        if let Some(slot) = &staged {
            self.commit_update(slot.clone());
        }
        Ok(staged)
    }

    /// Work out what deleting `ids` would remove, without touching the store.
    ///
    /// Returns the outcome and the remaining versions of documents that lose
    /// chunks. Unknown ids are logged and skipped.
    pub fn stage_delete<S: AsRef<str>>(&self, ids: &[S]) -> (DeleteOutcome, Vec<Slot>) {
        let mut outcome = DeleteOutcome::default();
        let mut drop_docs = HashSet::new();
        let mut drop_chunks: HashMap<usize, HashSet<usize>> = HashMap::new();
        for id in ids {
            let id = id.as_ref();
            if let Some(&d) = self.doc_pos.get(id) {
                drop_docs.insert(d);
            } else if let Some(&(d, c)) = self.chunk_pos.get(id) {
                drop_chunks.entry(d).or_default().insert(c);
            } else {
                warn!(id, "delete of unknown id ignored");
            }
        }

        let mut touched = Vec::new();
        for (d, slot) in self.slots.iter().enumerate() {
            if drop_docs.contains(&d) {
                outcome.documents.push(slot.document.id.clone());
                continue;
            }
            let Some(positions) = drop_chunks.get(&d) else {
                continue;
            };
            let mut slot = slot.clone();
            let mut c = 0;
            slot.document.chunks.retain(|chunk| {
                let keep = !positions.contains(&c);
                if !keep {
                    outcome.chunks.push(chunk.id.clone());
                }
                c += 1;
                keep
            });
            outcome.touched.push(slot.document.id.clone());
            touched.push(slot);
        }

        (outcome, touched)
    }

    /// Apply a delete worked out by [`DocumentStore::stage_delete`].
    pub fn commit_delete(&mut self, outcome: &DeleteOutcome, touched: Vec<Slot>) {
        if outcome.is_empty() {
            return;
        }
        for slot in touched {
            if let Some(&d) = self.doc_pos.get(&slot.document.id) {
                self.slots[d] = slot;
            }
        }
        if !outcome.documents.is_empty() {
            let gone: HashSet<&str> =
                outcome.documents.iter().map(String::as_str).collect();
            self.slots
                .retain(|slot| !gone.contains(slot.document.id.as_str()));
        }
        self.reindex();
        debug!(
            documents = outcome.documents.len(),
            chunks = outcome.chunks.len(),
            "deleted from store"
        );
    }

    /// Delete documents and/or individual chunks by id.
    ///
    /// A document id removes the whole document; a chunk id removes just that
    /// chunk. Unknown ids are logged and skipped. An empty list is a no-op.
    pub fn delete<S: AsRef<str>>(&mut self, ids: &[S]) -> DeleteOutcome {
        let (outcome, touched) = self.stage_delete(ids);
        self.commit_delete(&outcome, touched);
        outcome
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.doc_pos.clear();
        self.chunk_pos.clear();
        self.generation += 1;
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_pos.len()
    }

    /// Incremented by every append and clear.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.doc_pos.get(id).map(|&d| &self.slots[d].document)
    }

    /// Look up a chunk together with its parent and its index among siblings.
    pub fn chunk(&self, id: &str) -> Option<(&Document, usize)> {
        self.chunk_pos
            .get(id)
            .map(|&(d, c)| (&self.slots[d].document, c))
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.slots.iter().map(|s| &s.document)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.documents().flat_map(|d| d.chunks.iter())
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Copy embeddings from stored chunks onto the given documents' chunks.
    ///
    /// Every document and chunk must already be in the store. Returns the
    /// number of chunks that received an embedding.
    pub fn fill_embedding(&self, documents: &mut [Document]) -> Result<usize> {
        let mut filled = 0;
        for document in documents {
            if !self.doc_pos.contains_key(&document.id) {
                return Err(Error::NotFound {
                    kind: "document",
                    name: document.id.clone(),
                });
            }
            for chunk in &mut document.chunks {
                let (parent, c) =
                    self.chunk(&chunk.id).ok_or_else(|| Error::NotFound {
                        kind: "chunk",
                        name: chunk.id.clone(),
                    })?;
                if let Some(embedding) = &parent.chunks[c].embedding {
                    chunk.embedding = Some(embedding.clone());
                    filled += 1;
                }
            }
        }
        Ok(filled)
    }
}
