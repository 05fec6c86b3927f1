//! Service boundary tying the cache, preprocessor, store and search together.
//!
//! Structural changes to the store (append, update, delete, clear) take the
//! store's write lock; searches and tag counts share its read lock. Each
//! change is committed to the database before it is applied in memory, so a
//! failed write leaves both sides as they were. Index
//! requests are additionally serialized by the preprocessor mutex, which also
//! guards tagger reinitialization, so that preprocessing and embedding happen
//! without blocking readers.

use std::{
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    api::{
        IndexReport, IndexRequest, MatchView, SearchRequest, SearchResponse,
        TagsResponse,
    },
    content_cache::{CacheEntry, ContentCache},
    data_dir::DataDir,
    document::{ChunkId, Document},
    embedding::{DEFAULT_EMBEDDING_DIM, Embedder, HashingEmbedder, embed_chunks},
    error::{Error, Result},
    matcher,
    preprocess::Preprocessor,
    rank,
    store::{DeleteOutcome, DocumentStore},
    store_db::{
        SETTING_EMBEDDER_ID, SETTING_EMBEDDING_DIM, SETTING_LEXICON_PATH,
        StoreDb, StoreWrite,
    },
    tag_counter,
    tag_index::{FilterMethod, TagFilter, TagFilterIndex},
    tagger::{LEXICON_ENV_VAR, LexiconLoader, TaggerManager},
};

/// Snapshot of engine state for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub documents: usize,
    pub chunks: usize,
    pub embedder_id: String,
    pub embedding_dim: usize,
    pub persistent: bool,
    pub tagging_available: bool,
    pub tagger_threshold: Option<f32>,
    pub cached_tag_keys: usize,
}

pub struct Engine {
    store: RwLock<DocumentStore>,
    tag_index: TagFilterIndex,
    cache: ContentCache,
    preprocessor: Mutex<Preprocessor>,
    embedder: Box<dyn Embedder>,
    db: Option<StoreDb>,
}

/// Pick the lexicon file: explicit path, then `CHUNKSCOPE_LEXICON`, then the
/// path recorded in the store settings.
pub fn resolve_lexicon(
    explicit: Option<&Path>,
    db: &StoreDb,
) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        db.set_setting(SETTING_LEXICON_PATH, &path.to_string_lossy())?;
        return Ok(Some(path.to_path_buf()));
    }
    if let Ok(val) = std::env::var(LEXICON_ENV_VAR) {
        return Ok(Some(PathBuf::from(val)));
    }
    Ok(db.get_setting(SETTING_LEXICON_PATH)?.map(PathBuf::from))
}

impl Engine {
    /// An engine whose store lives only in memory.
    pub fn new(
        cache: ContentCache,
        preprocessor: Preprocessor,
        embedder: Box<dyn Embedder>,
    ) -> Self {
        Self {
            store: RwLock::new(DocumentStore::new()),
            tag_index: TagFilterIndex::new(),
            cache,
            preprocessor: Mutex::new(preprocessor),
            embedder,
            db: None,
        }
    }

    /// Mirror the store into `db` and load what it already holds.
    ///
    /// Fails if the database was written with a different embedder.
    pub fn with_store_db(mut self, db: StoreDb) -> Result<Self> {
        let embedder_id = self.embedder.id();
        match db.get_setting(SETTING_EMBEDDER_ID)? {
            Some(recorded) if recorded != embedder_id => {
                return Err(Error::Config(format!(
                    "store was built with embedder '{recorded}', \
                     but '{embedder_id}' is configured; run `chunkscope clear` first"
                )));
            }
            Some(_) => {}
            None => db.set_setting(SETTING_EMBEDDER_ID, &embedder_id)?,
        }

        let slots = db.load_all()?;
        let missing = slots
            .iter()
            .flat_map(|s| &s.document.chunks)
            .filter(|c| c.embedding.is_none())
            .count();
        if missing > 0 {
            warn!(chunks = missing, "stored chunks without embeddings will not match");
        }

        let store = DocumentStore::restore(slots);
        info!(
            documents = store.len(),
            chunks = store.chunk_count(),
            "loaded document store"
        );
        self.store = RwLock::new(store);
        self.db = Some(db);
        Ok(self)
    }

    /// Open the persistent engine rooted at a data directory.
    pub fn open(data_dir: &DataDir, lexicon: Option<&Path>) -> Result<Self> {
        let db = StoreDb::open(&data_dir.store_db())?;
        let cache = ContentCache::open(&data_dir.cache_dir()?)?;

        let dim = db
            .get_setting_or(SETTING_EMBEDDING_DIM, &DEFAULT_EMBEDDING_DIM.to_string())?
            .parse::<usize>()
            .map_err(|e| {
                Error::Config(format!("invalid {SETTING_EMBEDDING_DIM} setting: {e}"))
            })?;

        let tagger = match resolve_lexicon(lexicon, &db)? {
            Some(path) => {
                debug!(path = %path.display(), "using lexicon");
                TaggerManager::new(Box::new(LexiconLoader::new(&path)))
            }
            None => TaggerManager::unavailable(),
        };

        Self::new(
            cache,
            Preprocessor::new(tagger),
            Box::new(HashingEmbedder::new(dim)),
        )
        .with_store_db(db)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, DocumentStore>> {
        self.store
            .read()
            .map_err(|_| Error::LockPoisoned("document store"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, DocumentStore>> {
        self.store
            .write()
            .map_err(|_| Error::LockPoisoned("document store"))
    }

    fn preprocessor(&self) -> Result<MutexGuard<'_, Preprocessor>> {
        self.preprocessor
            .lock()
            .map_err(|_| Error::LockPoisoned("preprocessor"))
    }

    /// Preprocess (or fetch from the cache), embed and append documents.
    pub fn index(&self, request: &IndexRequest) -> Result<IndexReport> {
        let mut preprocessor = self.preprocessor()?;

        let names: Vec<&str> =
            request.documents.iter().map(|d| d.name.as_str()).collect();
        let (fingerprint, hit) = self.cache.lookup(&names);

        let cached = if hit && !request.reload_persisted {
            let entry = self.cache.load(&fingerprint)?;
            if entry.records.len() == request.documents.len() {
                Some(entry)
            } else {
                warn!(
                    cached = entry.records.len(),
                    requested = request.documents.len(),
                    "cached entry does not match the input set, preprocessing again"
                );
                None
            }
        } else {
            None
        };
        let cache_hit = cached.is_some();

        let entry = match cached {
            Some(entry) => entry,
            None => {
                preprocessor.prepare(request.tag, request.tagging_confidence)?;
                let records = request
                    .documents
                    .iter()
                    .map(|d| {
                        preprocessor.split_and_tag(
                            &d.text,
                            request.tag,
                            request.tagging_confidence,
                        )
                    })
                    .collect::<Result<Vec<_>>>()?;
                let entry = CacheEntry::new(records);
                self.cache.persist(&fingerprint, &entry)?;
                entry
            }
        };

        let mut documents: Vec<Document> = request
            .documents
            .iter()
            .zip(entry.records)
            .map(|(named, record)| {
                Document::from_sentences(
                    Some(named.name.clone()),
                    record.sentences,
                    record.tags,
                )
            })
            .collect();
        for document in &mut documents {
            embed_chunks(self.embedder.as_ref(), &mut document.chunks)?;
        }
        let chunks_added = documents.iter().map(|d| d.chunks.len()).sum();
        let documents_added = documents.len();

        let mut store = self.write()?;
        let slots = store.stage_append(documents, request.reload)?;
        if let Some(db) = &self.db {
            db.write(&StoreWrite {
                clear: request.reload,
                put: &slots,
                ..StoreWrite::default()
            })?;
        }
        if request.reload {
            store.clear();
        }
        store.install(slots);
        self.tag_index.invalidate()?;
        let total_documents = store.len();
        drop(store);

        info!(
            documents = documents_added,
            chunks = chunks_added,
            cache_hit,
            total = total_documents,
            "indexed documents"
        );
        Ok(IndexReport {
            fingerprint,
            cache_hit,
            documents_added,
            chunks_added,
            total_documents,
        })
    }

    /// Tag-filtered similarity search with context windows and optional
    /// document-level ranking.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        if request.top_k == 0 {
            return Ok(SearchResponse::new(Vec::new(), request.rank_by));
        }

        let query = self.embedder.embed(&request.query)?;
        let filters = TagFilter::from_maps(&request.filter_by_tags);
        let method = FilterMethod::from_name(&request.filter_by_tags_method);

        let matches = {
            let store = self.read()?;
            let candidates =
                self.tag_index.filtered_candidates(&store, &filters, method)?;
            matcher::search(
                &store,
                &query,
                &candidates,
                request.top_k,
                request.context_length,
            )
        };

        let views = match request.rank_by {
            Some(aggregation) => rank::aggregate(&matches, aggregation)
                .into_iter()
                .map(|d| MatchView::from_document_match(d, request.include_tags))
                .collect(),
            None => matches
                .into_iter()
                .map(|m| MatchView::from_match(m, request.include_tags))
                .collect(),
        };
        Ok(SearchResponse::new(views, request.rank_by))
    }

    /// Tag value counts over the given ids, or the whole store if empty.
    pub fn tags<S: AsRef<str>>(&self, doc_ids: &[S]) -> Result<TagsResponse> {
        let store = self.read()?;
        Ok(tag_counter::count_tags(&store, doc_ids)?.into())
    }

    /// Delete documents or chunks by id. An empty list does nothing.
    pub fn delete<S: AsRef<str>>(&self, ids: &[S]) -> Result<DeleteOutcome> {
        if ids.is_empty() {
            return Ok(DeleteOutcome::default());
        }

        let mut store = self.write()?;
        let (outcome, touched) = store.stage_delete(ids);
        if let Some(db) = &self.db
            && !outcome.is_empty()
        {
            db.write(&StoreWrite {
                remove: &outcome.documents,
                stale_chunks: &outcome.chunks,
                put: &touched,
                ..StoreWrite::default()
            })?;
        }
        store.commit_delete(&outcome, touched);
        Ok(outcome)
    }

    /// Replace a stored document by id. Returns `false` (and logs) when no
    /// such document exists.
    ///
    /// Chunks that keep their id keep their embedding; new chunks are
    /// embedded.
    pub fn update(&self, mut document: Document) -> Result<bool> {
        let mut store = self.write()?;

        let Some(existing) = store.get(&document.id) else {
            warn!(id = %document.id, "update of unknown document ignored");
            return Ok(false);
        };
        let previous: Vec<ChunkId> =
            existing.chunks.iter().map(|c| c.id.clone()).collect();
        for chunk in &mut document.chunks {
            if chunk.embedding.is_none()
                && let Some((parent, index)) = store.chunk(&chunk.id)
                && parent.id == document.id
            {
                chunk.embedding = parent.chunks[index].embedding.clone();
            }
        }
        embed_chunks(self.embedder.as_ref(), &mut document.chunks)?;

        let Some(slot) = store.stage_update(document)? else {
            return Ok(false);
        };
        if let Some(db) = &self.db {
            let stale: Vec<ChunkId> = previous
                .into_iter()
                .filter(|id| !slot.document.chunks.iter().any(|c| &c.id == id))
                .collect();
            db.put_slots(std::slice::from_ref(&slot), &stale)?;
        }
        store.commit_update(slot);
        Ok(true)
    }

    pub fn clear(&self) -> Result<()> {
        let mut store = self.write()?;
        if let Some(db) = &self.db {
            db.clear()?;
        }
        store.clear();
        self.tag_index.invalidate()?;
        info!("cleared document store");
        Ok(())
    }

    /// Number of documents in the store.
    pub fn length(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Copy stored embeddings onto the given documents' chunks.
    pub fn fill_embedding(&self, documents: &mut [Document]) -> Result<usize> {
        self.read()?.fill_embedding(documents)
    }

    /// A copy of a stored document.
    pub fn document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.get(id).cloned())
    }

    pub fn status(&self) -> Result<EngineStatus> {
        let (tagging_available, tagger_threshold) = {
            let preprocessor = self.preprocessor()?;
            (
                preprocessor.tagger().is_available(),
                preprocessor.tagger().threshold(),
            )
        };
        let store = self.read()?;
        Ok(EngineStatus {
            documents: store.len(),
            chunks: store.chunk_count(),
            embedder_id: self.embedder.id(),
            embedding_dim: self.embedder.dim(),
            persistent: self.db.is_some(),
            tagging_available,
            tagger_threshold,
            cached_tag_keys: self.tag_index.cached_keys()?,
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cache", &self.cache)
            .field("persistent", &self.db.is_some())
            .finish_non_exhaustive()
    }
}
