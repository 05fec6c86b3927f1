use std::path::Path;

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::{
    document::{ChunkId, Document, DocumentId},
    error::Result,
    store::Slot,
};

const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");
const EMBEDDINGS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("embeddings");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Header size: 4 bytes embedding dimension.
const HEADER_SIZE: usize = 4;

pub const SETTING_EMBEDDER_ID: &str = "embedder_id";
pub const SETTING_EMBEDDING_DIM: &str = "embedding_dim";
pub const SETTING_LEXICON_PATH: &str = "lexicon_path";

#[derive(Serialize)]
struct StoredDocumentRef<'a> {
    seq: u64,
    document: &'a Document,
}

#[derive(Deserialize)]
struct StoredDocument {
    seq: u64,
    document: Document,
}

/// Durable mirror of the document store.
///
/// Documents are stored as JSON keyed by document id together with their
/// insertion sequence number. Chunk embeddings are stored separately, keyed
/// by chunk id, in this binary format:
/// - 4 bytes: embedding dimension D (u32 LE)
/// - D * 4 bytes: f32 LE values
pub struct StoreDb {
    db: Database,
    #[cfg(test)]
    fail_writes: std::sync::atomic::AtomicBool,
}

/// One atomic change to the stored documents.
///
/// Applied in order: clear, remove documents, drop stale chunk embeddings,
/// then write slots.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoreWrite<'a> {
    /// Drop every document and embedding first.
    pub clear: bool,
    pub remove: &'a [DocumentId],
    pub stale_chunks: &'a [ChunkId],
    pub put: &'a [Slot],
}

impl StoreWrite<'_> {
    pub fn is_empty(&self) -> bool {
        !self.clear
            && self.remove.is_empty()
            && self.stale_chunks.is_empty()
            && self.put.is_empty()
    }
}

impl StoreDb {
    /// Open or create a store database at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use chunkscope::StoreDb;
    ///
    /// let db = StoreDb::open(&tmp.path().join("store.redb")).unwrap();
    /// assert!(db.load_all().unwrap().is_empty());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(EMBEDDINGS)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self {
            db,
            #[cfg(test)]
            fail_writes: std::sync::atomic::AtomicBool::new(false),
        })
    }

    // -- Documents --

    /// Apply a whole change set in one write transaction.
    ///
    /// Either every part of the change is committed or none of it is.
    pub fn write(&self, change: &StoreWrite<'_>) -> Result<()> {
        if change.is_empty() {
            return Ok(());
        }
        #[cfg(test)]
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(std::io::Error::other("store writes disabled").into());
        }

        let txn = self.db.begin_write()?;
        if change.clear {
            txn.delete_table(DOCUMENTS)?;
            txn.delete_table(EMBEDDINGS)?;
        }
        {
            let mut documents = txn.open_table(DOCUMENTS)?;
            let mut embeddings = txn.open_table(EMBEDDINGS)?;

            for doc_id in change.remove {
                let chunk_ids: Vec<ChunkId> = match documents.remove(doc_id.as_str())? {
                    Some(guard) => {
                        let stored: StoredDocument =
                            serde_json::from_slice(guard.value())?;
                        stored.document.chunks.into_iter().map(|c| c.id).collect()
                    }
                    None => Vec::new(),
                };
                for chunk_id in &chunk_ids {
                    embeddings.remove(chunk_id.as_str())?;
                }
            }

            for chunk_id in change.stale_chunks {
                embeddings.remove(chunk_id.as_str())?;
            }

            for slot in change.put {
                let json = serde_json::to_vec(&StoredDocumentRef {
                    seq: slot.seq,
                    document: &slot.document,
                })?;
                documents.insert(slot.document.id.as_str(), json.as_slice())?;

                for chunk in &slot.document.chunks {
                    let Some(data) = &chunk.embedding else {
                        continue;
                    };
                    let byte_len = HEADER_SIZE + std::mem::size_of_val(data.as_slice());
                    let mut guard =
                        embeddings.insert_reserve(chunk.id.as_str(), byte_len)?;
                    let dest = guard.as_mut();

                    dest[0..4].copy_from_slice(&(data.len() as u32).to_le_bytes());
                    dest[HEADER_SIZE..].copy_from_slice(bytemuck::cast_slice(data));
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Write slots (and their chunk embeddings) in a single transaction.
    ///
    /// `stale_chunks` are embedding entries to drop in the same transaction,
    /// e.g. chunks a document update no longer contains.
    pub fn put_slots(&self, slots: &[Slot], stale_chunks: &[ChunkId]) -> Result<()> {
        self.write(&StoreWrite {
            put: slots,
            stale_chunks,
            ..StoreWrite::default()
        })
    }

    /// Remove whole documents and all of their chunk embeddings.
    pub fn remove_documents(&self, doc_ids: &[DocumentId]) -> Result<()> {
        self.write(&StoreWrite {
            remove: doc_ids,
            ..StoreWrite::default()
        })
    }

    /// Load every stored document, with embeddings attached, as store slots.
    pub fn load_all(&self) -> Result<Vec<Slot>> {
        let txn = self.db.begin_read()?;
        let documents = txn.open_table(DOCUMENTS)?;
        let embeddings = txn.open_table(EMBEDDINGS)?;

        let mut slots = Vec::new();
        for entry in documents.iter()? {
            let (_k, v) = entry?;
            let stored: StoredDocument = serde_json::from_slice(v.value())?;
            let mut document = stored.document;
            for chunk in &mut document.chunks {
                chunk.embedding = match embeddings.get(chunk.id.as_str())? {
                    Some(guard) => decode_embedding(guard.value()),
                    None => None,
                };
            }
            slots.push(Slot {
                seq: stored.seq,
                document,
            });
        }
        Ok(slots)
    }

    pub fn document_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        Ok(table.len()?)
    }

    /// Drop all documents and embeddings. Settings are kept.
    pub fn clear(&self) -> Result<()> {
        self.write(&StoreWrite {
            clear: true,
            ..StoreWrite::default()
        })
    }

    #[cfg(test)]
    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }
}

/// Decode an embedding blob; malformed entries are treated as absent.
fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    let header: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
    let dimension = u32::from_le_bytes(header) as usize;
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != dimension * 4 {
        return None;
    }
    // Values from redb are not guaranteed to be 4-byte aligned.
    Some(match bytemuck::try_cast_slice::<u8, f32>(payload) {
        Ok(values) => values.to_vec(),
        Err(_) => payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    })
}

impl std::fmt::Debug for StoreDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreDb").finish_non_exhaustive()
    }
}
