//! Fingerprint-keyed cache of preprocessed (sentence-split, tagged) input sets.
//!
//! The fingerprint is a SHA-512 over the concatenated *names* of the input
//! documents, in the order supplied. Content is not hashed: editing a file
//! without renaming it keeps the old fingerprint and yields a cache hit.
//!
//! Each entry lives in its own file, `<fingerprint>.json`, holding a JSON
//! array of `{ "sentences": [...], "tags": [...] }` records.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use sha2::{Digest, Sha512};
use tracing::debug;

use crate::{
    error::{Error, Result},
    preprocess::PreprocessedDocument,
};

/// Hex-encoded SHA-512 fingerprint of an input set.
pub type Fingerprint = String;

/// Preprocessed representation of one input set, one record per document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheEntry {
    pub records: Vec<PreprocessedDocument>,
}

impl CacheEntry {
    pub fn new(records: Vec<PreprocessedDocument>) -> Self {
        Self { records }
    }

    fn validate(&self, fingerprint: &str) -> Result<()> {
        for (i, record) in self.records.iter().enumerate() {
            if record.sentences.len() != record.tags.len() {
                return Err(Error::CorruptCache {
                    fingerprint: fingerprint.to_string(),
                    reason: format!(
                        "record {i} has {} sentences but {} tag maps",
                        record.sentences.len(),
                        record.tags.len()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Compute the fingerprint of an input set from its item names.
///
/// # Examples
///
/// ```
/// use chunkscope::content_cache::fingerprint;
///
/// let a = fingerprint(&["a.txt", "b.txt"]);
/// assert_eq!(a, fingerprint(&["a.txt", "b.txt"]));
/// assert_ne!(a, fingerprint(&["b.txt", "a.txt"]));
/// assert_eq!(a.len(), 128);
/// ```
pub fn fingerprint<S: AsRef<str>>(names: &[S]) -> Fingerprint {
    let mut hasher = Sha512::new();
    for name in names {
        hasher.update(name.as_ref().as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub struct ContentCache {
    dir: PathBuf,
    write_locks: Mutex<HashMap<Fingerprint, Arc<Mutex<()>>>>,
}

impl ContentCache {
    /// Open a cache rooted at `dir`, creating the directory if needed.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.json"))
    }

    /// Fingerprint an input set and report whether a persisted entry exists.
    pub fn lookup<S: AsRef<str>>(&self, names: &[S]) -> (Fingerprint, bool) {
        let fp = fingerprint(names);
        let hit = self.entry_path(&fp).is_file();
        debug!(fingerprint = %&fp[..16], hit, "content cache lookup");
        (fp, hit)
    }

    pub fn load(&self, fingerprint: &str) -> Result<CacheEntry> {
        let path = self.entry_path(fingerprint);
        let bytes = std::fs::read(&path)?;
        let records: Vec<PreprocessedDocument> = serde_json::from_slice(&bytes)?;
        let entry = CacheEntry::new(records);
        entry.validate(fingerprint)?;
        Ok(entry)
    }

    /// Write an entry, replacing any previous one for the same fingerprint.
    ///
    /// Writers for the same fingerprint are serialized; the file is written
    /// to a temporary sibling and renamed into place.
    pub fn persist(&self, fingerprint: &str, entry: &CacheEntry) -> Result<()> {
        entry.validate(fingerprint)?;

        let lock = {
            let mut locks = self.locks()?;
            Arc::clone(locks.entry(fingerprint.to_string()).or_default())
        };
        let written = match lock.lock() {
            Ok(_guard) => self.write_entry(fingerprint, entry),
            Err(_) => Err(Error::LockPoisoned("content cache entry")),
        };

        {
            let mut locks = self.locks()?;
            // The map and this call are the only holders: nobody is waiting.
            if Arc::strong_count(&lock) == 2 {
                locks.remove(fingerprint);
            }
        }
        written
    }

    fn locks(&self) -> Result<MutexGuard<'_, HashMap<Fingerprint, Arc<Mutex<()>>>>> {
        self.write_locks
            .lock()
            .map_err(|_| Error::LockPoisoned("content cache"))
    }

    fn write_entry(&self, fingerprint: &str, entry: &CacheEntry) -> Result<()> {
        let path = self.entry_path(fingerprint);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(&entry.records)?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;

        debug!(
            fingerprint = %&fingerprint[..fingerprint.len().min(16)],
            documents = entry.records.len(),
            "persisted preprocessed input set"
        );
        Ok(())
    }
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Tags;

    fn test_cache() -> (tempfile::TempDir, ContentCache) {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ContentCache::open(&tmp.path().join("cache")).unwrap();
        (tmp, cache)
    }

    fn sample_entry() -> CacheEntry {
        let mut org = Tags::new();
        org.insert("ORG".to_string(), "Acme Corp".to_string());
        CacheEntry::new(vec![
            PreprocessedDocument {
                sentences: vec![
                    "Acme Corp grew.".to_string(),
                    "Margins held.".to_string(),
                ],
                tags: vec![org, Tags::new()],
            },
            PreprocessedDocument {
                sentences: vec!["Second file.".to_string()],
                tags: vec![Tags::new()],
            },
        ])
    }

    #[test]
    fn fingerprint_depends_on_names_only() {
        assert_eq!(fingerprint(&["a", "b"]), fingerprint(&["a", "b"]));
        assert_ne!(fingerprint(&["a", "b"]), fingerprint(&["a", "c"]));
    }

    #[test]
    fn lookup_misses_then_hits() {
        let (_tmp, cache) = test_cache();
        let names = ["report.txt"];

        let (fp, hit) = cache.lookup(&names);
        assert!(!hit);

        cache.persist(&fp, &sample_entry()).unwrap();
        let (fp2, hit) = cache.lookup(&names);
        assert!(hit);
        assert_eq!(fp, fp2);
    }

    #[test]
    fn persist_then_load_roundtrip() {
        let (_tmp, cache) = test_cache();
        let fp = fingerprint(&["a.txt", "b.txt"]);
        let entry = sample_entry();

        cache.persist(&fp, &entry).unwrap();
        let loaded = cache.load(&fp).unwrap();

        assert_eq!(loaded, entry);
        for record in &loaded.records {
            assert_eq!(record.sentences.len(), record.tags.len());
        }
    }

    #[test]
    fn persisted_file_is_array_of_records() {
        let (tmp, cache) = test_cache();
        let fp = fingerprint(&["a.txt"]);
        cache.persist(&fp, &sample_entry()).unwrap();

        let raw = std::fs::read_to_string(
            tmp.path().join("cache").join(format!("{fp}.json")),
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let records = value.as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].get("sentences").is_some());
        assert!(records[0].get("tags").is_some());
    }

    #[test]
    fn persist_overwrites() {
        let (_tmp, cache) = test_cache();
        let fp = fingerprint(&["a.txt"]);
        cache.persist(&fp, &sample_entry()).unwrap();

        let replacement = CacheEntry::new(vec![PreprocessedDocument {
            sentences: vec!["Only one.".to_string()],
            tags: vec![Tags::new()],
        }]);
        cache.persist(&fp, &replacement).unwrap();

        assert_eq!(cache.load(&fp).unwrap(), replacement);
    }

    #[test]
    fn load_missing_is_io_error() {
        let (_tmp, cache) = test_cache();
        let err = cache.load("deadbeef").unwrap_err();
        assert!(
            matches!(&err, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound),
            "{err:?}"
        );
    }

    #[test]
    fn write_locks_are_released() {
        let (_tmp, cache) = test_cache();
        let fps: Vec<_> = (0..4).map(|i| fingerprint(&[format!("doc-{i}")])).collect();

        std::thread::scope(|scope| {
            for _ in 0..3 {
                scope.spawn(|| {
                    for fp in &fps {
                        cache.persist(fp, &sample_entry()).unwrap();
                    }
                });
            }
        });

        assert!(cache.write_locks.lock().unwrap().is_empty());
        for fp in &fps {
            assert_eq!(cache.load(fp).unwrap(), sample_entry());
        }
    }

    #[test]
    fn misaligned_entry_is_rejected() {
        let (tmp, cache) = test_cache();
        let fp = fingerprint(&["bad.txt"]);
        std::fs::write(
            tmp.path().join("cache").join(format!("{fp}.json")),
            r#"[{"sentences": ["a", "b"], "tags": [{}]}]"#,
        )
        .unwrap();

        let err = cache.load(&fp).unwrap_err();
        assert!(matches!(err, Error::CorruptCache { .. }));
    }
}
