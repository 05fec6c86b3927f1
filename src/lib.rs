//! chunkscope - sentence-level semantic search over tagged documents.
//!
//! Documents are split into sentences (chunks), optionally tagged with
//! entity labels, embedded, and searched chunk by chunk. Each match comes
//! back with a context window of neighbouring sentences and can be rolled up
//! to a ranked list of parent documents. Preprocessing results are cached per
//! input set so re-indexing the same files skips splitting and tagging.
//!
//! # Quick start
//!
//! ```no_run
//! use chunkscope::{DataDir, Engine};
//! use chunkscope::api::{IndexRequest, NamedText, SearchRequest};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let engine = Engine::open(&data_dir, None).unwrap();
//!
//! engine
//!     .index(&IndexRequest::new(vec![NamedText::new(
//!         "report.txt",
//!         "Revenue grew in the third quarter. Margins held steady.",
//!     )]))
//!     .unwrap();
//!
//! let mut request = SearchRequest::new("quarterly revenue");
//! request.context_length = 1;
//! let response = engine.search(&request).unwrap();
//! for m in &response.matches {
//!     println!("{:.2} {}", m.score(), m.text());
//! }
//! ```

pub mod api;
pub mod content_cache;
pub mod data_dir;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod matcher;
pub mod mcp;
pub mod preprocess;
pub mod rank;
pub mod store;
pub mod store_db;
pub mod tag_counter;
pub mod tag_index;
pub mod tagger;

pub use content_cache::ContentCache;
pub use data_dir::DataDir;
pub use document::{Chunk, Document, Match};
pub use engine::Engine;
pub use error::{Error, Result};
pub use store::DocumentStore;
pub use store_db::StoreDb;
pub use tag_index::TagFilterIndex;
