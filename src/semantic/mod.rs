//! Embedding-indexed similarity search over book descriptions.
//!
//! # Architecture
//!
//! - `embeddings`: `Encoder` capability and the fastembed-backed model
//! - `index`: In-memory exact k-NN index over L2 distance
//! - `storage`: Binary file I/O for vectors.bin persistence
//! - `preprocess`: Text normalisation shared by corpus and queries
//! - `builder`: Offline corpus build (parallel encode, index, persist)
//! - `engine`: Query-time recommender

pub mod builder;
pub mod embeddings;
pub mod engine;
mod index;
mod preprocess;
mod storage;

pub use builder::{build_corpus, persist, BuildError, BuildOptions};
pub use embeddings::{EmbeddingError, EmbeddingModel, Encoder};
pub use engine::{similarity, Corpus, Mood, RecommendError, Recommendation, Recommender};
pub use index::{l2_distance, IndexError, SearchResult, VectorIndex};
pub use preprocess::{prepare_text, truncate_chars};
pub use storage::{StoredIndex, VectorStorage, VectorStorageError};

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
