//! Recommendation engine.
//!
//! Ties an encoder to a loaded corpus (vector index + metadata) and turns
//! free-text queries into ranked books.
//!
//! A `Recommender` never mutates after construction, so `recommend` takes
//! `&self` and can be called from many threads at once. The only
//! serialisation point is inside the encoder, if the model needs it.

use std::path::Path;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::books::{Book, MetadataError, MetadataStore};
use crate::semantic::embeddings::{EmbeddingError, Encoder};
use crate::semantic::index::{IndexError, VectorIndex};
use crate::semantic::preprocess::prepare_text;
use crate::semantic::storage::{VectorStorage, VectorStorageError};

/// Default cap on query length before encoding
const DEFAULT_MAX_INPUT_CHARS: usize = 2000;

/// Errors that can occur while loading a corpus or answering a query.
#[derive(Debug, thiserror::Error)]
pub enum RecommendError {
    #[error("Query is empty")]
    EmptyQuery,

    #[error("No index loaded")]
    IndexNotBuilt,

    #[error("Index holds {index} vectors but metadata has {metadata} rows")]
    MetadataMismatch { index: usize, metadata: usize },

    #[error("Metadata does not match the rows the index was built from")]
    MetadataDigestMismatch,

    #[error("Index was built with a different model than '{0}'")]
    ModelMismatch(String),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Storage error: {0}")]
    Storage(#[from] VectorStorageError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

/// A vector index together with the metadata rows it was built from.
///
/// Position `i` in the index is the book with id `i`; construction fails
/// if the two sides do not line up.
#[derive(Debug)]
pub struct Corpus {
    index: VectorIndex,
    metadata: MetadataStore,
    model_id: [u8; 32],
}

impl Corpus {
    pub fn new(
        index: VectorIndex,
        metadata: MetadataStore,
        model_id: [u8; 32],
    ) -> Result<Self, RecommendError> {
        if index.len() != metadata.len() {
            return Err(RecommendError::MetadataMismatch {
                index: index.len(),
                metadata: metadata.len(),
            });
        }

        Ok(Self {
            index,
            metadata,
            model_id,
        })
    }

    /// Load a persisted index/metadata pair.
    ///
    /// Checks that the index was built by the model with `expected_model_id`,
    /// that row counts agree, and that the metadata rows are the ones the
    /// index was built from.
    pub fn open(
        index_path: &Path,
        metadata_path: &Path,
        expected_model_id: &[u8; 32],
    ) -> Result<Self, RecommendError> {
        let stored = VectorStorage::new(index_path.to_path_buf()).load(expected_model_id)?;
        let metadata = MetadataStore::load(metadata_path)?;

        let corpus = Self::new(stored.index, metadata, stored.model_id)?;
        if corpus.metadata.digest() != stored.metadata_digest {
            return Err(RecommendError::MetadataDigestMismatch);
        }

        log::info!(
            "loaded {} books ({} dimensions) from {}",
            corpus.len(),
            corpus.index.dimensions(),
            index_path.display()
        );

        Ok(corpus)
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn model_id(&self) -> &[u8; 32] {
        &self.model_id
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    /// 1-based rank
    pub rank: usize,
    pub book: Book,
    pub distance: f32,
    pub similarity: f32,
}

/// Map an L2 distance to a score in (0, 1].
///
/// Strictly decreasing in distance and equal to 1 only for an exact match.
pub fn similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Preset moods, each backed by a fixed query.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Emotional,
    Dark,
    Adventurous,
    Romantic,
}

impl Mood {
    pub fn query(self) -> &'static str {
        match self {
            Mood::Happy => "uplifting joyful comedy",
            Mood::Emotional => "emotional drama relationships",
            Mood::Dark => "thriller horror mystery",
            Mood::Adventurous => "adventure fantasy exploration",
            Mood::Romantic => "love emotional romance",
        }
    }
}

pub struct Recommender {
    encoder: Arc<dyn Encoder>,
    corpus: Option<Corpus>,
    max_input_chars: usize,
}

impl Recommender {
    /// Create a recommender with no corpus. Queries fail with
    /// `IndexNotBuilt` until one is attached.
    pub fn new(encoder: Arc<dyn Encoder>) -> Self {
        Self {
            encoder,
            corpus: None,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }

    pub fn with_corpus(encoder: Arc<dyn Encoder>, corpus: Corpus) -> Result<Self, RecommendError> {
        let mut recommender = Self::new(encoder);
        recommender.attach(corpus)?;
        Ok(recommender)
    }

    /// Load the persisted pair and attach it.
    pub fn open(
        encoder: Arc<dyn Encoder>,
        index_path: &Path,
        metadata_path: &Path,
    ) -> Result<Self, RecommendError> {
        let corpus = Corpus::open(index_path, metadata_path, &encoder.model_id_hash())?;
        Self::with_corpus(encoder, corpus)
    }

    /// Texts longer than this are truncated before encoding.
    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars.max(1);
        self
    }

    /// Attach a corpus, replacing any previous one.
    pub fn attach(&mut self, corpus: Corpus) -> Result<(), RecommendError> {
        if *corpus.model_id() != self.encoder.model_id_hash() {
            return Err(RecommendError::ModelMismatch(
                self.encoder.model_name().to_string(),
            ));
        }

        if corpus.index().dimensions() != self.encoder.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: corpus.index().dimensions(),
                got: self.encoder.dimensions(),
            }
            .into());
        }

        self.corpus = Some(corpus);
        Ok(())
    }

    pub fn corpus(&self) -> Option<&Corpus> {
        self.corpus.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.corpus.is_some()
    }

    pub fn encoder(&self) -> &dyn Encoder {
        self.encoder.as_ref()
    }

    /// Books whose descriptions are closest to `query`, best first.
    ///
    /// `k` larger than the corpus is clamped to the corpus size.
    pub fn recommend(&self, query: &str, k: usize) -> Result<Vec<Recommendation>, RecommendError> {
        let corpus = self.corpus.as_ref().ok_or(RecommendError::IndexNotBuilt)?;

        let text = prepare_text(query, self.max_input_chars).ok_or(RecommendError::EmptyQuery)?;

        if k == 0 {
            return Err(IndexError::InvalidK(k).into());
        }
        let k = k.min(corpus.len());

        let query_vector = self.encoder.encode(&text)?;
        let hits = corpus.index().search(&query_vector, k)?;

        let mut recommendations = Vec::with_capacity(hits.len());
        for (idx, hit) in hits.into_iter().enumerate() {
            let book = corpus.metadata().get(hit.position as u64)?;
            recommendations.push(Recommendation {
                rank: idx + 1,
                book: book.clone(),
                distance: hit.distance,
                similarity: similarity(hit.distance),
            });
        }

        log::debug!(
            "query of {} chars returned {} recommendations",
            text.chars().count(),
            recommendations.len()
        );

        Ok(recommendations)
    }

    pub fn recommend_mood(
        &self,
        mood: Mood,
        k: usize,
    ) -> Result<Vec<Recommendation>, RecommendError> {
        self.recommend(mood.query(), k)
    }

    /// Up to `count` random books.
    pub fn surprise<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        count: usize,
    ) -> Result<Vec<Book>, RecommendError> {
        let corpus = self.corpus.as_ref().ok_or(RecommendError::IndexNotBuilt)?;
        Ok(corpus
            .metadata()
            .sample(rng, count)
            .into_iter()
            .cloned()
            .collect())
    }
}
