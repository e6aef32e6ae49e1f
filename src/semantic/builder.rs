//! Offline corpus build: encode every description, build the index and
//! write the index/metadata pair to disk.

use std::path::Path;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::books::{BookCreate, MetadataError, MetadataStore};
use crate::config::Config;
use crate::semantic::embeddings::{EmbeddingError, Encoder};
use crate::semantic::engine::{Corpus, RecommendError};
use crate::semantic::index::{IndexError, VectorIndex};
use crate::semantic::preprocess::prepare_text;
use crate::semantic::storage::{VectorStorage, VectorStorageError};

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Descriptions handed to the encoder per call
    pub batch_size: usize,
    /// Worker threads, `None` for one per core
    pub parallelism: Option<usize>,
    pub max_input_chars: usize,
    pub show_progress: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            parallelism: None,
            max_input_chars: 2000,
            show_progress: false,
        }
    }
}

impl From<&Config> for BuildOptions {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            parallelism: config.parallelism(),
            max_input_chars: config.max_input_chars,
            show_progress: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("No books to index")]
    EmptyCorpus,

    #[error("Book {0} has an empty description")]
    EmptyDescription(u64),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Storage error: {0}")]
    Storage(#[from] VectorStorageError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Corpus error: {0}")]
    Corpus(#[from] RecommendError),

    #[error("Failed to start embedding workers: {0}")]
    ThreadPool(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode `books` and build the index over them.
///
/// Ids are assigned by position. Descriptions are encoded in batches on a
/// worker pool; the batches are joined back in order before the index is
/// built, so the result does not depend on scheduling.
pub fn build_corpus(
    encoder: &dyn Encoder,
    books: Vec<BookCreate>,
    opts: &BuildOptions,
) -> Result<Corpus, BuildError> {
    let metadata = MetadataStore::from_books(books);
    if metadata.is_empty() {
        return Err(BuildError::EmptyCorpus);
    }

    let texts = metadata
        .iter()
        .map(|book| {
            prepare_text(&book.description, opts.max_input_chars)
                .ok_or(BuildError::EmptyDescription(book.id))
        })
        .collect::<Result<Vec<_>, _>>()?;

    log::info!(
        "encoding {} descriptions with '{}' ({} per batch)",
        texts.len(),
        encoder.model_name(),
        opts.batch_size
    );

    let now = Instant::now();
    let vectors = encode_all(encoder, &texts, opts)?;
    log::debug!(
        "took {}ms to encode corpus",
        now.elapsed().as_micros() as f64 / 1000.0
    );

    let expected = encoder.dimensions();
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            got: bad.len(),
        }
        .into());
    }

    let index = VectorIndex::build(vectors)?;
    log::info!(
        "built index with {} vectors of {} dimensions",
        index.len(),
        index.dimensions()
    );

    Ok(Corpus::new(index, metadata, encoder.model_id_hash())?)
}

fn encode_all(
    encoder: &dyn Encoder,
    texts: &[String],
    opts: &BuildOptions,
) -> Result<Vec<Vec<f32>>, BuildError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.parallelism.unwrap_or(0))
        .build()
        .map_err(|e| BuildError::ThreadPool(e.to_string()))?;

    let progress = if opts.show_progress {
        let bar = ProgressBar::new(texts.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} descriptions")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    let batches = pool.install(|| {
        texts
            .par_chunks(opts.batch_size.max(1))
            .map(|batch| {
                let vectors = encoder.encode_batch(batch)?;
                if vectors.len() != batch.len() {
                    return Err(EmbeddingError::EmbeddingFailed(format!(
                        "encoder returned {} vectors for {} texts",
                        vectors.len(),
                        batch.len()
                    )));
                }
                progress.inc(batch.len() as u64);
                Ok(vectors)
            })
            .collect::<Result<Vec<_>, EmbeddingError>>()
    })?;

    progress.finish_and_clear();

    Ok(batches.into_iter().flatten().collect())
}

/// Write the metadata file and the index file.
///
/// Both files are written and synced under temp names before either is
/// renamed into place, so a failed write leaves the previous pair intact.
/// The index header carries the metadata digest; if only the first rename
/// lands, the pair is rejected on load.
pub fn persist(
    corpus: &Corpus,
    index_path: &Path,
    metadata_path: &Path,
) -> Result<(), BuildError> {
    let metadata_temp = corpus.metadata().stage(metadata_path)?;

    let storage = VectorStorage::new(index_path.to_path_buf());
    let index_temp = match storage.stage(
        corpus.index(),
        corpus.model_id(),
        &corpus.metadata().digest(),
    ) {
        Ok(path) => path,
        Err(err) => {
            let _ = std::fs::remove_file(&metadata_temp);
            return Err(err.into());
        }
    };

    if let Err(err) = std::fs::rename(&metadata_temp, metadata_path) {
        let _ = std::fs::remove_file(&metadata_temp);
        let _ = std::fs::remove_file(&index_temp);
        return Err(err.into());
    }
    if let Err(err) = std::fs::rename(&index_temp, index_path) {
        let _ = std::fs::remove_file(&index_temp);
        return Err(err.into());
    }

    log::info!(
        "saved {} books to {} and {}",
        corpus.len(),
        metadata_path.display(),
        index_path.display()
    );

    Ok(())
}
