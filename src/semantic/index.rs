//! Exact nearest-neighbour index over Euclidean (L2) distance.
//!
//! Vectors are stored in build order; position `i` is the id of the i-th
//! book in the accompanying metadata. Search is brute force over every
//! stored vector, which is exact and fast enough for a few hundred books.

/// In-memory vector index, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    /// Row-major storage, `len() * dimensions` floats
    data: Vec<f32>,
    /// Embedding dimensions shared by every vector
    dimensions: usize,
}

/// A single search hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    /// Position in the index (and id of the book)
    pub position: usize,
    /// Euclidean distance to the query, always >= 0
    pub distance: f32,
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot build an index from zero vectors")]
    EmptyCorpus,

    #[error("Invalid result count {0}: must be at least 1")]
    InvalidK(usize),
}

impl VectorIndex {
    /// Build an index from an ordered set of vectors.
    ///
    /// All vectors must share the dimension of the first one, and there must
    /// be at least one vector with at least one component.
    pub fn build(vectors: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        let dimensions = vectors.first().ok_or(IndexError::EmptyCorpus)?.len();
        if dimensions == 0 {
            return Err(IndexError::DimensionMismatch {
                expected: 1,
                got: 0,
            });
        }

        let mut data = Vec::with_capacity(vectors.len() * dimensions);
        for vector in vectors {
            if vector.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    got: vector.len(),
                });
            }
            data.extend(vector);
        }

        Ok(Self { data, dimensions })
    }

    /// Rebuild from raw row-major storage. Used by the storage layer, which
    /// has already validated the layout.
    pub(crate) fn from_raw(data: Vec<f32>, dimensions: usize) -> Self {
        debug_assert!(dimensions > 0 && data.len() % dimensions == 0);
        Self { data, dimensions }
    }

    /// Get the embedding dimensions.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Get the number of vectors in the index.
    pub fn len(&self) -> usize {
        self.data.len() / self.dimensions
    }

    /// Always false for a built index; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Vector stored at `position`.
    pub fn get(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimensions)?;
        self.data.get(start..start + self.dimensions)
    }

    /// Iterate over all vectors in position order.
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimensions)
    }

    /// Find the `k` nearest vectors to `query`.
    ///
    /// Returns `min(k, len())` results sorted by ascending distance; equal
    /// distances are ordered by ascending position.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidK(k));
        }
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let mut results: Vec<SearchResult> = self
            .iter()
            .enumerate()
            .map(|(position, vector)| SearchResult {
                position,
                distance: l2_distance(query, vector),
            })
            .collect();

        results.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.position.cmp(&b.position))
        });
        results.truncate(k);

        Ok(results)
    }
}

/// Euclidean distance between two vectors of equal length.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}
