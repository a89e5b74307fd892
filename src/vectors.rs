//! Shared container-facing types: the external vector source trait, the
//! similarity enum, and the `CompressedVectors` trait every quantizer's
//! container implements so scoring code does not need to know which
//! quantizer produced the codes it is scoring.

use crate::error::Result;

/// External supplier of float vectors, indexed by dense ordinal. Analogous
/// to the codebase's `db::VectorStore` / `RandomAccessVectorValues` in other
/// ANN libraries — training and bulk-encode read through this, the core
/// never owns the raw float storage.
pub trait RandomAccessVectorValues: Send + Sync {
    fn dimension(&self) -> usize;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn get(&self, ordinal: usize) -> &[f32];
}

/// A plain in-memory implementation, used by tests and small callers.
#[derive(Debug, Clone)]
pub struct InMemoryVectorValues {
    dim: usize,
    data: Vec<Vec<f32>>,
}

impl InMemoryVectorValues {
    pub fn new(dim: usize, data: Vec<Vec<f32>>) -> Self {
        debug_assert!(data.iter().all(|v| v.len() == dim));
        Self { dim, data }
    }
}

impl RandomAccessVectorValues for InMemoryVectorValues {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn get(&self, ordinal: usize) -> &[f32] {
        &self.data[ordinal]
    }
}

/// Similarity function a query can be scored against. Named to match the
/// codebase's `models::DistanceMetric` convention (`Cosine | Euclidean |
/// DotProduct`) adapted to the ANN-score framing used here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimilarityFunction {
    DotProduct,
    Euclidean,
    Cosine,
}

/// A bound, per-query scoring closure. `FnMut` because the Quicker-ADC
/// variant mutates warm-up state across calls — two threads must not share
/// one of these.
pub type ScoreFunction<'a> = Box<dyn FnMut(u32) -> f32 + 'a>;

/// Unifies `get`/`count`/scoring across the four quantizer families so code
/// that only needs to score candidates does not need to match on which
/// quantizer produced them.
pub trait CompressedVectors: Send + Sync {
    fn count(&self) -> usize;

    /// Builds a `ScoreFunction` that precomputes per-query tables once and
    /// then answers each `score(ordinal)` call cheaply — the path to use
    /// when scoring many candidates against one query.
    fn precomputed_score_fn<'a>(
        &'a self,
        query: &[f32],
        sim: SimilarityFunction,
    ) -> Result<ScoreFunction<'a>>;

    /// Builds a scorer with no precomputation, appropriate for a handful of
    /// calls where building a full table would not pay for itself.
    fn score_fn<'a>(&'a self, query: &[f32], sim: SimilarityFunction) -> Result<ScoreFunction<'a>> {
        self.precomputed_score_fn(query, sim)
    }
}
