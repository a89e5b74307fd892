//! Vector compression core: Product Quantization, Binary Quantization, LVQ-8
//! with Turbo packing, and NVQ with Kumaraswamy warp, plus the shared
//! k-means++ clusterer and xNES optimizer that train them.
//!
//! Every quantizer trains against a caller-supplied [`vectors::RandomAccessVectorValues`]
//! sample, encodes into a family-specific container, and exposes query-time
//! scoring through the shared [`vectors::CompressedVectors`] trait so callers
//! that only need to rank candidates never have to match on which quantizer
//! produced them.

pub mod bq;
pub mod error;
mod io;
pub mod kmeans;
pub mod lvq;
mod math;
pub mod nvq;
pub mod partition;
pub mod pq;
pub mod vectors;
pub mod xnes;

pub use error::{Result, VqError};
pub use math::{ScalarVectorMath, VectorMath};
pub use vectors::{CompressedVectors, InMemoryVectorValues, RandomAccessVectorValues, ScoreFunction, SimilarityFunction};

pub use bq::{BqCompressor, BqVectors};
pub use kmeans::{kmeans_pp, kmeans_refine, KMeansResult};
pub use lvq::{LvqCompressor, LvqPackedVector, LvqVectors};
pub use nvq::{NvqCompressor, NvqParams, NvqSubvector, NvqVector, NvqVectors};
pub use partition::SubspacePartition;
pub use pq::{MutablePqVectors, PqCompressor, PqParams, PqVectors, QuickerAdcDecoder};
pub use xnes::{Bounds, Xnes, XnesResult};

/// Crate version string, derived from the package manifest at build time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::sync::Arc;

    fn ring_vectors(n: usize, dim: usize) -> InMemoryVectorValues {
        let mut data = Vec::with_capacity(n);
        for i in 0..n {
            let t = i as f32 * 0.37;
            data.push((0..dim).map(|d| (t + d as f32 * 0.11).sin()).collect());
        }
        InMemoryVectorValues::new(dim, data)
    }

    /// Every quantizer family must be reachable purely through the crate's
    /// public surface and score within the documented [0,1] range.
    #[test]
    fn all_quantizer_families_score_in_unit_interval() {
        let values = ring_vectors(64, 16);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(100);
        let pq_params = PqParams {
            m: 4,
            k: 16,
            lloyd_iters: 8,
            globally_center: true,
            train_sample_cap: 1_000,
        };
        let pq = Arc::new(PqCompressor::train(&values, &pq_params, &mut rng).unwrap());
        let pqv = PqVectors::encode_all(pq, &values, &pool).unwrap();

        let bq = Arc::new(BqCompressor::train(values.dimension()).unwrap());
        let bqv = BqVectors::encode_all(bq, &values, &pool).unwrap();

        let lvq = Arc::new(LvqCompressor::train(&values).unwrap());
        let lvqv = LvqVectors::encode_all(lvq, &values, &pool).unwrap();

        let nvq_params = NvqParams {
            m: 4,
            bits: 8,
            learn: false,
            xnes_max_iters: 10,
        };
        let nvq = Arc::new(NvqCompressor::train(&values, &nvq_params).unwrap());
        let nvqv = NvqVectors::encode_all(nvq, &values, false, 10, &pool, 42).unwrap();

        let query = values.get(0);
        for sim in [SimilarityFunction::DotProduct, SimilarityFunction::Euclidean] {
            let mut pq_score = pqv.precomputed_score_fn(query, sim).unwrap();
            let mut bq_score = bqv.precomputed_score_fn(query, sim).unwrap();
            let mut nvq_score = nvqv.precomputed_score_fn(query, sim).unwrap();
            for n in 0..8u32 {
                assert!((0.0..=1.0).contains(&pq_score(n)), "pq sim={sim:?} n={n}");
                assert!((0.0..=1.0).contains(&bq_score(n)), "bq sim={sim:?} n={n}");
                assert!((0.0..=1.0).contains(&nvq_score(n)), "nvq sim={sim:?} n={n}");
            }
        }

        // LVQ scores via the dedicated rerank function rather than CompressedVectors.
        let mut lvq_score = lvqv.score_fn(query, SimilarityFunction::DotProduct).unwrap();
        for n in 0..8u32 {
            assert!(lvq_score(n).is_finite());
        }
    }

    /// A dimension mismatch must surface as `VqError::DimensionMismatch`
    /// regardless of which quantizer family is asked.
    #[test]
    fn dimension_mismatch_is_reported_consistently() {
        let values = ring_vectors(32, 8);
        let mut rng = ChaCha8Rng::seed_from_u64(101);
        let params = PqParams {
            m: 2,
            k: 8,
            lloyd_iters: 4,
            globally_center: false,
            train_sample_cap: 1_000,
        };
        let pq = PqCompressor::train(&values, &params, &mut rng).unwrap();
        let err = pq.encode(&[0.0f32; 4]).unwrap_err();
        assert!(matches!(err, VqError::DimensionMismatch { expected: 8, actual: 4 }));
    }
}
