//! Binary Quantization: 1-bit-per-dimension sign encoding and Hamming
//! similarity. The legacy writer serialized a zero-vector "center" purely
//! for on-disk compatibility; new writes still emit it (it costs nothing)
//! but it carries no semantic weight — `load` accepts it and discards it.

use std::sync::Arc;

use crate::error::{Result, VqError};
use crate::io;
use crate::math::{ScalarVectorMath, VectorMath};
use crate::vectors::{CompressedVectors, RandomAccessVectorValues, ScoreFunction, SimilarityFunction};

fn words_per_vector(dim: usize) -> usize {
    (dim + 63) / 64
}

/// A trained (trivially, BQ has no learned parameters beyond `dim`) BQ
/// compressor.
#[derive(Debug, Clone)]
pub struct BqCompressor {
    pub dim: usize,
}

impl BqCompressor {
    pub fn train(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(VqError::InvalidConfiguration(
                "dimension must be positive".to_string(),
            ));
        }
        Ok(Self { dim })
    }

    /// Packs one u64 per 64-component chunk; bit `j` of word `i` is 1 iff
    /// component `64i+j` is strictly positive.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u64>> {
        if vector.len() != self.dim {
            return Err(VqError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        let mut words = vec![0u64; words_per_vector(self.dim)];
        for (i, &v) in vector.iter().enumerate() {
            if v > 0.0 {
                words[i / 64] |= 1u64 << (i % 64);
            }
        }
        Ok(words)
    }

    pub fn write<W: std::io::Write>(&self, w: &mut W) -> Result<()> {
        io::write_u32(w, self.dim as u32)?;
        // Legacy compatibility placeholder: a zero vector where older
        // formats stored a now-unused "center".
        io::write_f32_slice(w, &vec![0.0f32; self.dim])?;
        Ok(())
    }

    pub fn load<R: std::io::Read>(r: &mut R) -> Result<Self> {
        let dim = io::read_checked_len(r)?;
        if dim == 0 {
            return Err(VqError::CorruptedStream("BQ dimension is zero".to_string()));
        }
        let _legacy_center = io::read_f32_vec(r, dim)?;
        Ok(Self { dim })
    }
}

/// Container of BQ codes: `ceil(D/64)` u64 words per vector.
#[derive(Debug, Clone)]
pub struct BqVectors {
    pub compressor: Arc<BqCompressor>,
    words: Vec<u64>,
    words_per_vector: usize,
    count: usize,
}

impl BqVectors {
    pub fn new(compressor: Arc<BqCompressor>) -> Self {
        let words_per_vector = words_per_vector(compressor.dim);
        Self {
            compressor,
            words: Vec::new(),
            words_per_vector,
            count: 0,
        }
    }

    pub fn encode_all(
        compressor: Arc<BqCompressor>,
        source: &dyn RandomAccessVectorValues,
        pool: &rayon::ThreadPool,
    ) -> Result<Self> {
        use rayon::prelude::*;
        let n = source.len();
        let wpv = words_per_vector(compressor.dim);
        let results: Result<Vec<Vec<u64>>> = pool.install(|| {
            (0..n)
                .into_par_iter()
                .map(|i| compressor.encode(source.get(i)))
                .collect()
        });
        let results = results?;
        let mut words = Vec::with_capacity(n * wpv);
        for r in results {
            words.extend(r);
        }
        tracing::debug!(count = n, words_per_vector = wpv, "built BQ container");
        Ok(Self {
            compressor,
            words,
            words_per_vector: wpv,
            count: n,
        })
    }

    pub fn get(&self, ordinal: usize) -> &[u64] {
        let w = self.words_per_vector;
        &self.words[ordinal * w..(ordinal + 1) * w]
    }

    pub fn write<W: std::io::Write>(&self, w: &mut W) -> Result<()> {
        self.compressor.write(w)?;
        io::write_u32(w, self.count as u32)?;
        io::write_u32(w, self.words_per_vector as u32)?;
        for &word in &self.words {
            io::write_u64(w, word)?;
        }
        Ok(())
    }

    pub fn load<R: std::io::Read>(r: &mut R) -> Result<Self> {
        let compressor = Arc::new(BqCompressor::load(r)?);
        let count = io::read_checked_len(r)?;
        let words_per_vector = io::read_checked_len(r)?;
        let expected = words_per_vector_for(&compressor);
        if words_per_vector != expected {
            return Err(VqError::CorruptedStream(format!(
                "BQ words-per-vector {words_per_vector} does not match dimension-derived {expected}"
            )));
        }
        let mut words = Vec::with_capacity(count * words_per_vector);
        for _ in 0..count * words_per_vector {
            words.push(io::read_u64(r)?);
        }
        Ok(Self {
            compressor,
            words,
            words_per_vector,
            count,
        })
    }
}

fn words_per_vector_for(compressor: &BqCompressor) -> usize {
    words_per_vector(compressor.dim)
}

impl CompressedVectors for BqVectors {
    fn count(&self) -> usize {
        self.count
    }

    fn precomputed_score_fn<'a>(
        &'a self,
        query: &[f32],
        sim: SimilarityFunction,
    ) -> Result<ScoreFunction<'a>> {
        // BQ only supports a Hamming-compatible score; both dot-product and
        // euclidean map onto it, cosine is rejected.
        if sim == SimilarityFunction::Cosine {
            return Err(VqError::UnsupportedCombination(
                "BQ does not support cosine similarity".to_string(),
            ));
        }
        let query_code = self.compressor.encode(query)?;
        let math = ScalarVectorMath;
        // Normalize by the true dimension, not the word-padded `W*64`: both
        // codes are zero past `D`, so padding bits never contribute to the
        // Hamming distance, but they would still dilute the score if counted.
        let dim = self.compressor.dim as f32;
        Ok(Box::new(move |n: u32| {
            let v = self.get(n as usize);
            let dist = math.hamming(&query_code, v);
            1.0 - dist as f32 / dim
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectors::InMemoryVectorValues;

    #[test]
    fn s1_scenario_from_spec() {
        // D=8: v = all-ones, u = alternating signs. BQ codes differ in 4 of
        // 8 bits -> score 0.5; hamming(v,v)=0 -> score 1.
        let compressor = Arc::new(BqCompressor::train(8).unwrap());
        let v = vec![1.0f32; 8];
        let u = vec![1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let values = InMemoryVectorValues::new(8, vec![v.clone(), u.clone()]);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let bqv = BqVectors::encode_all(compressor, &values, &pool).unwrap();

        let mut score_vv = bqv.precomputed_score_fn(&v, SimilarityFunction::DotProduct).unwrap();
        assert_eq!(score_vv(0), 1.0);

        let mut score_vu = bqv.precomputed_score_fn(&v, SimilarityFunction::DotProduct).unwrap();
        assert_eq!(score_vu(1), 0.5);
    }

    #[test]
    fn rejects_cosine() {
        let compressor = Arc::new(BqCompressor::train(8).unwrap());
        let values = InMemoryVectorValues::new(8, vec![vec![1.0; 8]]);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let bqv = BqVectors::encode_all(compressor, &values, &pool).unwrap();
        assert!(matches!(
            bqv.precomputed_score_fn(&vec![1.0; 8], SimilarityFunction::Cosine),
            Err(VqError::UnsupportedCombination(_))
        ));
    }

    #[test]
    fn code_length_matches_ceil_dim_over_64() {
        let compressor = BqCompressor::train(130).unwrap();
        let code = compressor.encode(&vec![1.0; 130]).unwrap();
        assert_eq!(code.len(), 3); // ceil(130/64) = 3
    }

    #[test]
    fn round_trips_legacy_padding() {
        let compressor = Arc::new(BqCompressor::train(16).unwrap());
        let values = InMemoryVectorValues::new(
            16,
            vec![vec![1.0; 16], vec![-1.0; 16]],
        );
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let bqv = BqVectors::encode_all(compressor, &values, &pool).unwrap();
        let mut buf = Vec::new();
        bqv.write(&mut buf).unwrap();
        let loaded = BqVectors::load(&mut &buf[..]).unwrap();
        assert_eq!(loaded.count(), bqv.count());
        assert_eq!(loaded.get(0), bqv.get(0));
        assert_eq!(loaded.get(1), bqv.get(1));
    }
}
