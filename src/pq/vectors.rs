//! `PQVectors`: packed code store plus the three standard (non-fused) PQ
//! scorers.

use std::sync::Arc;

use crate::error::{Result, VqError};
use crate::io;
use crate::pq::compressor::PqCompressor;
use crate::vectors::{CompressedVectors, ScoreFunction, SimilarityFunction};

/// Read-only container of PQ codes, `M` bytes per vector, sharing one
/// read-only compressor.
#[derive(Debug, Clone)]
pub struct PqVectors {
    pub compressor: Arc<PqCompressor>,
    codes: Vec<u8>,
    count: usize,
}

impl PqVectors {
    pub fn new(compressor: Arc<PqCompressor>) -> Self {
        Self {
            compressor,
            codes: Vec::new(),
            count: 0,
        }
    }

    pub fn encode_all(
        compressor: Arc<PqCompressor>,
        source: &dyn crate::vectors::RandomAccessVectorValues,
        pool: &rayon::ThreadPool,
    ) -> Result<Self> {
        use rayon::prelude::*;
        let n = source.len();
        let m = compressor.m();
        let results: Result<Vec<Vec<u8>>> = pool.install(|| {
            (0..n)
                .into_par_iter()
                .map(|i| compressor.encode(source.get(i)))
                .collect()
        });
        let results = results?;
        let mut codes = Vec::with_capacity(n * m);
        for r in results {
            codes.extend(r);
        }
        tracing::debug!(count = n, m, "built PQ container");
        Ok(Self {
            compressor,
            codes,
            count: n,
        })
    }

    pub fn get(&self, ordinal: usize) -> &[u8] {
        let m = self.compressor.m();
        &self.codes[ordinal * m..(ordinal + 1) * m]
    }

    fn centered_query(&self, query: &[f32]) -> Result<Vec<f32>> {
        if query.len() != self.compressor.dim() {
            return Err(VqError::DimensionMismatch {
                expected: self.compressor.dim(),
                actual: query.len(),
            });
        }
        Ok(match &self.compressor.global_centroid {
            Some(gc) => query.iter().zip(gc).map(|(a, b)| a - b).collect(),
            None => query.to_vec(),
        })
    }

    pub fn write<W: std::io::Write>(&self, w: &mut W) -> Result<()> {
        self.compressor.write(w)?;
        io::write_u32(w, self.count as u32)?;
        io::write_u32(w, self.compressor.m() as u32)?;
        w.write_all(&self.codes)?;
        Ok(())
    }

    pub fn load<R: std::io::Read>(r: &mut R) -> Result<Self> {
        let compressor = Arc::new(PqCompressor::load(r)?);
        let count = io::read_checked_len(r)?;
        let m = io::read_checked_len(r)?;
        if m != compressor.m() {
            return Err(VqError::CorruptedStream(format!(
                "PQ container M {m} does not match compressor M {}",
                compressor.m()
            )));
        }
        let mut codes = vec![0u8; count * m];
        r.read_exact(&mut codes)?;
        Ok(Self {
            compressor,
            codes,
            count,
        })
    }
}

impl CompressedVectors for PqVectors {
    fn count(&self) -> usize {
        self.count
    }

    fn precomputed_score_fn<'a>(
        &'a self,
        query: &[f32],
        sim: SimilarityFunction,
    ) -> Result<ScoreFunction<'a>> {
        let qc = self.centered_query(query)?;
        let k = self.compressor.k;

        match sim {
            SimilarityFunction::DotProduct => {
                let table = build_dot_table(&self.compressor, &qc);
                Ok(Box::new(move |n: u32| {
                    let code = self.get(n as usize);
                    let mut sum = 0.0f32;
                    for (sub, &c) in code.iter().enumerate() {
                        sum += table[sub * k + c as usize];
                    }
                    (1.0 + sum) / 2.0
                }))
            }
            SimilarityFunction::Euclidean => {
                let table = build_l2_table(&self.compressor, &qc);
                Ok(Box::new(move |n: u32| {
                    let code = self.get(n as usize);
                    let mut sum = 0.0f32;
                    for (sub, &c) in code.iter().enumerate() {
                        sum += table[sub * k + c as usize];
                    }
                    1.0 / (1.0 + sum)
                }))
            }
            SimilarityFunction::Cosine => {
                let dot_table = build_dot_table(&self.compressor, &qc);
                let mag_table = build_centroid_mag_table(&self.compressor);
                let b_mag: f32 = qc.iter().map(|v| v * v).sum();
                Ok(Box::new(move |n: u32| {
                    let code = self.get(n as usize);
                    let mut sum = 0.0f32;
                    let mut a_mag = 0.0f32;
                    for (sub, &c) in code.iter().enumerate() {
                        sum += dot_table[sub * k + c as usize];
                        a_mag += mag_table[sub * k + c as usize];
                    }
                    let denom = (a_mag * b_mag).sqrt();
                    if denom <= 0.0 {
                        0.5
                    } else {
                        (1.0 + sum / denom) / 2.0
                    }
                }))
            }
        }
    }
}

/// `table[m*K+c] = dot(slice(q, m), centroid(m, c))`.
fn build_dot_table(compressor: &PqCompressor, q: &[f32]) -> Vec<f32> {
    let k = compressor.k;
    let mut table = vec![0.0f32; compressor.m() * k];
    for m in 0..compressor.m() {
        let slice = compressor.partition.slice(q, m);
        for c in 0..k {
            let centroid = compressor.centroid(m, c);
            table[m * k + c] = slice.iter().zip(centroid).map(|(a, b)| a * b).sum();
        }
    }
    table
}

/// `table[m*K+c] = squared L2 distance between slice(q,m) and centroid(m,c)`.
fn build_l2_table(compressor: &PqCompressor, q: &[f32]) -> Vec<f32> {
    let k = compressor.k;
    let mut table = vec![0.0f32; compressor.m() * k];
    for m in 0..compressor.m() {
        let slice = compressor.partition.slice(q, m);
        for c in 0..k {
            let centroid = compressor.centroid(m, c);
            table[m * k + c] = slice
                .iter()
                .zip(centroid)
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
        }
    }
    table
}

/// `table[m*K+c] = ||centroid(m,c)||^2`, independent of the query.
fn build_centroid_mag_table(compressor: &PqCompressor) -> Vec<f32> {
    let k = compressor.k;
    let mut table = vec![0.0f32; compressor.m() * k];
    for m in 0..compressor.m() {
        for c in 0..k {
            let centroid = compressor.centroid(m, c);
            table[m * k + c] = centroid.iter().map(|v| v * v).sum();
        }
    }
    table
}

/// Mutable variant permitting `set`/`set_zero` with dense ordinals.
#[derive(Debug, Clone)]
pub struct MutablePqVectors {
    inner: PqVectors,
}

impl MutablePqVectors {
    pub fn new(compressor: Arc<PqCompressor>) -> Self {
        Self {
            inner: PqVectors::new(compressor),
        }
    }

    pub fn encode_and_set(&mut self, ordinal: usize, vector: &[f32]) -> Result<()> {
        let code = self.inner.compressor.encode(vector)?;
        self.ensure_capacity(ordinal);
        let m = self.inner.compressor.m();
        self.inner.codes[ordinal * m..(ordinal + 1) * m].copy_from_slice(&code);
        Ok(())
    }

    pub fn set_zero(&mut self, ordinal: usize) {
        self.ensure_capacity(ordinal);
        let m = self.inner.compressor.m();
        self.inner.codes[ordinal * m..(ordinal + 1) * m].fill(0);
    }

    fn ensure_capacity(&mut self, ordinal: usize) {
        let m = self.inner.compressor.m();
        if ordinal >= self.inner.count {
            self.inner.count = ordinal + 1;
            self.inner.codes.resize(self.inner.count * m, 0);
        }
    }

    pub fn as_pq_vectors(&self) -> &PqVectors {
        &self.inner
    }
}
