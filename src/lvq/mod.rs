//! Locally-Adaptive Vector Quantization: per-vector affine 8-bit
//! quantization after global-mean centering, plus the Turbo 64-byte-block
//! interleave.
//!
//! LVQ is not a standalone `CompressedVectors` scorer — it exposes an exact
//! reranking score function against packed storage instead.

mod turbo;

pub use turbo::{pack_turbo, unpack_turbo};

use crate::error::{Result, VqError};
use crate::io;

/// Global-mean-centering compressor. `global_mean` is computed once from a
/// full snapshot of vectors.
#[derive(Debug, Clone)]
pub struct LvqCompressor {
    pub global_mean: Vec<f32>,
}

impl LvqCompressor {
    pub fn dim(&self) -> usize {
        self.global_mean.len()
    }

    pub fn train(vectors: &dyn crate::vectors::RandomAccessVectorValues) -> Result<Self> {
        let n = vectors.len();
        if n == 0 {
            return Err(VqError::InvalidConfiguration(
                "cannot train LVQ on an empty snapshot".to_string(),
            ));
        }
        let dim = vectors.dimension();
        let mut mean = vec![0.0f32; dim];
        for i in 0..n {
            for (m, &v) in mean.iter_mut().zip(vectors.get(i)) {
                *m += v;
            }
        }
        for m in mean.iter_mut() {
            *m /= n as f32;
        }
        Ok(Self { global_mean: mean })
    }

    /// Encodes one vector into `(bytes, bias, scale)`, then Turbo-packs the
    /// bytes.
    pub fn encode(&self, vector: &[f32]) -> Result<LvqPackedVector> {
        if vector.len() != self.dim() {
            return Err(VqError::DimensionMismatch {
                expected: self.dim(),
                actual: vector.len(),
            });
        }
        let centered: Vec<f32> = vector.iter().zip(&self.global_mean).map(|(v, m)| v - m).collect();
        let min = centered.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = centered.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let scale = (max - min) / 255.0;
        let bias = min;

        let bytes: Vec<u8> = centered
            .iter()
            .map(|&v| {
                if scale <= 0.0 {
                    0u8
                } else {
                    (((v - bias) / scale).round().clamp(0.0, 255.0)) as u8
                }
            })
            .collect();

        Ok(LvqPackedVector {
            bias,
            scale,
            bytes: pack_turbo(&bytes),
            dim: self.dim(),
        })
    }

    /// Dequantizes a packed vector: `x[i] ~= bytes[i]*scale + bias + mean[i]`.
    pub fn decode(&self, packed: &LvqPackedVector) -> Vec<f32> {
        let unpacked = unpack_turbo(&packed.bytes, packed.dim);
        unpacked
            .iter()
            .zip(&self.global_mean)
            .map(|(&b, &m)| b as f32 * packed.scale + packed.bias + m)
            .collect()
    }

    pub fn write<W: std::io::Write>(&self, w: &mut W) -> Result<()> {
        io::write_u32(w, self.global_mean.len() as u32)?;
        io::write_f32_slice(w, &self.global_mean)?;
        Ok(())
    }

    pub fn load<R: std::io::Read>(r: &mut R) -> Result<Self> {
        let dim = io::read_checked_len(r)?;
        let global_mean = io::read_f32_vec(r, dim)?;
        Ok(Self { global_mean })
    }
}

/// `(bytes, bias, scale)` with `bytes` already in Turbo-permuted order.
#[derive(Debug, Clone)]
pub struct LvqPackedVector {
    pub bias: f32,
    pub scale: f32,
    pub bytes: Vec<u8>,
    pub dim: usize,
}

impl LvqPackedVector {
    pub fn write<W: std::io::Write>(&self, w: &mut W) -> Result<()> {
        io::write_f32(w, self.bias)?;
        io::write_f32(w, self.scale)?;
        w.write_all(&self.bytes)?;
        Ok(())
    }

    pub fn load<R: std::io::Read>(r: &mut R, dim: usize) -> Result<Self> {
        let bias = io::read_f32(r)?;
        let scale = io::read_f32(r)?;
        let packed_len = turbo::packed_len(dim);
        let mut bytes = vec![0u8; packed_len];
        r.read_exact(&mut bytes)?;
        Ok(Self { bias, scale, bytes, dim })
    }
}

/// Container of packed LVQ vectors sharing one compressor.
#[derive(Debug, Clone)]
pub struct LvqVectors {
    pub compressor: std::sync::Arc<LvqCompressor>,
    packed: Vec<LvqPackedVector>,
}

impl LvqVectors {
    pub fn encode_all(
        compressor: std::sync::Arc<LvqCompressor>,
        source: &dyn crate::vectors::RandomAccessVectorValues,
        pool: &rayon::ThreadPool,
    ) -> Result<Self> {
        use rayon::prelude::*;
        let n = source.len();
        let packed: Result<Vec<LvqPackedVector>> = pool.install(|| {
            (0..n)
                .into_par_iter()
                .map(|i| compressor.encode(source.get(i)))
                .collect()
        });
        let packed = packed?;
        tracing::debug!(count = packed.len(), "built LVQ container");
        Ok(Self { compressor, packed })
    }

    pub fn count(&self) -> usize {
        self.packed.len()
    }

    pub fn get(&self, ordinal: usize) -> &LvqPackedVector {
        &self.packed[ordinal]
    }

    /// Exact-score function for reranking against packed LVQ storage.
    pub fn score_fn<'a>(
        &'a self,
        query: &[f32],
        sim: crate::vectors::SimilarityFunction,
    ) -> Result<crate::vectors::ScoreFunction<'a>> {
        use crate::vectors::SimilarityFunction as Sim;
        if query.len() != self.compressor.dim() {
            return Err(VqError::DimensionMismatch {
                expected: self.compressor.dim(),
                actual: query.len(),
            });
        }
        match sim {
            Sim::DotProduct => {
                let query_sum: f32 = query.iter().sum();
                let query_global_bias: f32 =
                    query.iter().zip(&self.compressor.global_mean).map(|(a, b)| a * b).sum();
                Ok(Box::new(move |n: u32| {
                    let packed = self.get(n as usize);
                    let unpacked = unpack_turbo(&packed.bytes, packed.dim);
                    let dot: f32 = query.iter().zip(&unpacked).map(|(&q, &b)| q * b as f32).sum();
                    let lvq_dot = dot * packed.scale + packed.bias * query_sum + query_global_bias;
                    (1.0 + lvq_dot) / 2.0
                }))
            }
            Sim::Euclidean => {
                let q_shifted: Vec<f32> =
                    query.iter().zip(&self.compressor.global_mean).map(|(a, b)| a - b).collect();
                Ok(Box::new(move |n: u32| {
                    let packed = self.get(n as usize);
                    let unpacked = unpack_turbo(&packed.bytes, packed.dim);
                    let dist: f32 = q_shifted
                        .iter()
                        .zip(&unpacked)
                        .map(|(&q, &b)| {
                            let recon = b as f32 * packed.scale + packed.bias;
                            (q - recon) * (q - recon)
                        })
                        .sum();
                    1.0 / (1.0 + dist)
                }))
            }
            Sim::Cosine => {
                let query_norm: f32 = query.iter().map(|v| v * v).sum::<f32>().sqrt();
                Ok(Box::new(move |n: u32| {
                    let packed = self.get(n as usize);
                    let unpacked = unpack_turbo(&packed.bytes, packed.dim);
                    let mut dot = 0.0f32;
                    let mut vnorm = 0.0f32;
                    for (i, &b) in unpacked.iter().enumerate() {
                        let recon = b as f32 * packed.scale + packed.bias + self.compressor.global_mean[i];
                        dot += query[i] * recon;
                        vnorm += recon * recon;
                    }
                    let denom = query_norm * vnorm.sqrt();
                    if denom <= 0.0 {
                        0.5
                    } else {
                        (1.0 + dot / denom) / 2.0
                    }
                }))
            }
        }
    }

    pub fn write<W: std::io::Write>(&self, w: &mut W) -> Result<()> {
        self.compressor.write(w)?;
        io::write_u32(w, self.packed.len() as u32)?;
        for p in &self.packed {
            p.write(w)?;
        }
        Ok(())
    }

    pub fn load<R: std::io::Read>(r: &mut R) -> Result<Self> {
        let compressor = std::sync::Arc::new(LvqCompressor::load(r)?);
        let count = io::read_checked_len(r)?;
        let mut packed = Vec::with_capacity(count);
        for _ in 0..count {
            packed.push(LvqPackedVector::load(r, compressor.dim())?);
        }
        Ok(Self { compressor, packed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectors::InMemoryVectorValues;

    #[test]
    fn s3_scenario_from_spec() {
        // D=3, globalMean=[0,0,0], vector=[0, 0.5, 1]. bias=0, scale=1/255,
        // bytes=[0, 128, 255] (+-1).
        let compressor = LvqCompressor {
            global_mean: vec![0.0, 0.0, 0.0],
        };
        let packed = compressor.encode(&[0.0, 0.5, 1.0]).unwrap();
        assert_eq!(packed.bias, 0.0);
        assert!((packed.scale - 1.0 / 255.0).abs() < 1e-6);
        let unpacked = unpack_turbo(&packed.bytes, 3);
        assert_eq!(unpacked[0], 0);
        assert!((unpacked[1] as i32 - 128).abs() <= 1);
        assert_eq!(unpacked[2], 255);

        let decoded = compressor.decode(&packed);
        assert!((decoded[0]).abs() < 1e-6);
        assert!((decoded[1] - 128.0 / 255.0).abs() < 0.01);
        assert!((decoded[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mean_zero_centering_within_tolerance() {
        let mut data = Vec::new();
        for i in 0..2000 {
            let x = ((i as f32) * 0.0173).sin();
            data.push(vec![x, -x * 0.5, x * 2.0]);
        }
        let values = InMemoryVectorValues::new(3, data);
        let compressor = LvqCompressor::train(&values).unwrap();
        // Mean of (v - mean) over the training sample should be ~0.
        let n = values.len();
        let mut acc = vec![0.0f32; 3];
        for i in 0..n {
            for (a, (&v, &m)) in acc.iter_mut().zip(values.get(i).iter().zip(&compressor.global_mean)) {
                *a += v - m;
            }
        }
        for a in acc {
            assert!((a / n as f32).abs() < 1e-4);
        }
    }

    #[test]
    fn dot_score_self_preferred_in_expectation() {
        let mut data = Vec::new();
        for i in 0..64 {
            data.push(vec![
                (i as f32 * 0.1).sin(),
                (i as f32 * 0.2).cos(),
                (i as f32 * 0.3).sin(),
                (i as f32 * 0.4).cos(),
            ]);
        }
        let values = InMemoryVectorValues::new(4, data);
        let compressor = std::sync::Arc::new(LvqCompressor::train(&values).unwrap());
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let lvq = LvqVectors::encode_all(compressor, &values, &pool).unwrap();

        let mut wins = 0;
        let trials = 40;
        for t in 0..trials {
            let q = values.get(t);
            let mut score_fn = lvq.score_fn(q, crate::vectors::SimilarityFunction::DotProduct).unwrap();
            let self_score = score_fn(t as u32);
            let other = (t + 7) % values.len();
            if self_score >= score_fn(other as u32) {
                wins += 1;
            }
        }
        assert!(wins as f64 / trials as f64 >= 0.6, "wins={wins}/{trials}");
    }

    #[test]
    fn round_trips_through_write_load() {
        let mut data = Vec::new();
        for i in 0..70 {
            data.push(vec![i as f32, (i * 2) as f32, (i * 3) as f32]);
        }
        let values = InMemoryVectorValues::new(3, data);
        let compressor = std::sync::Arc::new(LvqCompressor::train(&values).unwrap());
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let lvq = LvqVectors::encode_all(compressor, &values, &pool).unwrap();

        let mut buf = Vec::new();
        lvq.write(&mut buf).unwrap();
        let loaded = LvqVectors::load(&mut &buf[..]).unwrap();
        assert_eq!(loaded.count(), lvq.count());
        for i in 0..lvq.count() {
            assert_eq!(loaded.get(i).bytes, lvq.get(i).bytes);
            assert_eq!(loaded.get(i).bias, lvq.get(i).bias);
            assert_eq!(loaded.get(i).scale, lvq.get(i).scale);
        }
    }
}
