//! Non-uniform Vector Quantization: per-subvector Kumaraswamy warp + 4/8-bit
//! quantization, with per-subvector dot/L2/cosine scoring.

mod warp;

use std::io::{Read, Write};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VqError};
use crate::io as wio;
use crate::partition::SubspacePartition;
use crate::vectors::{CompressedVectors, RandomAccessVectorValues, ScoreFunction, SimilarityFunction};
use crate::xnes::{Bounds, Xnes};
use warp::{dequantize_uniform, kumaraswamy_forward, kumaraswamy_inverse, pack_levels, quantize_uniform, unpack_levels};

const MAGIC: u32 = 0x75EC4012;
const CURRENT_VERSION: u32 = 3;

/// One subvector's warp + quantization parameters and packed bytes.
#[derive(Debug, Clone)]
pub struct NvqSubvector {
    pub bits: u8,
    pub bias: f32,
    pub scale: f32,
    pub a: f64,
    pub b: f64,
    pub original_len: usize,
    pub bytes: Vec<u8>,
}

impl NvqSubvector {
    pub fn dequantize(&self) -> Vec<f32> {
        let levels = unpack_levels(&self.bytes, self.bits, self.original_len);
        levels
            .iter()
            .map(|&level| {
                let y = dequantize_uniform(level, self.bits);
                let u = kumaraswamy_inverse(y, self.a, self.b);
                u * self.scale + self.bias
            })
            .collect()
    }
}

fn fit_loss(slice: &[f32], bias: f32, scale: f32, bits: u8, a: f64, b: f64) -> f64 {
    let mut loss = 0.0f64;
    for &s in slice {
        let u = if scale > 0.0 { (s - bias) / scale } else { 0.0 };
        let y = kumaraswamy_forward(u, a, b);
        let level = quantize_uniform(y, bits);
        let y_hat = dequantize_uniform(level, bits);
        let u_hat = kumaraswamy_inverse(y_hat, a, b);
        let recon = u_hat * scale + bias;
        let d = (s - recon) as f64;
        loss += d * d;
    }
    loss
}

/// Fits bias/scale/warp parameters for one subvector and quantizes it.
fn encode_subvector(slice: &[f32], bits: u8, learn: bool, xnes_max_iters: usize, rng: &mut impl Rng) -> NvqSubvector {
    let bias = slice.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = slice.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let scale = max - bias;

    let (a, b) = if learn && scale > 0.0 {
        let baseline = fit_loss(slice, bias, scale, bits, 1.0, 1.0).max(1e-12);
        let objective = |params: &[f64]| -> f64 {
            let loss = fit_loss(slice, bias, scale, bits, params[0], params[1]).max(1e-12);
            baseline / loss
        };

        let mut best: Option<(f64, f64, f64)> = None; // (f, a, b)
        for _ in 0..10 {
            let bounds = Bounds::new(vec![1e-6, 1e-6], vec![f64::MAX, f64::MAX]);
            let mut opt = Xnes::new(vec![1.0, 1.0], bounds);
            let result = opt.run(&objective, xnes_max_iters.max(10), rng);
            let f = objective(&result.mean);
            let candidate_ok = f.is_finite() && f >= 1.0;
            if candidate_ok {
                best = Some((f, result.mean[0], result.mean[1]));
                break;
            }
            if best.is_none() || f > best.unwrap().0 {
                best = Some((f, result.mean[0], result.mean[1]));
            }
        }
        match best {
            Some((f, a, b)) if f > 1.0 => (a, b),
            _ => {
                tracing::debug!("NVQ warp fit found no improving (a, b) after 10 retries, using identity");
                (1.0, 1.0)
            }
        }
    } else {
        (1.0, 1.0)
    };

    let levels: Vec<u32> = slice
        .iter()
        .map(|&s| {
            let u = if scale > 0.0 { (s - bias) / scale } else { 0.0 };
            let y = kumaraswamy_forward(u, a, b);
            quantize_uniform(y, bits)
        })
        .collect();

    NvqSubvector {
        bits,
        bias,
        scale,
        a,
        b,
        original_len: slice.len(),
        bytes: pack_levels(&levels, bits),
    }
}

/// An encoded vector: one `NvqSubvector` per entry of the shared partition.
#[derive(Debug, Clone)]
pub struct NvqVector {
    pub subvectors: Vec<NvqSubvector>,
}

/// Training/runtime parameters for NVQ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NvqParams {
    pub m: usize,
    pub bits: u8,
    pub learn: bool,
    pub xnes_max_iters: usize,
}

impl Default for NvqParams {
    fn default() -> Self {
        Self {
            m: 8,
            bits: 8,
            learn: true,
            xnes_max_iters: 50,
        }
    }
}

/// Holds the single global mean and shared subspace partition.
#[derive(Debug, Clone)]
pub struct NvqCompressor {
    pub global_mean: Vec<f32>,
    pub partition: SubspacePartition,
    pub bits: u8,
}

impl NvqCompressor {
    pub fn dim(&self) -> usize {
        self.partition.dim()
    }

    pub fn train(vectors: &dyn RandomAccessVectorValues, params: &NvqParams) -> Result<Self> {
        if !matches!(params.bits, 4 | 8) {
            return Err(VqError::InvalidConfiguration(format!(
                "NVQ bits must be 4 or 8, got {}",
                params.bits
            )));
        }
        let n = vectors.len();
        if n == 0 {
            return Err(VqError::InvalidConfiguration(
                "cannot train NVQ on an empty sample".to_string(),
            ));
        }
        let dim = vectors.dimension();
        let partition = SubspacePartition::new(dim, params.m)?;
        let mut mean = vec![0.0f32; dim];
        for i in 0..n {
            for (m, &v) in mean.iter_mut().zip(vectors.get(i)) {
                *m += v;
            }
        }
        for m in mean.iter_mut() {
            *m /= n as f32;
        }
        Ok(Self {
            global_mean: mean,
            partition,
            bits: params.bits,
        })
    }

    pub fn encode(&self, vector: &[f32], learn: bool, xnes_max_iters: usize, rng: &mut impl Rng) -> Result<NvqVector> {
        if vector.len() != self.dim() {
            return Err(VqError::DimensionMismatch {
                expected: self.dim(),
                actual: vector.len(),
            });
        }
        let centered: Vec<f32> = vector.iter().zip(&self.global_mean).map(|(v, m)| v - m).collect();
        let mut subvectors = Vec::with_capacity(self.partition.m());
        for m in 0..self.partition.m() {
            let slice = self.partition.slice(&centered, m);
            subvectors.push(encode_subvector(slice, self.bits, learn, xnes_max_iters, rng));
        }
        Ok(NvqVector { subvectors })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        wio::write_u32(w, MAGIC)?;
        wio::write_u32(w, CURRENT_VERSION)?;
        wio::write_u32(w, self.global_mean.len() as u32)?;
        wio::write_f32_slice(w, &self.global_mean)?;
        wio::write_u32(w, self.bits as u32)?;
        wio::write_u32(w, self.partition.m() as u32)?;
        for &s in &self.partition.sizes {
            wio::write_u32(w, s as u32)?;
        }
        Ok(())
    }

    /// Loads a compressor, falling back to the version-0 layout (no magic,
    /// mean length first) when the magic is absent.
    pub fn load<R: Read>(r: &mut R) -> Result<Self> {
        let first = wio::read_u32(r)?;
        let (mean_len, version) = if first == MAGIC {
            let version = wio::read_u32(r)?;
            (wio::read_checked_len(r)?, version)
        } else {
            (first as usize, 0u32)
        };
        if mean_len as u64 > (1u64 << 30) {
            return Err(VqError::CorruptedStream(format!(
                "implausible NVQ mean length: {mean_len}"
            )));
        }
        let global_mean = wio::read_f32_vec(r, mean_len)?;
        let bits = wio::read_checked_len(r)? as u8;
        if !matches!(bits, 4 | 8) {
            return Err(VqError::CorruptedStream(format!("invalid NVQ bit depth: {bits}")));
        }
        let m = wio::read_checked_len(r)?;
        let mut sizes = Vec::with_capacity(m);
        let mut offsets = Vec::with_capacity(m);
        let mut offset = 0usize;
        for _ in 0..m {
            let s = wio::read_checked_len(r)?;
            sizes.push(s);
            offsets.push(offset);
            offset += s;
        }
        tracing::debug!(version, m, bits, "loaded NVQ compressor");
        Ok(Self {
            global_mean,
            partition: SubspacePartition { sizes, offsets },
            bits,
        })
    }
}

fn write_subvector<W: Write>(w: &mut W, sv: &NvqSubvector) -> Result<()> {
    wio::write_u32(w, sv.bits as u32)?;
    wio::write_f32(w, sv.bias)?;
    wio::write_f32(w, sv.scale)?;
    wio::write_f32(w, sv.a as f32)?;
    wio::write_f32(w, sv.b as f32)?;
    wio::write_u32(w, sv.original_len as u32)?;
    wio::write_bytes(w, &sv.bytes)?;
    Ok(())
}

fn read_subvector<R: Read>(r: &mut R) -> Result<NvqSubvector> {
    let bits = wio::read_checked_len(r)? as u8;
    let bias = wio::read_f32(r)?;
    let scale = wio::read_f32(r)?;
    let a = wio::read_f32(r)? as f64;
    let b = wio::read_f32(r)? as f64;
    let original_len = wio::read_checked_len(r)?;
    let bytes = wio::read_bytes(r)?;
    Ok(NvqSubvector {
        bits,
        bias,
        scale,
        a,
        b,
        original_len,
        bytes,
    })
}

/// Container of NVQ vectors sharing one compressor.
#[derive(Debug, Clone)]
pub struct NvqVectors {
    pub compressor: std::sync::Arc<NvqCompressor>,
    vectors: Vec<NvqVector>,
}

impl NvqVectors {
    pub fn encode_all(
        compressor: std::sync::Arc<NvqCompressor>,
        source: &dyn RandomAccessVectorValues,
        learn: bool,
        xnes_max_iters: usize,
        pool: &rayon::ThreadPool,
        seed: u64,
    ) -> Result<Self> {
        use rand::SeedableRng;
        use rand_chacha::ChaCha8Rng;
        use rayon::prelude::*;
        let n = source.len();
        let vectors: Result<Vec<NvqVector>> = pool.install(|| {
            (0..n)
                .into_par_iter()
                .map(|i| {
                    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(i as u64));
                    compressor.encode(source.get(i), learn, xnes_max_iters, &mut rng)
                })
                .collect()
        });
        let vectors = vectors?;
        tracing::debug!(count = vectors.len(), learn, "built NVQ container");
        Ok(Self { compressor, vectors })
    }

    pub fn get(&self, ordinal: usize) -> &NvqVector {
        &self.vectors[ordinal]
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        self.compressor.write(w)?;
        wio::write_u32(w, self.vectors.len() as u32)?;
        for v in &self.vectors {
            wio::write_u32(w, v.subvectors.len() as u32)?;
            for sv in &v.subvectors {
                write_subvector(w, sv)?;
            }
        }
        Ok(())
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Self> {
        let compressor = std::sync::Arc::new(NvqCompressor::load(r)?);
        let count = wio::read_checked_len(r)?;
        let mut vectors = Vec::with_capacity(count);
        for _ in 0..count {
            let m = wio::read_checked_len(r)?;
            let mut subvectors = Vec::with_capacity(m);
            for _ in 0..m {
                subvectors.push(read_subvector(r)?);
            }
            vectors.push(NvqVector { subvectors });
        }
        Ok(Self { compressor, vectors })
    }
}

/// Swaps adjacent pairs so a 4-bit code byte's two nibbles line up with the
/// lane order a SIMD gather expects. Returns a fresh `Vec`, never touching
/// the caller's query slice.
fn nibble_shuffled(slice: &[f32]) -> Vec<f32> {
    let mut out = slice.to_vec();
    let mut i = 0;
    while i + 1 < out.len() {
        out.swap(i, i + 1);
        i += 2;
    }
    out
}

fn dot_for_bits(bits: u8, q: &[f32], v: &[f32]) -> f32 {
    if bits == 4 {
        let qs = nibble_shuffled(q);
        let vs = nibble_shuffled(v);
        qs.iter().zip(&vs).map(|(a, b)| a * b).sum()
    } else {
        q.iter().zip(v).map(|(a, b)| a * b).sum()
    }
}

impl CompressedVectors for NvqVectors {
    fn count(&self) -> usize {
        self.vectors.len()
    }

    fn precomputed_score_fn<'a>(
        &'a self,
        query: &[f32],
        sim: SimilarityFunction,
    ) -> Result<ScoreFunction<'a>> {
        if query.len() != self.compressor.dim() {
            return Err(VqError::DimensionMismatch {
                expected: self.compressor.dim(),
                actual: query.len(),
            });
        }
        let partition = self.compressor.partition.clone();
        let bits = self.compressor.bits;

        match sim {
            SimilarityFunction::DotProduct => {
                let query_global_bias: f32 =
                    query.iter().zip(&self.compressor.global_mean).map(|(a, b)| a * b).sum();
                let query = query.to_vec();
                Ok(Box::new(move |n: u32| {
                    let v = self.get(n as usize);
                    let mut sum = 0.0f32;
                    for m in 0..partition.m() {
                        let q_slice = partition.slice(&query, m);
                        let decoded = v.subvectors[m].dequantize();
                        sum += dot_for_bits(bits, q_slice, &decoded);
                    }
                    (1.0 + sum + query_global_bias) / 2.0
                }))
            }
            SimilarityFunction::Euclidean => {
                let q_shifted: Vec<f32> =
                    query.iter().zip(&self.compressor.global_mean).map(|(a, b)| a - b).collect();
                Ok(Box::new(move |n: u32| {
                    let v = self.get(n as usize);
                    let mut sum = 0.0f32;
                    for m in 0..partition.m() {
                        let q_slice = partition.slice(&q_shifted, m);
                        let decoded = v.subvectors[m].dequantize();
                        sum += q_slice
                            .iter()
                            .zip(&decoded)
                            .map(|(a, b)| (a - b) * (a - b))
                            .sum::<f32>();
                    }
                    1.0 / (1.0 + sum)
                }))
            }
            SimilarityFunction::Cosine => {
                // Centroids/codes live in mean-centered space; the query must be
                // shifted the same way so dot/norm stay self-consistent (mirrors
                // the PQ cosine path, which compares centered query to centered
                // centroids throughout).
                let q_centered: Vec<f32> =
                    query.iter().zip(&self.compressor.global_mean).map(|(a, b)| a - b).collect();
                let query_norm: f32 = q_centered.iter().map(|v| v * v).sum::<f32>().sqrt();
                Ok(Box::new(move |n: u32| {
                    let v = self.get(n as usize);
                    let mut dot = 0.0f32;
                    let mut vnorm = 0.0f32;
                    for m in 0..partition.m() {
                        let q_slice = partition.slice(&q_centered, m);
                        let decoded = v.subvectors[m].dequantize();
                        dot += dot_for_bits(bits, q_slice, &decoded);
                        vnorm += decoded.iter().map(|x| x * x).sum::<f32>();
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
}
