//! PQ compressor: subspace partition, per-subspace codebooks, training,
//! encoding, refine, and serialization.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VqError};
use crate::io;
use crate::kmeans::{kmeans_pp, kmeans_refine};
use crate::partition::SubspacePartition;
use crate::vectors::RandomAccessVectorValues;

/// Training/runtime parameters for PQ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqParams {
    pub m: usize,
    pub k: usize,
    pub lloyd_iters: usize,
    pub globally_center: bool,
    pub train_sample_cap: usize,
}

impl Default for PqParams {
    fn default() -> Self {
        Self {
            m: 8,
            k: 256,
            lloyd_iters: 6,
            globally_center: false,
            train_sample_cap: 128_000,
        }
    }
}

/// A trained (or untrained) PQ compressor. Codebooks live in one flat arena:
/// subspace `m`'s codebook occupies
/// `codebooks[codebook_offset(m) .. codebook_offset(m) + k*sizes[m]]`, row
/// `c` within that span being centroid `c`.
#[derive(Debug, Clone)]
pub struct PqCompressor {
    pub partition: SubspacePartition,
    pub k: usize,
    pub codebooks: Vec<f32>,
    pub global_centroid: Option<Vec<f32>>,
}

impl PqCompressor {
    fn codebook_offset(&self, m: usize) -> usize {
        let mut off = 0;
        for i in 0..m {
            off += self.k * self.partition.sizes[i];
        }
        off
    }

    pub fn codebook(&self, m: usize) -> &[f32] {
        let start = self.codebook_offset(m);
        let len = self.k * self.partition.sizes[m];
        &self.codebooks[start..start + len]
    }

    pub fn centroid(&self, m: usize, c: usize) -> &[f32] {
        let size = self.partition.sizes[m];
        let book = self.codebook(m);
        &book[c * size..(c + 1) * size]
    }

    pub fn dim(&self) -> usize {
        self.partition.dim()
    }

    pub fn m(&self) -> usize {
        self.partition.m()
    }

    /// Trains a fresh compressor from `sample`, subsampling up to
    /// `params.train_sample_cap` vectors with Bernoulli probability
    /// `min(1, cap/N)`.
    pub fn train(
        sample: &dyn RandomAccessVectorValues,
        params: &PqParams,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let dim = sample.dimension();
        let n = sample.len();
        if n == 0 {
            return Err(VqError::InvalidConfiguration(
                "cannot train PQ on an empty sample".to_string(),
            ));
        }
        let partition = SubspacePartition::new(dim, params.m)?;

        let prob = (params.train_sample_cap as f64 / n as f64).min(1.0);
        let mut picked: Vec<usize> = (0..n).filter(|_| rng.random::<f64>() < prob).collect();
        if picked.is_empty() {
            picked.push(rng.random_range(0..n));
        }

        let global_centroid = if params.globally_center {
            let mut mean = vec![0.0f32; dim];
            for &idx in &picked {
                for (m, &v) in mean.iter_mut().zip(sample.get(idx)) {
                    *m += v;
                }
            }
            let count = picked.len() as f32;
            for m in mean.iter_mut() {
                *m /= count;
            }
            Some(mean)
        } else {
            None
        };

        let mut codebooks = Vec::with_capacity(partition.sizes.iter().map(|s| s * params.k).sum());
        for m in 0..partition.m() {
            let size = partition.sizes[m];
            let mut flat = Vec::with_capacity(picked.len() * size);
            for &idx in &picked {
                let v = sample.get(idx);
                let slice = partition.slice(v, m);
                if let Some(gc) = &global_centroid {
                    let gc_slice = &gc[partition.offsets[m]..partition.offsets[m] + size];
                    flat.extend(slice.iter().zip(gc_slice).map(|(a, b)| a - b));
                } else {
                    flat.extend_from_slice(slice);
                }
            }
            let k_eff = params.k.min(picked.len());
            let result = kmeans_pp(&flat, picked.len(), size, k_eff, params.lloyd_iters, rng)?;
            codebooks.extend_from_slice(&result.centroids);
            if k_eff < params.k {
                // Pad with copies of the last centroid so every subspace has
                // exactly `k` rows on disk, matching the fixed-width layout.
                let last = result.centroid(k_eff - 1).to_vec();
                for _ in k_eff..params.k {
                    codebooks.extend_from_slice(&last);
                }
            }
        }

        tracing::debug!(m = partition.m(), k = params.k, "trained PQ codebooks");

        Ok(Self {
            partition,
            k: params.k,
            codebooks,
            global_centroid,
        })
    }

    /// Re-clusters each subspace starting from the existing centroids as
    /// Lloyd seeds, preserving `global_centroid`.
    pub fn refine(
        &mut self,
        sample: &dyn RandomAccessVectorValues,
        extra_iters: usize,
        rng: &mut impl Rng,
    ) -> Result<()> {
        let n = sample.len();
        if n == 0 {
            return Err(VqError::InvalidConfiguration(
                "cannot refine PQ on an empty sample".to_string(),
            ));
        }
        for m in 0..self.partition.m() {
            let size = self.partition.sizes[m];
            let mut flat = Vec::with_capacity(n * size);
            for i in 0..n {
                let v = sample.get(i);
                let slice = self.partition.slice(v, m);
                if let Some(gc) = &self.global_centroid {
                    let gc_slice = &gc[self.partition.offsets[m]..self.partition.offsets[m] + size];
                    flat.extend(slice.iter().zip(gc_slice).map(|(a, b)| a - b));
                } else {
                    flat.extend_from_slice(slice);
                }
            }
            let seed = self.codebook(m).to_vec();
            let result = kmeans_refine(&flat, n, size, &seed, extra_iters, rng)?;
            let start = self.codebook_offset(m);
            self.codebooks[start..start + result.centroids.len()].copy_from_slice(&result.centroids);
        }
        Ok(())
    }

    /// Encodes one vector: optionally subtract `global_centroid`, then emit
    /// the nearest-centroid index (L2) per subspace as one byte.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        if vector.len() != self.dim() {
            return Err(VqError::DimensionMismatch {
                expected: self.dim(),
                actual: vector.len(),
            });
        }
        let mut code = Vec::with_capacity(self.m());
        for m in 0..self.m() {
            let size = self.partition.sizes[m];
            let raw = self.partition.slice(vector, m);
            let mut buf;
            let slice: &[f32] = if let Some(gc) = &self.global_centroid {
                let gc_slice = &gc[self.partition.offsets[m]..self.partition.offsets[m] + size];
                buf = vec![0.0f32; size];
                for i in 0..size {
                    buf[i] = raw[i] - gc_slice[i];
                }
                &buf
            } else {
                raw
            };

            let mut best = 0u8;
            let mut best_dist = f32::INFINITY;
            for c in 0..self.k {
                let centroid = self.centroid(m, c);
                let dist: f32 = slice
                    .iter()
                    .zip(centroid)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                if dist < best_dist {
                    best_dist = dist;
                    best = c as u8;
                }
            }
            code.push(best);
        }
        Ok(code)
    }

    pub fn write<W: std::io::Write>(&self, w: &mut W) -> Result<()> {
        match &self.global_centroid {
            Some(gc) => {
                io::write_u32(w, gc.len() as u32)?;
                io::write_f32_slice(w, gc)?;
            }
            None => io::write_u32(w, 0)?,
        }
        io::write_u32(w, self.partition.m() as u32)?;
        for &s in &self.partition.sizes {
            io::write_u32(w, s as u32)?;
        }
        io::write_u32(w, self.k as u32)?;
        io::write_f32_slice(w, &self.codebooks)?;
        Ok(())
    }

    pub fn load<R: std::io::Read>(r: &mut R) -> Result<Self> {
        let centroid_len = io::read_checked_len(r)?;
        let global_centroid = if centroid_len == 0 {
            None
        } else {
            Some(io::read_f32_vec(r, centroid_len)?)
        };
        let m = io::read_checked_len(r)?;
        if m == 0 {
            return Err(VqError::CorruptedStream("PQ subspace count is zero".to_string()));
        }
        let mut sizes = Vec::with_capacity(m);
        let mut offset = 0usize;
        let mut offsets = Vec::with_capacity(m);
        for _ in 0..m {
            let s = io::read_checked_len(r)?;
            sizes.push(s);
            offsets.push(offset);
            offset += s;
        }
        let k = io::read_checked_len(r)?;
        let total: usize = sizes.iter().map(|s| s * k).sum();
        let codebooks = io::read_f32_vec(r, total)?;
        for &v in &codebooks {
            if !v.is_finite() {
                return Err(VqError::CorruptedStream(
                    "non-finite value in PQ codebook".to_string(),
                ));
            }
        }
        Ok(Self {
            partition: SubspacePartition { sizes, offsets },
            k,
            codebooks,
            global_centroid,
        })
    }
}
