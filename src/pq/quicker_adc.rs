//! Quicker-ADC: the SIMD-friendly fused ADC variant that requantizes
//! partial-sum tables to u16 after a warm-up window, modeled as a
//! `Warmup(n) -> Quantized(delta)` state machine.
//!
//! Owns mutable state tied to one query; a decoder must never be shared
//! across threads, which this type enforces by simply not being `Sync` (it
//! holds a `Vec<u16>` rebuilt per query and is meant to be constructed fresh
//! per query/thread).

use crate::error::{Result, VqError};
use crate::pq::compressor::PqCompressor;
use crate::pq::vectors::PqVectors;
use crate::vectors::SimilarityFunction;

#[derive(Debug, Clone)]
enum Stage {
    Warmup { invocations: u32 },
    Quantized { delta: f32 },
}

/// A single query-scoped Quicker-ADC decoder. Construct one per query, score
/// every neighbor list for that query through it, then drop it.
pub struct QuickerAdcDecoder<'a> {
    vectors: &'a PqVectors,
    sim: SimilarityFunction,
    threshold: u32,
    partial_sums: Vec<f32>,
    partial_best: Vec<f32>,
    best_distance: f32,
    worst_distance: f32,
    u16_table: Vec<u16>,
    stage: Stage,
}

impl<'a> QuickerAdcDecoder<'a> {
    /// `threshold` is the fixed per-subspace degree `d`: the decoder scores
    /// exactly via f32 tables for the first `threshold` calls, then crosses
    /// over to u16 tables.
    pub fn new(vectors: &'a PqVectors, query: &[f32], sim: SimilarityFunction, threshold: u32) -> Result<Self> {
        if sim == SimilarityFunction::Cosine {
            return Err(VqError::UnsupportedCombination(
                "Quicker-ADC does not support cosine similarity".to_string(),
            ));
        }
        let compressor = &vectors.compressor;
        let qc: Vec<f32> = match &compressor.global_centroid {
            Some(gc) => query.iter().zip(gc).map(|(a, b)| a - b).collect(),
            None => query.to_vec(),
        };

        let k = compressor.k;
        let m = compressor.m();
        let mut partial_sums = vec![0.0f32; m * k];
        for sub in 0..m {
            let slice = compressor.partition.slice(&qc, sub);
            for c in 0..k {
                let centroid = compressor.centroid(sub, c);
                let v = match sim {
                    SimilarityFunction::DotProduct => {
                        slice.iter().zip(centroid).map(|(a, b)| a * b).sum()
                    }
                    SimilarityFunction::Euclidean => slice
                        .iter()
                        .zip(centroid)
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum(),
                    SimilarityFunction::Cosine => unreachable!(),
                };
                partial_sums[sub * k + c] = v;
            }
        }

        let mut partial_best = vec![0.0f32; m];
        for sub in 0..m {
            let row = &partial_sums[sub * k..(sub + 1) * k];
            partial_best[sub] = match sim {
                SimilarityFunction::DotProduct => row.iter().cloned().fold(f32::NEG_INFINITY, f32::max),
                SimilarityFunction::Euclidean => row.iter().cloned().fold(f32::INFINITY, f32::min),
                SimilarityFunction::Cosine => unreachable!(),
            };
        }
        let best_distance = partial_best.iter().sum();

        Ok(Self {
            vectors,
            sim,
            threshold,
            partial_sums,
            partial_best,
            best_distance,
            worst_distance: match sim {
                SimilarityFunction::DotProduct => f32::INFINITY,
                _ => f32::NEG_INFINITY,
                // `Cosine` already rejected above.
            },
            u16_table: Vec::new(),
            stage: Stage::Warmup { invocations: 0 },
        })
    }

    fn raw_score(&self, code: &[u8]) -> f32 {
        let k = self.vectors.compressor.k;
        code.iter()
            .enumerate()
            .map(|(sub, &c)| self.partial_sums[sub * k + c as usize])
            .sum()
    }

    fn observe_worst(&mut self, raw: f32) {
        match self.sim {
            SimilarityFunction::DotProduct => {
                if raw < self.worst_distance {
                    self.worst_distance = raw;
                }
            }
            _ => {
                if raw > self.worst_distance {
                    self.worst_distance = raw;
                }
            }
        }
    }

    fn normalize(&self, raw: f32) -> f32 {
        match self.sim {
            SimilarityFunction::DotProduct => (1.0 + raw) / 2.0,
            SimilarityFunction::Euclidean => 1.0 / (1.0 + raw),
            SimilarityFunction::Cosine => unreachable!(),
        }
    }

    fn crossover(&mut self) {
        let delta = (self.worst_distance - self.best_distance) / 65535.0;
        let delta = if delta.abs() < f32::EPSILON { 1.0 } else { delta };
        let m = self.vectors.compressor.m();
        let k = self.vectors.compressor.k;
        let mut table = vec![0u16; m * k];
        for sub in 0..m {
            let best = self.partial_best[sub];
            for c in 0..k {
                let v = self.partial_sums[sub * k + c];
                let q = ((v - best) / delta).round().clamp(0.0, 65535.0);
                table[sub * k + c] = q as u16;
            }
        }
        self.u16_table = table;
        self.stage = Stage::Quantized { delta };
    }

    /// Scores every neighbor ordinal in `origin` for the query this decoder
    /// was built from.
    pub fn bulk_score_edge(&mut self, origin: &[u32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(origin.len());
        for &n in origin {
            out.push(self.score_one(n));
        }
        out
    }

    fn score_one(&mut self, n: u32) -> f32 {
        let code = self.vectors.get(n as usize).to_vec();
        match self.stage {
            Stage::Warmup { invocations } => {
                let raw = self.raw_score(&code);
                self.observe_worst(raw);
                let next = invocations + 1;
                if next >= self.threshold {
                    self.crossover();
                } else {
                    self.stage = Stage::Warmup { invocations: next };
                }
                self.normalize(raw)
            }
            Stage::Quantized { delta } => {
                let k = self.vectors.compressor.k;
                let mut acc_u32 = 0u32;
                for (sub, &c) in code.iter().enumerate() {
                    acc_u32 += self.u16_table[sub * k + c as usize] as u32;
                }
                self.normalize(self.dequantize_sum(acc_u32, delta, code.len()))
            }
        }
    }

    fn dequantize_sum(&self, acc_u32: u32, delta: f32, num_subspaces: usize) -> f32 {
        // Each u16 entry stores round((v - bestInSubspace) / delta); summing
        // across subspaces and rescaling recovers Σv minus Σbest, so add the
        // per-subspace bests back to land on the original affine scale.
        let bests_sum: f32 = self.partial_best[..num_subspaces].iter().sum();
        bests_sum + acc_u32 as f32 * delta
    }

    pub fn supports_quantized_similarity(&self) -> bool {
        matches!(self.stage, Stage::Quantized { .. })
    }
}
