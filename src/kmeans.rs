//! Seeded k-means++ clustering on float subvectors.
//!
//! Used by the PQ codebook trainer to build per-subspace centroids. NVQ
//! quantizes each subvector directly and does not call this module.

use rand::Rng;

use crate::error::{Result, VqError};

/// Output of one k-means++ run: flattened centroids (`k` rows of `dim`
/// floats each) and the final per-point assignment, kept because PQ's
/// refine step reuses centroids as Lloyd seeds and may want the last
/// assignment for warm restarts.
#[derive(Debug, Clone)]
pub struct KMeansResult {
    /// `k * dim` floats, row `c` is centroid `c`.
    pub centroids: Vec<f32>,
    pub assignments: Vec<u32>,
    pub dim: usize,
    pub k: usize,
}

impl KMeansResult {
    pub fn centroid(&self, c: usize) -> &[f32] {
        &self.centroids[c * self.dim..(c + 1) * self.dim]
    }

    pub fn centroid_mut(&mut self, c: usize) -> &mut [f32] {
        let dim = self.dim;
        &mut self.centroids[c * dim..(c + 1) * dim]
    }
}

fn squared_dist(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// k-means++ seeding: pick `k` initial centroids from `points` (each a row
/// of `dim` floats in a flat `points` array) with probability proportional
/// to squared distance from the nearest already-chosen centroid.
fn seed_plus_plus(points: &[f32], n: usize, dim: usize, k: usize, rng: &mut impl Rng) -> Vec<f32> {
    let mut centroids = Vec::with_capacity(k * dim);
    let first = rng.random_range(0..n);
    centroids.extend_from_slice(&points[first * dim..(first + 1) * dim]);

    let mut d = vec![f32::INFINITY; n];
    for i in 0..n {
        d[i] = squared_dist(&points[i * dim..(i + 1) * dim], &centroids[0..dim]);
    }

    for _ in 1..k {
        let total: f32 = d.iter().sum();
        let chosen = if total <= 0.0 {
            rng.random_range(0..n)
        } else {
            let r = rng.random_range(0.0..total);
            let mut acc = 0.0f32;
            let mut idx = n - 1;
            for (i, &di) in d.iter().enumerate() {
                acc += di;
                if acc - r > -1e-6 {
                    idx = i;
                    break;
                }
            }
            idx
        };

        let new_centroid = &points[chosen * dim..(chosen + 1) * dim];
        centroids.extend_from_slice(new_centroid);
        let last = &centroids[centroids.len() - dim..];
        for i in 0..n {
            let dist = squared_dist(&points[i * dim..(i + 1) * dim], last);
            if dist < d[i] {
                d[i] = dist;
            }
        }
    }

    centroids
}

/// Runs seeded k-means++ followed by up to `max_iters` Lloyd iterations.
/// `points` is a flat row-major `n * dim` buffer. Terminates early once
/// fewer than 1% of points change cluster in an iteration.
pub fn kmeans_pp(
    points: &[f32],
    n: usize,
    dim: usize,
    k: usize,
    max_iters: usize,
    rng: &mut impl Rng,
) -> Result<KMeansResult> {
    if k == 0 || k > n {
        return Err(VqError::InvalidConfiguration(format!(
            "cluster count {k} must be in (0, {n}]"
        )));
    }

    let centroids = seed_plus_plus(points, n, dim, k, rng);
    let mut result = KMeansResult {
        centroids,
        assignments: vec![0u32; n],
        dim,
        k,
    };

    // Initial assignment scans every point once.
    let mut num = vec![0.0f32; k * dim];
    let mut denom = vec![0u32; k];
    for i in 0..n {
        let p = &points[i * dim..(i + 1) * dim];
        let c = nearest_centroid(&result, p);
        result.assignments[i] = c as u32;
        for (acc, &v) in num[c * dim..(c + 1) * dim].iter_mut().zip(p) {
            *acc += v;
        }
        denom[c] += 1;
    }

    for iter in 0..max_iters {
        // Recompute centroids from accumulated sums, reseeding empty clusters.
        for c in 0..k {
            if denom[c] == 0 {
                let reseed = rng.random_range(0..n);
                result.centroid_mut(c).copy_from_slice(&points[reseed * dim..(reseed + 1) * dim]);
            } else {
                let d = denom[c] as f32;
                let dst = result.centroid_mut(c);
                for (dst_v, &sum_v) in dst.iter_mut().zip(&num[c * dim..(c + 1) * dim]) {
                    *dst_v = sum_v / d;
                }
            }
        }

        let mut moved = 0usize;
        for i in 0..n {
            let p = &points[i * dim..(i + 1) * dim];
            let old = result.assignments[i] as usize;
            let new = nearest_centroid(&result, p);
            if new != old {
                for (acc, &v) in num[old * dim..(old + 1) * dim].iter_mut().zip(p) {
                    *acc -= v;
                }
                denom[old] -= 1;
                for (acc, &v) in num[new * dim..(new + 1) * dim].iter_mut().zip(p) {
                    *acc += v;
                }
                denom[new] += 1;
                result.assignments[i] = new as u32;
                moved += 1;
            }
        }

        tracing::debug!(iter, moved, n, "kmeans lloyd iteration");
        if (moved as f64) < 0.01 * n as f64 {
            break;
        }
    }

    for &v in &result.centroids {
        if !v.is_finite() {
            return Err(VqError::InvalidConfiguration(
                "k-means produced a non-finite centroid".to_string(),
            ));
        }
    }

    Ok(result)
}

/// Like `kmeans_pp` but seeds Lloyd with existing centroids instead of
/// k-means++ sampling — PQ's `refine` operation (§4.3).
pub fn kmeans_refine(
    points: &[f32],
    n: usize,
    dim: usize,
    seed_centroids: &[f32],
    extra_iters: usize,
    rng: &mut impl Rng,
) -> Result<KMeansResult> {
    let k = seed_centroids.len() / dim;
    if k == 0 || k > n {
        return Err(VqError::InvalidConfiguration(format!(
            "cluster count {k} must be in (0, {n}]"
        )));
    }
    let mut result = KMeansResult {
        centroids: seed_centroids.to_vec(),
        assignments: vec![0u32; n],
        dim,
        k,
    };

    let mut num = vec![0.0f32; k * dim];
    let mut denom = vec![0u32; k];
    for i in 0..n {
        let p = &points[i * dim..(i + 1) * dim];
        let c = nearest_centroid(&result, p);
        result.assignments[i] = c as u32;
        for (acc, &v) in num[c * dim..(c + 1) * dim].iter_mut().zip(p) {
            *acc += v;
        }
        denom[c] += 1;
    }

    for _ in 0..extra_iters {
        for c in 0..k {
            if denom[c] == 0 {
                let reseed = rng.random_range(0..n);
                result.centroid_mut(c).copy_from_slice(&points[reseed * dim..(reseed + 1) * dim]);
            } else {
                let d = denom[c] as f32;
                let dst = result.centroid_mut(c);
                for (dst_v, &sum_v) in dst.iter_mut().zip(&num[c * dim..(c + 1) * dim]) {
                    *dst_v = sum_v / d;
                }
            }
        }
        let mut moved = 0usize;
        for i in 0..n {
            let p = &points[i * dim..(i + 1) * dim];
            let old = result.assignments[i] as usize;
            let new = nearest_centroid(&result, p);
            if new != old {
                for (acc, &v) in num[old * dim..(old + 1) * dim].iter_mut().zip(p) {
                    *acc -= v;
                }
                denom[old] -= 1;
                for (acc, &v) in num[new * dim..(new + 1) * dim].iter_mut().zip(p) {
                    *acc += v;
                }
                denom[new] += 1;
                result.assignments[i] = new as u32;
                moved += 1;
            }
        }
        if (moved as f64) < 0.01 * n as f64 {
            break;
        }
    }

    Ok(result)
}

fn nearest_centroid(result: &KMeansResult, point: &[f32]) -> usize {
    let mut best = 0usize;
    let mut best_dist = f32::INFINITY;
    for c in 0..result.k {
        let dist = squared_dist(point, result.centroid(c));
        if dist < best_dist {
            best_dist = dist;
            best = c;
        }
    }
    best
}
