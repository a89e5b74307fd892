//! Crate-level checks exercised through the public API rather than against
//! module internals.

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use vq_core::{
    BqCompressor, BqVectors, CompressedVectors, InMemoryVectorValues, LvqCompressor, NvqCompressor,
    NvqParams, NvqVectors, PqCompressor, PqParams, PqVectors, RandomAccessVectorValues, SimilarityFunction,
};

#[test]
fn bq_hamming_scores() {
    let v = vec![1.0f32; 8];
    let u = vec![1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
    let values = InMemoryVectorValues::new(8, vec![v.clone(), u]);
    let compressor = Arc::new(BqCompressor::train(8).unwrap());
    let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
    let bqv = BqVectors::encode_all(compressor, &values, &pool).unwrap();

    let mut score = bqv.precomputed_score_fn(&v, SimilarityFunction::DotProduct).unwrap();
    assert_eq!(score(0), 1.0);
    assert_eq!(score(1), 0.5);
}

#[test]
fn pq_two_point_training_separates_clusters() {
    let mut rng = ChaCha8Rng::seed_from_u64(77);
    let points = [vec![0.0f32, 0.0, 10.0, 10.0], vec![1.0, 1.0, 11.0, 11.0]];
    let mut data = Vec::new();
    for _ in 0..50 {
        data.push(points[0].clone());
        data.push(points[1].clone());
    }
    let values = InMemoryVectorValues::new(4, data);
    let params = PqParams {
        m: 2,
        k: 2,
        lloyd_iters: 6,
        globally_center: false,
        train_sample_cap: 128_000,
    };
    let compressor = PqCompressor::train(&values, &params, &mut rng).unwrap();
    let a = compressor.encode(&points[0]).unwrap();
    let b = compressor.encode(&points[1]).unwrap();
    assert!(a == vec![0, 0] || a == vec![1, 1]);
    assert!(b == vec![0, 0] || b == vec![1, 1]);
    assert_ne!(a, b);
}

#[test]
fn lvq_affine_quantization() {
    let compressor = LvqCompressor {
        global_mean: vec![0.0, 0.0, 0.0],
    };
    let packed = compressor.encode(&[0.0, 0.5, 1.0]).unwrap();
    assert_eq!(packed.bias, 0.0);
    assert!((packed.scale - 1.0 / 255.0).abs() < 1e-6);
    let decoded = compressor.decode(&packed);
    assert!((decoded[0]).abs() < 1e-6);
    assert!((decoded[1] - 128.0 / 255.0).abs() < 0.01);
    assert!((decoded[2] - 1.0).abs() < 1e-6);
}

#[test]
fn nvq_identity_warp_uniform_quant() {
    let dim = 5;
    let compressor = NvqCompressor {
        global_mean: vec![0.0; dim],
        partition: vq_core::SubspacePartition::new(dim, 1).unwrap(),
        bits: 8,
    };
    let mut rng = ChaCha8Rng::seed_from_u64(78);
    let v = vec![0.0f32, 0.25, 0.5, 0.75, 1.0];
    let encoded = compressor.encode(&v, false, 10, &mut rng).unwrap();
    assert_eq!(encoded.subvectors[0].bytes, vec![0u8, 64, 128, 191, 255]);
}

#[test]
fn pq_dot_product_prefers_self_with_global_centroid() {
    let mut rng = ChaCha8Rng::seed_from_u64(79);
    let mut data = Vec::new();
    for i in 0..300 {
        data.push(vec![
            (i as f32 * 0.013).sin() + 5.0,
            (i as f32 * 0.027).cos() + 5.0,
            (i as f32 * 0.041).sin() + 5.0,
            (i as f32 * 0.059).cos() + 5.0,
        ]);
    }
    let values = InMemoryVectorValues::new(4, data);
    let params = PqParams {
        m: 2,
        k: 16,
        lloyd_iters: 8,
        globally_center: true,
        train_sample_cap: 128_000,
    };
    let compressor = Arc::new(PqCompressor::train(&values, &params, &mut rng).unwrap());
    let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
    let pqv = PqVectors::encode_all(compressor, &values, &pool).unwrap();

    let trials = 100;
    let mut wins = 0;
    for t in 0..trials {
        let q = values.get(t);
        let mut score_fn = pqv.precomputed_score_fn(q, SimilarityFunction::DotProduct).unwrap();
        let self_score = score_fn(t as u32);
        let random = (t * 37 + 11) % values.len();
        if self_score >= score_fn(random as u32) {
            wins += 1;
        }
    }
    assert!(wins as f64 / trials as f64 >= 0.95, "wins={wins}/{trials}");
}

#[test]
fn cross_family_round_trip_preserves_scores() {
    let mut data = Vec::new();
    for i in 0..40 {
        data.push((0..12).map(|d| ((i + d) as f32 * 0.09).sin()).collect::<Vec<_>>());
    }
    let values = InMemoryVectorValues::new(12, data);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();

    let nvq_params = NvqParams {
        m: 3,
        bits: 8,
        learn: false,
        xnes_max_iters: 10,
    };
    let nvq = Arc::new(NvqCompressor::train(&values, &nvq_params).unwrap());
    let nvqv = NvqVectors::encode_all(nvq, &values, false, 10, &pool, 88).unwrap();

    let mut buf = Vec::new();
    nvqv.write(&mut buf).unwrap();
    let loaded = NvqVectors::load(&mut &buf[..]).unwrap();

    let query = values.get(0);
    let mut before = nvqv.precomputed_score_fn(query, SimilarityFunction::Euclidean).unwrap();
    let mut after = loaded.precomputed_score_fn(query, SimilarityFunction::Euclidean).unwrap();
    for n in 0..values.len() as u32 {
        assert!((before(n) - after(n)).abs() < 1e-6);
    }
}
