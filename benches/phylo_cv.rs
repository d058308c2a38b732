//! Benchmarks for the distance engine and the CV harness
//!
//! Synthetic trees are built by joining random pairs of clades until one
//! remains; branch lengths are uniform in [0.1, 2).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use eive_phylo_rust::cv::AxisData;
use eive_phylo_rust::{CvHarness, CvSettings, DistanceMatrix, PhyloTree};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

fn random_newick(n: usize, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut clades: Vec<String> = (0..n)
        .map(|i| format!("t{}:{:.3}", i, rng.gen_range(0.1..2.0)))
        .collect();
    while clades.len() > 1 {
        let a = clades.swap_remove(rng.gen_range(0..clades.len()));
        let b = clades.swap_remove(rng.gen_range(0..clades.len()));
        clades.push(format!("({},{}):{:.3}", a, b, rng.gen_range(0.1..2.0)));
    }
    format!("{};", clades[0])
}

fn bench_distance_matrix(c: &mut Criterion) {
    let mut group = c.benchmark_group("Distance Matrix");

    for n in [100, 500, 1000].iter() {
        let tree = PhyloTree::from_newick(&random_newick(*n, 42)).unwrap();
        let tips: Vec<String> = (0..*n).step_by(2).map(|i| format!("t{}", i)).collect();

        group.bench_with_input(BenchmarkId::new("pruned", n), &tips, |b, tips| {
            b.iter(|| black_box(DistanceMatrix::between_tips(&tree, tips).unwrap()))
        });
    }

    group.finish();
}

fn bench_cv_harness(c: &mut Criterion) {
    let mut group = c.benchmark_group("CV Harness");
    group.sample_size(10);

    for n in [200, 800].iter() {
        let tree = PhyloTree::from_newick(&random_newick(*n, 7)).unwrap();
        let tips: Vec<String> = (0..*n).map(|i| format!("t{}", i)).collect();
        let distances = DistanceMatrix::between_tips(&tree, &tips).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let values: FxHashMap<&str, f64> = tips
            .iter()
            .map(|t| (t.as_str(), rng.gen_range(1.0..9.0)))
            .collect();
        let data = AxisData::new("EIVEres-L", distances, &values).unwrap();
        let harness = CvHarness::new(CvSettings::default()).unwrap();

        group.bench_with_input(BenchmarkId::new("default grid", n), &data, |b, data| {
            b.iter(|| black_box(harness.run_axis(data).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_distance_matrix, bench_cv_harness);
criterion_main!(benches);
