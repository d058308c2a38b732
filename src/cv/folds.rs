//! Fold Assignment
//!
//! Each repeat owns an RNG seeded from `seed + repeat`, so assignments do not
//! depend on how many repeats run in parallel or in which order.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Deterministic RNG for one repeat
pub fn repeat_rng(seed: u64, repeat: usize) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add(repeat as u64))
}

/// Assign each species (by position in `values`) to a fold in `0..folds`
///
/// Random: shuffle, then deal round-robin. Stratified: sort by value, cut
/// into consecutive blocks of `folds` species and give each block a shuffled
/// set of fold ids, so every fold spans the value range. Fold sizes differ by
/// at most one either way.
pub fn assign_folds(
    values: &[f64],
    folds: usize,
    stratified: bool,
    rng: &mut StdRng,
) -> Vec<usize> {
    let n = values.len();
    let mut assignment = vec![0; n];
    if folds == 0 || n == 0 {
        return assignment;
    }

    let mut order: Vec<usize> = (0..n).collect();
    if stratified {
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(a.cmp(&b)));
        let mut fold_ids: Vec<usize> = (0..folds).collect();
        for block in order.chunks(folds) {
            fold_ids.shuffle(rng);
            for (&species, &fold) in block.iter().zip(&fold_ids) {
                assignment[species] = fold;
            }
        }
    } else {
        order.shuffle(rng);
        for (pos, &species) in order.iter().enumerate() {
            assignment[species] = pos % folds;
        }
    }
    assignment
}
