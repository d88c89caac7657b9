//! Stratified train/test split over row indices

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Row indices of each side of a split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitOutcome {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
    /// False when stratification was infeasible and a plain shuffle was used
    pub stratified: bool,
}

/// Number of test rows for `n` samples
pub fn test_count(n: usize, test_size: f64) -> usize {
    if n < 2 {
        return 0;
    }
    ((n as f64 * test_size).ceil() as usize).clamp(1, n - 1)
}

/// Split `labels` (class indices in `0..n_classes`) into train and test rows.
///
/// Falls back to an unstratified shuffle when some class has fewer than two
/// rows or either side would hold fewer rows than there are classes. Both
/// paths are deterministic for a fixed seed and never fail.
pub fn stratified_split(labels: &[usize], n_classes: usize, test_size: f64, seed: u64) -> SplitOutcome {
    let n = labels.len();
    let n_test = test_count(n, test_size);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
    for (i, &c) in labels.iter().enumerate() {
        if let Some(rows) = by_class.get_mut(c) {
            rows.push(i);
        }
    }
    let present: Vec<usize> = (0..n_classes).filter(|&c| !by_class[c].is_empty()).collect();

    let feasible = present.iter().all(|&c| by_class[c].len() >= 2)
        && n_test >= present.len()
        && n - n_test >= present.len()
        && present.iter().map(|&c| by_class[c].len()).sum::<usize>() == n;

    if !feasible {
        info!(rows = n, classes = present.len(), "stratified split infeasible, using shuffled split");
        let mut rows: Vec<usize> = (0..n).collect();
        rows.shuffle(&mut rng);
        let mut test = rows.split_off(n - n_test);
        let mut train = rows;
        train.sort_unstable();
        test.sort_unstable();
        return SplitOutcome { train, test, stratified: false };
    }

    let allocation = allocate(&present.iter().map(|&c| by_class[c].len()).collect::<Vec<_>>(), n, n_test);

    let mut train = Vec::with_capacity(n - n_test);
    let mut test = Vec::with_capacity(n_test);
    for (&c, &k) in present.iter().zip(&allocation) {
        let mut rows = by_class[c].clone();
        rows.shuffle(&mut rng);
        test.extend_from_slice(&rows[..k]);
        train.extend_from_slice(&rows[k..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    debug!(train = train.len(), test = test.len(), "stratified split");
    SplitOutcome { train, test, stratified: true }
}

// Largest-remainder allocation of `n_test` rows over class counts. Every
// class keeps at least one row on each side.
fn allocate(counts: &[usize], n: usize, n_test: usize) -> Vec<usize> {
    let shares: Vec<f64> = counts.iter().map(|&c| c as f64 * n_test as f64 / n as f64).collect();
    let mut alloc: Vec<usize> = shares
        .iter()
        .zip(counts)
        .map(|(&s, &c)| (s.floor() as usize).clamp(1, c - 1))
        .collect();

    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = shares[a] - shares[a].floor();
        let fb = shares[b] - shares[b].floor();
        fb.total_cmp(&fa).then(a.cmp(&b))
    });

    let mut assigned: usize = alloc.iter().sum();
    while assigned < n_test {
        let before = assigned;
        for &c in &order {
            if assigned == n_test {
                break;
            }
            if alloc[c] + 1 < counts[c] {
                alloc[c] += 1;
                assigned += 1;
            }
        }
        if assigned == before {
            break;
        }
    }
    while assigned > n_test {
        let before = assigned;
        for &c in order.iter().rev() {
            if assigned == n_test {
                break;
            }
            if alloc[c] > 1 {
                alloc[c] -= 1;
                assigned -= 1;
            }
        }
        if assigned == before {
            break;
        }
    }
    alloc
}
