//! Balanced per-class subsampling of oversized sources

use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

/// Row indices to keep so that at most `cap` rows survive, split evenly
/// across classes.
///
/// Each class keeps `cap / n_classes` rows (or all of its rows when it has
/// fewer). Classes are visited in sorted order with one seeded RNG, and the
/// returned indices are ascending so surviving rows keep their relative order.
pub fn balanced_sample(labels: &[Option<String>], cap: usize, seed: u64) -> Vec<usize> {
    if labels.len() <= cap {
        return (0..labels.len()).collect();
    }

    let mut groups: BTreeMap<Option<&str>, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        groups.entry(label.as_deref()).or_default().push(i);
    }

    let per_class = (cap / groups.len()).max(1);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut keep = Vec::with_capacity(cap);

    for rows in groups.values() {
        if rows.len() <= per_class {
            keep.extend_from_slice(rows);
        } else {
            let mut picked: Vec<usize> = index::sample(&mut rng, rows.len(), per_class)
                .into_iter()
                .map(|j| rows[j])
                .collect();
            picked.sort_unstable();
            keep.extend(picked);
        }
    }

    keep.sort_unstable();
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(counts: &[(&str, usize)]) -> Vec<Option<String>> {
        counts.iter()
            .flat_map(|(l, n)| std::iter::repeat(Some(l.to_string())).take(*n))
            .collect()
    }

    #[test]
    fn test_under_cap_keeps_everything() {
        let l = labels(&[("A", 3), ("B", 2)]);
        assert_eq!(balanced_sample(&l, 10, 42), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_balanced_per_class() {
        let l = labels(&[("A", 100), ("B", 10), ("C", 50)]);
        let keep = balanced_sample(&l, 60, 42);
        let count = |name: &str| keep.iter().filter(|&&i| l[i].as_deref() == Some(name)).count();
        assert_eq!(count("A"), 20);
        assert_eq!(count("B"), 10);
        assert_eq!(count("C"), 20);
        assert!(keep.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_deterministic_for_seed() {
        let l = labels(&[("A", 500), ("B", 500)]);
        assert_eq!(balanced_sample(&l, 100, 42), balanced_sample(&l, 100, 42));
        assert_ne!(balanced_sample(&l, 100, 42), balanced_sample(&l, 100, 7));
    }
}
