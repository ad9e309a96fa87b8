// ========================================================================================
//
//                           Stratified cross-validation folds
//
// ========================================================================================

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Size of one held-out fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub total: usize,
    pub affected: usize,
    pub unaffected: usize,
}

/// Splits both classes into `k` folds.
///
/// Each per-class count is `class / k` or one more. The affected remainder goes to
/// folds `0..ra`; the unaffected remainder starts at fold `ra` and wraps, so no fold
/// collects a second extra sample before every fold has one.
pub fn k_folds(num_affected: usize, num_unaffected: usize, k: usize) -> Vec<Fold> {
    if k == 0 {
        return Vec::new();
    }
    let (qa, ra) = (num_affected / k, num_affected % k);
    let (qu, ru) = (num_unaffected / k, num_unaffected % k);

    let mut folds: Vec<Fold> = (0..k)
        .map(|i| {
            let affected = qa + usize::from(i < ra);
            Fold {
                total: affected + qu,
                affected,
                unaffected: qu,
            }
        })
        .collect();
    for j in 0..ru {
        let fold = &mut folds[(ra + j) % k];
        fold.unaffected += 1;
        fold.total += 1;
    }
    folds
}

/// The folds together with the fold id of every packed column.
#[derive(Debug, Clone)]
pub struct FoldAssignment {
    folds: Vec<Fold>,
    fold_of_column: Vec<u32>,
}

impl FoldAssignment {
    /// Without a seed each class is cut into contiguous runs in column order. With a
    /// seed the columns of each class are shuffled first, reproducibly.
    pub fn new(num_affected: usize, num_unaffected: usize, k: usize, seed: Option<u64>) -> Self {
        let folds = k_folds(num_affected, num_unaffected, k);
        let mut fold_of_column = vec![0u32; num_affected + num_unaffected];
        let mut rng = seed.map(StdRng::seed_from_u64);

        let classes = [
            (0..num_affected, folds.iter().map(|f| f.affected).collect::<Vec<_>>()),
            (
                num_affected..num_affected + num_unaffected,
                folds.iter().map(|f| f.unaffected).collect::<Vec<_>>(),
            ),
        ];
        for (columns, sizes) in classes {
            let mut order: Vec<usize> = columns.collect();
            if let Some(rng) = rng.as_mut() {
                order.shuffle(rng);
            }
            let mut cursor = order.into_iter();
            for (fold, size) in sizes.into_iter().enumerate() {
                for column in cursor.by_ref().take(size) {
                    fold_of_column[column] = fold as u32;
                }
            }
        }

        Self {
            folds,
            fold_of_column,
        }
    }

    pub fn folds(&self) -> &[Fold] {
        &self.folds
    }

    pub fn num_folds(&self) -> usize {
        self.folds.len()
    }

    #[inline(always)]
    pub fn fold_of(&self, column: usize) -> usize {
        self.fold_of_column[column] as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_counts(assignment: &FoldAssignment, num_affected: usize) -> Vec<(usize, usize)> {
        let mut counts = vec![(0, 0); assignment.num_folds()];
        for column in 0..assignment.fold_of_column.len() {
            let entry = &mut counts[assignment.fold_of(column)];
            if column < num_affected {
                entry.0 += 1;
            } else {
                entry.1 += 1;
            }
        }
        counts
    }

    #[test]
    fn even_split_gives_identical_folds() {
        let folds = k_folds(200, 200, 10);
        assert_eq!(folds.len(), 10);
        assert!(folds.iter().all(|f| *f
            == Fold {
                total: 40,
                affected: 20,
                unaffected: 20
            }));
    }

    #[test]
    fn fold_sizes_respect_class_and_total_bounds() {
        for num_affected in [1usize, 7, 10, 33, 150] {
            for num_unaffected in [1usize, 9, 10, 41, 250] {
                for k in 1..=8 {
                    let folds = k_folds(num_affected, num_unaffected, k);
                    assert_eq!(folds.iter().map(|f| f.affected).sum::<usize>(), num_affected);
                    assert_eq!(
                        folds.iter().map(|f| f.unaffected).sum::<usize>(),
                        num_unaffected
                    );
                    let total = (num_affected + num_unaffected) as f64 / k as f64;
                    for fold in &folds {
                        assert!((fold.affected as f64 - num_affected as f64 / k as f64).abs() < 1.0);
                        assert!(
                            (fold.unaffected as f64 - num_unaffected as f64 / k as f64).abs() < 1.0
                        );
                        assert!((fold.total as f64 - total).abs() <= 1.0);
                        assert_eq!(fold.total, fold.affected + fold.unaffected);
                    }
                }
            }
        }
    }

    #[test]
    fn unaffected_remainder_continues_after_affected_remainder() {
        let folds = k_folds(150, 250, 4);
        let affected: Vec<usize> = folds.iter().map(|f| f.affected).collect();
        let unaffected: Vec<usize> = folds.iter().map(|f| f.unaffected).collect();
        assert_eq!(affected, vec![38, 38, 37, 37]);
        assert_eq!(unaffected, vec![62, 62, 63, 63]);
        assert!(folds.iter().all(|f| f.total == 100));
    }

    #[test]
    fn contiguous_assignment_matches_fold_sizes() {
        let assignment = FoldAssignment::new(7, 5, 3, None);
        let expected: Vec<(usize, usize)> = assignment
            .folds()
            .iter()
            .map(|f| (f.affected, f.unaffected))
            .collect();
        assert_eq!(column_counts(&assignment, 7), expected);
        assert_eq!(assignment.fold_of(0), 0);
        assert_eq!(assignment.fold_of(6), 2);
        assert_eq!(assignment.fold_of(7), 0);
        assert_eq!(assignment.fold_of(11), 2);
    }

    #[test]
    fn seeded_assignment_is_reproducible_and_stratified() {
        let first = FoldAssignment::new(40, 60, 5, Some(17));
        let second = FoldAssignment::new(40, 60, 5, Some(17));
        let contiguous = FoldAssignment::new(40, 60, 5, None);
        assert_eq!(first.fold_of_column, second.fold_of_column);
        assert_ne!(first.fold_of_column, contiguous.fold_of_column);
        assert_eq!(column_counts(&first, 40), vec![(8, 12); 5]);
    }
}
