// ========================================================================================
//
//                       Multifactor dimensionality reduction scoring
//
// ========================================================================================
//
// ### Purpose ###
//
// A combination of `order` variants splits the cohort into `3^order` genotype cells. Each
// cell is labelled high or low risk from its training counts after normalizing for class
// imbalance, and the resulting classifier is scored on the held-out fold. The evaluator
// below does this for every fold with a single pass over the samples and no allocation
// per combination.

use crate::config::{ConfigError, MAX_ORDER};
use crate::dataset::GenotypeDataset;
use crate::folds::FoldAssignment;
use crate::types::{Combination, GENOTYPE_STATES};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-cell class counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellCounts {
    pub affected: u32,
    pub unaffected: u32,
}

impl CellCounts {
    #[inline(always)]
    fn is_empty(self) -> bool {
        self.affected == 0 && self.unaffected == 0
    }
}

/// The imbalance-normalized majority rule.
///
/// The unaffected count is rescaled by `samples_affected / samples_unaffected`, both
/// counts are renormalized to the cell size, and the cell is high risk when the
/// normalized affected count is strictly larger. Empty cells are low risk.
pub fn is_high_risk(
    count_affected: u32,
    count_unaffected: u32,
    samples_affected: u32,
    samples_unaffected: u32,
) -> bool {
    if count_affected == 0 && count_unaffected == 0 {
        return false;
    }
    let ca = f64::from(count_affected);
    let cu = f64::from(count_unaffected);
    let ratio = f64::from(samples_affected) / f64::from(samples_unaffected);
    let proportional_unaffected = cu * ratio;
    let reduction = (ca + cu) / (proportional_unaffected + ca);
    let normalized_unaffected = proportional_unaffected * reduction;
    let normalized_affected = (ca + cu) - normalized_unaffected;
    normalized_affected > normalized_unaffected
}

/// Indices of the high-risk cells.
pub fn classify_combination(
    cells: &[CellCounts],
    samples_affected: u32,
    samples_unaffected: u32,
) -> Vec<usize> {
    cells
        .iter()
        .enumerate()
        .filter(|(_, c)| is_high_risk(c.affected, c.unaffected, samples_affected, samples_unaffected))
        .map(|(i, _)| i)
        .collect()
}

/// `3^order`, the number of genotype cells of a combination. Callers keep `order` at or
/// below [`MAX_ORDER`].
pub fn num_cells(order: usize) -> usize {
    debug_assert!(order <= MAX_ORDER);
    GENOTYPE_STATES.pow(order as u32)
}

/// Genotypes of every variant in the combination for the given cell, first variant
/// first.
pub fn genotype_pattern(cell: usize, order: usize) -> Vec<u8> {
    let mut pattern = vec![0u8; order];
    let mut rest = cell;
    for slot in pattern.iter_mut().rev() {
        *slot = (rest % GENOTYPE_STATES) as u8;
        rest /= GENOTYPE_STATES;
    }
    pattern
}

/// Whole-cohort contingency table of one combination.
#[derive(Debug, Clone)]
pub struct ContingencyTable {
    order: usize,
    cells: Vec<CellCounts>,
    samples_affected: u32,
    samples_unaffected: u32,
    excluded: usize,
}

impl ContingencyTable {
    /// Samples with a missing call at any variant of the combination are excluded.
    /// Combinations above [`MAX_ORDER`] are rejected before any cell is allocated.
    pub fn build(dataset: &GenotypeDataset, combination: &Combination) -> Result<Self, ConfigError> {
        let order = combination.order();
        if order > MAX_ORDER {
            return Err(ConfigError::OrderAboveLimit { order });
        }
        let rows: Vec<&[u8]> = combination
            .as_slice()
            .iter()
            .map(|&v| dataset.variant(v))
            .collect();
        let mut cells = vec![CellCounts::default(); num_cells(order)];
        let mut excluded = 0;
        for column in 0..dataset.num_samples() {
            let Some(cell) = cell_of(&rows, column) else {
                excluded += 1;
                continue;
            };
            if column < dataset.num_affected() {
                cells[cell].affected += 1;
            } else {
                cells[cell].unaffected += 1;
            }
        }
        let samples_affected = cells.iter().map(|c| c.affected).sum();
        let samples_unaffected = cells.iter().map(|c| c.unaffected).sum();
        Ok(Self {
            order,
            cells,
            samples_affected,
            samples_unaffected,
            excluded,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn cells(&self) -> &[CellCounts] {
        &self.cells
    }

    pub fn samples_affected(&self) -> u32 {
        self.samples_affected
    }

    pub fn samples_unaffected(&self) -> u32 {
        self.samples_unaffected
    }

    /// Samples dropped because of a missing call.
    pub fn excluded(&self) -> usize {
        self.excluded
    }

    pub fn high_risk_cells(&self) -> Vec<usize> {
        if self.samples_unaffected == 0 {
            return Vec::new();
        }
        classify_combination(&self.cells, self.samples_affected, self.samples_unaffected)
    }
}

#[inline(always)]
fn cell_of(rows: &[&[u8]], column: usize) -> Option<usize> {
    let mut cell = 0usize;
    for row in rows {
        let genotype = row[column];
        if genotype as usize >= GENOTYPE_STATES {
            return None;
        }
        cell = cell * GENOTYPE_STATES + genotype as usize;
    }
    Some(cell)
}

/// How a fold's predictions are turned into one accuracy figure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMetric {
    /// Mean of the per-class correctness rates.
    #[default]
    Balanced,
    /// Fraction of correctly classified samples.
    Accuracy,
}

impl FromStr for ScoringMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "balanced" => Ok(Self::Balanced),
            "accuracy" => Ok(Self::Accuracy),
            other => Err(format!(
                "unknown metric '{other}'; expected 'balanced' or 'accuracy'"
            )),
        }
    }
}

impl fmt::Display for ScoringMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Balanced => f.write_str("balanced"),
            Self::Accuracy => f.write_str("accuracy"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Confusion {
    true_positive: u64,
    false_negative: u64,
    false_positive: u64,
    true_negative: u64,
}

impl ScoringMetric {
    fn score(self, c: Confusion) -> Option<f64> {
        let positives = c.true_positive + c.false_negative;
        let negatives = c.false_positive + c.true_negative;
        match self {
            Self::Accuracy => {
                let total = positives + negatives;
                (total > 0).then(|| (c.true_positive + c.true_negative) as f64 / total as f64)
            }
            Self::Balanced => {
                let mut sum = 0.0;
                let mut classes = 0u32;
                if positives > 0 {
                    sum += c.true_positive as f64 / positives as f64;
                    classes += 1;
                }
                if negatives > 0 {
                    sum += c.true_negative as f64 / negatives as f64;
                    classes += 1;
                }
                (classes > 0).then(|| sum / f64::from(classes))
            }
        }
    }
}

/// Cross-validated accuracies of one combination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FoldScore {
    pub test_accuracy: f64,
    pub train_accuracy: f64,
}

/// Scores combinations against a fixed dataset and fold assignment.
///
/// Holds one count table per fold; the training table of fold `f` is derived as the
/// cohort total minus fold `f`, so every sample is read exactly once per combination.
pub struct MdrEvaluator<'a> {
    dataset: &'a GenotypeDataset,
    folds: &'a FoldAssignment,
    metric: ScoringMetric,
    num_cells: usize,
    fold_counts: Vec<CellCounts>,
    totals: Vec<CellCounts>,
    high_risk: Vec<bool>,
    rows: Vec<&'a [u8]>,
}

impl<'a> MdrEvaluator<'a> {
    pub fn new(
        dataset: &'a GenotypeDataset,
        folds: &'a FoldAssignment,
        order: usize,
        metric: ScoringMetric,
    ) -> Self {
        let num_cells = num_cells(order);
        Self {
            dataset,
            folds,
            metric,
            num_cells,
            fold_counts: vec![CellCounts::default(); folds.num_folds() * num_cells],
            totals: vec![CellCounts::default(); num_cells],
            high_risk: vec![false; num_cells],
            rows: Vec::with_capacity(order),
        }
    }

    /// Returns `None` when some fold's training set lacks one of the classes, in which
    /// case the combination is skipped rather than scored.
    pub fn evaluate(&mut self, combination: &[usize]) -> Option<FoldScore> {
        debug_assert_eq!(num_cells(combination.len()), self.num_cells);
        self.accumulate(combination);

        let num_cells = self.num_cells;
        let num_folds = self.folds.num_folds();
        let mut train_sum = 0.0;
        let mut test_sum = 0.0;
        let mut test_folds = 0u32;

        for fold in 0..num_folds {
            let held_out = &self.fold_counts[fold * num_cells..(fold + 1) * num_cells];

            let mut train_affected = 0u32;
            let mut train_unaffected = 0u32;
            for (total, test) in self.totals.iter().zip(held_out) {
                train_affected += total.affected - test.affected;
                train_unaffected += total.unaffected - test.unaffected;
            }
            if train_affected == 0 || train_unaffected == 0 {
                return None;
            }

            let mut train = Confusion::default();
            let mut test = Confusion::default();
            for ((total, held), label) in self
                .totals
                .iter()
                .zip(held_out)
                .zip(self.high_risk.iter_mut())
            {
                let trained = CellCounts {
                    affected: total.affected - held.affected,
                    unaffected: total.unaffected - held.unaffected,
                };
                *label = !trained.is_empty()
                    && is_high_risk(
                        trained.affected,
                        trained.unaffected,
                        train_affected,
                        train_unaffected,
                    );
                tally(&mut train, trained, *label);
                tally(&mut test, *held, *label);
            }

            train_sum += self.metric.score(train)?;
            if let Some(accuracy) = self.metric.score(test) {
                test_sum += accuracy;
                test_folds += 1;
            }
        }

        if test_folds == 0 {
            return None;
        }
        Some(FoldScore {
            test_accuracy: test_sum / f64::from(test_folds),
            train_accuracy: train_sum / num_folds as f64,
        })
    }

    fn accumulate(&mut self, combination: &[usize]) {
        self.fold_counts.fill(CellCounts::default());
        let dataset = self.dataset;
        self.rows.clear();
        self.rows
            .extend(combination.iter().map(|&v| dataset.variant(v)));

        let num_cells = self.num_cells;
        let num_affected = self.dataset.num_affected();
        for column in 0..num_affected {
            if let Some(cell) = cell_of(&self.rows, column) {
                self.fold_counts[self.folds.fold_of(column) * num_cells + cell].affected += 1;
            }
        }
        for column in num_affected..self.dataset.num_samples() {
            if let Some(cell) = cell_of(&self.rows, column) {
                self.fold_counts[self.folds.fold_of(column) * num_cells + cell].unaffected += 1;
            }
        }

        self.totals.fill(CellCounts::default());
        for fold in self.fold_counts.chunks_exact(num_cells) {
            for (total, cell) in self.totals.iter_mut().zip(fold) {
                total.affected += cell.affected;
                total.unaffected += cell.unaffected;
            }
        }
    }
}

#[inline(always)]
fn tally(confusion: &mut Confusion, cell: CellCounts, high_risk: bool) {
    let affected = u64::from(cell.affected);
    let unaffected = u64::from(cell.unaffected);
    if high_risk {
        confusion.true_positive += affected;
        confusion.false_positive += unaffected;
    } else {
        confusion.false_negative += affected;
        confusion.true_negative += unaffected;
    }
}
