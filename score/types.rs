// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// Only types used by more than one module belong here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The byte stored in the packed matrix for a missing or unparseable call.
pub const MISSING_GENOTYPE: u8 = 255;

/// Number of genotype states a called variant can take (0, 1 or 2 alternate alleles).
pub const GENOTYPE_STATES: usize = 3;

/// Binary disease status of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phenotype {
    Affected,
    Unaffected,
}

impl Phenotype {
    /// Parses the labels accepted in phenotype tables.
    pub fn from_label(label: &str) -> Option<Self> {
        let trimmed = label.trim();
        if trimmed == "1"
            || trimmed.eq_ignore_ascii_case("affected")
            || trimmed.eq_ignore_ascii_case("case")
        {
            Some(Self::Affected)
        } else if trimmed == "0"
            || trimmed.eq_ignore_ascii_case("unaffected")
            || trimmed.eq_ignore_ascii_case("control")
        {
            Some(Self::Unaffected)
        } else {
            None
        }
    }

    #[inline]
    pub fn is_affected(self) -> bool {
        matches!(self, Self::Affected)
    }
}

/// A strictly increasing tuple of variant indices.
///
/// Strict ordering is what keeps `(3, 7)` and `(7, 3)` from being scored twice.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Combination(Box<[usize]>);

impl Combination {
    /// Returns `None` unless `indices` is non-empty and strictly increasing.
    pub fn new(indices: Vec<usize>) -> Option<Self> {
        if indices.is_empty() || !is_strictly_increasing(&indices) {
            return None;
        }
        Some(Self(indices.into_boxed_slice()))
    }

    /// Copies a slice that the caller already knows to be strictly increasing,
    /// such as the cursor of a block enumeration.
    pub(crate) fn from_sorted_slice(indices: &[usize]) -> Self {
        debug_assert!(is_strictly_increasing(indices));
        Self(indices.into())
    }

    #[inline]
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, idx) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{idx}")?;
        }
        Ok(())
    }
}

fn is_strictly_increasing(indices: &[usize]) -> bool {
    indices.windows(2).all(|pair| pair[0] < pair[1])
}

/// A non-decreasing tuple of block indices, one per combination position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockCoordinate(Vec<usize>);

impl BlockCoordinate {
    pub fn new(coords: Vec<usize>) -> Self {
        Self(coords)
    }

    #[inline]
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.0.len()
    }
}

/// A combination together with its cross-validated accuracies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCombination {
    pub variants: Combination,
    /// Mean held-out accuracy across folds; this is the ranking score.
    pub test_accuracy: f64,
    /// Mean accuracy on the training portion of each fold.
    pub train_accuracy: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combination_rejects_unsorted_and_duplicate_indices() {
        assert!(Combination::new(vec![1, 4, 9]).is_some());
        assert!(Combination::new(vec![4, 1]).is_none());
        assert!(Combination::new(vec![2, 2]).is_none());
        assert!(Combination::new(Vec::new()).is_none());
    }

    #[test]
    fn combination_display_is_comma_separated() {
        let combo = Combination::new(vec![0, 12, 305]).unwrap();
        assert_eq!(combo.to_string(), "0,12,305");
        assert_eq!(combo.order(), 3);
    }

    #[test]
    fn phenotype_labels_cover_numeric_and_named_forms() {
        assert_eq!(Phenotype::from_label("1"), Some(Phenotype::Affected));
        assert_eq!(Phenotype::from_label(" Case "), Some(Phenotype::Affected));
        assert_eq!(Phenotype::from_label("0"), Some(Phenotype::Unaffected));
        assert_eq!(Phenotype::from_label("control"), Some(Phenotype::Unaffected));
        assert_eq!(Phenotype::from_label("-9"), None);
    }
}
