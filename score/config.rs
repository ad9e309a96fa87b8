// ========================================================================================
//
//                                  Search configuration
//
// ========================================================================================

use crate::dataset::GenotypeDataset;
use crate::mdr::ScoringMetric;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest supported combination order. A combination of this order already spans
/// `3^10` genotype cells per fold.
pub const MAX_ORDER: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("the combination order must be at least 1")]
    ZeroOrder,
    #[error("order {order} is larger than the number of variants ({num_variants})")]
    OrderExceedsVariants { order: usize, num_variants: usize },
    #[error("order {order} is above the supported maximum of {}", MAX_ORDER)]
    OrderAboveLimit { order: usize },
    #[error("at least one worker is required")]
    ZeroWorkers,
    #[error("top-k must be at least 1")]
    ZeroTopK,
    #[error("cross-validation needs at least 2 folds, got {0}")]
    TooFewFolds(usize),
    #[error(
        "{folds} folds requested but the smaller class only has {smallest_class} sample(s)"
    )]
    TooManyFolds { folds: usize, smallest_class: usize },
    #[error("the block volume must be at least 1")]
    ZeroBlockVolume,
}

/// Parameters of one search. Every field has a default, so a config file only needs
/// the values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// Number of variants per combination.
    pub order: usize,
    /// Number of combinations to report.
    pub top_k: usize,
    /// Cross-validation folds.
    pub folds: usize,
    /// Worker threads; the number of logical CPUs when unset.
    pub workers: Option<usize>,
    /// Shuffles fold membership when set.
    pub seed: Option<u64>,
    /// Target number of combinations per block; derived from the worker count when unset.
    pub block_volume: Option<u64>,
    pub metric: ScoringMetric,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            order: 2,
            top_k: 10,
            folds: 10,
            workers: None,
            seed: None,
            block_volume: None,
            metric: ScoringMetric::default(),
        }
    }
}

impl SearchConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Explicit worker count, or one per logical CPU.
    pub fn resolved_workers(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get)
    }

    /// Checks the parameters against the dataset they will run on.
    pub fn validate(&self, dataset: &GenotypeDataset) -> Result<(), ConfigError> {
        if self.order == 0 {
            return Err(ConfigError::ZeroOrder);
        }
        if self.order > MAX_ORDER {
            return Err(ConfigError::OrderAboveLimit { order: self.order });
        }
        if self.order > dataset.num_variants() {
            return Err(ConfigError::OrderExceedsVariants {
                order: self.order,
                num_variants: dataset.num_variants(),
            });
        }
        if self.workers == Some(0) {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.top_k == 0 {
            return Err(ConfigError::ZeroTopK);
        }
        if self.folds < 2 {
            return Err(ConfigError::TooFewFolds(self.folds));
        }
        let smallest_class = dataset.num_affected().min(dataset.num_unaffected());
        if self.folds > smallest_class {
            return Err(ConfigError::TooManyFolds {
                folds: self.folds,
                smallest_class,
            });
        }
        if self.block_volume == Some(0) {
            return Err(ConfigError::ZeroBlockVolume);
        }
        Ok(())
    }
}
