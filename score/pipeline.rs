// ========================================================================================
//
//                               Search orchestration
//
// ========================================================================================
//
// ### Purpose ###
//
// Runs one exhaustive search. The coordinator validates the configuration, cuts the
// combination space into blocks, hands every worker its block list once, and collects
// one partial top-K per worker once. Workers share nothing mutable apart from a relaxed
// progress counter; the final ranking is a reduction of the partial results whose
// outcome does not depend on the order in which they arrive.

use crate::aggregate::{PartialResult, TopK};
use crate::config::{ConfigError, SearchConfig};
use crate::dataset::{DatasetError, GenotypeDataset};
use crate::folds::FoldAssignment;
use crate::heap::HeapError;
use crate::mdr::{MdrEvaluator, ScoringMetric};
use crate::partition::{BlockCursor, PartitionError, SearchPlan};
use crate::types::{BlockCoordinate, ScoredCombination};
use crossbeam_channel::{Receiver, Sender, bounded};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info};
use rayon::prelude::*;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// The number of combinations a worker scores before updating the shared counter.
const PROGRESS_UPDATE_BATCH_SIZE: u64 = 1024;
/// How often the progress bar is redrawn from the shared counter.
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
    #[error("worker {0} lost its connection to the coordinator")]
    WorkerDisconnected(usize),
    #[error("expected {expected} partial results but received {received}")]
    MissingResults { expected: usize, received: usize },
}

/// Counters describing a finished search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchStats {
    pub workers: usize,
    pub stride: usize,
    pub num_blocks_per_dim: usize,
    pub blocks: u64,
    pub total_combinations: u64,
    pub combinations_scored: u64,
    pub combinations_skipped: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Best first.
    pub ranked: Vec<ScoredCombination>,
    pub stats: SearchStats,
}

#[derive(Clone, Copy)]
struct WorkerContext<'a> {
    dataset: &'a GenotypeDataset,
    folds: &'a FoldAssignment,
    plan: &'a SearchPlan,
    top_k: usize,
    metric: ScoringMetric,
    progress: &'a AtomicU64,
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    let style = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {human_pos}/{human_len} ({eta}) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ");
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

/// Chooses the block geometry and the number of workers.
///
/// An explicit worker count is kept as is, so a grid with fewer blocks than workers
/// fails during distribution. The CPU-derived default is capped at the block count.
fn plan_search(num_variants: usize, config: &SearchConfig) -> (SearchPlan, usize) {
    let requested = config.resolved_workers().max(1);
    let plan = SearchPlan::new(num_variants, config.order, requested, config.block_volume);
    if config.workers.is_some() {
        return (plan, requested);
    }
    let blocks = usize::try_from(plan.block_count()).unwrap_or(usize::MAX);
    let workers = requested.min(blocks.max(1));
    if workers < requested {
        debug!("Only {blocks} blocks; using {workers} of {requested} available workers.");
    }
    (plan, workers)
}

/// Scores every combination of `config.order` variants and returns the best
/// `config.top_k`, best first.
pub fn run_search(
    dataset: &GenotypeDataset,
    config: &SearchConfig,
) -> Result<SearchOutcome, SearchError> {
    let start = Instant::now();
    config.validate(dataset)?;

    // --- 1. Plan and partition ---
    let (plan, workers) = plan_search(dataset.num_variants(), config);
    let assignments = plan.assignments(workers)?;
    let blocks = plan.block_count();
    eprintln!(
        "> Scoring {} combinations of order {} across {} workers ({} blocks, stride {}).",
        plan.total_combinations, config.order, workers, blocks, plan.stride
    );

    let folds = FoldAssignment::new(
        dataset.num_affected(),
        dataset.num_unaffected(),
        config.folds,
        config.seed,
    );
    debug!("Fold sizes: {:?}", folds.folds());

    // --- 2. Distribute, score, collect ---
    let progress = AtomicU64::new(0);
    let finished = AtomicBool::new(false);
    let pb = create_progress_bar(plan.total_combinations, "Scoring combinations");
    let context = WorkerContext {
        dataset,
        folds: &folds,
        plan: &plan,
        top_k: config.top_k,
        metric: config.metric,
        progress: &progress,
    };

    let partials = thread::scope(|s| -> Result<Vec<PartialResult>, SearchError> {
        let updater_pb = pb.clone();
        let (progress, finished) = (&progress, &finished);
        s.spawn(move || {
            while !finished.load(Ordering::Acquire) {
                updater_pb.set_position(progress.load(Ordering::Relaxed));
                thread::sleep(PROGRESS_POLL_INTERVAL);
            }
            updater_pb.set_position(progress.load(Ordering::Relaxed));
        });

        let (result_tx, result_rx) = bounded::<PartialResult>(workers);
        let mut task_txs = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (task_tx, task_rx) = bounded::<Vec<BlockCoordinate>>(1);
            let result_tx = result_tx.clone();
            task_txs.push(task_tx);
            handles.push(s.spawn(move || run_worker(worker, context, task_rx, result_tx)));
        }
        drop(result_tx);

        for (task_tx, blocks) in task_txs.into_iter().zip(assignments) {
            // A worker that is already gone reports itself through its join handle.
            let _ = task_tx.send(blocks);
        }

        let partials: Vec<PartialResult> = result_rx.iter().collect();
        finished.store(true, Ordering::Release);

        for (worker, handle) in handles.into_iter().enumerate() {
            handle
                .join()
                .map_err(|_| SearchError::WorkerPanicked(worker))??;
        }
        if partials.len() != workers {
            return Err(SearchError::MissingResults {
                expected: workers,
                received: partials.len(),
            });
        }
        Ok(partials)
    });
    pb.finish_and_clear();
    let partials = partials?;

    // --- 3. Reduce ---
    let combinations_scored = partials.iter().map(|p| p.combinations_scored).sum();
    let combinations_skipped = partials.iter().map(|p| p.combinations_skipped).sum();
    let merged = partials
        .into_par_iter()
        .map(PartialResult::into_top_k)
        .reduce(|| TopK::new(config.top_k), TopK::merge);
    let ranked = merged.into_ranked();

    let stats = SearchStats {
        workers,
        stride: plan.stride,
        num_blocks_per_dim: plan.num_blocks_per_dim,
        blocks,
        total_combinations: plan.total_combinations,
        combinations_scored,
        combinations_skipped,
        elapsed: start.elapsed(),
    };
    info!(
        "Search finished in {:.2?}: {} scored, {} skipped, {} retained.",
        stats.elapsed,
        stats.combinations_scored,
        stats.combinations_skipped,
        ranked.len()
    );
    Ok(SearchOutcome { ranked, stats })
}

fn run_worker(
    worker: usize,
    context: WorkerContext<'_>,
    tasks: Receiver<Vec<BlockCoordinate>>,
    results: Sender<PartialResult>,
) -> Result<(), SearchError> {
    let blocks = tasks
        .recv()
        .map_err(|_| SearchError::WorkerDisconnected(worker))?;

    let plan = context.plan;
    let mut evaluator =
        MdrEvaluator::new(context.dataset, context.folds, plan.order, context.metric);
    let mut top_k = TopK::new(context.top_k);
    let mut scored: u64 = 0;
    let mut skipped: u64 = 0;
    let mut local_progress: u64 = 0;

    for block in &blocks {
        let mut cursor = BlockCursor::new(block, plan.stride, plan.num_variants);
        while let Some(combination) = cursor.advance() {
            match evaluator.evaluate(combination) {
                Some(score) => {
                    scored += 1;
                    top_k.offer(combination, score);
                }
                None => skipped += 1,
            }

            local_progress += 1;
            if local_progress == PROGRESS_UPDATE_BATCH_SIZE {
                context
                    .progress
                    .fetch_add(PROGRESS_UPDATE_BATCH_SIZE, Ordering::Relaxed);
                local_progress = 0;
            }
        }
    }
    if local_progress > 0 {
        context
            .progress
            .fetch_add(local_progress, Ordering::Relaxed);
    }
    debug!(
        "Worker {worker}: {} blocks, {scored} scored, {skipped} skipped.",
        blocks.len()
    );

    let mut partial = PartialResult::new(worker, top_k);
    partial.blocks_processed = blocks.len() as u64;
    partial.combinations_scored = scored;
    partial.combinations_skipped = skipped;
    results
        .send(partial)
        .map_err(|_| SearchError::WorkerDisconnected(worker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::binomial;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    // Random genotypes, except that variants 2 and 7 (when present) jointly determine the
    // phenotype: affected samples carry one of the patterns in `RISK`, unaffected ones
    // never do.
    const RISK: [(u8, u8); 3] = [(0, 2), (2, 0), (1, 1)];

    fn planted_dataset(num_variants: usize, per_class: usize, seed: u64) -> GenotypeDataset {
        let num_samples = 2 * per_class;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut matrix: Vec<u8> = (0..num_variants * num_samples)
            .map(|_| rng.gen_range(0..3))
            .collect();
        for column in (0..num_samples).filter(|_| num_variants > 7) {
            let (a, b) = if column < per_class {
                RISK[rng.gen_range(0..RISK.len())]
            } else {
                loop {
                    let pattern = (rng.gen_range(0..3), rng.gen_range(0..3));
                    if !RISK.contains(&pattern) {
                        break pattern;
                    }
                }
            };
            matrix[2 * num_samples + column] = a;
            matrix[7 * num_samples + column] = b;
        }
        GenotypeDataset::from_matrix(matrix, per_class, per_class).unwrap()
    }

    fn config(workers: usize) -> SearchConfig {
        SearchConfig {
            order: 2,
            top_k: 5,
            folds: 5,
            workers: Some(workers),
            seed: Some(7),
            block_volume: Some(4),
            metric: ScoringMetric::Balanced,
        }
    }

    #[test]
    fn planted_pair_ranks_first() {
        let dataset = planted_dataset(12, 40, 1);
        let outcome = run_search(&dataset, &config(3)).unwrap();
        assert_eq!(outcome.ranked.len(), 5);
        assert_eq!(outcome.ranked[0].variants.as_slice(), &[2, 7]);
        assert!((outcome.ranked[0].test_accuracy - 1.0).abs() < 1e-12);
        assert_eq!(
            outcome.stats.combinations_scored + outcome.stats.combinations_skipped,
            binomial(12, 2)
        );
        assert_eq!(outcome.stats.total_combinations, 66);
    }

    #[test]
    fn worker_count_does_not_change_the_ranking() {
        let dataset = planted_dataset(15, 30, 4);
        let single = run_search(&dataset, &config(1)).unwrap();
        let many = run_search(&dataset, &config(6)).unwrap();
        assert_eq!(single.ranked, many.ranked);
        assert_eq!(many.stats.workers, 6);
    }

    #[test]
    fn explicit_workers_beyond_block_count_fail() {
        let dataset = planted_dataset(3, 10, 2);
        let mut too_many = config(64);
        too_many.block_volume = Some(100);
        assert!(matches!(
            run_search(&dataset, &too_many),
            Err(SearchError::Partition(PartitionError::TooFewBlocks { .. }))
        ));
    }

    #[test]
    fn default_workers_are_capped_at_block_count() {
        let mut auto = config(1);
        auto.workers = None;
        auto.block_volume = Some(100);
        let (plan, workers) = plan_search(3, &auto);
        assert_eq!(plan.block_count(), 1);
        assert_eq!(workers, 1);
    }

    #[test]
    fn invalid_config_is_rejected_before_scoring() {
        let dataset = planted_dataset(4, 6, 3);
        let mut bad = config(2);
        bad.folds = 7;
        assert!(matches!(
            run_search(&dataset, &bad),
            Err(SearchError::Config(ConfigError::TooManyFolds { .. }))
        ));
    }
}
