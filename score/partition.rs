// ========================================================================================
//
//                         Partitioning the combination index space
//
// ========================================================================================
//
// ### Purpose ###
//
// The space of `order`-tuples of variant indices is cut into hyper-cubes ("blocks") with
// an edge of `stride` variant indices. A block is named by a non-decreasing tuple of
// block indices, so the number of blocks is `C(num_blocks_per_dim + order - 1, order)`,
// tiny compared to the combination space itself. Blocks are enumerated centrally, handed
// out to workers as plain coordinate lists, and expanded into combinations only inside
// the worker that owns them.

use crate::types::BlockCoordinate;
use log::debug;
use std::cmp::max;
use thiserror::Error;

/// Target number of blocks per worker when the block volume is derived automatically.
/// Several blocks per worker smooth out the uneven cost of diagonal blocks.
pub const BLOCKS_PER_WORKER: u64 = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("cannot distribute blocks to zero workers")]
    NoWorkers,
    #[error(
        "only {blocks} block(s) for {workers} worker(s); use fewer workers or a smaller block volume"
    )]
    TooFewBlocks { blocks: usize, workers: usize },
    #[error("block coordinate {coords:?} is invalid for {num_blocks_per_dim} blocks per dimension")]
    CoordinateOutOfRange {
        coords: Vec<usize>,
        num_blocks_per_dim: usize,
    },
}

/// Width of a block edge: the smallest `s` with `s^order >= total_operations`.
///
/// Equivalent to `ceil(total_operations^(1/order))`, but exact for perfect powers such
/// as `stride(1024, 2) == 32` where a floating-point root can land just above the
/// integer.
pub fn stride(total_operations: u64, order: usize) -> u64 {
    if total_operations <= 1 || order <= 1 {
        return total_operations.max(1);
    }
    let exponent = u32::try_from(order).unwrap_or(u32::MAX);
    let estimate = (total_operations as f64).powf(1.0 / order as f64).ceil() as u64;
    let mut s = estimate.max(1);
    while s > 1 && reaches(s - 1, exponent, total_operations) {
        s -= 1;
    }
    while !reaches(s, exponent, total_operations) {
        s += 1;
    }
    s
}

#[inline]
fn reaches(base: u64, exponent: u32, target: u64) -> bool {
    base.checked_pow(exponent).is_none_or(|value| value >= target)
}

/// Number of blocks along one axis of the index space.
#[inline]
pub fn num_blocks_per_dim(num_variants: usize, stride: usize) -> usize {
    num_variants.div_ceil(stride.max(1))
}

/// `C(n, k)`, saturating at `u64::MAX`.
pub fn binomial(n: u64, k: u64) -> u64 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut result: u128 = 1;
    for i in 0..k {
        result = result * u128::from(n - i) / u128::from(i + 1);
        if result > u128::from(u64::MAX) {
            return u64::MAX;
        }
    }
    result as u64
}

/// Number of block coordinate tuples for the given grid.
pub fn block_count(num_blocks_per_dim: usize, order: usize) -> u64 {
    if num_blocks_per_dim == 0 || order == 0 {
        return 0;
    }
    binomial((num_blocks_per_dim + order - 1) as u64, order as u64)
}

/// Advances `coords` to its successor in combinations-with-repetition order.
///
/// The rightmost position that can still grow is incremented and every position after
/// it is set to the same value. Returns `false`, leaving `coords` untouched, once
/// `(n-1, ..., n-1)` has been reached.
pub fn next_block(num_blocks_per_dim: usize, coords: &mut [usize]) -> bool {
    let Some(pos) = coords.iter().rposition(|&c| c + 1 < num_blocks_per_dim) else {
        return false;
    };
    let value = coords[pos] + 1;
    coords[pos..].fill(value);
    true
}

/// Every block coordinate of the grid, in enumeration order.
pub fn enumerate_blocks(num_blocks_per_dim: usize, order: usize) -> Vec<BlockCoordinate> {
    if num_blocks_per_dim == 0 || order == 0 {
        return Vec::new();
    }
    let capacity = usize::try_from(block_count(num_blocks_per_dim, order)).unwrap_or(0);
    let mut blocks = Vec::with_capacity(capacity);
    let mut coords = vec![0; order];
    loop {
        blocks.push(BlockCoordinate::new(coords.clone()));
        if !next_block(num_blocks_per_dim, &mut coords) {
            break;
        }
    }
    blocks
}

#[inline]
fn window_start(coord: usize, stride: usize) -> usize {
    coord * stride
}

#[inline]
fn window_end(coord: usize, stride: usize, num_variants: usize) -> usize {
    (coord * stride + stride).min(num_variants)
}

/// Writes the first combination of the block into `combo`.
///
/// Position 0 starts at its window; each later position either packs right after its
/// predecessor (same block index, i.e. on the diagonal) or jumps to the start of its own
/// window. Returns `false` when the block holds no strictly increasing tuple, which
/// happens for diagonal blocks narrower than the order or windows clipped by
/// `num_variants`.
pub fn first_combination_in_block(
    coords: &[usize],
    stride: usize,
    num_variants: usize,
    combo: &mut [usize],
) -> bool {
    debug_assert_eq!(coords.len(), combo.len());
    for j in 0..coords.len() {
        let value = if j > 0 && coords[j] == coords[j - 1] {
            combo[j - 1] + 1
        } else {
            window_start(coords[j], stride)
        };
        if value >= window_end(coords[j], stride, num_variants) {
            return false;
        }
        combo[j] = value;
    }
    true
}

/// Advances `combo` to its lexicographic successor inside the block.
///
/// Position `j` is bounded to `[coords[j] * stride, coords[j] * stride + stride)` and
/// clipped to `num_variants`; positions stay strictly increasing. Returns `false` when
/// the block is exhausted.
pub fn next_combination_in_block(
    coords: &[usize],
    stride: usize,
    num_variants: usize,
    combo: &mut [usize],
) -> bool {
    for j in (0..combo.len()).rev() {
        let candidate = combo[j] + 1;
        if suffix_fits(coords, stride, num_variants, j, candidate) {
            combo[j] = candidate;
            for k in j + 1..combo.len() {
                combo[k] = max(window_start(coords[k], stride), combo[k - 1] + 1);
            }
            return true;
        }
    }
    false
}

// Growing position `j` only makes the tightest completion of the suffix larger, so a
// failure here means every larger candidate at `j` fails as well.
fn suffix_fits(
    coords: &[usize],
    stride: usize,
    num_variants: usize,
    j: usize,
    candidate: usize,
) -> bool {
    if candidate >= window_end(coords[j], stride, num_variants) {
        return false;
    }
    let mut previous = candidate;
    for k in j + 1..coords.len() {
        let value = max(window_start(coords[k], stride), previous + 1);
        if value >= window_end(coords[k], stride, num_variants) {
            return false;
        }
        previous = value;
    }
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Fresh,
    Active,
    Done,
}

/// Walks the combinations of one block without allocating per step.
#[derive(Debug)]
pub struct BlockCursor<'a> {
    coords: &'a [usize],
    stride: usize,
    num_variants: usize,
    combo: Vec<usize>,
    state: CursorState,
}

impl<'a> BlockCursor<'a> {
    pub fn new(block: &'a BlockCoordinate, stride: usize, num_variants: usize) -> Self {
        Self {
            coords: block.as_slice(),
            stride,
            num_variants,
            combo: vec![0; block.order()],
            state: CursorState::Fresh,
        }
    }

    /// The next combination of the block, or `None` once it is exhausted.
    pub fn advance(&mut self) -> Option<&[usize]> {
        let has_next = match self.state {
            CursorState::Fresh => first_combination_in_block(
                self.coords,
                self.stride,
                self.num_variants,
                &mut self.combo,
            ),
            CursorState::Active => next_combination_in_block(
                self.coords,
                self.stride,
                self.num_variants,
                &mut self.combo,
            ),
            CursorState::Done => false,
        };
        if has_next {
            self.state = CursorState::Active;
            Some(&self.combo)
        } else {
            self.state = CursorState::Done;
            None
        }
    }
}

fn check_coordinate(
    block: &BlockCoordinate,
    num_blocks_per_dim: usize,
) -> Result<(), PartitionError> {
    let coords = block.as_slice();
    let in_range = coords.iter().all(|&c| c < num_blocks_per_dim);
    let ordered = coords.windows(2).all(|pair| pair[0] <= pair[1]);
    if coords.is_empty() || !in_range || !ordered {
        return Err(PartitionError::CoordinateOutOfRange {
            coords: coords.to_vec(),
            num_blocks_per_dim,
        });
    }
    Ok(())
}

/// Splits the block list into `workers` contiguous slices.
///
/// The first `blocks % workers` slices receive one extra block.
pub fn distribute(
    blocks: Vec<BlockCoordinate>,
    workers: usize,
    num_blocks_per_dim: usize,
) -> Result<Vec<Vec<BlockCoordinate>>, PartitionError> {
    if workers == 0 {
        return Err(PartitionError::NoWorkers);
    }
    for block in &blocks {
        check_coordinate(block, num_blocks_per_dim)?;
    }
    if blocks.len() < workers {
        return Err(PartitionError::TooFewBlocks {
            blocks: blocks.len(),
            workers,
        });
    }

    let base = blocks.len() / workers;
    let extra = blocks.len() % workers;
    let mut remaining = blocks.into_iter();
    let assignments = (0..workers)
        .map(|worker| {
            let take = base + usize::from(worker < extra);
            remaining.by_ref().take(take).collect()
        })
        .collect();
    Ok(assignments)
}

/// Partitioning parameters for one search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPlan {
    pub num_variants: usize,
    pub order: usize,
    pub block_volume: u64,
    pub stride: usize,
    pub num_blocks_per_dim: usize,
    pub total_combinations: u64,
}

impl SearchPlan {
    /// Derives the block geometry.
    ///
    /// Without an explicit `block_volume`, the volume is chosen so that roughly
    /// [`BLOCKS_PER_WORKER`] blocks exist per worker.
    pub fn new(
        num_variants: usize,
        order: usize,
        workers: usize,
        block_volume: Option<u64>,
    ) -> Self {
        let total_combinations = binomial(num_variants as u64, order as u64);
        let block_volume = block_volume
            .unwrap_or_else(|| {
                total_combinations / (workers.max(1) as u64).saturating_mul(BLOCKS_PER_WORKER)
            })
            .max(1);
        let edge = stride(block_volume, order).min(num_variants.max(1) as u64);
        let stride = usize::try_from(edge).unwrap_or(usize::MAX).max(1);
        let plan = Self {
            num_variants,
            order,
            block_volume,
            stride,
            num_blocks_per_dim: num_blocks_per_dim(num_variants, stride),
            total_combinations,
        };
        debug!("Search plan: {plan:?}");
        plan
    }

    pub fn block_count(&self) -> u64 {
        block_count(self.num_blocks_per_dim, self.order)
    }

    pub fn blocks(&self) -> Vec<BlockCoordinate> {
        enumerate_blocks(self.num_blocks_per_dim, self.order)
    }

    /// Enumerates the blocks and slices them across `workers`.
    pub fn assignments(&self, workers: usize) -> Result<Vec<Vec<BlockCoordinate>>, PartitionError> {
        distribute(self.blocks(), workers, self.num_blocks_per_dim)
    }
}
