// ========================================================================================
//
//                          Bounded, mergeable top-K aggregation
//
// ========================================================================================

use crate::heap::PairingHeap;
use crate::mdr::FoldScore;
use crate::types::{Combination, ScoredCombination};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Retention order of the aggregator: the heap minimum is the worst retained entry.
///
/// Higher test accuracy ranks higher. Equal accuracies rank the lexicographically
/// smaller combination higher, which makes the retained set independent of the order in
/// which entries arrive.
#[derive(Debug, Clone)]
struct RankKey {
    accuracy: f64,
    variants: Combination,
}

fn rank(accuracy: f64, variants: &[usize], other: &RankKey) -> Ordering {
    accuracy
        .total_cmp(&other.accuracy)
        .then_with(|| other.variants.as_slice().cmp(variants))
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        rank(self.accuracy, self.variants.as_slice(), other)
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RankKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankKey {}

/// The best `capacity` combinations seen so far.
#[derive(Debug)]
pub struct TopK {
    capacity: usize,
    heap: PairingHeap<RankKey, f64>,
}

impl TopK {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: PairingHeap::with_capacity(capacity.saturating_add(1).min(1 << 16)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Test accuracy of the worst retained entry.
    pub fn worst_accuracy(&self) -> Option<f64> {
        self.heap.peek_min().map(|(key, _)| key.accuracy)
    }

    /// Whether an entry would be retained, checked without allocating.
    pub fn would_accept(&self, test_accuracy: f64, variants: &[usize]) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.heap.len() < self.capacity {
            return true;
        }
        match self.heap.peek_min() {
            Some((worst, _)) => rank(test_accuracy, variants, worst) == Ordering::Greater,
            None => true,
        }
    }

    /// Offers a freshly scored combination; returns whether it was retained.
    pub fn offer(&mut self, variants: &[usize], score: FoldScore) -> bool {
        if !self.would_accept(score.test_accuracy, variants) {
            return false;
        }
        self.push(
            RankKey {
                accuracy: score.test_accuracy,
                variants: Combination::from_sorted_slice(variants),
            },
            score.train_accuracy,
        );
        true
    }

    pub fn offer_scored(&mut self, entry: ScoredCombination) -> bool {
        if !self.would_accept(entry.test_accuracy, entry.variants.as_slice()) {
            return false;
        }
        self.push(
            RankKey {
                accuracy: entry.test_accuracy,
                variants: entry.variants,
            },
            entry.train_accuracy,
        );
        true
    }

    fn push(&mut self, key: RankKey, train_accuracy: f64) {
        if self.heap.len() >= self.capacity {
            self.heap.extract_min();
        }
        self.heap.insert(key, train_accuracy);
    }

    /// Unions both aggregators and keeps the best `max(capacity)` entries.
    ///
    /// The result only depends on the set of entries, not on which side they came from,
    /// so any reduction tree over per-worker aggregators yields the same ranking.
    ///
    /// Cost is linear in `other.len()`: the heap union appends `other`'s arena before
    /// melding the roots. With per-worker aggregators of at most `capacity` entries a
    /// full reduction is `O(workers * capacity)` plus the trimming extractions.
    pub fn merge(mut self, mut other: TopK) -> TopK {
        self.capacity = self.capacity.max(other.capacity);
        self.heap.union(&mut other.heap);
        while self.heap.len() > self.capacity {
            self.heap.extract_min();
        }
        self
    }

    /// Entries ordered best first.
    pub fn into_ranked(self) -> Vec<ScoredCombination> {
        let mut ranked: Vec<ScoredCombination> = self
            .heap
            .into_sorted_vec()
            .into_iter()
            .map(|(key, train_accuracy)| ScoredCombination {
                variants: key.variants,
                test_accuracy: key.accuracy,
                train_accuracy,
            })
            .collect();
        ranked.reverse();
        ranked
    }
}

/// What one worker sends back to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    pub worker: usize,
    pub capacity: usize,
    pub blocks_processed: u64,
    pub combinations_scored: u64,
    pub combinations_skipped: u64,
    /// Best first.
    pub entries: Vec<ScoredCombination>,
}

impl PartialResult {
    pub fn new(worker: usize, top_k: TopK) -> Self {
        let capacity = top_k.capacity();
        Self {
            worker,
            capacity,
            blocks_processed: 0,
            combinations_scored: 0,
            combinations_skipped: 0,
            entries: top_k.into_ranked(),
        }
    }

    pub fn into_top_k(self) -> TopK {
        let mut top_k = TopK::new(self.capacity);
        for entry in self.entries {
            top_k.offer_scored(entry);
        }
        top_k
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn score(test_accuracy: f64) -> FoldScore {
        FoldScore {
            test_accuracy,
            train_accuracy: test_accuracy / 2.0,
        }
    }

    fn random_entries(count: usize, seed: u64) -> Vec<(Vec<usize>, f64)> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|i| {
                // Coarse accuracies so that ties actually occur.
                let accuracy = f64::from(rng.gen_range(0..16u32)) / 16.0;
                (vec![i, i + 1 + rng.gen_range(0..5)], accuracy)
            })
            .collect()
    }

    fn fill(entries: &[(Vec<usize>, f64)], capacity: usize) -> TopK {
        let mut top_k = TopK::new(capacity);
        for (variants, accuracy) in entries {
            top_k.offer(variants, score(*accuracy));
        }
        top_k
    }

    fn expected_ranking(entries: &[(Vec<usize>, f64)], capacity: usize) -> Vec<(Vec<usize>, f64)> {
        let mut sorted = entries.to_vec();
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted.truncate(capacity);
        sorted
    }

    fn summary(ranked: &[ScoredCombination]) -> Vec<(Vec<usize>, f64)> {
        ranked
            .iter()
            .map(|e| (e.variants.as_slice().to_vec(), e.test_accuracy))
            .collect()
    }

    #[test]
    fn keeps_the_best_entries_best_first() {
        let entries = random_entries(300, 1);
        let ranked = fill(&entries, 25).into_ranked();
        assert_eq!(ranked.len(), 25);
        assert_eq!(summary(&ranked), expected_ranking(&entries, 25));
        assert!(ranked.windows(2).all(|w| w[0].test_accuracy >= w[1].test_accuracy));
    }

    #[test]
    fn equal_accuracy_prefers_smaller_combination() {
        let mut top_k = TopK::new(2);
        assert!(top_k.offer(&[4, 9], score(0.7)));
        assert!(top_k.offer(&[2, 3], score(0.7)));
        assert!(top_k.offer(&[1, 8], score(0.7)));
        assert!(!top_k.offer(&[5, 6], score(0.7)));
        assert!(!top_k.offer(&[0, 1], score(0.6)));
        let ranked = top_k.into_ranked();
        assert_eq!(ranked[0].variants.as_slice(), &[1, 8]);
        assert_eq!(ranked[1].variants.as_slice(), &[2, 3]);
        assert!((ranked[0].train_accuracy - 0.35).abs() < 1e-12);
    }

    #[test]
    fn zero_capacity_retains_nothing() {
        let mut top_k = TopK::new(0);
        assert!(!top_k.offer(&[0, 1], score(1.0)));
        assert!(top_k.is_empty());
        assert_eq!(top_k.worst_accuracy(), None);
    }

    #[test]
    fn merge_is_independent_of_order() {
        let entries = random_entries(400, 9);
        let shards: Vec<&[(Vec<usize>, f64)]> = entries.chunks(100).collect();

        let left = shards
            .iter()
            .map(|shard| fill(shard, 30))
            .reduce(TopK::merge)
            .unwrap();
        let right = shards
            .iter()
            .rev()
            .map(|shard| fill(shard, 30))
            .reduce(|acc, next| next.merge(acc))
            .unwrap();
        let tree = fill(shards[0], 30)
            .merge(fill(shards[2], 30))
            .merge(fill(shards[3], 30).merge(fill(shards[1], 30)));

        let expected = expected_ranking(&entries, 30);
        assert_eq!(summary(&left.into_ranked()), expected);
        assert_eq!(summary(&right.into_ranked()), expected);
        assert_eq!(summary(&tree.into_ranked()), expected);
    }

    #[test]
    fn partial_result_survives_serialization() {
        let entries = random_entries(50, 3);
        let mut partial = PartialResult::new(2, fill(&entries, 10));
        partial.blocks_processed = 4;
        partial.combinations_scored = 50;

        let json = serde_json::to_string(&partial).unwrap();
        let decoded: PartialResult = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, partial);

        let restored = decoded.into_top_k().into_ranked();
        assert_eq!(summary(&restored), expected_ranking(&entries, 10));
    }
}
