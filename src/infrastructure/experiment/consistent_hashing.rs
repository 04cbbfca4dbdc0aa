//! Traffic splitters for experiment variant assignment
//!
//! The default splitter hashes experiment and visitor so the same visitor
//! always lands in the same bucket of a given experiment, across processes
//! and restarts.

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::domain::experiment::{ExperimentId, TrafficSplitter, VisitorId};

/// 2^53, the number of evenly spaced doubles in [0, 1)
const UNIT_SCALE: f64 = 9_007_199_254_740_992.0;

/// Deterministic splitter backed by SHA-256
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsistentHasher;

impl ConsistentHasher {
    /// Hash an experiment/visitor pair to a uniform value in `[0, 1)`
    pub fn hash_assignment(experiment_id: &str, visitor_id: &str) -> f64 {
        let mut hasher = Sha256::new();
        hasher.update(experiment_id.as_bytes());
        hasher.update(b":");
        hasher.update(visitor_id.as_bytes());
        let digest = hasher.finalize();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);

        (u64::from_be_bytes(prefix) >> 11) as f64 / UNIT_SCALE
    }
}

impl TrafficSplitter for ConsistentHasher {
    fn sample(&self, experiment_id: &ExperimentId, visitor_id: &VisitorId) -> f64 {
        Self::hash_assignment(experiment_id.as_str(), visitor_id.as_str())
    }
}

/// Non-deterministic splitter drawing from the thread-local RNG
///
/// Stickiness still holds because assignments are persisted on first sight.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSplitter;

impl TrafficSplitter for RandomSplitter {
    fn sample(&self, _experiment_id: &ExperimentId, _visitor_id: &VisitorId) -> f64 {
        rand::thread_rng().gen_range(0.0..1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistent_hash_same_input() {
        let hash1 = ConsistentHasher::hash_assignment("exp-1", "visitor-1");
        let hash2 = ConsistentHasher::hash_assignment("exp-1", "visitor-1");
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_hash_in_unit_interval() {
        for i in 0..500 {
            let hash = ConsistentHasher::hash_assignment("exp-1", &format!("visitor-{i}"));
            assert!((0.0..1.0).contains(&hash), "{hash}");
        }
    }

    #[test]
    fn test_pair_is_not_ambiguous() {
        // "ab" + "c" and "a" + "bc" must not collide through concatenation
        let left = ConsistentHasher::hash_assignment("ab", "c");
        let right = ConsistentHasher::hash_assignment("a", "bc");
        assert_ne!(left, right);
    }

    #[test]
    fn test_hash_distribution() {
        let mut buckets = [0u32; 10];

        for i in 0..1000 {
            let hash = ConsistentHasher::hash_assignment("exp-1", &format!("visitor-{i}"));
            buckets[(hash * 10.0) as usize] += 1;
        }

        for count in buckets {
            assert!(count > 50, "Bucket has too few items: {count}");
            assert!(count < 150, "Bucket has too many items: {count}");
        }
    }

    #[test]
    fn test_splitter_trait_uses_ids() {
        let experiment = ExperimentId::new("pricing-v2").unwrap();
        let visitor = VisitorId::new("visitor-42").unwrap();

        assert_eq!(
            ConsistentHasher.sample(&experiment, &visitor),
            ConsistentHasher::hash_assignment("pricing-v2", "visitor-42")
        );
    }

    #[test]
    fn test_random_splitter_range() {
        let experiment = ExperimentId::new("exp-1").unwrap();
        let visitor = VisitorId::new("v").unwrap();

        for _ in 0..200 {
            let sample = RandomSplitter.sample(&experiment, &visitor);
            assert!((0.0..1.0).contains(&sample));
        }
    }
}
