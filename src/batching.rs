//! Splitting staged pages into index update batches.
//!
//! The index backend accepts at most [`SOURCE_BATCH_LIMIT`] source files per
//! update request. Batches preserve discovery order and are never empty: a
//! staged count that is an exact multiple of the limit produces exactly
//! `count / limit` full batches and nothing more.

/// Maximum number of sources in one add-sources update.
pub const SOURCE_BATCH_LIMIT: usize = 10;

/// Number of batches `count` items split into at `limit` per batch.
pub fn batch_count(count: usize, limit: usize) -> usize {
    assert!(limit > 0, "batch limit must be > 0");
    count.div_ceil(limit)
}

/// Partition `items` into ordered, non-empty batches of at most `limit`.
///
/// # Panics
///
/// Panics if `limit` is zero.
pub fn partition<T>(items: &[T], limit: usize) -> Vec<&[T]> {
    let mut batches = Vec::with_capacity(batch_count(items.len(), limit));
    batches.extend(items.chunks(limit));
    batches
}

/// Partition with the backend's source limit.
pub fn source_batches<T>(items: &[T]) -> Vec<&[T]> {
    partition(items, SOURCE_BATCH_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(n: usize) -> Vec<usize> {
        let items: Vec<usize> = (0..n).collect();
        source_batches(&items).iter().map(|b| b.len()).collect()
    }

    #[test]
    fn empty_input_yields_no_batches() {
        assert!(sizes(0).is_empty());
        assert_eq!(batch_count(0, SOURCE_BATCH_LIMIT), 0);
    }

    #[test]
    fn boundary_counts() {
        assert_eq!(sizes(1), vec![1]);
        assert_eq!(sizes(9), vec![9]);
        assert_eq!(sizes(10), vec![10]);
        assert_eq!(sizes(11), vec![10, 1]);
        assert_eq!(sizes(20), vec![10, 10]);
        assert_eq!(sizes(25), vec![10, 10, 5]);
    }

    #[test]
    fn batches_cover_input_in_order_without_duplicates() {
        for n in 0..=47 {
            let items: Vec<usize> = (0..n).collect();
            let batches = source_batches(&items);
            assert_eq!(batches.len(), batch_count(n, SOURCE_BATCH_LIMIT));
            assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= SOURCE_BATCH_LIMIT));
            let flattened: Vec<usize> = batches.concat();
            assert_eq!(flattened, items);
        }
    }

    #[test]
    #[should_panic(expected = "batch limit must be > 0")]
    fn zero_limit_panics() {
        partition(&[1, 2, 3], 0);
    }
}
