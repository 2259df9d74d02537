//! A thin wrapper around the OS random number generator, used to pick
//! the uniformly random starting sequence number a primary assigns to
//! the very first client request it orders.

use rand_core::{OsRng, RngCore};

/// Returns a uniformly random `i32` in the inclusive range `[low, high]`.
///
/// # Panics
///
/// Panics if `low > high`.
pub fn random_in_range(low: i32, high: i32) -> i32 {
    assert!(low <= high, "invalid range: low={low} > high={high}");
    let span = (high as i64) - (low as i64) + 1;
    let sample = OsRng.next_u64() % (span as u64);
    low + (sample as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_in_range_stays_within_bounds() {
        for _ in 0..1000 {
            let n = random_in_range(10, 20);
            assert!((10..=20).contains(&n));
        }
    }

    #[test]
    fn random_in_range_handles_degenerate_range() {
        assert_eq!(random_in_range(5, 5), 5);
    }
}
