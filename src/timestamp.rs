//! Wraparound-tolerant ordering for retirement timestamps.

use std::cmp::Ordering;

/// Compares two timestamps on a circular `u32` counter.
///
/// `a` is `Greater` than `b` when the signed interpretation of
/// `a.wrapping_sub(b)` is positive, so ordering stays correct across
/// counter overflow. The result is only meaningful while the true
/// distance between live timestamps stays under half the counter range
/// (`2^31`); callers must guarantee that, it is not detected here.
pub fn timestamp_cmp(a: u32, b: u32) -> Ordering {
    (a.wrapping_sub(b) as i32).cmp(&0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::plain(5, 3, Ordering::Greater)]
    #[case::equal(42, 42, Ordering::Equal)]
    #[case::behind(3, 5, Ordering::Less)]
    #[case::zero(0, 0, Ordering::Equal)]
    #[case::wrap_ahead(2, u32::MAX - 1, Ordering::Greater)]
    #[case::wrap_behind(u32::MAX - 1, 2, Ordering::Less)]
    #[case::wrap_boundary(0, u32::MAX, Ordering::Greater)]
    #[case::half_range(0x8000_0000, 0, Ordering::Less)]
    fn ordering(#[case] a: u32, #[case] b: u32, #[case] expected: Ordering) {
        assert_eq!(timestamp_cmp(a, b), expected);
    }

    #[rstest]
    #[case(10, 20)]
    #[case(u32::MAX - 5, 3)]
    #[case(0, 0x7FFF_FFFF)]
    fn antisymmetric(#[case] a: u32, #[case] b: u32) {
        assert_eq!(timestamp_cmp(a, b), timestamp_cmp(b, a).reverse());
    }
}
