use std::sync::atomic::{AtomicU64, Ordering};

/// Fractional part of the golden ratio, in 64-bit fixed point.
const GOLDEN_FRACTION: u64 = 0x9E37_79B9_7F4A_7C15;

/// Low-discrepancy placement over `n` candidates.
///
/// The k-th call picks `floor(frac(k * phi) * n)`, an additive recurrence
/// (Kronecker sequence) which spreads consecutive picks evenly without any
/// per-caller state or randomness.
#[derive(Debug, Default)]
pub(crate) struct Placement {
    counter: AtomicU64,
}

impl Placement {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Picks an index in `0..n`. `n` must not be zero.
    pub(crate) fn next(&self, n: usize) -> usize {
        debug_assert!(n > 0);

        let k = self.counter.fetch_add(1, Ordering::Relaxed);
        let frac = k.wrapping_mul(GOLDEN_FRACTION);

        ((u128::from(frac) * n as u128) >> u64::BITS) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::two(2)]
    #[case::three(3)]
    #[case::eight(8)]
    #[case::odd(13)]
    fn test_spreads_evenly(#[case] n: usize) {
        let placement = Placement::new();
        let rounds = 64;

        let mut hits = vec![0usize; n];
        for _ in 0..n * rounds {
            hits[placement.next(n)] += 1;
        }

        // Every bucket within 10% of a perfectly even spread.
        let slack = rounds / 10 + 1;
        for count in hits {
            assert!(count.abs_diff(rounds) <= slack, "uneven spread: {count}");
        }
    }

    #[test]
    fn test_consecutive_picks_differ() {
        let placement = Placement::new();
        let picks = (0..32).map(|_| placement.next(4)).collect::<Vec<_>>();

        assert!(picks.windows(2).all(|w| w[0] != w[1]));
    }

    #[test]
    fn test_single_candidate() {
        let placement = Placement::new();
        assert!((0..16).all(|_| placement.next(1) == 0));
    }
}
