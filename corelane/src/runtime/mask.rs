use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Set of worker queues a continuation may be placed on.
///
/// Bit `i` set means worker queue `i` is allowed. This is an *inclusion*
/// mask: an empty mask allows nothing, and the scheduler falls back to every
/// queue when the intersection with the running queues is empty.
///
/// ```
/// use corelane::runtime::CpuMask;
///
/// let mask = CpuMask::single(0) | CpuMask::single(3);
/// assert!(mask.contains(3));
/// assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 3]);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CpuMask(u64);

impl CpuMask {
    /// Width of the mask, and upper bound on the number of worker queues.
    pub const MAX_CPUS: usize = u64::BITS as usize;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(u64::MAX)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    #[track_caller]
    pub const fn single(cpu: usize) -> Self {
        assert!(cpu < Self::MAX_CPUS, "cpu index out of mask range");
        Self(1 << cpu)
    }

    /// Mask with the `n` lowest queues set.
    pub const fn first(n: usize) -> Self {
        if n >= Self::MAX_CPUS {
            Self::all()
        } else {
            Self((1 << n) - 1)
        }
    }

    #[track_caller]
    pub const fn with(self, cpu: usize) -> Self {
        assert!(cpu < Self::MAX_CPUS, "cpu index out of mask range");
        Self(self.0 | (1 << cpu))
    }

    pub const fn contains(&self, cpu: usize) -> bool {
        cpu < Self::MAX_CPUS && self.0 & (1 << cpu) != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Indices of the allowed queues, in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + use<> {
        let mut bits = self.0;

        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }

            let cpu = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            Some(cpu)
        })
    }
}

impl BitAnd for CpuMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for CpuMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl FromIterator<usize> for CpuMask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::none(0, 0)]
    #[case::some(4, 0b1111)]
    #[case::full(64, u64::MAX)]
    #[case::overflow(128, u64::MAX)]
    fn test_first(#[case] n: usize, #[case] bits: u64) {
        assert_eq!(CpuMask::first(n).bits(), bits);
    }

    #[test]
    fn test_iter_and_collect() {
        let mask: CpuMask = [1, 5, 63].into_iter().collect();

        assert_eq!(mask.count(), 3);
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![1, 5, 63]);
        assert!(mask.contains(63));
        assert!(!mask.contains(64));
        assert_eq!(format!("{mask:?}"), "{1, 5, 63}");
    }

    #[test]
    fn test_intersection() {
        let mask = CpuMask::single(2) | CpuMask::single(9);

        assert_eq!(mask & CpuMask::first(4), CpuMask::single(2));
        assert!((mask & CpuMask::first(2)).is_empty());
    }

    #[test]
    #[should_panic(expected = "cpu index out of mask range")]
    fn test_single_out_of_range() {
        let _ = CpuMask::single(64);
    }
}
