use std::fmt;

/// Priority of a scheduled continuation. Higher values are preferred.
///
/// Values above the runtime's configured number of levels are clamped to the
/// highest level.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    pub const LOW: Priority = Priority(0);
    pub const NORMAL: Priority = Priority(1);
    pub const HIGH: Priority = Priority(2);

    pub const fn new(level: u8) -> Self {
        Self(level)
    }

    pub const fn get(&self) -> u8 {
        self.0
    }

    /// Index of the FIFO serving this priority among `levels` FIFOs.
    pub(crate) fn level(&self, levels: usize) -> usize {
        debug_assert!(levels > 0);
        usize::from(self.0).min(levels - 1)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

impl fmt::Debug for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Priority::LOW => f.write_str("LOW"),
            Priority::NORMAL => f.write_str("NORMAL"),
            Priority::HIGH => f.write_str("HIGH"),
            Priority(level) => write!(f, "Priority({level})"),
        }
    }
}
