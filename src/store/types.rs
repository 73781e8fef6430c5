use serde::{Serialize, Deserialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

/// Process-wide modification clock. Every tick is unique and strictly increasing,
/// so two stamps taken anywhere in the process can be compared directly.
static GLOBAL_CLOCK: AtomicU64 = AtomicU64::new(0);

/// A point on the modification clock. `TimeStamp::default()` (zero) predates every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TimeStamp(u64);

impl TimeStamp {
    /// Takes a fresh tick from the global clock.
    pub fn now() -> Self {
        Self(GLOBAL_CLOCK.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Moves this stamp to a fresh tick.
    pub fn modify(&mut self) {
        *self = Self::now();
    }

    pub fn value(&self) -> u64 { self.0 }
}

/// Descriptive metadata attached to every registered node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub name: String,
}
