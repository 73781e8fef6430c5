//! ledger.rs
//! Per-node cache of output information and generated data.

use crate::image::{ImageData, ImageMetadata};
use crate::store::{NodeId, TimeStamp};
use std::sync::Arc;

/// Result of a node's last information pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Information {
    pub metadata: ImageMetadata,
    /// Newest modification stamp anywhere upstream, this node included. Reported by
    /// `describe`; cache reuse is decided from generation stamps, not from this.
    pub pipeline_mtime: TimeStamp,
}

/// A published output. The data is shared read-only with every consumer.
#[derive(Debug, Clone)]
pub struct CachedOutput {
    pub data: Arc<ImageData>,
    pub generated_at: TimeStamp,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    information: Option<Information>,
    output: Option<CachedOutput>,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    slots: Vec<Slot>,
}

impl Ledger {
    pub fn new() -> Self { Self::default() }

    pub fn ensure_capacity(&mut self, size: usize) {
        if self.slots.len() < size {
            self.slots.resize(size, Slot::default());
        }
    }

    #[inline(always)]
    pub fn information(&self, node_id: NodeId) -> Option<&Information> {
        self.slots.get(node_id.index())?.information.as_ref()
    }

    #[inline(always)]
    pub fn output(&self, node_id: NodeId) -> Option<&CachedOutput> {
        self.slots.get(node_id.index())?.output.as_ref()
    }

    pub fn set_information(&mut self, node_id: NodeId, information: Information) {
        self.slot_mut(node_id).information = Some(information);
    }

    /// Publishes freshly generated data, stamped now, and returns the stamp.
    pub fn publish(&mut self, node_id: NodeId, data: Arc<ImageData>) -> TimeStamp {
        let generated_at = TimeStamp::now();
        self.slot_mut(node_id).output = Some(CachedOutput { data, generated_at });
        generated_at
    }

    /// Drops cached data for the given nodes; information is kept.
    pub fn invalidate(&mut self, node_ids: impl IntoIterator<Item = NodeId>) {
        for id in node_ids {
            if let Some(slot) = self.slots.get_mut(id.index()) {
                slot.output = None;
            }
        }
    }

    /// Drops one node's cached data and hands it back.
    pub fn release(&mut self, node_id: NodeId) -> Option<CachedOutput> {
        self.slots.get_mut(node_id.index())?.output.take()
    }

    fn slot_mut(&mut self, node_id: NodeId) -> &mut Slot {
        let idx = node_id.index();
        if idx >= self.slots.len() {
            self.slots.resize(idx + 1, Slot::default());
        }
        &mut self.slots[idx]
    }
}
