//! Owning front-end: nodes, wiring, caches and settings in one place.

use crate::analysis::topology;
use crate::compute::{Ledger, PipelineExecutor};
use crate::display::trace;
use crate::error::PipelineResult;
use crate::graph::ProcessObject;
use crate::image::{ImageData, ImageMetadata, ImageRegion};
use crate::settings::PipelineSettings;
use crate::store::{NodeId, NodeMetadata, NodeRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A dataflow graph of image nodes, updated lazily on demand.
///
/// Nodes are owned by the pipeline and addressed by [`NodeId`]. Nothing is computed
/// until one of the `update*` methods is called.
#[derive(Default)]
pub struct Pipeline {
    registry: NodeRegistry,
    ledger: Ledger,
    settings: PipelineSettings,
    requested: HashMap<NodeId, ImageRegion>,
}

impl Pipeline {
    pub fn new() -> Self { Self::default() }

    pub fn with_settings(settings: PipelineSettings) -> Self {
        Self { settings, ..Self::default() }
    }

    pub fn settings(&self) -> &PipelineSettings { &self.settings }
    pub fn settings_mut(&mut self) -> &mut PipelineSettings { &mut self.settings }
    pub fn registry(&self) -> &NodeRegistry { &self.registry }

    /// Registers a node. Names are made unique by suffixing; an empty name falls
    /// back to the node's type name.
    pub fn add_node<P: ProcessObject + 'static>(&mut self, name: &str, node: P) -> NodeId {
        let id = self.registry.add_node(Box::new(node), NodeMetadata { name: name.to_string() });
        debug!(node = %self.registry.name(id), id = id.0, "node added");
        id
    }

    /// Unique name `id` was registered under; `None` for an id from elsewhere.
    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.registry.contains(id).then(|| self.registry.name(id))
    }

    /// Feeds `producer`'s output into input `slot` of `consumer`.
    pub fn connect(&mut self, producer: NodeId, consumer: NodeId, slot: usize) -> PipelineResult<()> {
        self.registry.set_input(consumer, slot, producer)?;
        self.invalidate_from(consumer);
        Ok(())
    }

    /// Leaves input `slot` of `consumer` unset; updating it will then fail.
    pub fn disconnect(&mut self, consumer: NodeId, slot: usize) -> PipelineResult<Option<NodeId>> {
        let previous = self.registry.clear_input(consumer, slot)?;
        self.invalidate_from(consumer);
        Ok(previous)
    }

    /// Typed access to a node, e.g. to read its parameters.
    pub fn node<T: ProcessObject + 'static>(&self, id: NodeId) -> Option<&T> {
        self.registry.downcast_ref::<T>(id)
    }

    /// Typed mutable access. Setters on the node record their own changes.
    pub fn node_mut<T: ProcessObject + 'static>(&mut self, id: NodeId) -> Option<&mut T> {
        self.registry.downcast_mut::<T>(id)
    }

    /// Forces `id` and everything downstream to regenerate on the next update,
    /// e.g. after memory imported by pointer was written in place.
    pub fn modified(&mut self, id: NodeId) -> PipelineResult<()> {
        self.registry.check(id)?;
        self.invalidate_from(id);
        Ok(())
    }

    /// Region [`Pipeline::update`] asks `id` for from now on. `None` means the
    /// largest region.
    pub fn set_requested_region(&mut self, id: NodeId, region: Option<ImageRegion>) -> PipelineResult<()> {
        self.registry.check(id)?;
        match region {
            Some(r) => self.requested.insert(id, r),
            None => self.requested.remove(&id),
        };
        Ok(())
    }

    pub fn requested_region(&self, id: NodeId) -> Option<&ImageRegion> { self.requested.get(&id) }

    /// Refreshes `id`'s output information (and its upstream), without generating data.
    pub fn update_output_information(&mut self, id: NodeId) -> PipelineResult<ImageMetadata> {
        self.executor().update_output_information(id)
    }

    /// Brings `id` up to date for its requested region and returns its output.
    pub fn update(&mut self, id: NodeId) -> PipelineResult<Arc<ImageData>> {
        let region = self.requested.get(&id).copied();
        self.executor().update(id, region)
    }

    pub fn update_region(&mut self, id: NodeId, region: ImageRegion) -> PipelineResult<Arc<ImageData>> {
        self.executor().update(id, Some(region))
    }

    /// Updates several outputs in one pass so shared producers run once for the
    /// union of what they are asked for.
    pub fn update_many(&mut self, requests: &[(NodeId, Option<ImageRegion>)]) -> PipelineResult<Vec<Arc<ImageData>>> {
        let requests: Vec<_> = requests
            .iter()
            .map(|&(id, region)| (id, region.or_else(|| self.requested.get(&id).copied())))
            .collect();
        self.executor().update_many(&requests)
    }

    /// Last generated output of `id`, which may be stale until the next update.
    pub fn get_output(&self, id: NodeId) -> Option<Arc<ImageData>> {
        self.ledger.output(id).map(|out| out.data.clone())
    }

    /// Drops `id`'s cached output. Returns whether there was one.
    pub fn release_data(&mut self, id: NodeId) -> bool {
        self.ledger.release(id).is_some()
    }

    /// Human-readable tree of everything upstream of `id`.
    pub fn describe(&self, id: NodeId) -> String {
        trace::describe(&self.registry, &self.ledger, id)
    }

    fn executor(&mut self) -> PipelineExecutor<'_> {
        PipelineExecutor::new(&mut self.registry, &mut self.ledger, &self.settings)
    }

    fn invalidate_from(&mut self, id: NodeId) {
        let affected = topology::downstream_from(&self.registry, &[id]);
        self.ledger.invalidate(affected);
    }
}
