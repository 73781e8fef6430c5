//! Requested-region propagation: consumers first, producers last.

use crate::compute::ledger::Ledger;
use crate::error::{PipelineError, PipelineResult};
use crate::graph::RegionContext;
use crate::image::{ImageMetadata, ImageRegion};
use crate::store::{NodeId, NodeRegistry};
use smallvec::SmallVec;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Merged requests per node for one update pass.
pub type RequestedRegions = HashMap<NodeId, ImageRegion>;

pub struct RegionPropagator<'a> {
    registry: &'a mut NodeRegistry,
    ledger: &'a Ledger,
}

impl<'a> RegionPropagator<'a> {
    pub fn new(registry: &'a mut NodeRegistry, ledger: &'a Ledger) -> Self {
        Self { registry, ledger }
    }

    /// Pushes the target requests upstream through `order` (producers before consumers,
    /// information already updated). A node asked for regions by several consumers
    /// forwards the bounding box of all of them.
    pub fn propagate(&mut self, order: &[NodeId], requests: &[(NodeId, ImageRegion)]) -> PipelineResult<RequestedRegions> {
        let mut merged = RequestedRegions::with_capacity(order.len());

        for &(target, region) in requests {
            let largest = *self.metadata(target)?.largest_region();
            if !region.is_inside(&largest) {
                return Err(PipelineError::RegionOutOfBounds {
                    node_id: target,
                    node_name: self.registry.name(target).to_string(),
                    requested: region,
                    largest,
                });
            }
            merge(&mut merged, target, region);
        }

        for &node in order.iter().rev() {
            let Some(&requested) = merged.get(&node) else { continue };

            let input_ids: SmallVec<[NodeId; 2]> = self.registry.get_inputs(node).iter().flatten().copied().collect();
            let mut input_meta: SmallVec<[ImageMetadata; 2]> = SmallVec::with_capacity(input_ids.len());
            for &input in &input_ids {
                input_meta.push(*self.metadata(input)?);
            }
            let output = *self.metadata(node)?;

            let (name, object) = self.registry.entry_mut(node);
            debug!(node = %name, region = %requested, "propagating requested region");
            object.propagate_requested_region(name, &requested)?;

            let ctx = RegionContext { node_name: name, output: &output, requested: &requested, inputs: &input_meta };
            let input_regions = object.input_requested_regions(&ctx);
            if input_regions.len() != input_ids.len() {
                return Err(PipelineError::generation_failed(
                    name,
                    requested,
                    format!("asked for {} input regions but has {} inputs", input_regions.len(), input_ids.len()),
                ));
            }

            for ((&input, region), meta) in input_ids.iter().zip(input_regions).zip(&input_meta) {
                if !region.is_inside(meta.largest_region()) {
                    return Err(PipelineError::RegionOutOfBounds {
                        node_id: input,
                        node_name: self.registry.name(input).to_string(),
                        requested: region,
                        largest: *meta.largest_region(),
                    });
                }
                trace!(producer = %self.registry.name(input), consumer = %self.registry.name(node), region = %region, "input request");
                merge(&mut merged, input, region);
            }
        }

        Ok(merged)
    }

    fn metadata(&self, id: NodeId) -> PipelineResult<&ImageMetadata> {
        self.ledger
            .information(id)
            .map(|info| &info.metadata)
            .ok_or_else(|| PipelineError::invalid_metadata(self.registry.name(id), "output information has not been updated"))
    }
}

fn merge(merged: &mut RequestedRegions, node: NodeId, region: ImageRegion) {
    merged
        .entry(node)
        .and_modify(|existing| *existing = existing.union(&region))
        .or_insert(region);
}
