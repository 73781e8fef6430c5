//! A synchronous, single-threaded, pull-based pipeline executor.
use crate::analysis::topology;
use crate::compute::ledger::{Information, Ledger};
use crate::compute::propagate::{RegionPropagator, RequestedRegions};
use crate::error::{PipelineError, PipelineResult};
use crate::graph::{GenerateContext, InformationContext};
use crate::image::{ImageData, ImageMetadata, ImageRegion};
use crate::settings::PipelineSettings;
use crate::store::{NodeId, NodeRegistry, TimeStamp};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub struct PipelineExecutor<'a> {
    registry: &'a mut NodeRegistry,
    ledger: &'a mut Ledger,
    settings: &'a PipelineSettings,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(registry: &'a mut NodeRegistry, ledger: &'a mut Ledger, settings: &'a PipelineSettings) -> Self {
        Self { registry, ledger, settings }
    }

    /// Refreshes output information for `target` and everything upstream of it.
    /// Never generates data.
    pub fn update_output_information(&mut self, target: NodeId) -> PipelineResult<ImageMetadata> {
        let order = topology::upstream_order(self.registry, &[target])?;
        self.information_pass(&order)?;
        self.metadata(target)
    }

    /// Brings `target`'s output up to date for `region` (its whole largest region when
    /// `None`) and returns it.
    pub fn update(&mut self, target: NodeId, region: Option<ImageRegion>) -> PipelineResult<Arc<ImageData>> {
        let mut outputs = self.update_many(&[(target, region)])?;
        outputs.pop().ok_or(PipelineError::UnknownNode(target))
    }

    /// Updates several targets in one pass. Requests reaching a shared producer from
    /// different targets are merged before that producer runs.
    pub fn update_many(&mut self, requests: &[(NodeId, Option<ImageRegion>)]) -> PipelineResult<Vec<Arc<ImageData>>> {
        let targets: Vec<NodeId> = requests.iter().map(|(id, _)| *id).collect();

        // 1. Information, producers first.
        let order = topology::upstream_order(self.registry, &targets)?;
        self.information_pass(&order)?;

        // 2. Requested regions, consumers first.
        let mut resolved = Vec::with_capacity(requests.len());
        for &(id, region) in requests {
            let region = match region {
                Some(r) => r,
                None => *self.metadata(id)?.largest_region(),
            };
            resolved.push((id, region));
        }
        let regions = RegionPropagator::new(self.registry, self.ledger).propagate(&order, &resolved)?;

        // 3. Data, producers first, regenerating only what is stale.
        self.data_pass(&order, &regions, &targets)?;

        targets
            .iter()
            .map(|&id| {
                self.ledger
                    .output(id)
                    .map(|out| out.data.clone())
                    .ok_or_else(|| PipelineError::generation_failed(self.registry.name(id), regions[&id], "no output after update"))
            })
            .collect()
    }

    fn information_pass(&mut self, order: &[NodeId]) -> PipelineResult<()> {
        self.ledger.ensure_capacity(self.registry.count());

        for &node in order {
            let input_ids: SmallVec<[NodeId; 2]> = self.registry.get_inputs(node).iter().flatten().copied().collect();
            let mut inputs: SmallVec<[ImageMetadata; 2]> = SmallVec::with_capacity(input_ids.len());
            let mut upstream_mtime = TimeStamp::default();
            for &input in &input_ids {
                // The topological order guarantees inputs were refreshed first.
                let info = self.ledger.information(input).ok_or_else(|| {
                    PipelineError::invalid_metadata(self.registry.name(input), "information missing for input")
                })?;
                inputs.push(info.metadata);
                upstream_mtime = upstream_mtime.max(info.pipeline_mtime);
            }

            let (name, object) = self.registry.entry_mut(node);
            object.refresh_information(name)?;
            let ctx = InformationContext { node_name: name, inputs: &inputs, settings: self.settings };
            let metadata = object.generate_output_information(&ctx)?;
            let pipeline_mtime = upstream_mtime.max(object.modified_time());
            trace!(node = %name, region = %metadata.largest_region(), "output information updated");

            self.ledger.set_information(node, Information { metadata, pipeline_mtime });
        }
        Ok(())
    }

    fn data_pass(&mut self, order: &[NodeId], regions: &RequestedRegions, targets: &[NodeId]) -> PipelineResult<()> {
        // Consumers still to run, per producer, for the release-data flag.
        let mut pending_consumers: HashMap<NodeId, usize> = HashMap::new();
        if self.settings.release_data_flag {
            for &node in order {
                for input in self.registry.get_inputs(node).iter().flatten() {
                    *pending_consumers.entry(*input).or_insert(0) += 1;
                }
            }
        }

        for &node in order {
            let requested = regions
                .get(&node)
                .copied()
                .ok_or_else(|| PipelineError::invalid_metadata(self.registry.name(node), "no requested region"))?;
            let input_ids: SmallVec<[NodeId; 2]> = self.registry.get_inputs(node).iter().flatten().copied().collect();

            let mut inputs: SmallVec<[Arc<ImageData>; 2]> = SmallVec::with_capacity(input_ids.len());
            let mut newest_input = TimeStamp::default();
            for &input in &input_ids {
                let out = self.ledger.output(input).ok_or_else(|| {
                    PipelineError::generation_failed(self.registry.name(input), requested, "input data missing after update")
                })?;
                inputs.push(out.data.clone());
                newest_input = newest_input.max(out.generated_at);
            }

            let metadata = self.metadata(node)?;
            if self.is_current(node, &metadata, &requested, newest_input) {
                if self.settings.verbose_cache {
                    debug!(node = %self.registry.name(node), region = %requested, "cache hit");
                } else {
                    trace!(node = %self.registry.name(node), region = %requested, "cache hit");
                }
            } else {
                self.generate(node, &metadata, &requested, &inputs)?;
            }

            if self.settings.release_data_flag {
                drop(inputs);
                for &input in &input_ids {
                    if let Some(left) = pending_consumers.get_mut(&input) {
                        *left -= 1;
                        if *left == 0 && !targets.contains(&input) {
                            trace!(node = %self.registry.name(input), "releasing data");
                            self.ledger.release(input);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Cached data is reusable only if it is strictly newer than every parameter and
    /// input change, matches the current information, and covers the request.
    fn is_current(&self, node: NodeId, metadata: &ImageMetadata, requested: &ImageRegion, newest_input: TimeStamp) -> bool {
        let Some(cached) = self.ledger.output(node) else { return false };
        let newest_cause = newest_input.max(self.registry.object(node).modified_time());
        cached.generated_at > newest_cause
            && cached.data.metadata() == metadata
            && requested.is_inside(cached.data.buffered_region())
    }

    fn generate(
        &mut self,
        node: NodeId,
        metadata: &ImageMetadata,
        requested: &ImageRegion,
        inputs: &[Arc<ImageData>],
    ) -> PipelineResult<()> {
        let (name, object) = self.registry.entry_mut(node);
        debug!(node = %name, region = %requested, "generating data");
        let ctx = GenerateContext { node_name: name, output: metadata, requested, inputs, settings: self.settings };

        let result = object.generate_data(&ctx).and_then(|data| {
            if !requested.is_inside(data.buffered_region()) {
                return Err(PipelineError::generation_failed(
                    name,
                    *requested,
                    format!("produced only {}", data.buffered_region()),
                ));
            }
            Ok(data)
        });

        match result {
            Ok(data) => {
                self.ledger.publish(node, Arc::new(data));
                Ok(())
            }
            Err(e) => {
                warn!(node = %name, error = %e, "generation failed");
                self.ledger.invalidate([node]);
                Err(e)
            }
        }
    }

    fn metadata(&self, id: NodeId) -> PipelineResult<ImageMetadata> {
        self.ledger
            .information(id)
            .map(|info| info.metadata)
            .ok_or_else(|| PipelineError::invalid_metadata(self.registry.name(id), "output information has not been updated"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NodeMetadata;
    use crate::testing::CountingSource;

    fn meta(name: &str) -> NodeMetadata {
        NodeMetadata { name: name.into() }
    }

    struct Fixture {
        registry: NodeRegistry,
        ledger: Ledger,
        settings: PipelineSettings,
    }

    impl Fixture {
        fn new() -> Self {
            Self { registry: NodeRegistry::new(), ledger: Ledger::new(), settings: PipelineSettings::default() }
        }

        fn exec(&mut self) -> PipelineExecutor<'_> {
            PipelineExecutor::new(&mut self.registry, &mut self.ledger, &self.settings)
        }
    }

    #[test]
    fn test_second_update_reuses_cache() {
        let mut fx = Fixture::new();
        let source = CountingSource::new(&[4, 4]);
        let count = source.generations.clone();
        let src = fx.registry.add_node(Box::new(source), meta("src"));

        let first = fx.exec().update(src, None).unwrap();
        let second = fx.exec().update(src, None).unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_parameter_change_regenerates_downstream() {
        let mut fx = Fixture::new();
        let src = fx.registry.add_node(Box::new(CountingSource::new(&[3])), meta("src"));
        let filter = CountingSource::with_inputs(&[3], 1);
        let filter_count = filter.generations.clone();
        let f = fx.registry.add_node(Box::new(filter), meta("filter"));
        fx.registry.set_input(f, 0, src).unwrap();

        fx.exec().update(f, None).unwrap();
        fx.registry.downcast_mut::<CountingSource>(src).unwrap().set_value(9.0);
        fx.exec().update(f, None).unwrap();
        assert_eq!(filter_count.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(fx.ledger.output(src).unwrap().data.sample_f64(&[0]), Some(9.0));
    }

    #[test]
    fn test_setting_same_value_keeps_cache() {
        let mut fx = Fixture::new();
        let source = CountingSource::new(&[3]);
        let count = source.generations.clone();
        let src = fx.registry.add_node(Box::new(source), meta("src"));
        fx.exec().update(src, None).unwrap();
        fx.registry.downcast_mut::<CountingSource>(src).unwrap().set_value(1.0);
        fx.exec().update(src, None).unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_larger_request_than_cached_regenerates() {
        let mut fx = Fixture::new();
        let source = CountingSource::new(&[10]);
        let count = source.generations.clone();
        let src = fx.registry.add_node(Box::new(source), meta("src"));

        let small = fx.exec().update(src, Some(ImageRegion::new(&[2], &[3]))).unwrap();
        assert_eq!(small.buffered_region(), &ImageRegion::new(&[2], &[3]));
        fx.exec().update(src, Some(ImageRegion::new(&[3], &[1]))).unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
        fx.exec().update(src, None).unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_timestamps_are_monotone_along_the_chain() {
        let mut fx = Fixture::new();
        let src = fx.registry.add_node(Box::new(CountingSource::new(&[2])), meta("src"));
        let f = fx.registry.add_node(Box::new(CountingSource::with_inputs(&[2], 1)), meta("f"));
        fx.registry.set_input(f, 0, src).unwrap();
        fx.exec().update(f, None).unwrap();
        assert!(fx.ledger.output(f).unwrap().generated_at >= fx.ledger.output(src).unwrap().generated_at);
    }

    #[test]
    fn test_failure_keeps_sibling_cache() {
        let mut fx = Fixture::new();
        let good = CountingSource::new(&[2]);
        let good_count = good.generations.clone();
        let good_id = fx.registry.add_node(Box::new(good), meta("good"));
        let bad_id = fx.registry.add_node(Box::new(CountingSource::new(&[2]).failing()), meta("bad"));
        let join = fx.registry.add_node(Box::new(CountingSource::with_inputs(&[2], 2)), meta("join"));
        fx.registry.set_input(join, 0, good_id).unwrap();
        fx.registry.set_input(join, 1, bad_id).unwrap();

        let err = fx.exec().update(join, None).unwrap_err();
        match err {
            PipelineError::GenerationFailed { node_name, .. } => assert_eq!(node_name, "bad"),
            other => panic!("Wrong error type: {:?}", other),
        }
        assert!(fx.ledger.output(good_id).is_some());
        assert!(fx.ledger.output(join).is_none());
        fx.exec().update(good_id, None).unwrap();
        assert_eq!(good_count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_information_update_never_generates() {
        let mut fx = Fixture::new();
        let source = CountingSource::new(&[5, 2]);
        let count = source.generations.clone();
        let src = fx.registry.add_node(Box::new(source), meta("src"));
        let info = fx.exec().update_output_information(src).unwrap();
        assert_eq!(info.largest_region().size(), &[5, 2]);
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(fx.ledger.output(src).is_none());
    }

    #[test]
    fn test_release_data_flag_drops_intermediate_buffers() {
        let mut fx = Fixture::new();
        fx.settings.release_data_flag = true;
        let src = fx.registry.add_node(Box::new(CountingSource::new(&[2])), meta("src"));
        let f = fx.registry.add_node(Box::new(CountingSource::with_inputs(&[2], 1)), meta("f"));
        fx.registry.set_input(f, 0, src).unwrap();
        fx.exec().update(f, None).unwrap();
        assert!(fx.ledger.output(src).is_none());
        assert!(fx.ledger.output(f).is_some());
    }

    #[test]
    fn test_missing_input_is_reported_on_update() {
        let mut fx = Fixture::new();
        let f = fx.registry.add_node(Box::new(CountingSource::with_inputs(&[2], 1)), meta("lonely"));
        assert!(matches!(fx.exec().update(f, None), Err(PipelineError::MissingInput { .. })));
    }
}
