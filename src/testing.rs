//! Instrumented nodes shared by the unit tests.

use crate::error::{PipelineError, PipelineResult};
use crate::graph::{GenerateContext, InformationContext, ProcessObject};
use crate::image::{ImageBuffer, ImageData, ImageMetadata, ImageRegion};
use crate::store::TimeStamp;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Fills whatever region is requested with a constant and counts how often it ran.
/// With inputs it behaves like a filter that copies its first input's information.
pub(crate) struct CountingSource {
    size: Vec<usize>,
    value: f64,
    inputs: usize,
    fail: bool,
    modified: TimeStamp,
    pub generations: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<ImageRegion>>>,
}

impl CountingSource {
    pub fn new(size: &[usize]) -> Self {
        Self::with_inputs(size, 0)
    }

    pub fn with_inputs(size: &[usize], inputs: usize) -> Self {
        Self {
            size: size.to_vec(),
            value: 1.0,
            inputs,
            fail: false,
            modified: TimeStamp::now(),
            generations: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn value(&self) -> f64 { self.value }

    pub fn set_value(&mut self, value: f64) {
        if self.value != value {
            self.value = value;
            self.modified.modify();
        }
    }

    pub fn generation_count(&self) -> usize { self.generations.load(Ordering::SeqCst) }
}

impl ProcessObject for CountingSource {
    fn type_name(&self) -> &'static str { "CountingSource" }
    fn number_of_inputs(&self) -> usize { self.inputs }
    fn modified_time(&self) -> TimeStamp { self.modified }

    fn generate_output_information(&mut self, ctx: &InformationContext) -> PipelineResult<ImageMetadata> {
        match ctx.inputs.first() {
            Some(input) => Ok(*input),
            None => Ok(ImageMetadata::with_region(ImageRegion::from_size(&self.size))),
        }
    }

    fn propagate_requested_region(&mut self, _node_name: &str, requested: &ImageRegion) -> PipelineResult<()> {
        self.requests.lock().unwrap().push(*requested);
        Ok(())
    }

    fn generate_data(&mut self, ctx: &GenerateContext) -> PipelineResult<ImageData> {
        self.generations.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PipelineError::generation_failed(ctx.node_name, *ctx.requested, "instructed to fail"));
        }
        let samples = vec![self.value; ctx.requested.number_of_pixels()];
        ImageData::new(*ctx.output, *ctx.requested, ImageBuffer::from_vec(samples))
            .map_err(|msg| PipelineError::generation_failed(ctx.node_name, *ctx.requested, msg))
    }

    fn as_any(&self) -> &dyn Any { self }
    fn as_any_mut(&mut self) -> &mut dyn Any { self }
}
