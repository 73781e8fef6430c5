//! Per-pixel image derivative built on [`CentralDifferenceFunction`].

use crate::error::{PipelineError, PipelineResult};
use crate::function::CentralDifferenceFunction;
use crate::graph::{crop_or_empty, GenerateContext, InformationContext, ProcessObject, RegionContext};
use crate::image::{ImageBuffer, ImageData, ImageMetadata, ImageRegion, Scalar, MAX_DIMENSION};
use crate::store::TimeStamp;
use crate::with_samples;
use rayon::prelude::*;
use smallvec::{smallvec, SmallVec};
use std::any::Any;

/// What each output pixel holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivativeOutput {
    /// The partial derivative along one axis.
    Axis(usize),
    /// Euclidean norm of the gradient.
    Magnitude,
}

/// Single-input filter producing an `f64` image of central differences.
///
/// Asks its input for the requested region grown by one pixel, cropped to the
/// input's extent. An axis whose stencil falls off the image contributes 0.
pub struct DerivativeImageFilter {
    output: DerivativeOutput,
    modified: TimeStamp,
}

impl DerivativeImageFilter {
    pub fn new(output: DerivativeOutput) -> Self {
        Self { output, modified: TimeStamp::now() }
    }

    pub fn output(&self) -> DerivativeOutput { self.output }

    pub fn set_output(&mut self, output: DerivativeOutput) {
        if self.output != output {
            self.output = output;
            self.modified.modify();
        }
    }
}

impl ProcessObject for DerivativeImageFilter {
    fn type_name(&self) -> &'static str { "DerivativeImageFilter" }
    fn number_of_inputs(&self) -> usize { 1 }
    fn modified_time(&self) -> TimeStamp { self.modified }

    fn generate_output_information(&mut self, ctx: &InformationContext) -> PipelineResult<ImageMetadata> {
        let input = ctx
            .inputs
            .first()
            .ok_or_else(|| PipelineError::invalid_metadata(ctx.node_name, "input information missing"))?;
        if let DerivativeOutput::Axis(axis) = self.output {
            if axis >= input.dimension() {
                return Err(PipelineError::invalid_metadata(
                    ctx.node_name,
                    format!("derivative axis {} on a {}-D image", axis, input.dimension()),
                ));
            }
        }
        Ok(*input)
    }

    fn input_requested_regions(&self, ctx: &RegionContext) -> SmallVec<[ImageRegion; 2]> {
        ctx.inputs
            .iter()
            .map(|input| crop_or_empty(&ctx.requested.pad(1), input.largest_region()))
            .collect()
    }

    fn generate_data(&mut self, ctx: &GenerateContext) -> PipelineResult<ImageData> {
        let input = ctx
            .inputs
            .first()
            .ok_or_else(|| PipelineError::generation_failed(ctx.node_name, *ctx.requested, "input data missing"))?;
        let requested = *ctx.requested;
        let threshold = ctx.settings.parallel_threshold;
        let mode = self.output;

        let samples = with_samples!(input.buffer().samples(), s => {
            differentiate(s, input, &requested, mode, threshold)
        })
        .map_err(|msg| PipelineError::generation_failed(ctx.node_name, requested, msg))?;

        ImageData::new(*ctx.output, requested, ImageBuffer::from_vec(samples))
            .map_err(|msg| PipelineError::generation_failed(ctx.node_name, requested, msg))
    }

    fn as_any(&self) -> &dyn Any { self }
    fn as_any_mut(&mut self) -> &mut dyn Any { self }
}

fn differentiate<T: Scalar>(
    samples: &[T],
    input: &ImageData,
    region: &ImageRegion,
    mode: DerivativeOutput,
    parallel_threshold: usize,
) -> Result<Vec<f64>, String> {
    let func = CentralDifferenceFunction::from_parts(samples, *input.buffered_region(), input.metadata())?;
    let total = region.number_of_pixels();
    let mut out = vec![0.0f64; total];
    if total == 0 {
        return Ok(out);
    }

    // Rows run along axis 0, the fastest-varying one.
    let row_len = region.size()[0];
    let fill = |(row, chunk): (usize, &mut [f64])| fill_row(&func, region, row, chunk, mode);
    if parallel_threshold > 0 && total >= parallel_threshold {
        out.par_chunks_mut(row_len).enumerate().for_each(fill);
    } else {
        out.chunks_mut(row_len).enumerate().for_each(fill);
    }
    Ok(out)
}

fn fill_row<T: Scalar>(
    func: &CentralDifferenceFunction<'_, T>,
    region: &ImageRegion,
    row: usize,
    out: &mut [f64],
    mode: DerivativeOutput,
) {
    let dim = region.dimension();
    let mut idx: SmallVec<[i64; MAX_DIMENSION]> = smallvec![0; dim];
    let mut rest = row;
    for d in 1..dim {
        let size = region.size()[d];
        idx[d] = region.index()[d] + (rest % size) as i64;
        rest /= size;
    }

    for (i, value) in out.iter_mut().enumerate() {
        idx[0] = region.index()[0] + i as i64;
        *value = match mode {
            DerivativeOutput::Axis(axis) => func.partial_at_index(&idx, axis).unwrap_or(0.0),
            DerivativeOutput::Magnitude if func.is_inside_buffer(&idx) => {
                // SAFETY: the whole stencil was just checked to lie in the buffer.
                let d = unsafe { func.evaluate_at_index_unchecked(&idx) };
                d.iter().map(|v| v * v).sum::<f64>().sqrt()
            }
            DerivativeOutput::Magnitude => (0..dim)
                .map(|axis| func.partial_at_index(&idx, axis).unwrap_or(0.0).powi(2))
                .sum::<f64>()
                .sqrt(),
        };
    }
}
