//! End-to-end properties of the pipeline, driven only through the public API.
//!
//! Run with: `cargo test --test pipeline_properties`

use std::any::Any;
use std::ffi::CString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use libc::{c_char, c_int, c_void};

use pixflow_core::graph::{GenerateContext, InformationContext};
use pixflow_core::{
    BridgeCallbacks, BufferOwnership, CallbackSlot, CentralDifferenceFunction, DerivativeImageFilter, DerivativeOutput,
    ExternalPipelineBridge, ImageBuffer, ImageData, ImageMetadata, ImageRegion, ImportImageFilter, NodeId, Pipeline,
    PipelineError, PipelineResult, ProcessObject, TimeStamp,
};
use rstest::rstest;

// ============================================================================
// Test Helpers
// ============================================================================

/// Source that records every request it is told about and counts generations.
struct RecordingSource {
    size: Vec<usize>,
    inputs: usize,
    modified: TimeStamp,
    generations: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<ImageRegion>>>,
}

impl RecordingSource {
    fn new(size: &[usize], inputs: usize) -> Self {
        Self {
            size: size.to_vec(),
            inputs,
            modified: TimeStamp::now(),
            generations: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ProcessObject for RecordingSource {
    fn type_name(&self) -> &'static str { "RecordingSource" }
    fn number_of_inputs(&self) -> usize { self.inputs }
    fn modified_time(&self) -> TimeStamp { self.modified }

    fn generate_output_information(&mut self, ctx: &InformationContext) -> PipelineResult<ImageMetadata> {
        Ok(ctx.inputs.first().copied().unwrap_or_else(|| ImageMetadata::with_region(ImageRegion::from_size(&self.size))))
    }

    fn propagate_requested_region(&mut self, _node_name: &str, requested: &ImageRegion) -> PipelineResult<()> {
        self.requests.lock().unwrap().push(*requested);
        Ok(())
    }

    fn generate_data(&mut self, ctx: &GenerateContext) -> PipelineResult<ImageData> {
        self.generations.fetch_add(1, Ordering::SeqCst);
        let samples = vec![0u8; ctx.requested.number_of_pixels()];
        ImageData::new(*ctx.output, *ctx.requested, ImageBuffer::from_vec(samples))
            .map_err(|msg| PipelineError::generation_failed(ctx.node_name, *ctx.requested, msg))
    }

    fn as_any(&self) -> &dyn Any { self }
    fn as_any_mut(&mut self) -> &mut dyn Any { self }
}

fn image(size: &[usize], spacing: &[f64], value: impl Fn(&[i64]) -> f64) -> ImageData {
    let region = ImageRegion::from_size(size);
    let origin = vec![0.0; size.len()];
    let meta = ImageMetadata::new(region, spacing, &origin).unwrap();
    let samples: Vec<f64> = region.indices().map(|idx| value(&idx[..size.len()])).collect();
    ImageData::new(meta, region, ImageBuffer::from_vec(samples)).unwrap()
}

// ============================================================================
// Import
// ============================================================================

#[rstest]
#[case(&[0, 0], &[7, 3], &[1.0, 1.0], &[0.0, 0.0])]
#[case(&[-2, 5], &[4, 4], &[0.3, 2.5], &[-10.0, 4.0])]
#[case(&[0, 0, 0], &[2, 2, 5], &[1.0, 2.0, 3.0], &[0.5, 0.5, 0.5])]
fn import_reports_exactly_what_was_supplied(
    #[case] index: &[i64],
    #[case] size: &[usize],
    #[case] spacing: &[f64],
    #[case] origin: &[f64],
) {
    let region = ImageRegion::new(index, size);
    let mut import = ImportImageFilter::new();
    import.set_region(region);
    import.set_spacing(spacing);
    import.set_origin(origin);
    import.set_buffer(vec![0i32; region.number_of_pixels()]);

    let mut p = Pipeline::new();
    let id = p.add_node("import", import);
    let meta = p.update_output_information(id).unwrap();
    assert_eq!(meta.largest_region(), &region);
    assert_eq!(meta.spacing(), spacing);
    assert_eq!(meta.origin(), origin);
}

#[test]
fn caller_owned_buffer_survives_the_pipeline() {
    let sentinel: Vec<u16> = (0..12).collect();
    let mut caller = sentinel.clone();
    {
        let mut import = ImportImageFilter::new();
        import.set_region(ImageRegion::from_size(&[4, 3]));
        unsafe { import.set_import_pointer(caller.as_mut_ptr(), caller.len(), false) };
        assert_eq!(import.buffer_ownership(), Some(BufferOwnership::External));

        let mut p = Pipeline::new();
        let src = p.add_node("import", import);
        let dx = p.add_node("dx", DerivativeImageFilter::new(DerivativeOutput::Axis(0)));
        p.connect(src, dx, 0).unwrap();
        let out = p.update(dx).unwrap();
        assert_eq!(out.sample_f64(&[1, 0]), Some(1.0));
        drop(out);
    }
    // Writing and reading the memory after the pipeline is gone must be fine.
    caller.push(99);
    assert_eq!(&caller[..12], sentinel.as_slice());
}

#[test]
fn transferred_buffer_is_released_by_the_pipeline() {
    let len = 6usize;
    let ptr = unsafe { libc::calloc(len, std::mem::size_of::<f32>()) } as *mut f32;
    assert!(!ptr.is_null());

    let mut import = ImportImageFilter::new();
    import.set_region(ImageRegion::from_size(&[len]));
    unsafe { import.set_import_pointer(ptr, len, true) };
    assert_eq!(import.buffer_ownership(), Some(BufferOwnership::Pipeline));

    let mut p = Pipeline::new();
    let id = p.add_node("import", import);
    assert_eq!(p.update(id).unwrap().sample_f64(&[5]), Some(0.0));
}

// ============================================================================
// Memoization and propagation
// ============================================================================

#[test]
fn second_update_without_changes_generates_nothing() {
    let recorder = RecordingSource::new(&[8, 8], 0);
    let generations = recorder.generations.clone();
    let mut p = Pipeline::new();
    let id = p.add_node("recorder", recorder);
    p.update(id).unwrap();
    p.update(id).unwrap();
    assert_eq!(generations.load(Ordering::SeqCst), 1);
}

#[test]
fn single_consumer_request_reaches_source_unchanged() {
    let recorder = RecordingSource::new(&[20, 20], 0);
    let seen = recorder.requests.clone();
    let mut p = Pipeline::new();
    let src = p.add_node("src", recorder);
    let sink = p.add_node("sink", RecordingSource::new(&[20, 20], 1));
    p.connect(src, sink, 0).unwrap();

    let sub = ImageRegion::new(&[3, 4], &[5, 6]);
    p.update_region(sink, sub).unwrap();
    assert_eq!(seen.lock().unwrap().as_slice(), &[sub]);
}

#[test]
fn two_consumers_request_their_union() {
    let recorder = RecordingSource::new(&[20, 20], 0);
    let seen = recorder.requests.clone();
    let mut p = Pipeline::new();
    let src = p.add_node("src", recorder);
    let a = p.add_node("a", RecordingSource::new(&[20, 20], 1));
    let b = p.add_node("b", RecordingSource::new(&[20, 20], 1));
    p.connect(src, a, 0).unwrap();
    p.connect(src, b, 0).unwrap();

    p.update_many(&[
        (a, Some(ImageRegion::new(&[0, 0], &[6, 6]))),
        (b, Some(ImageRegion::new(&[4, 4], &[6, 6]))),
    ])
    .unwrap();
    assert_eq!(seen.lock().unwrap().as_slice(), &[ImageRegion::new(&[0, 0], &[10, 10])]);
}

#[test]
fn request_beyond_extent_is_rejected() {
    let mut p = Pipeline::new();
    let id = p.add_node("recorder", RecordingSource::new(&[4, 4], 0));
    let err = p.update_region(id, ImageRegion::new(&[2, 2], &[4, 4])).unwrap_err();
    assert!(matches!(err, PipelineError::RegionOutOfBounds { .. }), "got {:?}", err);
    assert!(err.to_string().contains("recorder"));
}

// ============================================================================
// Central difference
// ============================================================================

#[rstest]
#[case(&[1.0, 1.0])]
#[case(&[0.25, 4.0])]
#[case(&[3.0, 0.5])]
fn constant_image_has_zero_derivative(#[case] spacing: &[f64]) {
    let img = image(&[5, 5], spacing, |_| 7.5);
    let f = CentralDifferenceFunction::<f64>::new(&img).unwrap();
    for idx in ImageRegion::new(&[1, 1], &[3, 3]).indices() {
        let d = f.evaluate_at_index(&idx[..2]).unwrap();
        assert!(d.iter().all(|&v| v == 0.0), "{:?} at {:?}", d, idx);
    }
}

#[rstest]
#[case(0)]
#[case(1)]
fn ramp_with_spacing_two_has_unit_derivative(#[case] axis: usize) {
    // Neighbours one index either side differ by 4.0, over a distance of 2 * 2.0.
    let img = image(&[5, 5], &[2.0, 2.0], |idx| 2.0 * idx[axis] as f64);
    let f = CentralDifferenceFunction::<f64>::new(&img).unwrap();
    let d = f.evaluate_at_index(&[2, 2]).unwrap();
    assert_eq!(d[axis], 1.0);
    assert_eq!(d[1 - axis], 0.0);
}

#[test]
fn boundary_predicate_guards_the_stencil() {
    let img = image(&[4, 4], &[1.0, 1.0], |idx| idx[0] as f64);
    let f = CentralDifferenceFunction::<f64>::new(&img).unwrap();
    assert!(!f.is_inside_buffer(&[0, 2]));
    assert!(f.evaluate_at_index(&[3, 1]).is_none());
    assert!(f.is_inside_buffer(&[1, 2]));
}

// ============================================================================
// Bridge
// ============================================================================

#[test]
fn unset_bridge_slot_is_an_error_not_a_crash() {
    let mut p = Pipeline::new();
    let id = p.add_node("vtk", ExternalPipelineBridge::new(3));
    match p.update_output_information(id).unwrap_err() {
        PipelineError::BridgeNotConfigured { slot, node_name } => {
            assert_eq!(slot, CallbackSlot::UpdateInformation);
            assert_eq!(node_name, "vtk");
        }
        other => panic!("Wrong error type: {:?}", other),
    }
    assert!(p.update(id).is_err());
}

/// Minimal foreign pipeline: a 4x2 `float` image whose pixels the test rewrites.
struct ForeignSource {
    whole: [c_int; 6],
    spacing: [f64; 3],
    origin: [f64; 3],
    scalar: CString,
    changed: c_int,
    update_data_calls: usize,
    pixels: Vec<f32>,
}

fn foreign<'a>(ud: *mut c_void) -> &'a mut ForeignSource {
    unsafe { &mut *(ud as *mut ForeignSource) }
}

extern "C" fn fs_update_information(_ud: *mut c_void) {}
extern "C" fn fs_pipeline_modified(ud: *mut c_void) -> c_int { std::mem::take(&mut foreign(ud).changed) }
extern "C" fn fs_whole_extent(ud: *mut c_void) -> *mut c_int { foreign(ud).whole.as_mut_ptr() }
extern "C" fn fs_spacing(ud: *mut c_void) -> *mut f64 { foreign(ud).spacing.as_mut_ptr() }
extern "C" fn fs_origin(ud: *mut c_void) -> *mut f64 { foreign(ud).origin.as_mut_ptr() }
extern "C" fn fs_scalar_type(ud: *mut c_void) -> *const c_char { foreign(ud).scalar.as_ptr() }
extern "C" fn fs_components(_ud: *mut c_void) -> c_int { 1 }
extern "C" fn fs_propagate(_ud: *mut c_void, _extent: *mut c_int) {}
extern "C" fn fs_update_data(ud: *mut c_void) { foreign(ud).update_data_calls += 1; }
extern "C" fn fs_data_extent(ud: *mut c_void) -> *mut c_int { foreign(ud).whole.as_mut_ptr() }
extern "C" fn fs_buffer_pointer(ud: *mut c_void) -> *mut c_void { foreign(ud).pixels.as_mut_ptr() as *mut c_void }

fn bridged_derivative(ud: *mut c_void) -> (Pipeline, NodeId, NodeId) {
    let callbacks = BridgeCallbacks {
        update_information: Some(fs_update_information),
        pipeline_modified: Some(fs_pipeline_modified),
        whole_extent: Some(fs_whole_extent),
        spacing: Some(fs_spacing),
        origin: Some(fs_origin),
        scalar_type: Some(fs_scalar_type),
        number_of_components: Some(fs_components),
        propagate_update_extent: Some(fs_propagate),
        update_data: Some(fs_update_data),
        data_extent: Some(fs_data_extent),
        buffer_pointer: Some(fs_buffer_pointer),
        user_data: ud,
    };
    let mut p = Pipeline::new();
    let bridge = p.add_node("vtk", ExternalPipelineBridge::with_callbacks(2, callbacks));
    let dx = p.add_node("dx", DerivativeImageFilter::new(DerivativeOutput::Axis(0)));
    p.connect(bridge, dx, 0).unwrap();
    (p, bridge, dx)
}

#[test]
fn bridge_is_cached_until_the_foreign_side_reports_a_change() {
    let source = Box::new(ForeignSource {
        whole: [0, 3, 0, 1, 0, 0],
        spacing: [1.0, 1.0, 1.0],
        origin: [0.0; 3],
        scalar: CString::new("float").unwrap(),
        changed: 0,
        update_data_calls: 0,
        pixels: (0..8).map(|v| (v % 4) as f32).collect(),
    });
    let ud = Box::into_raw(source) as *mut c_void;
    let (mut p, bridge, dx) = bridged_derivative(ud);

    let first = p.update(dx).unwrap();
    assert_eq!(first.sample_f64(&[1, 0]), Some(1.0));
    let again = p.update(dx).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(foreign(ud).update_data_calls, 1);
    assert_eq!(p.get_output(bridge).unwrap().buffer().ownership(), BufferOwnership::External);

    // Rewrite the foreign pixels and report it.
    for v in foreign(ud).pixels.iter_mut() {
        *v *= 3.0;
    }
    foreign(ud).changed = 1;
    let changed = p.update(dx).unwrap();
    assert_eq!(changed.sample_f64(&[1, 0]), Some(3.0));
    assert!(!Arc::ptr_eq(&first, &changed));
    assert_eq!(foreign(ud).update_data_calls, 2);

    drop((first, again, changed));
    drop(p);
    drop(unsafe { Box::from_raw(ud as *mut ForeignSource) });
}
