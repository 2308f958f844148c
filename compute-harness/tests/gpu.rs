//! End-to-end checks against a real adapter.
//!
//! Without an adapter that supports read-write storage images each test
//! prints a skip notice and returns. Set `COMPUTE_HARNESS_REQUIRE_GPU=1` to
//! turn a missing adapter into a failure instead.

use std::{
    fs,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use compute_harness::{
    ComputeProgram, ContextHooks, DispatchExtent, DriverErrorCode, GpuContext, HarnessError,
    ImageResource, ImageSize, ShaderStage, WorkGroupLimits, dispatch_and_barrier,
};

const REQUIRE_GPU_VAR: &str = "COMPUTE_HARNESS_REQUIRE_GPU";

const DOUBLE: &str = r#"
@group(0) @binding(3) var image: texture_storage_2d<rgba32float, read_write>;

@compute @workgroup_size(1)
fn main(@builtin(workgroup_id) group: vec3<u32>) {
    let texel = vec2<u32>(group.xy);
    textureStore(image, texel, textureLoad(image, texel) * 2.0);
}
"#;

const COORDINATES: &str = r#"
@group(0) @binding(3) var image: texture_storage_2d<rgba32float, read_write>;

@compute @workgroup_size(1)
fn main(@builtin(workgroup_id) group: vec3<u32>) {
    textureStore(image, group.xy, vec4<f32>(f32(group.x), f32(group.y), 0.0, 1.0));
}
"#;

// Binds the image at 0 while the pipeline layout only provides 3.
const WRONG_BINDING: &str = r#"
@group(0) @binding(0) var image: texture_storage_2d<rgba32float, read_write>;

@compute @workgroup_size(1)
fn main(@builtin(workgroup_id) group: vec3<u32>) {
    textureStore(image, group.xy, vec4<f32>(1.0));
}
"#;

fn context() -> Option<GpuContext> {
    context_with(ContextHooks::default())
}

fn context_with(hooks: ContextHooks) -> Option<GpuContext> {
    match GpuContext::headless(hooks) {
        Ok(ctx) => Some(ctx),
        Err(err) if std::env::var_os(REQUIRE_GPU_VAR).is_some() => {
            panic!("{REQUIRE_GPU_VAR} is set but no usable adapter exists: {err}")
        }
        Err(err) => {
            eprintln!("SKIPPED (no usable adapter, set {REQUIRE_GPU_VAR} to fail): {err}");
            None
        }
    }
}

fn temp_shader(name: &str, source: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "compute-harness-{}-{name}.wgsl",
        std::process::id()
    ));
    fs::write(&path, source).unwrap();
    path
}

#[test]
fn compile_failure_reports_log() {
    let Some(ctx) = context() else { return };
    let err = ComputeProgram::from_source(&ctx, "broken", "fn main( {").unwrap_err();
    assert_eq!(err.stage, ShaderStage::Compile);
    assert!(!err.log.is_empty());
    assert!(err.log.len() <= compute_harness::program::MAX_LOG_LEN);
    assert!(!ctx.errors().take().is_error());
}

#[test]
fn program_failures_stay_out_of_driver_error_stream() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let hooks = ContextHooks::default().with_driver_error(move |_, _| {
        counted.fetch_add(1, Ordering::SeqCst);
    });
    let Some(ctx) = context_with(hooks) else { return };

    ctx.errors()
        .record(DriverErrorCode::OutOfMemory, "earlier failure".to_string());
    let compile = ComputeProgram::from_source(&ctx, "broken", "fn main( {").unwrap_err();
    assert_eq!(compile.stage, ShaderStage::Compile);
    let link = ComputeProgram::from_source(&ctx, "wrong binding", WRONG_BINDING).unwrap_err();
    assert_eq!(link.stage, ShaderStage::Link);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.errors().take(), DriverErrorCode::OutOfMemory);
}

#[test]
fn binding_mismatch_fails_to_link() {
    let Some(ctx) = context() else { return };
    let err = ComputeProgram::from_source(&ctx, "wrong binding", WRONG_BINDING).unwrap_err();
    assert_eq!(err.stage, ShaderStage::Link);
    assert!(!err.log.is_empty());
}

#[test]
fn fresh_image_reads_back_fill() {
    let Some(ctx) = context() else { return };
    let size = ImageSize::new(7, 3);
    let image = ImageResource::create(&ctx, size, 0.25);
    let values = image.read(&ctx).unwrap();
    assert_eq!(values.len(), 7 * 3 * 4);
    assert!(values.iter().all(|&v| v == 0.25));
}

#[test]
fn reads_without_dispatch_are_stable() {
    let Some(ctx) = context() else { return };
    let image = ImageResource::create(&ctx, ImageSize::new(10, 5), 3.0);
    assert_eq!(image.read(&ctx).unwrap(), image.read(&ctx).unwrap());
}

#[test]
fn work_group_coordinates_land_in_their_texel() {
    let Some(ctx) = context() else { return };
    let size = ImageSize::new(4, 3);
    let program = ComputeProgram::from_source(&ctx, "coordinates", COORDINATES).unwrap();
    let image = ImageResource::create(&ctx, size, 0.0);
    dispatch_and_barrier(&ctx, &program, &image, size.dispatch_extent()).unwrap();

    let values = image.read(&ctx).unwrap();
    for y in 0..size.height {
        for x in 0..size.width {
            let offset = ((y * size.width + x) * 4) as usize;
            assert_eq!(
                values[offset..offset + 4],
                [x as f32, y as f32, 0.0, 1.0],
                "texel ({x}, {y})"
            );
        }
    }
    assert!(!ctx.errors().take().is_error());
}

#[test]
fn doubling_shader_from_file() {
    let Some(ctx) = context() else { return };
    let path = temp_shader("double", DOUBLE);
    let program = ComputeProgram::load(&ctx, &path);
    let _ = fs::remove_file(&path);
    let program = program.unwrap();

    let size = ImageSize::new(10, 5);
    let extent = size.dispatch_extent();
    assert_eq!(extent, DispatchExtent::new(10, 5, 1));
    WorkGroupLimits::query(&ctx).check_extent(extent).unwrap();

    let image = ImageResource::create(&ctx, size, 0.5);
    let before = image.read(&ctx).unwrap();
    assert_eq!(before, vec![0.5; 200]);

    dispatch_and_barrier(&ctx, &program, &image, extent).unwrap();
    assert_eq!(image.read(&ctx).unwrap(), vec![1.0; 200]);

    dispatch_and_barrier(&ctx, &program, &image, extent).unwrap();
    assert_eq!(image.read(&ctx).unwrap(), vec![2.0; 200]);
}

#[test]
fn missing_shader_file_is_reported() {
    let Some(ctx) = context() else { return };
    let path = std::env::temp_dir().join("compute-harness-does-not-exist.wgsl");
    let err = ComputeProgram::load(&ctx, &path).unwrap_err();
    assert!(matches!(err, HarnessError::ShaderSource { path: p, .. } if p == path));
}

#[test]
fn device_rejects_image_wider_than_texture_limit() {
    let Some(ctx) = context() else { return };
    let limits = ctx.device().limits();
    let size = ImageSize::new(limits.max_texture_dimension_2d + 1, 5);
    assert!(matches!(
        ImageResource::check_size(size, &limits),
        Err(HarnessError::ImageExceedsLimits { .. })
    ));
    assert!(ImageResource::check_size(ImageSize::new(10, 5), &limits).is_ok());
}

#[test]
fn limits_cover_small_images() {
    let Some(ctx) = context() else { return };
    let limits = WorkGroupLimits::query(&ctx);
    assert!(limits.count.iter().all(|&count| count >= 10));
    assert!(limits.invocations >= 1);
}
