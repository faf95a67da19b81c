//! WGSL kernels compiled to SPIR-V with naga, shared by the unit and integration tests.
//!
//! Only naga, bytemuck and std are used here so the file compiles inside both test crates.

#![allow(dead_code)]

use std::path::Path;

pub fn compile_wgsl(source: &str) -> Vec<u32> {
    let module = naga::front::wgsl::parse_str(source)
        .unwrap_or_else(|e| panic!("invalid test WGSL: {e}\n{source}"));
    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .unwrap_or_else(|e| panic!("test WGSL failed validation: {e:?}"));
    let options = naga::back::spv::Options {
        flags: naga::back::spv::WriterFlags::DEBUG,
        ..Default::default()
    };
    naga::back::spv::write_vec(&module, &info, &options, None).expect("emit SPIR-V")
}

pub fn write_spirv(path: &Path, source: &str) {
    let words = compile_wgsl(source);
    std::fs::write(path, bytemuck::cast_slice::<u32, u8>(&words))
        .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
}

/// A kernel writing the target image with a `strength` parameter at offset 0 and the
/// target extent at offset 8.
pub const STRENGTH_KERNEL: &str = r#"
struct Params {
    strength: f32,
    quality: i32,
    image_extent: vec2<u32>,
}

var<push_constant> params: Params;

@group(0) @binding(0) var target_image: texture_storage_2d<rgba16float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.image_extent.x || gid.y >= params.image_extent.y) {
        return;
    }
    let v = params.strength * f32(params.quality);
    textureStore(target_image, vec2<i32>(gid.xy), vec4<f32>(v, v, v, 1.0));
}
"#;

/// Same binding layout as [`STRENGTH_KERNEL`] but declares `strength` at offset 4.
pub const SHIFTED_STRENGTH_KERNEL: &str = r#"
struct Params {
    gain: f32,
    strength: f32,
    image_extent: vec2<f32>,
}

var<push_constant> params: Params;

@group(0) @binding(0) var target_image: texture_storage_2d<rgba16float, write>;

@compute @workgroup_size(16, 16, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let v = params.gain * params.strength + params.image_extent.x;
    textureStore(target_image, vec2<i32>(gid.xy), vec4<f32>(v, v, v, 1.0));
}
"#;

/// No parameter block at all.
pub const PLAIN_KERNEL: &str = r#"
@group(0) @binding(0) var target_image: texture_storage_2d<rgba16float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    textureStore(target_image, vec2<i32>(gid.xy), vec4<f32>(1.0));
}
"#;

/// Downsamples into scratch mip 0 and mip 1, reading the target.
pub const SCRATCH_KERNEL: &str = r#"
struct Params {
    scratch_extent: vec2<u32>,
    image_extent: vec2<u32>,
}

var<push_constant> params: Params;

@group(0) @binding(0) var target_image: texture_2d<f32>;
@group(0) @binding(1) var scratch_mip0: texture_storage_2d<rgba16float, write>;
@group(0) @binding(2) var scratch_mip1: texture_storage_2d<rgba16float, write>;
@group(0) @binding(3) var linear_sampler: sampler;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let uv = vec2<f32>(gid.xy) / vec2<f32>(params.scratch_extent);
    let c = textureSampleLevel(target_image, linear_sampler, uv, 0.0);
    textureStore(scratch_mip0, vec2<i32>(gid.xy), c);
    textureStore(scratch_mip1, vec2<i32>(gid.xy / 2u), c);
}
"#;

/// Declares a binding the effect has no resource for.
pub const UNRESOLVED_KERNEL: &str = r#"
@group(0) @binding(0) var target_image: texture_storage_2d<rgba16float, write>;
@group(0) @binding(1) var lens_dirt: texture_2d<f32>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let c = textureLoad(lens_dirt, vec2<i32>(gid.xy), 0);
    textureStore(target_image, vec2<i32>(gid.xy), c);
}
"#;

/// Declares resources in two binding sets.
pub const TWO_SETS_KERNEL: &str = r#"
@group(0) @binding(0) var target_image: texture_storage_2d<rgba16float, write>;
@group(1) @binding(0) var lens_dirt: texture_2d<f32>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let c = textureLoad(lens_dirt, vec2<i32>(gid.xy), 0);
    textureStore(target_image, vec2<i32>(gid.xy), c);
}
"#;

/// Bright-pass extraction into scratch mip 0.
pub const BLOOM_EXTRACT_KERNEL: &str = r#"
struct Params {
    intensity: f32,
    image_extent: vec2<u32>,
    scratch_extent: vec2<u32>,
}

var<push_constant> params: Params;

@group(0) @binding(0) var target_image: texture_storage_2d<rgba16float, read_write>;
@group(0) @binding(1) var scratch_mip0: texture_storage_2d<rgba16float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.scratch_extent.x || gid.y >= params.scratch_extent.y) {
        return;
    }
    let c = textureLoad(target_image, vec2<i32>(gid.xy * 2u));
    textureStore(scratch_mip0, vec2<i32>(gid.xy), c * params.intensity);
}
"#;

/// Composites scratch mip 0 back over the target above a threshold.
pub const BLOOM_COMPOSITE_KERNEL: &str = r#"
struct Params {
    controls: vec4<f32>,
    image_extent: vec2<u32>,
}

var<push_constant> params: Params;

@group(0) @binding(0) var target_image: texture_storage_2d<rgba16float, read_write>;
@group(0) @binding(1) var scratch_mip0: texture_2d<f32>;
@group(0) @binding(2) var bloom_sampler: sampler;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.image_extent.x || gid.y >= params.image_extent.y) {
        return;
    }
    let uv = (vec2<f32>(gid.xy) + 0.5) / vec2<f32>(params.image_extent);
    let glow = textureSampleLevel(scratch_mip0, bloom_sampler, uv, 0.0);
    let c = textureLoad(target_image, vec2<i32>(gid.xy));
    textureStore(target_image, vec2<i32>(gid.xy), c + max(glow - vec4<f32>(params.controls.x), vec4<f32>(0.0)));
}
"#;
