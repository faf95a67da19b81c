mod common;

use common::{UNRESOLVED_KERNEL, write_file, write_kernel};
use effect_forge::{EffectManager, FrameContext, ParameterValue, WgpuDevice, WriteOutcome};
use image::{Rgba, RgbaImage};

const TINT: &str = r#"
struct Params {
    tint: vec4<f32>,
    image_extent: vec2<u32>,
}

var<push_constant> params: Params;

@group(0) @binding(0) var target_image: texture_storage_2d<rgba16float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.image_extent.x || gid.y >= params.image_extent.y) {
        return;
    }
    textureStore(target_image, vec2<i32>(gid.xy), params.tint);
}
"#;

#[test]
fn tint_effect_fills_the_target_on_the_gpu() {
    let mut device = match WgpuDevice::new_headless() {
        Ok(device) => device,
        Err(err) => {
            eprintln!("No adapter available ({err}); skipping headless GPU test.");
            return;
        }
    };

    let dir = tempfile::tempdir().expect("tempdir");
    write_kernel(dir.path(), "tint", 0, TINT);
    write_file(
        dir.path(),
        "global_config.json",
        r#"{ "effect_order": ["tint"] }"#,
    );

    let input = RgbaImage::from_pixel(13, 7, Rgba([10, 20, 30, 255]));
    let (image, target) = device.upload_rgba8("target", &input).expect("upload");

    let mut manager = EffectManager::new(dir.path());
    assert_eq!(manager.load_effects(&mut device).expect("load"), 1);
    manager.parse_global_config().expect("global config");
    let tint = manager.effect_mut("tint").expect("tint");
    assert_eq!(
        tint.write_parameter("tint", &ParameterValue::Vec4([1.0, 0.0, 0.0, 1.0])),
        WriteOutcome::Applied(1)
    );

    manager.execute_effects(
        &mut device,
        &FrameContext {
            target,
            extent: [13, 7],
        },
    );
    device.submit().expect("submit");

    let output = device.read_rgba8(image).expect("readback");
    assert_eq!(output.dimensions(), (13, 7));
    assert!(output.pixels().all(|p| *p == Rgba([255, 0, 0, 255])));
}

#[test]
fn unresolved_sampled_binding_still_dispatches_with_zeros() {
    let Ok(mut device) = WgpuDevice::new_headless() else {
        eprintln!("No adapter available; skipping headless GPU test.");
        return;
    };

    let dir = tempfile::tempdir().expect("tempdir");
    write_kernel(dir.path(), "dirt", 0, UNRESOLVED_KERNEL);
    write_file(
        dir.path(),
        "global_config.json",
        r#"{ "effect_order": ["dirt"] }"#,
    );

    let input = RgbaImage::from_pixel(9, 5, Rgba([200, 100, 50, 255]));
    let (image, target) = device.upload_rgba8("target", &input).expect("upload");

    let mut manager = EffectManager::new(dir.path());
    assert_eq!(manager.load_effects(&mut device).expect("load"), 1);
    manager.parse_global_config().expect("global config");
    manager.execute_effects(
        &mut device,
        &FrameContext {
            target,
            extent: [9, 5],
        },
    );
    device.submit().expect("submit");

    // lens_dirt reads from a zeroed placeholder, so every written texel is zero.
    let output = device.read_rgba8(image).expect("readback");
    assert!(output.pixels().all(|p| *p == Rgba([0, 0, 0, 0])));
}

#[test]
fn upload_and_readback_round_trip_8bit_values() {
    let Ok(mut device) = WgpuDevice::new_headless() else {
        eprintln!("No adapter available; skipping headless GPU test.");
        return;
    };
    let input = RgbaImage::from_fn(70, 3, |x, y| Rgba([x as u8 * 3, y as u8 * 80, 200, 255]));
    let (image, _) = device.upload_rgba8("target", &input).expect("upload");
    let output = device.read_rgba8(image).expect("readback");
    assert_eq!(output, input);
}
