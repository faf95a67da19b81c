use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use log::LevelFilter;

use effect_forge::{
    ComputeDevice, EffectManager, FrameContext, RecordingDevice, WgpuDevice, WriteOutcome,
    device::ImageDesc,
    effect::params::ParameterValue,
    reflect::{ScalarType, TexelFormat},
};

const DEFAULT_EXTENT: [u32; 2] = [1920, 1080];

#[derive(Debug, Clone)]
struct ParameterOverride {
    effect: String,
    field: String,
    value: String,
}

#[derive(Debug, Default, Clone)]
struct Cli {
    effects_dir: Option<PathBuf>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    dry_run: bool,
    inspect: bool,
    extent: Option<[u32; 2]>,
    overrides: Vec<ParameterOverride>,
}

const USAGE: &str = "supported: --effects-dir <dir>, --input <png>, --output <png>, --dry-run, \
                     --extent <WxH>, --inspect, --set <effect.field=value>";

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        let value = |name: &str| {
            args.get(i + 1)
                .ok_or_else(|| anyhow!("missing value for {name}"))
        };
        match args[i].as_str() {
            "--effects-dir" => {
                cli.effects_dir = Some(PathBuf::from(value("--effects-dir")?));
                i += 2;
            }
            "--input" => {
                cli.input = Some(PathBuf::from(value("--input")?));
                i += 2;
            }
            "--output" => {
                cli.output = Some(PathBuf::from(value("--output")?));
                i += 2;
            }
            "--extent" => {
                cli.extent = Some(parse_extent(value("--extent")?)?);
                i += 2;
            }
            "--set" => {
                cli.overrides.push(parse_override(value("--set")?)?);
                i += 2;
            }
            "--dry-run" => {
                cli.dry_run = true;
                i += 1;
            }
            "--inspect" => {
                cli.inspect = true;
                i += 1;
            }
            other => bail!("unknown argument: {other} ({USAGE})"),
        }
    }
    Ok(cli)
}

fn parse_extent(text: &str) -> Result<[u32; 2]> {
    let (w, h) = text
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("invalid extent `{text}`, expected WxH"))?;
    let w: u32 = w.trim().parse().with_context(|| format!("invalid width in `{text}`"))?;
    let h: u32 = h.trim().parse().with_context(|| format!("invalid height in `{text}`"))?;
    if w == 0 || h == 0 {
        bail!("extent `{text}` must be non-zero");
    }
    Ok([w, h])
}

fn parse_override(text: &str) -> Result<ParameterOverride> {
    let (target, value) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("invalid --set `{text}`, expected effect.field=value"))?;
    let (effect, field) = target
        .split_once('.')
        .ok_or_else(|| anyhow!("invalid --set `{text}`, expected effect.field=value"))?;
    Ok(ParameterOverride {
        effect: effect.to_string(),
        field: field.to_string(),
        value: value.trim().to_string(),
    })
}

fn apply_overrides(manager: &mut EffectManager, overrides: &[ParameterOverride]) -> Result<()> {
    for o in overrides {
        let effect = manager
            .effect_mut(&o.effect)
            .ok_or_else(|| anyhow!("--set: no effect named `{}`", o.effect))?;
        let scalar = effect
            .parameter_index()
            .get(&o.field)
            .filter(|field| field.tag.arity == 1)
            .map_or(ScalarType::Float, |field| field.tag.scalar);
        let value = match scalar {
            ScalarType::Float => ParameterValue::Float(o.value.parse()?),
            ScalarType::Int => ParameterValue::Int(o.value.parse()?),
            ScalarType::UInt => ParameterValue::UInt(o.value.parse()?),
            ScalarType::Bool => ParameterValue::Bool(o.value.parse()?),
        };
        match effect.write_parameter(&o.field, &value) {
            WriteOutcome::Applied(n) => {
                log::info!("[cli] {}.{} = {} ({n} locations)", o.effect, o.field, o.value)
            }
            WriteOutcome::UnknownName => {
                log::warn!("[cli] effect `{}` has no parameter `{}`", o.effect, o.field)
            }
            WriteOutcome::SizeMismatch { expected, actual } => bail!(
                "--set {}.{}: field is {expected} bytes, value is {actual}",
                o.effect,
                o.field
            ),
        }
    }
    Ok(())
}

fn load_manager(device: &mut dyn ComputeDevice, cli: &Cli, root: &Path) -> Result<EffectManager> {
    let mut manager = EffectManager::new(root);
    manager.load_effects(device)?;
    manager.parse_global_config()?;
    apply_overrides(&mut manager, &cli.overrides)?;
    Ok(manager)
}

fn run_dry(cli: &Cli, root: &Path) -> Result<()> {
    let mut device = RecordingDevice::new();
    let mut manager = load_manager(&mut device, cli, root)?;

    if cli.inspect {
        println!("{}", serde_json::to_string_pretty(&manager.inspect())?);
    }

    if cli.dry_run {
        let extent = cli.extent.unwrap_or(DEFAULT_EXTENT);
        let image = device.create_image(&ImageDesc {
            label: "target".to_string(),
            extent,
            mip_levels: 1,
            format: TexelFormat::Rgba16Float,
        })?;
        let target = device.create_image_view(image, 0)?;
        manager.execute_effects(&mut device, &FrameContext { target, extent });

        println!(
            "[dry-run] {} effects in order {:?} at {}x{}",
            manager.order().len(),
            manager.order(),
            extent[0],
            extent[1]
        );
        for (i, command) in device.commands().iter().enumerate() {
            println!("{i:4} {command}");
        }
        device.destroy_image_view(target);
        device.destroy_image(image);
    }

    manager.destroy(&mut device);
    Ok(())
}

fn run_gpu(cli: &Cli, root: &Path, input: &Path) -> Result<()> {
    let output = cli
        .output
        .as_deref()
        .ok_or_else(|| anyhow!("--input requires --output"))?;

    let pixels = image::open(input)
        .with_context(|| format!("failed to read {}", input.display()))?
        .to_rgba8();
    let extent = [pixels.width(), pixels.height()];

    let mut device = WgpuDevice::new_headless()?;
    let (image, target) = device.upload_rgba8("target", &pixels)?;
    let mut manager = load_manager(&mut device, cli, root)?;

    if cli.inspect {
        println!("{}", serde_json::to_string_pretty(&manager.inspect())?);
    }

    manager.execute_effects(&mut device, &FrameContext { target, extent });
    device.submit()?;
    let result = device.read_rgba8(image)?;
    result
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("[headless] saved: {}", output.display());

    manager.destroy(&mut device);
    device.destroy_image_view(target);
    device.destroy_image(image);
    Ok(())
}

fn main() -> Result<()> {
    let mut logger = pretty_env_logger::formatted_builder();
    logger
        .format_timestamp(None)
        .filter_level(LevelFilter::Info)
        .filter_module("wgpu_hal", LevelFilter::Off)
        .filter_module("wgpu_core", LevelFilter::Error)
        .filter_module("naga", LevelFilter::Off);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        logger.parse_filters(&filters);
    }
    logger.init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&argv)?;
    let root = cli
        .effects_dir
        .clone()
        .ok_or_else(|| anyhow!("--effects-dir is required ({USAGE})"))?;

    match cli.input.as_deref() {
        Some(input) => run_gpu(&cli, &root, input),
        None if cli.dry_run || cli.inspect => run_dry(&cli, &root),
        None => bail!("nothing to do: pass --input/--output, --dry-run or --inspect"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_a_dry_run_invocation() {
        let cli = parse_cli(&args(&[
            "--effects-dir",
            "fx",
            "--dry-run",
            "--extent",
            "640x360",
            "--set",
            "bloom.threshold=0.5",
        ]))
        .expect("cli");
        assert_eq!(cli.effects_dir, Some(PathBuf::from("fx")));
        assert!(cli.dry_run);
        assert_eq!(cli.extent, Some([640, 360]));
        assert_eq!(cli.overrides[0].effect, "bloom");
        assert_eq!(cli.overrides[0].field, "threshold");
        assert_eq!(cli.overrides[0].value, "0.5");
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_cli(&args(&["--bogus"])).is_err());
        assert!(parse_cli(&args(&["--effects-dir"])).is_err());
        assert!(parse_extent("0x10").is_err());
        assert!(parse_extent("640").is_err());
        assert!(parse_override("threshold=0.5").is_err());
    }
}
