//! Named chains of compute subpasses.
//!
//! An [`Effect`] owns one [`Subpass`] per kernel of its chain, a parameter block per subpass and
//! the name index that lets one write reach every subpass declaring a field. Executing an effect
//! records one dispatch per subpass with a barrier between consecutive subpasses.

use std::{collections::HashSet, path::Path};

use serde::Serialize;
use thiserror::Error;

use crate::{
    device::{
        BarrierScope, BoundResource, ComputeDevice, DeviceError, ImageDesc, ImageHandle,
        ImageViewHandle, ResourceWrite, SamplerHandle,
    },
    kernel::{KernelLoadError, discover_chain, load_kernel},
    reflect::{BindingSlot, ReflectError, ResourceKind, TexelFormat, reflect},
};

pub mod config;
pub mod params;
pub mod subpass;

use config::{EffectConfig, EffectConfigError, SubpassPatch};
use params::{ParameterField, ParameterIndex, ParameterValue};
use subpass::{DispatchPolicy, Subpass};

pub const CONFIG_EXTENSION: &str = "json";
/// Parameter field receiving the target extent before every dispatch.
pub const IMAGE_EXTENT_FIELD: &str = "image_extent";
/// Parameter field receiving the extent of scratch mip 0 before every dispatch.
pub const SCRATCH_EXTENT_FIELD: &str = "scratch_extent";
pub const SCRATCH_FORMAT: TexelFormat = TexelFormat::Rgba16Float;

#[derive(Debug, Error)]
pub enum EffectLoadError {
    #[error("effect `{0}` has no kernels")]
    EmptyChain(String),
    #[error("effect `{effect}` subpass {index}: {source}")]
    Kernel {
        effect: String,
        index: usize,
        #[source]
        source: KernelLoadError,
    },
    #[error("effect `{effect}` subpass {index}: {source}")]
    Reflect {
        effect: String,
        index: usize,
        #[source]
        source: ReflectError,
    },
    #[error("effect `{effect}` subpass {index}: {source}")]
    Device {
        effect: String,
        index: usize,
        #[source]
        source: DeviceError,
    },
}

impl EffectLoadError {
    /// Whether the failure must abort loading altogether instead of skipping the effect.
    ///
    /// A device that cannot create the objects, or a kernel spread over several binding sets,
    /// leaves no usable way to run the effect.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Device { .. }
                | Self::Reflect {
                    source: ReflectError::MultipleBindingSets(..),
                    ..
                }
        )
    }
}

/// Per-frame state handed to [`Effect::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    pub target: ImageViewHandle,
    pub extent: [u32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The value was copied into this many subpass locations.
    Applied(usize),
    UnknownName,
    SizeMismatch { expected: u32, actual: usize },
}

#[derive(Debug)]
struct ScratchImage {
    image: ImageHandle,
    views: Vec<ImageViewHandle>,
    target_extent: [u32; 2],
    extent: [u32; 2],
}

impl ScratchImage {
    fn release(self, device: &mut dyn ComputeDevice) {
        for view in self.views {
            device.destroy_image_view(view);
        }
        device.destroy_image(self.image);
    }
}

/// Extent of scratch mip 0 for a target of `extent`.
pub fn scratch_extent(extent: [u32; 2]) -> [u32; 2] {
    [(extent[0] / 2).max(1), (extent[1] / 2).max(1)]
}

fn max_mip_levels(extent: [u32; 2]) -> u32 {
    32 - extent[0].max(extent[1]).max(1).leading_zeros()
}

#[derive(Debug, Clone, Serialize)]
pub struct SubpassSnapshot {
    pub label: String,
    pub workgroup_size: [u32; 3],
    pub parameter_block_size: usize,
    pub slots: Vec<[f32; 4]>,
    pub dispatch: DispatchPolicy,
    pub bindings: Vec<BindingSlot>,
}

/// Serializable view of an effect for debug tooling.
#[derive(Debug, Clone, Serialize)]
pub struct EffectSnapshot {
    pub name: String,
    pub enabled: bool,
    pub scratch_mip_levels: u32,
    pub subpasses: Vec<SubpassSnapshot>,
    pub fields: Vec<ParameterField>,
}

#[derive(Debug)]
pub struct Effect {
    name: String,
    enabled: bool,
    subpasses: Vec<Subpass>,
    index: ParameterIndex,
    scratch_mip_levels: u32,
    scratch: Option<ScratchImage>,
    reported_unresolved: HashSet<(usize, u32)>,
}

impl Effect {
    /// Loads `<root>/<name>_pass<N>.spv` for every contiguous `N` from 0 and applies
    /// `<root>/<name>.json` if it exists.
    ///
    /// Config problems are logged and leave the entries before the faulty one applied.
    pub fn load(
        device: &mut dyn ComputeDevice,
        root: &Path,
        name: &str,
    ) -> Result<Self, EffectLoadError> {
        let mut effect = Self {
            name: name.to_string(),
            enabled: true,
            subpasses: Vec::new(),
            index: ParameterIndex::new(),
            scratch_mip_levels: 0,
            scratch: None,
            reported_unresolved: HashSet::new(),
        };

        for (index, path) in discover_chain(root, name).into_iter().enumerate() {
            if let Err(err) = effect.push_subpass(device, &path, index) {
                effect.destroy(device);
                return Err(err);
            }
        }
        if effect.subpasses.is_empty() {
            return Err(EffectLoadError::EmptyChain(name.to_string()));
        }

        let config_path = root.join(format!("{name}.{CONFIG_EXTENSION}"));
        match EffectConfig::from_path(&config_path) {
            Ok(Some(config)) => {
                if let Err(err) = effect.apply_config(&config) {
                    log::error!(
                        "[effect] `{name}`: {err}; keeping the config entries applied before it"
                    );
                }
            }
            Ok(None) => {}
            Err(err) => log::error!("[effect] `{name}`: {err}"),
        }

        log::info!(
            "[effect] loaded `{name}` with {} subpasses, {} parameters{}",
            effect.subpasses.len(),
            effect.index.len(),
            if effect.scratch_mip_levels > 0 {
                format!(", {} scratch mips", effect.scratch_mip_levels)
            } else {
                String::new()
            }
        );
        Ok(effect)
    }

    fn push_subpass(
        &mut self,
        device: &mut dyn ComputeDevice,
        path: &Path,
        index: usize,
    ) -> Result<(), EffectLoadError> {
        let kernel = load_kernel(path).map_err(|source| EffectLoadError::Kernel {
            effect: self.name.clone(),
            index,
            source,
        })?;
        let schema = reflect(&kernel).map_err(|source| EffectLoadError::Reflect {
            effect: self.name.clone(),
            index,
            source,
        })?;
        let label = format!("{}_pass{index}", self.name);
        let subpass = Subpass::build(device, &label, &kernel, &schema).map_err(|source| {
            EffectLoadError::Device {
                effect: self.name.clone(),
                index,
                source,
            }
        })?;

        for field in schema.fields() {
            self.index.register_reflected(index, field);
        }
        self.scratch_mip_levels = self.scratch_mip_levels.max(schema.scratch_mip_levels());
        self.subpasses.push(subpass);
        Ok(())
    }

    /// Applies `config` entry by entry and returns the number of entries applied.
    ///
    /// Each entry is validated before it touches anything, so the first error leaves every
    /// earlier entry applied and nothing of the faulty one.
    pub fn apply_config(&mut self, config: &EffectConfig) -> Result<usize, EffectConfigError> {
        if let Some(enabled) = config.enabled {
            self.enabled = enabled;
        }
        let mut applied = 0;
        for entry in config.entries() {
            let patch = entry?.resolve(self.subpasses.len())?;
            self.apply_patch(&patch);
            applied += 1;
        }
        Ok(applied)
    }

    fn apply_patch(&mut self, patch: &SubpassPatch) {
        if let Some(from) = patch.inherit_from {
            let parameters = self.subpasses[from].parameters.clone();
            let dispatch = self.subpasses[from].dispatch;
            let subpass = &mut self.subpasses[patch.index];
            subpass.parameters.copy_contents_from(&parameters);
            subpass.dispatch = dispatch;
        }

        for value in &patch.values {
            let subpass = &mut self.subpasses[patch.index];
            subpass
                .parameters
                .write(value.offset as usize, &value.value.to_bytes());
            if let Some(name) = &value.name {
                self.index
                    .bind_name(name, patch.index, value.offset, value.tag());
            }
        }

        if let Some(dispatch) = &patch.dispatch {
            dispatch.apply_to(&mut self.subpasses[patch.index].dispatch);
        }
    }

    pub fn write_parameter(&mut self, name: &str, value: &ParameterValue) -> WriteOutcome {
        if let Some(field) = self.index.get(name) {
            if field.tag != value.tag() && field.size as usize == value.byte_size() {
                log::debug!(
                    "[effect] `{}`: writing {} into `{name}` declared as {}",
                    self.name,
                    value.tag(),
                    field.tag
                );
            }
        }
        self.write_parameter_bytes(name, &value.to_bytes())
    }

    /// Copies `bytes` into every location registered for `name`.
    ///
    /// Unknown names are ignored. A size different from the field's leaves every block untouched.
    pub fn write_parameter_bytes(&mut self, name: &str, bytes: &[u8]) -> WriteOutcome {
        let Some(field) = self.index.get(name) else {
            log::trace!("[effect] `{}` has no parameter `{name}`", self.name);
            return WriteOutcome::UnknownName;
        };
        if bytes.len() != field.size as usize {
            log::warn!(
                "[effect] `{}`: rejected {}-byte write to `{name}`, which is {} bytes",
                self.name,
                bytes.len(),
                field.size
            );
            return WriteOutcome::SizeMismatch {
                expected: field.size,
                actual: bytes.len(),
            };
        }

        let mut written = 0;
        for location in &field.locations {
            let Some(subpass) = self.subpasses.get_mut(location.subpass) else {
                continue;
            };
            if subpass.parameters.write(location.offset as usize, bytes) {
                written += 1;
            }
        }
        WriteOutcome::Applied(written)
    }

    /// Value of `name` as stored in the first subpass declaring it.
    pub fn read_parameter(&self, name: &str) -> Option<ParameterValue> {
        let field = self.index.get(name)?;
        let location = field.locations.first()?;
        let bytes = self
            .subpasses
            .get(location.subpass)?
            .parameters
            .read(location.offset as usize, field.size as usize)?;
        ParameterValue::from_bytes(field.tag, bytes)
    }

    /// Records every subpass against `frame.target`.
    ///
    /// Consecutive subpasses are separated by a barrier; a final barrier follows the last one only
    /// if `synchronize_after` is set. Nothing is recorded while the effect is disabled.
    pub fn execute(
        &mut self,
        device: &mut dyn ComputeDevice,
        frame: &FrameContext,
        synchronize_after: bool,
    ) {
        if !self.enabled {
            return;
        }

        if self.scratch_mip_levels > 0 {
            if let Err(err) = self.ensure_scratch(device, frame.extent) {
                log::error!("[effect] `{}`: scratch image unavailable: {err}", self.name);
            }
        }
        let sampler = self.sampler_if_needed(device);
        let scratch_extent = self.scratch.as_ref().map(|s| s.extent);

        let last = self.subpasses.len().saturating_sub(1);
        for index in 0..self.subpasses.len() {
            self.write_extent_fields(index, frame.extent, scratch_extent);

            let subpass = &self.subpasses[index];
            device.bind_pipeline(subpass.pipeline());

            let mut writes = Vec::with_capacity(subpass.bindings().len());
            for slot in subpass.bindings() {
                let resource = if slot.is_target() {
                    Some(BoundResource::ImageView(frame.target))
                } else if let Some(mip) = slot.scratch_mip() {
                    self.scratch
                        .as_ref()
                        .and_then(|s| s.views.get(mip as usize))
                        .map(|view| BoundResource::ImageView(*view))
                } else if slot.kind == ResourceKind::Sampler {
                    sampler.map(BoundResource::Sampler)
                } else {
                    None
                };
                match resource {
                    Some(resource) => writes.push(ResourceWrite {
                        binding: slot.binding,
                        resource,
                    }),
                    None => {
                        if self.reported_unresolved.insert((index, slot.binding)) {
                            log::error!(
                                "[effect] `{}` subpass {index}: nothing to bind to binding {} `{}`",
                                self.name,
                                slot.binding,
                                slot.name
                            );
                        }
                    }
                }
            }
            device.push_resource_set(subpass.pipeline_layout(), &writes);
            device.upload_parameter_block(subpass.pipeline_layout(), subpass.parameters.as_bytes());

            let groups = subpass.group_counts(frame.extent);
            if groups.contains(&0) {
                log::debug!(
                    "[effect] `{}` subpass {index}: empty dispatch {groups:?} skipped",
                    self.name
                );
            } else {
                device.dispatch(groups);
            }

            if index != last {
                device.execution_barrier(BarrierScope::BetweenSubpasses);
            }
        }

        if synchronize_after {
            device.execution_barrier(BarrierScope::AfterEffect);
        }
    }

    fn write_extent_fields(
        &mut self,
        index: usize,
        extent: [u32; 2],
        scratch_extent: Option<[u32; 2]>,
    ) {
        let subpass = &mut self.subpasses[index];
        let mut writes = Vec::new();
        for field in subpass.fields() {
            let value = match field.name.as_str() {
                IMAGE_EXTENT_FIELD => Some(extent),
                SCRATCH_EXTENT_FIELD => scratch_extent,
                _ => None,
            };
            let Some(value) = value else { continue };
            match ParameterValue::extent(field.tag, value) {
                Some(value) => writes.push((field.offset, value)),
                None => log::warn!(
                    "[effect] `{}` subpass {index}: `{}` is {}, expected a 2-component vector",
                    self.name,
                    field.name,
                    field.tag
                ),
            }
        }
        for (offset, value) in writes {
            subpass.parameters.write(offset as usize, &value.to_bytes());
        }
    }

    fn sampler_if_needed(&self, device: &mut dyn ComputeDevice) -> Option<SamplerHandle> {
        let needed = self
            .subpasses
            .iter()
            .flat_map(Subpass::bindings)
            .any(|slot| slot.kind == ResourceKind::Sampler);
        if !needed {
            return None;
        }
        device
            .default_sampler()
            .map_err(|err| log::error!("[effect] `{}`: {err}", self.name))
            .ok()
    }

    /// Makes sure the scratch image matches the current target extent.
    fn ensure_scratch(
        &mut self,
        device: &mut dyn ComputeDevice,
        target_extent: [u32; 2],
    ) -> Result<(), DeviceError> {
        if self
            .scratch
            .as_ref()
            .is_some_and(|s| s.target_extent == target_extent)
        {
            return Ok(());
        }
        if let Some(old) = self.scratch.take() {
            old.release(device);
        }

        let extent = scratch_extent(target_extent);
        let mip_levels = self.scratch_mip_levels.min(max_mip_levels(extent));
        if mip_levels < self.scratch_mip_levels {
            log::warn!(
                "[effect] `{}`: scratch extent {extent:?} only fits {mip_levels} of {} mips",
                self.name,
                self.scratch_mip_levels
            );
        }
        let image = device.create_image(&ImageDesc {
            label: format!("{}.scratch", self.name),
            extent,
            mip_levels,
            format: SCRATCH_FORMAT,
        })?;

        let mut views = Vec::with_capacity(mip_levels as usize);
        for mip in 0..mip_levels {
            match device.create_image_view(image, mip) {
                Ok(view) => views.push(view),
                Err(err) => {
                    ScratchImage {
                        image,
                        views,
                        target_extent,
                        extent,
                    }
                    .release(device);
                    return Err(err);
                }
            }
        }

        log::debug!(
            "[effect] `{}`: allocated {extent:?} scratch image with {mip_levels} mips",
            self.name
        );
        self.scratch = Some(ScratchImage {
            image,
            views,
            target_extent,
            extent,
        });
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling keeps every parameter and dispatch setting as it is.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn subpass_count(&self) -> usize {
        self.subpasses.len()
    }

    pub fn subpass(&self, index: usize) -> Option<&Subpass> {
        self.subpasses.get(index)
    }

    pub fn subpass_mut(&mut self, index: usize) -> Option<&mut Subpass> {
        self.subpasses.get_mut(index)
    }

    pub fn subpasses(&self) -> &[Subpass] {
        &self.subpasses
    }

    pub fn parameter_index(&self) -> &ParameterIndex {
        &self.index
    }

    pub fn requires_scratch(&self) -> bool {
        self.scratch_mip_levels > 0
    }

    pub fn scratch_mip_levels(&self) -> u32 {
        self.scratch_mip_levels
    }

    pub fn scratch_image(&self) -> Option<ImageHandle> {
        self.scratch.as_ref().map(|s| s.image)
    }

    pub fn inspect(&self) -> EffectSnapshot {
        EffectSnapshot {
            name: self.name.clone(),
            enabled: self.enabled,
            scratch_mip_levels: self.scratch_mip_levels,
            subpasses: self
                .subpasses
                .iter()
                .map(|subpass| SubpassSnapshot {
                    label: subpass.label().to_string(),
                    workgroup_size: subpass.workgroup_size(),
                    parameter_block_size: subpass.parameters.size(),
                    slots: subpass.parameters.slots(),
                    dispatch: subpass.dispatch,
                    bindings: subpass.bindings().to_vec(),
                })
                .collect(),
            fields: self.index.iter().cloned().collect(),
        }
    }

    pub fn destroy(mut self, device: &mut dyn ComputeDevice) {
        if let Some(scratch) = self.scratch.take() {
            scratch.release(device);
        }
        for subpass in self.subpasses.drain(..) {
            subpass.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::{RecordedCommand, RecordingDevice},
        reflect::TypeTag,
        test_kernels::{
            PLAIN_KERNEL, SCRATCH_KERNEL, SHIFTED_STRENGTH_KERNEL, STRENGTH_KERNEL,
            UNRESOLVED_KERNEL, write_kernel,
        },
    };

    fn frame(extent: [u32; 2]) -> FrameContext {
        FrameContext {
            target: ImageViewHandle::from_raw(9000),
            extent,
        }
    }

    fn load(dir: &Path, device: &mut RecordingDevice, name: &str) -> Effect {
        Effect::load(device, dir, name).expect("effect")
    }

    #[test]
    fn empty_chain_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut device = RecordingDevice::new();
        assert!(matches!(
            Effect::load(&mut device, dir.path(), "ghost"),
            Err(EffectLoadError::EmptyChain(name)) if name == "ghost"
        ));
    }

    #[test]
    fn device_failure_releases_built_subpasses() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_kernel(dir.path(), "glow", 0, STRENGTH_KERNEL);
        write_kernel(dir.path(), "glow", 1, PLAIN_KERNEL);
        let mut device = RecordingDevice::new();
        device.fail_pipeline_creation(1);

        let err = Effect::load(&mut device, dir.path(), "glow").expect_err("pipeline failure");
        assert!(matches!(err, EffectLoadError::Device { index: 1, .. }));
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn extents_are_written_with_the_field_type() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_kernel(dir.path(), "glow", 0, STRENGTH_KERNEL);
        write_kernel(dir.path(), "glow", 1, SHIFTED_STRENGTH_KERNEL);
        let mut device = RecordingDevice::new();
        let mut effect = load(dir.path(), &mut device, "glow");

        effect.execute(&mut device, &frame([640, 360]), false);

        let first = &effect.subpass(0).expect("subpass 0").parameters;
        assert_eq!(
            first.read(8, 8),
            Some(&ParameterValue::UVec2([640, 360]).to_bytes()[..])
        );
        let second = &effect.subpass(1).expect("subpass 1").parameters;
        assert_eq!(
            second.read(8, 8),
            Some(&ParameterValue::Vec2([640.0, 360.0]).to_bytes()[..])
        );
        assert_eq!(device.dispatches(), vec![[80, 45, 1], [40, 23, 1]]);
    }

    #[test]
    fn scratch_image_follows_the_target_extent() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_kernel(dir.path(), "bloom", 0, SCRATCH_KERNEL);
        write_kernel(dir.path(), "bloom", 1, PLAIN_KERNEL);
        let mut device = RecordingDevice::new();
        let mut effect = load(dir.path(), &mut device, "bloom");
        assert!(effect.requires_scratch());
        assert_eq!(effect.scratch_mip_levels(), 2);
        assert_eq!(effect.scratch_image(), None);

        effect.execute(&mut device, &frame([64, 32]), true);
        let first = effect.scratch_image().expect("scratch");
        let desc = device.image(first).expect("image desc");
        assert_eq!(desc.extent, [32, 16]);
        assert_eq!(desc.mip_levels, 2);
        assert_eq!(
            effect.subpass(0).expect("subpass").parameters.read(0, 8),
            Some(&ParameterValue::UVec2([32, 16]).to_bytes()[..])
        );

        effect.execute(&mut device, &frame([64, 32]), true);
        assert_eq!(effect.scratch_image(), Some(first));

        effect.execute(&mut device, &frame([128, 64]), true);
        let second = effect.scratch_image().expect("scratch");
        assert_ne!(first, second);
        assert!(device.image(first).is_none());
        assert_eq!(device.live_image_count(), 1);

        let bound = device.commands().iter().find_map(|c| match c {
            RecordedCommand::PushResourceSet { writes, .. } if writes.len() == 4 => Some(writes),
            _ => None,
        });
        let bound = bound.expect("scratch subpass resources");
        assert!(matches!(bound[3].resource, BoundResource::Sampler(_)));

        effect.destroy(&mut device);
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn unresolved_bindings_still_dispatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_kernel(dir.path(), "dirt", 0, UNRESOLVED_KERNEL);
        let mut device = RecordingDevice::new();
        let mut effect = load(dir.path(), &mut device, "dirt");

        effect.execute(&mut device, &frame([16, 16]), false);
        effect.execute(&mut device, &frame([16, 16]), false);

        assert_eq!(device.dispatches().len(), 2);
        assert_eq!(effect.reported_unresolved.len(), 1);
    }

    #[test]
    fn config_names_fan_out_and_type_the_binding() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_kernel(dir.path(), "glow", 0, PLAIN_KERNEL);
        write_kernel(dir.path(), "glow", 1, PLAIN_KERNEL);
        std::fs::write(
            dir.path().join("glow.json"),
            r#"{ "subpasses": [
                { "index": 0, "values": { "1": { "x": { "default": 2, "type": "uint", "name": "taps" } } } },
                { "index": 1, "inheritFrom": 0 } ] }"#,
        )
        .expect("write config");
        let mut device = RecordingDevice::new();
        let mut effect = load(dir.path(), &mut device, "glow");

        let taps = effect.parameter_index().get("taps").expect("taps");
        assert_eq!(taps.tag, TypeTag::new(crate::reflect::ScalarType::UInt, 1));
        assert_eq!(effect.read_parameter("taps"), Some(ParameterValue::UInt(2)));
        assert_eq!(
            effect.subpass(1).expect("subpass").parameters.read(16, 4),
            Some(&2u32.to_le_bytes()[..])
        );

        assert_eq!(
            effect.write_parameter("taps", &ParameterValue::UInt(5)),
            WriteOutcome::Applied(1)
        );
        assert_eq!(
            effect.subpass(1).expect("subpass").parameters.read(16, 4),
            Some(&2u32.to_le_bytes()[..])
        );
    }

    #[test]
    fn snapshot_serializes() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_kernel(dir.path(), "glow", 0, STRENGTH_KERNEL);
        let mut device = RecordingDevice::new();
        let effect = load(dir.path(), &mut device, "glow");

        let json = serde_json::to_value(effect.inspect()).expect("json");
        assert_eq!(json["name"], "glow");
        assert_eq!(json["subpasses"][0]["parameter_block_size"], 16);
        assert_eq!(json["subpasses"][0]["slots"].as_array().map(Vec::len), Some(8));
        assert!(
            json["fields"]
                .as_array()
                .expect("fields")
                .iter()
                .any(|f| f["name"] == "strength")
        );
    }
}
