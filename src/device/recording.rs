//! A device that creates nothing on a GPU and writes every command into a list.
//!
//! Backs the `--dry-run` mode of the binary and the tests: handles are sequential, live objects
//! are tracked so leaks and double frees show up, and recorded commands can be inspected.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use serde::Serialize;

use super::{
    BarrierScope, BindingLayoutEntry, BindingSetLayoutHandle, ComputeDevice, DeviceError,
    ImageDesc, ImageHandle, ImageViewHandle, ParameterRange, PipelineHandle, PipelineLayoutHandle,
    ResourceWrite, SamplerHandle,
};
use crate::kernel::KernelBinary;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RecordedCommand {
    BindPipeline(PipelineHandle),
    PushResourceSet {
        layout: PipelineLayoutHandle,
        writes: Vec<ResourceWrite>,
    },
    UploadParameterBlock {
        layout: PipelineLayoutHandle,
        bytes: Vec<u8>,
    },
    Dispatch([u32; 3]),
    Barrier(BarrierScope),
}

impl fmt::Display for RecordedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BindPipeline(pipeline) => write!(f, "bind_pipeline {pipeline}"),
            Self::PushResourceSet { layout, writes } => {
                write!(f, "push_resource_set layout={layout}")?;
                for write in writes {
                    match write.resource {
                        super::BoundResource::ImageView(view) => {
                            write!(f, " [{}]=view{view}", write.binding)?
                        }
                        super::BoundResource::Sampler(sampler) => {
                            write!(f, " [{}]=sampler{sampler}", write.binding)?
                        }
                    }
                }
                Ok(())
            }
            Self::UploadParameterBlock { layout, bytes } => {
                write!(f, "upload_parameters layout={layout} {} bytes", bytes.len())
            }
            Self::Dispatch([x, y, z]) => write!(f, "dispatch {x}x{y}x{z}"),
            Self::Barrier(scope) => write!(f, "barrier {scope:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedPipeline {
    pub label: String,
    pub entry_point: String,
    pub layout: PipelineLayoutHandle,
    pub word_count: usize,
}

#[derive(Debug, Default)]
pub struct RecordingDevice {
    next_handle: u64,
    commands: Vec<RecordedCommand>,
    set_layouts: HashMap<BindingSetLayoutHandle, Vec<BindingLayoutEntry>>,
    pipeline_layouts: HashMap<PipelineLayoutHandle, (BindingSetLayoutHandle, ParameterRange)>,
    pipelines: HashMap<PipelineHandle, RecordedPipeline>,
    images: HashMap<ImageHandle, ImageDesc>,
    views: HashMap<ImageViewHandle, (ImageHandle, u32)>,
    sampler: Option<SamplerHandle>,
    failing_pipelines: HashSet<usize>,
    pipelines_created: usize,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `n`th pipeline creation from now (0-based) fail.
    pub fn fail_pipeline_creation(&mut self, n: usize) {
        self.failing_pipelines.insert(self.pipelines_created + n);
    }

    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn barrier_count(&self, scope: BarrierScope) -> usize {
        self.commands
            .iter()
            .filter(|c| **c == RecordedCommand::Barrier(scope))
            .count()
    }

    pub fn dispatches(&self) -> Vec<[u32; 3]> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Dispatch(groups) => Some(*groups),
                _ => None,
            })
            .collect()
    }

    pub fn set_layout_entries(&self, layout: BindingSetLayoutHandle) -> Option<&[BindingLayoutEntry]> {
        self.set_layouts.get(&layout).map(Vec::as_slice)
    }

    pub fn pipeline_layout(
        &self,
        layout: PipelineLayoutHandle,
    ) -> Option<(BindingSetLayoutHandle, ParameterRange)> {
        self.pipeline_layouts.get(&layout).copied()
    }

    pub fn pipeline(&self, pipeline: PipelineHandle) -> Option<&RecordedPipeline> {
        self.pipelines.get(&pipeline)
    }

    pub fn image(&self, image: ImageHandle) -> Option<&ImageDesc> {
        self.images.get(&image)
    }

    pub fn view(&self, view: ImageViewHandle) -> Option<(ImageHandle, u32)> {
        self.views.get(&view).copied()
    }

    /// Pipelines, layouts, images and views that were created and not yet destroyed.
    pub fn live_object_count(&self) -> usize {
        self.set_layouts.len()
            + self.pipeline_layouts.len()
            + self.pipelines.len()
            + self.images.len()
            + self.views.len()
    }

    pub fn live_image_count(&self) -> usize {
        self.images.len()
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

fn forget<K: std::hash::Hash + Eq + fmt::Display, V>(
    map: &mut HashMap<K, V>,
    key: K,
    object: &str,
) {
    if map.remove(&key).is_none() {
        log::warn!("destroying unknown {object} {key}");
    }
}

impl ComputeDevice for RecordingDevice {
    fn create_binding_set_layout(
        &mut self,
        _label: &str,
        entries: &[BindingLayoutEntry],
    ) -> Result<BindingSetLayoutHandle, DeviceError> {
        let handle = BindingSetLayoutHandle::from_raw(self.next());
        self.set_layouts.insert(handle, entries.to_vec());
        Ok(handle)
    }

    fn create_pipeline_layout(
        &mut self,
        _label: &str,
        set_layout: BindingSetLayoutHandle,
        parameters: ParameterRange,
    ) -> Result<PipelineLayoutHandle, DeviceError> {
        if !self.set_layouts.contains_key(&set_layout) {
            return Err(DeviceError::UnknownHandle {
                object: "binding set layout",
                raw: set_layout.raw(),
            });
        }
        let handle = PipelineLayoutHandle::from_raw(self.next());
        self.pipeline_layouts
            .insert(handle, (set_layout, parameters));
        Ok(handle)
    }

    fn create_compute_pipeline(
        &mut self,
        label: &str,
        kernel: &KernelBinary,
        entry_point: &str,
        layout: PipelineLayoutHandle,
    ) -> Result<PipelineHandle, DeviceError> {
        let attempt = self.pipelines_created;
        self.pipelines_created += 1;
        if self.failing_pipelines.remove(&attempt) {
            return Err(DeviceError::Creation {
                object: "compute pipeline",
                label: label.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        if !self.pipeline_layouts.contains_key(&layout) {
            return Err(DeviceError::UnknownHandle {
                object: "pipeline layout",
                raw: layout.raw(),
            });
        }
        let handle = PipelineHandle::from_raw(self.next());
        self.pipelines.insert(
            handle,
            RecordedPipeline {
                label: label.to_string(),
                entry_point: entry_point.to_string(),
                layout,
                word_count: kernel.words().len(),
            },
        );
        Ok(handle)
    }

    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageHandle, DeviceError> {
        if desc.extent.contains(&0) || desc.mip_levels == 0 {
            return Err(DeviceError::Creation {
                object: "image",
                label: desc.label.clone(),
                reason: format!(
                    "degenerate extent {:?} with {} mips",
                    desc.extent, desc.mip_levels
                ),
            });
        }
        let handle = ImageHandle::from_raw(self.next());
        self.images.insert(handle, desc.clone());
        Ok(handle)
    }

    fn create_image_view(
        &mut self,
        image: ImageHandle,
        mip_level: u32,
    ) -> Result<ImageViewHandle, DeviceError> {
        let Some(desc) = self.images.get(&image) else {
            return Err(DeviceError::UnknownHandle {
                object: "image",
                raw: image.raw(),
            });
        };
        if mip_level >= desc.mip_levels {
            return Err(DeviceError::Creation {
                object: "image view",
                label: desc.label.clone(),
                reason: format!("mip {mip_level} out of {} levels", desc.mip_levels),
            });
        }
        let handle = ImageViewHandle::from_raw(self.next());
        self.views.insert(handle, (image, mip_level));
        Ok(handle)
    }

    fn default_sampler(&mut self) -> Result<SamplerHandle, DeviceError> {
        if let Some(sampler) = self.sampler {
            return Ok(sampler);
        }
        let sampler = SamplerHandle::from_raw(self.next());
        self.sampler = Some(sampler);
        Ok(sampler)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        forget(&mut self.pipelines, pipeline, "pipeline");
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        forget(&mut self.pipeline_layouts, layout, "pipeline layout");
    }

    fn destroy_binding_set_layout(&mut self, layout: BindingSetLayoutHandle) {
        forget(&mut self.set_layouts, layout, "binding set layout");
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) {
        forget(&mut self.views, view, "image view");
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        forget(&mut self.images, image, "image");
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.commands.push(RecordedCommand::BindPipeline(pipeline));
    }

    fn push_resource_set(&mut self, layout: PipelineLayoutHandle, writes: &[ResourceWrite]) {
        self.commands.push(RecordedCommand::PushResourceSet {
            layout,
            writes: writes.to_vec(),
        });
    }

    fn upload_parameter_block(&mut self, layout: PipelineLayoutHandle, bytes: &[u8]) {
        self.commands.push(RecordedCommand::UploadParameterBlock {
            layout,
            bytes: bytes.to_vec(),
        });
    }

    fn dispatch(&mut self, group_counts: [u32; 3]) {
        self.commands.push(RecordedCommand::Dispatch(group_counts));
    }

    fn execution_barrier(&mut self, scope: BarrierScope) {
        self.commands.push(RecordedCommand::Barrier(scope));
    }
}
