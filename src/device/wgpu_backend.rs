//! Headless wgpu implementation of [`ComputeDevice`].
//!
//! Recording calls append to a pending list that [`WgpuDevice::submit`] replays into one command
//! encoder. Every barrier closes the current compute pass; the next dispatch opens a fresh one.
//!
//! Bindings a resource set leaves unresolved are filled with zeroed 1x1 placeholders, created
//! once per resource kind, so the dispatch still runs.

use std::{borrow::Cow, collections::HashMap};

use image::RgbaImage;

use super::{
    BarrierScope, BindingLayoutEntry, BindingSetLayoutHandle, BoundResource, ComputeDevice,
    DeviceError, ImageDesc, ImageHandle, ImageViewHandle, ParameterRange, PipelineHandle,
    PipelineLayoutHandle, ResourceWrite, SamplerHandle,
};
use crate::{
    effect::params::PARAMETER_BLOCK_CAPACITY,
    kernel::KernelBinary,
    reflect::{ResourceKind, StorageAccess, TexelFormat},
};

const IMAGE_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
    .union(wgpu::TextureUsages::STORAGE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

const PLACEHOLDER_BUFFER_SIZE: u64 = 256;

enum PendingOp {
    SetPipeline(wgpu::ComputePipeline),
    SetBindGroup(wgpu::BindGroup),
    SetParameters(Vec<u8>),
    Dispatch([u32; 3]),
    Barrier,
}

struct SetLayout {
    layout: wgpu::BindGroupLayout,
    entries: Vec<BindingLayoutEntry>,
}

struct PipelineLayout {
    layout: wgpu::PipelineLayout,
    set_layout: BindingSetLayoutHandle,
    parameter_size: u32,
}

struct Image {
    texture: wgpu::Texture,
    desc: ImageDesc,
}

enum Placeholder {
    View(wgpu::TextureView),
    Buffer(wgpu::Buffer),
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    next_handle: u64,
    set_layouts: HashMap<BindingSetLayoutHandle, SetLayout>,
    pipeline_layouts: HashMap<PipelineLayoutHandle, PipelineLayout>,
    pipelines: HashMap<PipelineHandle, wgpu::ComputePipeline>,
    images: HashMap<ImageHandle, Image>,
    views: HashMap<ImageViewHandle, wgpu::TextureView>,
    sampler: Option<(SamplerHandle, wgpu::Sampler)>,
    placeholders: HashMap<ResourceKind, Placeholder>,
    pending: Vec<PendingOp>,
    pipeline_bound: bool,
    resources_complete: bool,
}

impl WgpuDevice {
    /// Opens the default adapter without a surface.
    ///
    /// Fails if the adapter cannot expose push constants large enough for a parameter block.
    pub fn new_headless() -> Result<Self, DeviceError> {
        let creation = |object: &'static str, reason: String| DeviceError::Creation {
            object,
            label: "headless".to_string(),
            reason,
        };

        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .map_err(|e| creation("adapter", e.to_string()))?;

        let adapter_name = adapter.get_info().name;
        if !adapter.features().contains(wgpu::Features::PUSH_CONSTANTS) {
            return Err(creation(
                "device",
                format!("adapter `{adapter_name}` does not support push constants"),
            ));
        }
        let adapter_limits = adapter.limits();
        if (adapter_limits.max_push_constant_size as usize) < PARAMETER_BLOCK_CAPACITY {
            return Err(creation(
                "device",
                format!(
                    "adapter `{adapter_name}` allows {} push-constant bytes, need {PARAMETER_BLOCK_CAPACITY}",
                    adapter_limits.max_push_constant_size
                ),
            ));
        }

        let mut required_features = wgpu::Features::PUSH_CONSTANTS;
        if adapter
            .features()
            .contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES)
        {
            required_features |= wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("effect-forge.device"),
            required_features,
            required_limits: wgpu::Limits {
                max_push_constant_size: PARAMETER_BLOCK_CAPACITY as u32,
                ..adapter_limits
            },
            ..Default::default()
        }))
        .map_err(|e| creation("device", e.to_string()))?;

        log::info!("[device] using adapter `{adapter_name}`");

        Ok(Self {
            device,
            queue,
            adapter_name,
            next_handle: 0,
            set_layouts: HashMap::new(),
            pipeline_layouts: HashMap::new(),
            pipelines: HashMap::new(),
            images: HashMap::new(),
            views: HashMap::new(),
            sampler: None,
            placeholders: HashMap::new(),
            pending: Vec::new(),
            pipeline_bound: false,
            resources_complete: false,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Replays everything recorded since the last submit and hands it to the queue.
    pub fn submit(&mut self) -> Result<(), DeviceError> {
        let ops = std::mem::take(&mut self.pending);
        self.pipeline_bound = false;
        self.resources_complete = false;
        if ops.is_empty() {
            return Ok(());
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("effect-forge.encoder"),
            });

        let mut ops = ops.into_iter().peekable();
        while ops.peek().is_some() {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("effect-forge.pass"),
                timestamp_writes: None,
            });
            for op in ops.by_ref() {
                match op {
                    PendingOp::SetPipeline(pipeline) => pass.set_pipeline(&pipeline),
                    PendingOp::SetBindGroup(group) => pass.set_bind_group(0, &group, &[]),
                    PendingOp::SetParameters(bytes) => pass.set_push_constants(0, &bytes),
                    PendingOp::Dispatch([x, y, z]) => pass.dispatch_workgroups(x, y, z),
                    PendingOp::Barrier => break,
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(DeviceError::Creation {
                object: "command buffer",
                label: "effect-forge.encoder".to_string(),
                reason: error.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Uploads `pixels` into a new single-mip `Rgba16Float` image and returns it with its view.
    pub fn upload_rgba8(
        &mut self,
        label: &str,
        pixels: &RgbaImage,
    ) -> Result<(ImageHandle, ImageViewHandle), DeviceError> {
        let (width, height) = pixels.dimensions();
        let image = self.create_image(&ImageDesc {
            label: label.to_string(),
            extent: [width, height],
            mip_levels: 1,
            format: TexelFormat::Rgba16Float,
        })?;
        let view = self.create_image_view(image, 0)?;

        let texels: Vec<u8> = pixels
            .as_raw()
            .iter()
            .flat_map(|&c| half::f16::from_f32(f32::from(c) / 255.0).to_le_bytes())
            .collect();
        let texture = &self.images[&image].texture;
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &texels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 8),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok((image, view))
    }

    /// Reads mip 0 of an `Rgba16Float` image back as 8-bit RGBA.
    pub fn read_rgba8(&mut self, image: ImageHandle) -> Result<RgbaImage, DeviceError> {
        let Some(Image { texture, desc }) = self.images.get(&image) else {
            return Err(DeviceError::UnknownHandle {
                object: "image",
                raw: image.raw(),
            });
        };
        let readback_error = |reason: String| DeviceError::Creation {
            object: "readback",
            label: desc.label.clone(),
            reason,
        };
        if desc.format != TexelFormat::Rgba16Float {
            return Err(readback_error(format!("unsupported format {:?}", desc.format)));
        }

        let [width, height] = desc.extent;
        let unpadded = width * 8;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let size = u64::from(padded) * u64::from(height);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("effect-forge.readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("effect-forge.readback.encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let mut mapped = None;
        for _ in 0..5000 {
            let _ = self.device.poll(wgpu::PollType::Poll);
            if let Ok(result) = rx.try_recv() {
                mapped = Some(result);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        match mapped {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(readback_error(e.to_string())),
            None => return Err(readback_error("timed out mapping buffer".to_string())),
        }

        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks_exact(padded as usize) {
                for texel in row[..unpadded as usize].chunks_exact(2) {
                    let value = half::f16::from_le_bytes([texel[0], texel[1]]).to_f32();
                    pixels.push((value.clamp(0.0, 1.0) * 255.0).round() as u8);
                }
            }
        }
        buffer.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| readback_error("pixel count mismatch".to_string()))
    }

    fn resolve(&self, resource: BoundResource) -> Option<wgpu::BindingResource<'_>> {
        match resource {
            BoundResource::ImageView(view) => {
                self.views.get(&view).map(wgpu::BindingResource::TextureView)
            }
            BoundResource::Sampler(sampler) => self
                .sampler
                .as_ref()
                .filter(|(handle, _)| *handle == sampler)
                .map(|(_, sampler)| wgpu::BindingResource::Sampler(sampler)),
        }
    }

    fn placeholder(&self, kind: ResourceKind) -> Option<wgpu::BindingResource<'_>> {
        if kind == ResourceKind::Sampler {
            return self
                .sampler
                .as_ref()
                .map(|(_, sampler)| wgpu::BindingResource::Sampler(sampler));
        }
        match self.placeholders.get(&kind)? {
            Placeholder::View(view) => Some(wgpu::BindingResource::TextureView(view)),
            Placeholder::Buffer(buffer) => Some(buffer.as_entire_binding()),
        }
    }

    fn ensure_placeholder(&mut self, kind: ResourceKind) -> Result<(), DeviceError> {
        if kind == ResourceKind::Sampler {
            return self.default_sampler().map(|_| ());
        }
        if self.placeholders.contains_key(&kind) {
            return Ok(());
        }
        let label = format!("effect-forge.placeholder.{kind:?}");
        let texture = |format: TexelFormat, usage: wgpu::TextureUsages| {
            self.scoped("placeholder image", &label, |device| {
                device
                    .create_texture(&wgpu::TextureDescriptor {
                        label: Some(&label),
                        size: wgpu::Extent3d {
                            width: 1,
                            height: 1,
                            depth_or_array_layers: 1,
                        },
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgpu::TextureDimension::D2,
                        format: texture_format(format),
                        usage,
                        view_formats: &[],
                    })
                    .create_view(&wgpu::TextureViewDescriptor::default())
            })
        };
        let buffer = |usage: wgpu::BufferUsages| {
            self.scoped("placeholder buffer", &label, |device| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&label),
                    size: PLACEHOLDER_BUFFER_SIZE,
                    usage,
                    mapped_at_creation: false,
                })
            })
        };
        let placeholder = match kind {
            ResourceKind::StorageImage { format, .. } => Placeholder::View(texture(
                format,
                wgpu::TextureUsages::STORAGE_BINDING,
            )?),
            ResourceKind::SampledImage => Placeholder::View(texture(
                TexelFormat::Rgba16Float,
                wgpu::TextureUsages::TEXTURE_BINDING,
            )?),
            ResourceKind::UniformBuffer => {
                Placeholder::Buffer(buffer(wgpu::BufferUsages::UNIFORM)?)
            }
            ResourceKind::StorageBuffer { .. } => {
                Placeholder::Buffer(buffer(wgpu::BufferUsages::STORAGE)?)
            }
            ResourceKind::Sampler => return Ok(()),
        };
        log::debug!("[device] created placeholder for {kind:?}");
        self.placeholders.insert(kind, placeholder);
        Ok(())
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Runs `create` inside a validation error scope.
    fn scoped<T>(
        &self,
        object: &'static str,
        label: &str,
        create: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<T, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(DeviceError::Creation {
                object,
                label: label.to_string(),
                reason: error.to_string(),
            }),
            None => Ok(value),
        }
    }
}

/// Entries of `declared` whose binding is not in `bound`.
fn missing_bindings(declared: &[BindingLayoutEntry], bound: &[u32]) -> Vec<BindingLayoutEntry> {
    declared
        .iter()
        .filter(|entry| !bound.contains(&entry.binding))
        .copied()
        .collect()
}

fn texture_format(format: TexelFormat) -> wgpu::TextureFormat {
    match format {
        TexelFormat::R32Float => wgpu::TextureFormat::R32Float,
        TexelFormat::R32Uint => wgpu::TextureFormat::R32Uint,
        TexelFormat::R32Sint => wgpu::TextureFormat::R32Sint,
        TexelFormat::R16Float => wgpu::TextureFormat::R16Float,
        TexelFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        TexelFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        TexelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TexelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TexelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TexelFormat::Rgba32Uint => wgpu::TextureFormat::Rgba32Uint,
    }
}

fn binding_type(kind: ResourceKind) -> wgpu::BindingType {
    match kind {
        ResourceKind::StorageImage { format, access } => wgpu::BindingType::StorageTexture {
            access: match access {
                StorageAccess::ReadOnly => wgpu::StorageTextureAccess::ReadOnly,
                StorageAccess::WriteOnly => wgpu::StorageTextureAccess::WriteOnly,
                StorageAccess::ReadWrite => wgpu::StorageTextureAccess::ReadWrite,
            },
            format: texture_format(format),
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        ResourceKind::SampledImage => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        ResourceKind::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        ResourceKind::UniformBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        ResourceKind::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
    }
}

impl ComputeDevice for WgpuDevice {
    fn create_binding_set_layout(
        &mut self,
        label: &str,
        entries: &[BindingLayoutEntry],
    ) -> Result<BindingSetLayoutHandle, DeviceError> {
        let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|entry| wgpu::BindGroupLayoutEntry {
                binding: entry.binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: binding_type(entry.kind),
                count: None,
            })
            .collect();
        let layout = self.scoped("binding set layout", label, |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &layout_entries,
            })
        })?;
        let handle = BindingSetLayoutHandle::from_raw(self.next());
        self.set_layouts.insert(
            handle,
            SetLayout {
                layout,
                entries: entries.to_vec(),
            },
        );
        Ok(handle)
    }

    fn create_pipeline_layout(
        &mut self,
        label: &str,
        set_layout: BindingSetLayoutHandle,
        parameters: ParameterRange,
    ) -> Result<PipelineLayoutHandle, DeviceError> {
        let Some(set) = self.set_layouts.get(&set_layout) else {
            return Err(DeviceError::UnknownHandle {
                object: "binding set layout",
                raw: set_layout.raw(),
            });
        };
        let ranges: Vec<wgpu::PushConstantRange> = if parameters.size > 0 {
            vec![wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::COMPUTE,
                range: 0..parameters.size,
            }]
        } else {
            Vec::new()
        };
        let layout = self.scoped("pipeline layout", label, |device| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[&set.layout],
                push_constant_ranges: &ranges,
            })
        })?;
        let handle = PipelineLayoutHandle::from_raw(self.next());
        self.pipeline_layouts.insert(
            handle,
            PipelineLayout {
                layout,
                set_layout,
                parameter_size: parameters.size,
            },
        );
        Ok(handle)
    }

    fn create_compute_pipeline(
        &mut self,
        label: &str,
        kernel: &KernelBinary,
        entry_point: &str,
        layout: PipelineLayoutHandle,
    ) -> Result<PipelineHandle, DeviceError> {
        let Some(pipeline_layout) = self.pipeline_layouts.get(&layout) else {
            return Err(DeviceError::UnknownHandle {
                object: "pipeline layout",
                raw: layout.raw(),
            });
        };
        let pipeline = self.scoped("compute pipeline", label, |device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::SpirV(Cow::Borrowed(kernel.words())),
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout.layout),
                module: &module,
                entry_point: Some(entry_point),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        })?;
        let handle = PipelineHandle::from_raw(self.next());
        self.pipelines.insert(handle, pipeline);
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
        let texture = self.scoped("image", &desc.label, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&desc.label),
                size: wgpu::Extent3d {
                    width: desc.extent[0],
                    height: desc.extent[1],
                    depth_or_array_layers: 1,
                },
                mip_level_count: desc.mip_levels,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texture_format(desc.format),
                usage: IMAGE_USAGE,
                view_formats: &[],
            })
        })?;
        let handle = ImageHandle::from_raw(self.next());
        self.images.insert(
            handle,
            Image {
                texture,
                desc: desc.clone(),
            },
        );
        Ok(handle)
    }

    fn create_image_view(
        &mut self,
        image: ImageHandle,
        mip_level: u32,
    ) -> Result<ImageViewHandle, DeviceError> {
        let Some(Image { texture, desc }) = self.images.get(&image) else {
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
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&desc.label),
            base_mip_level: mip_level,
            mip_level_count: Some(1),
            ..Default::default()
        });
        let handle = ImageViewHandle::from_raw(self.next());
        self.views.insert(handle, view);
        Ok(handle)
    }

    fn default_sampler(&mut self) -> Result<SamplerHandle, DeviceError> {
        if let Some((handle, _)) = &self.sampler {
            return Ok(*handle);
        }
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("effect-forge.sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let handle = SamplerHandle::from_raw(self.next());
        self.sampler = Some((handle, sampler));
        Ok(handle)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if self.pipelines.remove(&pipeline).is_none() {
            log::warn!("destroying unknown pipeline {pipeline}");
        }
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        if self.pipeline_layouts.remove(&layout).is_none() {
            log::warn!("destroying unknown pipeline layout {layout}");
        }
    }

    fn destroy_binding_set_layout(&mut self, layout: BindingSetLayoutHandle) {
        if self.set_layouts.remove(&layout).is_none() {
            log::warn!("destroying unknown binding set layout {layout}");
        }
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) {
        if self.views.remove(&view).is_none() {
            log::warn!("destroying unknown image view {view}");
        }
    }

    // Textures are dropped rather than destroyed: pending work may still reference them.
    fn destroy_image(&mut self, image: ImageHandle) {
        if self.images.remove(&image).is_none() {
            log::warn!("destroying unknown image {image}");
        }
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        match self.pipelines.get(&pipeline) {
            Some(pipeline) => {
                self.pending.push(PendingOp::SetPipeline(pipeline.clone()));
                self.pipeline_bound = true;
            }
            None => {
                log::error!("[device] bind of unknown pipeline {pipeline}");
                self.pipeline_bound = false;
            }
        }
    }

    fn push_resource_set(&mut self, layout: PipelineLayoutHandle, writes: &[ResourceWrite]) {
        self.resources_complete = false;
        let Some(declared) = self
            .pipeline_layouts
            .get(&layout)
            .and_then(|l| self.set_layouts.get(&l.set_layout))
            .map(|set| set.entries.clone())
        else {
            log::error!("[device] resource set for unknown pipeline layout {layout}");
            return;
        };

        let mut bound = Vec::with_capacity(writes.len());
        for write in writes {
            if self.resolve(write.resource).is_some() {
                bound.push(write.binding);
            } else {
                log::error!(
                    "[device] binding {} refers to a destroyed resource",
                    write.binding
                );
            }
        }
        let missing = missing_bindings(&declared, &bound);
        for entry in &missing {
            if let Err(err) = self.ensure_placeholder(entry.kind) {
                log::error!("[device] no placeholder for binding {}: {err}", entry.binding);
                return;
            }
        }

        let mut entries = Vec::with_capacity(declared.len());
        for write in writes {
            if let Some(resource) = self.resolve(write.resource) {
                entries.push(wgpu::BindGroupEntry {
                    binding: write.binding,
                    resource,
                });
            }
        }
        for entry in &missing {
            if let Some(resource) = self.placeholder(entry.kind) {
                entries.push(wgpu::BindGroupEntry {
                    binding: entry.binding,
                    resource,
                });
            }
        }

        let Some(set) = self
            .pipeline_layouts
            .get(&layout)
            .and_then(|l| self.set_layouts.get(&l.set_layout))
        else {
            return;
        };
        match self.scoped("resource set", "effect-forge.resources", |device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("effect-forge.resources"),
                layout: &set.layout,
                entries: &entries,
            })
        }) {
            Ok(group) => {
                self.pending.push(PendingOp::SetBindGroup(group));
                self.resources_complete = true;
            }
            Err(err) => log::error!("[device] {err}"),
        }
    }

    fn upload_parameter_block(&mut self, layout: PipelineLayoutHandle, bytes: &[u8]) {
        let Some(pipeline_layout) = self.pipeline_layouts.get(&layout) else {
            log::error!("[device] parameters for unknown pipeline layout {layout}");
            return;
        };
        let len = bytes.len().min(pipeline_layout.parameter_size as usize) & !3;
        if len > 0 {
            self.pending
                .push(PendingOp::SetParameters(bytes[..len].to_vec()));
        }
    }

    fn dispatch(&mut self, group_counts: [u32; 3]) {
        if self.pipeline_bound && self.resources_complete {
            self.pending.push(PendingOp::Dispatch(group_counts));
        }
    }

    fn execution_barrier(&mut self, _scope: BarrierScope) {
        if !matches!(self.pending.last(), None | Some(PendingOp::Barrier)) {
            self.pending.push(PendingOp::Barrier);
        }
    }
}
