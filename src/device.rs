//! The narrow slice of a graphics device that the effect pipeline consumes.
//!
//! Objects are referred to through opaque handles issued by the device. Creation can fail and
//! reports a [`DeviceError`]; recording calls cannot, because nothing in the per-frame path is
//! allowed to abort a frame. Backends log recording problems instead.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::{
    kernel::KernelBinary,
    reflect::{ResourceKind, TexelFormat},
};

pub mod recording;
pub mod wgpu_backend;

pub use recording::{RecordedCommand, RecordingDevice};
pub use wgpu_backend::WgpuDevice;

macro_rules! device_handles {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
            pub struct $name(u64);

            impl $name {
                pub const fn from_raw(raw: u64) -> Self {
                    Self(raw)
                }

                pub const fn raw(self) -> u64 {
                    self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "#{}", self.0)
                }
            }
        )*
    };
}

device_handles!(
    BindingSetLayoutHandle,
    PipelineLayoutHandle,
    PipelineHandle,
    ImageHandle,
    ImageViewHandle,
    SamplerHandle,
);

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to create {object} `{label}`: {reason}")]
    Creation {
        object: &'static str,
        label: String,
        reason: String,
    },
    #[error("unknown {object} handle {raw}")]
    UnknownHandle { object: &'static str, raw: u64 },
}

/// One entry of a binding-set layout. Every entry is visible to the compute stage only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BindingLayoutEntry {
    pub binding: u32,
    pub kind: ResourceKind,
}

/// Push-constant range of a pipeline layout, always starting at offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParameterRange {
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageDesc {
    pub label: String,
    pub extent: [u32; 2],
    pub mip_levels: u32,
    pub format: TexelFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BoundResource {
    ImageView(ImageViewHandle),
    Sampler(SamplerHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceWrite {
    pub binding: u32,
    pub resource: BoundResource,
}

/// Where an execution barrier sits in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BarrierScope {
    /// Between two subpasses of the same effect.
    BetweenSubpasses,
    /// After the last subpass of an effect, for whoever reads the target next.
    AfterEffect,
}

pub trait ComputeDevice {
    fn create_binding_set_layout(
        &mut self,
        label: &str,
        entries: &[BindingLayoutEntry],
    ) -> Result<BindingSetLayoutHandle, DeviceError>;

    fn create_pipeline_layout(
        &mut self,
        label: &str,
        set_layout: BindingSetLayoutHandle,
        parameters: ParameterRange,
    ) -> Result<PipelineLayoutHandle, DeviceError>;

    fn create_compute_pipeline(
        &mut self,
        label: &str,
        kernel: &KernelBinary,
        entry_point: &str,
        layout: PipelineLayoutHandle,
    ) -> Result<PipelineHandle, DeviceError>;

    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageHandle, DeviceError>;

    /// A single-mip view of `image`.
    fn create_image_view(
        &mut self,
        image: ImageHandle,
        mip_level: u32,
    ) -> Result<ImageViewHandle, DeviceError>;

    /// Shared linear/clamp sampler. Repeated calls return the same handle.
    fn default_sampler(&mut self) -> Result<SamplerHandle, DeviceError>;

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);
    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle);
    fn destroy_binding_set_layout(&mut self, layout: BindingSetLayoutHandle);
    fn destroy_image_view(&mut self, view: ImageViewHandle);
    fn destroy_image(&mut self, image: ImageHandle);

    fn bind_pipeline(&mut self, pipeline: PipelineHandle);
    /// Binds resources for set 0 of `layout` without allocating a persistent set.
    fn push_resource_set(&mut self, layout: PipelineLayoutHandle, writes: &[ResourceWrite]);
    fn upload_parameter_block(&mut self, layout: PipelineLayoutHandle, bytes: &[u8]);
    fn dispatch(&mut self, group_counts: [u32; 3]);
    /// Makes every write recorded so far visible to every command recorded after it.
    fn execution_barrier(&mut self, scope: BarrierScope);
}
