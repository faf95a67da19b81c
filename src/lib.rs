//! Reflection-driven GPU compute-effect pipeline.
//!
//! Effects are chains of compiled SPIR-V compute kernels ("subpasses") found on disk by
//! naming convention. Each kernel is introspected to derive its resource-binding layout and
//! push-constant parameter layout, optionally patched by a JSON config, and executed against a
//! shared target image with execution barriers between stages.

pub mod device;
pub mod effect;
pub mod kernel;
pub mod manager;
pub mod reflect;

#[cfg(test)]
#[path = "../tests/common/kernels.rs"]
mod shared_kernels;
#[cfg(test)]
pub(crate) mod test_kernels;

pub use device::{
    BarrierScope, ComputeDevice, DeviceError, ImageViewHandle, RecordedCommand, RecordingDevice,
    WgpuDevice,
};
pub use effect::{
    Effect, EffectLoadError, EffectSnapshot, FrameContext, WriteOutcome,
    config::{EffectConfig, EffectConfigError},
    params::ParameterValue,
};
pub use kernel::{KernelBinary, KernelLoadError};
pub use manager::EffectManager;
pub use reflect::{KernelSchema, ReflectError};
