use serde::{Deserialize, Serialize};

use super::params::{PARAMETER_BLOCK_CAPACITY, ParameterBlock};
use crate::{
    device::{
        BindingLayoutEntry, BindingSetLayoutHandle, ComputeDevice, DeviceError, ParameterRange,
        PipelineHandle, PipelineLayoutHandle,
    },
    kernel::KernelBinary,
    reflect::{BindingSlot, FieldLayout, KernelSchema},
};

/// How many invocations a subpass covers each frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchPolicy {
    /// Cover the target extent scaled by `screen_size_multiplier`, or `custom_size` otherwise.
    pub use_screen_size: bool,
    pub screen_size_multiplier: [f32; 2],
    pub custom_size: [u32; 3],
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            use_screen_size: true,
            screen_size_multiplier: [1.0, 1.0],
            custom_size: [1, 1, 1],
        }
    }
}

impl DispatchPolicy {
    pub fn dispatch_extent(&self, extent: [u32; 2]) -> [u32; 3] {
        if !self.use_screen_size {
            return self.custom_size;
        }
        let scale = |size: u32, multiplier: f32| (size as f32 * multiplier.max(0.0)).ceil() as u32;
        [
            scale(extent[0], self.screen_size_multiplier[0]),
            scale(extent[1], self.screen_size_multiplier[1]),
            1,
        ]
    }

    pub fn group_counts(&self, extent: [u32; 2], workgroup_size: [u32; 3]) -> [u32; 3] {
        let dispatch = self.dispatch_extent(extent);
        std::array::from_fn(|axis| dispatch[axis].div_ceil(workgroup_size[axis].max(1)))
    }
}

/// One kernel of an effect chain with the GPU objects synthesized for it.
#[derive(Debug)]
pub struct Subpass {
    label: String,
    pipeline: PipelineHandle,
    pipeline_layout: PipelineLayoutHandle,
    set_layout: BindingSetLayoutHandle,
    bindings: Vec<BindingSlot>,
    fields: Vec<FieldLayout>,
    workgroup_size: [u32; 3],
    declared_block_size: u32,
    pub parameters: ParameterBlock,
    pub dispatch: DispatchPolicy,
}

impl Subpass {
    /// Creates the binding-set layout, pipeline layout and pipeline for `kernel`.
    ///
    /// Objects created before a failing step are destroyed again before the error is returned.
    pub fn build(
        device: &mut dyn ComputeDevice,
        label: &str,
        kernel: &KernelBinary,
        schema: &KernelSchema,
    ) -> Result<Self, DeviceError> {
        let entries: Vec<BindingLayoutEntry> = schema
            .bindings
            .iter()
            .map(|slot| BindingLayoutEntry {
                binding: slot.binding,
                kind: slot.kind,
            })
            .collect();
        let set_layout = device.create_binding_set_layout(label, &entries)?;

        let declared_block_size = schema.parameter_block_size();
        let range = if schema.parameter_block.is_some() {
            declared_block_size
        } else {
            PARAMETER_BLOCK_CAPACITY as u32
        };
        let pipeline_layout =
            match device.create_pipeline_layout(label, set_layout, ParameterRange { size: range }) {
                Ok(layout) => layout,
                Err(err) => {
                    device.destroy_binding_set_layout(set_layout);
                    return Err(err);
                }
            };

        let pipeline = match device.create_compute_pipeline(
            label,
            kernel,
            &schema.entry_point,
            pipeline_layout,
        ) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                device.destroy_pipeline_layout(pipeline_layout);
                device.destroy_binding_set_layout(set_layout);
                return Err(err);
            }
        };

        log::debug!(
            "[subpass] built `{label}`: {} bindings, {} parameter bytes, workgroup {:?}",
            schema.bindings.len(),
            range,
            schema.workgroup_size
        );

        Ok(Self {
            label: label.to_string(),
            pipeline,
            pipeline_layout,
            set_layout,
            bindings: schema.bindings.clone(),
            fields: schema.fields().to_vec(),
            workgroup_size: schema.workgroup_size,
            declared_block_size,
            parameters: ParameterBlock::new(range as usize),
            dispatch: DispatchPolicy::default(),
        })
    }

    pub fn destroy(self, device: &mut dyn ComputeDevice) {
        device.destroy_pipeline(self.pipeline);
        device.destroy_pipeline_layout(self.pipeline_layout);
        device.destroy_binding_set_layout(self.set_layout);
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pipeline(&self) -> PipelineHandle {
        self.pipeline
    }

    pub fn pipeline_layout(&self) -> PipelineLayoutHandle {
        self.pipeline_layout
    }

    pub fn set_layout(&self) -> BindingSetLayoutHandle {
        self.set_layout
    }

    pub fn bindings(&self) -> &[BindingSlot] {
        &self.bindings
    }

    /// Parameter fields as the kernel itself declares them.
    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    /// Size of the parameter block the kernel itself declares; 0 if it declares none.
    pub fn declared_block_size(&self) -> u32 {
        self.declared_block_size
    }

    pub fn group_counts(&self, extent: [u32; 2]) -> [u32; 3] {
        self.dispatch.group_counts(extent, self.workgroup_size)
    }
}
