//! Introspection of compiled compute kernels.
//!
//! [`reflect`] turns a SPIR-V binary into a [`KernelSchema`]: the resources the kernel binds,
//! the layout of its push-constant parameter block and its workgroup size. It never touches a
//! device, so schemas can be inspected and tested on their own.

use std::{collections::BTreeSet, fmt};

use naga::{AddressSpace, Handle, ImageClass, ScalarKind, ShaderStage, Type, TypeInner};
use serde::Serialize;
use thiserror::Error;

use crate::{effect::params::PARAMETER_BLOCK_CAPACITY, kernel::KernelBinary};

/// Binding name that receives the effect chain's target image.
pub const TARGET_BINDING_NAME: &str = "target_image";
/// Bindings named `scratch_mip<N>` receive mip `N` of the effect's shared scratch image.
pub const SCRATCH_BINDING_PREFIX: &str = "scratch_mip";

#[derive(Debug, Error)]
pub enum ReflectError {
    #[error("failed to parse SPIR-V: {0}")]
    Parse(String),
    #[error("kernel declares no compute entry point")]
    NoComputeEntryPoint,
    #[error("kernel declares bindings in {0} binding sets (groups {1:?}); exactly one is supported")]
    MultipleBindingSets(usize, Vec<u32>),
    #[error("binding indices must be contiguous from 0, found {0:?}")]
    SparseBindings(Vec<u32>),
    #[error("kernel declares more than one push-constant parameter block")]
    MultipleParameterBlocks,
    #[error("parameter block is {size} bytes, larger than the {capacity} byte capacity")]
    ParameterBlockTooLarge { size: u32, capacity: usize },
    #[error("binding {binding} (`{name}`) has an unsupported resource type")]
    UnsupportedBinding { binding: u32, name: String },
    #[error("storage image binding {binding} (`{name}`) uses unsupported format {format}")]
    UnsupportedStorageFormat {
        binding: u32,
        name: String,
        format: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScalarType {
    Int,
    UInt,
    Float,
    Bool,
}

/// Scalar type and component count of a parameter field. All components are 4 bytes wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TypeTag {
    pub scalar: ScalarType,
    pub arity: u8,
}

impl TypeTag {
    pub const fn new(scalar: ScalarType, arity: u8) -> Self {
        Self { scalar, arity }
    }

    pub const fn byte_size(self) -> u32 {
        4 * self.arity as u32
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scalar = match self.scalar {
            ScalarType::Int => "int",
            ScalarType::UInt => "uint",
            ScalarType::Float => "float",
            ScalarType::Bool => "bool",
        };
        if self.arity == 1 {
            f.write_str(scalar)
        } else {
            write!(f, "{scalar}{}", self.arity)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StorageAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TexelFormat {
    R32Float,
    R32Uint,
    R32Sint,
    R16Float,
    Rg16Float,
    Rg32Float,
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    Rgba32Uint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    StorageImage {
        format: TexelFormat,
        access: StorageAccess,
    },
    SampledImage,
    Sampler,
    UniformBuffer,
    StorageBuffer {
        read_only: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingSlot {
    pub binding: u32,
    pub name: String,
    pub kind: ResourceKind,
}

impl BindingSlot {
    pub fn is_target(&self) -> bool {
        self.name == TARGET_BINDING_NAME
    }

    pub fn scratch_mip(&self) -> Option<u32> {
        scratch_mip_index(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldLayout {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    pub tag: TypeTag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterBlockLayout {
    pub size: u32,
    pub fields: Vec<FieldLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelSchema {
    pub entry_point: String,
    /// Sorted by binding index; indices are contiguous from 0.
    pub bindings: Vec<BindingSlot>,
    pub parameter_block: Option<ParameterBlockLayout>,
    pub workgroup_size: [u32; 3],
}

impl KernelSchema {
    pub fn parameter_block_size(&self) -> u32 {
        self.parameter_block.as_ref().map_or(0, |block| block.size)
    }

    pub fn fields(&self) -> &[FieldLayout] {
        self.parameter_block
            .as_ref()
            .map_or(&[], |block| block.fields.as_slice())
    }

    pub fn requires_scratch(&self) -> bool {
        self.bindings.iter().any(|b| b.scratch_mip().is_some())
    }

    /// Number of scratch mips this kernel touches (highest referenced mip + 1).
    pub fn scratch_mip_levels(&self) -> u32 {
        self.bindings
            .iter()
            .filter_map(BindingSlot::scratch_mip)
            .map(|mip| mip + 1)
            .max()
            .unwrap_or(0)
    }
}

/// Mip index encoded in a `scratch_mip<N>` binding name.
pub fn scratch_mip_index(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(SCRATCH_BINDING_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn reflect(kernel: &KernelBinary) -> Result<KernelSchema, ReflectError> {
    let module =
        naga::front::spv::parse_u8_slice(kernel.as_bytes(), &naga::front::spv::Options::default())
            .map_err(|e| ReflectError::Parse(e.to_string()))?;
    reflect_module(&module)
}

/// Builds the schema of an already parsed module.
pub fn reflect_module(module: &naga::Module) -> Result<KernelSchema, ReflectError> {
    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == ShaderStage::Compute)
        .ok_or(ReflectError::NoComputeEntryPoint)?;

    let mut bindings = Vec::new();
    let mut groups = BTreeSet::new();
    let mut parameter_block = None;

    for (_, var) in module.global_variables.iter() {
        if var.space == AddressSpace::PushConstant {
            if parameter_block.is_some() {
                return Err(ReflectError::MultipleParameterBlocks);
            }
            parameter_block = Some(parameter_block_layout(module, var.ty, var.name.as_deref())?);
            continue;
        }

        let Some(binding) = var.binding.as_ref() else {
            continue;
        };
        let name = var
            .name
            .clone()
            .unwrap_or_else(|| format!("binding{}", binding.binding));
        let kind = resource_kind(module, var, binding.binding, &name)?;
        groups.insert(binding.group);
        bindings.push(BindingSlot {
            binding: binding.binding,
            name,
            kind,
        });
    }

    if groups.len() > 1 {
        return Err(ReflectError::MultipleBindingSets(
            groups.len(),
            groups.into_iter().collect(),
        ));
    }

    bindings.sort_by_key(|b| b.binding);
    let contiguous = bindings
        .iter()
        .enumerate()
        .all(|(i, b)| b.binding as usize == i);
    if !contiguous {
        return Err(ReflectError::SparseBindings(
            bindings.iter().map(|b| b.binding).collect(),
        ));
    }

    Ok(KernelSchema {
        entry_point: entry.name.clone(),
        bindings,
        parameter_block,
        workgroup_size: entry.workgroup_size,
    })
}

fn resource_kind(
    module: &naga::Module,
    var: &naga::GlobalVariable,
    binding: u32,
    name: &str,
) -> Result<ResourceKind, ReflectError> {
    let unsupported = || ReflectError::UnsupportedBinding {
        binding,
        name: name.to_string(),
    };
    match var.space {
        AddressSpace::Uniform => Ok(ResourceKind::UniformBuffer),
        AddressSpace::Storage { access } => Ok(ResourceKind::StorageBuffer {
            read_only: !access.contains(naga::StorageAccess::STORE),
        }),
        AddressSpace::Handle => match module.types[var.ty].inner {
            TypeInner::Image {
                class: ImageClass::Storage { format, access },
                ..
            } => {
                let texel_format =
                    texel_format(format).ok_or_else(|| ReflectError::UnsupportedStorageFormat {
                        binding,
                        name: name.to_string(),
                        format: format!("{format:?}"),
                    })?;
                let load = access.contains(naga::StorageAccess::LOAD);
                let store = access.contains(naga::StorageAccess::STORE);
                let access = match (load, store) {
                    (true, true) => StorageAccess::ReadWrite,
                    (true, false) => StorageAccess::ReadOnly,
                    _ => StorageAccess::WriteOnly,
                };
                Ok(ResourceKind::StorageImage {
                    format: texel_format,
                    access,
                })
            }
            TypeInner::Image { .. } => Ok(ResourceKind::SampledImage),
            TypeInner::Sampler { .. } => Ok(ResourceKind::Sampler),
            _ => Err(unsupported()),
        },
        _ => Err(unsupported()),
    }
}

fn texel_format(format: naga::StorageFormat) -> Option<TexelFormat> {
    use naga::StorageFormat as F;
    Some(match format {
        F::R32Float => TexelFormat::R32Float,
        F::R32Uint => TexelFormat::R32Uint,
        F::R32Sint => TexelFormat::R32Sint,
        F::R16Float => TexelFormat::R16Float,
        F::Rg16Float => TexelFormat::Rg16Float,
        F::Rg32Float => TexelFormat::Rg32Float,
        F::Rgba8Unorm => TexelFormat::Rgba8Unorm,
        F::Rgba16Float => TexelFormat::Rgba16Float,
        F::Rgba32Float => TexelFormat::Rgba32Float,
        F::Rgba32Uint => TexelFormat::Rgba32Uint,
        _ => return None,
    })
}

fn parameter_block_layout(
    module: &naga::Module,
    ty: Handle<Type>,
    var_name: Option<&str>,
) -> Result<ParameterBlockLayout, ReflectError> {
    let mut fields = Vec::new();
    let size = match module.types[ty].inner {
        TypeInner::Struct { span, .. } => {
            flatten_struct(module, ty, 0, &mut fields);
            span
        }
        ref inner => {
            // A bare scalar or vector block is addressed by the variable's own name.
            if let Some(tag) = leaf_tag(inner) {
                fields.push(FieldLayout {
                    name: var_name.unwrap_or("field0").to_string(),
                    offset: 0,
                    size: tag.byte_size(),
                    tag,
                });
            }
            fields.iter().map(|f| f.size).sum()
        }
    };
    if size as usize > PARAMETER_BLOCK_CAPACITY {
        return Err(ReflectError::ParameterBlockTooLarge {
            size,
            capacity: PARAMETER_BLOCK_CAPACITY,
        });
    }
    Ok(ParameterBlockLayout { size, fields })
}

/// Nested structs are flattened: leaf members keep their own names and their offsets are made
/// absolute. This also looks through the single-member wrapper structs some compilers emit for
/// push-constant blocks.
fn flatten_struct(
    module: &naga::Module,
    ty: Handle<Type>,
    base_offset: u32,
    fields: &mut Vec<FieldLayout>,
) {
    let TypeInner::Struct { ref members, .. } = module.types[ty].inner else {
        return;
    };
    for member in members {
        let offset = base_offset + member.offset;
        let inner = &module.types[member.ty].inner;
        if let TypeInner::Struct { .. } = inner {
            flatten_struct(module, member.ty, offset, fields);
            continue;
        }
        let name = member
            .name
            .clone()
            .unwrap_or_else(|| format!("field{offset}"));
        match leaf_tag(inner) {
            Some(tag) => fields.push(FieldLayout {
                name,
                offset,
                size: tag.byte_size(),
                tag,
            }),
            None => log::warn!(
                "parameter field `{name}` at offset {offset} has a type that cannot be addressed by name; skipping"
            ),
        }
    }
}

fn leaf_tag(inner: &TypeInner) -> Option<TypeTag> {
    match *inner {
        TypeInner::Scalar(scalar) => scalar_type(scalar).map(|s| TypeTag::new(s, 1)),
        TypeInner::Vector { size, scalar } => {
            scalar_type(scalar).map(|s| TypeTag::new(s, size as u8))
        }
        _ => None,
    }
}

fn scalar_type(scalar: naga::Scalar) -> Option<ScalarType> {
    if scalar.width != 4 {
        return None;
    }
    match scalar.kind {
        ScalarKind::Sint => Some(ScalarType::Int),
        ScalarKind::Uint => Some(ScalarType::UInt),
        ScalarKind::Float => Some(ScalarType::Float),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_kernels::{TWO_SETS_KERNEL, compile_wgsl, kernel_from_wgsl};

    const BLUR_KERNEL: &str = r#"
struct Params {
    strength: f32,
    radius: i32,
    image_extent: vec2<u32>,
    tint: vec4<f32>,
}

var<push_constant> params: Params;

@group(0) @binding(0) var target_image: texture_storage_2d<rgba16float, write>;
@group(0) @binding(1) var scratch_mip2: texture_2d<f32>;
@group(0) @binding(2) var linear_sampler: sampler;

@compute @workgroup_size(8, 4, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.image_extent.x || gid.y >= params.image_extent.y) {
        return;
    }
    let uv = vec2<f32>(gid.xy) / vec2<f32>(params.image_extent);
    let blurred = textureSampleLevel(scratch_mip2, linear_sampler, uv, 0.0);
    let color = blurred * params.strength * f32(params.radius) * params.tint;
    textureStore(target_image, vec2<i32>(gid.xy), color);
}
"#;

    #[test]
    fn reflects_bindings_parameters_and_workgroup_size() {
        let schema = reflect(&kernel_from_wgsl(BLUR_KERNEL)).expect("reflect");

        assert_eq!(schema.entry_point, "main");
        assert_eq!(schema.workgroup_size, [8, 4, 1]);

        let names: Vec<_> = schema.bindings.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["target_image", "scratch_mip2", "linear_sampler"]);
        assert_eq!(
            schema.bindings[0].kind,
            ResourceKind::StorageImage {
                format: TexelFormat::Rgba16Float,
                access: StorageAccess::WriteOnly,
            }
        );
        assert_eq!(schema.bindings[1].kind, ResourceKind::SampledImage);
        assert_eq!(schema.bindings[2].kind, ResourceKind::Sampler);
        assert!(schema.bindings[0].is_target());

        let fields: Vec<_> = schema
            .fields()
            .iter()
            .map(|f| (f.name.as_str(), f.offset, f.size, f.tag))
            .collect();
        assert_eq!(
            fields,
            [
                ("strength", 0, 4, TypeTag::new(ScalarType::Float, 1)),
                ("radius", 4, 4, TypeTag::new(ScalarType::Int, 1)),
                ("image_extent", 8, 8, TypeTag::new(ScalarType::UInt, 2)),
                ("tint", 16, 16, TypeTag::new(ScalarType::Float, 4)),
            ]
        );
        assert_eq!(schema.parameter_block_size(), 32);
    }

    #[test]
    fn scratch_usage_is_derived_from_binding_names() {
        let schema = reflect(&kernel_from_wgsl(BLUR_KERNEL)).expect("reflect");
        assert!(schema.requires_scratch());
        assert_eq!(schema.scratch_mip_levels(), 3);

        assert_eq!(scratch_mip_index("scratch_mip0"), Some(0));
        assert_eq!(scratch_mip_index("scratch_mip15"), Some(15));
        assert_eq!(scratch_mip_index("scratch_mip"), None);
        assert_eq!(scratch_mip_index("scratch_mipx"), None);
        assert_eq!(scratch_mip_index("target_image"), None);
    }

    #[test]
    fn kernels_without_parameters_have_no_block() {
        let schema = reflect(&kernel_from_wgsl(
            r#"
@group(0) @binding(0) var target_image: texture_storage_2d<rgba16float, write>;

@compute @workgroup_size(16, 16, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    textureStore(target_image, vec2<i32>(gid.xy), vec4<f32>(0.0));
}
"#,
        ))
        .expect("reflect");
        assert!(schema.parameter_block.is_none());
        assert_eq!(schema.parameter_block_size(), 0);
        assert!(schema.fields().is_empty());
        assert!(!schema.requires_scratch());
        assert_eq!(schema.scratch_mip_levels(), 0);
    }

    #[test]
    fn more_than_one_binding_set_is_rejected() {
        let err = reflect(&kernel_from_wgsl(TWO_SETS_KERNEL)).unwrap_err();
        assert!(matches!(err, ReflectError::MultipleBindingSets(2, ref g) if g == &[0, 1]));
    }

    #[test]
    fn gaps_in_binding_indices_are_rejected() {
        let err = reflect(&kernel_from_wgsl(
            r#"
@group(0) @binding(0) var target_image: texture_storage_2d<rgba16float, write>;
@group(0) @binding(2) var source_image: texture_2d<f32>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let c = textureLoad(source_image, vec2<i32>(gid.xy), 0);
    textureStore(target_image, vec2<i32>(gid.xy), c);
}
"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ReflectError::SparseBindings(ref b) if b == &[0, 2]));
    }

    #[test]
    fn non_compute_modules_are_rejected() {
        let words = compile_wgsl(
            r#"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#,
        );
        let kernel = KernelBinary::from_words(words).expect("spirv");
        assert!(matches!(
            reflect(&kernel),
            Err(ReflectError::NoComputeEntryPoint)
        ));
    }

    #[test]
    fn truncated_instruction_fails_to_parse() {
        // SPIR-V 1.0 header, then an OpCapability whose word count runs past the end.
        let words = vec![crate::kernel::SPIRV_MAGIC, 0x0001_0000, 0, 1, 0, (2 << 16) | 17];
        let kernel = KernelBinary::from_words(words).expect("header");
        assert!(matches!(reflect(&kernel), Err(ReflectError::Parse(_))));
    }

    #[test]
    fn type_tags_display_compactly() {
        assert_eq!(TypeTag::new(ScalarType::Float, 1).to_string(), "float");
        assert_eq!(TypeTag::new(ScalarType::UInt, 2).to_string(), "uint2");
        assert_eq!(TypeTag::new(ScalarType::Int, 4).byte_size(), 16);
    }
}
