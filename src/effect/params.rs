//! Parameter blocks and the name index that addresses them.
//!
//! A [`ParameterBlock`] is the fixed-capacity byte buffer uploaded as push constants before a
//! subpass dispatches. Fields are reached by name through the [`ParameterIndex`], where one name
//! may live at different offsets in several subpasses and every write fans out to all of them.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::reflect::{FieldLayout, ScalarType, TypeTag};

pub const PARAMETER_BLOCK_CAPACITY: usize = 128;
pub const PARAMETER_SLOT_SIZE: usize = 16;
pub const PARAMETER_SLOT_COUNT: usize = PARAMETER_BLOCK_CAPACITY / PARAMETER_SLOT_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ParameterValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
    IVec2([i32; 2]),
    IVec3([i32; 3]),
    IVec4([i32; 4]),
    UInt(u32),
    UVec2([u32; 2]),
    UVec3([u32; 3]),
    UVec4([u32; 4]),
    /// Stored as a 32-bit 0 or 1.
    Bool(bool),
}

impl ParameterValue {
    pub fn tag(&self) -> TypeTag {
        use ScalarType::*;
        let (scalar, arity) = match self {
            Self::Float(_) => (Float, 1),
            Self::Vec2(_) => (Float, 2),
            Self::Vec3(_) => (Float, 3),
            Self::Vec4(_) => (Float, 4),
            Self::Int(_) => (Int, 1),
            Self::IVec2(_) => (Int, 2),
            Self::IVec3(_) => (Int, 3),
            Self::IVec4(_) => (Int, 4),
            Self::UInt(_) => (UInt, 1),
            Self::UVec2(_) => (UInt, 2),
            Self::UVec3(_) => (UInt, 3),
            Self::UVec4(_) => (UInt, 4),
            Self::Bool(_) => (Bool, 1),
        };
        TypeTag::new(scalar, arity)
    }

    pub fn byte_size(&self) -> usize {
        self.tag().byte_size() as usize
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Float(v) => v.to_le_bytes().to_vec(),
            Self::Vec2(v) => bytemuck::cast_slice(v).to_vec(),
            Self::Vec3(v) => bytemuck::cast_slice(v).to_vec(),
            Self::Vec4(v) => bytemuck::cast_slice(v).to_vec(),
            Self::Int(v) => v.to_le_bytes().to_vec(),
            Self::IVec2(v) => bytemuck::cast_slice(v).to_vec(),
            Self::IVec3(v) => bytemuck::cast_slice(v).to_vec(),
            Self::IVec4(v) => bytemuck::cast_slice(v).to_vec(),
            Self::UInt(v) => v.to_le_bytes().to_vec(),
            Self::UVec2(v) => bytemuck::cast_slice(v).to_vec(),
            Self::UVec3(v) => bytemuck::cast_slice(v).to_vec(),
            Self::UVec4(v) => bytemuck::cast_slice(v).to_vec(),
            Self::Bool(v) => u32::from(*v).to_le_bytes().to_vec(),
        }
    }

    /// Decodes `bytes` as a value of type `tag`. `bytes` must be exactly `tag.byte_size()` long.
    pub fn from_bytes(tag: TypeTag, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != tag.byte_size() as usize {
            return None;
        }
        let words: Vec<[u8; 4]> = bytes
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();
        let f = |i: usize| f32::from_le_bytes(words[i]);
        let i = |n: usize| i32::from_le_bytes(words[n]);
        let u = |n: usize| u32::from_le_bytes(words[n]);
        Some(match (tag.scalar, tag.arity) {
            (ScalarType::Float, 1) => Self::Float(f(0)),
            (ScalarType::Float, 2) => Self::Vec2([f(0), f(1)]),
            (ScalarType::Float, 3) => Self::Vec3([f(0), f(1), f(2)]),
            (ScalarType::Float, 4) => Self::Vec4([f(0), f(1), f(2), f(3)]),
            (ScalarType::Int, 1) => Self::Int(i(0)),
            (ScalarType::Int, 2) => Self::IVec2([i(0), i(1)]),
            (ScalarType::Int, 3) => Self::IVec3([i(0), i(1), i(2)]),
            (ScalarType::Int, 4) => Self::IVec4([i(0), i(1), i(2), i(3)]),
            (ScalarType::UInt, 1) => Self::UInt(u(0)),
            (ScalarType::UInt, 2) => Self::UVec2([u(0), u(1)]),
            (ScalarType::UInt, 3) => Self::UVec3([u(0), u(1), u(2)]),
            (ScalarType::UInt, 4) => Self::UVec4([u(0), u(1), u(2), u(3)]),
            (ScalarType::Bool, 1) => Self::Bool(u(0) != 0),
            _ => return None,
        })
    }

    /// The value a reserved extent field of type `tag` should hold for `extent`.
    pub fn extent(tag: TypeTag, extent: [u32; 2]) -> Option<Self> {
        let [w, h] = extent;
        match (tag.scalar, tag.arity) {
            (ScalarType::Float, 2) => Some(Self::Vec2([w as f32, h as f32])),
            (ScalarType::UInt, 2) => Some(Self::UVec2([w, h])),
            (ScalarType::Int, 2) => Some(Self::IVec2([
                i32::try_from(w).ok()?,
                i32::try_from(h).ok()?,
            ])),
            _ => None,
        }
    }
}

/// Fixed-capacity push-constant storage of one subpass.
///
/// The whole capacity is addressable (the positional slot view spans all of it), but only the
/// first `size` bytes, the kernel's declared block size, are uploaded.
#[derive(Clone, PartialEq, Eq)]
pub struct ParameterBlock {
    bytes: [u8; PARAMETER_BLOCK_CAPACITY],
    size: usize,
}

impl ParameterBlock {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: [0; PARAMETER_BLOCK_CAPACITY],
            size: size.min(PARAMETER_BLOCK_CAPACITY),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The bytes uploaded to the kernel.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.size]
    }

    pub fn raw(&self) -> &[u8; PARAMETER_BLOCK_CAPACITY] {
        &self.bytes
    }

    /// Copies another block's contents, keeping this block's declared size.
    pub fn copy_contents_from(&mut self, other: &ParameterBlock) {
        self.bytes = other.bytes;
    }

    pub fn read(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.bytes.get(offset..offset.checked_add(len)?)
    }

    /// Returns `false` and leaves the block untouched if the write would overflow the capacity.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> bool {
        let Some(end) = offset.checked_add(data.len()) else {
            return false;
        };
        match self.bytes.get_mut(offset..end) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    pub fn slot(&self, index: usize) -> Option<[f32; 4]> {
        let bytes = self.read(index * PARAMETER_SLOT_SIZE, PARAMETER_SLOT_SIZE)?;
        let mut slot = [0.0; 4];
        for (value, chunk) in slot.iter_mut().zip(bytes.chunks_exact(4)) {
            *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Some(slot)
    }

    pub fn set_slot(&mut self, index: usize, value: [f32; 4]) -> bool {
        index < PARAMETER_SLOT_COUNT
            && self.write(index * PARAMETER_SLOT_SIZE, bytemuck::cast_slice(&value))
    }

    pub fn slots(&self) -> Vec<[f32; 4]> {
        (0..PARAMETER_SLOT_COUNT).filter_map(|i| self.slot(i)).collect()
    }
}

impl std::fmt::Debug for ParameterBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterBlock")
            .field("size", &self.size)
            .field("bytes", &self.as_bytes())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FieldLocation {
    pub subpass: usize,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterField {
    pub name: String,
    pub size: u32,
    pub tag: TypeTag,
    pub locations: Vec<FieldLocation>,
}

impl ParameterField {
    pub fn location_in(&self, subpass: usize) -> Option<FieldLocation> {
        self.locations.iter().copied().find(|l| l.subpass == subpass)
    }
}

/// Effect-wide map from parameter name to every place that name is stored.
#[derive(Debug, Clone, Default)]
pub struct ParameterIndex {
    fields: BTreeMap<String, ParameterField>,
}

impl ParameterIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterField> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterField> {
        self.fields.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn name_at(&self, subpass: usize, offset: u32) -> Option<&str> {
        self.fields
            .values()
            .find(|f| f.locations.contains(&FieldLocation { subpass, offset }))
            .map(|f| f.name.as_str())
    }

    /// Records a field discovered by introspecting `subpass`.
    ///
    /// A name already declared by an earlier subpass gains another location, so a single write
    /// drives both. Conflicting declarations (different size or type) are not merged.
    pub fn register_reflected(&mut self, subpass: usize, layout: &FieldLayout) -> bool {
        let location = FieldLocation {
            subpass,
            offset: layout.offset,
        };
        let Some(field) = self.fields.get_mut(&layout.name) else {
            self.fields.insert(
                layout.name.clone(),
                ParameterField {
                    name: layout.name.clone(),
                    size: layout.size,
                    tag: layout.tag,
                    locations: vec![location],
                },
            );
            return true;
        };

        if field.size != layout.size || field.tag != layout.tag {
            log::warn!(
                "subpass {subpass} declares `{}` as {} ({} bytes) but it is {} ({} bytes) elsewhere; \
                 writes will not reach this subpass",
                layout.name,
                layout.tag,
                layout.size,
                field.tag,
                field.size
            );
            return false;
        }
        if field.location_in(subpass).is_some() {
            log::warn!(
                "subpass {subpass} declares `{}` more than once; keeping the first",
                layout.name
            );
            return false;
        }
        field.locations.push(location);
        true
    }

    /// Names the value at `offset` of `subpass`.
    ///
    /// An offset carries at most one name, and a name sits at most at one offset per subpass:
    /// whatever held either of those bindings before is unbound first.
    pub fn bind_name(&mut self, name: &str, subpass: usize, offset: u32, tag: TypeTag) {
        let location = FieldLocation { subpass, offset };

        for field in self.fields.values_mut() {
            if field.name != name {
                field.locations.retain(|l| *l != location);
            }
        }
        self.fields.retain(|_, f| !f.locations.is_empty());

        match self.fields.get_mut(name) {
            Some(field) if field.tag == tag => {
                field.locations.retain(|l| l.subpass != subpass);
                field.locations.push(location);
                field.locations.sort();
            }
            Some(field) => {
                log::warn!(
                    "rebinding `{name}` as {tag} replaces its {} locations in other subpasses",
                    field.tag
                );
                *field = ParameterField {
                    name: name.to_string(),
                    size: tag.byte_size(),
                    tag,
                    locations: vec![location],
                };
            }
            None => {
                self.fields.insert(
                    name.to_string(),
                    ParameterField {
                        name: name.to_string(),
                        size: tag.byte_size(),
                        tag,
                        locations: vec![location],
                    },
                );
            }
        }
    }
}
