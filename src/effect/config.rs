//! The per-effect `<name>.json` file.
//!
//! ```json
//! { "enabled": true,
//!   "subpasses": [
//!     { "index": 1, "inheritFrom": 0,
//!       "values": { "0": { "x": { "default": 0.8, "name": "threshold" } } },
//!       "dispatch": { "useScreenSize": true, "screenSizeMultiplier": [0.5, 0.5] } } ] }
//! ```
//!
//! Entries are deserialized one at a time, so a malformed entry only stops the entries after it.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use super::params::{PARAMETER_SLOT_COUNT, PARAMETER_SLOT_SIZE, ParameterValue};
use super::subpass::DispatchPolicy;
use crate::reflect::TypeTag;

#[derive(Debug, Error)]
pub enum EffectConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed effect config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("subpass index {index} is out of range for a chain of {count}")]
    SubpassOutOfRange { index: usize, count: usize },
    #[error("subpass {index} inherits from {from}, which does not precede it")]
    ForwardInherit { index: usize, from: usize },
    #[error("subpass {index}: slot `{slot}` is out of range")]
    SlotOutOfRange { index: usize, slot: String },
    #[error("subpass {index}: unknown component `{component}` (expected x, y, z or w)")]
    UnknownComponent { index: usize, component: String },
    #[error("subpass {index}: value {value} at slot {slot}.{component} is not a valid {ty:?}")]
    ValueTypeMismatch {
        index: usize,
        slot: usize,
        component: String,
        ty: ValueType,
        value: serde_json::Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Float,
    Int,
    Uint,
    Bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValueConfig {
    pub default: serde_json::Value,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub ty: Option<ValueType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    pub use_screen_size: Option<bool>,
    pub screen_size_multiplier: Option<[f32; 2]>,
    pub custom_size: Option<[u32; 3]>,
}

impl DispatchConfig {
    pub fn apply_to(&self, policy: &mut DispatchPolicy) {
        if let Some(use_screen_size) = self.use_screen_size {
            policy.use_screen_size = use_screen_size;
        }
        if let Some(multiplier) = self.screen_size_multiplier {
            policy.screen_size_multiplier = multiplier;
        }
        if let Some(custom_size) = self.custom_size {
            policy.custom_size = custom_size;
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubpassConfig {
    pub index: usize,
    #[serde(default)]
    pub inherit_from: Option<usize>,
    /// Slot index -> component -> value.
    #[serde(default)]
    pub values: BTreeMap<String, BTreeMap<String, ValueConfig>>,
    #[serde(default)]
    pub dispatch: Option<DispatchConfig>,
}

/// A positional value write, optionally naming the written offset.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuePatch {
    pub offset: u32,
    pub value: ParameterValue,
    pub name: Option<String>,
}

/// A validated [`SubpassConfig`], ready to apply without further checks.
#[derive(Debug, Clone)]
pub struct SubpassPatch {
    pub index: usize,
    pub inherit_from: Option<usize>,
    pub values: Vec<ValuePatch>,
    pub dispatch: Option<DispatchConfig>,
}

impl SubpassConfig {
    pub fn resolve(&self, subpass_count: usize) -> Result<SubpassPatch, EffectConfigError> {
        let index = self.index;
        if index >= subpass_count {
            return Err(EffectConfigError::SubpassOutOfRange {
                index,
                count: subpass_count,
            });
        }
        if let Some(from) = self.inherit_from {
            if from >= index {
                return Err(EffectConfigError::ForwardInherit { index, from });
            }
        }

        let mut values = Vec::new();
        for (slot_key, components) in &self.values {
            let slot = slot_key
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|slot| *slot < PARAMETER_SLOT_COUNT)
                .ok_or_else(|| EffectConfigError::SlotOutOfRange {
                    index,
                    slot: slot_key.clone(),
                })?;
            for (component_key, config) in components {
                let component = component_index(component_key).ok_or_else(|| {
                    EffectConfigError::UnknownComponent {
                        index,
                        component: component_key.clone(),
                    }
                })?;
                let ty = config.ty.unwrap_or(match config.default {
                    serde_json::Value::Bool(_) => ValueType::Bool,
                    _ => ValueType::Float,
                });
                let value = typed_value(ty, &config.default).ok_or_else(|| {
                    EffectConfigError::ValueTypeMismatch {
                        index,
                        slot,
                        component: component_key.clone(),
                        ty,
                        value: config.default.clone(),
                    }
                })?;
                values.push(ValuePatch {
                    offset: (slot * PARAMETER_SLOT_SIZE + component * 4) as u32,
                    value,
                    name: config.name.clone(),
                });
            }
        }

        Ok(SubpassPatch {
            index,
            inherit_from: self.inherit_from,
            values,
            dispatch: self.dispatch.clone(),
        })
    }
}

fn component_index(component: &str) -> Option<usize> {
    match component {
        "x" => Some(0),
        "y" => Some(1),
        "z" => Some(2),
        "w" => Some(3),
        _ => None,
    }
}

fn typed_value(ty: ValueType, value: &serde_json::Value) -> Option<ParameterValue> {
    match ty {
        ValueType::Float => value.as_f64().map(|v| ParameterValue::Float(v as f32)),
        ValueType::Int => value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(ParameterValue::Int),
        ValueType::Uint => value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(ParameterValue::UInt),
        ValueType::Bool => value.as_bool().map(ParameterValue::Bool),
    }
}

impl ValuePatch {
    pub fn tag(&self) -> TypeTag {
        self.value.tag()
    }
}

/// A parsed config file whose subpass entries have not been interpreted yet.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EffectConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub subpasses: Vec<serde_json::Value>,
}

impl EffectConfig {
    pub fn parse(text: &str) -> Result<Self, EffectConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads `path`; `Ok(None)` if the file does not exist.
    pub fn from_path(path: &Path) -> Result<Option<Self>, EffectConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(EffectConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Interprets the entries in file order, stopping at the first malformed one.
    pub fn entries(&self) -> impl Iterator<Item = Result<SubpassConfig, EffectConfigError>> + '_ {
        self.subpasses
            .iter()
            .map(|entry| SubpassConfig::deserialize(entry).map_err(EffectConfigError::from))
    }
}
