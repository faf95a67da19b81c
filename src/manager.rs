//! Discovery and ordered execution of every effect under one directory.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    device::ComputeDevice,
    effect::{Effect, EffectLoadError, EffectSnapshot, FrameContext},
    kernel::parse_kernel_file_name,
};

pub const GLOBAL_CONFIG_FILE: &str = "global_config.json";
/// Shared textures live here; nothing under it is an effect.
pub const TEXTURES_DIR: &str = "textures";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub effect_order: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub root: PathBuf,
    pub order: Vec<String>,
    pub effects: Vec<EffectSnapshot>,
}

pub struct EffectManager {
    root: PathBuf,
    effects: Vec<Effect>,
    order: Vec<String>,
}

impl EffectManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            effects: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of the effects with kernels directly under `root`, sorted.
    pub fn discover(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("failed to read effects dir {}", self.root.display()))?;

        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("failed to read effects dir {}", self.root.display()))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                log::warn!("[manager] skipping non UTF-8 entry {:?}", entry.path());
                continue;
            };
            if file_name == TEXTURES_DIR || file_name == GLOBAL_CONFIG_FILE {
                continue;
            }
            if !entry.path().is_file() {
                continue;
            }
            if let Some((name, _)) = parse_kernel_file_name(file_name) {
                names.insert(name.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Loads every discovered effect.
    ///
    /// Device failures and kernels with more than one binding set abort the load; effects loaded
    /// before that stay in the manager. Any other load failure is logged and the effect skipped.
    pub fn load_effects(&mut self, device: &mut dyn ComputeDevice) -> Result<usize> {
        let mut loaded = 0;
        for name in self.discover()? {
            match self.load_effect(device, &name) {
                Ok(true) => loaded += 1,
                Ok(false) => {}
                Err(err) if err.is_fatal() => {
                    return Err(err).with_context(|| format!("failed to load effect `{name}`"));
                }
                Err(err) => log::error!("[manager] skipping effect: {err}"),
            }
        }
        log::info!(
            "[manager] loaded {loaded} effects from {}",
            self.root.display()
        );
        Ok(loaded)
    }

    /// Loads `name` unless an effect of that name is already loaded, in which case the existing
    /// one is kept and `Ok(false)` is returned.
    pub fn load_effect(
        &mut self,
        device: &mut dyn ComputeDevice,
        name: &str,
    ) -> Result<bool, EffectLoadError> {
        if self.effect(name).is_some() {
            log::warn!("[manager] effect `{name}` is already loaded; keeping the first one");
            return Ok(false);
        }
        let effect = Effect::load(device, &self.root, name)?;
        self.effects.push(effect);
        Ok(true)
    }

    /// Reads the execution order from `global_config.json`.
    ///
    /// Call after loading: names without a loaded effect are dropped. Without the file no effect
    /// executes.
    pub fn parse_global_config(&mut self) -> Result<()> {
        let path = self.root.join(GLOBAL_CONFIG_FILE);
        let config = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<GlobalConfig>(&text)
                .with_context(|| format!("invalid global config {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!(
                    "[manager] no {GLOBAL_CONFIG_FILE} in {}; no effects will run",
                    self.root.display()
                );
                GlobalConfig::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        self.set_order(config.effect_order);
        Ok(())
    }

    pub fn set_order(&mut self, names: Vec<String>) {
        let mut order: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if self.effect(&name).is_none() {
                log::warn!("[manager] effect order names unknown effect `{name}`");
            } else if order.contains(&name) {
                log::warn!("[manager] effect `{name}` is listed twice; keeping the first position");
            } else {
                order.push(name);
            }
        }
        for effect in &self.effects {
            if !order.iter().any(|n| n == effect.name()) {
                log::debug!("[manager] effect `{}` is loaded but not ordered", effect.name());
            }
        }
        self.order = order;
    }

    /// Records every ordered effect against `frame`.
    ///
    /// Each effect except the last is followed by a barrier. The caller must synchronize or
    /// transition the target itself before anything reads what the last effect wrote.
    pub fn execute_effects(&mut self, device: &mut dyn ComputeDevice, frame: &FrameContext) {
        let last = self.order.len().saturating_sub(1);
        for (position, name) in self.order.iter().enumerate() {
            let Some(effect) = self.effects.iter_mut().find(|e| e.name() == name) else {
                continue;
            };
            effect.execute(device, frame, position != last);
        }
    }

    pub fn effect(&self, name: &str) -> Option<&Effect> {
        self.effects.iter().find(|e| e.name() == name)
    }

    pub fn effect_mut(&mut self, name: &str) -> Option<&mut Effect> {
        self.effects.iter_mut().find(|e| e.name() == name)
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn inspect(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            root: self.root.clone(),
            order: self.order.clone(),
            effects: self.effects.iter().map(Effect::inspect).collect(),
        }
    }

    pub fn destroy(self, device: &mut dyn ComputeDevice) {
        for effect in self.effects {
            effect.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::RecordingDevice,
        test_kernels::{PLAIN_KERNEL, TWO_SETS_KERNEL, write_kernel},
    };

    #[test]
    fn discovery_skips_reserved_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_kernel(dir.path(), "fxaa", 0, PLAIN_KERNEL);
        write_kernel(dir.path(), "bloom", 0, PLAIN_KERNEL);
        write_kernel(dir.path(), "bloom", 1, PLAIN_KERNEL);
        std::fs::create_dir(dir.path().join(TEXTURES_DIR)).expect("textures dir");
        write_kernel(&dir.path().join(TEXTURES_DIR), "lens", 0, PLAIN_KERNEL);
        std::fs::write(dir.path().join(GLOBAL_CONFIG_FILE), "{}").expect("global config");
        std::fs::write(dir.path().join("bloom.json"), "{}").expect("bloom config");

        let manager = EffectManager::new(dir.path());
        assert_eq!(manager.discover().expect("discover"), vec!["bloom", "fxaa"]);
    }

    #[test]
    fn duplicate_loads_keep_the_first_effect() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_kernel(dir.path(), "fxaa", 0, PLAIN_KERNEL);
        let mut device = RecordingDevice::new();
        let mut manager = EffectManager::new(dir.path());

        assert!(manager.load_effect(&mut device, "fxaa").expect("first"));
        let objects = device.live_object_count();
        assert!(!manager.load_effect(&mut device, "fxaa").expect("second"));
        assert_eq!(device.live_object_count(), objects);
        assert_eq!(manager.effects().len(), 1);
    }

    #[test]
    fn effects_with_a_gap_at_zero_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_kernel(dir.path(), "fxaa", 0, PLAIN_KERNEL);
        write_kernel(dir.path(), "orphan", 1, PLAIN_KERNEL);
        let mut device = RecordingDevice::new();
        let mut manager = EffectManager::new(dir.path());

        assert_eq!(manager.load_effects(&mut device).expect("load"), 1);
        assert!(manager.effect("orphan").is_none());
    }

    #[test]
    fn multiple_binding_sets_abort_loading() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_kernel(dir.path(), "fxaa", 0, PLAIN_KERNEL);
        write_kernel(dir.path(), "lens", 0, TWO_SETS_KERNEL);
        let mut device = RecordingDevice::new();
        let mut manager = EffectManager::new(dir.path());

        let err = manager.load_effects(&mut device).expect_err("two binding sets");
        assert!(err.to_string().contains("`lens`"));
        assert!(matches!(
            err.downcast_ref::<EffectLoadError>(),
            Some(EffectLoadError::Reflect {
                source: crate::reflect::ReflectError::MultipleBindingSets(..),
                ..
            })
        ));
        assert!(manager.effect("lens").is_none());
    }

    #[test]
    fn device_failures_abort_loading() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_kernel(dir.path(), "fxaa", 0, PLAIN_KERNEL);
        let mut device = RecordingDevice::new();
        device.fail_pipeline_creation(0);
        let mut manager = EffectManager::new(dir.path());

        let err = manager.load_effects(&mut device).expect_err("pipeline creation fails");
        assert!(matches!(
            err.downcast_ref::<EffectLoadError>(),
            Some(EffectLoadError::Device { .. })
        ));
        assert!(manager.effects().is_empty());
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn missing_global_config_runs_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_kernel(dir.path(), "fxaa", 0, PLAIN_KERNEL);
        let mut device = RecordingDevice::new();
        let mut manager = EffectManager::new(dir.path());
        manager.load_effects(&mut device).expect("load");
        manager.parse_global_config().expect("global config");

        assert!(manager.order().is_empty());
        manager.execute_effects(
            &mut device,
            &FrameContext {
                target: crate::device::ImageViewHandle::from_raw(1),
                extent: [8, 8],
            },
        );
        assert!(device.commands().is_empty());
    }

    #[test]
    fn order_drops_unknown_and_repeated_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_kernel(dir.path(), "fxaa", 0, PLAIN_KERNEL);
        write_kernel(dir.path(), "bloom", 0, PLAIN_KERNEL);
        std::fs::write(
            dir.path().join(GLOBAL_CONFIG_FILE),
            r#"{ "effect_order": ["fxaa", "vignette", "bloom", "fxaa"] }"#,
        )
        .expect("global config");
        let mut device = RecordingDevice::new();
        let mut manager = EffectManager::new(dir.path());
        manager.load_effects(&mut device).expect("load");
        manager.parse_global_config().expect("global config");

        assert_eq!(manager.order(), ["fxaa", "bloom"]);
    }
}
