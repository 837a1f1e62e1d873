use std::collections::HashMap;

use crate::config::ConfigStore;
use crate::error::ConfigError;

use super::camera::{Camera, CameraParams};
use super::pattern::PatternSource;
use super::source::CameraSource;
use super::still::StillSource;
use super::usb::UsbSource;

/// Builds the capture source for one camera section.
pub type SourceFactory =
    Box<dyn Fn(&str, &ConfigStore) -> Result<Box<dyn CameraSource>, ConfigError> + Send + Sync>;

/// Camera source constructors keyed by `TYPE` tag.
pub struct SourceRegistry {
    factories: HashMap<String, SourceFactory>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with `USB`, `FRAME` and `PATTERN`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("USB", |name, cfg| {
            Ok(Box::new(UsbSource::from_config(name, cfg)?) as Box<dyn CameraSource>)
        });
        registry.register("FRAME", |name, cfg| {
            Ok(Box::new(StillSource::from_config(name, cfg)?) as Box<dyn CameraSource>)
        });
        registry.register("PATTERN", |name, cfg| {
            Ok(Box::new(PatternSource::from_config(name, cfg)?) as Box<dyn CameraSource>)
        });
        registry
    }

    pub fn register<F>(&mut self, tag: &str, factory: F)
    where
        F: Fn(&str, &ConfigStore) -> Result<Box<dyn CameraSource>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(tag.to_uppercase(), Box::new(factory));
    }

    pub fn list(&self) -> Vec<String> {
        let mut tags: Vec<_> = self.factories.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Build the camera configured under section `name` (not yet opened).
    pub fn create(
        &self,
        name: &str,
        cfg: &ConfigStore,
        params: &CameraParams,
    ) -> Result<Camera, ConfigError> {
        let section = name.to_uppercase();
        let tag = cfg
            .get_raw(&section, "TYPE")
            .map(|tag| tag.trim().to_uppercase())
            .ok_or_else(|| ConfigError::MissingType {
                section: section.clone(),
            })?;
        let factory = self
            .factories
            .get(&tag)
            .ok_or_else(|| ConfigError::UnknownType {
                section: section.clone(),
                tag: tag.clone(),
            })?;
        let source = factory(&section, cfg)?;
        Camera::from_config(&section, cfg, source, params)
    }

    /// Build every camera section in declaration order, skipping (and
    /// logging) the ones that are misconfigured.
    pub fn build_all(&self, cfg: &ConfigStore, params: &CameraParams) -> Vec<Camera> {
        let mut cameras = Vec::new();
        for name in cfg.sections() {
            match self.create(name, cfg, params) {
                Ok(camera) => cameras.push(camera),
                Err(err) => log::error!("SourceRegistry: skipping camera {}: {}", name, err),
            }
        }
        cameras
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
