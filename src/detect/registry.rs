use std::collections::HashMap;

use crate::config::ConfigStore;
use crate::error::ConfigError;

use super::plugin::{DetectorPlugin, NullDetector};
use super::rect::RectDetector;

/// Builds one detector instance from its config section.
pub type DetectorFactory =
    Box<dyn Fn(&str, &ConfigStore) -> Result<Box<dyn DetectorPlugin>, ConfigError> + Send + Sync>;

/// Registry of detector constructors keyed by `TYPE` tag.
///
/// The registry holds constructors, not instances: every pipeline worker
/// builds its own detectors so no detector state is shared between threads.
pub struct DetectorRegistry {
    factories: HashMap<String, DetectorFactory>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the bundled detector types (`RECT`, `NONE`).
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("RECT", |name, cfg| {
            Ok(Box::new(RectDetector::from_config(name, cfg)?) as Box<dyn DetectorPlugin>)
        });
        registry.register("NONE", |name, _cfg| {
            Ok(Box::new(NullDetector::new(name)) as Box<dyn DetectorPlugin>)
        });
        registry
    }

    /// Register a constructor. Re-registering a tag replaces the constructor.
    pub fn register<F>(&mut self, tag: &str, factory: F)
    where
        F: Fn(&str, &ConfigStore) -> Result<Box<dyn DetectorPlugin>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.register_factory(tag, Box::new(factory));
    }

    pub fn register_factory(&mut self, tag: &str, factory: DetectorFactory) {
        self.factories.insert(tag.to_uppercase(), factory);
    }

    /// List registered type tags.
    pub fn list(&self) -> Vec<String> {
        let mut tags: Vec<_> = self.factories.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Build the detector configured under section `name`.
    pub fn create(&self, name: &str, cfg: &ConfigStore) -> Result<Box<dyn DetectorPlugin>, ConfigError> {
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
        factory(&section, cfg)
    }

    /// Build every detector section in declaration order.
    ///
    /// A section that fails to build is logged and skipped; the others are
    /// still returned.
    pub fn build_all(&self, cfg: &ConfigStore) -> Vec<Box<dyn DetectorPlugin>> {
        let mut detectors = Vec::new();
        for name in cfg.sections() {
            match self.create(name, cfg) {
                Ok(detector) => detectors.push(detector),
                Err(err) => log::error!("DetectorRegistry: skipping {}: {}", name, err),
            }
        }
        detectors
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
