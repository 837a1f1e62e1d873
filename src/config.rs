//! Sectioned key/value configuration.
//!
//! Text format, one entry per line:
//!
//! ```text
//! # comment
//! WIDTH=320          <- default section
//! INTAKE:            <- opens section INTAKE
//! TYPE=USB
//! :                  <- back to the default section
//! ```
//!
//! Section names and keys are case-insensitive (stored upper-cased). Every
//! section inherits default-section values for keys it does not define.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

/// Name of the default section.
pub const DEFAULT_SECTION: &str = "";

#[derive(Debug, Default, Clone)]
pub struct ConfigStore {
    sections: HashMap<String, HashMap<String, String>>,
    /// Named sections in declaration order.
    order: Vec<String>,
    source: Option<PathBuf>,
    loaded: bool,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store directly from configuration text.
    pub fn from_text(text: &str) -> Self {
        let mut store = Self::new();
        store.parse(text);
        store.loaded = true;
        store
    }

    /// Load from a file once. Later calls are no-ops that report success
    /// unless `reload` is used. Returns false only if the file cannot be read.
    pub fn load(&mut self, path: impl AsRef<Path>) -> bool {
        match self.load_file(path.as_ref(), false) {
            Ok(()) => true,
            Err(err) => {
                log::error!("ConfigStore: {}", err);
                false
            }
        }
    }

    /// Discard current contents and parse the file again.
    pub fn reload(&mut self, path: impl AsRef<Path>) -> bool {
        match self.load_file(path.as_ref(), true) {
            Ok(()) => true,
            Err(err) => {
                log::error!("ConfigStore: {}", err);
                false
            }
        }
    }

    pub fn load_file(&mut self, path: &Path, force: bool) -> Result<(), ConfigError> {
        if self.loaded && !force {
            return Ok(());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::MissingSource {
            path: path.to_path_buf(),
            source,
        })?;
        self.sections.clear();
        self.order.clear();
        self.parse(&text);
        self.source = Some(path.to_path_buf());
        self.loaded = true;
        log::info!(
            "ConfigStore: loaded {} ({} sections)",
            path.display(),
            self.order.len()
        );
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    fn parse(&mut self, text: &str) {
        let mut section = DEFAULT_SECTION.to_string();
        self.sections.entry(section.clone()).or_default();

        for line in text.lines() {
            let clean = line.trim();
            if clean.is_empty() || clean.starts_with('#') {
                continue;
            }
            let (head, value) = match clean.split_once('=') {
                Some((head, value)) => (head.trim(), Some(value.trim())),
                None => (clean, None),
            };
            let upper = head.to_uppercase();

            if let Some(name) = upper.strip_suffix(':') {
                section = name.trim().to_string();
                self.open_section(&section);
            } else if head.is_empty() {
                section = DEFAULT_SECTION.to_string();
            } else if let Some(value) = value {
                self.sections
                    .entry(section.clone())
                    .or_default()
                    .insert(upper, value.to_string());
            }
        }
    }

    fn open_section(&mut self, name: &str) {
        if !self.sections.contains_key(name) {
            self.sections.insert(name.to_string(), HashMap::new());
            if !name.is_empty() {
                self.order.push(name.to_string());
            }
        }
    }

    /// Named sections in declaration order (the default section excluded).
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn has_section(&self, entity: &str) -> bool {
        self.sections.contains_key(&entity.to_uppercase())
    }

    /// Value defined by the entity's own section, without default fallback.
    pub fn get_own(&self, entity: &str, key: &str) -> Option<&str> {
        self.sections
            .get(&entity.to_uppercase())
            .and_then(|section| section.get(&key.to_uppercase()))
            .map(String::as_str)
    }

    /// Entity value, else default-section value.
    pub fn get_raw(&self, entity: &str, key: &str) -> Option<&str> {
        self.get_own(entity, key)
            .or_else(|| self.get_own(DEFAULT_SECTION, key))
    }

    pub fn get_str(&self, entity: &str, key: &str, default: &str) -> String {
        self.get_raw(entity, key).unwrap_or(default).to_string()
    }

    /// Typed lookup: entity value, else default-section value, else `default`.
    /// A present value that fails to parse is an error, never the default.
    pub fn get<T>(&self, entity: &str, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
    {
        match self.get_raw(entity, key) {
            Some(raw) => parse_value(entity, key, raw),
            None => Ok(default),
        }
    }

    /// Like `get`, but absence is an error.
    pub fn require<T>(&self, entity: &str, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
    {
        match self.get_raw(entity, key) {
            Some(raw) => parse_value(entity, key, raw),
            None => Err(ConfigError::MissingKey {
                section: entity.to_uppercase(),
                key: key.to_uppercase(),
            }),
        }
    }

    pub fn get_bool(&self, entity: &str, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get_raw(entity, key) {
            Some(raw) => parse_flag(raw).ok_or_else(|| ConfigError::InvalidValue {
                section: entity.to_uppercase(),
                key: key.to_uppercase(),
                value: raw.to_string(),
                expected: "bool",
            }),
            None => Ok(default),
        }
    }
}

fn parse_value<T: FromStr>(entity: &str, key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        section: entity.to_uppercase(),
        key: key.to_uppercase(),
        value: raw.to_string(),
        expected: std::any::type_name::<T>(),
    })
}

/// Parses the flag spellings accepted across config files and the environment.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "t" | "y" | "yes" => Some(true),
        "false" | "0" | "f" | "n" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# camera settings
WIDTH=320
FPS=30

intake:
TYPE=USB
width=640
PORT=2
FOV=bogus

Shooter:
TYPE=FRAME
:
HEIGHT=240
";

    #[test]
    fn entity_value_wins_over_default() {
        let cfg = ConfigStore::from_text(SAMPLE);
        assert_eq!(cfg.get("INTAKE", "WIDTH", 0u32).unwrap(), 640);
        assert_eq!(cfg.get("shooter", "width", 0u32).unwrap(), 320);
        assert_eq!(cfg.get("SHOOTER", "BRIGHTNESS", 50.0f64).unwrap(), 50.0);
    }

    #[test]
    fn colon_line_returns_to_default_section() {
        let cfg = ConfigStore::from_text(SAMPLE);
        assert_eq!(cfg.get_own(DEFAULT_SECTION, "HEIGHT"), Some("240"));
        assert_eq!(cfg.get_own("SHOOTER", "HEIGHT"), None);
        assert_eq!(cfg.get("SHOOTER", "HEIGHT", 0u32).unwrap(), 240);
    }

    #[test]
    fn sections_keep_declaration_order() {
        let cfg = ConfigStore::from_text(SAMPLE);
        let names: Vec<_> = cfg.sections().collect();
        assert_eq!(names, vec!["INTAKE", "SHOOTER"]);
    }

    #[test]
    fn parse_failure_is_reported() {
        let cfg = ConfigStore::from_text(SAMPLE);
        let err = cfg.get("INTAKE", "FOV", 0.0f64).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "FOV"));
    }

    #[test]
    fn duplicate_key_last_write_wins() {
        let cfg = ConfigStore::from_text("FPS=10\nINTAKE:\nFPS=15\nfps=20\n:\nFPS=30\n");
        assert_eq!(cfg.get("INTAKE", "FPS", 0u32).unwrap(), 20);
        assert_eq!(cfg.get("OTHER", "FPS", 0u32).unwrap(), 30);
    }

    #[test]
    fn lines_without_equals_are_skipped() {
        let cfg = ConfigStore::from_text("garbage line\nKEY=1\nmore garbage\n");
        assert_eq!(cfg.get("", "KEY", 0i32).unwrap(), 1);
    }

    #[test]
    fn value_may_contain_equals() {
        let cfg = ConfigStore::from_text("DEVPATH=a=b\n");
        assert_eq!(cfg.get_raw("X", "DEVPATH"), Some("a=b"));
    }

    #[test]
    fn flags_accept_common_spellings() {
        let cfg = ConfigStore::from_text("A=yes\nB=0\nC=maybe\n");
        assert!(cfg.get_bool("", "A", false).unwrap());
        assert!(!cfg.get_bool("", "B", true).unwrap());
        assert!(cfg.get_bool("", "C", true).is_err());
        assert!(cfg.get_bool("", "D", true).unwrap());
    }

    #[test]
    fn require_reports_missing_key() {
        let cfg = ConfigStore::from_text(SAMPLE);
        assert!(matches!(
            cfg.require::<f64>("INTAKE", "SIZE"),
            Err(ConfigError::MissingKey { .. })
        ));
    }
}
