use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::TelemetryError;

use super::{TelemetryBus, TelemetryTable, TelemetryValue};

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    values: Mutex<HashMap<(String, String), TelemetryValue>>,
}

/// In-process bus. Used when no broker is configured, and by tests to
/// inspect what the pipeline published.
#[derive(Clone)]
pub struct MemoryBus {
    shared: Arc<Shared>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let shared = Shared::default();
        shared.connected.store(true, Ordering::SeqCst);
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Simulate losing or regaining the bus. Writes fail while disconnected.
    pub fn set_connected(&self, connected: bool) {
        self.shared.connected.store(connected, Ordering::SeqCst);
    }

    pub fn get(&self, table: &str, key: &str) -> Option<TelemetryValue> {
        self.shared
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(table.to_string(), key.to_string()))
            .cloned()
    }

    /// Write a value as if it came from another bus participant. Works
    /// while disconnected.
    pub fn inject(&self, table: &str, key: &str, value: TelemetryValue) {
        self.shared
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((table.to_string(), key.to_string()), value);
    }

    /// Keys present in `table`, sorted.
    pub fn keys(&self, table: &str) -> Vec<String> {
        let values = self.shared.values.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = values
            .keys()
            .filter(|(t, _)| t == table)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryBus for MemoryBus {
    fn table(&self, name: &str) -> Arc<dyn TelemetryTable> {
        Arc::new(MemoryTable {
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
        })
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

pub struct MemoryTable {
    name: String,
    shared: Arc<Shared>,
}

impl TelemetryTable for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, key: &str, value: TelemetryValue) -> Result<(), TelemetryError> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(TelemetryError::Unreachable);
        }
        self.shared
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((self.name.clone(), key.to_string()), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Option<TelemetryValue> {
        self.shared
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(self.name.clone(), key.to_string()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_share_one_store() {
        let bus = MemoryBus::new();
        let front = bus.table("front");
        front.put_number("FPS", 30.0).unwrap();
        assert_eq!(bus.get("front", "FPS"), Some(TelemetryValue::Number(30.0)));
        assert_eq!(bus.table("front").get_number("FPS", 0.0), 30.0);
        assert_eq!(bus.get("back", "FPS"), None);
    }

    #[test]
    fn disconnected_bus_rejects_writes() {
        let bus = MemoryBus::new();
        bus.set_connected(false);
        assert!(!bus.is_connected());
        assert_eq!(
            bus.table("front").put_bool("Enabled", true),
            Err(TelemetryError::Unreachable)
        );
        bus.inject("front", "Enabled", TelemetryValue::Bool(false));
        assert!(!bus.table("front").get_bool("Enabled", true));
    }
}
