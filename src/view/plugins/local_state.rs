//! Per-asset local state for transforms
//!
//! Values live outside the data model; writing one notifies the owner so the
//! asset can be re-resolved.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

type Callback = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct LocalStateStore {
    state: Mutex<FxHashMap<String, Value>>,
    on_update: Option<Callback>,
}

impl LocalStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that runs `on_update` after every effective write
    pub fn with_callback(on_update: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(FxHashMap::default()),
            on_update: Some(Box::new(on_update)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().get(key).cloned()
    }

    /// Current value, storing `init` first when the key is new
    pub fn get_or_init(&self, key: &str, init: Value) -> Value {
        self.state
            .lock()
            .entry(key.to_string())
            .or_insert(init)
            .clone()
    }

    /// Returns whether the value changed
    pub fn set(&self, key: &str, value: Value) -> bool {
        let changed = {
            let mut state = self.state.lock();
            match state.get(key) {
                Some(existing) if *existing == value => false,
                _ => {
                    state.insert(key.to_string(), value);
                    true
                }
            }
        };
        if changed {
            if let Some(callback) = &self.on_update {
                callback();
            }
        }
        changed
    }

    pub fn remove_key(&self, key: &str) -> Option<Value> {
        self.state.lock().remove(key)
    }

    pub fn reset(&self) {
        self.state.lock().clear();
    }

    /// Current value for `key` plus a setter that outlives this borrow
    pub fn use_shared_state(self: &Arc<Self>, key: &str, init: Value) -> (Value, StateSetter) {
        let value = self.get_or_init(key, init);
        let setter = StateSetter {
            store: Arc::downgrade(self),
            key: key.to_string(),
        };
        (value, setter)
    }
}

impl fmt::Debug for LocalStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStateStore")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

/// Writes one key of a [`LocalStateStore`]; a no-op once the store is gone
#[derive(Debug, Clone)]
pub struct StateSetter {
    store: Weak<LocalStateStore>,
    key: String,
}

impl StateSetter {
    pub fn set(&self, value: Value) -> bool {
        self.store
            .upgrade()
            .is_some_and(|store| store.set(&self.key, value))
    }
}
