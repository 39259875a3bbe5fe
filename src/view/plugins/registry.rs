//! Partial-match registry keyed by JSON shapes
//!
//! A matcher such as `{"type": "input"}` matches every asset whose `type` is
//! `"input"`. When several matchers fit, the most specific (most leaf keys)
//! wins, and later registrations win ties.

use std::fmt;

use parking_lot::RwLock;
use serde_json::Value;

pub struct Registry<V> {
    entries: RwLock<Vec<(Value, V)>>,
}

impl<V> Default for Registry<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<V: Clone> Registry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, matcher: Value, value: V) {
        self.entries.write().push((matcher, value));
    }

    /// Best match for `query`
    pub fn get(&self, query: &Value) -> Option<V> {
        let entries = self.entries.read();
        let mut best: Option<(usize, &V)> = None;
        for (matcher, value) in entries.iter() {
            if !matches(matcher, query) {
                continue;
            }
            let score = specificity(matcher);
            if best.map_or(true, |(top, _)| score >= top) {
                best = Some((score, value));
            }
        }
        best.map(|(_, v)| v.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<V> fmt::Debug for Registry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read();
        f.debug_list().entries(entries.iter().map(|(m, _)| m)).finish()
    }
}

fn matches(matcher: &Value, query: &Value) -> bool {
    match (matcher, query) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(k, v)| have.get(k).is_some_and(|actual| matches(v, actual))),
        _ => matcher == query,
    }
}

fn specificity(matcher: &Value) -> usize {
    match matcher {
        Value::Object(map) => map.values().map(specificity).sum(),
        _ => 1,
    }
}
