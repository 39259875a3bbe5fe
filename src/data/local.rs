//! LocalModel - terminal in-memory store

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use tracing::{trace, warn};

use crate::binding::{BindingInstance, Segment};

use super::model::{
    DataMiddleware, DataModel, DataModelOptions, Next, Transaction, Update, Updates,
};

/// How far past the end of an array a write may land; the gap fills with nulls
pub const MAX_INDEX_GAP: usize = 1024;

/// Nested JSON value behind a lock.
///
/// Also usable as the innermost entry of a middleware pipeline, where it
/// ignores `next`.
#[derive(Debug)]
pub struct LocalModel {
    data: RwLock<Value>,
}

impl LocalModel {
    pub fn new(initial: Value) -> Self {
        let data = match initial {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Self {
            data: RwLock::new(data),
        }
    }

    /// Copy of the whole tree
    pub fn snapshot(&self) -> Value {
        self.data.read().clone()
    }

    /// Replace the whole tree without producing updates
    pub fn reset(&self, data: Value) {
        *self.data.write() = data;
    }
}

impl Default for LocalModel {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

fn lookup<'v>(root: &'v Value, segments: &[Segment]) -> Option<&'v Value> {
    segments.iter().try_fold(root, |current, segment| match (current, segment) {
        (Value::Object(map), Segment::Key(k)) => map.get(k.as_ref()),
        (Value::Object(map), Segment::Index(i)) => map.get(&i.to_string()),
        (Value::Array(items), Segment::Index(i)) => items.get(*i),
        (Value::Array(items), Segment::Key(k)) => {
            k.parse::<usize>().ok().and_then(|i| items.get(i))
        }
        _ => None,
    })
}

fn empty_container(next: &Segment) -> Value {
    match next {
        Segment::Index(_) => Value::Array(Vec::new()),
        Segment::Key(_) => Value::Object(Map::new()),
    }
}

fn ensure_container(current: &mut Value, segment: &Segment) {
    if current.is_object() || current.is_array() {
        return;
    }
    *current = empty_container(segment);
}

/// Array position addressed by `segment`; `None` for a non-numeric key
fn array_index(segment: &Segment) -> Option<usize> {
    match segment {
        Segment::Index(i) => Some(*i),
        Segment::Key(k) => k.parse().ok(),
    }
}

/// Whether `write` can place a value at `segments` without replacing an
/// existing array or padding one past [`MAX_INDEX_GAP`]
fn writable(root: &Value, segments: &[Segment]) -> bool {
    let mut current = Some(root);
    for segment in segments {
        let (len, index) = match (current, segment) {
            (Some(Value::Object(map)), seg) => {
                current = map.get(&seg.to_string());
                continue;
            }
            (Some(Value::Array(items)), seg) => match array_index(seg) {
                Some(index) => (items.len(), index),
                None => return false,
            },
            // Missing or scalar: a fresh array is created for an index
            (_, Segment::Index(index)) => (0, *index),
            (_, Segment::Key(_)) => {
                current = None;
                continue;
            }
        };
        if index >= len.saturating_add(MAX_INDEX_GAP) {
            return false;
        }
        current = current.and_then(Value::as_array).and_then(|items| items.get(index));
    }
    true
}

/// Walk to the slot for `segment`, creating it (and converting scalars) as needed
fn child_slot<'v>(
    current: &'v mut Value,
    segment: &Segment,
    next: Option<&Segment>,
) -> Option<&'v mut Value> {
    ensure_container(current, segment);
    let fresh = || next.map(empty_container).unwrap_or(Value::Null);

    match current {
        Value::Array(items) => {
            let index = array_index(segment)?;
            if items.len() <= index {
                items.resize(index.checked_add(1)?, Value::Null);
            }
            items.get_mut(index)
        }
        Value::Object(map) => Some(map.entry(segment.to_string()).or_insert_with(fresh)),
        other => Some(other),
    }
}

fn write(root: &mut Value, segments: &[Segment], value: Value) -> bool {
    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        match child_slot(current, segment, segments.get(i + 1)) {
            Some(slot) => current = slot,
            None => return false,
        }
    }
    *current = value;
    true
}

fn remove(root: &mut Value, binding: &BindingInstance) -> bool {
    let Some((last, parents)) = binding.segments().split_last() else {
        *root = Value::Object(Map::new());
        return true;
    };

    let mut current = root;
    for segment in parents {
        let next = match (current, segment) {
            (Value::Object(map), seg) => map.get_mut(&seg.to_string()),
            (Value::Array(items), Segment::Index(i)) => items.get_mut(*i),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return false,
        }
    }

    match (current, last) {
        (Value::Object(map), seg) => map.remove(&seg.to_string()).is_some(),
        (Value::Array(items), Segment::Index(i)) if *i < items.len() => {
            items.remove(*i);
            true
        }
        _ => false,
    }
}

impl DataModel for LocalModel {
    fn get(&self, binding: &BindingInstance, _options: &DataModelOptions) -> Option<Value> {
        let data = self.data.read();
        lookup(&data, binding.segments()).cloned()
    }

    fn set(&self, transaction: Transaction, _options: &DataModelOptions) -> Updates {
        let mut data = self.data.write();
        let mut updates: Updates = Vec::with_capacity(transaction.len());
        let mut positions: FxHashMap<BindingInstance, usize> = FxHashMap::default();

        for (binding, value) in transaction {
            let old_value = lookup(&data, binding.segments()).cloned();
            if !writable(&data, binding.segments())
                || !write(&mut data, binding.segments(), value.clone())
            {
                warn!(binding = %binding, "write refused, it would replace an array or index far past its end");
                continue;
            }
            trace!(binding = %binding, "local write");

            match positions.get(&binding) {
                // Same binding twice: keep the first old value, last write wins
                Some(&at) => updates[at].new_value = Some(value),
                None => {
                    positions.insert(binding.clone(), updates.len());
                    updates.push(Update {
                        binding,
                        old_value,
                        new_value: Some(value),
                        force: false,
                    });
                }
            }
        }

        updates
    }

    fn delete(&self, binding: &BindingInstance, _options: &DataModelOptions) -> bool {
        let removed = remove(&mut self.data.write(), binding);
        trace!(binding = %binding, removed, "local delete");
        removed
    }
}

impl DataMiddleware for LocalModel {
    fn name(&self) -> &str {
        "local-model"
    }

    fn get(
        &self,
        binding: &BindingInstance,
        options: &DataModelOptions,
        _next: Next<'_>,
    ) -> Option<Value> {
        DataModel::get(self, binding, options)
    }

    fn set(&self, transaction: Transaction, options: &DataModelOptions, _next: Next<'_>) -> Updates {
        DataModel::set(self, transaction, options)
    }

    fn delete(&self, binding: &BindingInstance, options: &DataModelOptions, _next: Next<'_>) -> bool {
        DataModel::delete(self, binding, options)
    }
}
