//! Read/write dependency tracking
//!
//! Dependencies accumulate per named subset (`core`, `children`, ...) and in a
//! union across all subsets. Switching subsets never clears what was already
//! recorded; only [`DependencyTracker::reset`] does.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::binding::BindingInstance;

use super::model::{DataMiddleware, DataModel, DataModelOptions, Next, Transaction, Updates};

pub const CORE_SUBSET: &str = "core";
pub const CHILDREN_SUBSET: &str = "children";

pub type BindingSet = FxHashSet<BindingInstance>;

#[derive(Default, Clone)]
struct Deps {
    read: BindingSet,
    write: BindingSet,
}

struct TrackerState {
    active: String,
    tracking: bool,
    all: Deps,
    subsets: FxHashMap<String, Deps>,
}

impl TrackerState {
    fn fresh() -> Self {
        let mut subsets = FxHashMap::default();
        subsets.insert(CORE_SUBSET.to_string(), Deps::default());
        subsets.insert(CHILDREN_SUBSET.to_string(), Deps::default());
        Self {
            active: CORE_SUBSET.to_string(),
            tracking: true,
            all: Deps::default(),
            subsets,
        }
    }
}

pub struct DependencyTracker {
    state: Mutex<TrackerState>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState::fresh()),
        }
    }

    /// Record into `name` from now on (created if missing)
    pub fn track_subset(&self, name: &str) {
        let mut state = self.state.lock();
        state.subsets.entry(name.to_string()).or_default();
        state.active = name.to_string();
    }

    pub fn track_default(&self) {
        self.track_subset(CORE_SUBSET);
    }

    pub fn start_tracking(&self) {
        self.state.lock().tracking = true;
    }

    pub fn stop_tracking(&self) {
        self.state.lock().tracking = false;
    }

    /// Reads for one subset, or the union when `name` is `None`
    pub fn get_dependencies(&self, name: Option<&str>) -> BindingSet {
        let state = self.state.lock();
        match name {
            Some(name) => state
                .subsets
                .get(name)
                .map(|d| d.read.clone())
                .unwrap_or_default(),
            None => state.all.read.clone(),
        }
    }

    /// Writes for one subset, or the union when `name` is `None`
    pub fn get_modified(&self, name: Option<&str>) -> BindingSet {
        let state = self.state.lock();
        match name {
            Some(name) => state
                .subsets
                .get(name)
                .map(|d| d.write.clone())
                .unwrap_or_default(),
            None => state.all.write.clone(),
        }
    }

    pub fn reads_binding(&self, binding: &BindingInstance) -> bool {
        self.state.lock().all.read.contains(binding)
    }

    pub fn writes_binding(&self, binding: &BindingInstance) -> bool {
        self.state.lock().all.write.contains(binding)
    }

    pub fn reset(&self) {
        *self.state.lock() = TrackerState::fresh();
    }

    pub fn add_read_dep(&self, binding: &BindingInstance) {
        let mut state = self.state.lock();
        if !state.tracking {
            return;
        }
        let active = state.active.clone();
        state.subsets.entry(active).or_default().read.insert(binding.clone());
        state.all.read.insert(binding.clone());
    }

    pub fn add_write_dep(&self, binding: &BindingInstance) {
        let mut state = self.state.lock();
        if !state.tracking {
            return;
        }
        let active = state.active.clone();
        state.subsets.entry(active).or_default().write.insert(binding.clone());
        state.all.write.insert(binding.clone());
    }

    /// Record a read on behalf of a child node
    pub fn add_child_read_dep(&self, binding: &BindingInstance) {
        let mut state = self.state.lock();
        state
            .subsets
            .entry(CHILDREN_SUBSET.to_string())
            .or_default()
            .read
            .insert(binding.clone());
        state.all.read.insert(binding.clone());
    }
}

impl Default for DependencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Middleware that records every read and write passing through it
#[derive(Default)]
pub struct DependencyMiddleware {
    tracker: DependencyTracker,
}

impl DependencyMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }
}

impl DataMiddleware for DependencyMiddleware {
    fn name(&self) -> &str {
        "dependency-tracker"
    }

    fn get(
        &self,
        binding: &BindingInstance,
        options: &DataModelOptions,
        next: Next<'_>,
    ) -> Option<Value> {
        self.tracker.add_read_dep(binding);
        next.get(binding, options)
    }

    fn set(&self, transaction: Transaction, options: &DataModelOptions, next: Next<'_>) -> Updates {
        for (binding, _) in &transaction {
            self.tracker.add_write_dep(binding);
        }
        next.set(transaction, options)
    }

    fn delete(&self, binding: &BindingInstance, options: &DataModelOptions, next: Next<'_>) -> bool {
        self.tracker.add_write_dep(binding);
        next.delete(binding, options)
    }
}

/// Data model wrapper that records reads and writes against its root model
pub struct DependencyModel {
    root: Arc<dyn DataModel>,
    tracker: DependencyTracker,
}

impl DependencyModel {
    pub fn new(root: Arc<dyn DataModel>) -> Self {
        Self {
            root,
            tracker: DependencyTracker::new(),
        }
    }

    pub fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }

    pub fn root(&self) -> &Arc<dyn DataModel> {
        &self.root
    }
}

impl std::ops::Deref for DependencyModel {
    type Target = DependencyTracker;

    fn deref(&self) -> &DependencyTracker {
        &self.tracker
    }
}

impl DataModel for DependencyModel {
    fn get(&self, binding: &BindingInstance, options: &DataModelOptions) -> Option<Value> {
        self.tracker.add_read_dep(binding);
        self.root.get(binding, options)
    }

    fn set(&self, transaction: Transaction, options: &DataModelOptions) -> Updates {
        for (binding, _) in &transaction {
            self.tracker.add_write_dep(binding);
        }
        self.root.set(transaction, options)
    }

    fn delete(&self, binding: &BindingInstance, options: &DataModelOptions) -> bool {
        self.tracker.add_write_dep(binding);
        self.root.delete(binding, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingParser;
    use crate::data::LocalModel;
    use serde_json::json;

    fn set_of(items: &[&BindingInstance]) -> BindingSet {
        items.iter().map(|b| (*b).clone()).collect()
    }

    #[test]
    fn subsets_accumulate_independently() {
        let parser = BindingParser::new();
        let (a, b) = (parser.parse("a").unwrap(), parser.parse("b").unwrap());
        let tracker = DependencyTracker::new();

        tracker.track_subset(CHILDREN_SUBSET);
        tracker.add_read_dep(&a);
        tracker.track_subset(CORE_SUBSET);
        tracker.add_read_dep(&b);

        assert_eq!(tracker.get_dependencies(Some(CHILDREN_SUBSET)), set_of(&[&a]));
        assert_eq!(tracker.get_dependencies(Some(CORE_SUBSET)), set_of(&[&b]));
        assert_eq!(tracker.get_dependencies(None), set_of(&[&a, &b]));
    }

    #[test]
    fn reset_clears_everything() {
        let parser = BindingParser::new();
        let tracker = DependencyTracker::new();
        tracker.track_subset("custom");
        tracker.add_write_dep(&parser.parse("x").unwrap());
        tracker.reset();

        assert!(tracker.get_modified(None).is_empty());
        assert!(tracker.get_modified(Some("custom")).is_empty());
    }

    #[test]
    fn stop_tracking_pauses_recording() {
        let parser = BindingParser::new();
        let tracker = DependencyTracker::new();
        tracker.stop_tracking();
        tracker.add_read_dep(&parser.parse("x").unwrap());
        tracker.start_tracking();
        assert!(tracker.get_dependencies(None).is_empty());
    }

    #[test]
    fn dependency_model_records_reads_and_writes() {
        let parser = BindingParser::new();
        let root: Arc<dyn DataModel> = Arc::new(LocalModel::new(json!({"a": 1})));
        let model = DependencyModel::new(root);
        let (a, b) = (parser.parse("a").unwrap(), parser.parse("b").unwrap());

        assert_eq!(model.get(&a, &DataModelOptions::default()), Some(json!(1)));
        model.set(vec![(b.clone(), json!(2))], &DataModelOptions::default());

        assert!(model.reads_binding(&a));
        assert!(model.writes_binding(&b));
        assert!(!model.reads_binding(&b));
    }
}
