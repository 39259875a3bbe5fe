//! ViewController - swaps views on VIEW states and keeps them in sync with data
//!
//! Data writes are collected into a pending set and flushed as one resolve pass
//! through the deferred [`TaskQueue`]. Silent writes join the pending set
//! without scheduling a flush of their own.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::binding::Segment;
use crate::data::{BindingSet, DataController, DataModelOptions, Updates};
use crate::error::{PlayerError, Result};
use crate::expression::{ExpressionContext, ExpressionEvaluator};
use crate::flow::{FlowController, FlowInstance, NamedState, NavigationFlowState, ViewState};
use crate::hooks::{SyncHook, WaterfallHook};
use crate::scheduler::TaskQueue;
use crate::string_resolver::STRING_RESOLVER;
use crate::util::value::to_display_string;

use super::instance::ViewInstance;
use super::plugins::ViewPlugin;
use super::resolver::ResolverOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewControllerOptions {
    /// Batch data notifications into one resolve pass per flush
    pub optimize_updates: bool,
    /// Fail the flow when a VIEW ref matches no view
    pub strict_views: bool,
}

impl Default for ViewControllerOptions {
    fn default() -> Self {
        Self {
            optimize_updates: true,
            strict_views: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolveViewArgs {
    /// `ref` after data refs were resolved
    pub view_id: String,
    pub state: ViewState,
}

#[derive(Default)]
pub struct ViewControllerHooks {
    /// A new view was created; plugins are already applied, first update pending
    pub view: SyncHook<Arc<ViewInstance>>,
    /// Seeded with the declared view matching `view_id`, if any
    pub resolve_view: WaterfallHook<Option<Value>, ResolveViewArgs>,
}

#[derive(Debug, Default)]
struct PendingUpdate {
    bindings: BindingSet,
    scheduled: bool,
}

pub struct ViewController {
    pub hooks: ViewControllerHooks,
    this: Weak<ViewController>,
    views: FxHashMap<String, Value>,
    data: Arc<DataController>,
    evaluator: Arc<ExpressionEvaluator>,
    queue: Arc<TaskQueue>,
    plugins: Vec<Arc<dyn ViewPlugin>>,
    options: ViewControllerOptions,
    current: Mutex<Option<Arc<ViewInstance>>>,
    pending: Mutex<PendingUpdate>,
}

impl ViewController {
    pub fn new(
        views: &[Value],
        flow_controller: &FlowController,
        data: Arc<DataController>,
        evaluator: Arc<ExpressionEvaluator>,
        queue: Arc<TaskQueue>,
        plugins: Vec<Arc<dyn ViewPlugin>>,
        options: ViewControllerOptions,
    ) -> Arc<Self> {
        let views = views
            .iter()
            .filter_map(|view| {
                let id = view.get("id")?.as_str()?;
                Some((id.to_string(), view.clone()))
            })
            .collect();

        let controller = Arc::new_cyclic(|this| Self {
            hooks: ViewControllerHooks::default(),
            this: this.clone(),
            views,
            data,
            evaluator,
            queue,
            plugins,
            options,
            current: Mutex::new(None),
            pending: Mutex::new(PendingUpdate::default()),
        });
        controller.attach(flow_controller);
        controller
    }

    fn attach(&self, flow_controller: &FlowController) {
        let this = self.this.clone();
        flow_controller.hooks.flow.tap("view-controller", move |instance| {
            let controller = this.clone();
            let weak_instance: Weak<FlowInstance> = Arc::downgrade(instance);
            instance.hooks.transition.tap(
                "view-controller",
                move |(_, next): &(Option<NamedState>, NamedState)| {
                    let Some(controller) = controller.upgrade() else {
                        return;
                    };
                    let NavigationFlowState::View(state) = &next.value else {
                        controller.clear();
                        return;
                    };
                    if let Err(err) = controller.on_view(state) {
                        if let Some(instance) = weak_instance.upgrade() {
                            instance.fail(err);
                        }
                    }
                },
            );
        });

        let this = self.this.clone();
        self.data
            .hooks
            .on_update
            .tap("view-controller", move |(updates, options): &(Updates, DataModelOptions)| {
                if let Some(controller) = this.upgrade() {
                    let bindings = updates.iter().map(|u| u.binding.clone()).collect();
                    controller.queue_update(bindings, options.silent);
                }
            });

        let this = self.this.clone();
        self.data.hooks.on_delete.tap("view-controller", move |(binding, options)| {
            let Some(controller) = this.upgrade() else {
                return;
            };
            // Removing an element shifts every later index, so the whole array is stale
            let stale = match binding.key() {
                Some(Segment::Index(_)) => binding.parent().unwrap_or_else(|| binding.clone()),
                _ => binding.clone(),
            };
            controller.queue_update([stale].into_iter().collect(), options.silent);
        });
    }

    pub fn current_view(&self) -> Option<Arc<ViewInstance>> {
        self.current.lock().clone()
    }

    pub fn options(&self) -> ViewControllerOptions {
        self.options
    }

    fn clear(&self) {
        if self.current.lock().take().is_some() {
            debug!("left view state, current view cleared");
        }
        *self.pending.lock() = PendingUpdate::default();
    }

    fn queue_update(&self, bindings: BindingSet, silent: bool) {
        if self.current_view().is_none() {
            return;
        }

        let schedule = {
            let mut pending = self.pending.lock();
            pending.bindings.extend(bindings);
            if silent {
                false
            } else if !self.options.optimize_updates {
                true
            } else {
                !std::mem::replace(&mut pending.scheduled, true)
            }
        };
        if !schedule {
            return;
        }

        if self.options.optimize_updates {
            let this = self.this.clone();
            self.queue.defer(move || {
                if let Some(controller) = this.upgrade() {
                    controller.flush_pending();
                }
            });
        } else {
            self.flush_pending();
        }
    }

    fn flush_pending(&self) {
        let bindings = {
            let mut pending = self.pending.lock();
            pending.scheduled = false;
            std::mem::take(&mut pending.bindings)
        };
        let Some(view) = self.current_view() else {
            return;
        };
        debug!(view = %view.id, changed = bindings.len(), "updating view");
        if let Err(err) = view.update(Some(&bindings)) {
            warn!(view = %view.id, error = %err, "view update failed");
        }
    }

    /// Resolve data refs in a view id
    fn resolve_id(&self, id: &str) -> String {
        if !STRING_RESOLVER.has_refs(id) {
            return id.to_string();
        }
        let ctx = ExpressionContext::new(&*self.data, self.data.parser());
        match STRING_RESOLVER.resolve_string(id, &ctx, &self.evaluator) {
            Ok(resolved) => to_display_string(&resolved).into_owned(),
            Err(err) => {
                warn!(id, error = %err, "unable to resolve view id");
                id.to_string()
            }
        }
    }

    /// Declared view for `view_id`, matching templated ids against current data
    fn find_view(&self, view_id: &str) -> Option<Value> {
        if let Some(view) = self.views.get(view_id) {
            return Some(view.clone());
        }
        self.views
            .iter()
            .filter(|(id, _)| STRING_RESOLVER.has_refs(id))
            .find(|(id, _)| self.resolve_id(id) == view_id)
            .map(|(_, view)| view.clone())
    }

    fn on_view(&self, state: &ViewState) -> Result<()> {
        let view_id = self.resolve_id(&state.ref_id);
        let declared = self.find_view(&view_id);
        let args = ResolveViewArgs {
            view_id: view_id.clone(),
            state: state.clone(),
        };
        let Some(source) = self.hooks.resolve_view.call(declared, &args) else {
            if self.options.strict_views {
                return Err(PlayerError::ViewNotFound { view_id });
            }
            warn!(view_id = %view_id, "no view found, clearing current view");
            self.clear();
            return Ok(());
        };

        let options = ResolverOptions {
            model: self.data.clone(),
            binding_parser: Arc::clone(self.data.parser()),
            evaluator: Arc::clone(&self.evaluator),
        };
        let view = Arc::new(ViewInstance::new(view_id.clone(), source, options));
        for plugin in &self.plugins {
            plugin.apply(&view);
        }

        *self.pending.lock() = PendingUpdate::default();
        *self.current.lock() = Some(Arc::clone(&view));
        self.hooks.view.call(&view);
        info!(view = %view_id, "view started");

        view.update(None)?;
        Ok(())
    }
}

impl fmt::Debug for ViewController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewController")
            .field("views", &self.views.len())
            .field("current", &self.current_view().map(|v| v.id.clone()))
            .field("options", &self.options)
            .finish()
    }
}
