//! Asset-type transforms
//!
//! Transforms are registered against a partial asset shape (usually
//! `{"type": ...}`, optionally with `metaData`). A transform may swap the node
//! before it resolves and rewrite its resolved value. Each asset gets its own
//! [`LocalStateStore`]; writing to it re-resolves just that asset and its
//! ancestors.

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::data::BindingSet;
use crate::view::ast::{Ast, Node, NodeId, NodeType};
use crate::view::instance::ViewInstance;
use crate::view::resolver::ResolveContext;

use super::local_state::LocalStateStore;
use super::registry::Registry;
use super::ViewPlugin;

pub type BeforeResolveTransform =
    dyn Fn(NodeId, &TransformContext<'_>) -> Option<NodeId> + Send + Sync;
pub type ResolveTransform = dyn Fn(Value, &TransformContext<'_>) -> Value + Send + Sync;

/// What a transform sees besides the node or value it rewrites
pub struct TransformContext<'a> {
    pub resolve: &'a ResolveContext,
    /// State private to this asset and step
    pub store: Arc<LocalStateStore>,
}

#[derive(Clone, Default)]
pub struct AssetTransform {
    pub before_resolve: Option<Arc<BeforeResolveTransform>>,
    pub resolve: Option<Arc<ResolveTransform>>,
}

impl AssetTransform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_before_resolve(
        mut self,
        f: impl Fn(NodeId, &TransformContext<'_>) -> Option<NodeId> + Send + Sync + 'static,
    ) -> Self {
        self.before_resolve = Some(Arc::new(f));
        self
    }

    pub fn with_resolve(
        mut self,
        f: impl Fn(Value, &TransformContext<'_>) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.resolve = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for AssetTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetTransform")
            .field("before_resolve", &self.before_resolve.is_some())
            .field("resolve", &self.resolve.is_some())
            .finish()
    }
}

pub type TransformRegistry = Registry<AssetTransform>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Step {
    BeforeResolve,
    Resolve,
}

/// Transform bookkeeping for one view
struct ViewTransforms {
    view: Weak<ViewInstance>,
    stores: DashMap<(NodeId, Step), Arc<LocalStateStore>>,
    /// Asset whose local state changed, set for the duration of one pass
    last_updated: Mutex<Option<NodeId>>,
}

impl ViewTransforms {
    fn store(self: &Arc<Self>, node: NodeId, step: Step) -> Arc<LocalStateStore> {
        let weak = Arc::downgrade(self);
        self.stores
            .entry((node, step))
            .or_insert_with(|| {
                Arc::new(LocalStateStore::with_callback(move || {
                    if let Some(state) = weak.upgrade() {
                        state.local_state_changed(node);
                    }
                }))
            })
            .clone()
    }

    fn local_state_changed(&self, node: NodeId) {
        let Some(view) = self.view.upgrade() else {
            return;
        };
        debug!(view = %view.id, %node, "local state changed");
        *self.last_updated.lock() = Some(node);
        if let Err(err) = view.update(Some(&BindingSet::default())) {
            warn!(view = %view.id, error = %err, "failed to update view after local state change");
        }
    }

    /// Inside a local-state pass, only the changed asset and its lineage resolve
    fn skip(&self, ast: &Ast, node: NodeId, skip: bool) -> bool {
        match *self.last_updated.lock() {
            Some(last) => !(node == last || ast.is_ancestor(node, last) || ast.is_ancestor(last, node)),
            None => skip,
        }
    }
}

fn transform_target(node: &Node) -> Option<&Value> {
    matches!(node.node_type(), NodeType::Asset | NodeType::View)
        .then_some(node.value.as_ref())
        .flatten()
}

pub struct AssetTransformPlugin {
    registry: Arc<TransformRegistry>,
}

impl AssetTransformPlugin {
    pub fn new(registry: Arc<TransformRegistry>) -> Self {
        Self { registry }
    }
}

impl ViewPlugin for AssetTransformPlugin {
    fn name(&self) -> &str {
        "asset-transform"
    }

    fn apply(&self, view: &Arc<ViewInstance>) {
        let state = Arc::new(ViewTransforms {
            view: Arc::downgrade(view),
            stores: DashMap::new(),
            last_updated: Mutex::new(None),
        });
        let registry = Arc::clone(&self.registry);

        view.hooks.resolver.tap("asset-transform", move |resolver| {
            let ast = resolver.ast().clone();
            let s = Arc::clone(&state);
            resolver
                .hooks
                .skip_resolve
                .tap("asset-transform", move |skip, ctx| s.skip(&ast, ctx.original, skip));

            let (s, r) = (Arc::clone(&state), Arc::clone(&registry));
            resolver
                .hooks
                .before_resolve
                .tap("asset-transform", move |node, ctx| {
                    let id = node?;
                    let Some(current) = ctx.ast.get(id) else {
                        return node;
                    };
                    let transform = transform_target(&current).and_then(|raw| r.get(raw));
                    match transform.and_then(|t| t.before_resolve) {
                        Some(f) => {
                            let tctx = TransformContext {
                                resolve: ctx,
                                store: s.store(ctx.original, Step::BeforeResolve),
                            };
                            f(id, &tctx)
                        }
                        None => node,
                    }
                });

            let (s, r) = (Arc::clone(&state), Arc::clone(&registry));
            resolver
                .hooks
                .after_resolve
                .tap("asset-transform", move |value, ctx| {
                    let value = value?;
                    let Some(current) = ctx.resolved_node() else {
                        return Some(value);
                    };
                    let transform = transform_target(&current).and_then(|raw| r.get(raw));
                    match transform.and_then(|t| t.resolve) {
                        Some(f) => {
                            let tctx = TransformContext {
                                resolve: ctx,
                                store: s.store(ctx.original, Step::Resolve),
                            };
                            Some(f(value, &tctx))
                        }
                        None => Some(value),
                    }
                });

            let s = Arc::clone(&state);
            resolver.hooks.after_update.tap("asset-transform", move |_| {
                s.last_updated.lock().take();
            });
        });
    }
}
