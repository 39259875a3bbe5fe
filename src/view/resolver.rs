//! Resolver - incremental evaluation of an AST against live data
//!
//! Every node is resolved through its own [`DependencyModel`], so the result
//! cache knows which bindings each node read. On a targeted update a node is
//! reused when none of its reads intersect the changed bindings (plugins may
//! override that through `skip_resolve`).

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tracing::{debug, warn};

use crate::binding::BindingParser;
use crate::data::{BindingSet, DataModel, DependencyModel, CHILDREN_SUBSET, CORE_SUBSET};
use crate::error::Result;
use crate::expression::{ExpressionContext, ExpressionEvaluator};
use crate::hooks::{SyncHook, WaterfallHook};
use crate::util::value::{append_in, set_in};

use super::ast::{Ast, Node, NodeId, NodeKind, NodeType};
use super::parser::Parser;

/// Collaborators every resolve pass reads through
#[derive(Clone)]
pub struct ResolverOptions {
    pub model: Arc<dyn DataModel>,
    pub binding_parser: Arc<BindingParser>,
    pub evaluator: Arc<ExpressionEvaluator>,
}

impl fmt::Debug for ResolverOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverOptions").finish_non_exhaustive()
    }
}

/// Everything a resolver hook may need about the node being computed
pub struct ResolveContext {
    /// Node as it appears in the parsed tree
    pub original: NodeId,
    /// Node after `before_resolve` (`None` once a plugin dropped it)
    pub node: Option<NodeId>,
    pub ast: Ast,
    pub parser: Parser,
    /// Reads through this model become the node's dependencies
    pub model: Arc<DependencyModel>,
    pub binding_parser: Arc<BindingParser>,
    pub evaluator: Arc<ExpressionEvaluator>,
}

impl ResolveContext {
    pub fn expression_context(&self) -> ExpressionContext<'_> {
        ExpressionContext::new(&*self.model, &self.binding_parser)
    }

    pub fn evaluate(&self, exp: &Value) -> Result<Value> {
        self.evaluator.evaluate(exp, &self.expression_context())
    }

    pub fn resolved_node(&self) -> Option<Arc<Node>> {
        self.node.and_then(|id| self.ast.get(id))
    }
}

/// Cached outcome of resolving one node
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    /// The node that was actually resolved (after `before_resolve`)
    pub node: Option<NodeId>,
    /// Nodes computed underneath this one
    pub children: Vec<NodeId>,
    pub value: Option<Value>,
    pub updated: bool,
    pub dependencies: BindingSet,
}

#[derive(Debug, Clone)]
pub struct NodeUpdateEvent {
    pub node: NodeId,
    pub parent: Option<NodeId>,
    pub update: NodeUpdate,
}

#[derive(Default)]
pub struct ResolverHooks {
    /// Seeded with "no relevant data changed"; `true` reuses the cached result
    pub skip_resolve: WaterfallHook<bool, ResolveContext>,
    /// Swap the node before it is resolved (`None` drops it)
    pub before_resolve: WaterfallHook<Option<NodeId>, ResolveContext>,
    /// Compute the node's own value (seeded with its static value)
    pub resolve: WaterfallHook<Option<Value>, ResolveContext>,
    /// Post-process the value once children are merged in
    pub after_resolve: WaterfallHook<Option<Value>, ResolveContext>,
    pub after_node_update: SyncHook<NodeUpdateEvent>,
    pub before_update: SyncHook<Option<BindingSet>>,
    pub after_update: SyncHook<Option<Value>>,
}

struct Pass<'a> {
    changes: Option<&'a BindingSet>,
    previous: &'a FxHashMap<NodeId, NodeUpdate>,
    next: FxHashMap<NodeId, NodeUpdate>,
    ids: FxHashSet<String>,
}

pub struct Resolver {
    pub hooks: ResolverHooks,
    root: NodeId,
    parser: Parser,
    options: ResolverOptions,
    cache: Mutex<FxHashMap<NodeId, NodeUpdate>>,
}

impl Resolver {
    pub fn new(root: NodeId, parser: Parser, options: ResolverOptions) -> Self {
        Self {
            hooks: ResolverHooks::default(),
            root,
            parser,
            options,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn ast(&self) -> &Ast {
        self.parser.ast()
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Result of the last pass for `node`
    pub fn previous_result(&self, node: NodeId) -> Option<NodeUpdate> {
        self.cache.lock().get(&node).cloned()
    }

    /// Resolve the tree. `None` means everything may have changed.
    pub fn update(&self, changes: Option<&BindingSet>) -> Option<Value> {
        self.hooks.before_update.call(&changes.cloned());

        let previous = std::mem::take(&mut *self.cache.lock());
        let mut pass = Pass {
            changes,
            previous: &previous,
            next: FxHashMap::default(),
            ids: FxHashSet::default(),
        };
        let root = self.compute_tree(self.root, None, &mut pass);
        debug!(nodes = pass.next.len(), updated = root.updated, "resolve pass finished");
        *self.cache.lock() = pass.next;

        self.hooks.after_update.call(&root.value);
        root.value
    }

    fn context(&self, node: NodeId) -> ResolveContext {
        let model = Arc::new(DependencyModel::new(Arc::clone(&self.options.model)));
        model.track_subset(CORE_SUBSET);
        ResolveContext {
            original: node,
            node: Some(node),
            ast: self.ast().clone(),
            parser: self.parser.clone(),
            model,
            binding_parser: Arc::clone(&self.options.binding_parser),
            evaluator: Arc::clone(&self.options.evaluator),
        }
    }

    fn compute_tree(&self, node: NodeId, raw_parent: Option<NodeId>, pass: &mut Pass<'_>) -> NodeUpdate {
        let mut ctx = self.context(node);
        let previous_map = pass.previous;
        let previous = previous_map.get(&node);

        let data_changed = cares_about(pass.changes, previous.map(|p| &p.dependencies));
        let skip = self.hooks.skip_resolve.call(!data_changed, &ctx);
        if let Some(previous) = previous.filter(|_| skip) {
            self.reuse(node, raw_parent, previous, pass);
            return NodeUpdate {
                updated: false,
                ..previous.clone()
            };
        }

        let resolved_id = self.hooks.before_resolve.call(Some(node), &ctx);
        ctx.node = resolved_id;
        let resolved_node = resolved_id.and_then(|id| self.ast().get(id));

        let seed = resolved_node.as_ref().and_then(|n| match n.kind {
            NodeKind::Asset | NodeKind::View | NodeKind::Value => n.value.clone(),
            _ => None,
        });
        let mut value = self.hooks.resolve.call(seed, &ctx);
        let mut children_updated = false;

        if let Some(n) = &resolved_node {
            if matches!(n.node_type(), NodeType::Asset | NodeType::View) {
                self.record_id(value.as_ref(), pass);
            }
        }

        ctx.model.track_subset(CHILDREN_SUBSET);
        let mut child_deps = BindingSet::default();
        let mut computed = Vec::new();

        if let Some(resolved_node) = &resolved_node {
            if let NodeKind::MultiNode { values, .. } = &resolved_node.kind {
                let mut items = Vec::new();
                for &item in values {
                    let child = self.compute_tree(item, Some(node), pass);
                    computed.push(item);
                    child_deps.extend(child.dependencies.iter().cloned());
                    children_updated |= child.updated;
                    match child.value {
                        None | Some(Value::Null) => {}
                        Some(Value::Array(nested)) if self.is_flattening(child.node) => {
                            items.extend(nested)
                        }
                        Some(v) => items.push(v),
                    }
                }
                value = Some(Value::Array(items));
            } else {
                // Appending children merge after every overriding one, whatever the key order
                let mut appends = Vec::new();
                for slot in &resolved_node.children {
                    let child = self.compute_tree(slot.value, Some(node), pass);
                    computed.push(slot.value);
                    child_deps.extend(child.dependencies.iter().cloned());
                    children_updated |= child.updated;

                    let Some(child_value) = child.value.filter(|v| !v.is_null()) else {
                        continue;
                    };
                    if self.is_appending(child.node) {
                        appends.push((&slot.path, child_value));
                    } else {
                        value = Some(set_in(value, &slot.path, child_value));
                    }
                }
                for (path, child_value) in appends {
                    let items = match child_value {
                        Value::Array(items) => items,
                        other => vec![other],
                    };
                    value = Some(append_in(value, path, items));
                }
            }
        }

        for dep in &child_deps {
            ctx.model.add_child_read_dep(dep);
        }
        ctx.model.track_subset(CORE_SUBSET);

        let value = self.hooks.after_resolve.call(value, &ctx);
        // Compared once children are merged and after_resolve has run, like the cached value
        let updated = children_updated || previous.map_or(true, |p| p.value != value);

        let mut dependencies = ctx.model.get_dependencies(None);
        dependencies.extend(child_deps);

        let update = NodeUpdate {
            node: resolved_id,
            children: computed,
            value,
            updated,
            dependencies,
        };
        self.hooks.after_node_update.call(&NodeUpdateEvent {
            node,
            parent: raw_parent,
            update: update.clone(),
        });
        pass.next.insert(node, update.clone());
        update
    }

    /// Carry a cached subtree into this pass unchanged
    fn reuse(&self, node: NodeId, parent: Option<NodeId>, previous: &NodeUpdate, pass: &mut Pass<'_>) {
        let update = NodeUpdate {
            updated: false,
            ..previous.clone()
        };
        if let Some(n) = previous.node.and_then(|id| self.ast().get(id)) {
            if matches!(n.node_type(), NodeType::Asset | NodeType::View) {
                self.record_id(update.value.as_ref(), pass);
            }
        }
        pass.next.insert(node, update.clone());

        let previous_map = pass.previous;
        for child in &previous.children {
            if let Some(child_previous) = previous_map.get(child) {
                self.reuse(*child, Some(node), child_previous, pass);
            }
        }

        self.hooks.after_node_update.call(&NodeUpdateEvent {
            node,
            parent,
            update,
        });
    }

    fn record_id(&self, value: Option<&Value>, pass: &mut Pass<'_>) {
        let Some(id) = value.and_then(|v| v.get("id")).and_then(Value::as_str) else {
            return;
        };
        if !pass.ids.insert(id.to_string()) {
            warn!(id, "found asset/view nodes with conflicting ids; the ids must be unique");
        }
    }

    fn is_flattening(&self, node: Option<NodeId>) -> bool {
        node.and_then(|id| self.ast().get(id)).is_some_and(|n| {
            matches!(n.kind, NodeKind::MultiNode { flatten: true, .. })
        })
    }

    fn is_appending(&self, node: Option<NodeId>) -> bool {
        node.and_then(|id| self.ast().get(id)).is_some_and(|n| {
            matches!(n.kind, NodeKind::MultiNode { overrides: false, .. })
        })
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("root", &self.root)
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

/// Whether any changed binding overlaps (contains or is contained by) a dependency
fn cares_about(changes: Option<&BindingSet>, dependencies: Option<&BindingSet>) -> bool {
    let (Some(changes), Some(dependencies)) = (changes, dependencies) else {
        return true;
    };
    dependencies.iter().any(|dep| {
        changes
            .iter()
            .any(|change| change == dep || change.contains(dep) || dep.contains(change))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataController;
    use crate::view::ast::Child;
    use crate::view::parser::ParseOptions;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup(view: Value, data: Value) -> (Arc<DataController>, Resolver) {
        let binding_parser = Arc::new(BindingParser::new());
        let data = Arc::new(DataController::new(data, Arc::clone(&binding_parser)));
        let parser = Parser::new(Ast::new());
        let root = parser.parse_view(&view).unwrap();
        let resolver = Resolver::new(
            root,
            parser,
            ResolverOptions {
                model: data.clone(),
                binding_parser,
                evaluator: Arc::new(ExpressionEvaluator::new()),
            },
        );
        (data, resolver)
    }

    /// Replaces `{"bind": path}` values with the data at `path`
    fn tap_bind(resolver: &Resolver) {
        resolver.hooks.resolve.tap("bind", |value, ctx| match value {
            Some(Value::Object(mut map)) => {
                if let Some(path) = map.get("bind").and_then(Value::as_str).map(String::from) {
                    let bound = ctx.expression_context().get(&path).unwrap_or(Value::Null);
                    map.insert("bind".into(), bound);
                }
                Some(Value::Object(map))
            }
            other => other,
        });
    }

    fn changes(data: &DataController, paths: &[&str]) -> BindingSet {
        paths.iter().map(|p| data.parse(p).unwrap()).collect()
    }

    #[test]
    fn merges_children_into_parent_value() {
        let (_, resolver) = setup(
            json!({"id": "v", "header": {"asset": {"id": "h", "value": "x"}}}),
            json!({}),
        );
        let out = resolver.update(None).unwrap();
        assert_eq!(
            out,
            json!({"id": "v", "header": {"asset": {"id": "h", "value": "x"}}})
        );
    }

    #[test]
    fn untouched_nodes_are_reused() {
        let (data, resolver) = setup(
            json!({
                "id": "v",
                "a": {"asset": {"id": "a", "bind": "first"}},
                "b": {"asset": {"id": "b", "bind": "second"}}
            }),
            json!({"first": 1, "second": 2}),
        );
        tap_bind(&resolver);

        let resolved = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = Arc::clone(&resolved);
        resolver.hooks.resolve.tap("count", move |value, ctx| {
            if let Some(id) = value.as_ref().and_then(|v| v.get("id")).and_then(Value::as_str) {
                seen.lock().push(format!("{id}@{}", ctx.original));
            }
            value
        });

        resolver.update(None);
        assert_eq!(resolved.lock().len(), 3);
        resolved.lock().clear();

        data.set_str([("first", json!(10))]).unwrap();
        let out = resolver.update(Some(&changes(&data, &["first"]))).unwrap();

        assert_eq!(out["a"]["asset"]["bind"], json!(10));
        assert_eq!(out["b"]["asset"]["bind"], json!(2));
        let ids: Vec<String> = resolved.lock().iter().map(|s| s[..1].to_string()).collect();
        assert_eq!(ids, vec!["v", "a"]);
    }

    #[test]
    fn recomputed_container_with_same_value_is_not_updated() {
        let (data, resolver) = setup(
            json!({
                "id": "v",
                "a": {"asset": {"id": "a", "bind": "first"}},
                "b": {"asset": {"id": "b", "bind": "second"}}
            }),
            json!({"first": 1, "second": 2}),
        );
        tap_bind(&resolver);
        resolver.update(None);

        let updated = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = Arc::clone(&updated);
        resolver.hooks.after_node_update.tap("record", move |event| {
            seen.lock().push((event.node, event.update.updated));
        });

        // `first` reported changed without a new value: `a` and the root recompute to the same tree
        let out = resolver.update(Some(&changes(&data, &["first"]))).unwrap();
        assert_eq!(out["a"]["asset"]["bind"], json!(1));
        assert!(updated.lock().iter().all(|(_, updated)| !updated));
        assert_eq!(resolver.previous_result(resolver.root()).map(|u| u.updated), Some(false));

        data.set_str([("first", json!(5))]).unwrap();
        resolver.update(Some(&changes(&data, &["first"])));
        assert_eq!(resolver.previous_result(resolver.root()).map(|u| u.updated), Some(true));
    }

    #[test]
    fn parent_change_reaches_child_dependency() {
        let (data, resolver) = setup(
            json!({"id": "v", "body": {"asset": {"id": "a", "bind": "user.name"}}}),
            json!({"user": {"name": "Ada"}}),
        );
        tap_bind(&resolver);
        resolver.update(None);

        data.set_str([("user", json!({"name": "Grace"}))]).unwrap();
        let out = resolver.update(Some(&changes(&data, &["user"]))).unwrap();
        assert_eq!(out["body"]["asset"]["bind"], json!("Grace"));
    }

    #[test]
    fn multi_node_values_collect_in_order() {
        let binding_parser = Arc::new(BindingParser::new());
        let data = Arc::new(DataController::new(json!({}), Arc::clone(&binding_parser)));
        let parser = Parser::new(Ast::new());
        let ast = parser.ast().clone();

        let a = parser
            .parse_object(&json!({"asset": {"id": "a"}}), NodeType::Value, ParseOptions::default())
            .unwrap();
        let nested_item = ast.add(Node::new(NodeKind::Value).with_value(json!("n1")));
        let nested = ast.add(Node::new(NodeKind::MultiNode {
            values: vec![nested_item],
            overrides: true,
            flatten: true,
        }));
        let list = ast.add(Node::new(NodeKind::MultiNode {
            values: vec![a, nested],
            overrides: true,
            flatten: false,
        }));
        let root = ast.add(
            Node::new(NodeKind::View)
                .with_value(json!({"id": "v"}))
                .with_children(vec![Child {
                    path: vec!["items".into()],
                    value: list,
                }]),
        );

        let resolver = Resolver::new(
            root,
            parser,
            ResolverOptions {
                model: data,
                binding_parser,
                evaluator: Arc::new(ExpressionEvaluator::new()),
            },
        );
        let out = resolver.update(None).unwrap();
        assert_eq!(out, json!({"id": "v", "items": [{"asset": {"id": "a"}}, "n1"]}));
    }

    #[test]
    fn dropped_nodes_contribute_nothing() {
        let (_, resolver) = setup(
            json!({"id": "v", "gone": {"asset": {"id": "g"}}}),
            json!({}),
        );
        let ast = resolver.ast().clone();
        resolver.hooks.before_resolve.tap("drop-assets", move |node, _| {
            node.filter(|id| ast.node_type(*id) != Some(NodeType::Asset))
        });
        assert_eq!(resolver.update(None), Some(json!({"id": "v"})));
    }

    #[test]
    fn overlapping_bindings_count_as_changes() {
        let parser = BindingParser::new();
        let deps: BindingSet = [parser.parse("a.b").unwrap()].into_iter().collect();
        let parent: BindingSet = [parser.parse("a").unwrap()].into_iter().collect();
        let child: BindingSet = [parser.parse("a.b.c").unwrap()].into_iter().collect();
        let other: BindingSet = [parser.parse("x").unwrap()].into_iter().collect();

        assert!(cares_about(Some(&parent), Some(&deps)));
        assert!(cares_about(Some(&child), Some(&deps)));
        assert!(!cares_about(Some(&other), Some(&deps)));
        assert!(cares_about(None, Some(&deps)));
    }

    #[test]
    fn counts_every_node_on_full_update() {
        let (_, resolver) = setup(
            json!({"id": "v", "a": {"asset": {"id": "a"}}}),
            json!({}),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        resolver.hooks.after_node_update.tap("count", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        resolver.update(None);
        resolver.update(None);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
