//! View AST - arena-backed, append-only node storage
//!
//! Nodes are never mutated after they are added. Parent links live in a side
//! table keyed by [`NodeId`], so upward lookups never keep a node alive.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

/// Index of a node inside its [`Ast`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Node kind without payload (used by parser hooks)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeType {
    Asset,
    View,
    Value,
    MultiNode,
    Switch,
    Template,
    Applicability,
    Empty,
}

/// One branch of a switch
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// Expression (or literal `true`) that selects this branch
    pub case: Value,
    pub value: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Asset,
    View,
    Value,
    MultiNode {
        values: Vec<NodeId>,
        /// Replace the value at the child path instead of appending to it
        overrides: bool,
        /// Splice resolved items into the parent list
        flatten: bool,
    },
    Switch {
        dynamic: bool,
        cases: Vec<SwitchCase>,
    },
    Template {
        data: String,
        template: Value,
        dynamic: bool,
        depth: usize,
    },
    Applicability {
        expression: Value,
        value: NodeId,
    },
    Empty,
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Asset => NodeType::Asset,
            Self::View => NodeType::View,
            Self::Value => NodeType::Value,
            Self::MultiNode { .. } => NodeType::MultiNode,
            Self::Switch { .. } => NodeType::Switch,
            Self::Template { .. } => NodeType::Template,
            Self::Applicability { .. } => NodeType::Applicability,
            Self::Empty => NodeType::Empty,
        }
    }
}

/// A child slot: where the child's resolved value lands inside the parent
#[derive(Debug, Clone, PartialEq)]
pub struct Child {
    pub path: Vec<String>,
    pub value: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    /// Static part of the node (everything not split out into children)
    pub value: Option<Value>,
    pub children: Vec<Child>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            value: None,
            children: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(NodeKind::Empty)
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_children(mut self, children: Vec<Child>) -> Self {
        self.children = children;
        self
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    /// `id` of an Asset or View value
    pub fn asset_id(&self) -> Option<&str> {
        match self.kind {
            NodeKind::Asset | NodeKind::View => {
                self.value.as_ref()?.get("id").and_then(Value::as_str)
            }
            _ => None,
        }
    }

    /// Every node this node refers to directly
    pub fn child_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.children.iter().map(|c| c.value).collect();
        match &self.kind {
            NodeKind::MultiNode { values, .. } => ids.extend(values.iter().copied()),
            NodeKind::Switch { cases, .. } => ids.extend(cases.iter().map(|c| c.value)),
            NodeKind::Applicability { value, .. } => ids.push(*value),
            _ => {}
        }
        ids
    }
}

#[derive(Default)]
struct Arena {
    nodes: Vec<Arc<Node>>,
    parents: Vec<Option<NodeId>>,
}

/// Shared handle on one view's node arena
#[derive(Clone, Default)]
pub struct Ast {
    arena: Arc<RwLock<Arena>>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `node`, making it the parent of every node it refers to
    pub fn add(&self, node: Node) -> NodeId {
        let children = node.child_ids();
        let mut arena = self.arena.write();
        let id = NodeId(arena.nodes.len());
        arena.nodes.push(Arc::new(node));
        arena.parents.push(None);
        for child in children {
            if let Some(slot) = arena.parents.get_mut(child.0) {
                *slot = Some(id);
            }
        }
        id
    }

    pub fn get(&self, id: NodeId) -> Option<Arc<Node>> {
        self.arena.read().nodes.get(id.0).cloned()
    }

    pub fn node_type(&self, id: NodeId) -> Option<NodeType> {
        self.get(id).map(|n| n.node_type())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena.read().parents.get(id.0).copied().flatten()
    }

    /// Attach a node created at resolve time under the node it replaces
    pub fn set_parent(&self, id: NodeId, parent: NodeId) {
        if let Some(slot) = self.arena.write().parents.get_mut(id.0) {
            *slot = Some(parent);
        }
    }

    /// True if `ancestor` is a strict ancestor of `node`
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let arena = self.arena.read();
        let mut current = arena.parents.get(node.0).copied().flatten();
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = arena.parents.get(id.0).copied().flatten();
        }
        false
    }

    /// Empty out `id` and everything it refers to, returning the released ids.
    ///
    /// Ids stay valid and read back as [`NodeKind::Empty`].
    pub fn release(&self, id: NodeId) -> Vec<NodeId> {
        let empty = Arc::new(Node::empty());
        let mut arena = self.arena.write();
        let mut released = Vec::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let Some(slot) = arena.nodes.get_mut(id.0) else {
                continue;
            };
            if matches!(slot.kind, NodeKind::Empty) {
                continue;
            }
            stack.extend(slot.child_ids());
            *slot = Arc::clone(&empty);
            arena.parents[id.0] = None;
            released.push(id);
        }
        released
    }

    /// Nodes that have not been released
    pub fn live_len(&self) -> usize {
        let arena = self.arena.read();
        arena
            .nodes
            .iter()
            .filter(|n| !matches!(n.kind, NodeKind::Empty))
            .count()
    }

    pub fn len(&self) -> usize {
        self.arena.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ast").field("nodes", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_links_children_to_parent() {
        let ast = Ast::new();
        let leaf = ast.add(Node::new(NodeKind::Value).with_value(json!({"a": 1})));
        let root = ast.add(Node::new(NodeKind::View).with_children(vec![Child {
            path: vec!["field".into()],
            value: leaf,
        }]));

        assert_eq!(ast.parent(leaf), Some(root));
        assert_eq!(ast.parent(root), None);
        assert!(ast.is_ancestor(root, leaf));
        assert!(!ast.is_ancestor(leaf, root));
        assert_eq!(ast.len(), 2);
    }

    #[test]
    fn kind_payload_counts_as_children() {
        let ast = Ast::new();
        let a = ast.add(Node::new(NodeKind::Value));
        let b = ast.add(Node::new(NodeKind::Value));
        let multi = ast.add(Node::new(NodeKind::MultiNode {
            values: vec![a, b],
            overrides: true,
            flatten: false,
        }));
        let guard = ast.add(Node::new(NodeKind::Applicability {
            expression: json!("{{show}}"),
            value: multi,
        }));

        assert_eq!(ast.parent(a), Some(multi));
        assert_eq!(ast.parent(multi), Some(guard));
        assert!(ast.is_ancestor(guard, b));
    }

    #[test]
    fn release_empties_a_whole_subtree() {
        let ast = Ast::new();
        let keep = ast.add(Node::new(NodeKind::Value).with_value(json!(1)));
        let a = ast.add(Node::new(NodeKind::Value).with_value(json!(2)));
        let multi = ast.add(Node::new(NodeKind::MultiNode {
            values: vec![a],
            overrides: true,
            flatten: false,
        }));

        let mut released = ast.release(multi);
        released.sort_by_key(|id| id.index());
        assert_eq!(released, vec![a, multi]);
        assert_eq!(ast.node_type(a), Some(NodeType::Empty));
        assert_eq!(ast.parent(a), None);
        assert_eq!(ast.get(keep).and_then(|n| n.value.clone()), Some(json!(1)));
        assert_eq!((ast.len(), ast.live_len()), (3, 1));
        assert!(ast.release(multi).is_empty());
    }

    #[test]
    fn asset_id_only_for_assets_and_views() {
        let asset = Node::new(NodeKind::Asset).with_value(json!({"id": "x"}));
        let value = Node::new(NodeKind::Value).with_value(json!({"id": "y"}));
        assert_eq!(asset.asset_id(), Some("x"));
        assert_eq!(value.asset_id(), None);
    }
}
