//! View parser - raw view JSON into AST nodes
//!
//! The core walk only knows three things: an `asset` property becomes an
//! Asset child, nested objects are flattened into the parent's value under a
//! path prefix, and everything else is static value. Arrays, switches,
//! templates and applicability are claimed by plugins through `parse_node`.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{PlayerError, Result};
use crate::hooks::{BailHook, WaterfallHook};
use crate::util::value::set_in;

use super::ast::{Ast, Child, Node, NodeId, NodeKind, NodeType};

/// Property that holds a nested asset
pub const ASSET_KEY: &str = "asset";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Nesting level of template expansion (selects `_index_`, `_index1_`, ...)
    pub template_depth: usize,
}

/// The property being parsed when `parse_node` is asked about a child
#[derive(Debug, Clone)]
pub struct ChildContext {
    /// Path of the object that owns the property
    pub path: Vec<String>,
    pub key: String,
    pub parent: Value,
}

impl ChildContext {
    /// Path of the property itself
    pub fn full_path(&self) -> Vec<String> {
        let mut path = self.path.clone();
        path.push(self.key.clone());
        path
    }
}

pub struct ParseRequest {
    pub parser: Parser,
    pub object: Value,
    /// Kind chosen by `determine_node_type`, or `expected`
    pub node_type: NodeType,
    /// Kind the caller asked for
    pub expected: NodeType,
    pub options: ParseOptions,
    /// Set when a property of a larger object is being parsed
    pub child: Option<ChildContext>,
}

pub enum ParseOutcome {
    /// Answer for a whole object; `None` drops it
    Node(Option<NodeId>),
    /// Answer for a property: zero or more child slots
    Children(Vec<Child>),
}

#[derive(Default)]
pub struct ParserHooks {
    /// Rewrite each object before its properties are walked
    pub on_parse_object: WaterfallHook<Value, NodeType>,
    /// Veto (`None`) or replace a node before it is stored; argument is the raw object
    pub on_create_ast_node: WaterfallHook<Option<Node>, Value>,
    pub determine_node_type: BailHook<Value, NodeType>,
    pub parse_node: BailHook<ParseRequest, ParseOutcome>,
}

struct ParserInner {
    hooks: ParserHooks,
    ast: Ast,
}

/// Cheap-to-clone handle; plugins receive one with every request
#[derive(Clone)]
pub struct Parser {
    inner: Arc<ParserInner>,
}

impl Parser {
    pub fn new(ast: Ast) -> Self {
        Self {
            inner: Arc::new(ParserInner {
                hooks: ParserHooks::default(),
                ast,
            }),
        }
    }

    pub fn hooks(&self) -> &ParserHooks {
        &self.inner.hooks
    }

    pub fn ast(&self) -> &Ast {
        &self.inner.ast
    }

    /// Parse the root of a view
    pub fn parse_view(&self, view: &Value) -> Result<NodeId> {
        self.parse_object(view, NodeType::View, ParseOptions::default())
            .ok_or(PlayerError::ViewParse)
    }

    /// Run `on_create_ast_node` and store whatever survives
    pub fn create_node(&self, node: Node, raw: &Value) -> Option<NodeId> {
        self.hooks()
            .on_create_ast_node
            .call(Some(node), raw)
            .map(|node| self.ast().add(node))
    }

    /// Parse one object. An object with no value and no children yields `None`.
    pub fn parse_object(
        &self,
        object: &Value,
        expected: NodeType,
        options: ParseOptions,
    ) -> Option<NodeId> {
        let node_type = self
            .hooks()
            .determine_node_type
            .call(object)
            .unwrap_or(expected);

        let request = ParseRequest {
            parser: self.clone(),
            object: object.clone(),
            node_type,
            expected,
            options,
            child: None,
        };
        if let Some(ParseOutcome::Node(node)) = self.hooks().parse_node.call(&request) {
            return node;
        }

        let (value, children) = self.parse_local(None, object, &[], node_type, options);
        if value.is_none() && children.is_empty() {
            return None;
        }

        let kind = match node_type {
            NodeType::Asset => NodeKind::Asset,
            NodeType::View => NodeKind::View,
            _ => NodeKind::Value,
        };
        let mut node = Node::new(kind).with_children(children);
        node.value = value;
        self.create_node(node, object)
    }

    fn parse_local(
        &self,
        current: Option<Value>,
        object: &Value,
        path: &[String],
        node_type: NodeType,
        options: ParseOptions,
    ) -> (Option<Value>, Vec<Child>) {
        if !object.is_object() && !object.is_array() {
            return (Some(object.clone()), Vec::new());
        }

        let local = self.hooks().on_parse_object.call(object.clone(), &node_type);
        let entries: Vec<(String, Value)> = match &local {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect(),
            _ => return (current, Vec::new()),
        };

        let mut value = current;
        let mut children = Vec::new();

        for (key, item) in entries {
            let context = ChildContext {
                path: path.to_vec(),
                key: key.clone(),
                parent: local.clone(),
            };
            let item_path = context.full_path();
            let request = ParseRequest {
                parser: self.clone(),
                object: item.clone(),
                node_type: NodeType::Value,
                expected: NodeType::Value,
                options,
                child: Some(context),
            };

            match self.hooks().parse_node.call(&request) {
                Some(ParseOutcome::Children(found)) => children.extend(found),
                Some(ParseOutcome::Node(Some(id))) => children.push(Child {
                    path: item_path,
                    value: id,
                }),
                Some(ParseOutcome::Node(None)) => {}
                None if key == ASSET_KEY && item.is_object() => {
                    if let Some(id) = self.parse_object(&item, NodeType::Asset, options) {
                        children.push(Child {
                            path: item_path,
                            value: id,
                        });
                    }
                }
                None if item.is_object() => {
                    let (next, found) = self.parse_local(value, &item, &item_path, node_type, options);
                    value = next;
                    children.extend(found);
                }
                None => value = Some(set_in(value, &item_path, item)),
            }
        }

        (value, children)
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser").field("ast", self.ast()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn view_with_nested_asset() {
        let parser = Parser::new(Ast::new());
        let root = parser
            .parse_view(&json!({
                "id": "v1",
                "type": "info",
                "title": {"asset": {"id": "t", "type": "text", "value": "Hi"}}
            }))
            .unwrap();

        let node = parser.ast().get(root).unwrap();
        assert_eq!(node.node_type(), NodeType::View);
        assert_eq!(node.value, Some(json!({"id": "v1", "type": "info"})));
        assert_eq!(node.children.len(), 1);
        assert_eq!(node.children[0].path, vec!["title", "asset"]);

        let asset = parser.ast().get(node.children[0].value).unwrap();
        assert_eq!(asset.node_type(), NodeType::Asset);
        assert_eq!(asset.asset_id(), Some("t"));
        assert_eq!(parser.ast().parent(node.children[0].value), Some(root));
    }

    #[test]
    fn nested_objects_flatten_into_value() {
        let parser = Parser::new(Ast::new());
        let root = parser
            .parse_object(
                &json!({"a": {"b": {"c": 1}}, "d": true}),
                NodeType::Value,
                ParseOptions::default(),
            )
            .unwrap();
        let node = parser.ast().get(root).unwrap();
        assert_eq!(node.value, Some(json!({"a": {"b": {"c": 1}}, "d": true})));
        assert!(node.children.is_empty());
    }

    #[test]
    fn empty_object_is_no_node() {
        let parser = Parser::new(Ast::new());
        assert!(parser
            .parse_object(&json!({}), NodeType::Value, ParseOptions::default())
            .is_none());
        assert!(matches!(
            parser.parse_view(&json!({})),
            Err(PlayerError::ViewParse)
        ));
    }

    #[test]
    fn create_hook_can_veto() {
        let parser = Parser::new(Ast::new());
        parser
            .hooks()
            .on_create_ast_node
            .tap("veto-assets", |node, _raw| {
                node.filter(|n| n.node_type() != NodeType::Asset)
            });

        let root = parser
            .parse_view(&json!({"id": "v", "body": {"asset": {"id": "gone"}}}))
            .unwrap();
        let node = parser.ast().get(root).unwrap();
        assert!(node.children.is_empty());
    }

    #[test]
    fn parse_node_can_claim_properties() {
        let parser = Parser::new(Ast::new());
        parser.hooks().parse_node.tap("claim-list", |req| {
            let child = req.child.as_ref()?;
            if child.key != "list" {
                return None;
            }
            let id = req
                .parser
                .create_node(Node::new(NodeKind::Value).with_value(json!("claimed")), &req.object);
            Some(ParseOutcome::Node(id))
        });

        let root = parser
            .parse_view(&json!({"id": "v", "list": [1, 2]}))
            .unwrap();
        let node = parser.ast().get(root).unwrap();
        assert_eq!(node.value, Some(json!({"id": "v"})));
        assert_eq!(node.children[0].path, vec!["list"]);
    }

    #[test]
    fn unclaimed_arrays_stay_static() {
        let parser = Parser::new(Ast::new());
        let root = parser.parse_view(&json!({"id": "v", "tags": ["a", "b"]})).unwrap();
        let node = parser.ast().get(root).unwrap();
        assert_eq!(node.value, Some(json!({"id": "v", "tags": ["a", "b"]})));
    }
}
