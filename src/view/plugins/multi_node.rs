//! Arrays as MultiNodes
//!
//! An array property becomes a MultiNode whose items are parsed on their own,
//! so assets inside lists resolve (and cache) individually.

use std::sync::Arc;

use serde_json::Value;

use crate::view::ast::{Child, Node, NodeId, NodeKind, NodeType};
use crate::view::instance::ViewInstance;
use crate::view::parser::{ParseOutcome, ParseRequest};

use super::ViewPlugin;

fn build(req: &ParseRequest, items: &[Value], flatten: bool) -> Option<NodeId> {
    if items.is_empty() {
        return None;
    }
    let values = items
        .iter()
        .filter_map(|item| req.parser.parse_object(item, NodeType::Value, req.options))
        .collect();
    req.parser.create_node(
        Node::new(NodeKind::MultiNode {
            values,
            overrides: true,
            flatten,
        }),
        &req.object,
    )
}

fn parse_array(req: &ParseRequest) -> Option<ParseOutcome> {
    let items = req.object.as_array()?;
    match &req.child {
        Some(child) => {
            // Unclaimed, so the parser keeps the array as static value
            let id = build(req, items, false)?;
            Some(ParseOutcome::Children(vec![Child {
                path: child.full_path(),
                value: id,
            }]))
        }
        None => Some(ParseOutcome::Node(build(req, items, true))),
    }
}

pub struct MultiNodePlugin;

impl ViewPlugin for MultiNodePlugin {
    fn name(&self) -> &str {
        "multi-node"
    }

    fn apply(&self, view: &Arc<ViewInstance>) {
        view.hooks.parser.tap("multi-node", |parser| {
            parser.hooks().parse_node.tap("multi-node", parse_array);
        });
    }
}
