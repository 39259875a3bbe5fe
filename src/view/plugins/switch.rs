//! `staticSwitch` / `dynamicSwitch` support
//!
//! ```json
//! "title": { "dynamicSwitch": [
//!     { "case": "{{flag}} == true", "asset": { "id": "a" } },
//!     { "case": true, "asset": { "id": "b" } }
//! ] }
//! ```
//!
//! Static switches pick their branch once, at parse time. Dynamic ones are
//! re-evaluated whenever the data their cases read changes.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::expression::ExpressionContext;
use crate::util::value::is_truthy;
use crate::view::ast::{Child, Node, NodeKind, NodeType, SwitchCase};
use crate::view::instance::ViewInstance;
use crate::view::parser::{ParseOptions, ParseOutcome, ParseRequest, Parser};
use crate::view::resolver::ResolverOptions;

use super::ViewPlugin;

const STATIC_KEY: &str = "staticSwitch";
const DYNAMIC_KEY: &str = "dynamicSwitch";

fn switch_key(key: &str) -> Option<bool> {
    match key {
        STATIC_KEY => Some(false),
        DYNAMIC_KEY => Some(true),
        _ => None,
    }
}

/// `{"staticSwitch": [...]}` as a whole object
fn whole_object_switch(object: &Value) -> Option<(bool, &Vec<Value>)> {
    let map = object.as_object()?;
    if map.len() != 1 {
        return None;
    }
    let (key, cases) = map.iter().next()?;
    Some((switch_key(key)?, cases.as_array()?))
}

fn build_switch(
    parser: &Parser,
    raw: &Value,
    cases: &[Value],
    dynamic: bool,
    case_type: NodeType,
    options: ParseOptions,
) -> Option<crate::view::ast::NodeId> {
    let cases = cases
        .iter()
        .filter_map(|entry| {
            let mut body = entry.as_object()?.clone();
            let case = body.remove("case").unwrap_or(Value::Bool(true));
            let value = parser.parse_object(&Value::Object(body), case_type, options)?;
            Some(SwitchCase { case, value })
        })
        .collect();
    parser.create_node(Node::new(NodeKind::Switch { dynamic, cases }), raw)
}

fn parse_switch(req: &ParseRequest) -> Option<ParseOutcome> {
    match &req.child {
        Some(child) => {
            let dynamic = switch_key(&child.key)?;
            let cases = req.object.as_array()?;
            let id = build_switch(&req.parser, &req.object, cases, dynamic, NodeType::Value, req.options);
            // The switch stands in for the object that owns the key
            Some(ParseOutcome::Children(
                id.map(|value| Child {
                    path: child.path.clone(),
                    value,
                })
                .into_iter()
                .collect(),
            ))
        }
        None => {
            let (dynamic, cases) = whole_object_switch(&req.object)?;
            let id = build_switch(&req.parser, &req.object, cases, dynamic, req.expected, req.options);
            Some(ParseOutcome::Node(id))
        }
    }
}

/// First case whose expression is truthy
fn select_case<'a>(
    cases: &'a [SwitchCase],
    mut evaluate: impl FnMut(&Value) -> crate::error::Result<Value>,
) -> Option<&'a SwitchCase> {
    cases.iter().find(|c| match evaluate(&c.case) {
        Ok(result) => is_truthy(&result),
        Err(err) => {
            warn!(case = %c.case, error = %err, "switch case failed to evaluate");
            false
        }
    })
}

pub struct SwitchPlugin;

impl SwitchPlugin {
    fn tap_parser(parser: &Parser, options: ResolverOptions) {
        parser.hooks().parse_node.tap("switch", parse_switch);

        let ast = parser.ast().clone();
        parser
            .hooks()
            .on_create_ast_node
            .tap("switch", move |node, _raw| {
                let node = node?;
                let NodeKind::Switch {
                    dynamic: false,
                    cases,
                } = &node.kind
                else {
                    return Some(node);
                };

                let ctx = ExpressionContext::new(&*options.model, &options.binding_parser);
                let chosen = select_case(cases, |exp| options.evaluator.evaluate(exp, &ctx));
                Some(
                    chosen
                        .and_then(|c| ast.get(c.value))
                        .map(|n| (*n).clone())
                        .unwrap_or_else(Node::empty),
                )
            });
    }
}

impl ViewPlugin for SwitchPlugin {
    fn name(&self) -> &str {
        "switch"
    }

    fn apply(&self, view: &Arc<ViewInstance>) {
        let options = view.options().clone();
        view.hooks
            .parser
            .tap("switch", move |parser| Self::tap_parser(parser, options.clone()));

        view.hooks.resolver.tap("switch", |resolver| {
            let ast = resolver.ast().clone();
            resolver.hooks.before_resolve.tap("switch", move |node, ctx| {
                let id = node?;
                let Some(current) = ast.get(id) else {
                    return node;
                };
                match &current.kind {
                    NodeKind::Switch { dynamic: true, cases } => {
                        select_case(cases, |exp| ctx.evaluate(exp)).map(|c| c.value)
                    }
                    _ => node,
                }
            });
        });
    }
}
