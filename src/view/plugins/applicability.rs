//! `applicability` guards
//!
//! An object carrying an `applicability` expression only contributes to the
//! render tree while that expression does not evaluate to `false`.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::view::ast::{Child, Node, NodeKind, NodeType};
use crate::view::instance::ViewInstance;
use crate::view::parser::{ParseOutcome, ParseRequest, ASSET_KEY};

use super::ViewPlugin;

const APPLICABILITY_KEY: &str = "applicability";

fn has_guard(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.contains_key(APPLICABILITY_KEY))
}

fn parse_guarded(req: &ParseRequest) -> Option<ParseOutcome> {
    match &req.child {
        None if req.node_type == NodeType::Applicability => {
            let mut inner = req.object.as_object()?.clone();
            let expression = inner.remove(APPLICABILITY_KEY)?;
            let inner_type = match req.expected {
                NodeType::Applicability => NodeType::Value,
                other => other,
            };

            let guarded = req
                .parser
                .parse_object(&Value::Object(inner), inner_type, req.options)
                .and_then(|value| {
                    req.parser.create_node(
                        Node::new(NodeKind::Applicability { expression, value }),
                        &req.object,
                    )
                });
            Some(ParseOutcome::Node(guarded))
        }
        Some(child) if has_guard(&req.object) => {
            let expected = if child.key == ASSET_KEY {
                NodeType::Asset
            } else {
                NodeType::Value
            };
            let id = req.parser.parse_object(&req.object, expected, req.options);
            Some(ParseOutcome::Children(
                id.map(|value| Child {
                    path: child.full_path(),
                    value,
                })
                .into_iter()
                .collect(),
            ))
        }
        _ => None,
    }
}

pub struct ApplicabilityPlugin;

impl ViewPlugin for ApplicabilityPlugin {
    fn name(&self) -> &str {
        "applicability"
    }

    fn apply(&self, view: &Arc<ViewInstance>) {
        view.hooks.parser.tap("applicability", |parser| {
            parser
                .hooks()
                .determine_node_type
                .tap("applicability", |object| {
                    has_guard(object).then_some(NodeType::Applicability)
                });
            parser.hooks().parse_node.tap("applicability", parse_guarded);
        });

        view.hooks.resolver.tap("applicability", |resolver| {
            let ast = resolver.ast().clone();
            resolver
                .hooks
                .before_resolve
                .tap("applicability", move |node, ctx| {
                    let id = node?;
                    let Some(current) = ast.get(id) else {
                        return node;
                    };
                    let NodeKind::Applicability { expression, value } = &current.kind else {
                        return node;
                    };
                    match ctx.evaluate(expression) {
                        Ok(Value::Bool(false)) => None,
                        Ok(_) => Some(*value),
                        Err(err) => {
                            warn!(expression = %expression, error = %err, "applicability failed to evaluate");
                            None
                        }
                    }
                });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::plugins::testing::view_with;
    use crate::view::plugins::StringResolverPlugin;
    use serde_json::json;

    fn plugins() -> Vec<Arc<dyn ViewPlugin>> {
        vec![Arc::new(ApplicabilityPlugin), Arc::new(StringResolverPlugin)]
    }

    #[test]
    fn guarded_asset_toggles_with_data() {
        let (data, view) = view_with(
            plugins(),
            json!({
                "id": "v",
                "extra": {"asset": {"id": "e", "applicability": "{{show}}"}}
            }),
            json!({"show": false}),
        );
        assert_eq!(view.update(None).unwrap(), Some(json!({"id": "v"})));

        data.set_str([("show", json!(true))]).unwrap();
        let changed = [data.parse("show").unwrap()].into_iter().collect();
        let tree = view.update(Some(&changed)).unwrap().unwrap();
        assert_eq!(tree["extra"]["asset"], json!({"id": "e"}));
    }

    #[test]
    fn guarded_property_object() {
        let (_, view) = view_with(
            plugins(),
            json!({
                "id": "v",
                "meta": {"applicability": "1 == 2", "note": "hidden"},
                "info": {"applicability": "1 == 1", "note": "shown"}
            }),
            json!({}),
        );
        let tree = view.update(None).unwrap().unwrap();
        assert_eq!(tree, json!({"id": "v", "info": {"note": "shown"}}));
    }

    #[test]
    fn only_strict_false_hides() {
        let (_, view) = view_with(
            plugins(),
            json!({"id": "v", "x": {"asset": {"id": "x", "applicability": "{{missing}}"}}}),
            json!({}),
        );
        let tree = view.update(None).unwrap().unwrap();
        assert_eq!(tree["x"]["asset"]["id"], json!("x"));
    }
}
