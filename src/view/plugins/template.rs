//! `template` support: one definition repeated per element of a data array
//!
//! ```json
//! "template": [{ "data": "people", "output": "values",
//!                "value": { "asset": { "id": "p-_index_", "value": "{{people._index_.name}}" } } }]
//! ```
//!
//! `_index_` is replaced by the element index; nested templates use
//! `_index1_`, `_index2_`, ... Expansion happens at resolve time. Dynamic
//! templates are re-expanded when the array length changes, static ones keep
//! their first expansion.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::PlayerError;
use crate::view::ast::{Ast, Child, Node, NodeId, NodeKind, NodeType};
use crate::view::instance::ViewInstance;
use crate::view::parser::{ParseOptions, ParseOutcome, ParseRequest};
use crate::view::resolver::ResolveContext;

use super::ViewPlugin;

const TEMPLATE_KEY: &str = "template";

/// Placeholder replaced by the element index at `depth`
pub fn index_placeholder(depth: usize) -> String {
    if depth == 0 {
        "_index_".to_string()
    } else {
        format!("_index{depth}_")
    }
}

fn parse_templates(req: &ParseRequest) -> Option<ParseOutcome> {
    let child = req.child.as_ref()?;
    if child.key != TEMPLATE_KEY {
        return None;
    }
    let entries = req.object.as_array()?;

    let children = entries
        .iter()
        .filter_map(|entry| {
            let data = entry.get("data")?.as_str()?.to_string();
            let output = entry.get("output")?.as_str()?.to_string();
            let template = entry.get("value")?.clone();
            let dynamic = entry.get("dynamic").and_then(Value::as_bool).unwrap_or(false);

            let node = Node::new(NodeKind::Template {
                data,
                template,
                dynamic,
                depth: req.options.template_depth,
            });
            let value = req.parser.create_node(node, entry)?;

            let mut path = child.path.clone();
            path.push(output);
            Some(Child { path, value })
        })
        .collect();

    Some(ParseOutcome::Children(children))
}

/// Expansion cache: template node → (array length, MultiNode).
/// Static templates store `None` and keep their first expansion.
type Expansions = DashMap<NodeId, (Option<usize>, NodeId)>;

/// Release a replaced expansion, along with the expansions of templates nested in it
fn discard(ast: &Ast, cache: &Expansions, expansion: NodeId) {
    for released in ast.release(expansion) {
        if let Some((_, (_, nested))) = cache.remove(&released) {
            discard(ast, cache, nested);
        }
    }
}

pub struct TemplatePlugin {
    max_depth: usize,
}

impl TemplatePlugin {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    fn expand(
        id: NodeId,
        node: &Node,
        ctx: &ResolveContext,
        cache: &Expansions,
        max_depth: usize,
    ) -> Option<NodeId> {
        let NodeKind::Template {
            data,
            template,
            dynamic,
            depth,
        } = &node.kind
        else {
            return Some(id);
        };

        if *depth >= max_depth {
            warn!(data = %data, depth, "template nesting too deep, not expanding");
            return None;
        }

        let items = match ctx.expression_context().get(data) {
            Ok(Value::Array(items)) => items,
            Ok(Value::Null) => Vec::new(),
            Ok(_) => {
                let err = PlayerError::TemplateData {
                    binding: data.clone(),
                };
                warn!(error = %err, "skipping template");
                return None;
            }
            Err(err) => {
                warn!(data = %data, error = %err, "unable to read template data");
                return None;
            }
        };

        let length = dynamic.then_some(items.len());
        let cached = cache.get(&id).map(|entry| *entry);
        let stale = match cached {
            Some((cached_length, expansion)) if cached_length == length => return Some(expansion),
            Some((_, expansion)) => Some(expansion),
            None => None,
        };

        let raw = serde_json::to_string(template).ok()?;
        let placeholder = index_placeholder(*depth);
        let options = ParseOptions {
            template_depth: depth + 1,
        };
        let values: Vec<NodeId> = (0..items.len())
            .filter_map(|index| {
                let substituted = raw.replace(&placeholder, &index.to_string());
                let value: Value = serde_json::from_str(&substituted).ok()?;
                ctx.parser.parse_object(&value, NodeType::Value, options)
            })
            .collect();

        debug!(data = %data, count = values.len(), "expanded template");
        let expanded = ctx.parser.create_node(
            Node::new(NodeKind::MultiNode {
                values,
                overrides: false,
                flatten: false,
            }),
            template,
        )?;
        ctx.ast.set_parent(expanded, id);
        if let Some(stale) = stale {
            discard(&ctx.ast, cache, stale);
        }
        cache.insert(id, (length, expanded));
        Some(expanded)
    }
}

impl ViewPlugin for TemplatePlugin {
    fn name(&self) -> &str {
        "template"
    }

    fn apply(&self, view: &Arc<ViewInstance>) {
        view.hooks.parser.tap("template", |parser| {
            parser.hooks().parse_node.tap("template", parse_templates);
        });

        let max_depth = self.max_depth;
        view.hooks.resolver.tap("template", move |resolver| {
            let ast = resolver.ast().clone();
            let cache = Arc::new(Expansions::new());
            resolver.hooks.before_resolve.tap("template", move |node, ctx| {
                let id = node?;
                match ast.get(id) {
                    Some(current) if current.node_type() == NodeType::Template => {
                        Self::expand(id, &current, ctx, &cache, max_depth)
                    }
                    _ => node,
                }
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::plugins::testing::view_with;
    use crate::view::plugins::{MultiNodePlugin, StringResolverPlugin};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn plugins() -> Vec<Arc<dyn ViewPlugin>> {
        vec![
            Arc::new(TemplatePlugin::new(8)),
            Arc::new(MultiNodePlugin),
            Arc::new(StringResolverPlugin),
        ]
    }

    fn people_view(dynamic: bool) -> Value {
        json!({
            "id": "v",
            "template": [{
                "data": "people",
                "output": "values",
                "dynamic": dynamic,
                "value": {"asset": {"id": "p-_index_", "value": "{{people._index_.name}}"}}
            }]
        })
    }

    #[test]
    fn expands_one_node_per_element() {
        let (_, view) = view_with(
            plugins(),
            people_view(false),
            json!({"people": [{"name": "Ada"}, {"name": "Grace"}]}),
        );
        let tree = view.update(None).unwrap().unwrap();
        assert_eq!(
            tree,
            json!({
                "id": "v",
                "values": [
                    {"asset": {"id": "p-0", "value": "Ada"}},
                    {"asset": {"id": "p-1", "value": "Grace"}}
                ]
            })
        );
    }

    #[test]
    fn dynamic_template_tracks_length() {
        let (data, view) = view_with(plugins(), people_view(true), json!({"people": [{"name": "Ada"}]}));
        view.update(None).unwrap();

        data.set_str([("people.1", json!({"name": "Grace"}))]).unwrap();
        let changed = [data.parse("people").unwrap()].into_iter().collect();
        let tree = view.update(Some(&changed)).unwrap().unwrap();
        assert_eq!(tree["values"].as_array().map(Vec::len), Some(2));
        assert_eq!(tree["values"][1]["asset"]["value"], json!("Grace"));
    }

    #[test]
    fn length_changes_release_the_old_expansion() {
        let (data, view) = view_with(plugins(), people_view(true), json!({"people": [{"name": "Ada"}]}));
        view.update(None).unwrap();
        let ast = view.resolver().unwrap().ast().clone();
        let one_row = ast.live_len();

        let people = [data.parse("people").unwrap()].into_iter().collect();
        for round in 0..5 {
            data.set_str([("people.1", json!({"name": format!("Grace {round}")}))])
                .unwrap();
            view.update(Some(&people)).unwrap();
            data.delete_str("people.1").unwrap();
            let tree = view.update(Some(&people)).unwrap().unwrap();
            assert_eq!(tree["values"].as_array().map(Vec::len), Some(1));
        }
        assert_eq!(ast.live_len(), one_row);
    }

    #[test]
    fn output_appends_to_existing_values() {
        let (_, view) = view_with(
            plugins(),
            json!({
                "id": "v",
                "values": [{"asset": {"id": "static"}}],
                "template": [{"data": "xs", "output": "values", "value": "item-_index_"}]
            }),
            json!({"xs": [1]}),
        );
        let tree = view.update(None).unwrap().unwrap();
        assert_eq!(tree["values"], json!([{"asset": {"id": "static"}}, "item-0"]));
    }

    #[test]
    fn nested_templates_use_depth_placeholders() {
        assert_eq!(index_placeholder(0), "_index_");
        assert_eq!(index_placeholder(2), "_index2_");
    }

    #[test]
    fn missing_data_expands_to_nothing() {
        let (_, view) = view_with(plugins(), people_view(false), json!({}));
        let tree = view.update(None).unwrap().unwrap();
        assert_eq!(tree, json!({"id": "v", "values": []}));
    }
}
