//! Interpolates `{{binding}}` and `@[exp]@` refs in node values

use std::sync::Arc;

use tracing::warn;

use crate::string_resolver::{SKIPPED_PROPERTIES, STRING_RESOLVER};
use crate::view::ast::NodeKind;
use crate::view::instance::ViewInstance;

use super::ViewPlugin;

pub struct StringResolverPlugin;

impl ViewPlugin for StringResolverPlugin {
    fn name(&self) -> &str {
        "string-resolver"
    }

    fn apply(&self, view: &Arc<ViewInstance>) {
        view.hooks.resolver.tap("string-resolver", |resolver| {
            resolver.hooks.resolve.tap("string-resolver", |value, ctx| {
                let node = ctx.resolved_node()?;
                match node.kind {
                    NodeKind::Empty => None,
                    NodeKind::Asset | NodeKind::View | NodeKind::Value => {
                        let value = value?;
                        let resolved = STRING_RESOLVER.resolve_value(
                            &value,
                            &ctx.expression_context(),
                            &ctx.evaluator,
                            SKIPPED_PROPERTIES,
                        );
                        match resolved {
                            Ok(resolved) => Some(resolved),
                            Err(err) => {
                                warn!(node = %ctx.original, error = %err, "unable to resolve data refs");
                                Some(value)
                            }
                        }
                    }
                    _ => value,
                }
            });
        });
    }
}
