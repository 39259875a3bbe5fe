//! ViewInstance - one rendered view
//!
//! Parsing is deferred to the first `update`, after plugins have had a chance
//! to tap the parser and resolver hooks.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::data::BindingSet;
use crate::error::Result;
use crate::hooks::SyncHook;

use super::ast::Ast;
use super::parser::Parser;
use super::resolver::{Resolver, ResolverOptions};

#[derive(Default)]
pub struct ViewInstanceHooks {
    /// New render tree for the host
    pub on_update: SyncHook<Value>,
    /// Parser created for this view, before the view is parsed
    pub parser: SyncHook<Parser>,
    /// Resolver created for this view, before the first pass
    pub resolver: SyncHook<Resolver>,
}

pub struct ViewInstance {
    pub id: String,
    pub hooks: ViewInstanceHooks,
    initial_view: Value,
    options: ResolverOptions,
    resolver: Mutex<Option<Arc<Resolver>>>,
    last_update: Mutex<Option<Value>>,
}

impl ViewInstance {
    pub fn new(id: impl Into<String>, initial_view: Value, options: ResolverOptions) -> Self {
        Self {
            id: id.into(),
            hooks: ViewInstanceHooks::default(),
            initial_view,
            options,
            resolver: Mutex::new(None),
            last_update: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    pub fn initial_view(&self) -> &Value {
        &self.initial_view
    }

    pub fn resolver(&self) -> Option<Arc<Resolver>> {
        self.resolver.lock().clone()
    }

    /// Most recent render tree
    pub fn last_update(&self) -> Option<Value> {
        self.last_update.lock().clone()
    }

    /// Re-resolve; `None` means a full pass. `on_update` fires only when the tree changed.
    pub fn update(&self, changes: Option<&BindingSet>) -> Result<Option<Value>> {
        let resolver = match self.resolver() {
            Some(resolver) => resolver,
            None => self.build()?,
        };

        let update = resolver.update(changes);
        {
            let mut last = self.last_update.lock();
            if *last == update {
                debug!(view = %self.id, "view unchanged");
                return Ok(update);
            }
            *last = update.clone();
        }

        if let Some(tree) = &update {
            self.hooks.on_update.call(tree);
        }
        Ok(update)
    }

    fn build(&self) -> Result<Arc<Resolver>> {
        let parser = Parser::new(Ast::new());
        self.hooks.parser.call(&parser);

        let root = parser.parse_view(&self.initial_view)?;
        let resolver = Arc::new(Resolver::new(root, parser, self.options.clone()));
        self.hooks.resolver.call(&resolver);

        *self.resolver.lock() = Some(Arc::clone(&resolver));
        Ok(resolver)
    }
}

impl fmt::Debug for ViewInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewInstance")
            .field("id", &self.id)
            .field("built", &self.resolver.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingParser;
    use crate::data::DataController;
    use crate::error::PlayerError;
    use crate::expression::ExpressionEvaluator;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn options() -> ResolverOptions {
        let binding_parser = Arc::new(BindingParser::new());
        ResolverOptions {
            model: Arc::new(DataController::new(json!({}), Arc::clone(&binding_parser))),
            binding_parser,
            evaluator: Arc::new(ExpressionEvaluator::new()),
        }
    }

    #[test]
    fn first_update_parses_and_notifies() {
        let view = ViewInstance::new("v1", json!({"id": "v1", "type": "info"}), options());
        let parsers = Arc::new(AtomicUsize::new(0));
        let updates = Arc::new(AtomicUsize::new(0));

        let p = Arc::clone(&parsers);
        view.hooks.parser.tap("count", move |_| {
            p.fetch_add(1, Ordering::SeqCst);
        });
        let u = Arc::clone(&updates);
        view.hooks.on_update.tap("count", move |_| {
            u.fetch_add(1, Ordering::SeqCst);
        });

        let tree = view.update(None).unwrap();
        assert_eq!(tree, Some(json!({"id": "v1", "type": "info"})));
        view.update(None).unwrap();

        assert_eq!(parsers.load(Ordering::SeqCst), 1);
        assert_eq!(updates.load(Ordering::SeqCst), 1, "unchanged tree is not re-sent");
        assert_eq!(view.last_update(), tree);
    }

    #[test]
    fn empty_view_fails_to_parse() {
        let view = ViewInstance::new("v", json!({}), options());
        assert!(matches!(view.update(None), Err(PlayerError::ViewParse)));
    }
}
