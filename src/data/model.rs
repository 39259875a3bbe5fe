//! Data model contract and the middleware pipeline
//!
//! ```text
//! caller → M2 → M1 → LocalModel       (last added middleware runs first)
//! ```
//!
//! A chain without a terminal model reads `None` and writes nothing.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::binding::BindingInstance;

/// Batched write: applied in order, one update record per distinct binding
pub type Transaction = Vec<(BindingInstance, Value)>;

/// Change record produced by a write
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Update {
    pub binding: BindingInstance,
    #[serde(rename = "oldValue")]
    pub old_value: Option<Value>,
    #[serde(rename = "newValue")]
    pub new_value: Option<Value>,
    /// Notify even when `old_value == new_value`
    pub force: bool,
}

impl Update {
    pub fn changed(&self) -> bool {
        self.force || self.old_value != self.new_value
    }
}

pub type Updates = Vec<Update>;

/// Capability presented by privileged writers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthToken(Uuid);

impl AuthToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataModelOptions {
    /// Mutate without scheduling a view update
    pub silent: bool,
    pub auth_token: Option<AuthToken>,
}

impl DataModelOptions {
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    pub fn with_token(token: AuthToken) -> Self {
        Self {
            auth_token: Some(token),
            ..Self::default()
        }
    }
}

/// Read/write/delete over a tree of JSON values
pub trait DataModel: Send + Sync {
    fn get(&self, binding: &BindingInstance, options: &DataModelOptions) -> Option<Value>;
    fn set(&self, transaction: Transaction, options: &DataModelOptions) -> Updates;
    /// `true` when a value was actually removed
    fn delete(&self, binding: &BindingInstance, options: &DataModelOptions) -> bool;
}

/// The three operations a middleware may intercept
#[derive(Debug, Clone)]
pub enum Operation {
    Get(BindingInstance),
    Set(Transaction),
    Delete(BindingInstance),
}

/// Result of dispatching an [`Operation`]
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(Option<Value>),
    Updates(Updates),
    /// Whether anything was removed
    Deleted(bool),
}

/// Interceptor in the data pipeline.
///
/// Every method forwards to `next` by default, so a middleware only overrides
/// what it cares about.
pub trait DataMiddleware: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn get(
        &self,
        binding: &BindingInstance,
        options: &DataModelOptions,
        next: Next<'_>,
    ) -> Option<Value> {
        next.get(binding, options)
    }

    fn set(&self, transaction: Transaction, options: &DataModelOptions, next: Next<'_>) -> Updates {
        next.set(transaction, options)
    }

    fn delete(&self, binding: &BindingInstance, options: &DataModelOptions, next: Next<'_>) -> bool {
        next.delete(binding, options)
    }
}

/// The rest of the chain, innermost last
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn DataMiddleware>],
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn DataMiddleware>]) -> Self {
        Self { chain }
    }

    /// Nothing left to call
    pub fn is_end(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn get(self, binding: &BindingInstance, options: &DataModelOptions) -> Option<Value> {
        let (middleware, rest) = self.chain.split_last()?;
        middleware.get(binding, options, Next::new(rest))
    }

    pub fn set(self, transaction: Transaction, options: &DataModelOptions) -> Updates {
        match self.chain.split_last() {
            Some((middleware, rest)) => middleware.set(transaction, options, Next::new(rest)),
            None => Vec::new(),
        }
    }

    pub fn delete(self, binding: &BindingInstance, options: &DataModelOptions) -> bool {
        match self.chain.split_last() {
            Some((middleware, rest)) => middleware.delete(binding, options, Next::new(rest)),
            None => false,
        }
    }

    pub fn dispatch(self, operation: Operation, options: &DataModelOptions) -> Outcome {
        match operation {
            Operation::Get(binding) => Outcome::Value(self.get(&binding, options)),
            Operation::Set(transaction) => Outcome::Updates(self.set(transaction, options)),
            Operation::Delete(binding) => Outcome::Deleted(self.delete(&binding, options)),
        }
    }
}

/// Data model composed of an ordered middleware list.
///
/// The first entry is innermost (normally the terminal [`LocalModel`]); each
/// later entry wraps the ones before it.
///
/// [`LocalModel`]: super::LocalModel
pub struct PipelinedDataModel {
    pipeline: RwLock<Arc<[Arc<dyn DataMiddleware>]>>,
}

impl PipelinedDataModel {
    pub fn new(pipeline: Vec<Arc<dyn DataMiddleware>>) -> Self {
        Self {
            pipeline: RwLock::new(pipeline.into()),
        }
    }

    pub fn add_middleware(&self, middleware: Arc<dyn DataMiddleware>) {
        let mut pipeline = self.pipeline.write();
        let mut next: Vec<_> = pipeline.iter().cloned().collect();
        next.push(middleware);
        *pipeline = next.into();
    }

    pub fn set_middleware(&self, pipeline: Vec<Arc<dyn DataMiddleware>>) {
        *self.pipeline.write() = pipeline.into();
    }

    /// Middleware names, innermost first
    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|m| m.name().to_string()).collect()
    }

    pub fn run(&self, operation: Operation, options: &DataModelOptions) -> Outcome {
        let pipeline = self.snapshot();
        Next::new(&pipeline).dispatch(operation, options)
    }

    fn snapshot(&self) -> Arc<[Arc<dyn DataMiddleware>]> {
        Arc::clone(&self.pipeline.read())
    }
}

impl DataModel for PipelinedDataModel {
    fn get(&self, binding: &BindingInstance, options: &DataModelOptions) -> Option<Value> {
        let pipeline = self.snapshot();
        Next::new(&pipeline).get(binding, options)
    }

    fn set(&self, transaction: Transaction, options: &DataModelOptions) -> Updates {
        let pipeline = self.snapshot();
        Next::new(&pipeline).set(transaction, options)
    }

    fn delete(&self, binding: &BindingInstance, options: &DataModelOptions) -> bool {
        let pipeline = self.snapshot();
        Next::new(&pipeline).delete(binding, options)
    }
}

impl Default for PipelinedDataModel {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for PipelinedDataModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelinedDataModel")
            .field("pipeline", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingParser;
    use serde_json::json;

    struct Passthrough;
    impl DataMiddleware for Passthrough {}

    #[test]
    fn chain_without_terminal_is_a_noop() {
        let parser = BindingParser::new();
        let model = PipelinedDataModel::new(vec![Arc::new(Passthrough)]);
        let a = parser.parse("a").unwrap();

        let updates = model.set(vec![(a.clone(), json!(1))], &DataModelOptions::default());
        assert!(updates.is_empty());
        assert_eq!(model.get(&a, &DataModelOptions::default()), None);
        assert!(!model.delete(&a, &DataModelOptions::default()));
    }

    #[test]
    fn dispatch_routes_operations() {
        let model = PipelinedDataModel::default();
        let out = model.run(
            Operation::Get(BindingInstance::root()),
            &DataModelOptions::default(),
        );
        assert_eq!(out, Outcome::Value(None));

        let out = model.run(
            Operation::Delete(BindingInstance::root()),
            &DataModelOptions::default(),
        );
        assert_eq!(out, Outcome::Deleted(false));
    }

    #[test]
    fn unchanged_updates_are_not_changes() {
        let update = Update {
            binding: BindingInstance::root(),
            old_value: Some(json!(1)),
            new_value: Some(json!(1)),
            force: false,
        };
        assert!(!update.changed());
        assert!(Update { force: true, ..update }.changed());
    }
}
