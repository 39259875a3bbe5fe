//! Models that hold nothing, for headless middleware tests

use serde_json::Value;

use crate::binding::BindingInstance;

use super::model::{DataMiddleware, DataModel, DataModelOptions, Next, Transaction, Updates};

/// Reads `None`, writes nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopModel;

impl DataModel for NoopModel {
    fn get(&self, _binding: &BindingInstance, _options: &DataModelOptions) -> Option<Value> {
        None
    }

    fn set(&self, _transaction: Transaction, _options: &DataModelOptions) -> Updates {
        Vec::new()
    }

    fn delete(&self, _binding: &BindingInstance, _options: &DataModelOptions) -> bool {
        false
    }
}

impl DataMiddleware for NoopModel {
    fn name(&self) -> &str {
        "noop"
    }

    fn get(&self, _: &BindingInstance, _: &DataModelOptions, _: Next<'_>) -> Option<Value> {
        None
    }

    fn set(&self, _: Transaction, _: &DataModelOptions, _: Next<'_>) -> Updates {
        Vec::new()
    }

    fn delete(&self, _: &BindingInstance, _: &DataModelOptions, _: Next<'_>) -> bool {
        false
    }
}
