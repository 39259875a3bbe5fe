//! DataController - host-facing facade over the pipelined model

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::binding::{BindingInstance, BindingParser};
use crate::error::Result;
use crate::hooks::{SyncHook, WaterfallHook};

use super::local::LocalModel;
use super::model::{
    DataMiddleware, DataModel, DataModelOptions, PipelinedDataModel, Transaction, Updates,
};

#[derive(Default)]
pub struct DataControllerHooks {
    /// Before a transaction enters the pipeline
    pub on_set: SyncHook<Transaction>,
    /// Changed bindings, with the options of the write (listeners honour `silent`)
    pub on_update: SyncHook<(Updates, DataModelOptions)>,
    /// Removed binding, with the options of the delete; not fired when nothing was removed
    pub on_delete: SyncHook<(BindingInstance, DataModelOptions)>,
    /// Value for reads that found nothing
    pub resolve_default_value: WaterfallHook<Option<Value>, BindingInstance>,
    pub serialize: WaterfallHook<Value>,
}

/// Owns the data pipeline for one running flow.
///
/// Writes report only bindings whose value actually changed (or were forced).
pub struct DataController {
    pub hooks: DataControllerHooks,
    parser: Arc<BindingParser>,
    local: Arc<LocalModel>,
    model: PipelinedDataModel,
}

impl DataController {
    pub fn new(initial: Value, parser: Arc<BindingParser>) -> Self {
        Self::with_middleware(initial, parser, Vec::new())
    }

    /// `middleware` wraps the local model, last entry outermost
    pub fn with_middleware(
        initial: Value,
        parser: Arc<BindingParser>,
        middleware: Vec<Arc<dyn DataMiddleware>>,
    ) -> Self {
        let local = Arc::new(LocalModel::new(initial));
        let mut pipeline: Vec<Arc<dyn DataMiddleware>> = vec![local.clone() as Arc<dyn DataMiddleware>];
        pipeline.extend(middleware);

        Self {
            hooks: DataControllerHooks::default(),
            parser,
            local,
            model: PipelinedDataModel::new(pipeline),
        }
    }

    pub fn add_middleware(&self, middleware: Arc<dyn DataMiddleware>) {
        self.model.add_middleware(middleware);
    }

    pub fn parser(&self) -> &Arc<BindingParser> {
        &self.parser
    }

    pub fn model(&self) -> &PipelinedDataModel {
        &self.model
    }

    /// Parse a path; nested `{{...}}` segments read the current data
    pub fn parse(&self, path: &str) -> Result<BindingInstance> {
        let read = |b: &BindingInstance| self.get(b, &DataModelOptions::default());
        self.parser.parse_with(path, &read)
    }

    pub fn get(&self, binding: &BindingInstance, options: &DataModelOptions) -> Option<Value> {
        let value = self.model.get(binding, options);
        if value.is_some() {
            return value;
        }
        self.hooks.resolve_default_value.call(None, binding)
    }

    pub fn set(&self, transaction: Transaction, options: &DataModelOptions) -> Updates {
        if transaction.is_empty() {
            return Vec::new();
        }
        self.hooks.on_set.call(&transaction);

        let updates: Updates = self
            .model
            .set(transaction, options)
            .into_iter()
            .filter(|update| {
                let changed = update.changed();
                if !changed {
                    debug!(binding = %update.binding, "skipping update, value unchanged");
                }
                changed
            })
            .collect();

        if !updates.is_empty() {
            self.hooks.on_update.call(&(updates.clone(), options.clone()));
        }
        updates
    }

    pub fn delete(&self, binding: &BindingInstance, options: &DataModelOptions) -> bool {
        let removed = self.model.delete(binding, options);
        if removed {
            self.hooks.on_delete.call(&(binding.clone(), options.clone()));
        } else {
            debug!(binding = %binding, "skipping delete notification, nothing removed");
        }
        removed
    }

    pub fn get_str(&self, path: &str) -> Result<Option<Value>> {
        let binding = self.parse(path)?;
        Ok(self.get(&binding, &DataModelOptions::default()))
    }

    pub fn set_str<I, S>(&self, items: I) -> Result<Updates>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        self.set_str_with(items, &DataModelOptions::default())
    }

    pub fn set_str_with<I, S>(&self, items: I, options: &DataModelOptions) -> Result<Updates>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let transaction = items
            .into_iter()
            .map(|(path, value)| Ok((self.parse(path.as_ref())?, value)))
            .collect::<Result<Transaction>>()?;
        Ok(self.set(transaction, options))
    }

    pub fn delete_str(&self, path: &str) -> Result<()> {
        let binding = self.parse(path)?;
        self.delete(&binding, &DataModelOptions::default());
        Ok(())
    }

    /// Current data, as the host should persist it
    pub fn serialize(&self) -> Value {
        self.hooks.serialize.call(self.local.snapshot(), &())
    }
}

impl DataModel for DataController {
    fn get(&self, binding: &BindingInstance, options: &DataModelOptions) -> Option<Value> {
        DataController::get(self, binding, options)
    }

    fn set(&self, transaction: Transaction, options: &DataModelOptions) -> Updates {
        DataController::set(self, transaction, options)
    }

    fn delete(&self, binding: &BindingInstance, options: &DataModelOptions) -> bool {
        DataController::delete(self, binding, options)
    }
}
