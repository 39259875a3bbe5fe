//! Data Module - the binding-addressed data model
//!
//! - `model`: [`DataModel`] / [`DataMiddleware`] contracts and the pipeline
//! - `local`: terminal in-memory [`LocalModel`]
//! - `dependency`: read/write tracking used by the view resolver
//! - `controller`: [`DataController`], the facade hosts and plugins use
//! - `noop`: [`NoopModel`]

mod controller;
mod dependency;
mod local;
mod model;
mod noop;

pub use controller::{DataController, DataControllerHooks};
pub use dependency::{
    BindingSet, DependencyMiddleware, DependencyModel, DependencyTracker, CHILDREN_SUBSET,
    CORE_SUBSET,
};
pub use local::LocalModel;
pub use model::{
    AuthToken, DataMiddleware, DataModel, DataModelOptions, Next, Operation, Outcome,
    PipelinedDataModel, Transaction, Update, Updates,
};
pub use noop::NoopModel;
