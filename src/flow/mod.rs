//! Flow Module - navigation state machines
//!
//! - `types`: the flow document (serde)
//! - `instance`: [`FlowInstance`], one running state graph
//! - `controller`: [`FlowController`], BEGIN plus nested sub-flows
//! - `validate`: static checks on a document

mod controller;
mod instance;
mod types;
mod validate;

pub use controller::{FlowController, FlowControllerHooks};
pub use instance::{
    FlowCompletion, FlowInstance, FlowInstanceHooks, FlowResult, TransitionOptions,
};
pub use types::{
    ActionState, EndState, Flow, NamedState, Navigation, NavigationFlow, NavigationFlowState,
    RefState, StateHooks, Transitions, ViewState, WILDCARD,
};
pub use validate::{FlowIssue, ValidationReport};
