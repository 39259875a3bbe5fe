//! Player - runs declarative flow documents: navigation, data and live views

pub mod binding;
pub mod config;
pub mod data;
pub mod error;
pub mod error_controller;
pub mod event_log;
pub mod expression;
pub mod flow;
pub mod hooks;
pub mod player;
pub mod scheduler;
pub mod string_resolver;
pub mod util;
pub mod view;

pub use binding::{BindingInstance, BindingParser};
pub use config::PlayerConfig;
pub use data::{DataController, DataMiddleware, DataModelOptions};
pub use error::{FixSuggestion, PlayerError, Result};
pub use error_controller::{CapturedError, ErrorController, ErrorSeverity, ErrorType};
pub use event_log::{Event, EventEmitter, EventKind, EventLog};
pub use expression::ExpressionEvaluator;
pub use flow::{EndState, Flow, FlowController, FlowInstance};
pub use hooks::{BailHook, SyncHook, WaterfallHook};
pub use player::{CompletedState, Controllers, Player, PlayerFlowState, PlayerHooks, PlayerPlugin};
pub use scheduler::TaskQueue;
pub use view::{ViewController, ViewInstance};
