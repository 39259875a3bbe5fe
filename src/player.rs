//! Player - runs one flow document end to end
//!
//! ```text
//! Player::start(flow)
//!   ├─ DataController   (flow.data + errorState protection)
//!   ├─ FlowController   (BEGIN, sub-flows)
//!   ├─ ViewController   (VIEW states → ViewInstance → render tree)
//!   └─ ErrorController  (captured errors, errorTransitions)
//! ```
//!
//! The player owns the deferred task queue; while a flow runs, `start` flushes
//! it whenever something is deferred. Hosts driving the player without an
//! executor call [`Player::flush`] after each batch of writes.

use std::fmt;
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::binding::BindingParser;
use crate::config::PlayerConfig;
use crate::data::{DataController, DataModelOptions, Updates};
use crate::error::{PlayerError, Result};
use crate::error_controller::{CapturedError, ErrorController, ErrorType};
use crate::event_log::{EventEmitter, EventKind, NoopEmitter};
use crate::expression::{ExpressionContext, ExpressionEvaluator};
use crate::flow::{
    EndState, Flow, FlowController, FlowInstance, NamedState, NavigationFlowState,
    TransitionOptions, WILDCARD,
};
use crate::hooks::{SyncHook, WaterfallHook};
use crate::scheduler::TaskQueue;
use crate::string_resolver::STRING_RESOLVER;
use crate::util::value::to_display_string;
use crate::view::plugins::TransformRegistry;
use crate::view::{default_plugins, ViewController, ViewInstance};

/// Extends a [`Player`]; applied once, at construction
pub trait PlayerPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, player: &Player);
}

/// Everything built for one running flow
#[derive(Clone)]
pub struct Controllers {
    pub flow: Arc<FlowController>,
    pub view: Arc<ViewController>,
    pub data: Arc<DataController>,
    pub expression: Arc<ExpressionEvaluator>,
    pub error: Arc<ErrorController>,
    pub binding_parser: Arc<BindingParser>,
}

impl fmt::Debug for Controllers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controllers")
            .field("view", &self.view)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedState {
    pub flow_id: String,
    pub end_state: EndState,
    pub data: Value,
}

#[derive(Debug, Clone)]
pub enum PlayerFlowState {
    NotStarted,
    InProgress {
        flow_id: String,
        controllers: Controllers,
    },
    Completed(CompletedState),
    Error {
        flow_id: String,
        error: PlayerError,
    },
}

impl PlayerFlowState {
    pub fn status(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::InProgress { .. } => "in-progress",
            Self::Completed(_) => "completed",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Default)]
pub struct PlayerHooks {
    pub flow_controller: SyncHook<Arc<FlowController>>,
    pub view_controller: SyncHook<Arc<ViewController>>,
    /// Every view the view controller creates
    pub view: SyncHook<Arc<ViewInstance>>,
    pub expression_evaluator: SyncHook<Arc<ExpressionEvaluator>>,
    pub data_controller: SyncHook<Arc<DataController>>,
    pub error_controller: SyncHook<Arc<ErrorController>>,
    pub state: SyncHook<PlayerFlowState>,
    /// The (possibly rewritten) flow about to start
    pub on_start: SyncHook<Flow>,
    pub on_end: SyncHook<CompletedState>,
    /// Rewrite the flow document before anything is built from it
    pub resolve_flow_content: WaterfallHook<Flow>,
}

pub struct Player {
    pub hooks: Arc<PlayerHooks>,
    config: PlayerConfig,
    transforms: Arc<TransformRegistry>,
    queue: Arc<TaskQueue>,
    events: Arc<dyn EventEmitter>,
    state: RwLock<PlayerFlowState>,
}

impl Player {
    pub fn new(config: PlayerConfig, plugins: Vec<Arc<dyn PlayerPlugin>>) -> Self {
        Self::with_emitter(config, plugins, Arc::new(NoopEmitter))
    }

    /// Player that records its run into `events`
    pub fn with_emitter(
        config: PlayerConfig,
        plugins: Vec<Arc<dyn PlayerPlugin>>,
        events: Arc<dyn EventEmitter>,
    ) -> Self {
        let player = Self {
            hooks: Arc::new(PlayerHooks::default()),
            config,
            transforms: Arc::new(TransformRegistry::new()),
            queue: Arc::new(TaskQueue::new()),
            events,
            state: RwLock::new(PlayerFlowState::NotStarted),
        };
        for plugin in &plugins {
            debug!(plugin = plugin.name(), "applying player plugin");
            plugin.apply(&player);
        }
        player
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Asset transforms applied to every view
    pub fn transforms(&self) -> &Arc<TransformRegistry> {
        &self.transforms
    }

    pub fn state(&self) -> PlayerFlowState {
        self.state.read().clone()
    }

    /// Controllers of the running flow
    pub fn controllers(&self) -> Option<Controllers> {
        match &*self.state.read() {
            PlayerFlowState::InProgress { controllers, .. } => Some(controllers.clone()),
            _ => None,
        }
    }

    /// Run deferred work (batched view updates); returns how many tasks ran
    pub fn flush(&self) -> usize {
        self.queue.flush()
    }

    /// Transition the innermost running flow
    pub fn transition(&self, name: &str) -> Result<()> {
        let controllers = self.controllers().ok_or(PlayerError::NotStarted)?;
        controllers.flow.transition(name, TransitionOptions::default())
    }

    /// Host write into the running flow's data
    pub fn set_data(&self, path: &str, value: Value) -> Result<Updates> {
        let controllers = self.controllers().ok_or(PlayerError::NotStarted)?;
        controllers.data.set_str([(path, value)])
    }

    /// Start `flow`, resolving once its top-level navigation reaches END
    pub fn start(&self, flow: Flow) -> BoxFuture<'_, Result<CompletedState>> {
        async move {
            let flow = self.hooks.resolve_flow_content.call(flow, &());
            let flow_id = flow.id.clone();
            self.hooks.on_start.call(&flow);
            info!(flow = %flow_id, "player starting flow");

            let controllers = self.setup(&flow);
            self.set_state(PlayerFlowState::InProgress {
                flow_id: flow_id.clone(),
                controllers: controllers.clone(),
            });

            let bridge = FlowBridge::new(&controllers, Arc::clone(&self.events));
            if let Some(on_start) = &flow.navigation.on_start {
                bridge.evaluate(on_start);
            }

            let flow_controller = Arc::clone(&controllers.flow);
            let mut run = flow_controller.start();
            let result = loop {
                tokio::select! {
                    biased;
                    result = &mut run => break result,
                    _ = self.queue.notified() => {
                        self.queue.flush();
                    }
                }
            };
            self.queue.flush();

            match result {
                Ok(end_state) => {
                    if let Some(on_end) = &flow.navigation.on_end {
                        bridge.evaluate(on_end);
                    }
                    let completed = CompletedState {
                        flow_id,
                        data: controllers.data.serialize(),
                        end_state,
                    };
                    self.events.emit(EventKind::PlayerCompleted {
                        flow_id: completed.flow_id.clone(),
                        outcome: completed.end_state.outcome.clone(),
                        data: completed.data.clone(),
                    });
                    info!(flow = %completed.flow_id, outcome = %completed.end_state.outcome, "flow completed");
                    self.set_state(PlayerFlowState::Completed(completed.clone()));
                    self.hooks.on_end.call(&completed);
                    Ok(completed)
                }
                Err(error) => {
                    self.events.emit(EventKind::PlayerFailed {
                        error: error.to_string(),
                    });
                    warn!(flow = %flow_id, error = %error, "flow failed");
                    self.set_state(PlayerFlowState::Error {
                        flow_id,
                        error: error.clone(),
                    });
                    Err(error)
                }
            }
        }
        .boxed()
    }

    fn set_state(&self, state: PlayerFlowState) {
        debug!(status = state.status(), "player state");
        *self.state.write() = state.clone();
        self.hooks.state.call(&state);
    }

    fn setup(&self, flow: &Flow) -> Controllers {
        let binding_parser = Arc::new(BindingParser::new());
        let data = Arc::new(DataController::new(
            flow.data.clone().unwrap_or_else(|| json!({})),
            Arc::clone(&binding_parser),
        ));
        let expression = Arc::new(ExpressionEvaluator::new());
        let flow_controller = Arc::new(FlowController::new(flow.navigation.clone()));
        let error = Arc::new(ErrorController::new(
            Arc::clone(&data),
            Arc::clone(&flow_controller),
        ));

        let errors = Arc::downgrade(&error);
        expression.hooks.on_error.tap("player", move |err| {
            let errors = errors.upgrade()?;
            errors.capture_error(err.clone(), ErrorType::EXPRESSION, None, None);
            Some(true)
        });

        let events = Arc::clone(&self.events);
        error.hooks.on_error.tap("player-events", move |captured: &CapturedError| {
            events.emit(EventKind::ErrorCaptured {
                error_type: captured.error_type.to_string(),
                severity: captured.severity.to_string(),
                message: captured.error.to_string(),
            });
            None
        });

        let events = Arc::clone(&self.events);
        data.hooks
            .on_update
            .tap("player-events", move |(updates, _): &(Updates, DataModelOptions)| {
                events.emit(EventKind::DataUpdated {
                    bindings: updates.iter().map(|u| u.binding.to_string()).collect(),
                });
            });

        let view = ViewController::new(
            &flow.views,
            &flow_controller,
            Arc::clone(&data),
            Arc::clone(&expression),
            Arc::clone(&self.queue),
            default_plugins(Arc::clone(&self.transforms), self.config.max_template_depth),
            self.config.view_options(),
        );

        let controllers = Controllers {
            flow: flow_controller,
            view,
            data,
            expression,
            error,
            binding_parser,
        };

        let bridge = FlowBridge::new(&controllers, Arc::clone(&self.events));
        controllers
            .flow
            .hooks
            .flow
            .tap("player", move |instance| bridge.attach(instance));

        let events = Arc::clone(&self.events);
        let hooks = Arc::clone(&self.hooks);
        controllers.view.hooks.view.tap("player", move |view| {
            let events = Arc::clone(&events);
            let view_id: Arc<str> = Arc::from(view.id.as_str());
            view.hooks.on_update.tap("player-events", move |tree| {
                events.emit(EventKind::ViewUpdated {
                    view_id: Arc::clone(&view_id),
                    view: tree.clone(),
                });
            });
            hooks.view.call(view);
        });

        self.hooks.data_controller.call(&controllers.data);
        self.hooks.expression_evaluator.call(&controllers.expression);
        self.hooks.flow_controller.call(&controllers.flow);
        self.hooks.error_controller.call(&controllers.error);
        self.hooks.view_controller.call(&controllers.view);
        controllers
    }
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("status", &self.state.read().status())
            .field("config", &self.config)
            .field("queue", &self.queue)
            .finish()
    }
}

/// Lifecycle expressions, templated transitions and ACTION states for every
/// flow instance the player runs
#[derive(Clone)]
struct FlowBridge {
    evaluator: Arc<ExpressionEvaluator>,
    data: Arc<DataController>,
    errors: Weak<ErrorController>,
    events: Arc<dyn EventEmitter>,
}

impl FlowBridge {
    fn new(controllers: &Controllers, events: Arc<dyn EventEmitter>) -> Self {
        Self {
            evaluator: Arc::clone(&controllers.expression),
            data: Arc::clone(&controllers.data),
            errors: Arc::downgrade(&controllers.error),
            events,
        }
    }

    fn evaluate(&self, exp: &Value) -> Option<Value> {
        let ctx = ExpressionContext::new(&*self.data, self.data.parser());
        match self.evaluator.evaluate(exp, &ctx) {
            Ok(value) => Some(value),
            Err(err) => {
                match self.errors.upgrade() {
                    Some(errors) => {
                        errors.capture_error(err, ErrorType::EXPRESSION, None, None);
                    }
                    None => warn!(error = %err, "expression failed"),
                }
                None
            }
        }
    }

    fn resolve_target(&self, target: &str) -> String {
        let ctx = ExpressionContext::new(&*self.data, self.data.parser());
        match STRING_RESOLVER.resolve_string(target, &ctx, &self.evaluator) {
            Ok(resolved) => to_display_string(&resolved).into_owned(),
            Err(err) => {
                warn!(target, error = %err, "unable to resolve transition target");
                target.to_string()
            }
        }
    }

    /// Matched transition: evaluate the state's `onEnd`, resolve a templated target
    fn before_transition(&self, mut state: NavigationFlowState, name: &str) -> NavigationFlowState {
        let Some(transitions) = state.transitions().cloned() else {
            return state;
        };
        let key = if transitions.contains_key(name) {
            name
        } else {
            WILDCARD
        };
        let Some(target) = transitions.get(key) else {
            return state;
        };

        if let Some(on_end) = &state.hooks().on_end {
            self.evaluate(on_end);
        }

        if STRING_RESOLVER.has_refs(target) {
            let resolved = self.resolve_target(target);
            debug!(from = %target, to = %resolved, "resolved templated transition");
            let mut transitions = transitions.clone();
            transitions.insert(key.to_string(), resolved);
            state.set_transitions(transitions);
        }
        state
    }

    /// Evaluate an ACTION state's `exp` and follow the transition it names
    fn run_action(&self, instance: &FlowInstance) {
        let Some(NamedState {
            value: NavigationFlowState::Action(action),
            name,
        }) = instance.current_state()
        else {
            return;
        };
        let Some(result) = self.evaluate(&action.exp) else {
            return;
        };
        // An error transition may already have moved the flow on
        if instance.current_state().map(|s| s.name).as_deref() != Some(name.as_str()) {
            return;
        }
        let event = to_display_string(&result).into_owned();
        debug!(state = %name, event = %event, "action evaluated");
        if let Err(err) = instance.transition(&event, TransitionOptions::default()) {
            instance.fail(err);
        }
    }

    fn attach(&self, instance: &Arc<FlowInstance>) {
        let flow_id: Arc<str> = Arc::from(instance.id.as_str());
        self.events.emit(EventKind::FlowStarted {
            flow_id: Arc::clone(&flow_id),
        });

        let bridge = self.clone();
        instance.hooks.on_start.tap("player", move |exp| {
            bridge.evaluate(exp);
        });
        let bridge = self.clone();
        instance.hooks.on_end.tap("player", move |exp| {
            bridge.evaluate(exp);
        });

        let bridge = self.clone();
        instance
            .hooks
            .before_transition
            .tap("player", move |state, name| bridge.before_transition(state, name));

        let bridge = self.clone();
        instance
            .hooks
            .resolve_transition_node
            .tap("player", move |state, _| {
                if let Some(on_start) = &state.hooks().on_start {
                    bridge.evaluate(on_start);
                }
                state
            });

        let events = Arc::clone(&self.events);
        instance.hooks.transition.tap(
            "player-events",
            move |(previous, next): &(Option<NamedState>, NamedState)| {
                events.emit(EventKind::Transitioned {
                    flow_id: Arc::clone(&flow_id),
                    from: previous.as_ref().map(|s| s.name.clone()),
                    to: next.name.clone(),
                });
                if let NavigationFlowState::End(end) = &next.value {
                    events.emit(EventKind::FlowEnded {
                        flow_id: Arc::clone(&flow_id),
                        outcome: end.outcome.clone(),
                    });
                }
            },
        );

        let bridge = self.clone();
        instance
            .hooks
            .after_transition
            .tap("player", move |instance| bridge.run_action(instance));
    }
}
