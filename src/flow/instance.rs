//! FlowInstance - one running navigation graph
//!
//! ```text
//! start() ─► BEGIN state ─► transition(name) ─► ... ─► END ─► completion resolves
//! ```
//!
//! Transitions are synchronous. Calling `transition` while another transition
//! on the same instance is still running its hooks is rejected, not queued.

use std::fmt;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{PlayerError, Result};
use crate::hooks::{BailHook, SyncHook, WaterfallHook};

use super::types::{
    EndState, NamedState, NavigationFlow, NavigationFlowState, Transitions, WILDCARD,
};

pub type FlowResult = std::result::Result<EndState, PlayerError>;

/// Shared handle on a flow's eventual end state
pub type FlowCompletion = Shared<BoxFuture<'static, FlowResult>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionOptions {
    /// Bypass `skip_transition` vetoes
    pub force: bool,
}

impl TransitionOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

#[derive(Default)]
pub struct FlowInstanceHooks {
    /// May replace the flow before it starts
    pub before_start: WaterfallHook<NavigationFlow>,
    /// The flow's `onStart` expression
    pub on_start: SyncHook<Value>,
    /// The flow's `onEnd` expression, fired on reaching END
    pub on_end: SyncHook<Value>,
    /// `Some(true)` cancels a non-forced transition
    pub skip_transition: BailHook<Option<NamedState>, bool>,
    /// Rewrites the outgoing node; argument is the transition name
    pub before_transition: WaterfallHook<NavigationFlowState, String>,
    /// Rewrites the incoming node before it becomes current
    pub resolve_transition_node: WaterfallHook<NavigationFlowState>,
    /// `(previous, next)`
    pub transition: SyncHook<(Option<NamedState>, NamedState)>,
    pub after_transition: SyncHook<FlowInstance>,
}

struct Completion {
    sender: Option<oneshot::Sender<FlowResult>>,
    future: FlowCompletion,
}

type CompletionSlot = Arc<Mutex<Option<Completion>>>;

fn settle(slot: &CompletionSlot, result: FlowResult) {
    let sender = slot.lock().as_mut().and_then(|c| c.sender.take());
    if let Some(sender) = sender {
        // Receiver dropped means nobody is waiting any more
        let _ = sender.send(result);
    }
}

#[derive(Default)]
struct InstanceState {
    current: Option<NamedState>,
    history: Vec<String>,
    transitioning: bool,
    /// Error type raised while a transition was running, applied once it ends
    pending_error: Option<String>,
}

pub struct FlowInstance {
    pub id: String,
    pub hooks: FlowInstanceHooks,
    flow: RwLock<NavigationFlow>,
    state: Mutex<InstanceState>,
    completion: CompletionSlot,
}

impl FlowInstance {
    pub fn new(id: impl Into<String>, flow: NavigationFlow) -> Self {
        let instance = Self {
            id: id.into(),
            hooks: FlowInstanceHooks::default(),
            flow: RwLock::new(flow),
            state: Mutex::new(InstanceState::default()),
            completion: Arc::new(Mutex::new(None)),
        };

        let slot = Arc::clone(&instance.completion);
        instance
            .hooks
            .transition
            .tap("start-promise", move |(_, next)| {
                if let NavigationFlowState::End(end) = &next.value {
                    settle(&slot, Ok(end.clone()));
                }
            });

        instance
    }

    /// Start at `startState`. Calling again returns the same pending result.
    pub fn start(&self) -> FlowCompletion {
        let future = {
            let mut completion = self.completion.lock();
            if let Some(existing) = completion.as_ref() {
                warn!(flow = %self.id, "start() called on a flow that already started");
                return existing.future.clone();
            }

            let (sender, receiver) = oneshot::channel();
            let flow_id = self.id.clone();
            let future = receiver
                .map(move |received| {
                    received.unwrap_or(Err(PlayerError::FlowAbandoned { flow_id }))
                })
                .boxed()
                .shared();
            *completion = Some(Completion {
                sender: Some(sender),
                future: future.clone(),
            });
            future
        };

        let flow = self.hooks.before_start.call(self.flow(), &());
        *self.flow.write() = flow.clone();

        if let Some(on_start) = &flow.on_start {
            self.hooks.on_start.call(on_start);
        }

        let Some(initial) = flow.start_state else {
            self.fail(PlayerError::MissingStartState {
                flow_id: self.id.clone(),
            });
            return future;
        };

        if let Err(err) = self.push_history(&initial) {
            self.fail(err);
        }
        future
    }

    /// Reject the completion (no-op once settled)
    pub fn fail(&self, err: PlayerError) {
        error!(flow = %self.id, error = %err, "flow failed");
        settle(&self.completion, Err(err));
    }

    pub fn transition(&self, transition_value: &str, options: TransitionOptions) -> Result<()> {
        let current = {
            let state = self.state.lock();
            if state.transitioning {
                return Err(PlayerError::ReentrantTransition {
                    from: state
                        .current
                        .as_ref()
                        .map(|s| s.name.clone())
                        .unwrap_or_default(),
                });
            }
            state.current.clone()
        };

        let Some(current) = current else {
            return Err(PlayerError::NoCurrentState);
        };

        if current.value.is_end() {
            warn!(
                flow = %self.id,
                transition = transition_value,
                "skipping transition, already at an END state"
            );
            return Ok(());
        }

        if options.force {
            debug!(flow = %self.id, "forced transition, skipping validation checks");
        } else if self.hooks.skip_transition.call(&Some(current.clone())) == Some(true) {
            debug!(flow = %self.id, from = %current.name, "transition skipped by hook");
            return Ok(());
        }

        let node = self
            .hooks
            .before_transition
            .call(current.value.clone(), &transition_value.to_string());

        // An error raised by a before_transition tap may already have moved the flow
        if self.current_state().map(|s| s.name).as_deref() != Some(current.name.as_str()) {
            debug!(flow = %self.id, from = %current.name, "state changed during before_transition");
            return Ok(());
        }

        let Some(transitions) = node.transitions() else {
            return Err(PlayerError::NoTransitions {
                state: current.name.clone(),
            });
        };

        let Some(target) = transitions
            .get(transition_value)
            .or_else(|| transitions.get(WILDCARD))
        else {
            warn!(
                flow = %self.id,
                from = %current.name,
                transition = transition_value,
                "no transition using {transition_value} or *"
            );
            return Ok(());
        };

        debug!(flow = %self.id, from = %current.name, to = %target, "transitioning");
        self.push_history(target)
    }

    /// Jump to the state named by the `errorTransitions` entry for
    /// `error_type` (state level first, then flow level, `*` as fallback).
    ///
    /// Veto hooks are not consulted. Returns whether a target was found.
    /// Raised while a transition is running, the jump waits until that
    /// transition has made its state current (the first error wins) and
    /// `Ok(true)` is returned straight away.
    pub fn error_transition(&self, error_type: &str) -> Result<bool> {
        {
            let mut state = self.state.lock();
            if state.transitioning {
                debug!(flow = %self.id, error_type, "transition running, error transition deferred");
                state
                    .pending_error
                    .get_or_insert_with(|| error_type.to_string());
                return Ok(true);
            }
        }

        let pick = |table: Option<&Transitions>| {
            table.and_then(|t| t.get(error_type).or_else(|| t.get(WILDCARD)).cloned())
        };

        let target = self
            .current_state()
            .and_then(|s| pick(s.value.hooks().error_transitions.as_ref()))
            .or_else(|| pick(self.flow.read().error_transitions.as_ref()));

        match target {
            Some(target) => {
                debug!(flow = %self.id, error_type, to = %target, "error transition");
                self.push_history(&target)?;
                Ok(true)
            }
            None => {
                debug!(flow = %self.id, error_type, "no error transition defined");
                Ok(false)
            }
        }
    }

    fn push_history(&self, state_name: &str) -> Result<()> {
        let raw = self
            .flow
            .read()
            .states
            .get(state_name)
            .cloned()
            .ok_or_else(|| PlayerError::UnknownState {
                state: state_name.to_string(),
            })?;

        let next = match NavigationFlowState::from_value(&raw) {
            Ok(next) => next,
            Err(err) => {
                error!(flow = %self.id, state = state_name, error = %err, "malformed state, transition abandoned");
                return Ok(());
            }
        };

        let previous = {
            let mut state = self.state.lock();
            state.transitioning = true;
            state.current.clone()
        };

        let next = self.hooks.resolve_transition_node.call(next, &());
        let named = NamedState {
            name: state_name.to_string(),
            value: next,
        };

        {
            let mut state = self.state.lock();
            state.current = Some(named.clone());
            state.history.push(state_name.to_string());
        }

        if named.value.is_end() {
            let on_end = self.flow.read().on_end.clone();
            if let Some(on_end) = on_end {
                self.hooks.on_end.call(&on_end);
            }
        }

        self.hooks.transition.call(&(previous, named));
        let pending = {
            let mut state = self.state.lock();
            state.transitioning = false;
            state.pending_error.take()
        };

        // The failed state is left at once, so it never sees after_transition
        if let Some(error_type) = pending {
            if self.error_transition(&error_type)? {
                return Ok(());
            }
        }
        self.hooks.after_transition.call(self);
        Ok(())
    }

    pub fn current_state(&self) -> Option<NamedState> {
        self.state.lock().current.clone()
    }

    pub fn history(&self) -> Vec<String> {
        self.state.lock().history.clone()
    }

    pub fn is_transitioning(&self) -> bool {
        self.state.lock().transitioning
    }

    /// The (possibly `before_start`-rewritten) navigation graph
    pub fn flow(&self) -> NavigationFlow {
        self.flow.read().clone()
    }
}

impl fmt::Debug for FlowInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowInstance")
            .field("id", &self.id)
            .field("current", &self.current_state().map(|s| s.name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nav(value: Value) -> NavigationFlow {
        serde_json::from_value(value).unwrap()
    }

    fn simple() -> NavigationFlow {
        nav(json!({
            "startState": "S1",
            "S1": {"state_type": "VIEW", "ref": "v1", "transitions": {"next": "S2", "*": "E1"}},
            "S2": {"state_type": "VIEW", "ref": "v2", "transitions": {"back": "S1", "bad": "Broken", "gone": "Nowhere"}},
            "Broken": {"ref": "no type"},
            "E1": {"state_type": "END", "outcome": "done"}
        }))
    }

    #[tokio::test]
    async fn wildcard_reaches_end() {
        let instance = FlowInstance::new("f", simple());
        let done = instance.start();
        instance.transition("anything", TransitionOptions::default()).unwrap();

        let end = done.await.unwrap();
        assert_eq!(end.outcome, "done");
        assert_eq!(instance.history(), vec!["S1", "E1"]);
    }

    #[test]
    fn named_transition_beats_wildcard() {
        let instance = FlowInstance::new("f", simple());
        let _ = instance.start();
        instance.transition("next", TransitionOptions::default()).unwrap();
        assert_eq!(instance.current_state().unwrap().name, "S2");
    }

    #[test]
    fn unmatched_transition_is_ignored() {
        let instance = FlowInstance::new("f", simple());
        let _ = instance.start();
        instance.transition("next", TransitionOptions::default()).unwrap();
        instance.transition("nope", TransitionOptions::default()).unwrap();
        assert_eq!(instance.current_state().unwrap().name, "S2");
    }

    #[test]
    fn malformed_target_is_abandoned_but_unknown_target_errors() {
        let instance = FlowInstance::new("f", simple());
        let _ = instance.start();
        instance.transition("next", TransitionOptions::default()).unwrap();

        instance.transition("bad", TransitionOptions::default()).unwrap();
        assert_eq!(instance.current_state().unwrap().name, "S2");

        let err = instance
            .transition("gone", TransitionOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            PlayerError::UnknownState {
                state: "Nowhere".into()
            }
        );
    }

    #[test]
    fn transition_before_start_errors() {
        let instance = FlowInstance::new("f", simple());
        assert_eq!(
            instance.transition("next", TransitionOptions::default()),
            Err(PlayerError::NoCurrentState)
        );
    }

    #[test]
    fn skip_transition_vetoes_unless_forced() {
        let instance = FlowInstance::new("f", simple());
        instance.hooks.skip_transition.tap("block", |_| Some(true));
        let _ = instance.start();

        instance.transition("next", TransitionOptions::default()).unwrap();
        assert_eq!(instance.current_state().unwrap().name, "S1");

        instance.transition("next", TransitionOptions::forced()).unwrap();
        assert_eq!(instance.current_state().unwrap().name, "S2");
    }

    #[tokio::test]
    async fn missing_start_state_rejects() {
        let instance = FlowInstance::new("f", nav(json!({"E": {"state_type": "END"}})));
        let err = instance.start().await.unwrap_err();
        assert!(matches!(err, PlayerError::MissingStartState { .. }));
    }

    #[test]
    fn end_state_ignores_further_transitions() {
        let instance = FlowInstance::new("f", simple());
        let _ = instance.start();
        instance.transition("x", TransitionOptions::default()).unwrap();
        instance.transition("x", TransitionOptions::default()).unwrap();
        assert_eq!(instance.history(), vec!["S1", "E1"]);
    }

    #[test]
    fn before_transition_can_rewrite_table() {
        let instance = FlowInstance::new("f", simple());
        instance
            .hooks
            .before_transition
            .tap("rewrite", |mut node, _name| {
                node.set_transitions([("next".to_string(), "E1".to_string())].into());
                node
            });
        let _ = instance.start();
        instance.transition("next", TransitionOptions::default()).unwrap();
        assert_eq!(instance.current_state().unwrap().name, "E1");
    }

    #[test]
    fn error_transitions_prefer_state_level() {
        let instance = FlowInstance::new(
            "f",
            nav(json!({
                "startState": "S",
                "errorTransitions": {"*": "FlowErr"},
                "S": {"state_type": "VIEW", "ref": "v", "errorTransitions": {"net": "NetErr"}},
                "NetErr": {"state_type": "END", "outcome": "net"},
                "FlowErr": {"state_type": "END", "outcome": "flow"}
            })),
        );
        let _ = instance.start();
        assert!(instance.error_transition("net").unwrap());
        assert_eq!(instance.current_state().unwrap().name, "NetErr");
    }

    #[tokio::test]
    async fn error_raised_mid_transition_routes_after_it() {
        let instance = Arc::new(FlowInstance::new(
            "f",
            nav(json!({
                "startState": "S",
                "S": {"state_type": "VIEW", "ref": "v", "transitions": {"next": "T"}},
                "T": {"state_type": "VIEW", "ref": "t", "errorTransitions": {"*": "Recovered"}},
                "Recovered": {"state_type": "END", "outcome": "recovered"}
            })),
        ));
        let weak = Arc::downgrade(&instance);
        let routed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&routed);
        instance.hooks.resolve_transition_node.tap("fail-on-t", move |node, _| {
            if let (Some(instance), Some("t")) = (weak.upgrade(), node.ref_id()) {
                sink.lock().push(instance.error_transition("expression"));
            }
            node
        });
        let after = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&after);
        instance
            .hooks
            .after_transition
            .tap("record", move |i| seen.lock().push(i.current_state().map(|s| s.name)));

        let done = instance.start();
        instance.transition("next", TransitionOptions::default()).unwrap();

        assert_eq!(*routed.lock(), vec![Ok(true)]);
        assert_eq!(instance.history(), vec!["S", "T", "Recovered"]);
        assert_eq!(done.await.unwrap().outcome, "recovered");
        assert!(!after.lock().contains(&Some("T".to_string())));
    }

    #[tokio::test]
    async fn start_twice_shares_one_result() {
        let instance = FlowInstance::new("f", simple());
        let first = instance.start();
        let second = instance.start();
        assert_eq!(instance.history(), vec!["S1"]);

        instance.transition("x", TransitionOptions::default()).unwrap();
        assert_eq!(first.await, second.await);
    }

    #[test]
    fn transition_inside_transition_is_rejected() {
        let instance = Arc::new(FlowInstance::new("f", simple()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let weak = Arc::downgrade(&instance);
        let sink = Arc::clone(&seen);
        instance.hooks.transition.tap("reenter", move |_| {
            if let Some(instance) = weak.upgrade() {
                sink.lock().push(instance.transition("next", TransitionOptions::default()));
            }
        });

        let _ = instance.start();
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], Err(PlayerError::ReentrantTransition { .. })));
        assert_eq!(instance.current_state().unwrap().name, "S1");
    }
}
