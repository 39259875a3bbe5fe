//! FlowController - runs BEGIN and any nested sub-flows
//!
//! Keeps a stack of running instances; `current()` is always the innermost.
//! A `FLOW` state starts the referenced flow, and its END outcome is fed back
//! into the parent as a transition.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{PlayerError, Result};
use crate::hooks::SyncHook;

use super::instance::{FlowInstance, TransitionOptions};
use super::types::{EndState, NamedState, Navigation, NavigationFlowState};

#[derive(Default)]
pub struct FlowControllerHooks {
    /// A new instance was created (before it starts)
    pub flow: SyncHook<Arc<FlowInstance>>,
}

pub struct FlowController {
    pub hooks: FlowControllerHooks,
    navigation: Navigation,
    stack: Mutex<Vec<Arc<FlowInstance>>>,
}

impl FlowController {
    pub fn new(navigation: Navigation) -> Self {
        Self {
            hooks: FlowControllerHooks::default(),
            navigation,
            stack: Mutex::new(Vec::new()),
        }
    }

    pub fn navigation(&self) -> &Navigation {
        &self.navigation
    }

    /// Innermost running instance
    pub fn current(&self) -> Option<Arc<FlowInstance>> {
        self.stack.lock().last().cloned()
    }

    /// Transition the innermost instance
    pub fn transition(&self, name: &str, options: TransitionOptions) -> Result<()> {
        let current = self.current().ok_or(PlayerError::NotInFlow)?;
        current.transition(name, options)
    }

    /// Run from BEGIN until the top-level flow reaches END
    pub fn start(&self) -> BoxFuture<'_, Result<EndState>> {
        async move {
            let begin = self
                .navigation
                .begin
                .clone()
                .ok_or(PlayerError::MissingBegin)?;
            self.run(begin).await
        }
        .boxed()
    }

    fn run(&self, flow_id: String) -> BoxFuture<'_, Result<EndState>> {
        async move {
            let flow = self
                .navigation
                .flows
                .get(&flow_id)
                .cloned()
                .ok_or_else(|| PlayerError::UnknownFlow {
                    flow_id: flow_id.clone(),
                })?;

            let instance = Arc::new(FlowInstance::new(flow_id.clone(), flow));
            let (sub_flows, mut requests) = mpsc::unbounded_channel::<String>();
            instance.hooks.transition.tap(
                "flow-controller",
                move |(_, next): &(Option<NamedState>, NamedState)| {
                    if let NavigationFlowState::Flow(sub) = &next.value {
                        // Closed only once run() has returned
                        let _ = sub_flows.send(sub.ref_id.clone());
                    }
                },
            );

            self.stack.lock().push(Arc::clone(&instance));
            self.hooks.flow.call(&instance);
            info!(flow = %flow_id, depth = self.stack.lock().len(), "flow started");

            let mut completion = instance.start();
            let result = loop {
                tokio::select! {
                    biased;
                    result = &mut completion => break result,
                    Some(sub_flow) = requests.recv() => {
                        debug!(parent = %flow_id, sub_flow = %sub_flow, "entering sub-flow");
                        let outcome = match self.run(sub_flow).await {
                            Ok(end) => end.outcome,
                            Err(err) => break Err(err),
                        };
                        if let Err(err) = instance.transition(&outcome, TransitionOptions::default()) {
                            break Err(err);
                        }
                    }
                }
            };

            self.stack.lock().retain(|i| !Arc::ptr_eq(i, &instance));
            match &result {
                Ok(end) => info!(flow = %flow_id, outcome = %end.outcome, "flow ended"),
                Err(err) => info!(flow = %flow_id, error = %err, "flow failed"),
            }
            result
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn navigation(value: serde_json::Value) -> Navigation {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn missing_begin_rejects_immediately() {
        let controller = FlowController::new(navigation(json!({})));
        assert_eq!(controller.start().await, Err(PlayerError::MissingBegin));
    }

    #[tokio::test]
    async fn unknown_begin_flow_rejects() {
        let controller = FlowController::new(navigation(json!({"BEGIN": "Nope"})));
        assert!(matches!(
            controller.start().await,
            Err(PlayerError::UnknownFlow { .. })
        ));
    }

    #[test]
    fn transition_without_flow_errors() {
        let controller = FlowController::new(navigation(json!({"BEGIN": "F"})));
        assert_eq!(
            controller.transition("next", TransitionOptions::default()),
            Err(PlayerError::NotInFlow)
        );
    }

    #[tokio::test]
    async fn sub_flow_outcome_drives_parent() {
        let controller = FlowController::new(navigation(json!({
            "BEGIN": "Main",
            "Main": {
                "startState": "Sub",
                "Sub": {"state_type": "FLOW", "ref": "Child", "transitions": {"childDone": "End"}},
                "End": {"state_type": "END", "outcome": "mainDone"}
            },
            "Child": {
                "startState": "CEnd",
                "CEnd": {"state_type": "END", "outcome": "childDone"}
            }
        })));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        controller
            .hooks
            .flow
            .tap("record", move |instance| log.lock().push(instance.id.clone()));

        let end = controller.start().await.unwrap();
        assert_eq!(end.outcome, "mainDone");
        assert_eq!(*seen.lock(), vec!["Main", "Child"]);
        assert!(controller.current().is_none());
    }
}
