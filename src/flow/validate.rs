//! Static flow validation
//!
//! Checks:
//! - navigation has a BEGIN naming a declared flow
//! - every flow has a startState that exists
//! - every state parses and every transition target exists in its flow
//! - FLOW refs name declared flows, VIEW refs name declared views
//!
//! Templated refs and targets (`{{...}}`) are only known at runtime and are skipped.

use std::fmt;

use rustc_hash::FxHashSet;
use serde::Serialize;
use thiserror::Error;

use super::types::{Flow, NavigationFlowState};

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowIssue {
    #[error("navigation has no BEGIN")]
    MissingBegin,

    #[error("BEGIN names unknown flow '{flow}'")]
    UnknownBegin { flow: String },

    #[error("flow '{flow}' has no startState")]
    MissingStartState { flow: String },

    #[error("flow '{flow}' starts at unknown state '{state}'")]
    UnknownStartState { flow: String, state: String },

    #[error("state '{flow}.{state}' is malformed: {reason}")]
    MalformedState {
        flow: String,
        state: String,
        reason: String,
    },

    #[error("state '{flow}.{state}' transitions on '{event}' to unknown state '{target}'")]
    UnknownTarget {
        flow: String,
        state: String,
        event: String,
        target: String,
    },

    #[error("state '{flow}.{state}' references unknown flow '{target}'")]
    UnknownSubflow {
        flow: String,
        state: String,
        target: String,
    },

    #[error("state '{flow}.{state}' references unknown view '{view}'")]
    UnknownView {
        flow: String,
        state: String,
        view: String,
    },
}

/// Every issue found, in document order
#[derive(Debug, Default, Clone, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<FlowIssue>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for issue in &self.issues {
            writeln!(f, "{issue}")?;
        }
        Ok(())
    }
}

fn is_templated(s: &str) -> bool {
    s.contains("{{")
}

impl Flow {
    pub fn validate(&self) -> ValidationReport {
        let mut issues = Vec::new();
        let nav = &self.navigation;

        match nav.begin.as_deref() {
            None => issues.push(FlowIssue::MissingBegin),
            Some(begin) if !nav.flows.contains_key(begin) => {
                issues.push(FlowIssue::UnknownBegin {
                    flow: begin.to_string(),
                })
            }
            Some(_) => {}
        }

        let view_ids: FxHashSet<&str> = self
            .views
            .iter()
            .filter_map(|v| v.get("id").and_then(|id| id.as_str()))
            .collect();

        for (flow_id, flow) in &nav.flows {
            match flow.start_state.as_deref() {
                None => issues.push(FlowIssue::MissingStartState {
                    flow: flow_id.clone(),
                }),
                Some(start) if !is_templated(start) && !flow.states.contains_key(start) => {
                    issues.push(FlowIssue::UnknownStartState {
                        flow: flow_id.clone(),
                        state: start.to_string(),
                    })
                }
                Some(_) => {}
            }

            for (name, raw) in &flow.states {
                let state = match NavigationFlowState::from_value(raw) {
                    Ok(state) => state,
                    Err(e) => {
                        issues.push(FlowIssue::MalformedState {
                            flow: flow_id.clone(),
                            state: name.clone(),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                for (event, target) in state.transitions().into_iter().flatten() {
                    if !is_templated(target) && !flow.states.contains_key(target) {
                        issues.push(FlowIssue::UnknownTarget {
                            flow: flow_id.clone(),
                            state: name.clone(),
                            event: event.clone(),
                            target: target.clone(),
                        });
                    }
                }

                match &state {
                    NavigationFlowState::Flow(sub)
                        if !is_templated(&sub.ref_id) && !nav.flows.contains_key(&sub.ref_id) =>
                    {
                        issues.push(FlowIssue::UnknownSubflow {
                            flow: flow_id.clone(),
                            state: name.clone(),
                            target: sub.ref_id.clone(),
                        })
                    }
                    NavigationFlowState::View(view)
                        if !is_templated(&view.ref_id)
                            && !view_ids.contains(view.ref_id.as_str()) =>
                    {
                        issues.push(FlowIssue::UnknownView {
                            flow: flow_id.clone(),
                            state: name.clone(),
                            view: view.ref_id.clone(),
                        })
                    }
                    _ => {}
                }
            }
        }

        ValidationReport { issues }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow(value: serde_json::Value) -> Flow {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn valid_flow_has_no_issues() {
        let f = flow(json!({
            "id": "ok",
            "views": [{"id": "v1"}],
            "navigation": {
                "BEGIN": "F",
                "F": {
                    "startState": "S",
                    "S": {"state_type": "VIEW", "ref": "v1", "transitions": {"*": "E"}},
                    "E": {"state_type": "END", "outcome": "done"}
                }
            }
        }));
        assert!(f.validate().is_ok());
    }

    #[test]
    fn reports_each_structural_problem() {
        let f = flow(json!({
            "id": "bad",
            "navigation": {
                "BEGIN": "Nope",
                "F": {
                    "S": {"state_type": "VIEW", "ref": "missing", "transitions": {"go": "Z"}},
                    "T": {"state_type": "FLOW", "ref": "Ghost", "transitions": {}},
                    "U": {"state_type": "VIEW", "ref": "{{dynamic}}"},
                    "X": {"ref": "no type"}
                }
            }
        }));
        let issues = f.validate().issues;

        assert!(issues.contains(&FlowIssue::UnknownBegin { flow: "Nope".into() }));
        assert!(issues.contains(&FlowIssue::MissingStartState { flow: "F".into() }));
        assert!(issues.iter().any(|i| matches!(i, FlowIssue::UnknownTarget { target, .. } if target == "Z")));
        assert!(issues.iter().any(|i| matches!(i, FlowIssue::UnknownSubflow { target, .. } if target == "Ghost")));
        assert!(issues.iter().any(|i| matches!(i, FlowIssue::UnknownView { view, .. } if view == "missing")));
        assert!(issues.iter().any(|i| matches!(i, FlowIssue::MalformedState { state, .. } if state == "X")));
        assert_eq!(issues.len(), 6);
    }
}
