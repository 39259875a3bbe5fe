//! Flow document structures

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PlayerError, Result};

/// Event name → target state name
pub type Transitions = BTreeMap<String, String>;

/// Key used when no named transition matches
pub const WILDCARD: &str = "*";

/// A full flow document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub views: Vec<Value>,
    #[serde(default)]
    pub navigation: Navigation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl Flow {
    pub fn from_json(src: &str) -> Result<Self> {
        Ok(serde_json::from_str(src)?)
    }

    pub fn from_yaml(src: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(src)?)
    }

    /// Declared view with this id
    pub fn view(&self, id: &str) -> Option<&Value> {
        self.views
            .iter()
            .find(|v| v.get("id").and_then(Value::as_str) == Some(id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Navigation {
    #[serde(rename = "BEGIN", default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<String>,
    #[serde(rename = "onStart", default, skip_serializing_if = "Option::is_none")]
    pub on_start: Option<Value>,
    #[serde(rename = "onEnd", default, skip_serializing_if = "Option::is_none")]
    pub on_end: Option<Value>,
    #[serde(flatten)]
    pub flows: BTreeMap<String, NavigationFlow>,
}

/// One state graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationFlow {
    #[serde(rename = "startState", default, skip_serializing_if = "Option::is_none")]
    pub start_state: Option<String>,
    #[serde(rename = "onStart", default, skip_serializing_if = "Option::is_none")]
    pub on_start: Option<Value>,
    #[serde(rename = "onEnd", default, skip_serializing_if = "Option::is_none")]
    pub on_end: Option<Value>,
    #[serde(
        rename = "errorTransitions",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_transitions: Option<Transitions>,
    /// States stay raw until visited, so one malformed node can't sink the document
    #[serde(flatten)]
    pub states: BTreeMap<String, Value>,
}

/// Lifecycle expressions and error routing shared by every state kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateHooks {
    #[serde(rename = "onStart", default, skip_serializing_if = "Option::is_none")]
    pub on_start: Option<Value>,
    #[serde(rename = "onEnd", default, skip_serializing_if = "Option::is_none")]
    pub on_end: Option<Value>,
    #[serde(
        rename = "errorTransitions",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_transitions: Option<Transitions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    #[serde(rename = "ref")]
    pub ref_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transitions: Option<Transitions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
    #[serde(flatten)]
    pub hooks: StateHooks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionState {
    pub exp: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transitions: Option<Transitions>,
    #[serde(flatten)]
    pub hooks: StateHooks,
}

/// `FLOW` (sub-flow) and `EXTERNAL` states
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefState {
    #[serde(rename = "ref")]
    pub ref_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transitions: Option<Transitions>,
    #[serde(flatten)]
    pub hooks: StateHooks,
}

/// Terminal state; also the payload a finished flow resolves with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndState {
    #[serde(default)]
    pub outcome: String,
    #[serde(flatten)]
    pub hooks: StateHooks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state_type")]
pub enum NavigationFlowState {
    #[serde(rename = "VIEW")]
    View(ViewState),
    #[serde(rename = "ACTION")]
    Action(ActionState),
    #[serde(rename = "FLOW")]
    Flow(RefState),
    #[serde(rename = "EXTERNAL")]
    External(RefState),
    #[serde(rename = "END")]
    End(EndState),
}

impl NavigationFlowState {
    /// Parse a raw state node
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| PlayerError::FlowParse {
            details: format!("invalid navigation state: {e}"),
        })
    }

    pub fn state_type(&self) -> &'static str {
        match self {
            Self::View(_) => "VIEW",
            Self::Action(_) => "ACTION",
            Self::Flow(_) => "FLOW",
            Self::External(_) => "EXTERNAL",
            Self::End(_) => "END",
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Self::End(_))
    }

    pub fn transitions(&self) -> Option<&Transitions> {
        match self {
            Self::View(s) => s.transitions.as_ref(),
            Self::Action(s) => s.transitions.as_ref(),
            Self::Flow(s) | Self::External(s) => s.transitions.as_ref(),
            Self::End(_) => None,
        }
    }

    /// Replace the transition table (no-op for END)
    pub fn set_transitions(&mut self, transitions: Transitions) {
        let slot = match self {
            Self::View(s) => &mut s.transitions,
            Self::Action(s) => &mut s.transitions,
            Self::Flow(s) | Self::External(s) => &mut s.transitions,
            Self::End(_) => return,
        };
        *slot = Some(transitions);
    }

    pub fn hooks(&self) -> &StateHooks {
        match self {
            Self::View(s) => &s.hooks,
            Self::Action(s) => &s.hooks,
            Self::Flow(s) | Self::External(s) => &s.hooks,
            Self::End(s) => &s.hooks,
        }
    }

    /// `ref` of VIEW, FLOW and EXTERNAL states
    pub fn ref_id(&self) -> Option<&str> {
        match self {
            Self::View(s) => Some(&s.ref_id),
            Self::Flow(s) | Self::External(s) => Some(&s.ref_id),
            Self::Action(_) | Self::End(_) => None,
        }
    }

    /// Target for `event`, falling back to the wildcard
    pub fn target_for(&self, event: &str) -> Option<&str> {
        let transitions = self.transitions()?;
        transitions
            .get(event)
            .or_else(|| transitions.get(WILDCARD))
            .map(String::as_str)
    }
}

/// The active node of a running flow instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedState {
    pub name: String,
    pub value: NavigationFlowState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FLOW: &str = r#"{
        "id": "f",
        "views": [{"id": "v1", "type": "info"}],
        "navigation": {
            "BEGIN": "F1",
            "F1": {
                "startState": "S1",
                "S1": {"state_type": "VIEW", "ref": "v1", "transitions": {"*": "E1"}},
                "E1": {"state_type": "END", "outcome": "done"}
            }
        }
    }"#;

    #[test]
    fn parses_navigation_and_states() {
        let flow = Flow::from_json(FLOW).unwrap();
        assert_eq!(flow.navigation.begin.as_deref(), Some("F1"));
        let f1 = &flow.navigation.flows["F1"];
        assert_eq!(f1.start_state.as_deref(), Some("S1"));
        assert_eq!(f1.states.len(), 2);

        let s1 = NavigationFlowState::from_value(&f1.states["S1"]).unwrap();
        assert_eq!(s1.state_type(), "VIEW");
        assert_eq!(s1.ref_id(), Some("v1"));
        assert!(flow.view("v1").is_some());
    }

    #[test]
    fn named_transition_wins_over_wildcard() {
        let state = NavigationFlowState::from_value(&json!({
            "state_type": "ACTION",
            "exp": "",
            "transitions": {"next": "A", "*": "B"}
        }))
        .unwrap();
        assert_eq!(state.target_for("next"), Some("A"));
        assert_eq!(state.target_for("other"), Some("B"));
    }

    #[test]
    fn malformed_states_fail_to_parse() {
        assert!(NavigationFlowState::from_value(&json!({"ref": "x"})).is_err());
        assert!(NavigationFlowState::from_value(&json!("END")).is_err());
    }

    #[test]
    fn yaml_documents_parse_too() {
        let flow = Flow::from_yaml(
            "id: y\nnavigation:\n  BEGIN: F\n  F:\n    startState: E\n    E:\n      state_type: END\n      outcome: ok\n",
        )
        .unwrap();
        let end = NavigationFlowState::from_value(&flow.navigation.flows["F"].states["E"]).unwrap();
        assert!(end.is_end());
    }
}
