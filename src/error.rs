//! Error types with fix suggestions
//!
//! Error code ranges:
//! - PLAYER-000-009: Flow document / navigation structure
//! - PLAYER-010-019: Transition runtime
//! - PLAYER-020-029: Binding parse errors
//! - PLAYER-030-039: Expression errors
//! - PLAYER-040-049: View parse / resolution errors
//! - PLAYER-050-059: Configuration and host I/O errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlayerError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
///
/// `Clone` so one failure can be handed to every awaiter of a shared
/// flow completion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlayerError {
    // ═══════════════════════════════════════════
    // FLOW STRUCTURE (000-009)
    // ═══════════════════════════════════════════
    #[error("[PLAYER-001] Failed to parse flow: {details}")]
    FlowParse { details: String },

    #[error("[PLAYER-002] Flow navigation has no BEGIN entry")]
    MissingBegin,

    #[error("[PLAYER-003] No flow definition for navigation id '{flow_id}'")]
    UnknownFlow { flow_id: String },

    #[error("[PLAYER-004] No start state found for flow '{flow_id}'")]
    MissingStartState { flow_id: String },

    #[error("[PLAYER-005] No flow definition for: {state} was found")]
    UnknownState { state: String },

    #[error("[PLAYER-006] No view with id '{view_id}'")]
    ViewNotFound { view_id: String },

    #[error("[PLAYER-007] Flow '{flow_id}' ended before reaching an END state")]
    FlowAbandoned { flow_id: String },

    // ═══════════════════════════════════════════
    // TRANSITION RUNTIME (010-019)
    // ═══════════════════════════════════════════
    #[error("[PLAYER-010] Transitioning while ongoing transition from '{from}' is in progress is not supported")]
    ReentrantTransition { from: String },

    #[error("[PLAYER-011] Cannot transition when there is no current state")]
    NoCurrentState,

    #[error("[PLAYER-012] No transitions defined for state '{state}'")]
    NoTransitions { state: String },

    #[error("[PLAYER-013] Not currently in a flow, cannot transition")]
    NotInFlow,

    #[error("[PLAYER-014] Player is not running a flow")]
    NotStarted,

    // ═══════════════════════════════════════════
    // BINDING ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[PLAYER-020] Invalid binding '{path}': {reason}")]
    BindingParse { path: String, reason: String },

    // ═══════════════════════════════════════════
    // EXPRESSION ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[PLAYER-030] Expression parse error at position {position} in '{expression}': {reason}")]
    ExpressionParse {
        expression: String,
        position: usize,
        reason: String,
    },

    #[error("[PLAYER-031] Expression evaluation failed for '{expression}': {reason}")]
    ExpressionEval { expression: String, reason: String },

    #[error("[PLAYER-032] Unknown expression function '{name}'")]
    UnknownFunction { name: String },

    // ═══════════════════════════════════════════
    // VIEW ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[PLAYER-040] Unable to parse object into a view")]
    ViewParse,

    #[error("[PLAYER-041] Template data at '{binding}' is not an array")]
    TemplateData { binding: String },

    // ═══════════════════════════════════════════
    // CONFIG / HOST (050-059)
    // ═══════════════════════════════════════════
    #[error("[PLAYER-050] Configuration error: {reason}")]
    ConfigError { reason: String },

    #[error("[PLAYER-051] IO error: {reason}")]
    Io { reason: String },

    /// Errors raised by hosts or plugins and routed through the runtime.
    #[error("{message}")]
    External { message: String },
}

impl PlayerError {
    /// Wrap an arbitrary message raised outside the core.
    pub fn external(message: impl Into<String>) -> Self {
        Self::External {
            message: message.into(),
        }
    }

    /// Stable error code (e.g. "PLAYER-006"), `None` for external errors
    pub fn code(&self) -> Option<&'static str> {
        Some(match self {
            Self::FlowParse { .. } => "PLAYER-001",
            Self::MissingBegin => "PLAYER-002",
            Self::UnknownFlow { .. } => "PLAYER-003",
            Self::MissingStartState { .. } => "PLAYER-004",
            Self::UnknownState { .. } => "PLAYER-005",
            Self::ViewNotFound { .. } => "PLAYER-006",
            Self::FlowAbandoned { .. } => "PLAYER-007",
            Self::ReentrantTransition { .. } => "PLAYER-010",
            Self::NoCurrentState => "PLAYER-011",
            Self::NoTransitions { .. } => "PLAYER-012",
            Self::NotInFlow => "PLAYER-013",
            Self::NotStarted => "PLAYER-014",
            Self::BindingParse { .. } => "PLAYER-020",
            Self::ExpressionParse { .. } => "PLAYER-030",
            Self::ExpressionEval { .. } => "PLAYER-031",
            Self::UnknownFunction { .. } => "PLAYER-032",
            Self::ViewParse => "PLAYER-040",
            Self::TemplateData { .. } => "PLAYER-041",
            Self::ConfigError { .. } => "PLAYER-050",
            Self::Io { .. } => "PLAYER-051",
            Self::External { .. } => return None,
        })
    }
}

impl From<std::io::Error> for PlayerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for PlayerError {
    fn from(e: serde_json::Error) -> Self {
        Self::FlowParse {
            details: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for PlayerError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::FlowParse {
            details: e.to_string(),
        }
    }
}

impl FixSuggestion for PlayerError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            PlayerError::FlowParse { .. } => Some("Check the flow document is valid JSON/YAML"),
            PlayerError::MissingBegin => Some("Add navigation.BEGIN naming the initial flow id"),
            PlayerError::UnknownFlow { .. } => {
                Some("Declare the flow under navigation or fix the BEGIN/FLOW ref")
            }
            PlayerError::MissingStartState { .. } => Some("Add a startState to the flow"),
            PlayerError::UnknownState { .. } => {
                Some("Transition targets must name a state in the same flow")
            }
            PlayerError::ViewNotFound { .. } => {
                Some("Declare a view with this id in views, or fix the VIEW ref")
            }
            PlayerError::FlowAbandoned { .. } => {
                Some("Keep the owning controller alive until the flow reaches END")
            }
            PlayerError::ReentrantTransition { .. } => {
                Some("Defer the transition until the current one completes")
            }
            PlayerError::NoCurrentState => Some("Call start() before transition()"),
            PlayerError::NoTransitions { .. } => Some("Add a transitions map to the state"),
            PlayerError::NotInFlow => Some("Start a flow before transitioning"),
            PlayerError::NotStarted => Some("Call Player::start with a flow first"),
            PlayerError::BindingParse { .. } => {
                Some("Use paths like foo.bar[0].baz with balanced brackets")
            }
            PlayerError::ExpressionParse { .. } => {
                Some("Check operators, quotes and {{binding}} braces are balanced")
            }
            PlayerError::ExpressionEval { .. } => {
                Some("Check the bindings referenced by the expression exist")
            }
            PlayerError::UnknownFunction { .. } => {
                Some("Register the function on the expression evaluator")
            }
            PlayerError::ViewParse => Some("Views must be non-empty objects"),
            PlayerError::TemplateData { .. } => {
                Some("Point template.data at an array in the data model")
            }
            PlayerError::ConfigError { .. } => Some("Check the config file is valid TOML"),
            PlayerError::Io { .. } => Some("Check file path and permissions"),
            PlayerError::External { .. } => None,
        }
    }
}
