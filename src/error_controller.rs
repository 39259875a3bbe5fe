//! ErrorController - captured runtime errors
//!
//! Captured errors never throw. Each one is recorded, becomes the current
//! error, and (unless an `on_error` tap handles it) is written to the
//! protected `errorState` namespace and routed through `errorTransitions`.
//!
//! Only the controller's own [`AuthToken`] may write `errorState`; other
//! writes are turned into no-ops by [`ErrorStateMiddleware`].

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::binding::BindingInstance;
use crate::data::{
    AuthToken, DataController, DataMiddleware, DataModelOptions, Next, Transaction, Update, Updates,
};
use crate::error::PlayerError;
use crate::flow::FlowController;
use crate::hooks::BailHook;

/// Data namespace owned by the error controller
pub const ERROR_STATE_KEY: &str = "errorState";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Fatal,
    #[default]
    Error,
    Warning,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fatal => "fatal",
            Self::Error => "error",
            Self::Warning => "warning",
        })
    }
}

/// Error category; also the key looked up in `errorTransitions`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorType(Cow<'static, str>);

impl ErrorType {
    pub const EXPRESSION: ErrorType = ErrorType(Cow::Borrowed("expression"));
    pub const BINDING: ErrorType = ErrorType(Cow::Borrowed("binding"));
    pub const VIEW: ErrorType = ErrorType(Cow::Borrowed("view"));
    pub const NAVIGATION: ErrorType = ErrorType(Cow::Borrowed("navigation"));
    pub const DATA: ErrorType = ErrorType(Cow::Borrowed("data"));
    pub const PLUGIN: ErrorType = ErrorType(Cow::Borrowed("plugin"));
    pub const UNKNOWN: ErrorType = ErrorType(Cow::Borrowed("unknown"));

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapturedError {
    pub error: PlayerError,
    pub error_type: ErrorType,
    pub severity: ErrorSeverity,
    pub metadata: Option<Value>,
}

impl CapturedError {
    /// Summary stored under `errorState`
    pub fn to_value(&self) -> Value {
        let mut summary = json!({
            "message": self.error.to_string(),
            "errorType": self.error_type.as_str(),
            "severity": self.severity.to_string(),
        });
        if let Some(code) = self.error.code() {
            summary["code"] = json!(code);
        }
        if let Some(metadata) = &self.metadata {
            summary["metadata"] = metadata.clone();
        }
        summary
    }
}

fn is_protected(binding: &BindingInstance) -> bool {
    binding
        .segments()
        .first()
        .and_then(|s| s.as_key())
        .is_some_and(|k| k == ERROR_STATE_KEY)
}

/// Turns unauthorized writes and deletes under `errorState` into no-ops
pub struct ErrorStateMiddleware {
    token: AuthToken,
}

impl ErrorStateMiddleware {
    pub fn new(token: AuthToken) -> Self {
        Self { token }
    }

    fn authorized(&self, options: &DataModelOptions) -> bool {
        options.auth_token == Some(self.token)
    }
}

impl DataMiddleware for ErrorStateMiddleware {
    fn name(&self) -> &str {
        "error-state"
    }

    fn set(&self, transaction: Transaction, options: &DataModelOptions, next: Next<'_>) -> Updates {
        if self.authorized(options) {
            return next.set(transaction, options);
        }

        let (blocked, allowed): (Transaction, Transaction) =
            transaction.into_iter().partition(|(b, _)| is_protected(b));

        let mut updates = if allowed.is_empty() {
            Vec::new()
        } else {
            next.set(allowed, options)
        };
        for (binding, _) in blocked {
            warn!(binding = %binding, "blocked write to protected errorState");
            let current = next.get(&binding, options);
            updates.push(Update {
                binding,
                old_value: current.clone(),
                new_value: current,
                force: false,
            });
        }
        updates
    }

    fn delete(&self, binding: &BindingInstance, options: &DataModelOptions, next: Next<'_>) -> bool {
        if is_protected(binding) && !self.authorized(options) {
            warn!(binding = %binding, "blocked delete of protected errorState");
            return false;
        }
        next.delete(binding, options)
    }
}

#[derive(Default)]
pub struct ErrorControllerHooks {
    /// `Some(true)` marks the error handled: no errorState write, no navigation
    pub on_error: BailHook<CapturedError, bool>,
}

pub struct ErrorController {
    pub hooks: ErrorControllerHooks,
    data: Arc<DataController>,
    flow: Arc<FlowController>,
    token: AuthToken,
    errors: RwLock<Vec<CapturedError>>,
    current: RwLock<Option<CapturedError>>,
}

impl ErrorController {
    /// Installs the `errorState` protection on `data`
    pub fn new(data: Arc<DataController>, flow: Arc<FlowController>) -> Self {
        let token = AuthToken::generate();
        data.add_middleware(Arc::new(ErrorStateMiddleware::new(token)));
        Self {
            hooks: ErrorControllerHooks::default(),
            data,
            flow,
            token,
            errors: RwLock::new(Vec::new()),
            current: RwLock::new(None),
        }
    }

    pub fn capture_error(
        &self,
        err: PlayerError,
        error_type: ErrorType,
        severity: Option<ErrorSeverity>,
        metadata: Option<Value>,
    ) -> CapturedError {
        let captured = CapturedError {
            error: err,
            error_type,
            severity: severity.unwrap_or_default(),
            metadata,
        };
        error!(
            error_type = %captured.error_type,
            severity = %captured.severity,
            error = %captured.error,
            "captured error"
        );

        self.errors.write().push(captured.clone());
        *self.current.write() = Some(captured.clone());

        if self.hooks.on_error.call(&captured) == Some(true) {
            debug!(error_type = %captured.error_type, "error handled by plugin");
            return captured;
        }

        self.write_error_state(Some(captured.to_value()));
        self.navigate(&captured.error_type);
        captured
    }

    pub fn current_error(&self) -> Option<CapturedError> {
        self.current.read().clone()
    }

    /// Every captured error, oldest first
    pub fn errors(&self) -> Vec<CapturedError> {
        self.errors.read().clone()
    }

    pub fn clear_errors(&self) {
        self.errors.write().clear();
        self.clear_current_error();
    }

    /// Drop the current error and its `errorState` entry, keeping history
    pub fn clear_current_error(&self) {
        self.current.write().take();
        self.write_error_state(None);
    }

    fn write_error_state(&self, summary: Option<Value>) {
        let binding = match self.data.parse(ERROR_STATE_KEY) {
            Ok(binding) => binding,
            Err(err) => {
                warn!(error = %err, "unable to address errorState");
                return;
            }
        };
        let options = DataModelOptions::with_token(self.token);
        match summary {
            Some(summary) => {
                self.data.set(vec![(binding, summary)], &options);
            }
            None => {
                self.data.delete(&binding, &options);
            }
        }
    }

    fn navigate(&self, error_type: &ErrorType) {
        let Some(instance) = self.flow.current() else {
            debug!(error_type = %error_type, "no running flow to route the error through");
            return;
        };
        match instance.error_transition(error_type.as_str()) {
            Ok(true) => {}
            Ok(false) => debug!(error_type = %error_type, "no errorTransitions entry"),
            Err(err) => warn!(error = %err, "error transition failed"),
        }
    }
}

impl fmt::Debug for ErrorController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorController")
            .field("errors", &self.errors.read().len())
            .field("current", &self.current.read().is_some())
            .finish()
    }
}
