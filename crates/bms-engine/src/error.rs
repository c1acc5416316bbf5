use std::fmt;
use std::str::FromStr;

use bms_core::CoreError;
use bms_search::ExecutorError;
use bms_storage::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Contributor,
    Validator,
    Dispatcher,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Contributor => "contributor",
            Role::Validator => "validator",
            Role::Dispatcher => "dispatcher",
            Role::Admin => "admin",
        }
    }

    pub fn allows(self, action: Action) -> bool {
        match self {
            Role::Admin => true,
            Role::Contributor => matches!(
                action,
                Action::CreateOffer | Action::EditOffer | Action::SubmitOffer
            ),
            Role::Validator => matches!(action, Action::DecideOffer | Action::CancelOffer),
            Role::Dispatcher => matches!(action, Action::Dispatch | Action::CancelOffer),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contributor" => Ok(Role::Contributor),
            "validator" => Ok(Role::Validator),
            "dispatcher" => Ok(Role::Dispatcher),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Role-gated offer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateOffer,
    EditOffer,
    SubmitOffer,
    DecideOffer,
    CancelOffer,
    Dispatch,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::CreateOffer => "create offers",
            Action::EditOffer => "edit offers",
            Action::SubmitOffer => "submit offers",
            Action::DecideOffer => "approve or reject offers",
            Action::CancelOffer => "cancel offers",
            Action::Dispatch => "dispatch offers",
        })
    }
}

/// Who is performing an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub name: String,
    pub role: Role,
}

impl Caller {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    pub fn require(&self, action: Action) -> Result<(), EngineError> {
        if self.role.allows(action) {
            Ok(())
        } else {
            Err(EngineError::Forbidden {
                role: self.role,
                action,
            })
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("role {role} may not {action}")]
    Forbidden { role: Role, action: Action },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    InvalidStateTransition,
    NotFound,
    Conflict,
    Duplicate,
    Forbidden,
    ExecutorUnavailable,
    ExecutorTimeout,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::InvalidStateTransition => "invalid_state_transition",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::ExecutorUnavailable => "executor_unavailable",
            ErrorKind::ExecutorTimeout => "executor_timeout",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Core(CoreError::Validation(_)) => ErrorKind::Validation,
            EngineError::Core(CoreError::InvalidTransition { .. }) => {
                ErrorKind::InvalidStateTransition
            }
            EngineError::Store(StoreError::NotFound { .. }) => ErrorKind::NotFound,
            EngineError::Store(StoreError::Conflict { .. }) => ErrorKind::Conflict,
            EngineError::Store(StoreError::Duplicate { .. }) => ErrorKind::Duplicate,
            EngineError::Store(_) | EngineError::Internal(_) => ErrorKind::Internal,
            EngineError::Executor(ExecutorError::Unavailable(_)) => ErrorKind::ExecutorUnavailable,
            EngineError::Executor(ExecutorError::Timeout(_)) => ErrorKind::ExecutorTimeout,
            EngineError::Forbidden { .. } => ErrorKind::Forbidden,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Core(CoreError::validation(message))
    }
}
