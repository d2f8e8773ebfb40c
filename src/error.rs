//! Error types for fleet operations

use crate::model::ModelStatus;
use crate::status::ModelAction;
use thiserror::Error;

/// Errors surfaced by the fleet core
///
/// Every failure is recovered at the component boundary that issued the call;
/// these values end up as operator-visible messages, never as panics.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FleetError {
    /// The gateway (or the local snapshot) has no model with this id
    #[error("model '{id}' not found")]
    NotFound { id: String },

    /// The action is not legal for the model's current status
    #[error("cannot {action} model '{id}' while it is {status}")]
    ActionNotAllowed {
        id: String,
        action: ModelAction,
        status: ModelStatus,
    },

    /// Transport-level failure talking to the gateway
    #[error("gateway error: {message}")]
    Gateway { message: String },

    /// The gateway answered but reported `success: false`
    #[error("gateway rejected request: {message}")]
    Rejected { message: String },

    /// A remote call exceeded its overall deadline
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Response body did not have the expected shape
    #[error("failed to decode response: {message}")]
    Decode { message: String },

    /// A bulk operation was invoked with no targets
    #[error("bulk operation requires at least one target")]
    EmptyBatch,

    #[error("validation error: {message}")]
    Validation { message: String },
}

impl FleetError {
    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::Gateway {
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// True when the remote side no longer knows the target
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for FleetError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::decode(err.to_string())
        } else {
            Self::gateway(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(err.to_string())
    }
}

/// Result alias used across the crate
pub type FleetResult<T> = Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_not_allowed_message() {
        let err = FleetError::ActionNotAllowed {
            id: "m-1".to_string(),
            action: ModelAction::Stop,
            status: ModelStatus::Starting,
        };
        assert_eq!(err.to_string(), "cannot stop model 'm-1' while it is starting");
    }

    #[test]
    fn test_is_not_found() {
        assert!(FleetError::NotFound { id: "x".into() }.is_not_found());
        assert!(!FleetError::gateway("boom").is_not_found());
        assert!(!FleetError::Timeout { secs: 30 }.is_not_found());
    }
}
