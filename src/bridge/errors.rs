//! Typed errors for the bridge façade

use thiserror::Error;

use crate::core::{ChatMode, Feature, SendError};
use crate::llm::RouterError;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The current mode needs a feature that is switched off
    #[error("{} mode requires the {feature} feature, which is disabled", mode.label())]
    FeatureDisabled { mode: ChatMode, feature: Feature },

    /// Rejected by validation before any I/O
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Model override with no provider mapping
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Completion(#[from] RouterError),
}

impl BridgeError {
    /// Rejections raised before the message reached the delivery pipeline
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BridgeError::FeatureDisabled { .. } | BridgeError::InvalidMessage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_disabled_message() {
        let err = BridgeError::FeatureDisabled {
            mode: ChatMode::Code,
            feature: Feature::CodeAssistant,
        };
        assert_eq!(
            err.to_string(),
            "Code mode requires the code_assistant feature, which is disabled"
        );
        assert!(err.is_validation());
    }

    #[test]
    fn test_send_error_is_transparent() {
        let err: BridgeError = SendError::RateLimited { limit: 2 }.into();
        assert_eq!(err.to_string(), "Rate limit exceeded: 2 messages per minute");
        assert!(!err.is_validation());
    }
}
