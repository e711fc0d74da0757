//! RPC error codes and error type.

use tally_core::BrokerError;

use crate::rpc::types::RpcErrorBody;

// ── Error code constants ────────────────────────────────────────────

/// Invalid or missing parameters.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// Method not found in the registry.
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
/// Event name outside the catalog.
pub const UNKNOWN_EVENT: &str = "UNKNOWN_EVENT";
/// Channel has no endpoint identity (never registered, or departed).
pub const NOT_REGISTERED: &str = "NOT_REGISTERED";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
/// Inbound frame was not valid JSON or not a valid frame.
pub const PARSE_ERROR: &str = "PARSE_ERROR";

/// RPC error type returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Required parameter missing or wrong type.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// Subscription requested for an event outside the catalog.
    #[error("Unknown event '{name}'")]
    UnknownEvent {
        /// The rejected event name.
        name: String,
    },

    /// The calling channel is not registered with the broker.
    #[error("{message}")]
    NotRegistered {
        /// Description.
        message: String,
    },

    /// Internal server error.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl RpcError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::UnknownEvent { .. } => UNKNOWN_EVENT,
            Self::NotRegistered { .. } => NOT_REGISTERED,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> RpcErrorBody {
        RpcErrorBody {
            code: self.code().to_owned(),
            message: self.to_string(),
        }
    }
}

impl From<BrokerError> for RpcError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::UnknownEvent(name) => Self::UnknownEvent { name },
            e @ BrokerError::NotRegistered(_) => Self::NotRegistered {
                message: e.to_string(),
            },
            e @ BrokerError::ChannelClosed => Self::Internal {
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::ChannelId;

    #[test]
    fn invalid_params_code() {
        let err = RpcError::InvalidParams { message: "bad".into() };
        assert_eq!(err.code(), INVALID_PARAMS);
        assert_eq!(err.to_string(), "bad");
    }

    #[test]
    fn unknown_event_message_names_event() {
        let err = RpcError::UnknownEvent { name: "tick".into() };
        assert_eq!(err.code(), UNKNOWN_EVENT);
        assert!(err.to_string().contains("tick"));
    }

    #[test]
    fn from_broker_unknown_event() {
        let err: RpcError = BrokerError::UnknownEvent("x".into()).into();
        assert_eq!(err.code(), UNKNOWN_EVENT);
    }

    #[test]
    fn from_broker_not_registered() {
        let err: RpcError = BrokerError::NotRegistered(ChannelId::from("channel_1")).into();
        assert_eq!(err.code(), NOT_REGISTERED);
        assert!(err.to_string().contains("channel_1"));
    }

    #[test]
    fn from_broker_channel_closed_is_internal() {
        let err: RpcError = BrokerError::ChannelClosed.into();
        assert_eq!(err.code(), INTERNAL_ERROR);
    }

    #[test]
    fn to_error_body() {
        let body = RpcError::Internal { message: "boom".into() }.to_error_body();
        assert_eq!(body.code, INTERNAL_ERROR);
        assert_eq!(body.message, "boom");
    }
}
