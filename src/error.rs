//! Broadcasting client error types with category mapping.
//!
//! [`BroadcastError`] is the central error type of the crate. Each variant
//! maps to an [`ErrorCategory`] that decides how the core reacts to it:
//! protocol and handler errors are logged and dropped, registration errors
//! are returned to the caller, transport errors are absorbed into the
//! reconnecting state.

use crate::domain::ChannelSubscription;

/// Coarse classification of a [`BroadcastError`].
///
/// | Category      | Origin                                   | Surfaced to caller |
/// |---------------|------------------------------------------|--------------------|
/// | Protocol      | malformed event block or payload          | no (logged)        |
/// | Handler       | application handler failed                | no (logged)        |
/// | Registration  | duplicate handler or subscription         | yes                |
/// | Transport     | HTTP stream or unsubscribe request failed | no (reconnect)     |
/// | Configuration | invalid environment settings              | yes                |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The event stream or a payload could not be parsed.
    Protocol,
    /// An application handler returned an error or panicked.
    Handler,
    /// Programmer error while registering handlers.
    Registration,
    /// Network failure talking to the broadcasting server.
    Transport,
    /// Invalid client configuration.
    Configuration,
}

/// Error enum for every fallible operation of the broadcasting client.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// The `data` field of an event is not valid JSON.
    #[error("malformed data in `{event}` event: {source}")]
    MalformedData {
        /// Event type the data belonged to.
        event: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A numeric field (`id`, `retry`) could not be parsed.
    #[error("invalid `{field}` field value: {value:?}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Raw field value as received.
        value: String,
    },

    /// A well-formed JSON payload does not have the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// A `message` or `subscription` event arrived without data.
    #[error("`{0}` event carries no data")]
    MissingData(String),

    /// A handler is already registered for this subscription.
    #[error("a handler is already registered for {0}")]
    HandlerAlreadyRegistered(ChannelSubscription),

    /// The consumer already handles this subscription.
    #[error("subscription {0} is already handled by this consumer")]
    SubscriptionAlreadyHandled(ChannelSubscription),

    /// An application handler reported a failure.
    #[error("handler failed: {0}")]
    Handler(String),

    /// HTTP request failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The transport could not be started or kept running.
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BroadcastError {
    /// Returns the [`ErrorCategory`] for this variant.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedData { .. }
            | Self::InvalidField { .. }
            | Self::InvalidPayload(_)
            | Self::MissingData(_) => ErrorCategory::Protocol,
            Self::Handler(_) => ErrorCategory::Handler,
            Self::HandlerAlreadyRegistered(_) | Self::SubscriptionAlreadyHandled(_) => {
                ErrorCategory::Registration
            }
            Self::Http(_) | Self::Transport(_) => ErrorCategory::Transport,
            Self::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    /// Returns `true` if the error is a programmer error that is raised
    /// synchronously to the caller rather than logged.
    #[must_use]
    pub const fn is_caller_error(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Registration | ErrorCategory::Configuration
        )
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::SubscriptionToken;

    #[test]
    fn duplicate_registration_is_caller_error() {
        let sub = ChannelSubscription::new("room1", SubscriptionToken::new("t-1"));
        let err = BroadcastError::HandlerAlreadyRegistered(sub);
        assert_eq!(err.category(), ErrorCategory::Registration);
        assert!(err.is_caller_error());
    }

    #[test]
    fn protocol_errors_are_not_caller_errors() {
        let err = BroadcastError::InvalidField {
            field: "id",
            value: "abc".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Protocol);
        assert!(!err.is_caller_error());
    }

    #[test]
    fn malformed_data_message_names_event() {
        let Err(source) = serde_json::from_str::<serde_json::Value>("{oops") else {
            panic!("expected json error");
        };
        let err = BroadcastError::MalformedData {
            event: "message".to_string(),
            source,
        };
        assert!(err.to_string().contains("`message`"));
    }

    #[test]
    fn transport_category() {
        let err = BroadcastError::Transport("stream ended".to_string());
        assert_eq!(err.category(), ErrorCategory::Transport);
    }
}
