use location_provider::SessionError;

use crate::identity::BusIdentity;
use crate::payload::ErrorCode;

/// Errors surfaced to the caller of a request handler
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The request payload could not be parsed
    #[error("Malformed request: {0}")]
    MalformedRequest(#[from] serde_json::Error),

    /// The provider session could not be opened or used
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The provider deactivated the session while the request was pending
    #[error("Location session was terminated by the provider")]
    SessionLost,

    /// A request arrived for an identity that was never registered
    #[error("Bus identity {0} is not registered")]
    UnknownIdentity(BusIdentity),

    /// The broker worker is gone
    #[error("Location broker is not running")]
    BrokerStopped,
}

impl ServiceError {
    /// Error code carried in the JSON reply
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ServiceError::MalformedRequest(_) => ErrorCode::MalformedRequest,
            ServiceError::Session(SessionError::Handshake { .. })
            | ServiceError::Session(SessionError::LocationRead { .. }) => {
                ErrorCode::PositionUnavailable
            }
            ServiceError::SessionLost => ErrorCode::LocationServiceOff,
            ServiceError::Session(_)
            | ServiceError::UnknownIdentity(_)
            | ServiceError::BrokerStopped => ErrorCode::Unknown,
        }
    }
}

/// Errors from the bus transport layer
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connecting to the bus or acquiring the identity's name failed
    #[error("Failed to register {identity} as {name}: {source}")]
    Registration {
        identity: BusIdentity,
        name: &'static str,
        #[source]
        source: zbus::Error,
    },

    /// Pushing a tracking update to an identity's subscribers failed
    #[error("Failed to push update to {identity}: {source}")]
    Push {
        identity: BusIdentity,
        #[source]
        source: zbus::Error,
    },

    /// The identity came up but the broker could not take its sink
    #[error("Broker refused sink for {identity}: {source}")]
    Broker {
        identity: BusIdentity,
        #[source]
        source: ServiceError,
    },
}

/// Errors in the service configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;
