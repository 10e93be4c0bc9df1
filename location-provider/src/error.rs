use std::fmt;

use zbus::zvariant::OwnedObjectPath;

/// One step of the GeoClue2 client handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeStep {
    /// Connecting to the system bus and the `GeoClue2.Manager` object
    ManagerConnect,
    /// `Manager.GetClient()`
    GetClient,
    /// Connecting to the client's `org.freedesktop.DBus.Properties` interface
    ClientPropertiesConnect,
    /// `Properties.Set(Client, "DesktopId", ..)`
    SetDesktopId,
    /// `Properties.Set(Client, "RequestedAccuracyLevel", ..)`
    SetAccuracyLevel,
    /// Connecting to the `GeoClue2.Client` object and its signals
    ClientConnect,
    /// `Client.Start()`
    Start,
}

impl HandshakeStep {
    /// Steps in the order they are performed
    pub const ORDER: [HandshakeStep; 7] = [
        HandshakeStep::ManagerConnect,
        HandshakeStep::GetClient,
        HandshakeStep::ClientPropertiesConnect,
        HandshakeStep::SetDesktopId,
        HandshakeStep::SetAccuracyLevel,
        HandshakeStep::ClientConnect,
        HandshakeStep::Start,
    ];
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeStep::ManagerConnect => "manager connect",
            HandshakeStep::GetClient => "GetClient",
            HandshakeStep::ClientPropertiesConnect => "client properties connect",
            HandshakeStep::SetDesktopId => "DesktopId set",
            HandshakeStep::SetAccuracyLevel => "RequestedAccuracyLevel set",
            HandshakeStep::ClientConnect => "client connect",
            HandshakeStep::Start => "Start",
        };
        f.write_str(name)
    }
}

/// A single call to the provider failed
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    #[error("D-Bus error: {0}")]
    Fdo(#[from] zbus::fdo::Error),

    #[error("invalid object path: {0}")]
    ObjectPath(#[from] zbus::zvariant::Error),

    /// The provider answered but refused the request
    #[error("{0}")]
    Rejected(String),
}

/// Errors from [`ProviderSession`](crate::ProviderSession) operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A handshake step failed; the session was rolled back to inactive
    #[error("GeoClue2 {step} failed: {source}")]
    Handshake {
        step: HandshakeStep,
        #[source]
        source: CallError,
    },

    /// `open` was called on a session that is already active
    #[error("GeoClue2 session is already active")]
    AlreadyActive,

    /// `Client.Stop()` failed; the handles were released anyway
    #[error("failed to stop GeoClue2 client: {0}")]
    Stop(#[source] CallError),

    /// Reading the properties of a location object failed
    #[error("failed to read location {path}: {source}")]
    LocationRead {
        path: OwnedObjectPath,
        #[source]
        source: CallError,
    },
}

impl SessionError {
    pub(crate) fn handshake(step: HandshakeStep) -> impl FnOnce(CallError) -> SessionError {
        move |source| SessionError::Handshake { step, source }
    }

    /// The handshake step that failed, if this is a handshake error
    pub fn step(&self) -> Option<HandshakeStep> {
        match self {
            SessionError::Handshake { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
