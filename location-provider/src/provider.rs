//! The seam between the session state machine and the provider wire protocol

use async_trait::async_trait;
use futures::stream::BoxStream;
use zbus::zvariant::OwnedObjectPath;

use crate::accuracy::AccuracyLevel;
use crate::error::CallError;
use crate::fix::RawLocation;

/// Signals a started client can emit
#[derive(Debug, Clone, PartialEq)]
pub enum ClientSignal {
    /// `Client.LocationUpdated(old, new)`; only the new object path is kept
    LocationUpdated { new_path: OwnedObjectPath },
    /// The client's `Active` property changed
    ActiveChanged(bool),
}

/// Stream of client signals, live for as long as the client handles
pub type ClientSignals = BoxStream<'static, ClientSignal>;

/// Operations of the GeoClue2 manager/client/location protocol
///
/// Each method is one remote round-trip. The handle types are released by
/// dropping them; [`ProviderSession`](crate::ProviderSession) relies on that
/// to roll back a partially completed handshake.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Connection to the `GeoClue2.Manager` object
    type Manager: Send + Sync;
    /// Connection to the client's properties interface
    type ClientProps: Send + Sync;
    /// Connection to the `GeoClue2.Client` object
    type Client: Send + Sync;

    async fn connect_manager(&self) -> Result<Self::Manager, CallError>;

    async fn get_client(&self, manager: &Self::Manager) -> Result<OwnedObjectPath, CallError>;

    async fn connect_client_properties(
        &self,
        client_path: &OwnedObjectPath,
    ) -> Result<Self::ClientProps, CallError>;

    async fn set_desktop_id(
        &self,
        props: &Self::ClientProps,
        desktop_id: &str,
    ) -> Result<(), CallError>;

    async fn set_accuracy_level(
        &self,
        props: &Self::ClientProps,
        level: AccuracyLevel,
    ) -> Result<(), CallError>;

    async fn connect_client(&self, client_path: &OwnedObjectPath)
        -> Result<Self::Client, CallError>;

    /// Subscribe to `LocationUpdated` and `Active` changes of a client
    async fn client_signals(
        &self,
        props: &Self::ClientProps,
        client: &Self::Client,
    ) -> Result<ClientSignals, CallError>;

    async fn start(&self, client: &Self::Client) -> Result<(), CallError>;

    async fn stop(&self, client: &Self::Client) -> Result<(), CallError>;

    /// Open a transient connection to a location object and read it
    async fn read_location(&self, location_path: &OwnedObjectPath)
        -> Result<RawLocation, CallError>;
}
