//! [`Provider`] implementation backed by the GeoClue2 service on the system bus

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::OnceCell;
use zbus::fdo::PropertiesProxy;
use zbus::names::InterfaceName;
use zbus::zvariant::{OwnedObjectPath, Value};
use zbus::Connection;

use crate::accuracy::AccuracyLevel;
use crate::error::CallError;
use crate::fix::RawLocation;
use crate::provider::{ClientSignal, ClientSignals, Provider};
use crate::proxies::{
    ClientProxy, LocationProxy, ManagerProxy, CLIENT_INTERFACE, GEOCLUE_SERVICE,
};

/// GeoClue2 over D-Bus
///
/// The system bus connection is established lazily by the first
/// [`connect_manager`](Provider::connect_manager) call, so an unreachable bus
/// is reported as a manager-connect failure.
#[derive(Debug, Default)]
pub struct GeoClueProvider {
    connection: OnceCell<Connection>,
}

impl GeoClueProvider {
    /// Create a provider that connects to the system bus on first use
    pub fn new() -> Self {
        Self::default()
    }

    async fn connection(&self) -> Result<&Connection, CallError> {
        self.connection
            .get_or_try_init(|| async { Connection::system().await.map_err(CallError::from) })
            .await
    }
}

fn client_interface() -> InterfaceName<'static> {
    InterfaceName::from_static_str_unchecked(CLIENT_INTERFACE)
}

#[async_trait]
impl Provider for GeoClueProvider {
    type Manager = ManagerProxy<'static>;
    type ClientProps = PropertiesProxy<'static>;
    type Client = ClientProxy<'static>;

    async fn connect_manager(&self) -> Result<Self::Manager, CallError> {
        let connection = self.connection().await?;
        Ok(ManagerProxy::new(connection).await?)
    }

    async fn get_client(&self, manager: &Self::Manager) -> Result<OwnedObjectPath, CallError> {
        Ok(manager.get_client().await?)
    }

    async fn connect_client_properties(
        &self,
        client_path: &OwnedObjectPath,
    ) -> Result<Self::ClientProps, CallError> {
        let connection = self.connection().await?;
        let props = PropertiesProxy::builder(connection)
            .destination(GEOCLUE_SERVICE)?
            .path(client_path.as_str().to_owned())?
            .build()
            .await?;
        Ok(props)
    }

    async fn set_desktop_id(
        &self,
        props: &Self::ClientProps,
        desktop_id: &str,
    ) -> Result<(), CallError> {
        props
            .set(client_interface(), "DesktopId", &Value::from(desktop_id))
            .await?;
        Ok(())
    }

    async fn set_accuracy_level(
        &self,
        props: &Self::ClientProps,
        level: AccuracyLevel,
    ) -> Result<(), CallError> {
        props
            .set(
                client_interface(),
                "RequestedAccuracyLevel",
                &Value::U32(level.as_u32()),
            )
            .await?;
        Ok(())
    }

    async fn connect_client(
        &self,
        client_path: &OwnedObjectPath,
    ) -> Result<Self::Client, CallError> {
        let connection = self.connection().await?;
        let client = ClientProxy::builder(connection)
            .path(client_path.as_str().to_owned())?
            .build()
            .await?;
        Ok(client)
    }

    async fn client_signals(
        &self,
        props: &Self::ClientProps,
        client: &Self::Client,
    ) -> Result<ClientSignals, CallError> {
        let updates = client
            .receive_location_updated()
            .await?
            .filter_map(|signal| async move {
                match signal.args() {
                    Ok(args) => Some(ClientSignal::LocationUpdated {
                        new_path: args.new_path().clone(),
                    }),
                    Err(e) => {
                        tracing::warn!("Ignoring malformed LocationUpdated signal: {}", e);
                        None
                    }
                }
            });

        // Watch the raw PropertiesChanged signal rather than a cached property
        // stream, so only real transitions of `Active` are reported.
        let activity = props
            .receive_properties_changed()
            .await?
            .filter_map(|signal| async move {
                let args = signal.args().ok()?;
                if args.interface_name().as_str() != CLIENT_INTERFACE {
                    return None;
                }
                match args.changed_properties().get("Active") {
                    Some(Value::Bool(active)) => Some(ClientSignal::ActiveChanged(*active)),
                    _ => None,
                }
            });

        Ok(futures::stream::select(updates, activity).boxed())
    }

    async fn start(&self, client: &Self::Client) -> Result<(), CallError> {
        Ok(client.start().await?)
    }

    async fn stop(&self, client: &Self::Client) -> Result<(), CallError> {
        Ok(client.stop().await?)
    }

    async fn read_location(
        &self,
        location_path: &OwnedObjectPath,
    ) -> Result<RawLocation, CallError> {
        let connection = self.connection().await?;
        let location = LocationProxy::builder(connection)
            .path(location_path.as_str().to_owned())?
            .build()
            .await?;

        Ok(RawLocation {
            latitude: location.latitude().await?,
            longitude: location.longitude().await?,
            accuracy: location.accuracy().await?,
            altitude: location.altitude().await?,
        })
    }
}
