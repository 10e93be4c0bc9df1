//! GeoClue2 client session lifecycle
//!
//! A [`ProviderSession`] is either inactive or holds every handle of a
//! started client. Handles acquired while the handshake is in progress live
//! in locals of [`ProviderSession::open`] and are dropped on the first
//! failing step, so a partial session can never escape.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use zbus::zvariant::OwnedObjectPath;

use crate::accuracy::AccuracyLevel;
use crate::error::{HandshakeStep, Result, SessionError};
use crate::fix::LocationFix;
use crate::provider::{ClientSignal, ClientSignals, Provider};

/// Events surfaced from an active session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The provider published a new location object
    LocationUpdated(OwnedObjectPath),
    /// The provider deactivated the client, or its signal stream ended
    Deactivated,
}

struct ActiveClient<P: Provider> {
    // Held only to keep the manager connection alive for the client's lifetime
    _manager: P::Manager,
    _props: P::ClientProps,
    client: P::Client,
    client_path: OwnedObjectPath,
    accuracy: AccuracyLevel,
    signals: ClientSignals,
}

/// A single GeoClue2 client, from handshake to `Stop`
pub struct ProviderSession<P: Provider> {
    provider: Arc<P>,
    desktop_id: String,
    active: Option<ActiveClient<P>>,
}

impl<P: Provider> ProviderSession<P> {
    /// Create an inactive session
    pub fn new(provider: Arc<P>, desktop_id: impl Into<String>) -> Self {
        Self {
            provider,
            desktop_id: desktop_id.into(),
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Accuracy level the active client was started with
    pub fn accuracy_level(&self) -> Option<AccuracyLevel> {
        self.active.as_ref().map(|active| active.accuracy)
    }

    /// Object path of the active client
    pub fn client_path(&self) -> Option<&OwnedObjectPath> {
        self.active.as_ref().map(|active| &active.client_path)
    }

    pub fn desktop_id(&self) -> &str {
        &self.desktop_id
    }

    /// Run the full handshake and start the client
    ///
    /// On failure the session stays inactive and the error names the step
    /// that failed.
    pub async fn open(&mut self, accuracy: AccuracyLevel) -> Result<()> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyActive);
        }

        let provider = &self.provider;

        let manager = provider
            .connect_manager()
            .await
            .map_err(SessionError::handshake(HandshakeStep::ManagerConnect))?;

        let client_path = provider
            .get_client(&manager)
            .await
            .map_err(SessionError::handshake(HandshakeStep::GetClient))?;

        let props = provider
            .connect_client_properties(&client_path)
            .await
            .map_err(SessionError::handshake(HandshakeStep::ClientPropertiesConnect))?;

        provider
            .set_desktop_id(&props, &self.desktop_id)
            .await
            .map_err(SessionError::handshake(HandshakeStep::SetDesktopId))?;

        provider
            .set_accuracy_level(&props, accuracy)
            .await
            .map_err(SessionError::handshake(HandshakeStep::SetAccuracyLevel))?;

        let client = provider
            .connect_client(&client_path)
            .await
            .map_err(SessionError::handshake(HandshakeStep::ClientConnect))?;

        // Subscribe before Start so the first update cannot be missed
        let signals = provider
            .client_signals(&props, &client)
            .await
            .map_err(SessionError::handshake(HandshakeStep::ClientConnect))?;

        provider
            .start(&client)
            .await
            .map_err(SessionError::handshake(HandshakeStep::Start))?;

        tracing::info!(
            "Started GeoClue2 client {} for {} at {}",
            client_path.as_str(),
            self.desktop_id,
            accuracy
        );

        self.active = Some(ActiveClient {
            _manager: manager,
            _props: props,
            client,
            client_path,
            accuracy,
            signals,
        });

        Ok(())
    }

    /// Stop the client and release every handle
    ///
    /// The handles are released even when `Stop` fails. Closing an inactive
    /// session is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };

        let result = self
            .provider
            .stop(&active.client)
            .await
            .map_err(SessionError::Stop);

        match &result {
            Ok(()) => tracing::info!("Stopped GeoClue2 client {}", active.client_path.as_str()),
            Err(e) => tracing::warn!(
                "Releasing GeoClue2 client {} after failed stop: {}",
                active.client_path.as_str(),
                e
            ),
        }

        result
    }

    /// Drop every handle without calling `Stop`
    ///
    /// Used when the provider has already torn the client down.
    pub fn release(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::debug!("Released GeoClue2 client {}", active.client_path.as_str());
        }
    }

    /// Wait for the next session event
    ///
    /// Never resolves while the session is inactive, which makes it safe to
    /// poll from a `select!` loop alongside other work. Cancel safe.
    pub async fn next_event(&mut self) -> SessionEvent {
        let Some(active) = self.active.as_mut() else {
            return std::future::pending().await;
        };

        loop {
            match active.signals.next().await {
                Some(ClientSignal::LocationUpdated { new_path }) => {
                    return SessionEvent::LocationUpdated(new_path);
                }
                Some(ClientSignal::ActiveChanged(true)) => continue,
                Some(ClientSignal::ActiveChanged(false)) => {
                    tracing::warn!(
                        "GeoClue2 deactivated client {}",
                        active.client_path.as_str()
                    );
                    return SessionEvent::Deactivated;
                }
                None => {
                    tracing::warn!(
                        "Signal stream of GeoClue2 client {} ended",
                        active.client_path.as_str()
                    );
                    return SessionEvent::Deactivated;
                }
            }
        }
    }

    /// Read a location object into a [`LocationFix`]
    ///
    /// The returned future does not borrow the session.
    pub fn resolve_fix(
        &self,
        location_path: &OwnedObjectPath,
    ) -> impl Future<Output = Result<LocationFix>> + Send + 'static {
        let provider = Arc::clone(&self.provider);
        let location_path = location_path.clone();

        async move {
            let raw = provider
                .read_location(&location_path)
                .await
                .map_err(|source| SessionError::LocationRead {
                    path: location_path,
                    source,
                })?;

            Ok(LocationFix::from_raw(raw))
        }
    }
}

impl<P: Provider> Drop for ProviderSession<P> {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            tracing::debug!(
                "ProviderSession dropped with client {} still active",
                active.client_path.as_str()
            );
        }
    }
}
