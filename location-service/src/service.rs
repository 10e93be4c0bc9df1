//! Public entry points of the location broker

use std::collections::BTreeMap;
use std::sync::Arc;

use location_provider::Provider;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::ServiceConfig;
use crate::error::{ConfigError, Result, ServiceError};
use crate::fanout::TrackingSink;
use crate::handlers::{self, TrackingReply};
use crate::identity::BusIdentity;
use crate::payload::{parse_request, PositionRequest, TrackingRequest};
use crate::worker::{run_broker_loop, BrokerStats, Command};

/// Cloneable handle to a running broker
///
/// Every bus identity shares one handle. Requests are forwarded to the
/// broker worker; dropping the last handle stops it.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    command_tx: mpsc::Sender<Command>,
}

/// Validate `config` and start the broker worker on the current runtime
pub fn spawn_broker<P: Provider>(
    provider: Arc<P>,
    config: ServiceConfig,
) -> std::result::Result<(ServiceHandle, JoinHandle<()>), ConfigError> {
    config.validate()?;

    let (command_tx, command_rx) = mpsc::channel(config.command_queue_size);
    let worker = tokio::spawn(run_broker_loop(provider, config, command_rx));

    Ok((ServiceHandle { command_tx }, worker))
}

impl ServiceHandle {
    /// Handle `getCurrentPosition` with a JSON payload
    ///
    /// Returns `None` when no fix arrived before the request's timeout.
    pub async fn get_current_position(
        &self,
        identity: BusIdentity,
        payload: &str,
    ) -> Option<String> {
        let request: PositionRequest = match parse_request(payload) {
            Ok(request) => request,
            Err(e) => return Some(handlers::error_reply(&e)),
        };
        debug!("getCurrentPosition on {}: {:?}", identity, request);

        let (reply, rx) = oneshot::channel();
        if let Err(e) = self.send(Command::GetPosition { request, reply }).await {
            return Some(handlers::error_reply(&e));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Some(handlers::error_reply(&ServiceError::BrokerStopped)),
        }
    }

    /// Handle `startTracking` with a JSON payload
    ///
    /// A `{"returnValue":true}` reply means one subscription was added for
    /// `identity`; the caller must report its cancellation through
    /// [`ServiceHandle::cancel_tracking`].
    pub async fn start_tracking(&self, identity: BusIdentity, payload: &str) -> TrackingReply {
        if let Err(e) = parse_request::<TrackingRequest>(payload) {
            return TrackingReply::Rejected(handlers::error_reply(&e));
        }

        let (reply, rx) = oneshot::channel();
        if let Err(e) = self.send(Command::Subscribe { identity, reply }).await {
            return TrackingReply::Rejected(handlers::error_reply(&e));
        }

        rx.await.unwrap_or_else(|_| {
            TrackingReply::Rejected(handlers::error_reply(&ServiceError::BrokerStopped))
        })
    }

    /// Report that one tracking subscription on `identity` was cancelled
    pub async fn cancel_tracking(&self, identity: BusIdentity) -> Result<()> {
        self.send(Command::Unsubscribe { identity }).await
    }

    /// Route tracking updates for `identity` through `sink`
    pub async fn attach_sink(
        &self,
        identity: BusIdentity,
        sink: Arc<dyn TrackingSink>,
    ) -> Result<()> {
        self.send(Command::AttachSink { identity, sink }).await
    }

    /// Current subscription counter of every registered identity
    pub async fn subscription_counts(&self) -> Result<BTreeMap<BusIdentity, usize>> {
        Ok(self.stats().await?.counts)
    }

    /// Whether the shared tracking session is open
    pub async fn session_active(&self) -> Result<bool> {
        Ok(self.stats().await?.session_active)
    }

    pub async fn stats(&self) -> Result<BrokerStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|_| ServiceError::BrokerStopped)
    }

    /// Ask the worker to close the tracking session and stop
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ServiceError::BrokerStopped)
    }
}
