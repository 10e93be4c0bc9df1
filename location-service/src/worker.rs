//! Broker worker task
//!
//! A single task owns the [`SubscriptionRegistry`], the shared
//! [`ProviderSession`] and the sink table. Commands from
//! [`ServiceHandle`](crate::ServiceHandle) and events from the session are
//! processed one at a time, so no state is shared between tasks.

use std::collections::BTreeMap;
use std::sync::Arc;

use location_provider::{Provider, ProviderSession, SessionEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::fanout::{self, SinkTable, TrackingSink};
use crate::handlers::{self, TrackingReply};
use crate::identity::BusIdentity;
use crate::payload::{self, PositionReply, PositionRequest};
use crate::registry::SubscriptionRegistry;

/// Commands sent from a [`ServiceHandle`](crate::ServiceHandle) to the worker
pub enum Command {
    /// One-shot position request; `None` is sent back on timeout
    GetPosition {
        request: PositionRequest,
        reply: oneshot::Sender<Option<String>>,
    },
    /// New tracking subscription on `identity`
    Subscribe {
        identity: BusIdentity,
        reply: oneshot::Sender<TrackingReply>,
    },
    /// A tracking subscription on `identity` was cancelled
    Unsubscribe { identity: BusIdentity },
    /// Route tracking updates for `identity` through `sink`
    AttachSink {
        identity: BusIdentity,
        sink: Arc<dyn TrackingSink>,
    },
    Stats {
        reply: oneshot::Sender<BrokerStats>,
    },
    /// Close the shared session and stop the worker
    Shutdown,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::GetPosition { request, .. } => {
                f.debug_struct("GetPosition").field("request", request).finish()
            }
            Command::Subscribe { identity, .. } => {
                f.debug_struct("Subscribe").field("identity", identity).finish()
            }
            Command::Unsubscribe { identity } => {
                f.debug_struct("Unsubscribe").field("identity", identity).finish()
            }
            Command::AttachSink { identity, .. } => {
                f.debug_struct("AttachSink").field("identity", identity).finish()
            }
            Command::Stats { .. } => f.write_str("Stats"),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Snapshot of the broker's subscription state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerStats {
    pub counts: BTreeMap<BusIdentity, usize>,
    pub session_active: bool,
}

/// Main loop of the broker worker
pub(crate) async fn run_broker_loop<P: Provider>(
    provider: Arc<P>,
    config: ServiceConfig,
    mut command_rx: mpsc::Receiver<Command>,
) {
    let mut session = ProviderSession::new(Arc::clone(&provider), config.desktop_id.clone());
    let mut registry = SubscriptionRegistry::new(config.identities.iter().copied());
    let mut sinks = SinkTable::new();
    let mut one_shots = JoinSet::new();

    info!(
        "Location broker started for {} identities",
        config.identities.len()
    );

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                let Some(command) = command else {
                    debug!("All service handles dropped, shutting down broker");
                    break;
                };

                match command {
                    Command::GetPosition { request, reply } => {
                        spawn_one_shot(&mut one_shots, Arc::clone(&provider), &config, request, reply);
                    }
                    Command::Subscribe { identity, reply } => {
                        let level = config.tracking_accuracy;
                        let ack = handlers::start_tracking(&mut registry, &mut session, identity, level).await;
                        let _ = reply.send(ack);
                    }
                    Command::Unsubscribe { identity } => {
                        if let Err(e) = handlers::cancel_tracking(&mut registry, &mut session, identity).await {
                            warn!("Cancel on {} failed: {}", identity, e);
                        }
                    }
                    Command::AttachSink { identity, sink } => {
                        debug!("Attached tracking sink for {}", identity);
                        sinks.insert(identity, sink);
                    }
                    Command::Stats { reply } => {
                        let _ = reply.send(BrokerStats {
                            counts: registry.counts(),
                            session_active: session.is_active(),
                        });
                    }
                    Command::Shutdown => {
                        info!("Broker received shutdown command");
                        break;
                    }
                }
            }

            Some(joined) = one_shots.join_next(), if !one_shots.is_empty() => {
                if let Err(e) = joined {
                    warn!("getCurrentPosition task failed: {}", e);
                }
            }

            event = session.next_event() => {
                match event {
                    SessionEvent::LocationUpdated(path) => {
                        match session.resolve_fix(&path).await {
                            Ok(fix) => {
                                let payload = payload::encode(&PositionReply::from(&fix));
                                fanout::deliver(&registry, &sinks, &payload).await;
                            }
                            Err(e) => warn!("Dropping tracking update: {}", e),
                        }
                    }
                    SessionEvent::Deactivated => {
                        warn!(
                            "Provider ended the tracking session; {} subscriptions wait for the next subscribe",
                            registry.total()
                        );
                        session.release();
                    }
                }
            }
        }
    }

    // Each pending one-shot stops its own session once it resolves or times out
    if !one_shots.is_empty() {
        info!("Waiting for {} pending position requests", one_shots.len());
    }
    while let Some(joined) = one_shots.join_next().await {
        if let Err(e) = joined {
            warn!("getCurrentPosition task failed: {}", e);
        }
    }

    if let Err(e) = session.close().await {
        warn!("Tracking session did not stop cleanly on shutdown: {}", e);
    }
    info!("Location broker shut down");
}

fn spawn_one_shot<P: Provider>(
    one_shots: &mut JoinSet<()>,
    provider: Arc<P>,
    config: &ServiceConfig,
    request: PositionRequest,
    reply: oneshot::Sender<Option<String>>,
) {
    let desktop_id = config.desktop_id.clone();
    let level = request.accuracy_hint().accuracy_level();
    let timeout = handlers::request_timeout(&request, config.default_timeout);

    one_shots.spawn(async move {
        let result = handlers::get_current_position(provider, &desktop_id, level, timeout).await;
        if let Err(e) = &result {
            warn!("getCurrentPosition failed: {}", e);
        }
        let _ = reply.send(handlers::position_reply(&result));
    });
}
