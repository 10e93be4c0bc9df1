//! Delivery of tracking updates to subscribed identities

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::identity::BusIdentity;
use crate::registry::SubscriptionRegistry;

/// Pushes tracking payloads to every subscriber of one identity
#[async_trait]
pub trait TrackingSink: Send + Sync {
    async fn push(&self, payload: &str) -> Result<(), TransportError>;
}

/// Sinks keyed by the identity they serve
pub type SinkTable = HashMap<BusIdentity, Arc<dyn TrackingSink>>;

/// Outcome of one fan-out round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<BusIdentity>,
    pub failed: Vec<BusIdentity>,
}

/// Push `payload` to every identity with a non-zero counter
///
/// Pushes run concurrently. A failing sink is logged and does not affect
/// the others. Subscribed identities without a sink count as failed.
pub async fn deliver(
    registry: &SubscriptionRegistry,
    sinks: &SinkTable,
    payload: &str,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    let mut pushes = Vec::new();

    for identity in registry.subscribed() {
        match sinks.get(&identity) {
            Some(sink) => {
                let sink = Arc::clone(sink);
                pushes.push(async move { (identity, sink.push(payload).await) });
            }
            None => {
                warn!("No sink for subscribed identity {}", identity);
                report.failed.push(identity);
            }
        }
    }

    for (identity, result) in join_all(pushes).await {
        match result {
            Ok(()) => report.delivered.push(identity),
            Err(e) => {
                warn!("Tracking update to {} failed: {}", identity, e);
                report.failed.push(identity);
            }
        }
    }

    debug!(
        "Fan-out delivered to {} identities, {} failed",
        report.delivered.len(),
        report.failed.len()
    );
    report
}
