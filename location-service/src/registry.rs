//! Reference-counted tracking subscriptions
//!
//! One counter per registered [`BusIdentity`]. The registry opens the shared
//! [`ProviderSession`] on the first subscription and closes it when the sum
//! of all counters drops back to zero.

use std::collections::BTreeMap;

use location_provider::{AccuracyLevel, Provider, ProviderSession};
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceError};
use crate::identity::BusIdentity;

/// Result of a successful [`SubscriptionRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOutcome {
    /// The shared session was opened by this call
    pub opened_session: bool,
    /// Counter of the identity after the call
    pub count: usize,
}

/// Result of a [`SubscriptionRegistry::unsubscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubscribeOutcome {
    /// The shared session was closed by this call
    pub closed_session: bool,
    pub count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    counters: BTreeMap<BusIdentity, usize>,
}

impl SubscriptionRegistry {
    /// Create a registry with a zero counter for each identity
    pub fn new(identities: impl IntoIterator<Item = BusIdentity>) -> Self {
        Self {
            counters: identities.into_iter().map(|identity| (identity, 0)).collect(),
        }
    }

    pub fn is_registered(&self, identity: BusIdentity) -> bool {
        self.counters.contains_key(&identity)
    }

    /// Counter of `identity`; 0 for unregistered identities
    pub fn count(&self, identity: BusIdentity) -> usize {
        self.counters.get(&identity).copied().unwrap_or(0)
    }

    /// Sum of all counters
    pub fn total(&self) -> usize {
        self.counters.values().sum()
    }

    /// Identities with at least one live subscription
    pub fn subscribed(&self) -> impl Iterator<Item = BusIdentity> + '_ {
        self.counters
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(identity, _)| *identity)
    }

    pub fn counts(&self) -> BTreeMap<BusIdentity, usize> {
        self.counters.clone()
    }

    /// Add a subscription for `identity`
    ///
    /// Opens `session` first when it is inactive. If that fails the counter
    /// is left unchanged and the handshake error is returned.
    pub async fn subscribe<P: Provider>(
        &mut self,
        identity: BusIdentity,
        session: &mut ProviderSession<P>,
        accuracy: AccuracyLevel,
    ) -> Result<SubscribeOutcome> {
        if !self.counters.contains_key(&identity) {
            return Err(ServiceError::UnknownIdentity(identity));
        }

        let opened_session = if session.is_active() {
            false
        } else {
            session.open(accuracy).await?;
            true
        };

        let counter = self
            .counters
            .get_mut(&identity)
            .ok_or(ServiceError::UnknownIdentity(identity))?;
        *counter += 1;
        let count = *counter;

        debug!("Subscription added for {} (count {})", identity, count);
        Ok(SubscribeOutcome {
            opened_session,
            count,
        })
    }

    /// Drop one subscription of `identity`
    ///
    /// A zero counter stays at zero and never closes the session. When the
    /// total reaches zero the session is closed; a failing `Stop` is logged
    /// and the session is still considered closed.
    pub async fn unsubscribe<P: Provider>(
        &mut self,
        identity: BusIdentity,
        session: &mut ProviderSession<P>,
    ) -> Result<UnsubscribeOutcome> {
        let counter = self
            .counters
            .get_mut(&identity)
            .ok_or(ServiceError::UnknownIdentity(identity))?;

        if *counter == 0 {
            debug!("Ignoring unsubscribe for {} with no subscriptions", identity);
            return Ok(UnsubscribeOutcome {
                closed_session: false,
                count: 0,
            });
        }

        *counter -= 1;
        let count = *counter;
        debug!("Subscription removed for {} (count {})", identity, count);

        if self.total() > 0 {
            return Ok(UnsubscribeOutcome {
                closed_session: false,
                count,
            });
        }

        info!("Last tracking subscriber gone, closing provider session");
        if let Err(e) = session.close().await {
            warn!("Provider session did not stop cleanly: {}", e);
        }

        Ok(UnsubscribeOutcome {
            closed_session: true,
            count,
        })
    }
}
