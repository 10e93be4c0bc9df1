//! D-Bus adapter for the location broker
//!
//! Each [`BusIdentity`] gets its own connection to the bus named by
//! [`BusIdentity::bus`], owns the identity's well-known name and serves
//! [`LocationInterface`] at `/`. Tracking updates go out as the
//! `trackingUpdate` signal. A peer leaving the bus cancels every tracking
//! subscription it still holds.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::message::Header;
use zbus::names::BusName;
use zbus::{fdo, interface, Connection, SignalContext};

use crate::error::{ServiceError, TransportError};
use crate::fanout::TrackingSink;
use crate::handlers;
use crate::identity::{BusIdentity, BusKind};
use crate::payload::{self, AckReply, ErrorCode, ErrorReply};
use crate::service::ServiceHandle;

pub const OBJECT_PATH: &str = "/";
pub const INTERFACE_NAME: &str = "org.webosports.Location";

/// Live tracking subscriptions per bus peer
#[derive(Debug, Clone, Default)]
pub struct PeerSubscriptions {
    peers: Arc<DashMap<String, usize>>,
}

impl PeerSubscriptions {
    /// Record one more subscription for `peer`; returns the peer's count
    pub fn add(&self, peer: &str) -> usize {
        let mut count = self.peers.entry(peer.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Drop one subscription of `peer`; `false` if it had none
    pub fn remove_one(&self, peer: &str) -> bool {
        match self.peers.entry(peer.to_string()) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() -= 1;
                if *entry.get() == 0 {
                    entry.remove();
                }
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Forget `peer`; returns how many subscriptions it held
    pub fn remove_all(&self, peer: &str) -> usize {
        self.peers.remove(peer).map(|(_, count)| count).unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.peers.iter().map(|entry| *entry.value()).sum()
    }
}

/// Whether a bus peer is still connected
#[async_trait]
pub trait PeerPresence: Send + Sync {
    async fn is_connected(&self, peer: &str) -> bool;
}

#[async_trait]
impl PeerPresence for fdo::DBusProxy<'static> {
    async fn is_connected(&self, peer: &str) -> bool {
        let Ok(name) = BusName::try_from(peer) else {
            return false;
        };
        match self.name_has_owner(name).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!("NameHasOwner({}) failed, assuming connected: {}", peer, e);
                true
            }
        }
    }
}

fn no_subscription_reply(text: &str) -> String {
    payload::encode(&ErrorReply::new(ErrorCode::Unknown, text))
}

/// `getCurrentPosition` reply, or `TimedOut` when no fix arrived
pub fn position_or_timeout(reply: Option<String>) -> fdo::Result<String> {
    reply.ok_or_else(|| fdo::Error::TimedOut("No position fix before the timeout".to_string()))
}

/// Subscribe `sender` on `identity` and remember it for disconnect handling
///
/// A peer that is already gone once its subscription is recorded is
/// cancelled here, since its `NameOwnerChanged` may have been seen before
/// there was anything to cancel.
pub async fn start_tracking<R: PeerPresence + ?Sized>(
    peers: &PeerSubscriptions,
    presence: &R,
    handle: &ServiceHandle,
    identity: BusIdentity,
    sender: Option<&str>,
    payload: &str,
) -> String {
    let Some(sender) = sender else {
        return no_subscription_reply("Tracking needs a peer with a unique bus name");
    };

    let reply = handle.start_tracking(identity, payload).await;
    if !reply.is_subscribed() {
        return reply.into_json();
    }

    let count = peers.add(sender);
    debug!("{} now holds {} subscriptions on {}", sender, count, identity);

    if !presence.is_connected(sender).await && peers.remove_one(sender) {
        info!("{} left before its subscription on {} was recorded", sender, identity);
        if let Err(e) = handle.cancel_tracking(identity).await {
            warn!("Cancel on {} failed: {}", identity, e);
        }
    }
    reply.into_json()
}

/// Cancel one subscription `sender` holds on `identity`
pub async fn stop_tracking(
    peers: &PeerSubscriptions,
    handle: &ServiceHandle,
    identity: BusIdentity,
    sender: Option<&str>,
) -> String {
    let removed = sender.map(|peer| peers.remove_one(peer)).unwrap_or(false);
    if !removed {
        return no_subscription_reply("No tracking subscription to stop");
    }

    match handle.cancel_tracking(identity).await {
        Ok(()) => payload::encode(&AckReply::ok()),
        Err(e) => handlers::error_reply(&e),
    }
}

/// React to `NameOwnerChanged`; returns how many subscriptions were cancelled
///
/// Only a name losing its owner counts as a departure.
pub async fn handle_owner_change(
    peers: &PeerSubscriptions,
    handle: &ServiceHandle,
    identity: BusIdentity,
    name: &str,
    new_owner: Option<&str>,
) -> Result<usize, ServiceError> {
    if new_owner.is_some() {
        return Ok(0);
    }

    let held = peers.remove_all(name);
    if held == 0 {
        return Ok(0);
    }

    info!(
        "{} left the bus, cancelling {} subscriptions on {}",
        name, held, identity
    );
    for _ in 0..held {
        handle.cancel_tracking(identity).await?;
    }
    Ok(held)
}

/// `org.webosports.Location` served for one identity
pub struct LocationInterface {
    identity: BusIdentity,
    handle: ServiceHandle,
    peers: PeerSubscriptions,
    dbus: fdo::DBusProxy<'static>,
}

#[interface(name = "org.webosports.Location")]
impl LocationInterface {
    /// Time out with `org.freedesktop.DBus.Error.TimedOut` when no fix arrives
    #[zbus(name = "getCurrentPosition")]
    async fn get_current_position(&self, payload: &str) -> fdo::Result<String> {
        position_or_timeout(self.handle.get_current_position(self.identity, payload).await)
    }

    #[zbus(name = "startTracking")]
    async fn start_tracking(&self, #[zbus(header)] header: Header<'_>, payload: &str) -> String {
        let sender = header.sender().map(|name| name.as_str());
        start_tracking(
            &self.peers,
            &self.dbus,
            &self.handle,
            self.identity,
            sender,
            payload,
        )
        .await
    }

    #[zbus(name = "stopTracking")]
    async fn stop_tracking(&self, #[zbus(header)] header: Header<'_>) -> String {
        let sender = header.sender().map(|name| name.as_str());
        stop_tracking(&self.peers, &self.handle, self.identity, sender).await
    }

    #[zbus(signal, name = "trackingUpdate")]
    async fn tracking_update(ctxt: &SignalContext<'_>, payload: &str) -> zbus::Result<()>;
}

/// Emits `trackingUpdate` on one identity's connection
pub struct ZbusSink {
    identity: BusIdentity,
    connection: Connection,
}

#[async_trait]
impl TrackingSink for ZbusSink {
    async fn push(&self, payload: &str) -> Result<(), TransportError> {
        let push_error = |source| TransportError::Push {
            identity: self.identity,
            source,
        };

        let ctxt = SignalContext::new(&self.connection, OBJECT_PATH).map_err(push_error)?;
        LocationInterface::tracking_update(&ctxt, payload)
            .await
            .map_err(push_error)
    }
}

/// A bus identity that is up and serving requests
pub struct Registration {
    identity: BusIdentity,
    connection: Connection,
    watcher: JoinHandle<()>,
}

impl Registration {
    pub fn identity(&self) -> BusIdentity {
        self.identity
    }

    /// Stop watching for disconnects and give up the well-known name
    pub async fn close(self) {
        self.watcher.abort();
        if let Err(e) = self
            .connection
            .release_name(self.identity.service_name())
            .await
        {
            warn!("Failed to release {}: {}", self.identity.service_name(), e);
        }
        debug!("Unregistered {}", self.identity);
    }
}

/// Bring up `identity` and route its requests to `handle`
///
/// The disconnect watch is in place before the interface is served and the
/// well-known name is requested last. Failure affects only this identity.
pub async fn register(
    identity: BusIdentity,
    handle: ServiceHandle,
) -> Result<Registration, TransportError> {
    let registration_error = |source| TransportError::Registration {
        identity,
        name: identity.service_name(),
        source,
    };

    let connection = match identity.bus() {
        BusKind::Public => Connection::session().await,
        BusKind::Private => Connection::system().await,
    }
    .map_err(registration_error)?;

    let dbus = fdo::DBusProxy::new(&connection)
        .await
        .map_err(registration_error)?;
    let mut owner_changes = dbus
        .receive_name_owner_changed()
        .await
        .map_err(registration_error)?;

    handle
        .attach_sink(
            identity,
            Arc::new(ZbusSink {
                identity,
                connection: connection.clone(),
            }),
        )
        .await
        .map_err(|source| TransportError::Broker { identity, source })?;

    let peers = PeerSubscriptions::default();
    let interface = LocationInterface {
        identity,
        handle: handle.clone(),
        peers: peers.clone(),
        dbus: dbus.clone(),
    };
    connection
        .object_server()
        .at(OBJECT_PATH, interface)
        .await
        .map_err(registration_error)?;
    connection
        .request_name(identity.service_name())
        .await
        .map_err(registration_error)?;

    let watcher = tokio::spawn(async move {
        // Keeps the proxy alive for as long as the stream is polled
        let _dbus = dbus;

        while let Some(signal) = owner_changes.next().await {
            let Ok(args) = signal.args() else {
                continue;
            };
            let new_owner = (**args.new_owner()).as_ref().map(|owner| owner.as_str());

            let changed =
                handle_owner_change(&peers, &handle, identity, args.name().as_str(), new_owner)
                    .await;
            if changed.is_err() {
                debug!("Broker stopped, no longer watching peers of {}", identity);
                return;
            }
        }
    });

    info!(
        "Registered {} as {} on the {:?} bus",
        identity,
        identity.service_name(),
        identity.bus()
    );

    Ok(Registration {
        identity,
        connection,
        watcher,
    })
}
