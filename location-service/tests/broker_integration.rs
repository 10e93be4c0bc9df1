//! End-to-end tests for the location broker.
//!
//! These tests run the real broker worker against a mock GeoClue2 provider
//! and capture tracking updates with channel-backed sinks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use location_provider::mock::MockProvider;
use location_provider::{HandshakeStep, RawLocation};
use location_service::{
    spawn_broker, BusIdentity, PositionReply, ServiceConfig, ServiceHandle, TrackingSink,
    TransportError,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const MOUNTAIN_VIEW: RawLocation = RawLocation {
    latitude: 37.39,
    longitude: -122.04,
    accuracy: 20.0,
    altitude: -f64::MAX,
};

struct ChannelSink(mpsc::UnboundedSender<String>);

#[async_trait]
impl TrackingSink for ChannelSink {
    async fn push(&self, payload: &str) -> Result<(), TransportError> {
        let _ = self.0.send(payload.to_string());
        Ok(())
    }
}

struct Broker {
    provider: MockProvider,
    handle: ServiceHandle,
    worker: JoinHandle<()>,
}

fn start_broker() -> Broker {
    let provider = MockProvider::new();
    let config = ServiceConfig::new().with_desktop_id("location-test");
    let (handle, worker) = spawn_broker(Arc::new(provider.clone()), config).unwrap();
    Broker {
        provider,
        handle,
        worker,
    }
}

async fn attach(handle: &ServiceHandle, identity: BusIdentity) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    handle
        .attach_sink(identity, Arc::new(ChannelSink(tx)))
        .await
        .unwrap();
    rx
}

async fn next_update(rx: &mut mpsc::UnboundedReceiver<String>) -> PositionReply {
    let payload = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for tracking update")
        .expect("Sink channel closed");
    serde_json::from_str(&payload).unwrap()
}

/// Two identities share one session; updates reach exactly the subscribed ones.
#[tokio::test]
async fn test_shared_session_across_identities() {
    let Broker {
        provider,
        handle,
        worker,
    } = start_broker();
    let a = BusIdentity::PalmPublic;
    let b = BusIdentity::WebosPrivate;
    let mut a_updates = attach(&handle, a).await;
    let mut b_updates = attach(&handle, b).await;
    let mut idle_updates = attach(&handle, BusIdentity::PortsPublic).await;

    let reply = handle.start_tracking(a, "{}").await;
    assert_eq!(reply.json(), r#"{"returnValue":true}"#);
    assert!(handle.session_active().await.unwrap());
    assert_eq!(provider.starts(), 1);

    assert!(handle.start_tracking(b, "").await.is_subscribed());
    assert_eq!(provider.starts(), 1);

    provider.emit_location(MOUNTAIN_VIEW);
    let a_fix = next_update(&mut a_updates).await;
    let b_fix = next_update(&mut b_updates).await;
    assert_eq!(a_fix, b_fix);
    assert_eq!(a_fix.latitude, 37.39);
    assert_eq!(a_fix.altitude, -1.0);

    handle.cancel_tracking(a).await.unwrap();
    assert!(handle.session_active().await.unwrap());
    assert_eq!(provider.stops(), 0);

    provider.emit_location(RawLocation {
        latitude: 48.85,
        ..MOUNTAIN_VIEW
    });
    assert_eq!(next_update(&mut b_updates).await.latitude, 48.85);
    handle.stats().await.unwrap();
    assert!(a_updates.try_recv().is_err());
    assert!(idle_updates.try_recv().is_err());

    handle.cancel_tracking(b).await.unwrap();
    assert!(!handle.session_active().await.unwrap());
    assert_eq!(provider.stops(), 1);
    assert_eq!(provider.live_handles(), 0);

    handle.shutdown().await.unwrap();
    worker.await.unwrap();
}

/// Repeated subscriptions on one identity need as many cancels.
#[tokio::test]
async fn test_same_identity_reference_counting() {
    let Broker { provider, handle, .. } = start_broker();
    let a = BusIdentity::PortsPrivate;

    handle.start_tracking(a, "{}").await;
    handle.start_tracking(a, "{}").await;
    assert_eq!(handle.subscription_counts().await.unwrap()[&a], 2);

    handle.cancel_tracking(a).await.unwrap();
    assert!(handle.session_active().await.unwrap());

    handle.cancel_tracking(a).await.unwrap();
    assert!(!handle.session_active().await.unwrap());

    // A stray cancel at zero changes nothing
    handle.cancel_tracking(a).await.unwrap();
    assert_eq!(handle.subscription_counts().await.unwrap()[&a], 0);
    assert_eq!(provider.starts(), 1);
    assert_eq!(provider.stops(), 1);
}

#[tokio::test]
async fn test_get_current_position_immediate_fix() {
    let Broker { provider, handle, .. } = start_broker();
    provider.emit_on_start(MOUNTAIN_VIEW);

    let reply = handle
        .get_current_position(BusIdentity::PalmPublic, r#"{"accuracy":1}"#)
        .await
        .expect("a fix before the timeout");
    let fix: PositionReply = serde_json::from_str(&reply).unwrap();

    assert!(reply.starts_with(r#"{"returnValue":true,"errorCode":0,"altitude":-1.0,"heading":-1.0,"horizAccuracy":20.0,"latitude":37.39,"longitude":-122.04,"timestamp":"#));
    assert!(reply.ends_with(r#","velocity":-1.0,"vertAccuracy":-1.0}"#));
    assert!(fix.timestamp > 0.0);
    assert_eq!(
        provider.accuracy_levels(),
        vec![location_provider::AccuracyLevel::Exact]
    );
    assert!(!handle.session_active().await.unwrap());
    assert_eq!(provider.live_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_get_current_position_timeout_has_no_reply() {
    let Broker { provider, handle, .. } = start_broker();

    let reply = handle
        .get_current_position(BusIdentity::WebosPublic, r#"{"timeout":2}"#)
        .await;

    assert_eq!(reply, None);
    assert_eq!(provider.live_handles(), 0);
}

#[tokio::test]
async fn test_get_current_position_manager_failure() {
    let Broker { provider, handle, .. } = start_broker();
    provider.fail_at(HandshakeStep::ManagerConnect);

    let reply = handle
        .get_current_position(BusIdentity::PortsPublic, "{}")
        .await
        .unwrap();

    assert!(reply.starts_with(r#"{"returnValue":false,"errorCode":2,"errorText":"#));
    assert!(!handle.session_active().await.unwrap());
    assert_eq!(provider.live_handles(), 0);
}

/// One-shot requests never disturb the shared tracking session.
#[tokio::test]
async fn test_one_shot_alongside_tracking() {
    let Broker { provider, handle, .. } = start_broker();
    let mut updates = attach(&handle, BusIdentity::PalmPrivate).await;
    handle.start_tracking(BusIdentity::PalmPrivate, "{}").await;

    provider.emit_on_start(MOUNTAIN_VIEW);
    let reply = handle
        .get_current_position(BusIdentity::PalmPublic, "{}")
        .await
        .unwrap();
    assert!(reply.contains(r#""returnValue":true"#));

    assert!(handle.session_active().await.unwrap());
    assert_eq!(provider.starts(), 2);
    assert_eq!(provider.stops(), 1);
    assert_eq!(provider.live_handles(), 3);

    provider.emit_location(MOUNTAIN_VIEW);
    assert_eq!(next_update(&mut updates).await.longitude, -122.04);
}

/// A provider-side deactivation drops the session but keeps the counters.
#[tokio::test]
async fn test_deactivation_keeps_subscriptions() {
    let Broker { provider, handle, .. } = start_broker();
    let a = BusIdentity::WebosPublic;
    handle.start_tracking(a, "{}").await;

    assert!(provider.set_active(false));
    while handle.session_active().await.unwrap() {
        tokio::task::yield_now().await;
    }

    assert_eq!(handle.subscription_counts().await.unwrap()[&a], 1);
    assert_eq!(provider.stops(), 0);
    assert_eq!(provider.live_handles(), 0);

    handle.start_tracking(BusIdentity::PalmPublic, "{}").await;
    assert!(handle.session_active().await.unwrap());
    assert_eq!(provider.starts(), 2);
}
