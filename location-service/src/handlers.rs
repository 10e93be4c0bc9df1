//! Request handlers for `getCurrentPosition` and `startTracking`
//!
//! One-shot requests get a private [`ProviderSession`] that lives only for
//! the duration of the request. Tracking requests go through the shared
//! session owned by the broker worker.

use std::sync::Arc;
use std::time::Duration;

use location_provider::{AccuracyLevel, LocationFix, Provider, ProviderSession, SessionEvent};
use tracing::{info, warn};

use crate::error::{Result, ServiceError};
use crate::identity::BusIdentity;
use crate::payload::{self, AckReply, ErrorReply, PositionReply, PositionRequest};
use crate::registry::SubscriptionRegistry;

/// Wait picked for a request: its own `timeout` if non-zero, else `default`
pub fn request_timeout(request: &PositionRequest, default: Duration) -> Duration {
    request
        .timeout
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Fetch a single fix on a private session
///
/// Returns `Ok(None)` when no update arrives within `timeout`. The session
/// is stopped and released on every path.
pub async fn get_current_position<P: Provider>(
    provider: Arc<P>,
    desktop_id: &str,
    level: AccuracyLevel,
    timeout: Duration,
) -> Result<Option<LocationFix>> {
    let mut session = ProviderSession::new(provider, desktop_id);
    session.open(level).await?;

    match tokio::time::timeout(timeout, session.next_event()).await {
        Ok(SessionEvent::LocationUpdated(path)) => {
            let fix = session.resolve_fix(&path).await;
            close_quietly(&mut session).await;
            Ok(Some(fix?))
        }
        Ok(SessionEvent::Deactivated) => {
            session.release();
            Err(ServiceError::SessionLost)
        }
        Err(_) => {
            info!("No position within {:?}, giving up", timeout);
            close_quietly(&mut session).await;
            Ok(None)
        }
    }
}

async fn close_quietly<P: Provider>(session: &mut ProviderSession<P>) {
    if let Err(e) = session.close().await {
        warn!("One-shot session did not stop cleanly: {}", e);
    }
}

/// JSON reply for a finished `getCurrentPosition`; `None` on timeout
pub fn position_reply(result: &Result<Option<LocationFix>>) -> Option<String> {
    match result {
        Ok(Some(fix)) => Some(payload::encode(&PositionReply::from(fix))),
        Ok(None) => None,
        Err(e) => Some(error_reply(e)),
    }
}

pub fn error_reply(error: &ServiceError) -> String {
    payload::encode(&ErrorReply::from(error))
}

/// Reply to `startTracking`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingReply {
    /// A subscription was added; carries the acknowledgement
    Subscribed(String),
    /// Nothing was added; carries the error reply
    Rejected(String),
}

impl TrackingReply {
    pub fn is_subscribed(&self) -> bool {
        matches!(self, TrackingReply::Subscribed(_))
    }

    pub fn json(&self) -> &str {
        match self {
            TrackingReply::Subscribed(json) | TrackingReply::Rejected(json) => json,
        }
    }

    pub fn into_json(self) -> String {
        match self {
            TrackingReply::Subscribed(json) | TrackingReply::Rejected(json) => json,
        }
    }
}

/// Register a tracking subscription and build the acknowledgement
pub async fn start_tracking<P: Provider>(
    registry: &mut SubscriptionRegistry,
    session: &mut ProviderSession<P>,
    identity: BusIdentity,
    accuracy: AccuracyLevel,
) -> TrackingReply {
    match registry.subscribe(identity, session, accuracy).await {
        Ok(outcome) => {
            if outcome.opened_session {
                info!("Tracking started for {}", identity);
            }
            TrackingReply::Subscribed(payload::encode(&AckReply::ok()))
        }
        Err(e) => {
            warn!("startTracking on {} failed: {}", identity, e);
            TrackingReply::Rejected(error_reply(&e))
        }
    }
}

/// Drop a tracking subscription after a cancel notification
pub async fn cancel_tracking<P: Provider>(
    registry: &mut SubscriptionRegistry,
    session: &mut ProviderSession<P>,
    identity: BusIdentity,
) -> Result<()> {
    let outcome = registry.unsubscribe(identity, session).await?;
    if outcome.closed_session {
        info!("Tracking stopped after last cancel on {}", identity);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use location_provider::mock::MockProvider;
    use location_provider::{HandshakeStep, RawLocation};

    const FIX: RawLocation = RawLocation {
        latitude: 37.39,
        longitude: -122.04,
        accuracy: 20.0,
        altitude: -f64::MAX,
    };

    #[tokio::test]
    async fn test_immediate_fix_is_returned() {
        let provider = MockProvider::new();
        provider.emit_on_start(FIX);

        let result = get_current_position(
            Arc::new(provider.clone()),
            "location-test",
            AccuracyLevel::Exact,
            Duration::from_secs(30),
        )
        .await;

        let reply: PositionReply =
            serde_json::from_str(&position_reply(&result).unwrap()).unwrap();
        assert!(reply.return_value);
        assert_eq!(reply.error_code, 0);
        assert_eq!(reply.latitude, 37.39);
        assert_eq!(reply.longitude, -122.04);
        assert_eq!(reply.horiz_accuracy, 20.0);
        assert_eq!(reply.altitude, -1.0);
        assert_eq!(reply.heading, -1.0);
        assert_eq!(reply.velocity, -1.0);
        assert_eq!(reply.vert_accuracy, -1.0);

        assert_eq!(provider.accuracy_levels(), vec![AccuracyLevel::Exact]);
        assert_eq!(provider.stops(), 1);
        assert_eq!(provider.live_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_no_reply_and_releases() {
        let provider = MockProvider::new();

        let result = get_current_position(
            Arc::new(provider.clone()),
            "location-test",
            AccuracyLevel::City,
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(result, Ok(None)));
        assert_eq!(position_reply(&result), None);
        assert_eq!(provider.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_open_failure_is_an_error_reply() {
        let provider = MockProvider::new();
        provider.fail_at(HandshakeStep::ManagerConnect);

        let result = get_current_position(
            Arc::new(provider.clone()),
            "location-test",
            AccuracyLevel::City,
            Duration::from_secs(5),
        )
        .await;

        let reply: ErrorReply = serde_json::from_str(&position_reply(&result).unwrap()).unwrap();
        assert!(!reply.return_value);
        assert_eq!(reply.error_code, 2);
        assert!(reply.error_text.contains("manager connect"));
        assert_eq!(provider.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_deactivation_while_waiting_is_session_lost() {
        let provider = MockProvider::new();
        let task = tokio::spawn(get_current_position(
            Arc::new(provider.clone()),
            "location-test",
            AccuracyLevel::City,
            Duration::from_secs(30),
        ));

        while !provider.set_active(false) {
            tokio::task::yield_now().await;
        }

        let result = task.await.unwrap();
        assert!(matches!(result, Err(ServiceError::SessionLost)));
        assert_eq!(provider.stops(), 0);
        assert_eq!(provider.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_location_is_position_unavailable() {
        let provider = MockProvider::new();
        let task = tokio::spawn(get_current_position(
            Arc::new(provider.clone()),
            "location-test",
            AccuracyLevel::City,
            Duration::from_secs(30),
        ));

        while !provider.emit_unreadable_location() {
            tokio::task::yield_now().await;
        }

        let error = task.await.unwrap().unwrap_err();
        assert_eq!(error.error_code().code(), 2);
        assert_eq!(provider.stops(), 1);
    }

    #[test]
    fn test_request_timeout() {
        let default = Duration::from_secs(30);
        let with = |timeout| PositionRequest {
            accuracy: None,
            timeout,
        };

        assert_eq!(request_timeout(&with(None), default), default);
        assert_eq!(request_timeout(&with(Some(0)), default), default);
        assert_eq!(request_timeout(&with(Some(7)), default), Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_start_tracking_acks() {
        let provider = MockProvider::new();
        let mut session = ProviderSession::new(Arc::new(provider.clone()), "location-test");
        let mut registry = SubscriptionRegistry::new(BusIdentity::ALL);

        let reply = start_tracking(
            &mut registry,
            &mut session,
            BusIdentity::PalmPublic,
            AccuracyLevel::Neighborhood,
        )
        .await;
        assert_eq!(
            reply,
            TrackingReply::Subscribed(r#"{"returnValue":true}"#.to_string())
        );

        cancel_tracking(&mut registry, &mut session, BusIdentity::PalmPublic)
            .await
            .unwrap();
        assert!(!session.is_active());
        assert_eq!(provider.stops(), 1);
    }

    #[tokio::test]
    async fn test_start_tracking_rejects_on_open_failure() {
        let provider = MockProvider::new();
        provider.fail_at(HandshakeStep::SetDesktopId);
        let mut session = ProviderSession::new(Arc::new(provider.clone()), "location-test");
        let mut registry = SubscriptionRegistry::new(BusIdentity::ALL);

        let reply = start_tracking(
            &mut registry,
            &mut session,
            BusIdentity::PortsPrivate,
            AccuracyLevel::Neighborhood,
        )
        .await;

        assert!(!reply.is_subscribed());
        assert!(reply.json().contains("DesktopId set"));
        assert_eq!(registry.total(), 0);
    }
}
