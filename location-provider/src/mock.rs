//! In-memory GeoClue2 stand-in for tests
//!
//! [`MockProvider`] runs the handshake without a bus. Failures can be
//! injected at any [`HandshakeStep`], every handle it hands out is counted
//! while alive, and tests drive the client signals directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use zbus::zvariant::OwnedObjectPath;

use crate::accuracy::AccuracyLevel;
use crate::error::{CallError, HandshakeStep};
use crate::fix::RawLocation;
use crate::provider::{ClientSignal, ClientSignals, Provider};

/// Decrements the shared live-handle count when dropped
#[derive(Debug)]
pub struct HandleGuard {
    live: Arc<AtomicUsize>,
}

impl HandleGuard {
    fn new(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            live: Arc::clone(live),
        }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockManager {
    _guard: HandleGuard,
}

#[derive(Debug)]
pub struct MockClientProps {
    _guard: HandleGuard,
}

#[derive(Debug)]
pub struct MockClient {
    pub path: OwnedObjectPath,
    signal_tx: OnceLock<mpsc::UnboundedSender<ClientSignal>>,
    _guard: HandleGuard,
}

#[derive(Debug, Default)]
struct MockState {
    fail_at: Mutex<Option<HandshakeStep>>,
    fail_stop: AtomicBool,
    emit_on_start: Mutex<Option<RawLocation>>,
    locations: Mutex<HashMap<String, RawLocation>>,
    signal_txs: Mutex<Vec<mpsc::UnboundedSender<ClientSignal>>>,
    desktop_ids: Mutex<Vec<String>>,
    accuracy_levels: Mutex<Vec<AccuracyLevel>>,
    manager_connects: AtomicU32,
    starts: AtomicU32,
    stops: AtomicU32,
    next_client: AtomicU32,
    next_location: AtomicU32,
    live: Arc<AtomicUsize>,
}

/// Mock GeoClue2 provider; clones share state
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    state: Arc<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent handshake fail at `step`
    pub fn fail_at(&self, step: HandshakeStep) {
        *self.state.fail_at.lock().unwrap() = Some(step);
    }

    /// Let handshakes succeed again
    pub fn clear_failure(&self) {
        *self.state.fail_at.lock().unwrap() = None;
    }

    pub fn fail_stop(&self, fail: bool) {
        self.state.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Emit `location` to each client as soon as it is started
    pub fn emit_on_start(&self, location: RawLocation) {
        *self.state.emit_on_start.lock().unwrap() = Some(location);
    }

    /// Publish a new location to every subscribed client
    ///
    /// Returns `true` if at least one client received the signal.
    pub fn emit_location(&self, location: RawLocation) -> bool {
        let path = self.store_location(location);
        self.broadcast(ClientSignal::LocationUpdated { new_path: path })
    }

    /// Publish a location path that cannot be read back
    pub fn emit_unreadable_location(&self) -> bool {
        let path = OwnedObjectPath::try_from("/org/freedesktop/GeoClue2/Location/unreadable")
            .expect("static object path");
        self.broadcast(ClientSignal::LocationUpdated { new_path: path })
    }

    /// Flip the `Active` property of every subscribed client
    pub fn set_active(&self, active: bool) -> bool {
        self.broadcast(ClientSignal::ActiveChanged(active))
    }

    pub fn manager_connects(&self) -> u32 {
        self.state.manager_connects.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> u32 {
        self.state.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.state.stops.load(Ordering::SeqCst)
    }

    /// Number of manager, properties and client handles currently alive
    pub fn live_handles(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    pub fn desktop_ids(&self) -> Vec<String> {
        self.state.desktop_ids.lock().unwrap().clone()
    }

    pub fn accuracy_levels(&self) -> Vec<AccuracyLevel> {
        self.state.accuracy_levels.lock().unwrap().clone()
    }

    fn check(&self, step: HandshakeStep) -> Result<(), CallError> {
        if *self.state.fail_at.lock().unwrap() == Some(step) {
            return Err(CallError::Rejected(format!("mock failure at {}", step)));
        }
        Ok(())
    }

    fn store_location(&self, location: RawLocation) -> OwnedObjectPath {
        let id = self.state.next_location.fetch_add(1, Ordering::SeqCst);
        let path = format!("/org/freedesktop/GeoClue2/Location/{}", id);
        self.state
            .locations
            .lock()
            .unwrap()
            .insert(path.clone(), location);
        OwnedObjectPath::try_from(path).expect("generated object path")
    }

    fn broadcast(&self, signal: ClientSignal) -> bool {
        let mut txs = self.state.signal_txs.lock().unwrap();
        txs.retain(|tx| tx.send(signal.clone()).is_ok());
        !txs.is_empty()
    }
}

#[async_trait]
impl Provider for MockProvider {
    type Manager = MockManager;
    type ClientProps = MockClientProps;
    type Client = MockClient;

    async fn connect_manager(&self) -> Result<Self::Manager, CallError> {
        self.state.manager_connects.fetch_add(1, Ordering::SeqCst);
        self.check(HandshakeStep::ManagerConnect)?;
        Ok(MockManager {
            _guard: HandleGuard::new(&self.state.live),
        })
    }

    async fn get_client(&self, _manager: &Self::Manager) -> Result<OwnedObjectPath, CallError> {
        self.check(HandshakeStep::GetClient)?;
        let id = self.state.next_client.fetch_add(1, Ordering::SeqCst);
        Ok(OwnedObjectPath::try_from(format!(
            "/org/freedesktop/GeoClue2/Client/{}",
            id
        ))?)
    }

    async fn connect_client_properties(
        &self,
        _client_path: &OwnedObjectPath,
    ) -> Result<Self::ClientProps, CallError> {
        self.check(HandshakeStep::ClientPropertiesConnect)?;
        Ok(MockClientProps {
            _guard: HandleGuard::new(&self.state.live),
        })
    }

    async fn set_desktop_id(
        &self,
        _props: &Self::ClientProps,
        desktop_id: &str,
    ) -> Result<(), CallError> {
        self.check(HandshakeStep::SetDesktopId)?;
        self.state
            .desktop_ids
            .lock()
            .unwrap()
            .push(desktop_id.to_string());
        Ok(())
    }

    async fn set_accuracy_level(
        &self,
        _props: &Self::ClientProps,
        level: AccuracyLevel,
    ) -> Result<(), CallError> {
        self.check(HandshakeStep::SetAccuracyLevel)?;
        self.state.accuracy_levels.lock().unwrap().push(level);
        Ok(())
    }

    async fn connect_client(
        &self,
        client_path: &OwnedObjectPath,
    ) -> Result<Self::Client, CallError> {
        self.check(HandshakeStep::ClientConnect)?;
        Ok(MockClient {
            path: client_path.clone(),
            signal_tx: OnceLock::new(),
            _guard: HandleGuard::new(&self.state.live),
        })
    }

    async fn client_signals(
        &self,
        _props: &Self::ClientProps,
        client: &Self::Client,
    ) -> Result<ClientSignals, CallError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = client.signal_tx.set(tx.clone());
        self.state.signal_txs.lock().unwrap().push(tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|signal| (signal, rx))
        });
        Ok(stream.boxed())
    }

    async fn start(&self, client: &Self::Client) -> Result<(), CallError> {
        self.check(HandshakeStep::Start)?;
        self.state.starts.fetch_add(1, Ordering::SeqCst);

        let immediate = *self.state.emit_on_start.lock().unwrap();
        if let (Some(location), Some(tx)) = (immediate, client.signal_tx.get()) {
            let new_path = self.store_location(location);
            let _ = tx.send(ClientSignal::LocationUpdated { new_path });
        }
        Ok(())
    }

    async fn stop(&self, _client: &Self::Client) -> Result<(), CallError> {
        self.state.stops.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_stop.load(Ordering::SeqCst) {
            return Err(CallError::Rejected("mock stop failure".to_string()));
        }
        Ok(())
    }

    async fn read_location(
        &self,
        location_path: &OwnedObjectPath,
    ) -> Result<RawLocation, CallError> {
        self.state
            .locations
            .lock()
            .unwrap()
            .get(location_path.as_str())
            .copied()
            .ok_or_else(|| {
                CallError::Rejected(format!("unknown location {}", location_path.as_str()))
            })
    }
}
