//! # location-provider
//!
//! Client side of the GeoClue2 geolocation service.
//!
//! The crate owns the multi-step handshake that turns a bare D-Bus connection
//! into a started GeoClue2 client, and exposes the resulting location-update
//! signals as [`SessionEvent`]s.
//!
//! ## Handshake
//!
//! 1. Connect to `org.freedesktop.GeoClue2.Manager`
//! 2. `GetClient()` returns the client object path
//! 3. Connect to the client's `org.freedesktop.DBus.Properties` interface
//! 4. Set `DesktopId`, then `RequestedAccuracyLevel`
//! 5. Connect to the client object and subscribe to its signals
//! 6. `Start()`
//!
//! Every step is tagged with a [`HandshakeStep`] so callers can tell
//! "manager unreachable" apart from "client start rejected".
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use location_provider::{AccuracyLevel, GeoClueProvider, ProviderSession, SessionEvent};
//!
//! let provider = Arc::new(GeoClueProvider::new());
//! let mut session = ProviderSession::new(provider, "location-getposition");
//! session.open(AccuracyLevel::Exact).await?;
//!
//! if let SessionEvent::LocationUpdated(path) = session.next_event().await {
//!     let fix = session.resolve_fix(&path).await?;
//!     println!("{} {}", fix.latitude, fix.longitude);
//! }
//! session.close().await?;
//! ```
//!
//! The [`Provider`] trait is the seam between the session state machine and
//! the wire protocol. [`GeoClueProvider`] talks to the real service; the
//! `test-support` feature adds [`mock::MockProvider`].

pub mod accuracy;
pub mod error;
pub mod fix;
pub mod geoclue;
pub mod provider;
pub mod proxies;
pub mod session;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use accuracy::AccuracyLevel;
pub use error::{CallError, HandshakeStep, Result, SessionError};
pub use fix::{LocationFix, RawLocation};
pub use geoclue::GeoClueProvider;
pub use provider::{ClientSignal, ClientSignals, Provider};
pub use session::{ProviderSession, SessionEvent};

pub use zbus::zvariant::OwnedObjectPath;
