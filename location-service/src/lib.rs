//! # location-service
//!
//! A location broker: clients on the bus ask for one-shot fixes or ongoing
//! tracking, and the broker serves them all from GeoClue2.
//!
//! # Architecture
//!
//! ```text
//! bus identities (x6) → ServiceHandle → broker worker → ProviderSession
//!        ↑                                    │
//!        └──── TrackingSink ← fan-out ←───────┘ (location updates)
//! ```
//!
//! - One-shot `getCurrentPosition` requests each run on a private session
//!   with a timeout.
//! - `startTracking` subscriptions are reference counted per identity. The
//!   shared session starts with the first subscription and stops when the
//!   last one is cancelled.
//! - Every update is resolved once and pushed to each identity that still
//!   has subscribers.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use location_provider::GeoClueProvider;
//! use location_service::{spawn_broker, transport, BusIdentity, ServiceConfig};
//!
//! let (handle, worker) = spawn_broker(Arc::new(GeoClueProvider::new()), ServiceConfig::default())?;
//! let registration = transport::register(BusIdentity::PalmPublic, handle.clone()).await?;
//!
//! let reply = handle.get_current_position(BusIdentity::PalmPublic, r#"{"accuracy":1}"#).await;
//! ```

pub mod config;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod identity;
pub mod logging;
pub mod payload;
pub mod registry;
pub mod service;
pub mod transport;
pub mod worker;

pub use config::ServiceConfig;
pub use error::{ConfigError, Result, ServiceError, TransportError};
pub use fanout::{deliver, DeliveryReport, SinkTable, TrackingSink};
pub use handlers::TrackingReply;
pub use identity::{BusIdentity, BusKind};
pub use payload::{AccuracyHint, AckReply, ErrorCode, ErrorReply, PositionReply, PositionRequest};
pub use registry::{SubscribeOutcome, SubscriptionRegistry, UnsubscribeOutcome};
pub use service::{spawn_broker, ServiceHandle};
pub use worker::BrokerStats;
