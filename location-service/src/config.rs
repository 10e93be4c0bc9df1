//! Configuration for the location broker
//!
//! [`ServiceConfig`] controls the identities the daemon registers, the
//! GeoClue2 desktop id it presents and the defaults applied to requests.

use std::collections::BTreeSet;
use std::time::Duration;

use location_provider::AccuracyLevel;

use crate::error::ConfigError;
use crate::identity::BusIdentity;

/// Configuration for the broker worker and the bus transport
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Desktop id presented to GeoClue2
    /// Default: "location-service"
    pub desktop_id: String,

    /// Wait for a one-shot fix when the request carries no timeout
    /// Default: 30 seconds
    pub default_timeout: Duration,

    /// Accuracy requested when the first tracking subscriber has no preference
    /// Default: Neighborhood
    pub tracking_accuracy: AccuracyLevel,

    /// Identities to register on the bus
    /// Default: all six
    pub identities: BTreeSet<BusIdentity>,

    /// Capacity of the worker's command queue
    /// Default: 64
    pub command_queue_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            desktop_id: "location-service".to_string(),
            default_timeout: Duration::from_secs(30),
            tracking_accuracy: AccuracyLevel::Neighborhood,
            identities: BusIdentity::ALL.into_iter().collect(),
            command_queue_size: 64,
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the historical `com.palm.location` identities
    pub fn legacy_only() -> Self {
        Self {
            identities: [BusIdentity::PalmPublic, BusIdentity::PalmPrivate]
                .into_iter()
                .collect(),
            ..Default::default()
        }
    }

    /// Only the session-bus identities, for running without system bus access
    pub fn public_only() -> Self {
        Self {
            identities: BusIdentity::ALL
                .into_iter()
                .filter(|identity| identity.bus() == crate::identity::BusKind::Public)
                .collect(),
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.desktop_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "Desktop id must not be empty".to_string(),
            ));
        }

        if self.default_timeout == Duration::ZERO {
            return Err(ConfigError::Invalid(
                "Default timeout must be greater than 0".to_string(),
            ));
        }

        if self.identities.is_empty() {
            return Err(ConfigError::Invalid(
                "At least one bus identity must be enabled".to_string(),
            ));
        }

        if self.command_queue_size == 0 {
            return Err(ConfigError::Invalid(
                "Command queue size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_desktop_id(mut self, desktop_id: impl Into<String>) -> Self {
        self.desktop_id = desktop_id.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_tracking_accuracy(mut self, level: AccuracyLevel) -> Self {
        self.tracking_accuracy = level;
        self
    }

    pub fn with_identities(mut self, identities: impl IntoIterator<Item = BusIdentity>) -> Self {
        self.identities = identities.into_iter().collect();
        self
    }

    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.command_queue_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.desktop_id, "location-service");
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.tracking_accuracy, AccuracyLevel::Neighborhood);
        assert_eq!(config.identities.len(), 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let no_identities = ServiceConfig::new().with_identities([]);
        assert!(no_identities.validate().is_err());

        let zero_timeout = ServiceConfig::new().with_default_timeout(Duration::ZERO);
        assert!(zero_timeout.validate().is_err());

        let blank_id = ServiceConfig::new().with_desktop_id("  ");
        assert!(blank_id.validate().is_err());

        let zero_queue = ServiceConfig::new().with_queue_size(0);
        assert!(zero_queue.validate().is_err());
    }

    #[test]
    fn test_config_presets() {
        let legacy = ServiceConfig::legacy_only();
        assert!(legacy.identities.contains(&BusIdentity::PalmPrivate));
        assert_eq!(legacy.identities.len(), 2);
        assert!(legacy.validate().is_ok());

        let public = ServiceConfig::public_only();
        assert!(public.identities.contains(&BusIdentity::WebosPublic));
        assert!(!public.identities.contains(&BusIdentity::PortsPrivate));
        assert!(public.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ServiceConfig::new()
            .with_desktop_id("location-test")
            .with_default_timeout(Duration::from_secs(5))
            .with_tracking_accuracy(AccuracyLevel::Street)
            .with_identities([BusIdentity::PortsPublic])
            .with_queue_size(8);

        assert_eq!(config.desktop_id, "location-test");
        assert_eq!(config.default_timeout, Duration::from_secs(5));
        assert_eq!(config.tracking_accuracy, AccuracyLevel::Street);
        assert_eq!(config.identities.len(), 1);
        assert_eq!(config.command_queue_size, 8);
        assert!(config.validate().is_ok());
    }
}
