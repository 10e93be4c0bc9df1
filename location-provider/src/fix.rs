//! Location fixes read from GeoClue2 location objects

/// Sentinel reported for any field the provider does not know
pub const UNKNOWN: f64 = -1.0;

/// Raw property values of a `org.freedesktop.GeoClue2.Location` object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawLocation {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters
    pub accuracy: f64,
    /// `-f64::MAX` when unknown
    pub altitude: f64,
}

/// A resolved position, ready to be put on the wire
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in meters, or [`UNKNOWN`]
    pub altitude: f64,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: f64,
    pub heading: f64,
    pub velocity: f64,
    /// Seconds since the epoch at the time the fix was read, not provider time
    pub timestamp: f64,
    pub success: bool,
    pub error_code: i32,
}

impl LocationFix {
    /// Build a fix from raw provider values, stamped with the current time
    pub fn from_raw(raw: RawLocation) -> Self {
        Self::from_raw_at(raw, chrono::Utc::now().timestamp() as f64)
    }

    /// Build a fix from raw provider values with an explicit timestamp
    pub fn from_raw_at(raw: RawLocation, timestamp: f64) -> Self {
        // GeoClue reports an unknown altitude as -G_MAXDOUBLE
        let altitude = if raw.altitude == -f64::MAX {
            UNKNOWN
        } else {
            raw.altitude
        };

        Self {
            latitude: raw.latitude,
            longitude: raw.longitude,
            altitude,
            horizontal_accuracy: raw.accuracy,
            vertical_accuracy: UNKNOWN,
            heading: UNKNOWN,
            velocity: UNKNOWN,
            timestamp,
            success: true,
            error_code: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_altitude_is_normalized() {
        let raw = RawLocation {
            latitude: 37.39,
            longitude: -122.04,
            accuracy: 20.0,
            altitude: -f64::MAX,
        };
        let fix = LocationFix::from_raw_at(raw, 1_400_000_000.0);

        assert_eq!(fix.altitude, -1.0);
        assert_eq!(fix.latitude, 37.39);
        assert_eq!(fix.longitude, -122.04);
        assert_eq!(fix.horizontal_accuracy, 20.0);
        assert_eq!(fix.vertical_accuracy, -1.0);
        assert_eq!(fix.heading, -1.0);
        assert_eq!(fix.velocity, -1.0);
        assert_eq!(fix.timestamp, 1_400_000_000.0);
        assert!(fix.success);
        assert_eq!(fix.error_code, 0);
    }

    #[test]
    fn test_known_altitude_is_kept() {
        let raw = RawLocation {
            latitude: 0.0,
            longitude: 0.0,
            accuracy: 5.0,
            altitude: 312.5,
        };
        assert_eq!(LocationFix::from_raw_at(raw, 0.0).altitude, 312.5);
    }

    #[test]
    fn test_timestamp_is_retrieval_time() {
        let before = chrono::Utc::now().timestamp() as f64;
        let fix = LocationFix::from_raw(RawLocation {
            latitude: 1.0,
            longitude: 2.0,
            accuracy: 3.0,
            altitude: 4.0,
        });
        let after = chrono::Utc::now().timestamp() as f64;

        assert!(fix.timestamp >= before && fix.timestamp <= after);
    }
}
