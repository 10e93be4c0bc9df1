//! GeoClue2 accuracy levels

use std::fmt;

/// Accuracy level requested from GeoClue2 via `RequestedAccuracyLevel`
///
/// The discriminants are the values of GeoClue's `GClueAccuracyLevel` enum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum AccuracyLevel {
    Country = 1,
    City = 4,
    #[default]
    Neighborhood = 5,
    Street = 6,
    Exact = 8,
}

impl AccuracyLevel {
    /// All levels, coarsest first
    pub const ALL: [AccuracyLevel; 5] = [
        AccuracyLevel::Country,
        AccuracyLevel::City,
        AccuracyLevel::Neighborhood,
        AccuracyLevel::Street,
        AccuracyLevel::Exact,
    ];

    /// Wire value sent in the `RequestedAccuracyLevel` property
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            AccuracyLevel::Country => "country",
            AccuracyLevel::City => "city",
            AccuracyLevel::Neighborhood => "neighborhood",
            AccuracyLevel::Street => "street",
            AccuracyLevel::Exact => "exact",
        }
    }
}

impl fmt::Display for AccuracyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u32())
    }
}

/// Error returned when a number is not a GeoClue2 accuracy level
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid accuracy level {0}: expected one of 1, 4, 5, 6, 8")]
pub struct InvalidAccuracyLevel(pub u32);

impl TryFrom<u32> for AccuracyLevel {
    type Error = InvalidAccuracyLevel;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        AccuracyLevel::ALL
            .into_iter()
            .find(|level| level.as_u32() == value)
            .ok_or(InvalidAccuracyLevel(value))
    }
}
