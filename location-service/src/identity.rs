//! Bus identities the service registers under

use std::fmt;
use std::str::FromStr;

/// Which bus an identity is registered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusKind {
    /// Reachable by every client; the D-Bus session bus
    Public,
    /// Reachable by privileged clients; the D-Bus system bus
    Private,
}

/// One registered bus identity
///
/// Three service names have been in use over time, each registered on both
/// the public and the private bus. Payloads are identical across all six.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BusIdentity {
    PortsPublic,
    PortsPrivate,
    PalmPublic,
    PalmPrivate,
    WebosPublic,
    WebosPrivate,
}

impl BusIdentity {
    pub const ALL: [BusIdentity; 6] = [
        BusIdentity::PortsPublic,
        BusIdentity::PortsPrivate,
        BusIdentity::PalmPublic,
        BusIdentity::PalmPrivate,
        BusIdentity::WebosPublic,
        BusIdentity::WebosPrivate,
    ];

    /// Well-known bus name requested for this identity
    pub fn service_name(self) -> &'static str {
        match self {
            BusIdentity::PortsPublic | BusIdentity::PortsPrivate => "org.webosports.location",
            BusIdentity::PalmPublic | BusIdentity::PalmPrivate => "com.palm.location",
            BusIdentity::WebosPublic | BusIdentity::WebosPrivate => "com.webos.service.location",
        }
    }

    pub fn bus(self) -> BusKind {
        match self {
            BusIdentity::PortsPublic | BusIdentity::PalmPublic | BusIdentity::WebosPublic => {
                BusKind::Public
            }
            BusIdentity::PortsPrivate | BusIdentity::PalmPrivate | BusIdentity::WebosPrivate => {
                BusKind::Private
            }
        }
    }

    /// Short name used on the command line and in logs
    pub fn as_str(self) -> &'static str {
        match self {
            BusIdentity::PortsPublic => "ports-public",
            BusIdentity::PortsPrivate => "ports-private",
            BusIdentity::PalmPublic => "palm-public",
            BusIdentity::PalmPrivate => "palm-private",
            BusIdentity::WebosPublic => "webos-public",
            BusIdentity::WebosPrivate => "webos-private",
        }
    }
}

impl fmt::Display for BusIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown bus identity '{0}'")]
pub struct UnknownIdentityName(pub String);

impl FromStr for BusIdentity {
    type Err = UnknownIdentityName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BusIdentity::ALL
            .into_iter()
            .find(|identity| identity.as_str() == s)
            .ok_or_else(|| UnknownIdentityName(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_name_on_both_buses() {
        for name in ["org.webosports.location", "com.palm.location", "com.webos.service.location"] {
            let buses: Vec<_> = BusIdentity::ALL
                .into_iter()
                .filter(|identity| identity.service_name() == name)
                .map(BusIdentity::bus)
                .collect();
            assert_eq!(buses, vec![BusKind::Public, BusKind::Private], "{}", name);
        }
    }

    #[test]
    fn test_parse_round_trip() {
        for identity in BusIdentity::ALL {
            assert_eq!(identity.as_str().parse::<BusIdentity>(), Ok(identity));
        }
        assert_eq!(
            "palm".parse::<BusIdentity>(),
            Err(UnknownIdentityName("palm".to_string()))
        );
    }
}
