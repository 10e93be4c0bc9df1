//! zbus proxies for the GeoClue2 D-Bus interfaces

use zbus::proxy;
use zbus::zvariant::OwnedObjectPath;

pub const GEOCLUE_SERVICE: &str = "org.freedesktop.GeoClue2";
pub const CLIENT_INTERFACE: &str = "org.freedesktop.GeoClue2.Client";

#[proxy(
    interface = "org.freedesktop.GeoClue2.Manager",
    default_service = "org.freedesktop.GeoClue2",
    default_path = "/org/freedesktop/GeoClue2/Manager"
)]
pub trait Manager {
    fn get_client(&self) -> zbus::Result<OwnedObjectPath>;
}

#[proxy(
    interface = "org.freedesktop.GeoClue2.Client",
    default_service = "org.freedesktop.GeoClue2"
)]
pub trait Client {
    fn start(&self) -> zbus::Result<()>;

    fn stop(&self) -> zbus::Result<()>;

    #[zbus(signal)]
    fn location_updated(
        &self,
        old_path: OwnedObjectPath,
        new_path: OwnedObjectPath,
    ) -> zbus::Result<()>;
}

#[proxy(
    interface = "org.freedesktop.GeoClue2.Location",
    default_service = "org.freedesktop.GeoClue2"
)]
pub trait Location {
    #[zbus(property)]
    fn latitude(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn longitude(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn accuracy(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn altitude(&self) -> zbus::Result<f64>;
}
