//! Best-effort click enrichment: location from the visitor's address, device
//! class from the User-Agent.

pub mod device;
pub mod geo;

pub use device::{classify_device, DeviceClass};
pub use geo::{is_private, DisabledGeo, EnrichError, GeoInfo, GeoLookup, HttpGeoLocator};

/// Placeholder for anything enrichment could not determine
pub const UNKNOWN: &str = "Unknown";
