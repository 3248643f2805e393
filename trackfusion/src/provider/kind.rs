//! Catalogue of known position providers.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::observation::EntityType;

/// Known external position providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    FlightRadar24,
    AdsbExchange,
    MarineTraffic,
    VesselFinder,
    Chinaports,
    MarineTrafficV2,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::FlightRadar24,
        ProviderKind::AdsbExchange,
        ProviderKind::MarineTraffic,
        ProviderKind::VesselFinder,
        ProviderKind::Chinaports,
        ProviderKind::MarineTrafficV2,
    ];

    /// Canonical lowercase name used in topics, config keys and logs.
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::FlightRadar24 => "flightradar24",
            ProviderKind::AdsbExchange => "adsbexchange",
            ProviderKind::MarineTraffic => "marinetraffic",
            ProviderKind::VesselFinder => "vesselfinder",
            ProviderKind::Chinaports => "chinaports",
            ProviderKind::MarineTrafficV2 => "marinetrafficv2",
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::FlightRadar24 => "FlightRadar24",
            ProviderKind::AdsbExchange => "ADS-B Exchange",
            ProviderKind::MarineTraffic => "MarineTraffic",
            ProviderKind::VesselFinder => "VesselFinder",
            ProviderKind::Chinaports => "Chinaports",
            ProviderKind::MarineTrafficV2 => "MarineTraffic V2",
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            ProviderKind::FlightRadar24 | ProviderKind::AdsbExchange => EntityType::Aircraft,
            _ => EntityType::Vessel,
        }
    }

    /// Built-in priority rank (lower is more trusted).
    pub fn default_priority(&self) -> u32 {
        match self {
            ProviderKind::FlightRadar24 => 1,
            ProviderKind::AdsbExchange => 2,
            ProviderKind::MarineTraffic => 1,
            ProviderKind::VesselFinder => 2,
            ProviderKind::MarineTrafficV2 => 3,
            ProviderKind::Chinaports => 4,
        }
    }

    pub fn default_poll_interval(&self) -> Duration {
        match self {
            ProviderKind::FlightRadar24 | ProviderKind::AdsbExchange => Duration::from_secs(30),
            ProviderKind::MarineTrafficV2 => Duration::from_secs(45),
            _ => Duration::from_secs(60),
        }
    }

    /// Providers reporting the given entity type.
    pub fn for_entity(entity_type: EntityType) -> impl Iterator<Item = ProviderKind> {
        Self::ALL
            .into_iter()
            .filter(move |k| k.entity_type() == entity_type)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.name() == lower)
            .ok_or_else(|| {
                format!(
                    "unknown provider '{}', expected one of: {}",
                    s,
                    Self::ALL.map(|k| k.name()).join(", ")
                )
            })
    }
}
