//! Core observation types shared by every stage of the pipeline.
//!
//! - [`EntityType`] - Aircraft or vessel; scopes every identity
//! - [`Position`] - WGS-84 latitude/longitude pair
//! - [`SafetyFlags`] - Emergency, dangerous cargo and security alert bits
//! - [`Attributes`] - Kinematic and descriptive fields reported by a provider
//! - [`RawObservation`] - One provider's report of one object at one instant

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo;

/// Kind of tracked object.
///
/// Identities are only unique within an entity type: a hexident and an MMSI
/// that happen to share a string never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Aircraft,
    Vessel,
}

impl EntityType {
    /// All entity types, in a stable order.
    pub const ALL: [EntityType; 2] = [EntityType::Aircraft, EntityType::Vessel];

    /// Returns a lowercase name used in topic names and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Aircraft => "aircraft",
            EntityType::Vessel => "vessel",
        }
    }

    /// Name of the identity field for this entity type.
    pub fn identity_label(&self) -> &'static str {
        match self {
            EntityType::Aircraft => "hexident",
            EntityType::Vessel => "mmsi",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aircraft" => Ok(EntityType::Aircraft),
            "vessel" | "ship" => Ok(EntityType::Vessel),
            other => Err(format!("unknown entity type '{}'", other)),
        }
    }
}

/// A reported position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to another position in meters.
    #[inline]
    pub fn distance_m(&self, other: &Position) -> f64 {
        geo::distance_m(
            (self.latitude, self.longitude),
            (other.latitude, other.longitude),
        )
    }
}

/// Safety-critical status bits.
///
/// These propagate into the canonical track if any contributing
/// observation sets them, whatever the provider's trust level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyFlags {
    #[serde(default)]
    pub emergency: bool,
    #[serde(default)]
    pub dangerous_cargo: bool,
    #[serde(default)]
    pub security_alert: bool,
}

impl SafetyFlags {
    pub const EMERGENCY: Self = Self {
        emergency: true,
        dangerous_cargo: false,
        security_alert: false,
    };

    /// Returns true if any flag is set.
    #[inline]
    pub fn any(&self) -> bool {
        self.emergency || self.dangerous_cargo || self.security_alert
    }

    /// Logical OR of two flag sets.
    #[inline]
    pub fn union(self, other: SafetyFlags) -> SafetyFlags {
        SafetyFlags {
            emergency: self.emergency || other.emergency,
            dangerous_cargo: self.dangerous_cargo || other.dangerous_cargo,
            security_alert: self.security_alert || other.security_alert,
        }
    }
}

/// Kinematic and descriptive fields of an observation.
///
/// Every field other than the safety flags is optional because providers
/// disagree on what they report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attributes {
    /// Ground speed in knots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kn: Option<f64>,
    /// Heading or course over ground, degrees true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f64>,
    /// Barometric altitude in feet (aircraft).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_ft: Option<f64>,
    /// Draught in meters (vessels).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draught_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    /// Vessel name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aircraft_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(flatten)]
    pub flags: SafetyFlags,
}

impl Attributes {
    /// Fill any field missing here from `other`.
    ///
    /// Safety flags are not touched; those are unioned separately.
    pub fn fill_missing_from(&mut self, other: &Attributes) {
        fn fill<T: Clone>(slot: &mut Option<T>, from: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(from);
            }
        }

        fill(&mut self.speed_kn, &other.speed_kn);
        fill(&mut self.heading_deg, &other.heading_deg);
        fill(&mut self.altitude_ft, &other.altitude_ft);
        fill(&mut self.draught_m, &other.draught_m);
        fill(&mut self.callsign, &other.callsign);
        fill(&mut self.name, &other.name);
        fill(&mut self.aircraft_type, &other.aircraft_type);
        fill(&mut self.registration, &other.registration);
        fill(&mut self.imo, &other.imo);
        fill(&mut self.destination, &other.destination);
    }
}

/// One provider's unmerged report of one object at one instant.
///
/// Observations are immutable once published to the bus; a newer report
/// supersedes an older one but never modifies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawObservation {
    pub entity_type: EntityType,
    pub provider: String,
    /// Hexident for aircraft, MMSI for vessels. Provider-reported.
    pub identity: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub attributes: Attributes,
    /// Provider-estimated confidence, 0.0 to 1.0.
    pub quality: f64,
    #[serde(rename = "apiResponseTimeMs", default)]
    pub provider_response_time_ms: u64,
    pub received_at: DateTime<Utc>,
    #[serde(rename = "isValid", default)]
    pub valid: bool,
}

impl RawObservation {
    /// Create an observation with empty attributes.
    pub fn new(
        entity_type: EntityType,
        provider: impl Into<String>,
        identity: impl Into<String>,
        position: Position,
        quality: f64,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_type,
            provider: provider.into(),
            identity: identity.into(),
            latitude: position.latitude,
            longitude: position.longitude,
            attributes: Attributes::default(),
            quality,
            provider_response_time_ms: 0,
            received_at,
            valid: false,
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_flags(mut self, flags: SafetyFlags) -> Self {
        self.attributes.flags = flags;
        self
    }

    pub fn with_response_time_ms(mut self, ms: u64) -> Self {
        self.provider_response_time_ms = ms;
        self
    }

    #[inline]
    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }

    #[inline]
    pub fn flags(&self) -> SafetyFlags {
        self.attributes.flags
    }

    /// Key used for partitioning and grouping: `<entity>:<identity>`.
    pub fn scoped_identity(&self) -> String {
        format!("{}:{}", self.entity_type, self.identity.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RawObservation {
        RawObservation::new(
            EntityType::Aircraft,
            "flightradar24",
            "ABC123",
            Position::new(10.0, 106.0),
            0.9,
            Utc::now(),
        )
    }

    #[test]
    fn test_entity_type_parse() {
        assert_eq!("Aircraft".parse::<EntityType>(), Ok(EntityType::Aircraft));
        assert_eq!("ship".parse::<EntityType>(), Ok(EntityType::Vessel));
        assert!("train".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_safety_union() {
        let a = SafetyFlags::EMERGENCY;
        let b = SafetyFlags {
            security_alert: true,
            ..Default::default()
        };
        let u = a.union(b);
        assert!(u.emergency && u.security_alert && !u.dangerous_cargo);
        assert!(!SafetyFlags::default().any());
    }

    #[test]
    fn test_fill_missing_keeps_existing_values() {
        let mut primary = Attributes {
            callsign: Some("VN123".into()),
            ..Default::default()
        };
        let secondary = Attributes {
            callsign: Some("OTHER".into()),
            registration: Some("VN-A321".into()),
            flags: SafetyFlags::EMERGENCY,
            ..Default::default()
        };
        primary.fill_missing_from(&secondary);
        assert_eq!(primary.callsign.as_deref(), Some("VN123"));
        assert_eq!(primary.registration.as_deref(), Some("VN-A321"));
        assert!(!primary.flags.emergency, "flags are not gap-filled");
    }

    #[test]
    fn test_wire_shape_field_names() {
        let obs = sample().with_flags(SafetyFlags::EMERGENCY);
        let json = serde_json::to_value(&obs).unwrap();
        assert_eq!(json["entityType"], "aircraft");
        assert_eq!(json["apiResponseTimeMs"], 0);
        assert_eq!(json["isValid"], false);
        assert_eq!(json["attributes"]["emergency"], true);
        assert!(json.get("receivedAt").is_some());
    }

    #[test]
    fn test_scoped_identity() {
        assert_eq!(sample().scoped_identity(), "aircraft:ABC123");
    }
}
