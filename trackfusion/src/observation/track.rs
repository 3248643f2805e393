//! The fused output record.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Attributes, EntityType, Position, SafetyFlags};

/// Upsert key for canonical tracks.
///
/// Downstream persistence treats canonical writes as upserts on this key, so
/// re-emitting a window replaces the earlier record instead of adding one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackKey {
    pub entity_type: EntityType,
    pub identity: String,
    pub window_start: DateTime<Utc>,
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}",
            self.entity_type,
            self.identity,
            self.window_start.timestamp_millis()
        )
    }
}

/// The single fused, trusted record for one object within one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalTrack {
    pub entity_type: EntityType,
    pub identity: String,
    pub latitude: f64,
    pub longitude: f64,
    pub attributes: Attributes,
    pub primary_provider: String,
    pub contributing_providers: BTreeSet<String>,
    pub fused_quality: f64,
    #[serde(flatten)]
    pub safety: SafetyFlags,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Another candidate disagreed with the primary beyond tolerance.
    #[serde(default)]
    pub position_disputed: bool,
    /// Only candidate was below the quality threshold.
    #[serde(default)]
    pub low_confidence: bool,
    /// Emitted solely because a circuit-open provider raised a safety flag.
    #[serde(default)]
    pub safety_only: bool,
}

impl CanonicalTrack {
    pub fn key(&self) -> TrackKey {
        TrackKey {
            entity_type: self.entity_type,
            identity: self.identity.clone(),
            window_start: self.window_start,
        }
    }

    #[inline]
    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_wire_shape_has_top_level_flags() {
        let start = Utc.timestamp_millis_opt(1_700_000_010_000).unwrap();
        let track = CanonicalTrack {
            entity_type: EntityType::Aircraft,
            identity: "ABC123".into(),
            latitude: 10.0,
            longitude: 106.0,
            attributes: Attributes::default(),
            primary_provider: "flightradar24".into(),
            contributing_providers: ["adsbexchange", "flightradar24"]
                .into_iter()
                .map(String::from)
                .collect(),
            fused_quality: 0.95,
            safety: SafetyFlags::EMERGENCY,
            window_start: start,
            window_end: start + chrono::Duration::seconds(30),
            position_disputed: true,
            low_confidence: false,
            safety_only: false,
        };

        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["emergency"], true);
        assert_eq!(json["dangerousCargo"], false);
        assert_eq!(json["primaryProvider"], "flightradar24");
        assert_eq!(json["contributingProviders"][0], "adsbexchange");
        assert_eq!(track.key().to_string(), "aircraft:ABC123@1700000010000");
    }
}
