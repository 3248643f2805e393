//! Observation data model.
//!
//! Raw provider reports ([`RawObservation`]) flow in; fused records
//! ([`CanonicalTrack`]) flow out. Both carry the same JSON wire shape the
//! bus and downstream sinks exchange.

mod track;
mod types;
mod validation;

pub use track::{CanonicalTrack, TrackKey};
pub use types::{Attributes, EntityType, Position, RawObservation, SafetyFlags};
pub use validation::{validate, ValidationError};
