//! Structural validation applied before an observation reaches the bus.

use thiserror::Error;

use super::types::RawObservation;

/// Reasons an observation is rejected at publish time.
///
/// Validation failures are a data-quality signal: the observation is
/// counted against its provider and dropped, never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("identity is missing")]
    MissingIdentity,

    #[error("provider name is missing")]
    MissingProvider,

    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("quality {0} is outside [0, 1]")]
    QualityOutOfRange(f64),
}

impl ValidationError {
    /// Short machine-friendly label for counters and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::MissingIdentity => "missing_identity",
            ValidationError::MissingProvider => "missing_provider",
            ValidationError::LatitudeOutOfRange(_) => "latitude_range",
            ValidationError::LongitudeOutOfRange(_) => "longitude_range",
            ValidationError::QualityOutOfRange(_) => "quality_range",
        }
    }
}

/// Check required fields and ranges.
///
/// NaN coordinates or quality fail the range checks.
pub fn validate(obs: &RawObservation) -> Result<(), ValidationError> {
    if obs.identity.trim().is_empty() {
        return Err(ValidationError::MissingIdentity);
    }
    if obs.provider.trim().is_empty() {
        return Err(ValidationError::MissingProvider);
    }
    if !(-90.0..=90.0).contains(&obs.latitude) {
        return Err(ValidationError::LatitudeOutOfRange(obs.latitude));
    }
    if !(-180.0..=180.0).contains(&obs.longitude) {
        return Err(ValidationError::LongitudeOutOfRange(obs.longitude));
    }
    if !(0.0..=1.0).contains(&obs.quality) {
        return Err(ValidationError::QualityOutOfRange(obs.quality));
    }
    Ok(())
}

impl RawObservation {
    /// Validate and return the observation marked valid.
    ///
    /// The identity is trimmed and the provider name trimmed and lowercased,
    /// matching the names used for topics and health tracking.
    pub fn validated(mut self) -> Result<Self, ValidationError> {
        validate(&self)?;
        let trimmed = self.identity.trim();
        if trimmed.len() != self.identity.len() {
            self.identity = trimmed.to_string();
        }
        let provider = self.provider.trim();
        if provider.len() != self.provider.len() || provider.chars().any(char::is_uppercase) {
            self.provider = provider.to_lowercase();
        }
        self.valid = true;
        Ok(self)
    }
}
