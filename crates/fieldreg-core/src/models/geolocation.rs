//! Geolocation readings and the provider boundary

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single location fix captured on the device.
///
/// Attached to a customer as a whole; a reading is never edited field by field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geolocation {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Accuracy radius in metres
    pub accuracy: f64,
    /// Capture timestamp (Unix ms)
    pub captured_at: i64,
}

impl Geolocation {
    /// Build a reading, rejecting out-of-range coordinates.
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, captured_at: i64) -> Result<Self, String> {
        let reading = Self {
            latitude,
            longitude,
            accuracy,
            captured_at,
        };
        reading.validate()?;
        Ok(reading)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(format!("latitude {} is outside [-90, 90]", self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(format!("longitude {} is outside [-180, 180]", self.longitude));
        }
        if !self.accuracy.is_finite() || self.accuracy < 0.0 {
            return Err(format!("accuracy {} must be a non-negative number", self.accuracy));
        }
        Ok(())
    }

    /// Short `lat, lon` label with four decimals.
    pub fn label(&self) -> String {
        format!("{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// Why a location request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationError {
    #[error("Location access denied by user")]
    Denied,
    #[error("Location information unavailable")]
    Unavailable,
    #[error("Location request timed out")]
    TimedOut,
}

/// One-shot source of location fixes.
///
/// Implemented by the platform layer; the store and sync engine never call it.
/// The caller attaches the reading to a customer before saving.
pub trait LocationProvider: Send + Sync {
    fn current_location(&self) -> impl Future<Output = Result<Geolocation, LocationError>> + Send;
}
