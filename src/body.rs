// Celestial Body - Primary Body Configuration and Gravity Queries
// Static per-body parameters; owns no mutable simulation state

use serde::{Deserialize, Serialize};

use crate::error::VesselError;
use crate::math::Double3;
use crate::orbital::OrbitalState;

// =============================================================================
// REFERENCE BODY CONSTANTS (SI units)
// =============================================================================

/// Reference body radius (m).
pub const KERBIN_RADIUS: f64 = 600_000.0;

/// Reference body gravitational parameter mu = G*M (m^3/s^2).
pub const KERBIN_GM: f64 = 3.5316e12;

/// Altitude at which the atmosphere ends exactly (m).
pub const KERBIN_ATMOSPHERE_HEIGHT: f64 = 70_000.0;

/// Exponential atmosphere scale height (m).
pub const KERBIN_SCALE_HEIGHT: f64 = 5_600.0;

/// Sea-level atmospheric density (kg/m^3).
pub const KERBIN_SEA_LEVEL_DENSITY: f64 = 1.225;

/// Sea-level atmospheric pressure (Pa).
pub const KERBIN_SEA_LEVEL_PRESSURE: f64 = 101_325.0;

/// Sea-level temperature (K).
pub const KERBIN_SEA_LEVEL_TEMPERATURE: f64 = 288.15;

// =============================================================================
// CELESTIAL BODY
// =============================================================================

/// Static gravitational and atmospheric parameters of the primary body.
/// Effectively immutable configuration, shared read-only across the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CelestialBody {
    pub name: String,
    /// Body radius (m).
    pub radius: f64,
    /// Gravitational parameter mu = G*M (m^3/s^2).
    pub gravitational_parameter: f64,
    /// Altitude above which density is exactly zero (m).
    pub atmosphere_height: f64,
    /// Exponential density scale height (m).
    pub scale_height: f64,
    /// Density at zero altitude (kg/m^3).
    pub sea_level_density: f64,
    /// Body center in the current (floating-origin) frame.
    pub position: Double3,
}

impl CelestialBody {
    /// The Kerbin-analog reference body, centered at the origin.
    pub fn kerbin() -> Self {
        Self {
            name: "Kerbin".to_string(),
            radius: KERBIN_RADIUS,
            gravitational_parameter: KERBIN_GM,
            atmosphere_height: KERBIN_ATMOSPHERE_HEIGHT,
            scale_height: KERBIN_SCALE_HEIGHT,
            sea_level_density: KERBIN_SEA_LEVEL_DENSITY,
            position: Double3::zero(),
        }
    }

    /// Gravitational acceleration `-mu * r_hat / |r|^2` at `position`.
    /// A position at the body center is a domain error, never a division.
    pub fn gravitational_acceleration(&self, position: Double3) -> Result<Double3, VesselError> {
        let r_vec = position.sub(&self.position);
        let r = r_vec.magnitude();
        if r < 1e-6 {
            return Err(VesselError::AtBodyCenter);
        }
        let accel_mag = self.gravitational_parameter / (r * r);
        Ok(r_vec.normalize().scale(-accel_mag))
    }

    /// Altitude above the body surface (m). Negative below the surface.
    pub fn altitude(&self, position: Double3) -> f64 {
        position.sub(&self.position).magnitude() - self.radius
    }

    pub fn is_in_atmosphere(&self, position: Double3) -> bool {
        let alt = self.altitude(position);
        alt < self.atmosphere_height
    }

    /// Circular orbit at `altitude` above the surface, built from vis-viva
    /// (`v = sqrt(mu/r)` at the circular radius).
    pub fn create_circular_orbit(
        &self,
        altitude: f64,
        inclination: f64,
        epoch: f64,
    ) -> Result<OrbitalState, VesselError> {
        let r = self.radius + altitude;
        if r <= 0.0 || !r.is_finite() {
            return Err(VesselError::AtBodyCenter);
        }
        Ok(OrbitalState::new(
            r,
            0.0,
            inclination,
            0.0,
            0.0,
            0.0,
            epoch,
            self.gravitational_parameter,
        ))
    }
}

// =============================================================================
// TESTS
// =============================================================================
