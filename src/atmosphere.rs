// Atmosphere Model and Dynamic Pressure
// Exponential density/pressure, linear-lapse temperature, Q classification
// with hysteresis for downstream consumers

use serde::{Deserialize, Serialize};
use std::cell::Cell;

use crate::body::{
    KERBIN_ATMOSPHERE_HEIGHT, KERBIN_SCALE_HEIGHT, KERBIN_SEA_LEVEL_DENSITY,
    KERBIN_SEA_LEVEL_PRESSURE, KERBIN_SEA_LEVEL_TEMPERATURE,
};

/// Temperature lapse rate (K/m).
const LAPSE_RATE: f64 = 6.5e-3;

/// Lower temperature clamp for the lapse model (K).
const TEMPERATURE_FLOOR: f64 = 170.0;

/// Exponent clamp for the density/pressure models. Anything below this would
/// produce denormal floats; the physical answer is indistinguishable from zero.
const MIN_EXPONENT: f64 = -700.0;

// =============================================================================
// ATMOSPHERE
// =============================================================================

/// Properties of the atmosphere at one altitude.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AtmosphereSample {
    pub altitude: f64,
    /// kg/m^3
    pub density: f64,
    /// Pa
    pub pressure: f64,
    /// K
    pub temperature: f64,
}

/// Exponential atmosphere of the primary body.
///
/// A one-entry memo of the last sampled altitude covers the common case of
/// several same-altitude queries within a tick; the cold path computes the
/// identical result, so correctness never depends on the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atmosphere {
    /// Altitude above which all properties are exactly zero-density (m).
    pub atmosphere_height: f64,
    /// Exponential scale height (m).
    pub scale_height: f64,
    /// kg/m^3 at zero altitude.
    pub sea_level_density: f64,
    /// Pa at zero altitude.
    pub sea_level_pressure: f64,
    /// K at zero altitude.
    pub sea_level_temperature: f64,
    #[serde(skip)]
    last_sample: Cell<Option<AtmosphereSample>>,
}

impl Atmosphere {
    pub fn kerbin() -> Self {
        Self {
            atmosphere_height: KERBIN_ATMOSPHERE_HEIGHT,
            scale_height: KERBIN_SCALE_HEIGHT,
            sea_level_density: KERBIN_SEA_LEVEL_DENSITY,
            sea_level_pressure: KERBIN_SEA_LEVEL_PRESSURE,
            sea_level_temperature: KERBIN_SEA_LEVEL_TEMPERATURE,
            last_sample: Cell::new(None),
        }
    }

    /// Density `rho0 * exp(-h/H)` for `h <= atmosphere_height`, exactly 0 above.
    pub fn density(&self, altitude: f64) -> f64 {
        self.sample(altitude).density
    }

    /// Pressure, same exponential profile as density.
    pub fn pressure(&self, altitude: f64) -> f64 {
        self.sample(altitude).pressure
    }

    /// Linear-lapse temperature clamped to a 170 K floor.
    pub fn temperature(&self, altitude: f64) -> f64 {
        self.sample(altitude).temperature
    }

    /// All properties at `altitude`, memoized for repeated same-altitude
    /// queries within a tick.
    pub fn sample(&self, altitude: f64) -> AtmosphereSample {
        if let Some(cached) = self.last_sample.get() {
            if cached.altitude == altitude {
                return cached;
            }
        }
        let sample = self.compute_sample(altitude);
        self.last_sample.set(Some(sample));
        sample
    }

    fn compute_sample(&self, altitude: f64) -> AtmosphereSample {
        let (density, pressure) = if altitude >= self.atmosphere_height {
            (0.0, 0.0)
        } else {
            let exponent = (-altitude / self.scale_height).max(MIN_EXPONENT);
            let factor = exponent.exp();
            (self.sea_level_density * factor, self.sea_level_pressure * factor)
        };

        let temperature = (self.sea_level_temperature - LAPSE_RATE * altitude.max(0.0))
            .max(TEMPERATURE_FLOOR);

        AtmosphereSample {
            altitude,
            density,
            pressure,
            temperature,
        }
    }
}

// =============================================================================
// DYNAMIC PRESSURE
// =============================================================================

/// Dynamic pressure Q = 0.5 * rho * v^2 (Pa). Exact zero density yields
/// exact zero Q.
pub fn dynamic_pressure(speed: f64, density: f64) -> f64 {
    0.5 * density * speed * speed
}

/// Coarse Q buckets for consumers that only need a severity class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum QCategory {
    Minimal,
    Low,
    Moderate,
    High,
    Critical,
}

impl QCategory {
    /// Classify a dynamic pressure in Pa.
    pub fn classify(q: f64) -> Self {
        if q < 1_000.0 {
            QCategory::Minimal
        } else if q < 8_000.0 {
            QCategory::Low
        } else if q < 20_000.0 {
            QCategory::Moderate
        } else if q < 40_000.0 {
            QCategory::High
        } else {
            QCategory::Critical
        }
    }
}

/// Paired enable/disable threshold with hysteresis. The asymmetric band
/// prevents rapid toggling when Q hovers near a single boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QHysteresis {
    /// Latch turns on at or above this Q (Pa).
    pub enable_threshold: f64,
    /// Latch turns off strictly below this Q (Pa). Must not exceed `enable_threshold`.
    pub disable_threshold: f64,
    active: bool,
}

impl QHysteresis {
    pub fn new(enable_threshold: f64, disable_threshold: f64) -> Self {
        debug_assert!(disable_threshold <= enable_threshold);
        Self {
            enable_threshold,
            disable_threshold,
            active: false,
        }
    }

    /// Feed the current Q; returns the latched state.
    pub fn update(&mut self, q: f64) -> bool {
        if q >= self.enable_threshold {
            self.active = true;
        } else if q < self.disable_threshold {
            self.active = false;
        }
        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

// =============================================================================
// TESTS
// =============================================================================
