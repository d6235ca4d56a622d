// Orbital State - Keplerian Elements Value Type
// Immutable six-element state with Cartesian conversions; propagation returns
// a new value, elements other than anomaly/epoch never change

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::KeplerError;
use crate::kepler;
use crate::math::Double3;

/// Angular tolerance below which an orbit is treated as circular or
/// equatorial during element extraction.
const DEGENERACY_TOLERANCE: f64 = 1e-11;

/// Classical Keplerian elements plus epoch and gravitational parameter.
/// Angles in radians, distances in meters, times in seconds of universal time.
///
/// The elliptic branch is selected by `eccentricity < 1`; the semi-major axis
/// is negative on the hyperbolic branch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OrbitalState {
    /// Semi-major axis (m). Negative for hyperbolic orbits.
    pub semi_major_axis: f64,
    /// Eccentricity, `[0, inf)`.
    pub eccentricity: f64,
    /// Inclination (rad).
    pub inclination: f64,
    /// Longitude of the ascending node (rad).
    pub longitude_of_ascending_node: f64,
    /// Argument of periapsis (rad).
    pub argument_of_periapsis: f64,
    /// Mean anomaly at `epoch` (rad).
    pub mean_anomaly: f64,
    /// Universal time the anomaly refers to (s).
    pub epoch: f64,
    /// Gravitational parameter mu = G*M of the primary (m^3/s^2).
    pub gravitational_parameter: f64,
}

impl OrbitalState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        semi_major_axis: f64,
        eccentricity: f64,
        inclination: f64,
        longitude_of_ascending_node: f64,
        argument_of_periapsis: f64,
        mean_anomaly: f64,
        epoch: f64,
        gravitational_parameter: f64,
    ) -> Self {
        Self {
            semi_major_axis,
            eccentricity,
            inclination,
            longitude_of_ascending_node,
            argument_of_periapsis,
            mean_anomaly,
            epoch,
            gravitational_parameter,
        }
    }

    // =========================================================================
    // CARTESIAN CONVERSIONS
    // =========================================================================

    /// Extract orbital elements from a Cartesian state at `epoch`.
    ///
    /// Near-circular and near-equatorial cases fall back to reference
    /// directions (the node line defaults to +X, the periapsis direction to
    /// the node line) instead of producing NaN angles.
    pub fn from_cartesian(
        position: Double3,
        velocity: Double3,
        epoch: f64,
        gravitational_parameter: f64,
    ) -> Result<Self, KeplerError> {
        let mu = gravitational_parameter;
        if mu <= 0.0 || !mu.is_finite() {
            return Err(KeplerError::InvalidGravitationalParameter(mu));
        }

        let r = position.magnitude();
        let v2 = velocity.magnitude_squared();
        if r < 1e-10 {
            return Err(KeplerError::DegenerateState("position at body center"));
        }

        // Specific angular momentum and node vector.
        let h_vec = position.cross(&velocity);
        let h = h_vec.magnitude();
        if h < 1e-10 {
            return Err(KeplerError::DegenerateState("radial trajectory, no angular momentum"));
        }
        let node_vec = Double3::new(-h_vec.y, h_vec.x, 0.0);
        let node = node_vec.magnitude();

        // Eccentricity vector.
        let rv = position.dot(&velocity);
        let e_vec = position
            .scale(v2 - mu / r)
            .sub(&velocity.scale(rv))
            .scale(1.0 / mu);
        let e = e_vec.magnitude();

        // Specific orbital energy fixes the semi-major axis on both branches.
        let energy = v2 / 2.0 - mu / r;
        let a = if energy.abs() > 1e-30 {
            -mu / (2.0 * energy)
        } else {
            // Exactly parabolic; nudge onto the hyperbolic branch.
            -f64::MAX
        };

        let inclination = (h_vec.z / h).clamp(-1.0, 1.0).acos();

        let equatorial = node < DEGENERACY_TOLERANCE;
        let circular = e < DEGENERACY_TOLERANCE;

        let longitude_of_ascending_node = if equatorial {
            0.0
        } else {
            let mut raan = (node_vec.x / node).clamp(-1.0, 1.0).acos();
            if node_vec.y < 0.0 {
                raan = 2.0 * PI - raan;
            }
            raan
        };

        let argument_of_periapsis = if circular {
            0.0
        } else if equatorial {
            // Node line undefined; measure periapsis from +X, sign from h_z.
            let mut argp = e_vec.y.atan2(e_vec.x);
            if h_vec.z < 0.0 {
                argp = -argp;
            }
            argp.rem_euclid(2.0 * PI)
        } else {
            let mut argp = (node_vec.dot(&e_vec) / (node * e)).clamp(-1.0, 1.0).acos();
            if e_vec.z < 0.0 {
                argp = 2.0 * PI - argp;
            }
            argp
        };

        let true_anomaly = if circular {
            // Measure from the node line, or +X when that is also degenerate.
            let reference = if equatorial {
                Double3::new(1.0, 0.0, 0.0)
            } else {
                node_vec.scale(1.0 / node)
            };
            let mut nu = (reference.dot(&position) / r).clamp(-1.0, 1.0).acos();
            if reference.cross(&position).dot(&h_vec) < 0.0 {
                nu = 2.0 * PI - nu;
            }
            nu
        } else {
            let mut nu = (e_vec.dot(&position) / (e * r)).clamp(-1.0, 1.0).acos();
            if rv < 0.0 {
                nu = 2.0 * PI - nu;
            }
            nu
        };

        let mean_anomaly = if e < 1.0 {
            let e_anom = 2.0
                * ((1.0 - e).sqrt() * (true_anomaly / 2.0).sin())
                    .atan2((1.0 + e).sqrt() * (true_anomaly / 2.0).cos());
            (e_anom - e * e_anom.sin()).rem_euclid(2.0 * PI)
        } else {
            // tanh(H/2) = sqrt((e-1)/(e+1)) * tan(nu/2)
            let ratio = ((e - 1.0) / (e + 1.0)).sqrt() * (true_anomaly / 2.0).tan();
            let h_anom = 2.0 * ratio.atanh();
            e * h_anom.sinh() - h_anom
        };

        Ok(Self {
            semi_major_axis: a,
            eccentricity: e,
            inclination,
            longitude_of_ascending_node,
            argument_of_periapsis,
            mean_anomaly,
            epoch,
            gravitational_parameter: mu,
        })
    }

    /// Cartesian position and velocity at universal time `time`.
    pub fn to_cartesian(&self, time: f64) -> Result<(Double3, Double3), KeplerError> {
        kepler::state_at_time(self, time)
    }

    // =========================================================================
    // PROPAGATION AND DERIVED QUANTITIES
    // =========================================================================

    /// New state with the anomaly and epoch advanced to `time`. All other
    /// elements are constant between impulsive maneuvers.
    pub fn propagate_to(&self, time: f64) -> Self {
        let mut advanced = self.mean_anomaly + self.mean_motion() * (time - self.epoch);
        if self.eccentricity < 1.0 {
            advanced = advanced.rem_euclid(2.0 * PI);
        }
        Self {
            mean_anomaly: advanced,
            epoch: time,
            ..*self
        }
    }

    /// Mean motion n = sqrt(mu / |a|^3) (rad/s).
    pub fn mean_motion(&self) -> f64 {
        (self.gravitational_parameter / self.semi_major_axis.abs().powi(3)).sqrt()
    }

    /// Orbital period T = 2*pi*sqrt(a^3/mu) (s). `None` on the hyperbolic branch.
    pub fn period(&self) -> Option<f64> {
        if self.eccentricity < 1.0 && self.semi_major_axis > 0.0 {
            Some(2.0 * PI * (self.semi_major_axis.powi(3) / self.gravitational_parameter).sqrt())
        } else {
            None
        }
    }

    /// Periapsis radius from the body center (m).
    pub fn periapsis_radius(&self) -> f64 {
        self.semi_major_axis * (1.0 - self.eccentricity)
    }

    /// Apoapsis radius from the body center (m). `None` on the hyperbolic branch.
    pub fn apoapsis_radius(&self) -> Option<f64> {
        if self.eccentricity < 1.0 {
            Some(self.semi_major_axis * (1.0 + self.eccentricity))
        } else {
            None
        }
    }

    /// Sanity gate used before trusting a freshly derived state.
    pub fn is_valid(&self) -> bool {
        let finite = self.semi_major_axis.is_finite()
            && self.eccentricity.is_finite()
            && self.inclination.is_finite()
            && self.longitude_of_ascending_node.is_finite()
            && self.argument_of_periapsis.is_finite()
            && self.mean_anomaly.is_finite()
            && self.epoch.is_finite()
            && self.gravitational_parameter.is_finite();
        if !finite {
            return false;
        }
        if self.eccentricity < 0.0 || self.gravitational_parameter <= 0.0 {
            return false;
        }
        // Branch consistency: elliptic orbits open rightward, hyperbolic leftward.
        if self.eccentricity < 1.0 {
            self.semi_major_axis > 0.0
        } else {
            self.semi_major_axis < 0.0
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
