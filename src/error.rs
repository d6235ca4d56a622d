// Error taxonomy
// Input-domain violations are hard failures; structural failures are values,
// never panics into the simulation tick

use thiserror::Error;

/// Errors from the Kepler solver routines. Only input-domain violations are
/// reported; non-convergence within the iteration cap is not an error (the
/// solver returns its best estimate instead).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KeplerError {
    #[error("eccentricity {0} out of range for elliptic solver (requires 0 <= e < 1)")]
    NotElliptic(f64),

    #[error("eccentricity {0} out of range for hyperbolic solver (requires e >= 1)")]
    NotHyperbolic(f64),

    #[error("gravitational parameter must be positive, got {0}")]
    InvalidGravitationalParameter(f64),

    #[error("state vector is degenerate: {0}")]
    DegenerateState(&'static str),
}

/// Errors from structural vessel operations and body queries. A failed
/// operation leaves the vessel unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VesselError {
    #[error("vessel is at part capacity ({0})")]
    CapacityExceeded(usize),

    #[error("unknown part id {0}")]
    UnknownPart(u32),

    #[error("unknown joint id {0}")]
    UnknownJoint(u32),

    #[error("part id {0} is inactive")]
    InactivePart(u32),

    #[error("joint id {0} is inactive")]
    InactiveJoint(u32),

    #[error("part mass must be positive and finite, got {0}")]
    InvalidMass(f64),

    #[error("position coincides with body center")]
    AtBodyCenter,

    #[error("no orbital state has been computed for this vessel")]
    NoOrbitalState,

    #[error("vessel has no active parts")]
    NoActiveParts,

    #[error("unknown vessel index {0}")]
    UnknownVessel(usize),
}
