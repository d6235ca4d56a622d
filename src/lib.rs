// VesselCore - Rocket Simulation Physics Core
// Multi-part vessel dynamics, double-precision orbital mechanics and
// floating-origin management behind a host-engine seam

pub mod atmosphere;
pub mod backend;
pub mod body;
pub mod context;
pub mod error;
pub mod kepler;
pub mod math;
pub mod orbital;
pub mod origin;
pub mod vessel;
pub mod wobble;

pub use atmosphere::{dynamic_pressure, Atmosphere, AtmosphereSample, QCategory, QHysteresis};
pub use backend::{BodyHandle, InMemoryBackend, JointHandle, PhysicsBackend};
pub use body::CelestialBody;
pub use context::{SimEvent, SimulationContext};
pub use error::{KeplerError, VesselError};
pub use math::{Double3, Vec3f};
pub use orbital::OrbitalState;
pub use origin::{FloatingOriginManager, OriginShiftHandler, ShiftDecision};
pub use vessel::{
    JointTuning, JointType, MassProperties, PhysicsVessel, SeparationEvent, VesselJoint,
    VesselPart, VesselSnapshot,
};
pub use wobble::{AntiWobbleSystem, WobbleConfig};
