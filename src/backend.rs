// Physics Backend - External Rigid-Body Engine Seam
// The core never assumes lifetime control over engine bodies beyond its own
// registration/deregistration calls; stale handles degrade to skip-and-log

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::math::Double3;
use crate::vessel::JointTuning;

/// Opaque handle to a rigid body owned by the host physics engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BodyHandle(pub u64);

/// Opaque handle to a joint owned by the host physics engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JointHandle(pub u64);

/// The boundary to the host's rigid-body engine.
///
/// Every accessor taking a handle may be called with a handle the host has
/// already freed; implementations report that with `false`/`None` and the
/// core skips the update rather than failing the tick.
pub trait PhysicsBackend {
    fn create_body(&mut self, mass: f64, position: Double3, velocity: Double3) -> BodyHandle;
    fn release_body(&mut self, handle: BodyHandle);
    fn is_body_valid(&self, handle: BodyHandle) -> bool;

    fn body_position(&self, handle: BodyHandle) -> Option<Double3>;
    fn body_velocity(&self, handle: BodyHandle) -> Option<Double3>;
    fn set_body_state(&mut self, handle: BodyHandle, position: Double3, velocity: Double3)
        -> bool;

    /// Accumulate an external force for the next `step`.
    fn apply_force(&mut self, handle: BodyHandle, force: Double3) -> bool;
    /// Instantaneous momentum change at a world-space application point.
    fn apply_impulse(&mut self, handle: BodyHandle, impulse: Double3, at: Double3) -> bool;
    /// Frozen bodies ignore forces and do not move (on-rails mode).
    fn set_frozen(&mut self, handle: BodyHandle, frozen: bool) -> bool;

    fn create_joint(
        &mut self,
        a: BodyHandle,
        b: BodyHandle,
        tuning: &JointTuning,
    ) -> Option<JointHandle>;
    fn remove_joint(&mut self, handle: JointHandle) -> bool;
    fn is_joint_valid(&self, handle: JointHandle) -> bool;
    /// Re-tune an existing joint in place; never recreates it.
    fn apply_joint_tuning(&mut self, handle: JointHandle, tuning: &JointTuning) -> bool;

    /// Translate every body by `delta` (floating-origin shift). Velocities
    /// are untouched: the shift is a pure translation of the frame.
    fn translate_all(&mut self, delta: Double3);

    /// Integrate accumulated forces over `dt`.
    fn step(&mut self, dt: f64);
}

// =============================================================================
// IN-MEMORY REFERENCE BACKEND
// =============================================================================

#[derive(Debug, Clone)]
struct BodyRecord {
    mass: f64,
    position: Double3,
    velocity: Double3,
    accumulated_force: Double3,
    frozen: bool,
}

#[derive(Debug, Clone)]
struct JointRecord {
    a: BodyHandle,
    b: BodyHandle,
    tuning: JointTuning,
}

/// Point-mass backend for tests and host prototyping.
///
/// `step` is a velocity Verlet update; external forces are held constant over
/// the step, so the start- and end-of-step accelerations coincide. Joints are
/// tracked as tuning records only; this backend is not a constraint solver.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    bodies: HashMap<u64, BodyRecord>,
    joints: HashMap<u64, JointRecord>,
    next_body_id: u64,
    next_joint_id: u64,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn joint_tuning(&self, handle: JointHandle) -> Option<&JointTuning> {
        self.joints.get(&handle.0).map(|j| &j.tuning)
    }

    pub fn joint_endpoints(&self, handle: JointHandle) -> Option<(BodyHandle, BodyHandle)> {
        self.joints.get(&handle.0).map(|j| (j.a, j.b))
    }
}

impl PhysicsBackend for InMemoryBackend {
    fn create_body(&mut self, mass: f64, position: Double3, velocity: Double3) -> BodyHandle {
        let id = self.next_body_id;
        self.next_body_id += 1;
        self.bodies.insert(
            id,
            BodyRecord {
                mass: mass.max(1e-9),
                position,
                velocity,
                accumulated_force: Double3::zero(),
                frozen: false,
            },
        );
        BodyHandle(id)
    }

    fn release_body(&mut self, handle: BodyHandle) {
        self.bodies.remove(&handle.0);
        self.joints
            .retain(|_, j| j.a != handle && j.b != handle);
    }

    fn is_body_valid(&self, handle: BodyHandle) -> bool {
        self.bodies.contains_key(&handle.0)
    }

    fn body_position(&self, handle: BodyHandle) -> Option<Double3> {
        self.bodies.get(&handle.0).map(|b| b.position)
    }

    fn body_velocity(&self, handle: BodyHandle) -> Option<Double3> {
        self.bodies.get(&handle.0).map(|b| b.velocity)
    }

    fn set_body_state(
        &mut self,
        handle: BodyHandle,
        position: Double3,
        velocity: Double3,
    ) -> bool {
        match self.bodies.get_mut(&handle.0) {
            Some(body) => {
                body.position = position;
                body.velocity = velocity;
                true
            }
            None => false,
        }
    }

    fn apply_force(&mut self, handle: BodyHandle, force: Double3) -> bool {
        match self.bodies.get_mut(&handle.0) {
            Some(body) if !body.frozen => {
                body.accumulated_force = body.accumulated_force.add(&force);
                true
            }
            Some(_) => true, // frozen bodies silently absorb forces
            None => false,
        }
    }

    fn apply_impulse(&mut self, handle: BodyHandle, impulse: Double3, _at: Double3) -> bool {
        match self.bodies.get_mut(&handle.0) {
            Some(body) if !body.frozen => {
                body.velocity = body.velocity.add(&impulse.scale(1.0 / body.mass));
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    fn set_frozen(&mut self, handle: BodyHandle, frozen: bool) -> bool {
        match self.bodies.get_mut(&handle.0) {
            Some(body) => {
                body.frozen = frozen;
                if frozen {
                    body.accumulated_force = Double3::zero();
                }
                true
            }
            None => false,
        }
    }

    fn create_joint(
        &mut self,
        a: BodyHandle,
        b: BodyHandle,
        tuning: &JointTuning,
    ) -> Option<JointHandle> {
        if !self.is_body_valid(a) || !self.is_body_valid(b) {
            warn!("refusing joint between invalid bodies {:?} and {:?}", a, b);
            return None;
        }
        let id = self.next_joint_id;
        self.next_joint_id += 1;
        self.joints.insert(
            id,
            JointRecord {
                a,
                b,
                tuning: tuning.clone(),
            },
        );
        Some(JointHandle(id))
    }

    fn remove_joint(&mut self, handle: JointHandle) -> bool {
        self.joints.remove(&handle.0).is_some()
    }

    fn is_joint_valid(&self, handle: JointHandle) -> bool {
        self.joints.contains_key(&handle.0)
    }

    fn apply_joint_tuning(&mut self, handle: JointHandle, tuning: &JointTuning) -> bool {
        match self.joints.get_mut(&handle.0) {
            Some(joint) => {
                joint.tuning = tuning.clone();
                true
            }
            None => false,
        }
    }

    fn translate_all(&mut self, delta: Double3) {
        for body in self.bodies.values_mut() {
            body.position = body.position.add(&delta);
        }
    }

    fn step(&mut self, dt: f64) {
        let dt_sq_half = dt * dt * 0.5;
        for body in self.bodies.values_mut() {
            if body.frozen {
                body.accumulated_force = Double3::zero();
                continue;
            }
            // Velocity Verlet with force constant over the step:
            // x += v*dt + 0.5*a*dt^2 ; v += a*dt
            let accel = body.accumulated_force.scale(1.0 / body.mass);
            body.position = body
                .position
                .add(&body.velocity.scale(dt))
                .add(&accel.scale(dt_sq_half));
            body.velocity = body.velocity.add(&accel.scale(dt));
            body.accumulated_force = Double3::zero();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_integrates_over_step() {
        let mut backend = InMemoryBackend::new();
        let h = backend.create_body(2.0, Double3::zero(), Double3::zero());
        assert!(backend.apply_force(h, Double3::new(4.0, 0.0, 0.0)));
        backend.step(1.0);
        // a = 2 m/s^2: x = 0.5*a*t^2 = 1, v = a*t = 2
        let pos = backend.body_position(h).unwrap();
        let vel = backend.body_velocity(h).unwrap();
        assert!((pos.x - 1.0).abs() < 1e-12);
        assert!((vel.x - 2.0).abs() < 1e-12);
    }

    #[test]
    fn forces_clear_after_step() {
        let mut backend = InMemoryBackend::new();
        let h = backend.create_body(1.0, Double3::zero(), Double3::zero());
        backend.apply_force(h, Double3::new(1.0, 0.0, 0.0));
        backend.step(1.0);
        let v1 = backend.body_velocity(h).unwrap();
        backend.step(1.0);
        let v2 = backend.body_velocity(h).unwrap();
        assert_eq!(v1, v2);
    }

    #[test]
    fn impulse_changes_velocity_by_momentum() {
        let mut backend = InMemoryBackend::new();
        let h = backend.create_body(5.0, Double3::zero(), Double3::zero());
        backend.apply_impulse(h, Double3::new(10.0, 0.0, 0.0), Double3::zero());
        assert!((backend.body_velocity(h).unwrap().x - 2.0).abs() < 1e-12);
    }

    #[test]
    fn frozen_body_ignores_forces_and_motion() {
        let mut backend = InMemoryBackend::new();
        let h = backend.create_body(1.0, Double3::zero(), Double3::new(100.0, 0.0, 0.0));
        backend.set_frozen(h, true);
        backend.apply_force(h, Double3::new(1e6, 0.0, 0.0));
        backend.step(1.0);
        assert_eq!(backend.body_position(h).unwrap(), Double3::zero());
    }

    #[test]
    fn stale_handles_report_invalid() {
        let mut backend = InMemoryBackend::new();
        let h = backend.create_body(1.0, Double3::zero(), Double3::zero());
        backend.release_body(h);
        assert!(!backend.is_body_valid(h));
        assert!(backend.body_position(h).is_none());
        assert!(!backend.apply_force(h, Double3::UP));
    }

    #[test]
    fn releasing_body_drops_its_joints() {
        let mut backend = InMemoryBackend::new();
        let a = backend.create_body(1.0, Double3::zero(), Double3::zero());
        let b = backend.create_body(1.0, Double3::UP, Double3::zero());
        let j = backend
            .create_joint(a, b, &JointTuning::rigid())
            .unwrap();
        backend.release_body(b);
        assert!(!backend.is_joint_valid(j));
    }

    #[test]
    fn translate_all_preserves_velocity() {
        let mut backend = InMemoryBackend::new();
        let h = backend.create_body(1.0, Double3::new(1.0, 2.0, 3.0), Double3::new(4.0, 5.0, 6.0));
        backend.translate_all(Double3::new(-10.0, 0.0, 0.0));
        assert_eq!(backend.body_position(h).unwrap(), Double3::new(-9.0, 2.0, 3.0));
        assert_eq!(backend.body_velocity(h).unwrap(), Double3::new(4.0, 5.0, 6.0));
    }
}
