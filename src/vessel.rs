// Physics Vessel - Multi-Part Aggregation Root
// Owns parts, joints, mass properties and orbital state; orchestrates
// per-tick updates, atomic staging and the on-rails/off-rails transitions

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use crate::backend::{BodyHandle, JointHandle, PhysicsBackend};
use crate::body::CelestialBody;
use crate::error::VesselError;
use crate::math::Double3;
use crate::orbital::OrbitalState;

/// Fixed vessel-size ceiling.
pub const MAX_PARTS: usize = 75;

/// Default separation impulse magnitude (N*s).
pub const SEPARATION_IMPULSE: f64 = 500.0;

/// Soft wall-clock budget for one atomic separation (s). Exceeding it is a
/// logged warning, never an error.
pub const SEPARATION_BUDGET_SECONDS: f64 = 2.0e-4;

/// Fallback separation direction when the two endpoint parts are coincident.
/// A documented policy choice, not a physical derivation.
pub const SEPARATION_FALLBACK_DIR: Double3 = Double3::UP;

/// Bounded separation-event history length.
const HISTORY_CAPACITY: usize = 64;

// =============================================================================
// PARTS AND JOINTS
// =============================================================================

/// One rigid part of a vessel. Deactivated, not destroyed, on removal or
/// separation; the record persists for audit in the separation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VesselPart {
    pub id: u32,
    /// Handle to the host engine's rigid body. `None` once released.
    pub body: Option<BodyHandle>,
    /// kg
    pub mass: f64,
    /// Assembly-time offset from the vessel origin (m).
    pub local_position: Double3,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JointType {
    Fixed,
    Hinge,
    Ball,
    Separable,
}

/// Joint solver parameters. Mutated in place by the anti-wobble system to
/// scale stiffness without recreating the joint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JointTuning {
    pub stiffness: f64,
    pub damping: f64,
    pub position_iterations: u32,
    pub velocity_iterations: u32,
}

impl JointTuning {
    pub fn rigid() -> Self {
        Self {
            stiffness: 1.0e6,
            damping: 1.0e4,
            position_iterations: 8,
            velocity_iterations: 8,
        }
    }

    pub fn flexible() -> Self {
        Self {
            stiffness: 1.0e5,
            damping: 2.0e3,
            position_iterations: 4,
            velocity_iterations: 4,
        }
    }

    pub fn separable() -> Self {
        Self {
            stiffness: 5.0e5,
            damping: 5.0e3,
            position_iterations: 6,
            velocity_iterations: 6,
        }
    }

    pub fn preset_for(joint_type: JointType) -> Self {
        match joint_type {
            JointType::Fixed => Self::rigid(),
            JointType::Separable => Self::separable(),
            JointType::Hinge | JointType::Ball => Self::flexible(),
        }
    }

    /// Tuning scaled by the anti-wobble multiplier. Iteration counts scale
    /// sub-linearly; solver cost grows with them.
    pub fn scaled(&self, multiplier: f64) -> Self {
        Self {
            stiffness: self.stiffness * multiplier,
            damping: self.damping * multiplier,
            position_iterations: ((self.position_iterations as f64) * multiplier.sqrt())
                .round() as u32,
            velocity_iterations: ((self.velocity_iterations as f64) * multiplier.sqrt())
                .round() as u32,
        }
    }
}

/// A connection between two parts. Destroyed (deactivated and removed from
/// the engine) on separation, atomically with the mass update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VesselJoint {
    pub id: u32,
    pub part_a: u32,
    pub part_b: u32,
    pub joint_type: JointType,
    /// Base tuning before any anti-wobble scaling.
    pub tuning: JointTuning,
    /// Handle to the host engine's joint. `None` once removed.
    pub handle: Option<JointHandle>,
    pub is_active: bool,
    pub current_stress: f64,
}

// =============================================================================
// MASS PROPERTIES AND SEPARATION EVENTS
// =============================================================================

/// Aggregate mass state, recomputed lazily under a dirty flag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MassProperties {
    /// kg
    pub total_mass: f64,
    pub center_of_mass: Double3,
    /// Diagonal of the point-mass moment-of-inertia tensor (kg*m^2).
    pub moment_of_inertia: Double3,
}

impl MassProperties {
    fn zero() -> Self {
        Self {
            total_mass: 0.0,
            center_of_mass: Double3::zero(),
            moment_of_inertia: Double3::zero(),
        }
    }
}

/// Immutable record of one separation attempt, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparationEvent {
    pub event_id: u32,
    pub joint_id: u32,
    pub part_a: u32,
    pub part_b: u32,
    pub separation_position: Double3,
    pub separation_direction: Double3,
    /// N*s, zero when no impulse was requested.
    pub separation_impulse: f64,
    /// Wall time the atomic block took (s).
    pub operation_duration: f64,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub pre_mass_properties: MassProperties,
    pub post_mass_properties: MassProperties,
}

// =============================================================================
// PERSISTED STATE
// =============================================================================

/// Everything the external save system needs to round-trip a vessel exactly:
/// Keplerian elements and the equivalent Cartesian state for the same epoch
/// (both, for redundancy and validation), the topology, and the mode flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VesselSnapshot {
    pub name: String,
    pub epoch: f64,
    pub orbital_state: Option<OrbitalState>,
    pub position: Double3,
    pub velocity: Double3,
    pub is_on_rails: bool,
    pub parts: Vec<VesselPart>,
    pub joints: Vec<VesselJoint>,
}

// =============================================================================
// PHYSICS VESSEL
// =============================================================================

/// The aggregation root for one multi-part vessel.
///
/// State machine: Off-Rails (full rigid-body physics) <-> On-Rails
/// (analytic orbital propagation, rigid bodies frozen). Mutated only from
/// the single simulation thread; the dirty-flag mass cache relies on that.
#[derive(Debug)]
pub struct PhysicsVessel {
    pub name: String,
    parts: Vec<VesselPart>,
    joints: Vec<VesselJoint>,
    next_part_id: u32,
    next_joint_id: u32,
    next_event_id: u32,

    mass_properties: MassProperties,
    mass_dirty: bool,

    /// Aggregate state, mass-weighted over active parts.
    pub position: Double3,
    pub velocity: Double3,

    orbital_state: Option<OrbitalState>,
    is_on_rails: bool,
    /// Set by the host while engines burn; gates floating-origin shifts.
    pub is_thrusting: bool,

    separation_history: VecDeque<SeparationEvent>,
}

impl PhysicsVessel {
    pub fn new(name: &str, position: Double3, velocity: Double3) -> Self {
        Self {
            name: name.to_string(),
            parts: Vec::new(),
            joints: Vec::new(),
            next_part_id: 0,
            next_joint_id: 0,
            next_event_id: 0,
            mass_properties: MassProperties::zero(),
            mass_dirty: true,
            position,
            velocity,
            orbital_state: None,
            is_on_rails: false,
            is_thrusting: false,
            separation_history: VecDeque::new(),
        }
    }

    // =========================================================================
    // STRUCTURAL MUTATION
    // =========================================================================

    /// Add a part at `local_position` relative to the vessel origin.
    /// Fails cleanly at the capacity ceiling; the vessel is unchanged.
    pub fn add_part(
        &mut self,
        backend: &mut dyn PhysicsBackend,
        mass: f64,
        local_position: Double3,
    ) -> Result<u32, VesselError> {
        if self.active_part_count() >= MAX_PARTS {
            return Err(VesselError::CapacityExceeded(MAX_PARTS));
        }
        if mass <= 0.0 || !mass.is_finite() {
            return Err(VesselError::InvalidMass(mass));
        }

        let id = self.next_part_id;
        self.next_part_id += 1;

        let body = backend.create_body(mass, self.position.add(&local_position), self.velocity);
        self.parts.push(VesselPart {
            id,
            body: Some(body),
            mass,
            local_position,
            is_active: true,
        });
        self.mass_dirty = true;
        Ok(id)
    }

    /// Deactivate a part, release its rigid body, and cascade removal of all
    /// joints referencing it.
    pub fn remove_part(
        &mut self,
        backend: &mut dyn PhysicsBackend,
        part_id: u32,
    ) -> Result<(), VesselError> {
        let part = self
            .parts
            .iter_mut()
            .find(|p| p.id == part_id)
            .ok_or(VesselError::UnknownPart(part_id))?;
        if !part.is_active {
            return Err(VesselError::InactivePart(part_id));
        }

        part.is_active = false;
        if let Some(body) = part.body.take() {
            backend.release_body(body);
        }

        for joint in self
            .joints
            .iter_mut()
            .filter(|j| j.is_active && (j.part_a == part_id || j.part_b == part_id))
        {
            joint.is_active = false;
            if let Some(handle) = joint.handle.take() {
                if !backend.remove_joint(handle) {
                    warn!("joint {} already freed by host", joint.id);
                }
            }
        }

        self.mass_dirty = true;
        Ok(())
    }

    /// Connect two known, active parts. Tuning starts from the preset for
    /// `joint_type`.
    pub fn create_joint(
        &mut self,
        backend: &mut dyn PhysicsBackend,
        part_a: u32,
        part_b: u32,
        joint_type: JointType,
    ) -> Result<u32, VesselError> {
        let body_a = self.active_part_body(part_a)?;
        let body_b = self.active_part_body(part_b)?;

        let tuning = JointTuning::preset_for(joint_type);
        let handle = backend.create_joint(body_a, body_b, &tuning);
        if handle.is_none() {
            warn!("host refused joint between parts {} and {}", part_a, part_b);
        }

        let id = self.next_joint_id;
        self.next_joint_id += 1;
        self.joints.push(VesselJoint {
            id,
            part_a,
            part_b,
            joint_type,
            tuning,
            handle,
            is_active: true,
            current_stress: 0.0,
        });
        Ok(id)
    }

    pub fn remove_joint(
        &mut self,
        backend: &mut dyn PhysicsBackend,
        joint_id: u32,
    ) -> Result<(), VesselError> {
        let joint = self
            .joints
            .iter_mut()
            .find(|j| j.id == joint_id)
            .ok_or(VesselError::UnknownJoint(joint_id))?;
        if !joint.is_active {
            return Err(VesselError::InactiveJoint(joint_id));
        }
        joint.is_active = false;
        if let Some(handle) = joint.handle.take() {
            if !backend.remove_joint(handle) {
                warn!("joint {} already freed by host", joint_id);
            }
        }
        Ok(())
    }

    // =========================================================================
    // ATOMIC SEPARATION
    // =========================================================================

    /// Separate the vessel at `joint_id` as one logical transaction: sanity
    /// checks, joint removal, the optional 500 N*s impulse on the detaching
    /// side, and the forced same-tick mass recompute happen without yielding
    /// control in between. A failed sanity check records a failed event and
    /// leaves the topology untouched.
    pub fn separate_at_joint(
        &mut self,
        backend: &mut dyn PhysicsBackend,
        joint_id: u32,
        with_impulse: bool,
    ) -> Result<SeparationEvent, VesselError> {
        let started = Instant::now();

        let joint_idx = self
            .joints
            .iter()
            .position(|j| j.id == joint_id)
            .ok_or(VesselError::UnknownJoint(joint_id))?;
        if !self.joints[joint_idx].is_active {
            return Err(VesselError::InactiveJoint(joint_id));
        }
        let (part_a, part_b) = (self.joints[joint_idx].part_a, self.joints[joint_idx].part_b);
        // Both endpoints must still resolve.
        self.active_part_body(part_a)?;
        self.active_part_body(part_b)?;

        let pre = self.mass_properties(backend);

        // Geometry of the separation plane.
        let pos_a = self.part_world_position(backend, part_a);
        let pos_b = self.part_world_position(backend, part_b);
        let midpoint = pos_a.lerp(&pos_b, 0.5);
        let mut direction = pos_b.sub(&pos_a).normalize();
        if direction == Double3::zero() {
            direction = SEPARATION_FALLBACK_DIR;
        }

        // Decide the split without touching anything: which parts stay
        // connected to the root if this joint goes away?
        let root = self.root_part_id().ok_or(VesselError::NoActiveParts)?;
        let retained = self.parts_connected_to(root, Some(joint_id));
        let detaching: Vec<u32> = self
            .parts
            .iter()
            .filter(|p| p.is_active && !retained.contains(&p.id))
            .map(|p| p.id)
            .collect();

        // Post-state sanity check before any destructive step.
        let post = self.mass_properties_of(backend, &retained);
        let sane = post.total_mass.is_finite()
            && post.total_mass > 0.0
            && post.center_of_mass.is_finite()
            && self.velocity.is_finite();

        if !sane {
            let event = self.record_event(SeparationEvent {
                event_id: 0,
                joint_id,
                part_a,
                part_b,
                separation_position: midpoint,
                separation_direction: direction,
                separation_impulse: 0.0,
                operation_duration: started.elapsed().as_secs_f64(),
                success: false,
                failure_reason: Some("post-separation mass properties failed sanity check".into()),
                pre_mass_properties: pre,
                post_mass_properties: post,
            });
            return Ok(event);
        }

        // Commit: remove the joint from the engine and the topology.
        {
            let joint = &mut self.joints[joint_idx];
            joint.is_active = false;
            if let Some(handle) = joint.handle.take() {
                if !backend.remove_joint(handle) {
                    warn!("joint {} already freed by host", joint_id);
                }
            }
        }

        // Impulse on the detaching side, along the separation vector,
        // applied at the joint midpoint.
        let impulse_magnitude = if with_impulse { SEPARATION_IMPULSE } else { 0.0 };
        if with_impulse {
            let separating_part = if retained.contains(&part_b) { part_a } else { part_b };
            if let Ok(body) = self.active_part_body(separating_part) {
                if !backend.apply_impulse(body, direction.scale(SEPARATION_IMPULSE), midpoint) {
                    warn!(
                        "separation impulse skipped: body of part {} is stale",
                        separating_part
                    );
                }
            }
        }

        // Detach the disconnected group. Records persist for audit.
        for part_id in &detaching {
            if let Some(part) = self.parts.iter_mut().find(|p| p.id == *part_id) {
                part.is_active = false;
                if let Some(body) = part.body.take() {
                    backend.release_body(body);
                }
            }
            for joint in self
                .joints
                .iter_mut()
                .filter(|j| j.is_active && (j.part_a == *part_id || j.part_b == *part_id))
            {
                joint.is_active = false;
                if let Some(handle) = joint.handle.take() {
                    backend.remove_joint(handle);
                }
            }
        }

        // Forced same-tick recompute; no dirty-and-wait.
        self.mass_dirty = true;
        let post = self.mass_properties(backend);

        let elapsed = started.elapsed().as_secs_f64();
        if elapsed > SEPARATION_BUDGET_SECONDS {
            warn!(
                "separation of joint {} took {:.3} ms (budget {:.3} ms)",
                joint_id,
                elapsed * 1e3,
                SEPARATION_BUDGET_SECONDS * 1e3
            );
        }

        Ok(self.record_event(SeparationEvent {
            event_id: 0,
            joint_id,
            part_a,
            part_b,
            separation_position: midpoint,
            separation_direction: direction,
            separation_impulse: impulse_magnitude,
            operation_duration: elapsed,
            success: true,
            failure_reason: None,
            pre_mass_properties: pre,
            post_mass_properties: post,
        }))
    }

    fn record_event(&mut self, mut event: SeparationEvent) -> SeparationEvent {
        event.event_id = self.next_event_id;
        self.next_event_id += 1;
        if self.separation_history.len() == HISTORY_CAPACITY {
            self.separation_history.pop_front();
        }
        self.separation_history.push_back(event.clone());
        event
    }

    pub fn separation_history(&self) -> impl Iterator<Item = &SeparationEvent> {
        self.separation_history.iter()
    }

    // =========================================================================
    // MASS PROPERTIES
    // =========================================================================

    /// Aggregate mass properties, recomputed now if a structural mutation
    /// marked them dirty. Never returns stale values.
    pub fn mass_properties(&mut self, backend: &dyn PhysicsBackend) -> MassProperties {
        if self.mass_dirty {
            let active: HashSet<u32> = self
                .parts
                .iter()
                .filter(|p| p.is_active)
                .map(|p| p.id)
                .collect();
            self.mass_properties = self.mass_properties_of(backend, &active);
            self.mass_dirty = false;
        }
        self.mass_properties
    }

    /// Mass properties of an arbitrary part subset, without touching the
    /// cache. Used for pre-commit separation sanity checks.
    fn mass_properties_of(
        &self,
        backend: &dyn PhysicsBackend,
        part_ids: &HashSet<u32>,
    ) -> MassProperties {
        let mut total_mass = 0.0;
        let mut weighted = Double3::zero();
        let mut entries: Vec<(f64, Double3)> = Vec::new();

        for part in self.parts.iter().filter(|p| p.is_active && part_ids.contains(&p.id)) {
            let pos = self.part_world_position(backend, part.id);
            total_mass += part.mass;
            weighted = weighted.add(&pos.scale(part.mass));
            entries.push((part.mass, pos));
        }

        if total_mass <= 0.0 {
            return MassProperties::zero();
        }

        let com = weighted.scale(1.0 / total_mass);

        // Diagonal point-mass approximation of the inertia tensor about the COM.
        let mut moi = Double3::zero();
        for (mass, pos) in entries {
            let d = pos.sub(&com);
            moi.x += mass * (d.y * d.y + d.z * d.z);
            moi.y += mass * (d.x * d.x + d.z * d.z);
            moi.z += mass * (d.x * d.x + d.y * d.y);
        }

        MassProperties {
            total_mass,
            center_of_mass: com,
            moment_of_inertia: moi,
        }
    }

    // =========================================================================
    // PER-TICK OPERATIONS (OFF-RAILS)
    // =========================================================================

    /// Query gravity at the vessel center and distribute it to each part
    /// proportionally to its mass share.
    pub fn apply_gravitational_forces(
        &mut self,
        backend: &mut dyn PhysicsBackend,
        body: &CelestialBody,
    ) -> Result<(), VesselError> {
        if self.is_on_rails {
            return Ok(());
        }
        let center = self.mass_properties(backend).center_of_mass;
        let accel = body.gravitational_acceleration(center)?;

        for part in self.parts.iter().filter(|p| p.is_active) {
            let Some(handle) = part.body else { continue };
            let force = accel.scale(part.mass);
            if !backend.apply_force(handle, force) {
                warn!("gravity skipped for part {}: stale rigid body", part.id);
            }
        }
        Ok(())
    }

    /// Derive the aggregate position/velocity as the mass-weighted average
    /// over active parts. Runs after the host's physics step.
    pub fn update_position_velocity(&mut self, backend: &dyn PhysicsBackend) {
        if self.is_on_rails {
            return;
        }
        let mut total_mass = 0.0;
        let mut pos = Double3::zero();
        let mut vel = Double3::zero();

        for part in self.parts.iter().filter(|p| p.is_active) {
            let Some(handle) = part.body else { continue };
            let (Some(p), Some(v)) = (backend.body_position(handle), backend.body_velocity(handle))
            else {
                warn!("aggregate state skipped part {}: stale rigid body", part.id);
                continue;
            };
            total_mass += part.mass;
            pos = pos.add(&p.scale(part.mass));
            vel = vel.add(&v.scale(part.mass));
        }

        if total_mass > 0.0 {
            self.position = pos.scale(1.0 / total_mass);
            self.velocity = vel.scale(1.0 / total_mass);
        }
    }

    /// Refresh the orbital state from the current Cartesian aggregate, for
    /// display and telemetry. An invalid derivation keeps the previous state.
    pub fn refresh_orbital_state(&mut self, body: &CelestialBody, time: f64) {
        match OrbitalState::from_cartesian(
            self.position.sub(&body.position),
            self.velocity,
            time,
            body.gravitational_parameter,
        ) {
            Ok(state) if state.is_valid() => self.orbital_state = Some(state),
            Ok(_) | Err(_) => {
                warn!("orbital refresh produced an invalid state, keeping previous");
            }
        }
    }

    pub fn orbital_state(&self) -> Option<&OrbitalState> {
        self.orbital_state.as_ref()
    }

    // =========================================================================
    // ON-RAILS / OFF-RAILS
    // =========================================================================

    pub fn is_on_rails(&self) -> bool {
        self.is_on_rails
    }

    /// Snapshot the Cartesian state into an orbital state and freeze the
    /// rigid bodies. Entry into time-warp.
    pub fn go_on_rails(
        &mut self,
        backend: &mut dyn PhysicsBackend,
        body: &CelestialBody,
        time: f64,
    ) -> Result<(), VesselError> {
        if self.is_on_rails {
            return Ok(());
        }
        self.update_position_velocity(backend);
        let state = OrbitalState::from_cartesian(
            self.position.sub(&body.position),
            self.velocity,
            time,
            body.gravitational_parameter,
        )
        .map_err(|_| VesselError::NoOrbitalState)?;
        if !state.is_valid() {
            return Err(VesselError::NoOrbitalState);
        }
        self.orbital_state = Some(state);

        for part in self.parts.iter().filter(|p| p.is_active) {
            if let Some(handle) = part.body {
                backend.set_frozen(handle, true);
            }
        }
        self.is_on_rails = true;
        Ok(())
    }

    /// Read the propagated orbital state back into Cartesian coordinates,
    /// move the rigid bodies with the vessel, and unfreeze physics.
    pub fn go_off_rails(
        &mut self,
        backend: &mut dyn PhysicsBackend,
        body: &CelestialBody,
        time: f64,
    ) -> Result<(), VesselError> {
        if !self.is_on_rails {
            return Ok(());
        }
        let state = self.orbital_state.ok_or(VesselError::NoOrbitalState)?;
        let (rel_pos, vel) = state
            .propagate_to(time)
            .to_cartesian(time)
            .map_err(|_| VesselError::NoOrbitalState)?;
        let new_pos = body.position.add(&rel_pos);
        let delta = new_pos.sub(&self.position);

        for part in self.parts.iter().filter(|p| p.is_active) {
            let Some(handle) = part.body else { continue };
            backend.set_frozen(handle, false);
            let part_pos = backend
                .body_position(handle)
                .unwrap_or(self.position.add(&part.local_position));
            if !backend.set_body_state(handle, part_pos.add(&delta), vel) {
                warn!("off-rails restore skipped part {}: stale rigid body", part.id);
            }
        }

        self.position = new_pos;
        self.velocity = vel;
        self.orbital_state = Some(state.propagate_to(time));
        self.is_on_rails = false;
        Ok(())
    }

    /// Analytic propagation while on rails; replaces rigid-body integration.
    pub fn propagate_on_rails(
        &mut self,
        body: &CelestialBody,
        time: f64,
    ) -> Result<(), VesselError> {
        let state = self.orbital_state.ok_or(VesselError::NoOrbitalState)?;
        let propagated = state.propagate_to(time);
        let (rel_pos, vel) = propagated
            .to_cartesian(time)
            .map_err(|_| VesselError::NoOrbitalState)?;
        self.position = body.position.add(&rel_pos);
        self.velocity = vel;
        self.orbital_state = Some(propagated);
        Ok(())
    }

    // =========================================================================
    // TOPOLOGY QUERIES
    // =========================================================================

    pub fn active_part_count(&self) -> usize {
        self.parts.iter().filter(|p| p.is_active).count()
    }

    pub fn parts(&self) -> impl Iterator<Item = &VesselPart> {
        self.parts.iter()
    }

    pub fn joints(&self) -> impl Iterator<Item = &VesselJoint> {
        self.joints.iter()
    }

    pub fn joints_mut(&mut self) -> impl Iterator<Item = &mut VesselJoint> {
        self.joints.iter_mut()
    }

    /// The lowest-id active part serves as the structural root.
    pub fn root_part_id(&self) -> Option<u32> {
        self.parts.iter().filter(|p| p.is_active).map(|p| p.id).min()
    }

    fn active_part_body(&self, part_id: u32) -> Result<BodyHandle, VesselError> {
        let part = self
            .parts
            .iter()
            .find(|p| p.id == part_id)
            .ok_or(VesselError::UnknownPart(part_id))?;
        if !part.is_active {
            return Err(VesselError::InactivePart(part_id));
        }
        part.body.ok_or(VesselError::InactivePart(part_id))
    }

    /// World position of a part; falls back to the assembly offset when the
    /// rigid body is stale.
    pub fn part_world_position(&self, backend: &dyn PhysicsBackend, part_id: u32) -> Double3 {
        self.parts
            .iter()
            .find(|p| p.id == part_id)
            .map(|part| {
                part.body
                    .and_then(|h| backend.body_position(h))
                    .unwrap_or(self.position.add(&part.local_position))
            })
            .unwrap_or(self.position)
    }

    fn adjacency(&self, excluded_joint: Option<u32>) -> HashMap<u32, Vec<u32>> {
        let mut adjacency: HashMap<u32, Vec<u32>> = HashMap::new();
        for part in self.parts.iter().filter(|p| p.is_active) {
            adjacency.entry(part.id).or_default();
        }
        for joint in self.joints.iter().filter(|j| j.is_active) {
            if excluded_joint == Some(joint.id) {
                continue;
            }
            if adjacency.contains_key(&joint.part_a) && adjacency.contains_key(&joint.part_b) {
                adjacency.entry(joint.part_a).or_default().push(joint.part_b);
                adjacency.entry(joint.part_b).or_default().push(joint.part_a);
            }
        }
        adjacency
    }

    /// Active parts reachable from `start`, optionally pretending one joint
    /// is already gone.
    pub fn parts_connected_to(&self, start: u32, excluded_joint: Option<u32>) -> HashSet<u32> {
        let adjacency = self.adjacency(excluded_joint);
        let mut seen = HashSet::new();
        if !adjacency.contains_key(&start) {
            return seen;
        }
        let mut queue = VecDeque::from([start]);
        seen.insert(start);
        while let Some(id) = queue.pop_front() {
            for &next in &adjacency[&id] {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Length in parts of the longest unbroken joint path. Double BFS is
    /// exact on tree topologies, which stacked rockets are.
    pub fn longest_chain_length(&self) -> usize {
        let adjacency = self.adjacency(None);
        let Some(start) = adjacency.keys().copied().min() else {
            return 0;
        };
        let (far, _) = Self::bfs_farthest(&adjacency, start);
        let (_, depth) = Self::bfs_farthest(&adjacency, far);
        depth + 1
    }

    fn bfs_farthest(adjacency: &HashMap<u32, Vec<u32>>, start: u32) -> (u32, usize) {
        let mut dist: HashMap<u32, usize> = HashMap::from([(start, 0)]);
        let mut queue = VecDeque::from([start]);
        let mut farthest = (start, 0);
        while let Some(id) = queue.pop_front() {
            let d = dist[&id];
            if d > farthest.1 {
                farthest = (id, d);
            }
            for &next in &adjacency[&id] {
                if !dist.contains_key(&next) {
                    dist.insert(next, d + 1);
                    queue.push_back(next);
                }
            }
        }
        farthest
    }

    /// Chain depth of every active part measured from the root, for virtual
    /// strut placement.
    pub fn chain_depths_from_root(&self) -> HashMap<u32, usize> {
        let mut depths = HashMap::new();
        let Some(root) = self.root_part_id() else {
            return depths;
        };
        let adjacency = self.adjacency(None);
        let mut queue = VecDeque::from([root]);
        depths.insert(root, 0);
        while let Some(id) = queue.pop_front() {
            let d = depths[&id];
            for &next in &adjacency[&id] {
                if !depths.contains_key(&next) {
                    depths.insert(next, d + 1);
                    queue.push_back(next);
                }
            }
        }
        depths
    }

    // =========================================================================
    // PERSISTED STATE
    // =========================================================================

    /// Snapshot for the external save system: elements plus Cartesian state
    /// for the same epoch, topology, and mode.
    pub fn snapshot(&self, epoch: f64) -> VesselSnapshot {
        VesselSnapshot {
            name: self.name.clone(),
            epoch,
            orbital_state: self.orbital_state,
            position: self.position,
            velocity: self.velocity,
            is_on_rails: self.is_on_rails,
            parts: self.parts.clone(),
            joints: self.joints.clone(),
        }
    }

    /// Rebuild a vessel from a snapshot, re-registering active parts and
    /// joints with the backend. Handles in the snapshot are not trusted;
    /// fresh ones are created.
    pub fn restore(snapshot: &VesselSnapshot, backend: &mut dyn PhysicsBackend) -> Self {
        let mut vessel = Self::new(&snapshot.name, snapshot.position, snapshot.velocity);
        vessel.orbital_state = snapshot.orbital_state;
        vessel.is_on_rails = snapshot.is_on_rails;

        let mut handle_of: HashMap<u32, BodyHandle> = HashMap::new();
        for part in &snapshot.parts {
            let body = if part.is_active {
                let handle = backend.create_body(
                    part.mass,
                    snapshot.position.add(&part.local_position),
                    snapshot.velocity,
                );
                if snapshot.is_on_rails {
                    backend.set_frozen(handle, true);
                }
                handle_of.insert(part.id, handle);
                Some(handle)
            } else {
                None
            };
            vessel.parts.push(VesselPart {
                body,
                ..part.clone()
            });
            vessel.next_part_id = vessel.next_part_id.max(part.id + 1);
        }

        for joint in &snapshot.joints {
            let handle = if joint.is_active {
                match (handle_of.get(&joint.part_a), handle_of.get(&joint.part_b)) {
                    (Some(&a), Some(&b)) => backend.create_joint(a, b, &joint.tuning),
                    _ => None,
                }
            } else {
                None
            };
            vessel.joints.push(VesselJoint {
                handle,
                ..joint.clone()
            });
            vessel.next_joint_id = vessel.next_joint_id.max(joint.id + 1);
        }

        vessel.mass_dirty = true;
        vessel
    }
}

// =============================================================================
// TESTS
// =============================================================================
