// Simulation Context - Composition Root and Fixed Tick
// Owns the primary body, atmosphere, physics backend, vessels and the
// floating-origin manager; runs the fixed-order tick contract

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::atmosphere::{dynamic_pressure, Atmosphere};
use crate::backend::PhysicsBackend;
use crate::body::CelestialBody;
use crate::error::VesselError;
use crate::math::Double3;
use crate::origin::{FloatingOriginManager, ShiftDecision};
use crate::vessel::{PhysicsVessel, SeparationEvent};
use crate::wobble::{AntiWobbleSystem, WobbleConfig};

/// Bounded simulation-event queue length. Oldest events drop first.
const EVENT_CAPACITY: usize = 256;

/// Notable events produced by the tick, drained by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SimEvent {
    Separation {
        vessel: usize,
        event: SeparationEvent,
    },
    OriginShift {
        delta: Double3,
        total_offset: Double3,
    },
}

struct VesselEntry {
    vessel: PhysicsVessel,
    wobble: AntiWobbleSystem,
}

/// The composition root. Every core system is constructed here and handed
/// its collaborators explicitly; nothing reaches for globals.
///
/// `fixed_tick` runs the per-tick contract in a fixed order: origin check,
/// mass update, anti-wobble, gravity, the backend step, then the aggregate
/// state and orbital refresh. On-rails vessels skip rigid-body work and
/// propagate analytically instead.
pub struct SimulationContext {
    pub body: CelestialBody,
    pub atmosphere: Atmosphere,
    backend: Box<dyn PhysicsBackend>,
    vessels: Vec<VesselEntry>,
    origin: FloatingOriginManager,
    wobble_config: WobbleConfig,
    /// The vessel whose distance from the origin drives shift decisions.
    pub tracked_vessel: usize,
    time: f64,
    events: VecDeque<SimEvent>,
}

impl SimulationContext {
    pub fn new(
        body: CelestialBody,
        atmosphere: Atmosphere,
        backend: Box<dyn PhysicsBackend>,
        wobble_config: WobbleConfig,
    ) -> Self {
        Self {
            body,
            atmosphere,
            backend,
            vessels: Vec::new(),
            origin: FloatingOriginManager::default(),
            wobble_config,
            tracked_vessel: 0,
            time: 0.0,
            events: VecDeque::new(),
        }
    }

    pub fn kerbin_default(backend: Box<dyn PhysicsBackend>) -> Self {
        Self::new(
            CelestialBody::kerbin(),
            Atmosphere::kerbin(),
            backend,
            WobbleConfig::default(),
        )
    }

    // =========================================================================
    // REGISTRATION AND ACCESS
    // =========================================================================

    /// Take ownership of a vessel; returns its context-local index.
    pub fn add_vessel(&mut self, vessel: PhysicsVessel) -> usize {
        self.vessels.push(VesselEntry {
            vessel,
            wobble: AntiWobbleSystem::new(self.wobble_config.clone()),
        });
        self.vessels.len() - 1
    }

    pub fn vessel(&self, index: usize) -> Option<&PhysicsVessel> {
        self.vessels.get(index).map(|e| &e.vessel)
    }

    pub fn vessel_mut(&mut self, index: usize) -> Option<&mut PhysicsVessel> {
        self.vessels.get_mut(index).map(|e| &mut e.vessel)
    }

    pub fn vessel_count(&self) -> usize {
        self.vessels.len()
    }

    pub fn wobble_system(&self, index: usize) -> Option<&AntiWobbleSystem> {
        self.vessels.get(index).map(|e| &e.wobble)
    }

    pub fn backend(&self) -> &dyn PhysicsBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn PhysicsBackend {
        self.backend.as_mut()
    }

    /// Host systems register their origin-shift handlers here.
    pub fn origin_manager_mut(&mut self) -> &mut FloatingOriginManager {
        &mut self.origin
    }

    pub fn origin_manager(&self) -> &FloatingOriginManager {
        &self.origin
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Hand out all queued events, oldest first.
    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        self.events.drain(..).collect()
    }

    fn push_event(&mut self, event: SimEvent) {
        if self.events.len() == EVENT_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    // =========================================================================
    // VESSEL OPERATIONS
    // =========================================================================

    /// Atomic staging through the context, so the event lands on the queue.
    pub fn separate(
        &mut self,
        vessel_index: usize,
        joint_id: u32,
        with_impulse: bool,
    ) -> Result<SeparationEvent, VesselError> {
        let entry = self
            .vessels
            .get_mut(vessel_index)
            .ok_or(VesselError::UnknownVessel(vessel_index))?;
        let event = entry
            .vessel
            .separate_at_joint(self.backend.as_mut(), joint_id, with_impulse)?;
        self.push_event(SimEvent::Separation {
            vessel: vessel_index,
            event: event.clone(),
        });
        Ok(event)
    }

    /// Enter time-warp: snapshot the orbit, freeze physics, drop struts.
    pub fn go_on_rails(&mut self, vessel_index: usize) -> Result<(), VesselError> {
        let entry = self
            .vessels
            .get_mut(vessel_index)
            .ok_or(VesselError::UnknownVessel(vessel_index))?;
        entry.wobble.clear_struts(self.backend.as_mut());
        entry
            .vessel
            .go_on_rails(self.backend.as_mut(), &self.body, self.time)
    }

    pub fn go_off_rails(&mut self, vessel_index: usize) -> Result<(), VesselError> {
        let entry = self
            .vessels
            .get_mut(vessel_index)
            .ok_or(VesselError::UnknownVessel(vessel_index))?;
        entry
            .vessel
            .go_off_rails(self.backend.as_mut(), &self.body, self.time)
    }

    /// Dynamic pressure currently acting on a vessel. Exact zero above the
    /// atmosphere.
    pub fn vessel_dynamic_pressure(&self, vessel_index: usize) -> f64 {
        let Some(entry) = self.vessels.get(vessel_index) else {
            return 0.0;
        };
        let altitude = self.body.altitude(entry.vessel.position);
        let density = self.atmosphere.density(altitude);
        dynamic_pressure(entry.vessel.velocity.magnitude(), density)
    }

    // =========================================================================
    // FIXED TICK
    // =========================================================================

    /// Advance the simulation by one fixed step.
    pub fn fixed_tick(&mut self, dt: f64) -> Result<(), VesselError> {
        self.time += dt;
        let time = self.time;

        self.check_origin_shift();

        // Per-vessel physics-side work, before the backend integrates.
        for i in 0..self.vessels.len() {
            if self.vessels[i].vessel.is_on_rails() {
                continue;
            }
            let q = self.vessel_dynamic_pressure(i);
            let entry = &mut self.vessels[i];
            // Never stale into the tick.
            entry.vessel.mass_properties(self.backend.as_ref());
            entry
                .wobble
                .update(&mut entry.vessel, self.backend.as_mut(), q, dt);
            // Degenerate geometry (e.g. a vessel with no parts yet, COM at
            // the body center) costs that vessel its gravity this tick, not
            // the tick itself.
            if let Err(err) = entry
                .vessel
                .apply_gravitational_forces(self.backend.as_mut(), &self.body)
            {
                warn!("gravity skipped for vessel '{}': {}", entry.vessel.name, err);
            }
        }

        self.backend.step(dt);

        for entry in &mut self.vessels {
            if entry.vessel.is_on_rails() {
                entry.vessel.propagate_on_rails(&self.body, time)?;
            } else {
                entry.vessel.update_position_velocity(self.backend.as_ref());
                entry.vessel.refresh_orbital_state(&self.body, time);
            }
        }
        Ok(())
    }

    /// Evaluate and, when allowed, execute a floating-origin shift. Critical
    /// state (bodies, vessels, the primary) moves first; registered host
    /// handlers are notified afterwards through the manager's broadcast.
    fn check_origin_shift(&mut self) {
        let Some(tracked) = self.vessels.get(self.tracked_vessel) else {
            return;
        };
        let q = self.vessel_dynamic_pressure(self.tracked_vessel);
        let decision =
            self.origin
                .evaluate(tracked.vessel.position, tracked.vessel.is_thrusting, q);

        let delta = match decision {
            ShiftDecision::NotNeeded => return,
            ShiftDecision::RefusedThrusting | ShiftDecision::RefusedDynamicPressure => {
                debug!("origin shift deferred: {:?}", decision);
                return;
            }
            ShiftDecision::Shift(delta) => delta,
        };

        self.backend.translate_all(delta);
        self.body.position = self.body.position.add(&delta);
        for entry in &mut self.vessels {
            entry.vessel.position = entry.vessel.position.add(&delta);
        }
        self.origin.perform_shift(delta);

        let total_offset = self.origin.total_offset();
        self.push_event(SimEvent::OriginShift {
            delta,
            total_offset,
        });
    }
}

impl std::fmt::Debug for SimulationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationContext")
            .field("body", &self.body.name)
            .field("vessels", &self.vessels.len())
            .field("time", &self.time)
            .field("events", &self.events.len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
