// Anti-Wobble System - Dynamic Joint Stiffness Control
// Hysteresis-latched suppression driven by dynamic pressure and chain length,
// smoothed stiffness scaling, and virtual struts for long part chains

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::backend::{JointHandle, PhysicsBackend};
use crate::vessel::{JointTuning, PhysicsVessel};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Tunable knobs for wobble suppression. Injected, never ambient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WobbleConfig {
    /// Suppression turns on at or above this Q (Pa).
    pub q_enable: f64,
    /// Suppression turns off strictly below this Q (Pa).
    pub q_disable: f64,
    /// Chains longer than this many parts trigger suppression and struts.
    pub chain_threshold: usize,
    /// Upper bound on the stiffness multiplier.
    pub max_multiplier: f64,
    /// First-order smoothing time constant (s).
    pub smoothing_tau: f64,
    /// One virtual strut per this many levels of chain depth.
    pub strut_interval: usize,
}

impl Default for WobbleConfig {
    fn default() -> Self {
        Self {
            q_enable: 12_000.0,
            q_disable: 8_000.0,
            chain_threshold: 5,
            max_multiplier: 5.0,
            smoothing_tau: 0.3,
            strut_interval: 5,
        }
    }
}

// =============================================================================
// ANTI-WOBBLE SYSTEM
// =============================================================================

/// Per-vessel wobble-suppression state.
///
/// The latch activates when `Q >= q_enable` OR the longest chain exceeds the
/// threshold, and releases only when `Q < q_disable` AND the chain condition
/// has cleared; the asymmetric Q band prevents toggling near one boundary.
/// The applied multiplier approaches its target through first-order
/// exponential smoothing, so stiffness never jumps regardless of tick jitter.
#[derive(Debug)]
pub struct AntiWobbleSystem {
    config: WobbleConfig,
    current_multiplier: f64,
    suppression_active: bool,
    /// Virtual struts keyed by the distal part id, for idempotent maintenance.
    virtual_struts: HashMap<u32, JointHandle>,
}

impl AntiWobbleSystem {
    pub fn new(config: WobbleConfig) -> Self {
        Self {
            config,
            current_multiplier: 1.0,
            suppression_active: false,
            virtual_struts: HashMap::new(),
        }
    }

    pub fn current_multiplier(&self) -> f64 {
        self.current_multiplier
    }

    pub fn is_suppression_active(&self) -> bool {
        self.suppression_active
    }

    pub fn virtual_strut_count(&self) -> usize {
        self.virtual_struts.len()
    }

    /// One tick of wobble processing: update the latch, smooth the
    /// multiplier, re-tune every active joint in place, and maintain
    /// virtual struts. Safe to call every tick; strut maintenance is
    /// idempotent under unchanged conditions.
    pub fn update(
        &mut self,
        vessel: &mut PhysicsVessel,
        backend: &mut dyn PhysicsBackend,
        dynamic_pressure: f64,
        dt: f64,
    ) {
        let chain = vessel.longest_chain_length();
        let chain_exceeded = chain > self.config.chain_threshold;

        // Hysteresis latch over Q, ORed with the chain condition.
        if dynamic_pressure >= self.config.q_enable || chain_exceeded {
            self.suppression_active = true;
        } else if dynamic_pressure < self.config.q_disable && !chain_exceeded {
            self.suppression_active = false;
        }

        let target = if self.suppression_active {
            self.target_multiplier(dynamic_pressure, chain)
        } else {
            1.0
        };

        // current += (target - current) * (1 - exp(-dt/tau))
        let blend = 1.0 - (-dt / self.config.smoothing_tau).exp();
        self.current_multiplier += (target - self.current_multiplier) * blend;

        self.apply_tuning(vessel, backend);
        self.maintain_virtual_struts(vessel, backend, chain_exceeded);
    }

    /// Monotonic severity blend of Q and chain length, mapped onto
    /// [1, max_multiplier]. Q dominates; the chain term tops it up.
    fn target_multiplier(&self, q: f64, chain: usize) -> f64 {
        let q_term = ((q - self.config.q_disable) / (24_000.0 - self.config.q_disable))
            .clamp(0.0, 1.0);
        let chain_term = ((chain as f64 - self.config.chain_threshold as f64) / 10.0)
            .clamp(0.0, 1.0);
        let severity = (0.65 * q_term + 0.35 * chain_term).clamp(0.0, 1.0);
        1.0 + (self.config.max_multiplier - 1.0) * severity
    }

    /// Scale every active joint's tuning in place. Never recreates joints;
    /// stale handles are skipped and logged, not fatal to the tick.
    fn apply_tuning(&self, vessel: &mut PhysicsVessel, backend: &mut dyn PhysicsBackend) {
        let multiplier = self.current_multiplier;
        for joint in vessel.joints_mut().filter(|j| j.is_active) {
            let Some(handle) = joint.handle else { continue };
            let scaled = joint.tuning.scaled(multiplier);
            if !backend.apply_joint_tuning(handle, &scaled) {
                warn!("joint {} tuning skipped: handle freed by host", joint.id);
            }
        }
    }

    /// Create or remove virtual struts so that exactly the parts at every
    /// `strut_interval`-th chain depth carry one strut to the root while the
    /// chain condition holds. Calling this twice under unchanged conditions
    /// changes nothing.
    fn maintain_virtual_struts(
        &mut self,
        vessel: &mut PhysicsVessel,
        backend: &mut dyn PhysicsBackend,
        chain_exceeded: bool,
    ) {
        if !chain_exceeded {
            if !self.virtual_struts.is_empty() {
                debug!("removing {} virtual struts", self.virtual_struts.len());
                for (_, handle) in self.virtual_struts.drain() {
                    backend.remove_joint(handle);
                }
            }
            return;
        }

        let Some(root) = vessel.root_part_id() else { return };
        let depths = vessel.chain_depths_from_root();
        let interval = self.config.strut_interval.max(1);

        let wanted: Vec<u32> = depths
            .iter()
            .filter(|(_, &d)| d > 0 && d % interval == 0)
            .map(|(&id, _)| id)
            .collect();

        // Drop struts whose anchor part left the wanted set or the vessel.
        let still_wanted: Vec<u32> = self
            .virtual_struts
            .keys()
            .copied()
            .filter(|id| wanted.contains(id))
            .collect();
        let stale: Vec<u32> = self
            .virtual_struts
            .keys()
            .copied()
            .filter(|id| !still_wanted.contains(id))
            .collect();
        for id in stale {
            if let Some(handle) = self.virtual_struts.remove(&id) {
                backend.remove_joint(handle);
            }
        }

        // Add missing struts, root to distal part, physics-only.
        let root_body = vessel
            .parts()
            .find(|p| p.id == root && p.is_active)
            .and_then(|p| p.body);
        let Some(root_body) = root_body else { return };

        for part_id in wanted {
            if self.virtual_struts.contains_key(&part_id) {
                continue;
            }
            let part_body = vessel
                .parts()
                .find(|p| p.id == part_id && p.is_active)
                .and_then(|p| p.body);
            let Some(part_body) = part_body else { continue };

            match backend.create_joint(root_body, part_body, &JointTuning::rigid()) {
                Some(handle) => {
                    debug!("virtual strut root -> part {}", part_id);
                    self.virtual_struts.insert(part_id, handle);
                }
                None => warn!("host refused virtual strut to part {}", part_id),
            }
        }
    }

    /// Drop all struts, e.g. when the vessel is destroyed or goes on rails.
    pub fn clear_struts(&mut self, backend: &mut dyn PhysicsBackend) {
        for (_, handle) in self.virtual_struts.drain() {
            backend.remove_joint(handle);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::math::Double3;
    use crate::vessel::JointType;

    fn chain_vessel(backend: &mut InMemoryBackend, parts: usize) -> PhysicsVessel {
        let mut vessel = PhysicsVessel::new("chain", Double3::zero(), Double3::zero());
        let mut prev = None;
        for i in 0..parts {
            let id = vessel
                .add_part(backend, 100.0, Double3::new(0.0, 0.0, i as f64))
                .unwrap();
            if let Some(prev) = prev {
                vessel.create_joint(backend, prev, id, JointType::Fixed).unwrap();
            }
            prev = Some(id);
        }
        vessel
    }

    const DT: f64 = 1.0 / 60.0;

    #[test]
    fn inactive_below_thresholds() {
        let mut backend = InMemoryBackend::new();
        let mut vessel = chain_vessel(&mut backend, 3);
        let mut wobble = AntiWobbleSystem::new(WobbleConfig::default());

        for _ in 0..120 {
            wobble.update(&mut vessel, &mut backend, 5_000.0, DT);
        }
        assert!(!wobble.is_suppression_active());
        assert!((wobble.current_multiplier() - 1.0).abs() < 1e-6);
        assert_eq!(wobble.virtual_strut_count(), 0);
    }

    #[test]
    fn activates_on_high_q() {
        let mut backend = InMemoryBackend::new();
        let mut vessel = chain_vessel(&mut backend, 3);
        let mut wobble = AntiWobbleSystem::new(WobbleConfig::default());

        wobble.update(&mut vessel, &mut backend, 15_000.0, DT);
        assert!(wobble.is_suppression_active());
        // Short chain: no struts even under high Q.
        assert_eq!(wobble.virtual_strut_count(), 0);
    }

    #[test]
    fn activates_on_long_chain_alone() {
        let mut backend = InMemoryBackend::new();
        let mut vessel = chain_vessel(&mut backend, 8);
        let mut wobble = AntiWobbleSystem::new(WobbleConfig::default());

        wobble.update(&mut vessel, &mut backend, 0.0, DT);
        assert!(wobble.is_suppression_active());
    }

    #[test]
    fn multiplier_bounded_and_smoothed() {
        let mut backend = InMemoryBackend::new();
        let mut vessel = chain_vessel(&mut backend, 15);
        let mut wobble = AntiWobbleSystem::new(WobbleConfig::default());

        let mut last = wobble.current_multiplier();
        for _ in 0..600 {
            wobble.update(&mut vessel, &mut backend, 30_000.0, DT);
            let now = wobble.current_multiplier();
            // Monotone rise toward the cap, one smoothing step at a time.
            assert!(now >= last - 1e-12);
            assert!(now <= 5.0 + 1e-9);
            // Per-tick change bounded by the smoothing blend.
            let blend = 1.0 - (-DT / 0.3f64).exp();
            assert!(now - last <= (5.0 - 1.0) * blend + 1e-9);
            last = now;
        }
        assert!(last > 4.5, "multiplier should approach the cap, got {}", last);
    }

    #[test]
    fn hysteresis_band_holds_state() {
        let mut backend = InMemoryBackend::new();
        let mut vessel = chain_vessel(&mut backend, 3);
        let mut wobble = AntiWobbleSystem::new(WobbleConfig::default());

        wobble.update(&mut vessel, &mut backend, 13_000.0, DT);
        assert!(wobble.is_suppression_active());
        // Inside the 8-12 kPa band: stays active.
        wobble.update(&mut vessel, &mut backend, 10_000.0, DT);
        assert!(wobble.is_suppression_active());
        // Below the disable threshold with a short chain: releases.
        wobble.update(&mut vessel, &mut backend, 7_000.0, DT);
        assert!(!wobble.is_suppression_active());
    }

    #[test]
    fn chain_condition_blocks_release() {
        let mut backend = InMemoryBackend::new();
        let mut vessel = chain_vessel(&mut backend, 8);
        let mut wobble = AntiWobbleSystem::new(WobbleConfig::default());

        wobble.update(&mut vessel, &mut backend, 15_000.0, DT);
        assert!(wobble.is_suppression_active());
        // Q has dropped but the chain is still long: no release.
        wobble.update(&mut vessel, &mut backend, 0.0, DT);
        assert!(wobble.is_suppression_active());
    }

    #[test]
    fn virtual_struts_idempotent() {
        let mut backend = InMemoryBackend::new();
        let mut vessel = chain_vessel(&mut backend, 12);
        let mut wobble = AntiWobbleSystem::new(WobbleConfig::default());

        wobble.update(&mut vessel, &mut backend, 0.0, DT);
        let count = wobble.virtual_strut_count();
        assert!(count > 0);
        let joints_in_backend = backend.joint_count();

        // Unchanged conditions: no churn, no leaks.
        wobble.update(&mut vessel, &mut backend, 0.0, DT);
        wobble.update(&mut vessel, &mut backend, 0.0, DT);
        assert_eq!(wobble.virtual_strut_count(), count);
        assert_eq!(backend.joint_count(), joints_in_backend);
    }

    #[test]
    fn struts_at_interval_depths() {
        let mut backend = InMemoryBackend::new();
        let mut vessel = chain_vessel(&mut backend, 12);
        let mut wobble = AntiWobbleSystem::new(WobbleConfig::default());

        wobble.update(&mut vessel, &mut backend, 0.0, DT);
        // Depths 5 and 10 on a 12-part chain.
        assert_eq!(wobble.virtual_strut_count(), 2);
    }

    #[test]
    fn struts_removed_when_conditions_clear() {
        let mut backend = InMemoryBackend::new();
        let mut vessel = chain_vessel(&mut backend, 12);
        let mut wobble = AntiWobbleSystem::new(WobbleConfig::default());

        wobble.update(&mut vessel, &mut backend, 0.0, DT);
        assert!(wobble.virtual_strut_count() > 0);

        // Break the chain below the threshold; struts must go.
        vessel.separate_at_joint(&mut backend, 4, false).unwrap();
        wobble.update(&mut vessel, &mut backend, 0.0, DT);
        assert_eq!(wobble.virtual_strut_count(), 0);
    }

    #[test]
    fn tuning_scaled_in_place() {
        let mut backend = InMemoryBackend::new();
        let mut vessel = chain_vessel(&mut backend, 3);
        let mut wobble = AntiWobbleSystem::new(WobbleConfig::default());
        let base = JointTuning::rigid();

        for _ in 0..300 {
            wobble.update(&mut vessel, &mut backend, 30_000.0, DT);
        }

        let joint = vessel.joints().find(|j| j.is_active).unwrap();
        let tuned = backend.joint_tuning(joint.handle.unwrap()).unwrap();
        assert!(tuned.stiffness > base.stiffness * 2.0);
        // Base tuning on the vessel record is untouched; scaling is applied
        // through the backend only.
        assert_eq!(joint.tuning, base);
    }
}
