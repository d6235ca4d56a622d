// Floating Origin Manager - Coordinate Re-Basing Protocol
// Single owner of the shift decision and the gated pre/shift/post broadcast
// over registered subscribers

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::math::Double3;

/// Distance from the origin at which a shift becomes due (m).
pub const ORIGIN_SHIFT_THRESHOLD: f64 = 20_000.0;

/// Dynamic pressure above which a shift is refused (Pa). Rebasing while
/// aerodynamic forces are integrated would smear them across frames.
pub const COAST_Q_LIMIT: f64 = 1_000.0;

/// Subscriber capability interface. `pre_shift` may snapshot or freeze
/// state, `handle_origin_shift` applies the pure translation, `post_shift`
/// resumes.
pub trait OriginShiftHandler {
    fn pre_shift(&mut self) {}
    fn handle_origin_shift(&mut self, delta: Double3);
    fn post_shift(&mut self) {}
}

/// Outcome of one shift evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ShiftDecision {
    /// Vessel is within range of the origin.
    NotNeeded,
    /// Due, but refused: engines are burning.
    RefusedThrusting,
    /// Due, but refused: dynamic pressure above the coast limit.
    RefusedDynamicPressure,
    /// Shift by this delta (applied to every world-space coordinate).
    Shift(Double3),
}

struct Subscriber {
    id: u64,
    priority: i32,
    enabled: bool,
    handler: Box<dyn OriginShiftHandler>,
}

/// Monitors the tracked vessel's distance from the coordinate origin and,
/// when due and safely in coast, runs the three-phase re-basing broadcast.
/// Critical systems (physics bodies, orbital state) are shifted by the
/// simulation context before external subscribers see the delta.
pub struct FloatingOriginManager {
    pub shift_threshold: f64,
    pub coast_q_limit: f64,
    subscribers: Vec<Subscriber>,
    next_id: u64,
    /// Accumulated world offset over all shifts, for telemetry and saves.
    total_offset: Double3,
    shift_count: u64,
}

impl Default for FloatingOriginManager {
    fn default() -> Self {
        Self::new(ORIGIN_SHIFT_THRESHOLD, COAST_Q_LIMIT)
    }
}

impl FloatingOriginManager {
    pub fn new(shift_threshold: f64, coast_q_limit: f64) -> Self {
        Self {
            shift_threshold,
            coast_q_limit,
            subscribers: Vec::new(),
            next_id: 0,
            total_offset: Double3::zero(),
            shift_count: 0,
        }
    }

    // =========================================================================
    // SUBSCRIPTION
    // =========================================================================

    /// Register a shift handler. Lower priority values shift first.
    pub fn register(&mut self, priority: i32, handler: Box<dyn OriginShiftHandler>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push(Subscriber {
            id,
            priority,
            enabled: true,
            handler,
        });
        self.subscribers.sort_by_key(|s| s.priority);
        id
    }

    pub fn unregister(&mut self, id: u64) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        before != self.subscribers.len()
    }

    /// Temporarily-inactive systems can skip updates without unregistering.
    pub fn set_enabled(&mut self, id: u64, enabled: bool) -> bool {
        match self.subscribers.iter_mut().find(|s| s.id == id) {
            Some(sub) => {
                sub.enabled = enabled;
                true
            }
            None => {
                warn!("set_enabled on unknown origin subscriber {}", id);
                false
            }
        }
    }

    // =========================================================================
    // SHIFT PROTOCOL
    // =========================================================================

    /// Decide whether a shift is due and allowed this tick. Pure; applying
    /// the result is the context's job inside its exclusive section.
    pub fn evaluate(
        &self,
        vessel_position: Double3,
        is_thrusting: bool,
        dynamic_pressure: f64,
    ) -> ShiftDecision {
        if vessel_position.magnitude() < self.shift_threshold {
            return ShiftDecision::NotNeeded;
        }
        if is_thrusting {
            return ShiftDecision::RefusedThrusting;
        }
        if dynamic_pressure >= self.coast_q_limit {
            return ShiftDecision::RefusedDynamicPressure;
        }
        // Move the vessel back onto the origin.
        ShiftDecision::Shift(-vessel_position)
    }

    /// Run the broadcast: pre-shift, then the delta in priority order, then
    /// post-shift. Disabled subscribers are skipped in all three phases.
    pub fn perform_shift(&mut self, delta: Double3) {
        debug!(
            "origin shift #{} by ({:.1}, {:.1}, {:.1}) m",
            self.shift_count + 1,
            delta.x,
            delta.y,
            delta.z
        );
        for sub in self.subscribers.iter_mut().filter(|s| s.enabled) {
            sub.handler.pre_shift();
        }
        for sub in self.subscribers.iter_mut().filter(|s| s.enabled) {
            sub.handler.handle_origin_shift(delta);
        }
        for sub in self.subscribers.iter_mut().filter(|s| s.enabled) {
            sub.handler.post_shift();
        }
        self.total_offset = self.total_offset.add(&delta);
        self.shift_count += 1;
    }

    pub fn total_offset(&self) -> Double3 {
        self.total_offset
    }

    pub fn shift_count(&self) -> u64 {
        self.shift_count
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records phase/subscriber order into a shared trace.
    struct Recorder {
        name: &'static str,
        trace: Rc<RefCell<Vec<String>>>,
    }

    impl OriginShiftHandler for Recorder {
        fn pre_shift(&mut self) {
            self.trace.borrow_mut().push(format!("pre:{}", self.name));
        }
        fn handle_origin_shift(&mut self, delta: Double3) {
            self.trace
                .borrow_mut()
                .push(format!("shift:{}:{}", self.name, delta.x));
        }
        fn post_shift(&mut self) {
            self.trace.borrow_mut().push(format!("post:{}", self.name));
        }
    }

    #[test]
    fn no_shift_inside_threshold() {
        let manager = FloatingOriginManager::default();
        let decision = manager.evaluate(Double3::new(5_000.0, 0.0, 0.0), false, 0.0);
        assert_eq!(decision, ShiftDecision::NotNeeded);
    }

    #[test]
    fn shift_refused_while_thrusting() {
        let manager = FloatingOriginManager::default();
        let decision = manager.evaluate(Double3::new(25_000.0, 0.0, 0.0), true, 0.0);
        assert_eq!(decision, ShiftDecision::RefusedThrusting);
    }

    #[test]
    fn shift_refused_above_coast_q() {
        let manager = FloatingOriginManager::default();
        let decision = manager.evaluate(Double3::new(25_000.0, 0.0, 0.0), false, 2_000.0);
        assert_eq!(decision, ShiftDecision::RefusedDynamicPressure);
    }

    #[test]
    fn shift_delta_recentres_vessel() {
        let manager = FloatingOriginManager::default();
        let pos = Double3::new(25_000.0, -3_000.0, 0.0);
        match manager.evaluate(pos, false, 500.0) {
            ShiftDecision::Shift(delta) => {
                assert_eq!(pos.add(&delta), Double3::zero());
            }
            other => panic!("expected shift, got {:?}", other),
        }
    }

    #[test]
    fn broadcast_runs_phases_in_priority_order() {
        let trace = Rc::new(RefCell::new(Vec::new()));
        let mut manager = FloatingOriginManager::default();
        // Registered out of order; priority must win.
        manager.register(
            10,
            Box::new(Recorder {
                name: "camera",
                trace: trace.clone(),
            }),
        );
        manager.register(
            0,
            Box::new(Recorder {
                name: "physics",
                trace: trace.clone(),
            }),
        );

        manager.perform_shift(Double3::new(-25_000.0, 0.0, 0.0));

        let got = trace.borrow().clone();
        assert_eq!(
            got,
            vec![
                "pre:physics",
                "pre:camera",
                "shift:physics:-25000",
                "shift:camera:-25000",
                "post:physics",
                "post:camera",
            ]
        );
    }

    #[test]
    fn disabled_subscriber_skipped_without_unregistering() {
        let trace = Rc::new(RefCell::new(Vec::new()));
        let mut manager = FloatingOriginManager::default();
        let id = manager.register(
            0,
            Box::new(Recorder {
                name: "effects",
                trace: trace.clone(),
            }),
        );

        manager.set_enabled(id, false);
        manager.perform_shift(Double3::UP);
        assert!(trace.borrow().is_empty());

        manager.set_enabled(id, true);
        manager.perform_shift(Double3::UP);
        assert_eq!(trace.borrow().len(), 3);
    }

    #[test]
    fn unregister_removes_subscriber() {
        let trace = Rc::new(RefCell::new(Vec::new()));
        let mut manager = FloatingOriginManager::default();
        let id = manager.register(
            0,
            Box::new(Recorder {
                name: "hud",
                trace: trace.clone(),
            }),
        );
        assert!(manager.unregister(id));
        assert!(!manager.unregister(id));
        manager.perform_shift(Double3::UP);
        assert!(trace.borrow().is_empty());
    }

    #[test]
    fn offset_accumulates() {
        let mut manager = FloatingOriginManager::default();
        manager.perform_shift(Double3::new(-20_000.0, 0.0, 0.0));
        manager.perform_shift(Double3::new(0.0, -30_000.0, 0.0));
        assert_eq!(manager.total_offset(), Double3::new(-20_000.0, -30_000.0, 0.0));
        assert_eq!(manager.shift_count(), 2);
    }
}
