// Kepler Solver - Orbital Anomaly and Propagation Routines
// Stateless, all-f64 numerics for elliptic, hyperbolic and near-parabolic orbits

use std::f64::consts::PI;

use crate::error::KeplerError;
use crate::math::Double3;
use crate::orbital::OrbitalState;

/// Default convergence tolerance on the anomaly iterate (radians).
pub const DEFAULT_TOLERANCE: f64 = 1e-10;

/// Iteration cap. Bounds worst-case solver cost for the 60 Hz caller; hitting
/// it is a bounded degradation (best estimate returned), not an error.
pub const DEFAULT_MAX_ITERATIONS: u32 = 16;

/// Below this eccentricity the orbit is treated as circular and the mean
/// anomaly is the eccentric anomaly.
const CIRCULAR_ECCENTRICITY: f64 = 1e-15;

/// Within this band around e = 1 the hyperbolic Newton iteration is
/// ill-conditioned and the near-parabolic Halley branch is used instead.
const PARABOLIC_BAND: f64 = 1e-15;

/// Hyperbolic trajectory sampling stays inside this fraction of the
/// asymptotic true-anomaly limit.
const HYPERBOLIC_ARC_FRACTION: f64 = 0.95;

// =============================================================================
// KEPLER'S EQUATION - ELLIPTIC BRANCH
// =============================================================================

/// Solve Kepler's equation `M = E - e*sin(E)` for the eccentric anomaly.
///
/// The mean anomaly is normalized to `[0, 2pi)` first. The starter is linear
/// in `M` for moderate eccentricities and Danby's safeguarded starter
/// `M + 0.85*e*sign(sin M)` above `e = 0.8`, then Newton-Raphson refines.
/// When the derivative `1 - e*cos(E)` degenerates or the iteration cap is
/// reached, the best estimate so far is returned rather than diverging.
pub fn solve_elliptic(
    mean_anomaly: f64,
    eccentricity: f64,
    tolerance: f64,
    max_iterations: u32,
) -> Result<f64, KeplerError> {
    if !(0.0..1.0).contains(&eccentricity) || !eccentricity.is_finite() {
        return Err(KeplerError::NotElliptic(eccentricity));
    }

    let m = mean_anomaly.rem_euclid(2.0 * PI);

    // Circular fast path: E = M exactly, no iteration.
    if eccentricity < CIRCULAR_ECCENTRICITY {
        return Ok(m);
    }

    let e = eccentricity;
    let mut e_anom = if e < 0.8 {
        m
    } else {
        // Danby's starter: steps toward the root on both halves of the
        // revolution, keeping Newton inside its convergence basin where
        // E - e*sin(E) flattens out near periapsis.
        m + 0.85 * e * m.sin().signum()
    };

    for _ in 0..max_iterations {
        let f = e_anom - e * e_anom.sin() - m;
        let f_prime = 1.0 - e * e_anom.cos();

        if f_prime.abs() < 1e-12 {
            break;
        }

        let delta = f / f_prime;
        e_anom -= delta;

        if delta.abs() < tolerance {
            break;
        }
    }

    Ok(e_anom)
}

// =============================================================================
// KEPLER'S EQUATION - HYPERBOLIC BRANCH
// =============================================================================

/// Solve the hyperbolic Kepler equation `M = e*sinh(H) - H` for the
/// hyperbolic anomaly.
///
/// Uses Newton-Raphson with a logarithmic starter. Within `1e-15` of e = 1
/// the Newton derivative `e*cosh(H) - 1` vanishes near the root and the
/// near-parabolic Halley branch is used instead.
pub fn solve_hyperbolic(
    mean_anomaly: f64,
    eccentricity: f64,
    tolerance: f64,
    max_iterations: u32,
) -> Result<f64, KeplerError> {
    if eccentricity < 1.0 || !eccentricity.is_finite() {
        return Err(KeplerError::NotHyperbolic(eccentricity));
    }

    let e = eccentricity;
    let m = mean_anomaly;

    if (e - 1.0).abs() < PARABOLIC_BAND {
        return Ok(solve_near_parabolic(m, e, tolerance, max_iterations));
    }

    if m == 0.0 {
        return Ok(0.0);
    }

    // Logarithmic starter: sinh grows exponentially, so ln(2|M|/e) lands
    // within O(1) of the root for large |M| and stays sane for small |M|.
    let mut h = (2.0 * m.abs() / e + 1.8).ln().copysign(m);

    for _ in 0..max_iterations {
        let f = e * h.sinh() - h - m;
        let f_prime = e * h.cosh() - 1.0;

        if f_prime.abs() < 1e-12 {
            break;
        }

        let delta = f / f_prime;
        h -= delta;

        if delta.abs() < tolerance {
            break;
        }
    }

    Ok(h)
}

/// Near-parabolic solver for `M = e*sinh(H) - H` with `e ~= 1`.
///
/// Newton's derivative `e*cosh(H) - 1` is ~H^2/2 near the origin there, so
/// this uses Halley's method (cubic convergence, second-derivative aware)
/// seeded from the small-anomaly limit `M ~= H^3/6`, i.e. `H0 = (6M)^(1/3)`.
fn solve_near_parabolic(mean_anomaly: f64, eccentricity: f64, tolerance: f64, max_iterations: u32) -> f64 {
    let e = eccentricity;
    let m = mean_anomaly;

    if m == 0.0 {
        return 0.0;
    }

    // With e ~= 1 the equation reduces to M ~= H^3/6 near the origin, so the
    // cube-root seed starts on the right scale; cbrt keeps the sign of M.
    let mut h = (6.0 * m).cbrt();

    for _ in 0..max_iterations {
        let sinh_h = h.sinh();
        let cosh_h = h.cosh();
        let f = e * sinh_h - h - m;
        let f_prime = e * cosh_h - 1.0;
        let f_second = e * sinh_h;

        let denom = 2.0 * f_prime * f_prime - f * f_second;
        if denom.abs() < 1e-300 {
            break;
        }

        let delta = 2.0 * f * f_prime / denom;
        h -= delta;

        if delta.abs() < tolerance {
            break;
        }
    }

    h
}

// =============================================================================
// STATE AT TIME
// =============================================================================

/// Cartesian position and velocity of `state` at universal time `t`,
/// in the inertial frame centered on the primary body.
pub fn state_at_time(state: &OrbitalState, t: f64) -> Result<(Double3, Double3), KeplerError> {
    let e = state.eccentricity;
    let a = state.semi_major_axis;
    let mu = state.gravitational_parameter;

    if mu <= 0.0 || !mu.is_finite() {
        return Err(KeplerError::InvalidGravitationalParameter(mu));
    }

    let m = state.mean_anomaly + state.mean_motion() * (t - state.epoch);

    // Per-branch true anomaly and radius.
    let (true_anomaly, radius) = if e < 1.0 {
        let e_anom = solve_elliptic(m, e, DEFAULT_TOLERANCE, DEFAULT_MAX_ITERATIONS)?;
        let nu = 2.0
            * ((1.0 + e).sqrt() * (e_anom / 2.0).sin())
                .atan2((1.0 - e).sqrt() * (e_anom / 2.0).cos());
        (nu, a * (1.0 - e * e_anom.cos()))
    } else {
        let h_anom = solve_hyperbolic(m, e, DEFAULT_TOLERANCE, DEFAULT_MAX_ITERATIONS)?;
        let nu = 2.0
            * ((e + 1.0).sqrt() * (h_anom / 2.0).sinh())
                .atan2((e - 1.0).sqrt() * (h_anom / 2.0).cosh());
        // a < 0 on the hyperbolic branch, radius comes out positive.
        (nu, a * (1.0 - e * h_anom.cosh()))
    };

    // Semi-latus rectum is positive on both branches.
    let p = a * (1.0 - e * e);
    if p <= 0.0 || !p.is_finite() {
        return Err(KeplerError::DegenerateState("non-positive semi-latus rectum"));
    }

    let cos_nu = true_anomaly.cos();
    let sin_nu = true_anomaly.sin();

    // Perifocal frame: x toward periapsis, z along angular momentum.
    let x_orb = radius * cos_nu;
    let y_orb = radius * sin_nu;

    let sqrt_mu_p = (mu / p).sqrt();
    let vx_orb = -sqrt_mu_p * sin_nu;
    let vy_orb = sqrt_mu_p * (e + cos_nu);

    Ok(rotate_perifocal(
        state,
        Double3::new(x_orb, y_orb, 0.0),
        Double3::new(vx_orb, vy_orb, 0.0),
    ))
}

/// Position at time `t`. See [`state_at_time`].
pub fn position_at_time(state: &OrbitalState, t: f64) -> Result<Double3, KeplerError> {
    state_at_time(state, t).map(|(pos, _)| pos)
}

/// Velocity at time `t`. See [`state_at_time`].
pub fn velocity_at_time(state: &OrbitalState, t: f64) -> Result<Double3, KeplerError> {
    state_at_time(state, t).map(|(_, vel)| vel)
}

/// Classical 3-1-3 rotation (ascending node, inclination, argument of
/// periapsis) from the perifocal frame into the inertial frame.
fn rotate_perifocal(state: &OrbitalState, pos: Double3, vel: Double3) -> (Double3, Double3) {
    let cos_omega = state.longitude_of_ascending_node.cos();
    let sin_omega = state.longitude_of_ascending_node.sin();
    let cos_w = state.argument_of_periapsis.cos();
    let sin_w = state.argument_of_periapsis.sin();
    let cos_i = state.inclination.cos();
    let sin_i = state.inclination.sin();

    let r11 = cos_omega * cos_w - sin_omega * sin_w * cos_i;
    let r12 = -cos_omega * sin_w - sin_omega * cos_w * cos_i;
    let r21 = sin_omega * cos_w + cos_omega * sin_w * cos_i;
    let r22 = -sin_omega * sin_w + cos_omega * cos_w * cos_i;
    let r31 = sin_w * sin_i;
    let r32 = cos_w * sin_i;

    let position = Double3::new(
        r11 * pos.x + r12 * pos.y,
        r21 * pos.x + r22 * pos.y,
        r31 * pos.x + r32 * pos.y,
    );
    let velocity = Double3::new(
        r11 * vel.x + r12 * vel.y,
        r21 * vel.x + r22 * vel.y,
        r31 * vel.x + r32 * vel.y,
    );

    (position, velocity)
}

// =============================================================================
// TRAJECTORY SAMPLING
// =============================================================================

/// Sample `count` points along the orbit for rendering.
///
/// Elliptic orbits cover the full revolution; with `adaptive` the parametric
/// fraction is remapped by `t^(1/(1+2e))`, concentrating samples where the
/// path curvature is highest. Hyperbolic orbits sample the finite arc inside
/// +/-95% of the asymptotic true-anomaly limit `acos(-1/e)`.
pub fn sample_trajectory(
    state: &OrbitalState,
    count: usize,
    adaptive: bool,
) -> Result<Vec<Double3>, KeplerError> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let e = state.eccentricity;
    let p = state.semi_major_axis * (1.0 - e * e);
    if p <= 0.0 || !p.is_finite() {
        return Err(KeplerError::DegenerateState("non-positive semi-latus rectum"));
    }

    let mut points = Vec::with_capacity(count);
    let denom = (count - 1).max(1) as f64;

    for i in 0..count {
        let t = i as f64 / denom;
        let nu = if e < 1.0 {
            let scaled = if adaptive { t.powf(1.0 / (1.0 + 2.0 * e)) } else { t };
            scaled * 2.0 * PI
        } else {
            let nu_max = (-1.0 / e).acos() * HYPERBOLIC_ARC_FRACTION;
            -nu_max + t * 2.0 * nu_max
        };

        let r = p / (1.0 + e * nu.cos());
        let (pos, _) = rotate_perifocal(
            state,
            Double3::new(r * nu.cos(), r * nu.sin(), 0.0),
            Double3::zero(),
        );
        points.push(pos);
    }

    Ok(points)
}

// =============================================================================
// ENERGY CONSERVATION ORACLE
// =============================================================================

/// Correctness oracle for the solver: recompute the specific orbital energy
/// `v^2/2 - mu/r` from the Cartesian state at the epoch and at `epoch + dt`
/// and check the relative drift against `tolerance`.
pub fn validate_energy_conservation(state: &OrbitalState, dt: f64, tolerance: f64) -> bool {
    let energy_at = |t: f64| -> Option<f64> {
        let (pos, vel) = state_at_time(state, t).ok()?;
        let r = pos.magnitude();
        if r < 1e-10 {
            return None;
        }
        Some(vel.magnitude_squared() / 2.0 - state.gravitational_parameter / r)
    };

    let (e0, e1) = match (energy_at(state.epoch), energy_at(state.epoch + dt)) {
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };

    if e0.abs() < 1e-20 {
        return (e1 - e0).abs() < tolerance;
    }
    ((e1 - e0) / e0).abs() < tolerance
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::CelestialBody;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn elliptic_circular_fast_path() {
        let e_anom = solve_elliptic(1.0, 0.0, DEFAULT_TOLERANCE, DEFAULT_MAX_ITERATIONS).unwrap();
        assert!((e_anom - 1.0).abs() < 1e-14);
    }

    #[test]
    fn elliptic_known_value() {
        let e_anom = solve_elliptic(0.5, 0.5, DEFAULT_TOLERANCE, DEFAULT_MAX_ITERATIONS).unwrap();
        let check = e_anom - 0.5 * e_anom.sin();
        assert!((check - 0.5).abs() < 1e-9);
    }

    #[test]
    fn elliptic_residual_sweep() {
        let mut rng = StdRng::seed_from_u64(0x6f72626974);
        for _ in 0..2000 {
            let e: f64 = rng.gen_range(0.0..0.999);
            let m: f64 = rng.gen_range(0.0..2.0 * PI);
            let e_anom = solve_elliptic(m, e, DEFAULT_TOLERANCE, DEFAULT_MAX_ITERATIONS).unwrap();
            let res = e_anom - e * e_anom.sin() - m;
            assert!(
                res.abs() < 1e-9,
                "residual {} at e={} M={}",
                res,
                e,
                m
            );
        }
    }

    #[test]
    fn elliptic_high_eccentricity_near_periapsis() {
        // The flat region of E - e*sin(E); the safeguarded starter earns its
        // keep here.
        for &m in &[1e-6, 0.01, 0.1] {
            let e = 0.99;
            let e_anom = solve_elliptic(m, e, DEFAULT_TOLERANCE, DEFAULT_MAX_ITERATIONS).unwrap();
            let res = e_anom - e * e_anom.sin() - m;
            assert!(res.abs() < 1e-9, "residual {} at M={}", res, m);
        }
    }

    #[test]
    fn elliptic_high_eccentricity_second_half_revolution() {
        // M > pi at high e: a naive starter lands outside Newton's basin and
        // the capped iteration walks away from the root instead of into it.
        for &(e, m) in &[
            (0.9702400498534544, 5.334819761064704),
            (0.97, 4.0),
            (0.999, 6.0),
            (0.85, 3.5),
        ] {
            let e_anom = solve_elliptic(m, e, DEFAULT_TOLERANCE, DEFAULT_MAX_ITERATIONS).unwrap();
            let res: f64 = e_anom - e * e_anom.sin() - m;
            assert!(res.abs() < 1e-9, "residual {} at e={} M={}", res, e, m);
        }
    }

    #[test]
    fn elliptic_normalizes_mean_anomaly() {
        let a = solve_elliptic(0.3, 0.4, DEFAULT_TOLERANCE, DEFAULT_MAX_ITERATIONS).unwrap();
        let b = solve_elliptic(0.3 + 4.0 * PI, 0.4, DEFAULT_TOLERANCE, DEFAULT_MAX_ITERATIONS)
            .unwrap();
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn elliptic_rejects_out_of_domain() {
        assert!(matches!(
            solve_elliptic(0.5, 1.0, DEFAULT_TOLERANCE, DEFAULT_MAX_ITERATIONS),
            Err(KeplerError::NotElliptic(_))
        ));
        assert!(matches!(
            solve_elliptic(0.5, -0.1, DEFAULT_TOLERANCE, DEFAULT_MAX_ITERATIONS),
            Err(KeplerError::NotElliptic(_))
        ));
    }

    #[test]
    fn hyperbolic_residual_sweep() {
        let mut rng = StdRng::seed_from_u64(0x68797065);
        for _ in 0..2000 {
            let e: f64 = rng.gen_range(1.001..10.0);
            let m: f64 = rng.gen_range(-20.0..20.0);
            let h = solve_hyperbolic(m, e, DEFAULT_TOLERANCE, DEFAULT_MAX_ITERATIONS).unwrap();
            let res = e * h.sinh() - h - m;
            assert!(res.abs() < 1e-9, "residual {} at e={} M={}", res, e, m);
        }
    }

    #[test]
    fn hyperbolic_zero_mean_anomaly() {
        let h = solve_hyperbolic(0.0, 1.5, DEFAULT_TOLERANCE, DEFAULT_MAX_ITERATIONS).unwrap();
        assert_eq!(h, 0.0);
    }

    #[test]
    fn hyperbolic_rejects_elliptic_input() {
        assert!(matches!(
            solve_hyperbolic(0.5, 0.9, DEFAULT_TOLERANCE, DEFAULT_MAX_ITERATIONS),
            Err(KeplerError::NotHyperbolic(_))
        ));
    }

    #[test]
    fn near_parabolic_residual() {
        // Exactly on the band edge: Newton's derivative vanishes at the root,
        // Halley must still converge. Tiny anomalies need the cube-root seed;
        // a linear-scale seed strands the iteration orders of magnitude short.
        let e = 1.0;
        for &m in &[1e-12, 1e-8, 1e-4, 0.1, 2.0, -0.5] {
            let h = solve_hyperbolic(m, e, DEFAULT_TOLERANCE, 32).unwrap();
            let res = e * h.sinh() - h - m;
            assert!(res.abs() < 1e-9, "residual {} at M={}", res, m);
        }
    }

    #[test]
    fn position_on_circular_orbit_has_constant_radius() {
        let body = CelestialBody::kerbin();
        let state = body.create_circular_orbit(100_000.0, 0.0, 0.0).unwrap();
        let r0 = position_at_time(&state, 0.0).unwrap().magnitude();
        for i in 1..10 {
            let r = position_at_time(&state, i as f64 * 500.0).unwrap().magnitude();
            assert!((r - r0).abs() / r0 < 1e-9, "radius drift {}", (r - r0) / r0);
        }
    }

    #[test]
    fn velocity_matches_vis_viva() {
        let body = CelestialBody::kerbin();
        let state = body.create_circular_orbit(200_000.0, 0.3, 0.0).unwrap();
        let (pos, vel) = state_at_time(&state, 1234.0).unwrap();
        let expected = (state.gravitational_parameter
            * (2.0 / pos.magnitude() - 1.0 / state.semi_major_axis))
            .sqrt();
        assert!((vel.magnitude() - expected).abs() / expected < 1e-9);
    }

    #[test]
    fn energy_conserved_over_ten_periods() {
        let body = CelestialBody::kerbin();
        let state = body.create_circular_orbit(100_000.0, 0.0, 0.0).unwrap();
        let period = state.period().unwrap();
        assert!(validate_energy_conservation(&state, 10.0 * period, 1e-9));
    }

    #[test]
    fn energy_conserved_hyperbolic() {
        let state = OrbitalState::new(
            -8.0e5,
            1.8,
            0.4,
            1.0,
            0.5,
            0.1,
            0.0,
            crate::body::KERBIN_GM,
        );
        assert!(validate_energy_conservation(&state, 3600.0, 1e-9));
    }

    #[test]
    fn sample_counts_and_finiteness() {
        let body = CelestialBody::kerbin();
        let state = body.create_circular_orbit(150_000.0, 0.2, 0.0).unwrap();
        for &(count, adaptive) in &[(0usize, false), (1, false), (64, false), (64, true)] {
            let pts = sample_trajectory(&state, count, adaptive).unwrap();
            assert_eq!(pts.len(), count);
            assert!(pts.iter().all(|p| p.is_finite()));
        }
    }

    #[test]
    fn adaptive_sampling_densifies_near_periapsis() {
        let state = OrbitalState::new(
            1.0e6,
            0.8,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            crate::body::KERBIN_GM,
        );
        let uniform = sample_trajectory(&state, 128, false).unwrap();
        let adaptive = sample_trajectory(&state, 128, true).unwrap();
        let periapsis = state.semi_major_axis * (1.0 - state.eccentricity);
        let near = |pts: &[Double3]| {
            pts.iter()
                .filter(|p| p.magnitude() < 2.0 * periapsis)
                .count()
        };
        assert!(near(&adaptive) > near(&uniform));
    }

    #[test]
    fn hyperbolic_samples_stay_on_finite_arc() {
        let state = OrbitalState::new(
            -1.0e6,
            2.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            crate::body::KERBIN_GM,
        );
        let pts = sample_trajectory(&state, 100, false).unwrap();
        assert_eq!(pts.len(), 100);
        assert!(pts.iter().all(|p| p.is_finite() && p.magnitude() > 0.0));
    }
}
