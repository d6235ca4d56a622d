// 3D Vector Mathematics
// Double-precision vectors for orbital math, single-precision at the engine boundary

use serde::{Deserialize, Serialize};

// =============================================================================
// DOUBLE-PRECISION VECTOR
// =============================================================================

/// A double-precision 3-vector. All orbital and mass-property math stays in
/// f64; crossing into the engine's f32 types goes through the explicit,
/// clamped conversions below.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Double3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Double3 {
    /// Fallback "up" direction used where a degenerate geometry leaves no
    /// meaningful axis (e.g. two coincident parts at separation).
    pub const UP: Double3 = Double3 {
        x: 0.0,
        y: 0.0,
        z: 1.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn magnitude_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// Unit vector, or zero when the magnitude is below 1e-15.
    pub fn normalize(&self) -> Self {
        let mag = self.magnitude();
        if mag > 1e-15 {
            Self {
                x: self.x / mag,
                y: self.y / mag,
                z: self.z / mag,
            }
        } else {
            Self::zero()
        }
    }

    pub fn dot(&self, other: &Double3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Double3) -> Double3 {
        Double3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn scale(&self, s: f64) -> Self {
        Self {
            x: self.x * s,
            y: self.y * s,
            z: self.z * s,
        }
    }

    pub fn add(&self, other: &Double3) -> Double3 {
        Double3 {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }

    pub fn sub(&self, other: &Double3) -> Double3 {
        Double3 {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }

    pub fn distance(&self, other: &Double3) -> f64 {
        self.sub(other).magnitude()
    }

    /// Linear interpolation, `t` unclamped.
    pub fn lerp(&self, other: &Double3, t: f64) -> Double3 {
        self.add(&other.sub(self).scale(t))
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Convert to the engine's single-precision type. Components outside the
    /// finite f32 range saturate at +/- f32::MAX; NaN passes through so the
    /// caller's sanity checks still see it.
    pub fn to_vec3f(&self) -> Vec3f {
        Vec3f {
            x: clamp_to_f32(self.x),
            y: clamp_to_f32(self.y),
            z: clamp_to_f32(self.z),
        }
    }
}

impl std::ops::Add for Double3 {
    type Output = Double3;
    fn add(self, rhs: Double3) -> Double3 {
        Double3::add(&self, &rhs)
    }
}

impl std::ops::Sub for Double3 {
    type Output = Double3;
    fn sub(self, rhs: Double3) -> Double3 {
        Double3::sub(&self, &rhs)
    }
}

impl std::ops::Neg for Double3 {
    type Output = Double3;
    fn neg(self) -> Double3 {
        self.scale(-1.0)
    }
}

impl std::ops::Mul<f64> for Double3 {
    type Output = Double3;
    fn mul(self, rhs: f64) -> Double3 {
        self.scale(rhs)
    }
}

// =============================================================================
// SINGLE-PRECISION ENGINE VECTOR
// =============================================================================

/// The host engine's single-precision vector. Only exists at the boundary;
/// no solver math is done in f32.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Vec3f {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3f {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Widening conversion back to double precision. Exact.
    pub fn to_double3(&self) -> Double3 {
        Double3 {
            x: self.x as f64,
            y: self.y as f64,
            z: self.z as f64,
        }
    }
}

fn clamp_to_f32(v: f64) -> f32 {
    if v.is_nan() {
        return f32::NAN;
    }
    if v > f32::MAX as f64 {
        f32::MAX
    } else if v < f32::MIN as f64 {
        f32::MIN
    } else {
        v as f32
    }
}

/// Bounds-checked batch conversion for handing trajectory point sets to the
/// renderer. Panics if the slices differ in length (programmer error, not a
/// runtime condition); per-element clamping follows `Double3::to_vec3f`.
pub fn convert_batch(src: &[Double3], dst: &mut [Vec3f]) {
    assert_eq!(
        src.len(),
        dst.len(),
        "batch conversion requires equal slice lengths"
    );
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d = s.to_vec3f();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_operations() {
        let v1 = Double3::new(1.0, 2.0, 3.0);
        let v2 = Double3::new(4.0, 5.0, 6.0);

        let sum = v1 + v2;
        assert!((sum.x - 5.0).abs() < 1e-12);
        assert!((sum.y - 7.0).abs() < 1e-12);
        assert!((sum.z - 9.0).abs() < 1e-12);

        let dot = v1.dot(&v2);
        assert!((dot - 32.0).abs() < 1e-12);

        let cross = v1.cross(&v2);
        assert!((cross.x - (-3.0)).abs() < 1e-12);
        assert!((cross.y - 6.0).abs() < 1e-12);
        assert!((cross.z - (-3.0)).abs() < 1e-12);
    }

    #[test]
    fn normalize_zero_vector_is_zero() {
        let v = Double3::zero();
        assert_eq!(v.normalize(), Double3::zero());
    }

    #[test]
    fn normalize_unit_length() {
        let v = Double3::new(3.0, 4.0, 0.0).normalize();
        assert!((v.magnitude() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn conversion_saturates_out_of_range() {
        let big = Double3::new(1e40, -1e40, 1.5);
        let f = big.to_vec3f();
        assert_eq!(f.x, f32::MAX);
        assert_eq!(f.y, f32::MIN);
        assert!((f.z - 1.5).abs() < 1e-6);
    }

    #[test]
    fn conversion_preserves_nan() {
        let v = Double3::new(f64::NAN, 0.0, 0.0);
        assert!(v.to_vec3f().x.is_nan());
    }

    #[test]
    fn widening_round_trip_is_exact() {
        let f = Vec3f::new(1.25, -2.5, 1e20);
        let d = f.to_double3();
        assert_eq!(d.to_vec3f(), f);
    }

    #[test]
    fn batch_conversion() {
        let src = vec![Double3::new(1.0, 2.0, 3.0), Double3::new(1e40, 0.0, 0.0)];
        let mut dst = vec![Vec3f::default(); 2];
        convert_batch(&src, &mut dst);
        assert!((dst[0].y - 2.0).abs() < 1e-6);
        assert_eq!(dst[1].x, f32::MAX);
    }

    #[test]
    #[should_panic]
    fn batch_conversion_length_mismatch_panics() {
        let src = vec![Double3::zero()];
        let mut dst = vec![Vec3f::default(); 2];
        convert_batch(&src, &mut dst);
    }

    #[test]
    fn lerp_endpoints() {
        let a = Double3::new(0.0, 0.0, 0.0);
        let b = Double3::new(10.0, -4.0, 2.0);
        assert_eq!(a.lerp(&b, 0.0), a);
        assert_eq!(a.lerp(&b, 1.0), b);
    }
}
