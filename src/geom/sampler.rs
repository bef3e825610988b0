//! Random-sampling primitives for ray seeding and crystal orientation.

use crate::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::{PI, TAU};

/// Generate a random unit vector uniformly distributed on the sphere.
pub fn uniform_sphere_dir(rng: &mut impl Rng) -> Vec3 {
    loop {
        let x: f64 = rng.gen_range(-1.0..1.0);
        let y: f64 = rng.gen_range(-1.0..1.0);
        let z: f64 = rng.gen_range(-1.0..1.0);
        let len2 = x * x + y * y + z * z;
        if len2 > 1e-6 && len2 <= 1.0 {
            let len = len2.sqrt();
            return Vec3::new(x / len, y / len, z / len);
        }
    }
}

/// Generate a random unit vector uniformly distributed inside the spherical
/// cap of angular radius `half_angle` (radians) around `center`.
pub fn uniform_cap_dir(rng: &mut impl Rng, center: Vec3, half_angle: f64) -> Vec3 {
    let cos_min = half_angle.cos();
    let z: f64 = rng.gen_range(cos_min..=1.0);
    let phi: f64 = rng.gen_range(0.0..TAU);
    let r = (1.0 - z * z).max(0.0).sqrt();
    let local = Vec3::new(r * phi.cos(), r * phi.sin(), z);

    // Orthonormal basis with `center` as the local z axis.
    let w = center.normalize().unwrap_or(Vec3::new(0., 0., 1.));
    let u = perpendicular(w);
    let v = w.cross(u);
    u * local.x + v * local.y + w * local.z
}

/// A unit vector perpendicular to `v`.
fn perpendicular(v: Vec3) -> Vec3 {
    let candidate = if v.x.abs() <= v.y.abs() && v.x.abs() <= v.z.abs() {
        Vec3::new(1., 0., 0.)
    } else if v.y.abs() <= v.z.abs() {
        Vec3::new(0., 1., 0.)
    } else {
        Vec3::new(0., 0., 1.)
    };
    v.cross(candidate).normalize().unwrap_or(Vec3::new(1., 0., 0.))
}

/// Draw a sample from `N(mean, std)` via the Box-Muller transform.
pub fn gaussian(rng: &mut impl Rng, mean: f64, std: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    mean + std * (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

/// Sample a main-axis latitude from a Gaussian over the zenith angle.
///
/// The distribution parameters describe the angle between the main axis and
/// the vertical (0 = axis up, pi/2 = axis horizontal). Samples are reflected
/// back into `[0, pi]` at the poles. Returns the latitude `pi/2 - zenith`.
pub fn gaussian_zenith_latitude(rng: &mut impl Rng, mean: f64, std: f64) -> f64 {
    let mut zenith = gaussian(rng, mean, std);
    zenith = zenith.rem_euclid(TAU);
    if zenith > PI {
        zenith = TAU - zenith;
    }
    PI / 2.0 - zenith
}

/// Sample a roll angle, wrapped into `[0, 2*pi)`.
pub fn gaussian_roll(rng: &mut impl Rng, mean: f64, std: f64) -> f64 {
    gaussian(rng, mean, std).rem_euclid(TAU)
}

/// Uniformly sample a point inside the triangle `(v0, v1, v2)`.
pub fn uniform_triangle_point(rng: &mut impl Rng, v0: Vec3, v1: Vec3, v2: Vec3) -> Vec3 {
    let a = rng.gen_range(0.0..1.0_f64).sqrt();
    let b: f64 = rng.gen_range(0.0..1.0);
    v0 * (1.0 - a) + v1 * (a * (1.0 - b)) + v2 * (a * b)
}

/// Draw an index from a discrete distribution given by `weights`.
///
/// The weights need not be normalized; non-positive weights are never drawn.
/// Returns `None` when every weight is non-positive.
pub fn sample_discrete(rng: &mut impl Rng, weights: &[f64]) -> Option<usize> {
    let sum: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    if sum <= 0.0 {
        return None;
    }
    let mut target = rng.gen_range(0.0..sum);
    let mut last = None;
    for (idx, &w) in weights.iter().enumerate() {
        if w <= 0.0 {
            continue;
        }
        last = Some(idx);
        if target < w {
            return Some(idx);
        }
        target -= w;
    }
    // Floating-point residue can fall past the end; the last positive
    // weight absorbs it.
    last
}

/// Derives a stripe-local RNG from the master seed.
///
/// Each (stripe, stream) pair gets an independent generator so the sampled
/// values do not depend on how stripes are scheduled across worker threads.
pub fn stripe_rng(master_seed: u64, stripe_index: u64, stream_index: u64) -> StdRng {
    let mut state = master_seed
        .wrapping_add(stripe_index.wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(stream_index.wrapping_mul(0xBF58_476D_1CE4_E5B9));
    // splitmix64 finalizer
    state = (state ^ (state >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    state = (state ^ (state >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    state ^= state >> 31;
    StdRng::seed_from_u64(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_uniform_sphere_unit_length() {
        let mut rng = rng();
        for _ in 0..100 {
            let d = uniform_sphere_dir(&mut rng);
            assert!((d.length() - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_cap_within_half_angle() {
        let mut rng = rng();
        let center = Vec3::new(0.3, -0.5, 0.8).normalize().unwrap();
        let half_angle = 0.25_f64;
        for _ in 0..200 {
            let d = uniform_cap_dir(&mut rng, center, half_angle);
            assert!((d.length() - 1.0).abs() < 1e-10);
            let angle = d.dot(center).clamp(-1.0, 1.0).acos();
            assert!(
                angle <= half_angle + 1e-9,
                "Sample {angle} outside cap of {half_angle}"
            );
        }
    }

    #[test]
    fn test_gaussian_moments() {
        let mut rng = rng();
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| gaussian(&mut rng, 2.0, 0.5)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 2.0).abs() < 0.02, "mean = {mean}");
        assert!((var.sqrt() - 0.5).abs() < 0.02, "std = {}", var.sqrt());
    }

    #[test]
    fn test_zenith_latitude_range() {
        let mut rng = rng();
        for _ in 0..500 {
            let lat = gaussian_zenith_latitude(&mut rng, 1.0, 2.0);
            assert!((-PI / 2.0..=PI / 2.0).contains(&lat), "lat = {lat}");
        }
    }

    #[test]
    fn test_roll_wrapped() {
        let mut rng = rng();
        for _ in 0..500 {
            let roll = gaussian_roll(&mut rng, -10.0, 5.0);
            assert!((0.0..TAU).contains(&roll), "roll = {roll}");
        }
    }

    #[test]
    fn test_triangle_point_inside() {
        let mut rng = rng();
        let v0 = Vec3::new(0., 0., 0.);
        let v1 = Vec3::new(2., 0., 0.);
        let v2 = Vec3::new(0., 3., 0.);
        for _ in 0..200 {
            let p = uniform_triangle_point(&mut rng, v0, v1, v2);
            // Barycentric coordinates from the 2D layout
            let alpha = p.x / 2.0;
            let beta = p.y / 3.0;
            assert!(alpha >= -1e-12 && beta >= -1e-12 && alpha + beta <= 1.0 + 1e-12);
            assert!(p.z.abs() < 1e-12);
        }
    }

    #[test]
    fn test_discrete_respects_zero_weights() {
        let mut rng = rng();
        let weights = [0.0, 2.0, 0.0, 1.0];
        for _ in 0..200 {
            let idx = sample_discrete(&mut rng, &weights).unwrap();
            assert!(idx == 1 || idx == 3);
        }
        assert!(sample_discrete(&mut rng, &[0.0, 0.0]).is_none());
        assert!(sample_discrete(&mut rng, &[]).is_none());
    }

    #[test]
    fn test_discrete_frequencies() {
        let mut rng = rng();
        let weights = [1.0, 3.0];
        let mut counts = [0usize; 2];
        for _ in 0..10_000 {
            counts[sample_discrete(&mut rng, &weights).unwrap()] += 1;
        }
        let ratio = counts[1] as f64 / counts[0] as f64;
        assert!((2.5..3.5).contains(&ratio), "ratio = {ratio}");
    }

    #[test]
    fn test_stripe_rng_deterministic_and_distinct() {
        let a: Vec<f64> = {
            let mut r = stripe_rng(7, 3, 1);
            (0..8).map(|_| r.gen_range(0.0..1.0)).collect()
        };
        let b: Vec<f64> = {
            let mut r = stripe_rng(7, 3, 1);
            (0..8).map(|_| r.gen_range(0.0..1.0)).collect()
        };
        let c: Vec<f64> = {
            let mut r = stripe_rng(7, 4, 1);
            (0..8).map(|_| r.gen_range(0.0..1.0)).collect()
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
