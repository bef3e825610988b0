//! Surface-interaction kernels of the Monte-Carlo tracer.
//!
//! Both kernels operate on structure-of-arrays slices so the hot loops stay
//! flat: [`hit_surface`] splits every incident ray into a reflected and a
//! refracted child (Fresnel, unpolarized), [`propagate`] intersects every
//! child with the crystal faces and finds the next surface event.

use crate::Crystal;
use crate::Vec3;

/// Acceptance tolerance for the ray-triangle intersection test.
pub const INTERSECT_EPS: f64 = 1e-6;

/// Refractive index table for ice, 350-900 nm.
///
/// Data from https://refractiveindex.info/?shelf=3d&book=crystals&page=ice
const ICE_WAVELENGTHS: [f64; 52] = [
    350.0, 400.0, 410.0, 420.0, 430.0, 440.0, 450.0, 460.0, 470.0, 480.0, 490.0, 500.0, 510.0,
    520.0, 530.0, 540.0, 550.0, 560.0, 570.0, 580.0, 590.0, 600.0, 610.0, 620.0, 630.0, 640.0,
    650.0, 660.0, 670.0, 680.0, 690.0, 700.0, 710.0, 720.0, 730.0, 740.0, 750.0, 760.0, 770.0,
    780.0, 790.0, 800.0, 810.0, 820.0, 830.0, 840.0, 850.0, 860.0, 870.0, 880.0, 890.0, 900.0,
];
const ICE_INDEX: [f64; 52] = [
    1.3249, 1.3194, 1.3185, 1.3177, 1.3170, 1.3163, 1.3157, 1.3151, 1.3145, 1.3140, 1.3135,
    1.3130, 1.3126, 1.3122, 1.3118, 1.3114, 1.3110, 1.3106, 1.3103, 1.3100, 1.3097, 1.3094,
    1.3091, 1.3088, 1.3085, 1.3083, 1.3080, 1.3078, 1.3076, 1.3073, 1.3071, 1.3069, 1.3067,
    1.3065, 1.3062, 1.3060, 1.3058, 1.3057, 1.3055, 1.3053, 1.3051, 1.3049, 1.3047, 1.3045,
    1.3044, 1.3042, 1.3040, 1.3038, 1.3037, 1.3035, 1.3033, 1.3032,
];

/// Refractive index of ice at `wavelength` nm.
///
/// Linear interpolation over the table; clamps to the endpoints outside
/// 350-900 nm.
pub fn refractive_index(wavelength: f64) -> f64 {
    if wavelength <= ICE_WAVELENGTHS[0] {
        return ICE_INDEX[0];
    }
    if wavelength >= ICE_WAVELENGTHS[ICE_WAVELENGTHS.len() - 1] {
        return ICE_INDEX[ICE_INDEX.len() - 1];
    }
    let i = ICE_WAVELENGTHS.partition_point(|&wl| wl < wavelength);
    let (wl0, wl1) = (ICE_WAVELENGTHS[i - 1], ICE_WAVELENGTHS[i]);
    let (n0, n1) = (ICE_INDEX[i - 1], ICE_INDEX[i]);
    n0 + (n1 - n0) * (wavelength - wl0) / (wl1 - wl0)
}

/// Reflectance of an unpolarized ray: mean of the s and p Fresnel
/// coefficients.
///
/// `cos_i`/`cos_t` are the cosines of the incidence and transmission angles,
/// `n1`/`n2` the refractive indices on the incident and transmitted sides.
pub fn fresnel_reflectance(cos_i: f64, cos_t: f64, n1: f64, n2: f64) -> f64 {
    let rs = ((n1 * cos_i - n2 * cos_t) / (n1 * cos_i + n2 * cos_t)).powi(2);
    let rp = ((n1 * cos_t - n2 * cos_i) / (n1 * cos_t + n2 * cos_i)).powi(2);
    ((rs + rp) / 2.0).clamp(0.0, 1.0)
}

/// Splits `num` incident rays at their current face into reflected and
/// refracted children.
///
/// Inputs are `dir_in` (3 floats per ray), `face_id_in` and `w_in` (1 per
/// ray). Outputs are `dir_out` (6 floats per ray: reflect then refract) and
/// `w_out` (2 per ray). On total internal reflection the refracted child
/// gets weight 0 and is dropped by the later store/squeeze steps.
pub fn hit_surface(
    crystal: &Crystal,
    n_ice: f64,
    num: usize,
    dir_in: &[f64],
    face_id_in: &[i32],
    w_in: &[f64],
    dir_out: &mut [f64],
    w_out: &mut [f64],
) {
    for i in 0..num {
        let d = Vec3::new(dir_in[i * 3], dir_in[i * 3 + 1], dir_in[i * 3 + 2]);
        let face = face_id_in[i] as usize;
        let normal = crystal.normal(face);
        let w = w_in[i];

        if normal.length() < 0.5 {
            // Degenerate face: no physical surface to interact with.
            w_out[i * 2] = 0.0;
            w_out[i * 2 + 1] = 0.0;
            write_dir(dir_out, i * 2, d);
            write_dir(dir_out, i * 2 + 1, d);
            continue;
        }

        let cos = d.dot(normal);
        let inside = cos > 0.0;
        let (n1, n2) = if inside { (n_ice, 1.0) } else { (1.0, n_ice) };
        // Normal oriented against the incident direction.
        let n_eff = if inside { -normal } else { normal };
        let cos_i = (-d.dot(n_eff)).clamp(0.0, 1.0);

        let reflect = (d - normal * (2.0 * cos)).normalize().unwrap_or(d);

        let ratio = n1 / n2;
        let sin2_t = ratio * ratio * (1.0 - cos_i * cos_i);
        if sin2_t >= 1.0 {
            // Total internal reflection: all energy goes to the reflected child.
            w_out[i * 2] = w;
            w_out[i * 2 + 1] = 0.0;
            write_dir(dir_out, i * 2, reflect);
            write_dir(dir_out, i * 2 + 1, reflect);
        } else {
            let cos_t = (1.0 - sin2_t).sqrt();
            let r = fresnel_reflectance(cos_i, cos_t, n1, n2);
            let refract = (d * ratio + n_eff * (ratio * cos_i - cos_t))
                .normalize()
                .unwrap_or(d);
            w_out[i * 2] = w * r;
            w_out[i * 2 + 1] = w * (1.0 - r);
            write_dir(dir_out, i * 2, reflect);
            write_dir(dir_out, i * 2 + 1, refract);
        }
    }
}

fn write_dir(buf: &mut [f64], slot: usize, d: Vec3) {
    buf[slot * 3] = d.x;
    buf[slot * 3 + 1] = d.y;
    buf[slot * 3 + 2] = d.z;
}

/// Finds the next surface event for `num` child rays.
///
/// Child `i` starts at its parent's event point `pt_in[i/2]`, flies along
/// `dir_in[i]` and must not re-hit its starting triangle `face_id_in[i/2]`.
/// Writes the hit point into `pt_out[i]` and the hit triangle into
/// `face_id_out[i]`; a ray that escapes the crystal gets face id -1.
/// Children with non-positive weight are skipped.
pub fn propagate(
    crystal: &Crystal,
    num: usize,
    pt_in: &[f64],
    dir_in: &[f64],
    w_in: &[f64],
    face_id_in: &[i32],
    pt_out: &mut [f64],
    face_id_out: &mut [i32],
) {
    for i in 0..num {
        face_id_out[i] = -1;
        if w_in[i] <= 0.0 {
            continue;
        }
        let parent = i / 2;
        let origin = Vec3::new(
            pt_in[parent * 3],
            pt_in[parent * 3 + 1],
            pt_in[parent * 3 + 2],
        );
        let dir = Vec3::new(dir_in[i * 3], dir_in[i * 3 + 1], dir_in[i * 3 + 2]);
        let start_face = face_id_in[parent];

        if let Some((face, point)) = closest_hit(crystal, origin, dir, start_face) {
            face_id_out[i] = face as i32;
            pt_out[i * 3] = point.x;
            pt_out[i * 3 + 1] = point.y;
            pt_out[i * 3 + 2] = point.z;
        }
    }
}

/// The closest forward-hit face, excluding the starting triangle.
///
/// Ties within [`INTERSECT_EPS`] go to the smaller face index.
fn closest_hit(
    crystal: &Crystal,
    origin: Vec3,
    dir: Vec3,
    start_face: i32,
) -> Option<(usize, Vec3)> {
    let mut best: Option<(usize, f64, Vec3)> = None;
    for face in 0..crystal.total_faces() {
        if face as i32 == start_face {
            continue;
        }
        let (v0, v1, v2) = crystal.triangle(face);
        if let Some((t, point)) = intersect_line_triangle(origin, dir, v0, v1, v2) {
            let better = match best {
                None => true,
                // Faces are visited in index order, so on a near-tie the
                // earlier (smaller) index stays.
                Some((_, best_t, _)) => t < best_t - INTERSECT_EPS,
            };
            if better {
                best = Some((face, t, point));
            }
        }
    }
    best.map(|(face, _, point)| (face, point))
}

/// Solves `origin + t*dir = v0 + alpha*(v1-v0) + beta*(v2-v0)` by Cramer's
/// rule.
///
/// Accepts forward hits (`t > eps`) inside the triangle, with a small
/// barycentric tolerance absorbing floating-point noise at the edges.
pub fn intersect_line_triangle(
    origin: Vec3,
    dir: Vec3,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
) -> Option<(f64, Vec3)> {
    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let b = origin - v0;

    // Columns of the system matrix: [-dir, e1, e2] * (t, alpha, beta) = b
    let det = -dir.dot(e1.cross(e2));
    if det.abs() < 1e-12 {
        return None;
    }
    let t = b.dot(e1.cross(e2)) / det;
    let alpha = -dir.dot(b.cross(e2)) / det;
    let beta = -dir.dot(e1.cross(b)) / det;

    if t > INTERSECT_EPS
        && alpha >= -INTERSECT_EPS
        && beta >= -INTERSECT_EPS
        && alpha + beta <= 1.0 + INTERSECT_EPS
    {
        Some((t, origin + dir * t))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refractive_index_table_points() {
        assert!((refractive_index(550.0) - 1.3110).abs() < 1e-9);
        assert!((refractive_index(400.0) - 1.3194).abs() < 1e-9);
        assert!((refractive_index(900.0) - 1.3032).abs() < 1e-9);
    }

    #[test]
    fn test_refractive_index_interpolation_and_clamp() {
        let mid = refractive_index(555.0);
        assert!((mid - (1.3110 + 1.3106) / 2.0).abs() < 1e-9);
        assert!((refractive_index(100.0) - 1.3249).abs() < 1e-9);
        assert!((refractive_index(2000.0) - 1.3032).abs() < 1e-9);
    }

    #[test]
    fn test_intersect_simple_triangle() {
        let v0 = Vec3::new(0., 0., 1.);
        let v1 = Vec3::new(2., 0., 1.);
        let v2 = Vec3::new(0., 2., 1.);
        let hit = intersect_line_triangle(
            Vec3::new(0.4, 0.4, 0.),
            Vec3::new(0., 0., 1.),
            v0,
            v1,
            v2,
        );
        let (t, p) = hit.expect("Ray should hit the triangle");
        assert!((t - 1.0).abs() < 1e-9);
        assert!(p.is_close(&Vec3::new(0.4, 0.4, 1.)));
    }

    #[test]
    fn test_intersect_misses_behind_and_outside() {
        let v0 = Vec3::new(0., 0., 1.);
        let v1 = Vec3::new(2., 0., 1.);
        let v2 = Vec3::new(0., 2., 1.);
        // Behind the origin
        assert!(
            intersect_line_triangle(
                Vec3::new(0.4, 0.4, 2.),
                Vec3::new(0., 0., 1.),
                v0,
                v1,
                v2
            )
            .is_none()
        );
        // Outside the triangle
        assert!(
            intersect_line_triangle(
                Vec3::new(1.9, 1.9, 0.),
                Vec3::new(0., 0., 1.),
                v0,
                v1,
                v2
            )
            .is_none()
        );
        // Parallel to the plane
        assert!(
            intersect_line_triangle(
                Vec3::new(0.4, 0.4, 0.),
                Vec3::new(1., 0., 0.),
                v0,
                v1,
                v2
            )
            .is_none()
        );
    }

    #[test]
    fn test_fresnel_normal_incidence() {
        // R = ((n1-n2)/(n1+n2))^2 at normal incidence.
        let n = 1.311;
        let r = fresnel_reflectance(1.0, 1.0, 1.0, n);
        let expected = ((1.0 - n) / (1.0 + n)).powi(2);
        assert!((r - expected).abs() < 1e-12);
    }

    #[test]
    fn test_hit_surface_energy_split() {
        let crystal = Crystal::hex_prism(0.4);
        // Ray falling onto the top basal face from outside, 45 deg.
        let d = Vec3::new(1.0, 0.0, -1.0).normalize().unwrap();
        let top = (0..crystal.total_faces())
            .find(|&f| crystal.face_number(f) == 1)
            .unwrap();

        let dir_in = [d.x, d.y, d.z];
        let face_in = [top as i32];
        let w_in = [1.0];
        let mut dir_out = [0.0; 6];
        let mut w_out = [0.0; 2];
        hit_surface(&crystal, 1.311, 1, &dir_in, &face_in, &w_in, &mut dir_out, &mut w_out);

        // Energy bound: both children positive and summing to the parent.
        assert!(w_out[0] > 0.0 && w_out[1] > 0.0);
        assert!((w_out[0] + w_out[1] - 1.0).abs() < 1e-6);

        // Reflected ray mirrors the z component.
        let reflect = Vec3::new(dir_out[0], dir_out[1], dir_out[2]);
        assert!(reflect.is_close(&Vec3::new(d.x, d.y, -d.z)));

        // Refracted ray obeys Snell's law.
        let refract = Vec3::new(dir_out[3], dir_out[4], dir_out[5]);
        assert!((refract.length() - 1.0).abs() < 1e-9);
        let sin_i = (1.0 - d.z * d.z).sqrt();
        let sin_t = (1.0 - refract.z * refract.z).sqrt();
        assert!((sin_i - 1.311 * sin_t).abs() < 1e-9);
    }

    #[test]
    fn test_hit_surface_total_internal_reflection() {
        let crystal = Crystal::hex_prism(0.4);
        let top = (0..crystal.total_faces())
            .find(|&f| crystal.face_number(f) == 1)
            .unwrap();

        // 60 deg incidence from inside the ice: sin(60) * 1.311 > 1.
        let d = Vec3::new(60_f64.to_radians().sin(), 0.0, 60_f64.to_radians().cos());
        let dir_in = [d.x, d.y, d.z];
        let face_in = [top as i32];
        let w_in = [0.7];
        let mut dir_out = [0.0; 6];
        let mut w_out = [0.0; 2];
        hit_surface(&crystal, 1.311, 1, &dir_in, &face_in, &w_in, &mut dir_out, &mut w_out);

        assert_eq!(w_out[1], 0.0, "Refracted weight must vanish under TIR");
        assert!((w_out[0] - 0.7).abs() < 1e-12, "Reflection keeps all weight");
    }

    #[test]
    fn test_propagate_inside_prism() {
        let crystal = Crystal::hex_prism(0.5);
        let bottom = (0..crystal.total_faces())
            .find(|&f| crystal.face_number(f) == 2)
            .unwrap();

        // One child flying straight up from the bottom face centre.
        let pt_in = [0.1, 0.1, -0.5];
        let dir_in = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let w_in = [1.0, 0.0];
        let face_in = [bottom as i32];
        let mut pt_out = [0.0; 6];
        let mut face_out = [0i32; 2];
        propagate(&crystal, 2, &pt_in, &dir_in, &w_in, &face_in, &mut pt_out, &mut face_out);

        let hit_face = face_out[0];
        assert!(hit_face >= 0);
        assert_eq!(crystal.face_number(hit_face as usize), 1, "Should reach the top basal face");
        assert!((pt_out[2] - 0.5).abs() < 1e-9);

        // Zero-weight child is skipped.
        assert_eq!(face_out[1], -1);
    }

    #[test]
    fn test_propagate_escaping_ray() {
        let crystal = Crystal::hex_prism(0.5);
        let top = (0..crystal.total_faces())
            .find(|&f| crystal.face_number(f) == 1)
            .unwrap();

        // Flying up from the top face: nothing left to hit.
        let pt_in = [0.0, 0.0, 0.5];
        let dir_in = [0.0, 0.0, 1.0];
        let w_in = [1.0];
        let face_in = [top as i32];
        let mut pt_out = [0.0; 3];
        let mut face_out = [0i32];
        propagate(&crystal, 1, &pt_in, &dir_in, &w_in, &face_in, &mut pt_out, &mut face_out);
        assert_eq!(face_out[0], -1);
    }

    #[test]
    fn test_propagate_excludes_start_face() {
        let crystal = Crystal::hex_prism(0.5);
        // Entry on the top basal face, glancing steeply sideways: without
        // the exclusion the ray would immediately re-hit its own triangle.
        let top = (0..crystal.total_faces())
            .find(|&f| crystal.face_number(f) == 1)
            .unwrap();
        let pt_in = [0.2, 0.1, 0.5];
        let dir_in = [0.9, 0.1, -0.05];
        let w_in = [1.0];
        let face_in = [top as i32];
        let mut pt_out = [0.0; 3];
        let mut face_out = [0i32];
        propagate(&crystal, 1, &pt_in, &dir_in, &w_in, &face_in, &mut pt_out, &mut face_out);
        assert!(face_out[0] >= 0);
        assert_ne!(face_out[0], top as i32);
    }
}
