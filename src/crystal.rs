//! Ice-crystal geometry.
//!
//! A crystal is a convex polyhedron given by vertices and triangular faces.
//! Face normals and areas are derived, never input. Coplanar triangles are
//! grouped under a canonical face number used by ray-path filters, following
//! the conventional numbering of halo literature (1/2 basal, 3-8 prism,
//! 13-18 and 23-28 pyramidal).

use crate::Vec3;
use crate::geom::EPS;
use std::f64::consts::PI;

/// Ratio between the crystallographic c and a axes of hexagonal ice.
pub const C_AXIS_RATIO: f64 = 1.629;

#[derive(Debug, Clone)]
pub struct Crystal {
    vertices: Vec<Vec3>,
    faces: Vec<[usize; 3]>,
    normals: Vec<Vec3>,
    areas: Vec<f64>,
    face_numbers: Vec<i32>,
    rotation_fold: u32,
}

impl Crystal {
    /// Builds a crystal from raw mesh data; each triangle becomes its own
    /// face number.
    pub fn from_mesh(vertices: Vec<Vec3>, faces: Vec<[usize; 3]>) -> Self {
        let face_numbers = (0..faces.len()).map(|i| i as i32).collect();
        Self::from_mesh_with_numbers(vertices, faces, face_numbers, 1)
    }

    /// Builds a crystal with an explicit face-number map and basal rotation
    /// symmetry fold (6 for hexagonal crystals).
    pub fn from_mesh_with_numbers(
        vertices: Vec<Vec3>,
        faces: Vec<[usize; 3]>,
        face_numbers: Vec<i32>,
        rotation_fold: u32,
    ) -> Self {
        assert_eq!(faces.len(), face_numbers.len());
        let mut crystal = Self {
            vertices,
            faces,
            normals: Vec::new(),
            areas: Vec::new(),
            face_numbers,
            rotation_fold: rotation_fold.max(1),
        };
        crystal.init_norms();
        crystal
    }

    /// Computes per-face outward normals and areas.
    ///
    /// Degenerate triangles get a zero normal and zero area; they never
    /// enter entry-face sampling and never win an intersection test.
    fn init_norms(&mut self) {
        let centroid = self
            .vertices
            .iter()
            .fold(Vec3::zero(), |acc, v| acc + *v)
            * (1.0 / self.vertices.len().max(1) as f64);

        self.normals = Vec::with_capacity(self.faces.len());
        self.areas = Vec::with_capacity(self.faces.len());
        for &[i0, i1, i2] in &self.faces {
            let (v0, v1, v2) = (self.vertices[i0], self.vertices[i1], self.vertices[i2]);
            let area = Vec3::triangle_area(v0, v1, v2);
            let normal = match Vec3::triangle_normal(v0, v1, v2) {
                Some(n) => {
                    let center = (v0 + v1 + v2) * (1.0 / 3.0);
                    // Convex polyhedron: flip any normal pointing at the centroid.
                    if n.dot(center - centroid) < 0.0 { -n } else { n }
                }
                None => Vec3::zero(),
            };
            self.normals.push(normal);
            self.areas.push(area);
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn total_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    pub fn normal(&self, face: usize) -> Vec3 {
        self.normals[face]
    }

    pub fn area(&self, face: usize) -> f64 {
        self.areas[face]
    }

    /// Canonical face number of triangle `face`.
    pub fn face_number(&self, face: usize) -> i32 {
        self.face_numbers[face]
    }

    /// Basal rotational symmetry fold (6 for hexagonal, 4 for cubic).
    pub fn rotation_fold(&self) -> u32 {
        self.rotation_fold
    }

    /// The three vertices of triangle `face`.
    pub fn triangle(&self, face: usize) -> (Vec3, Vec3, Vec3) {
        let [i0, i1, i2] = self.faces[face];
        (self.vertices[i0], self.vertices[i1], self.vertices[i2])
    }

    // ── Factories ───────────────────────────────────────────────────────

    /// Regular hexagonal prism with circumradius 1 and half-height `h`.
    ///
    /// 12 vertices, 20 triangles grouped into 8 face numbers
    /// (1 top basal, 2 bottom basal, 3-8 prism).
    pub fn hex_prism(h: f64) -> Self {
        let mut vertices = ring(6, 1.0, h, 0.0);
        vertices.extend(ring(6, 1.0, -h, 0.0));

        let mut faces = Vec::new();
        let mut numbers = Vec::new();
        cap_fan(0, 6, false, 1, &mut faces, &mut numbers);
        side_quads(0, 6, 6, 3, &mut faces, &mut numbers);
        cap_fan(6, 6, true, 2, &mut faces, &mut numbers);

        Self::from_mesh_with_numbers(vertices, faces, numbers, 6)
    }

    /// Hexagonal bipyramid-capped prism with unit Miller indices.
    ///
    /// `h1`/`h3` are the cap heights as fractions of the maximum pyramid
    /// height (clamped to `[0, 1]`), `h2` the prism half-height.
    pub fn hex_pyramid(h1: f64, h2: f64, h3: f64) -> Self {
        Self::hex_pyramid_miller(1, 1, 1, 1, h1, h2, h3)
    }

    /// Hexagonal pyramid with per-cap Miller indices `(a, 0, -a, b)`.
    ///
    /// The maximum cap height is `C_AXIS_RATIO * a / b`; the cap cross
    /// section shrinks linearly towards the apex.
    pub fn hex_pyramid_miller(
        upper_i1: i32,
        upper_i4: i32,
        lower_i1: i32,
        lower_i4: i32,
        h1: f64,
        h2: f64,
        h3: f64,
    ) -> Self {
        let h_upper = C_AXIS_RATIO * upper_i1.abs() as f64 / upper_i4.abs().max(1) as f64;
        let h_lower = C_AXIS_RATIO * lower_i1.abs() as f64 / lower_i4.abs().max(1) as f64;
        let h1 = h1.clamp(0.0, 1.0);
        let h3 = h3.clamp(0.0, 1.0);
        let h2 = h2.max(0.0);

        let mut vertices = ring(6, 1.0 - h1, h2 + h1 * h_upper, 0.0);
        vertices.extend(ring(6, 1.0, h2, 0.0));
        vertices.extend(ring(6, 1.0, -h2, 0.0));
        vertices.extend(ring(6, 1.0 - h3, -h2 - h3 * h_lower, 0.0));

        let mut faces = Vec::new();
        let mut numbers = Vec::new();
        cap_fan(0, 6, false, 1, &mut faces, &mut numbers);
        side_quads(0, 6, 6, 13, &mut faces, &mut numbers);
        side_quads(6, 12, 6, 3, &mut faces, &mut numbers);
        side_quads(12, 18, 6, 23, &mut faces, &mut numbers);
        cap_fan(18, 6, true, 2, &mut faces, &mut numbers);

        Self::from_mesh_with_numbers(vertices, faces, numbers, 6)
    }

    /// Cubic-ice pyramid: a square cross section with two pyramidal caps.
    ///
    /// `ratio1`/`ratio2` are the cap heights as fractions of the maximum
    /// pyramid height.
    pub fn cubic_pyramid(ratio1: f64, ratio2: f64) -> Self {
        let r1 = ratio1.clamp(0.0, 1.0);
        let r2 = ratio2.clamp(0.0, 1.0);
        let h = C_AXIS_RATIO;

        let mut vertices = ring(4, 1.0 - r1, r1 * h, PI / 4.0);
        vertices.extend(ring(4, 1.0, 0.0, PI / 4.0));
        vertices.extend(ring(4, 1.0 - r2, -r2 * h, PI / 4.0));

        let mut faces = Vec::new();
        let mut numbers = Vec::new();
        cap_fan(0, 4, false, 1, &mut faces, &mut numbers);
        side_quads(0, 4, 4, 13, &mut faces, &mut numbers);
        side_quads(4, 8, 4, 23, &mut faces, &mut numbers);
        cap_fan(8, 4, true, 2, &mut faces, &mut numbers);

        Self::from_mesh_with_numbers(vertices, faces, numbers, 4)
    }

    /// Irregular hexagonal prism.
    ///
    /// `dist` gives the distance of each prism face from the axis, where 1
    /// is the apothem of the regular hexagon with circumradius 1; `h` is the
    /// half-height. The distances must describe a convex hexagon; a face
    /// pushed past its neighbours degenerates to zero area.
    pub fn irregular_hex_prism(dist: [f64; 6], h: f64) -> Self {
        let section = irregular_section(dist);
        let mut vertices: Vec<Vec3> = section.iter().map(|p| Vec3::new(p.x, p.y, h)).collect();
        vertices.extend(section.iter().map(|p| Vec3::new(p.x, p.y, -h)));

        let mut faces = Vec::new();
        let mut numbers = Vec::new();
        cap_fan(0, 6, false, 1, &mut faces, &mut numbers);
        side_quads(0, 6, 6, 3, &mut faces, &mut numbers);
        cap_fan(6, 6, true, 2, &mut faces, &mut numbers);

        Self::from_mesh_with_numbers(vertices, faces, numbers, 6)
    }

    /// Irregular hexagonal pyramid.
    ///
    /// `dist` as in [`Crystal::irregular_hex_prism`]; `idx` holds the Miller
    /// pairs `(upper a, upper b, lower a, lower b)`; `heights` holds the
    /// upper-cap fraction, the prism half-height and the lower-cap fraction.
    /// Cap cross sections shrink linearly towards the section centroid.
    pub fn irregular_hex_pyramid(dist: [f64; 6], idx: [i32; 4], heights: [f64; 3]) -> Self {
        let h_upper = C_AXIS_RATIO * idx[0].abs() as f64 / idx[1].abs().max(1) as f64;
        let h_lower = C_AXIS_RATIO * idx[2].abs() as f64 / idx[3].abs().max(1) as f64;
        let h1 = heights[0].clamp(0.0, 1.0);
        let h2 = heights[1].max(0.0);
        let h3 = heights[2].clamp(0.0, 1.0);

        let section = irregular_section(dist);
        let centroid = section
            .iter()
            .fold(Vec3::zero(), |acc, p| acc + *p)
            * (1.0 / 6.0);
        let shrunk = |f: f64, z: f64| -> Vec<Vec3> {
            section
                .iter()
                .map(|p| {
                    let s = centroid + (*p - centroid) * (1.0 - f);
                    Vec3::new(s.x, s.y, z)
                })
                .collect()
        };

        let mut vertices = shrunk(h1, h2 + h1 * h_upper);
        vertices.extend(shrunk(0.0, h2));
        vertices.extend(shrunk(0.0, -h2));
        vertices.extend(shrunk(h3, -h2 - h3 * h_lower));

        let mut faces = Vec::new();
        let mut numbers = Vec::new();
        cap_fan(0, 6, false, 1, &mut faces, &mut numbers);
        side_quads(0, 6, 6, 13, &mut faces, &mut numbers);
        side_quads(6, 12, 6, 3, &mut faces, &mut numbers);
        side_quads(12, 18, 6, 23, &mut faces, &mut numbers);
        cap_fan(18, 6, true, 2, &mut faces, &mut numbers);

        Self::from_mesh_with_numbers(vertices, faces, numbers, 6)
    }
}

/// `n` vertices of a regular polygon with circumradius `r` at height `z`.
fn ring(n: usize, r: f64, z: f64, phase: f64) -> Vec<Vec3> {
    (0..n)
        .map(|k| {
            let angle = 2.0 * PI * k as f64 / n as f64 + phase;
            Vec3::new(r * angle.cos(), r * angle.sin(), z)
        })
        .collect()
}

/// Fan-triangulates a polygon cap starting at vertex `start`.
///
/// `flip` reverses the winding (bottom caps, viewed from below).
fn cap_fan(
    start: usize,
    n: usize,
    flip: bool,
    number: i32,
    faces: &mut Vec<[usize; 3]>,
    numbers: &mut Vec<i32>,
) {
    for k in 1..n - 1 {
        let tri = if flip {
            [start, start + k + 1, start + k]
        } else {
            [start, start + k, start + k + 1]
        };
        faces.push(tri);
        numbers.push(number);
    }
}

/// Triangulates the side quads between an upper and a lower vertex ring.
///
/// Side `k` (between vertices `k` and `k+1`) gets face number `base + k`.
fn side_quads(
    upper: usize,
    lower: usize,
    n: usize,
    base: i32,
    faces: &mut Vec<[usize; 3]>,
    numbers: &mut Vec<i32>,
) {
    for k in 0..n {
        let k1 = (k + 1) % n;
        faces.push([upper + k, lower + k, lower + k1]);
        numbers.push(base + k as i32);
        faces.push([upper + k, lower + k1, upper + k1]);
        numbers.push(base + k as i32);
    }
}

/// The six corner points of an irregular hexagonal cross section.
///
/// Face `k` lies on the line with outward normal at angle `pi/3*k + pi/6`
/// and distance `dist[k] * sqrt(3)/2` from the axis; corner `k` is the
/// intersection of the lines of faces `k-1` and `k`.
fn irregular_section(dist: [f64; 6]) -> Vec<Vec3> {
    let apothem = 3.0_f64.sqrt() / 2.0;
    let angle = |k: usize| PI / 3.0 * k as f64 + PI / 6.0;
    (0..6)
        .map(|k| {
            let prev = (k + 5) % 6;
            let (s1, c1) = angle(prev).sin_cos();
            let (s2, c2) = angle(k).sin_cos();
            let (d1, d2) = (dist[prev] * apothem, dist[k] * apothem);
            let det = c1 * s2 - s1 * c2;
            debug_assert!(det.abs() > EPS);
            Vec3::new((d1 * s2 - d2 * s1) / det, (c1 * d2 - c2 * d1) / det, 0.0)
        })
        .collect()
}
