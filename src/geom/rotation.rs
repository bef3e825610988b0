use crate::Vec3;
use ndarray as nd;
use std::f64::consts::FRAC_PI_2;

/// Orientation of a crystal's main axis plus the roll around it.
///
/// All angles are in radians. `lon`/`lat` locate the main axis on the unit
/// sphere, `roll` is the rotation of the crystal around that axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRotation {
    pub lon: f64,
    pub lat: f64,
    pub roll: f64,
}

impl AxisRotation {
    pub fn new(lon: f64, lat: f64, roll: f64) -> Self {
        Self { lon, lat, roll }
    }

    /// The main-axis direction in the world frame.
    pub fn axis(&self) -> Vec3 {
        Vec3::new(
            self.lat.cos() * self.lon.cos(),
            self.lat.cos() * self.lon.sin(),
            self.lat.sin(),
        )
    }

    /// World-to-crystal rotation matrix.
    ///
    /// Composite of three basic rotations: `Rz(roll) . Ry(lat - pi/2) . Rz(-lon)`.
    /// Maps the main-axis direction onto `+z`.
    pub fn to_matrix(&self) -> nd::Array2<f64> {
        rot_z(self.roll)
            .dot(&rot_y(self.lat - FRAC_PI_2))
            .dot(&rot_z(-self.lon))
    }
}

/// Rotation matrix around the z axis by `phi` radians.
///
/// Reference: https://en.wikipedia.org/wiki/Rotation_matrix#Basic_3D_rotations
fn rot_z(phi: f64) -> nd::Array2<f64> {
    let (s, c) = phi.sin_cos();
    nd::arr2(&[[c, -s, 0.], [s, c, 0.], [0., 0., 1.]])
}

/// Rotation matrix around the y axis by `phi` radians.
fn rot_y(phi: f64) -> nd::Array2<f64> {
    let (s, c) = phi.sin_cos();
    nd::arr2(&[[c, 0., s], [0., 1., 0.], [-s, 0., c]])
}

fn apply(m: &nd::ArrayView2<f64>, v: Vec3) -> Vec3 {
    let out = m.dot(&nd::arr1(&[v.x, v.y, v.z]));
    Vec3::new(out[0], out[1], out[2])
}

/// Rotates a world-frame vector into the crystal frame of `axis`.
pub fn rotate_z(axis: &AxisRotation, v: Vec3) -> Vec3 {
    let m = axis.to_matrix();
    apply(&m.view(), v)
}

/// Rotates a crystal-frame vector back into the world frame.
///
/// Inverse of [`rotate_z`]; the matrix is orthonormal so its transpose is used.
pub fn rotate_z_back(axis: &AxisRotation, v: Vec3) -> Vec3 {
    let m = axis.to_matrix();
    apply(&m.t(), v)
}
