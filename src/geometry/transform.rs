//! SE(3) transform with minimal 6-scalar storage.

use std::fmt;

use nalgebra::{Matrix3, Vector3};

use super::so3;

/// A rigid transformation stored as `(tx, ty, tz, rx, ry, rz)`.
///
/// The rotation block is an axis-angle vector. A `Transform` maps points from
/// its "source" frame into its "destination" frame via `X' = R·X + t`; the
/// inverse direction is `Rᵀ(X − t)`. Composition works on rotation matrices
/// internally and normalizes back to axis-angle storage, keeping the rotation
/// magnitude in `[0, π]`.
///
/// Translation and rotation are deliberately exposed as two independent
/// 3-scalar blocks so the optimizer can bind them separately.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    params: [f64; 6],
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    /// The identity transformation.
    pub fn identity() -> Self {
        Transform { params: [0.0; 6] }
    }

    /// Construct from the six parameters `(tx, ty, tz, rx, ry, rz)`.
    pub fn new(tx: f64, ty: f64, tz: f64, rx: f64, ry: f64, rz: f64) -> Self {
        Transform {
            params: [tx, ty, tz, rx, ry, rz],
        }
    }

    /// Construct from a 6-scalar buffer laid out as `[t, ω]`.
    pub fn from_params(params: &[f64]) -> Self {
        assert_eq!(params.len(), 6, "Transform requires 6 parameters");
        let mut p = [0.0; 6];
        p.copy_from_slice(params);
        Transform { params: p }
    }

    /// Construct from translation and axis-angle vectors.
    pub fn from_parts(trans: Vector3<f64>, rot: Vector3<f64>) -> Self {
        Transform {
            params: [trans.x, trans.y, trans.z, rot.x, rot.y, rot.z],
        }
    }

    /// Translation block.
    pub fn trans(&self) -> Vector3<f64> {
        Vector3::new(self.params[0], self.params[1], self.params[2])
    }

    /// Rotation block (axis-angle).
    pub fn rot(&self) -> Vector3<f64> {
        Vector3::new(self.params[3], self.params[4], self.params[5])
    }

    /// The raw 6-scalar storage.
    pub fn params(&self) -> &[f64; 6] {
        &self.params
    }

    /// Overwrite the translation block (solver write-back).
    pub fn set_trans(&mut self, t: &Vector3<f64>) {
        self.params[0] = t.x;
        self.params[1] = t.y;
        self.params[2] = t.z;
    }

    /// Overwrite the rotation block (solver write-back).
    pub fn set_rot(&mut self, r: &Vector3<f64>) {
        self.params[3] = r.x;
        self.params[4] = r.y;
        self.params[5] = r.z;
    }

    /// Rotation matrix `R` of this transform.
    pub fn rot_matrix(&self) -> Matrix3<f64> {
        so3::rodrigues(&self.rot())
    }

    /// `(Rᵀ, −Rᵀt)` — the pair used by the residual inner loops, which map a
    /// destination-frame point back to the source frame as `Rᵀ·X + (−Rᵀt)`.
    pub fn to_rot_trans_inv(&self) -> (Matrix3<f64>, Vector3<f64>) {
        let rt = self.rot_matrix().transpose();
        let t_inv = -(rt * self.trans());
        (rt, t_inv)
    }

    /// Composite `self ∘ other`.
    pub fn compose(&self, other: &Transform) -> Transform {
        let r1 = self.rot_matrix();
        let r2 = other.rot_matrix();
        let rot = so3::log_rotation(&(r1 * r2));
        let trans = r1 * other.trans() + self.trans();
        Transform::from_parts(trans, rot)
    }

    /// Composite `self⁻¹ ∘ other`.
    pub fn inverse_compose(&self, other: &Transform) -> Transform {
        let r1t = self.rot_matrix().transpose();
        let r2 = other.rot_matrix();
        let rot = so3::log_rotation(&(r1t * r2));
        let trans = r1t * (other.trans() - self.trans());
        Transform::from_parts(trans, rot)
    }

    /// Inverse transformation.
    pub fn inverse(&self) -> Transform {
        let (rt, t_inv) = self.to_rot_trans_inv();
        Transform::from_parts(t_inv, so3::log_rotation(&rt))
    }

    /// Apply `X' = R·X + t` to a single point.
    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rot_matrix() * point + self.trans()
    }

    /// Apply `X' = Rᵀ(X − t)` to a single point.
    pub fn inverse_transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rot_matrix().transpose() * (point - self.trans())
    }

    /// Apply the forward transform to an ordered sequence of points.
    ///
    /// `dst` is cleared and resized to `|src|`.
    pub fn transform_points(&self, src: &[Vector3<f64>], dst: &mut Vec<Vector3<f64>>) {
        let r = self.rot_matrix();
        let t = self.trans();
        dst.clear();
        dst.extend(src.iter().map(|p| r * p + t));
    }

    /// Apply the inverse transform to an ordered sequence of points.
    ///
    /// `dst` is cleared and resized to `|src|`.
    pub fn inverse_transform_points(&self, src: &[Vector3<f64>], dst: &mut Vec<Vector3<f64>>) {
        let rt = self.rot_matrix().transpose();
        let t = self.trans();
        dst.clear();
        dst.extend(src.iter().map(|p| rt * (p - t)));
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[t: ({:.6}, {:.6}, {:.6}), r: ({:.6}, {:.6}, {:.6})]",
            self.params[0],
            self.params[1],
            self.params[2],
            self.params[3],
            self.params[4],
            self.params[5]
        )
    }
}
