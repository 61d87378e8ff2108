//! Similarity transforms (`Sim3`).
//!
//! Monocular tracking recovers motion only up to scale, so every camera pose
//! is a 7-DoF similarity: a unit-quaternion rotation, a translation and a
//! positive scale factor.  A point `p` is mapped to `s·R·p + t`.
//!
//! # Example
//!
//! ```rust
//! use posetree_geometry::sim3::{Quaternion, Sim3, Vec3};
//!
//! // camera 1 m forward of the world origin, same orientation.
//! let world_from_a = Sim3::from_translation(Vec3::new(1.0, 0.0, 0.0));
//! // a second camera 0.5 m forward of the first.
//! let a_from_b = Sim3::from_translation(Vec3::new(0.5, 0.0, 0.0));
//!
//! let world_from_b = world_from_a.compose(a_from_b);
//! assert!((world_from_b.translation.x - 1.5).abs() < 1e-12);
//! ```

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn norm(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1); use [`Quaternion::normalized`] otherwise.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `angle_rad` around `axis`.  A zero axis yields identity.
    pub fn from_axis_angle(axis: Vec3, angle_rad: f64) -> Self {
        let n = axis.norm();
        if n == 0.0 {
            return Self::identity();
        }
        let half = 0.5 * angle_rad;
        let s = half.sin() / n;
        Self::new(half.cos(), axis.x * s, axis.y * s, axis.z * s)
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rescale to unit length.  Long composition chains drift off the unit
    /// sphere, so poses renormalise after every product.
    pub fn normalized(self) -> Self {
        let n = (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if n == 0.0 {
            return Self::identity();
        }
        Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Angle of the rotation in `[0, π]`.
    pub fn angle(self) -> f64 {
        2.0 * self.w.abs().min(1.0).acos()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sim3
// ────────────────────────────────────────────────────────────────────────────

/// A similarity transform: `p ↦ scale · rotation(p) + translation`.
///
/// A camera's absolute pose is the `Sim3` mapping points from its own frame
/// into the world frame; a relative pose maps them into the tracking
/// parent's frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sim3 {
    pub rotation: Quaternion,
    pub translation: Vec3,
    pub scale: f64,
}

impl Default for Sim3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Sim3 {
    pub fn new(rotation: Quaternion, translation: Vec3, scale: f64) -> Self {
        Self {
            rotation,
            translation,
            scale,
        }
    }

    /// The identity transform; the world origin.
    pub fn identity() -> Self {
        Self::new(Quaternion::identity(), Vec3::zero(), 1.0)
    }

    /// Pure translation, unit scale.
    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(Quaternion::identity(), translation, 1.0)
    }

    /// Rigid transform (unit scale).
    pub fn from_rotation_translation(rotation: Quaternion, translation: Vec3) -> Self {
        Self::new(rotation, translation, 1.0)
    }

    /// Compose two transforms: `self ∘ other`.
    ///
    /// `other` is applied to a point first, then `self`.  If `self` maps
    /// frame B into A and `other` maps C into B, the result maps C into A.
    pub fn compose(self, other: Self) -> Self {
        let translation = self
            .rotation
            .rotate(other.translation)
            .scale(self.scale)
            .add(self.translation);
        Self::new(
            self.rotation.mul(other.rotation).normalized(),
            translation,
            self.scale * other.scale,
        )
    }

    /// The inverse transform, so that `t.compose(t.inverse())` is identity.
    pub fn inverse(self) -> Self {
        let rotation = self.rotation.conjugate();
        let scale = 1.0 / self.scale;
        let translation = rotation.rotate(self.translation).scale(-scale);
        Self::new(rotation, translation, scale)
    }

    /// Map a point through this transform.
    pub fn transform_point(self, p: Vec3) -> Vec3 {
        self.rotation.rotate(p).scale(self.scale).add(self.translation)
    }

    /// Component-wise comparison within `tol`.
    ///
    /// `q` and `-q` encode the same rotation, so both signs are accepted.
    pub fn approx_eq(&self, other: &Self, tol: f64) -> bool {
        let q = self.rotation;
        let r = other.rotation;
        let same = (q.w - r.w).abs() <= tol
            && (q.x - r.x).abs() <= tol
            && (q.y - r.y).abs() <= tol
            && (q.z - r.z).abs() <= tol;
        let flipped = (q.w + r.w).abs() <= tol
            && (q.x + r.x).abs() <= tol
            && (q.y + r.y).abs() <= tol
            && (q.z + r.z).abs() <= tol;
        (same || flipped)
            && (self.translation.x - other.translation.x).abs() <= tol
            && (self.translation.y - other.translation.y).abs() <= tol
            && (self.translation.z - other.translation.z).abs() <= tol
            && (self.scale - other.scale).abs() <= tol
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
