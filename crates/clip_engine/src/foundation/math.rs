//! Math utilities and types
//!
//! Provides fundamental math types for 3D collision queries: vector and
//! matrix aliases over nalgebra, axis-aligned bounds with the swept-volume
//! constructions the broad phase needs, and a rotation-about-a-point
//! description for rotational sweeps.

pub use nalgebra::{Matrix3, Quaternion, Unit, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// Quaternion type for orientations
pub type Quat = nalgebra::UnitQuaternion<f32>;

/// Check whether an orientation is effectively the identity rotation
pub fn is_identity(axis: &Quat) -> bool {
    axis.angle() < 1e-6
}

/// Order-insensitive hash of the raw float bits of a vector
///
/// Used to key structurally equal shapes; exact equality is always verified
/// separately, so collisions only cost a comparison.
pub fn float_hash(v: &Vec3) -> u32 {
    v.x.to_bits()
        .wrapping_add(v.y.to_bits())
        .wrapping_add(v.z.to_bits())
}

/// Axis-Aligned Bounding Box
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bounds {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl Bounds {
    /// Create new bounds from min and max points
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Zero-sized bounds at the origin
    pub fn zero() -> Self {
        Self {
            min: Vec3::zeros(),
            max: Vec3::zeros(),
        }
    }

    /// Inside-out bounds that no point is contained in
    pub fn cleared() -> Self {
        Self {
            min: Vec3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Vec3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    /// Bounds containing a single point
    pub fn from_point(point: Vec3) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    /// True if the bounds are inside out (nothing was ever added)
    pub fn is_cleared(&self) -> bool {
        self.min.x > self.max.x
    }

    /// True if any axis is inverted; such bounds must not enter the tree
    pub fn is_backwards(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Get the center of the bounds
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the full size of the bounds
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Get the extents (half-size) of the bounds
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Radius of the sphere centered at the local origin covering the bounds
    pub fn radius(&self) -> f32 {
        let mut total = 0.0f32;
        for i in 0..3 {
            let b = self.min[i].abs().max(self.max[i].abs());
            total += b * b;
        }
        total.sqrt()
    }

    /// Bounds grown by `amount` on every axis, both sides
    pub fn expand(&self, amount: f32) -> Self {
        let pad = Vec3::new(amount, amount, amount);
        Self {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    /// Union of two bounds
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// Grow the bounds to include a point
    pub fn add_point(&mut self, point: Vec3) {
        self.min = self.min.inf(&point);
        self.max = self.max.sup(&point);
    }

    /// Check if the bounds contain a point
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// Check if these bounds intersect other bounds (inclusive)
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// World-space bounds of local bounds placed at `origin` with orientation
    /// `axis`, expanded to cover the rotation
    pub fn from_transformed_bounds(bounds: &Self, origin: Vec3, axis: &Quat) -> Self {
        let center = bounds.center();
        let extents = bounds.extents();
        let rot = axis.to_rotation_matrix().into_inner();

        // extents of the rotated box follow from the absolute rotation matrix
        let mut rotated = Vec3::zeros();
        for i in 0..3 {
            rotated[i] = rot[(i, 0)].abs() * extents.x
                + rot[(i, 1)].abs() * extents.y
                + rot[(i, 2)].abs() * extents.z;
        }
        let world_center = origin + rot * center;
        Self {
            min: world_center - rotated,
            max: world_center + rotated,
        }
    }

    /// Bounds covering `bounds` (already oriented, relative to the start
    /// point) placed at `origin` and swept by `translation`
    pub fn from_bounds_translation(bounds: &Self, origin: Vec3, translation: Vec3) -> Self {
        let start = Self {
            min: bounds.min + origin,
            max: bounds.max + origin,
        };
        let end = Self {
            min: start.min + translation,
            max: start.max + translation,
        };
        start.union(&end)
    }

    /// Conservative bounds covering local `bounds` at `origin`/`axis` swept by
    /// `rotation`
    ///
    /// Each corner is covered by the full circle it describes around the
    /// rotation axis, independent of the rotation angle. Strictly larger than
    /// the tight angle-aware volume, never smaller.
    pub fn from_bounds_rotation(
        bounds: &Self,
        origin: Vec3,
        axis: &Quat,
        rotation: &Rotation,
    ) -> Self {
        let mut result = Self::cleared();
        for corner in 0..8 {
            let local = Vec3::new(
                if corner & 1 != 0 { bounds.max.x } else { bounds.min.x },
                if corner & 2 != 0 { bounds.max.y } else { bounds.min.y },
                if corner & 4 != 0 { bounds.max.z } else { bounds.min.z },
            );
            let point = origin + axis * local;
            result = result.union(&Self::from_point_rotation(point, rotation));
        }
        result
    }

    /// Conservative bounds covering a single point swept by `rotation`
    pub fn from_point_rotation(point: Vec3, rotation: &Rotation) -> Self {
        let axis = rotation.axis().into_inner();
        let rel = point - rotation.origin();
        let height = rel.dot(&axis);
        let on_axis = rotation.origin() + axis * height;
        let radial = (point - on_axis).norm();

        // AABB of the circle of radius `radial` in the plane normal to `axis`
        let mut half = Vec3::zeros();
        for i in 0..3 {
            half[i] = radial * (1.0 - axis[i] * axis[i]).max(0.0).sqrt();
        }
        Self {
            min: on_axis - half,
            max: on_axis + half,
        }
    }

    /// Check whether the line segment from `start` to `end` passes through
    /// the bounds
    pub fn line_intersection(&self, start: Vec3, end: Vec3) -> bool {
        let mut range = [0.0f32, 1.0f32];
        moving_bounds_intersect_bounds(
            start,
            inverse_direction(end - start),
            Vec3::zeros(),
            self,
            &mut range,
        )
    }
}

/// Per-axis reciprocal of a movement vector, infinite on stationary axes
pub fn inverse_direction(dir: Vec3) -> Vec3 {
    Vec3::new(
        if dir.x != 0.0 { 1.0 / dir.x } else { f32::INFINITY },
        if dir.y != 0.0 { 1.0 / dir.y } else { f32::INFINITY },
        if dir.z != 0.0 { 1.0 / dir.z } else { f32::INFINITY },
    )
}

/// Slab test of a moving box against static bounds
///
/// The moving box is described by the line segment its center travels
/// (`start` plus the direction whose reciprocal is `inv_dir`) thickened by
/// `extent`. `range` holds the valid parametric interval and is narrowed in
/// place; on a hit `range[0]` is a lower bound on the time of first overlap.
pub fn moving_bounds_intersect_bounds(
    start: Vec3,
    inv_dir: Vec3,
    extent: Vec3,
    bounds: &Bounds,
    range: &mut [f32; 2],
) -> bool {
    for i in 0..3 {
        let lo = bounds.min[i] - extent[i];
        let hi = bounds.max[i] + extent[i];
        if inv_dir[i].is_finite() {
            let mut t0 = (lo - start[i]) * inv_dir[i];
            let mut t1 = (hi - start[i]) * inv_dir[i];
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            range[0] = range[0].max(t0);
            range[1] = range[1].min(t1);
            if range[0] > range[1] {
                return false;
            }
        } else if start[i] < lo || start[i] > hi {
            // stationary on this axis and outside the slab
            return false;
        }
    }
    true
}

/// A rotation about a pivot point in world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation {
    origin: Vec3,
    axis: Unit<Vec3>,
    angle: f32,
}

impl Rotation {
    /// Create a rotation of `angle` radians about `axis` through `origin`
    pub fn new(origin: Vec3, axis: Unit<Vec3>, angle: f32) -> Self {
        Self {
            origin,
            axis,
            angle,
        }
    }

    /// The pivot point
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Move the pivot point, keeping axis and angle
    pub fn set_origin(&mut self, origin: Vec3) {
        self.origin = origin;
    }

    /// The rotation axis direction
    pub fn axis(&self) -> Unit<Vec3> {
        self.axis
    }

    /// The rotation angle in radians
    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// The orientation change this rotation applies
    pub fn to_quat(&self) -> Quat {
        Quat::from_axis_angle(&self.axis, self.angle)
    }

    /// Apply the full rotation to a world-space point
    pub fn rotate_point(&self, point: Vec3) -> Vec3 {
        self.origin + self.to_quat() * (point - self.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bounds_intersects_inclusive() {
        let a = Bounds::new(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        let b = Bounds::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let c = Bounds::new(Vec3::new(1.1, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_transformed_bounds_identity() {
        let local = Bounds::new(Vec3::new(-1.0, -2.0, -3.0), Vec3::new(1.0, 2.0, 3.0));
        let world =
            Bounds::from_transformed_bounds(&local, Vec3::new(10.0, 0.0, 0.0), &Quat::identity());
        assert_relative_eq!(world.min.x, 9.0);
        assert_relative_eq!(world.max.y, 2.0);
        assert_relative_eq!(world.max.z, 3.0);
    }

    #[test]
    fn test_transformed_bounds_rotated_expansion() {
        let local = Bounds::new(Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 0.0));
        let axis = Quat::from_axis_angle(&Vec3::z_axis(), std::f32::consts::FRAC_PI_4);
        let world = Bounds::from_transformed_bounds(&local, Vec3::zeros(), &axis);
        // a unit square rotated 45 degrees covers sqrt(2) half-extents
        assert_relative_eq!(world.max.x, std::f32::consts::SQRT_2, epsilon = 1e-5);
        assert_relative_eq!(world.max.y, std::f32::consts::SQRT_2, epsilon = 1e-5);
    }

    #[test]
    fn test_bounds_translation_sweep() {
        let local = Bounds::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        let swept =
            Bounds::from_bounds_translation(&local, Vec3::zeros(), Vec3::new(10.0, 0.0, 0.0));
        assert_relative_eq!(swept.min.x, -1.0);
        assert_relative_eq!(swept.max.x, 11.0);
        assert_relative_eq!(swept.max.y, 1.0);
    }

    #[test]
    fn test_point_rotation_bounds_cover_endpoints() {
        let rotation = Rotation::new(
            Vec3::zeros(),
            Vec3::z_axis(),
            std::f32::consts::FRAC_PI_2,
        );
        let point = Vec3::new(2.0, 0.0, 0.0);
        let bounds = Bounds::from_point_rotation(point, &rotation);
        assert!(bounds.contains_point(point));
        assert!(bounds.contains_point(rotation.rotate_point(point)));
    }

    #[test]
    fn test_moving_bounds_slab_fraction() {
        // unit-thick box sweeping +x from origin toward a box at x in [4,6]
        let target = Bounds::new(Vec3::new(4.0, -1.0, -1.0), Vec3::new(6.0, 1.0, 1.0));
        let mut range = [0.0, 1.0];
        let hit = moving_bounds_intersect_bounds(
            Vec3::zeros(),
            inverse_direction(Vec3::new(10.0, 0.0, 0.0)),
            Vec3::new(1.0, 1.0, 1.0),
            &target,
            &mut range,
        );
        assert!(hit);
        assert_relative_eq!(range[0], 0.3, epsilon = 1e-5);
    }

    #[test]
    fn test_moving_bounds_miss_on_stationary_axis() {
        let target = Bounds::new(Vec3::new(4.0, 5.0, -1.0), Vec3::new(6.0, 7.0, 1.0));
        let mut range = [0.0, 1.0];
        let hit = moving_bounds_intersect_bounds(
            Vec3::zeros(),
            inverse_direction(Vec3::new(10.0, 0.0, 0.0)),
            Vec3::new(1.0, 1.0, 1.0),
            &target,
            &mut range,
        );
        assert!(!hit);
    }

    #[test]
    fn test_line_intersection() {
        let bounds = Bounds::new(Vec3::new(4.0, -1.0, -1.0), Vec3::new(6.0, 1.0, 1.0));
        assert!(bounds.line_intersection(Vec3::zeros(), Vec3::new(10.0, 0.0, 0.0)));
        assert!(!bounds.line_intersection(Vec3::zeros(), Vec3::new(3.0, 0.0, 0.0)));
    }
}
