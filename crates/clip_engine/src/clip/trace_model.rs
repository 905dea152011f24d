//! Procedural convex collision shapes
//!
//! A trace model is a small convex polyhedron set up at runtime (as opposed
//! to a baked static collision mesh): the swept shape of a moving object.
//! Shapes are structurally hashable and comparable so the cache can
//! deduplicate them, and carry analytic mass properties at unit density.

use serde::{Deserialize, Serialize};

use crate::foundation::math::{float_hash, Bounds, Mat3, Vec3};

/// The primitive a trace model was set up as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceModelKind {
    /// Single point, zero extent
    Point,
    /// Axis-aligned box
    Box,
    /// Octahedron fit to bounds
    Octahedron,
    /// Elliptic cylinder around the local z axis
    Cylinder,
}

/// Volume, center of mass and inertia tensor at unit density
///
/// Callers scale by their own density: mass = volume * density, inertia
/// scales linearly with density.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassProperties {
    /// Enclosed volume; equals the mass at unit density
    pub volume: f32,
    /// Center of mass in model-local space
    pub center_of_mass: Vec3,
    /// Inertia tensor about the center of mass at unit density
    pub inertia_tensor: Mat3,
}

/// A procedural convex collision shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceModel {
    kind: TraceModelKind,
    bounds: Bounds,
    verts: Vec<Vec3>,
    num_edges: u32,
    num_polys: u32,
}

impl TraceModel {
    /// A zero-extent point shape at the local origin
    pub fn point() -> Self {
        Self {
            kind: TraceModelKind::Point,
            bounds: Bounds::zero(),
            verts: vec![Vec3::zeros()],
            num_edges: 0,
            num_polys: 0,
        }
    }

    /// Box filling the given local bounds
    pub fn from_bounds(bounds: Bounds) -> Self {
        let mut verts = Vec::with_capacity(8);
        for corner in 0..8 {
            verts.push(Vec3::new(
                if corner & 1 != 0 { bounds.max.x } else { bounds.min.x },
                if corner & 2 != 0 { bounds.max.y } else { bounds.min.y },
                if corner & 4 != 0 { bounds.max.z } else { bounds.min.z },
            ));
        }
        Self {
            kind: TraceModelKind::Box,
            bounds,
            verts,
            num_edges: 12,
            num_polys: 6,
        }
    }

    /// Octahedron with apexes on the bound axes
    pub fn octahedron(bounds: Bounds) -> Self {
        let center = bounds.center();
        let extents = bounds.extents();
        let verts = vec![
            center + Vec3::new(extents.x, 0.0, 0.0),
            center - Vec3::new(extents.x, 0.0, 0.0),
            center + Vec3::new(0.0, extents.y, 0.0),
            center - Vec3::new(0.0, extents.y, 0.0),
            center + Vec3::new(0.0, 0.0, extents.z),
            center - Vec3::new(0.0, 0.0, extents.z),
        ];
        Self {
            kind: TraceModelKind::Octahedron,
            bounds,
            verts,
            num_edges: 12,
            num_polys: 8,
        }
    }

    /// Elliptic cylinder around the local z axis approximated by `sides`
    /// rim vertices per cap
    pub fn cylinder(bounds: Bounds, sides: u32) -> Self {
        let sides = sides.max(3);
        let center = bounds.center();
        let extents = bounds.extents();
        let mut verts = Vec::with_capacity(sides as usize * 2);
        for i in 0..sides {
            let angle = std::f32::consts::TAU * i as f32 / sides as f32;
            let x = center.x + extents.x * angle.cos();
            let y = center.y + extents.y * angle.sin();
            verts.push(Vec3::new(x, y, bounds.min.z));
            verts.push(Vec3::new(x, y, bounds.max.z));
        }
        Self {
            kind: TraceModelKind::Cylinder,
            bounds,
            verts,
            num_edges: sides * 3,
            num_polys: sides + 2,
        }
    }

    /// The primitive this shape was set up as
    pub fn kind(&self) -> TraceModelKind {
        self.kind
    }

    /// Local bounds of the shape
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// The shape's vertices in model-local space
    pub fn verts(&self) -> &[Vec3] {
        &self.verts
    }

    /// Vertex count
    pub fn num_verts(&self) -> u32 {
        self.verts.len() as u32
    }

    /// Edge count
    pub fn num_edges(&self) -> u32 {
        self.num_edges
    }

    /// Polygon count
    pub fn num_polys(&self) -> u32 {
        self.num_polys
    }

    /// Rebase the shape's local origin by shifting every vertex
    pub fn translate(&mut self, offset: Vec3) {
        for vert in &mut self.verts {
            *vert += offset;
        }
        self.bounds.min += offset;
        self.bounds.max += offset;
    }

    /// Structural hash key for cache lookup; equal shapes always produce the
    /// same key, and collisions are resolved by exact comparison
    pub fn hash_key(&self) -> u32 {
        let kind = match self.kind {
            TraceModelKind::Point => 0u32,
            TraceModelKind::Box => 1,
            TraceModelKind::Octahedron => 2,
            TraceModelKind::Cylinder => 3,
        };
        (kind << 8)
            ^ (self.num_verts() << 4)
            ^ (self.num_edges << 2)
            ^ self.num_polys
            ^ float_hash(&self.bounds.min)
    }

    /// Compute volume, center of mass and inertia tensor at unit density
    pub fn mass_properties(&self) -> MassProperties {
        let size = self.bounds.size();
        let extents = self.bounds.extents();
        let center = self.bounds.center();

        let (volume, diag) = match self.kind {
            TraceModelKind::Point => (0.0, Vec3::zeros()),
            TraceModelKind::Box => {
                let m = size.x * size.y * size.z;
                (
                    m,
                    Vec3::new(
                        m * (size.y * size.y + size.z * size.z) / 12.0,
                        m * (size.x * size.x + size.z * size.z) / 12.0,
                        m * (size.x * size.x + size.y * size.y) / 12.0,
                    ),
                )
            }
            TraceModelKind::Octahedron => {
                let m = 4.0 * extents.x * extents.y * extents.z / 3.0;
                (
                    m,
                    Vec3::new(
                        m * (extents.y * extents.y + extents.z * extents.z) / 10.0,
                        m * (extents.x * extents.x + extents.z * extents.z) / 10.0,
                        m * (extents.x * extents.x + extents.y * extents.y) / 10.0,
                    ),
                )
            }
            TraceModelKind::Cylinder => {
                let (a, b, h) = (extents.x, extents.y, size.z);
                let m = std::f32::consts::PI * a * b * h;
                (
                    m,
                    Vec3::new(
                        m * (3.0 * b * b + h * h) / 12.0,
                        m * (3.0 * a * a + h * h) / 12.0,
                        m * (a * a + b * b) / 4.0,
                    ),
                )
            }
        };

        MassProperties {
            volume,
            center_of_mass: if self.kind == TraceModelKind::Point {
                self.verts[0]
            } else {
                center
            },
            inertia_tensor: Mat3::from_diagonal(&diag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_box() -> Bounds {
        Bounds::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_box_mass_properties() {
        let trm = TraceModel::from_bounds(unit_box());
        let mass = trm.mass_properties();
        assert_relative_eq!(mass.volume, 8.0);
        assert_relative_eq!(mass.center_of_mass.x, 0.0);
        // 2x2x2 box at unit density: I = m * (4 + 4) / 12
        assert_relative_eq!(mass.inertia_tensor[(0, 0)], 8.0 * 8.0 / 12.0);
    }

    #[test]
    fn test_octahedron_volume() {
        let trm = TraceModel::octahedron(unit_box());
        assert_relative_eq!(trm.mass_properties().volume, 4.0 / 3.0);
    }

    #[test]
    fn test_structural_equality_and_hash() {
        let a = TraceModel::from_bounds(unit_box());
        let b = TraceModel::from_bounds(unit_box());
        let c = TraceModel::octahedron(unit_box());
        assert_eq!(a, b);
        assert_eq!(a.hash_key(), b.hash_key());
        assert_ne!(a, c);
    }

    #[test]
    fn test_translate_shifts_bounds_and_verts() {
        let mut trm = TraceModel::from_bounds(unit_box());
        trm.translate(Vec3::new(5.0, 0.0, 0.0));
        assert_relative_eq!(trm.bounds().min.x, 4.0);
        assert_relative_eq!(trm.bounds().max.x, 6.0);
        assert!(trm.verts().iter().all(|v| v.x >= 4.0 && v.x <= 6.0));
    }

    #[test]
    fn test_point_has_no_volume() {
        let trm = TraceModel::point();
        assert_eq!(trm.mass_properties().volume, 0.0);
        assert_eq!(trm.num_verts(), 1);
    }
}
