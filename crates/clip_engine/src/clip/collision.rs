//! Seams to the exact collision evaluators
//!
//! The clip world does culling and candidate ordering; exact geometric tests
//! are delegated to an external collision-geometry evaluator behind
//! [`CollisionModelService`]. Render-geometry-backed clip models are traced
//! through [`RenderModelService`], and diagnostics draw through
//! [`DebugRenderService`]. This mirrors the pluggable-backend approach used
//! for broad-phase spatial queries: the engine depends on the trait, not the
//! evaluator.

use crate::clip::contents::Contents;
use crate::clip::trace_model::TraceModel;
use crate::foundation::math::{Bounds, Quat, Rotation, Vec3};

/// Non-owning reference to a game entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(pub u32);

impl EntityId {
    /// The world itself; passing it as the pass entity skips world geometry
    pub const WORLD: EntityId = EntityId(u32::MAX);
}

/// Opaque reference to a surface material owned by the evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub u32);

/// Opaque handle to a static collision model owned by the evaluator
pub type CollisionHandle = i32;

/// Handle of the world collision geometry
pub const WORLD_HANDLE: CollisionHandle = 0;

/// Opaque handle to a render entity owned by the render world
pub type RenderModelHandle = i32;

/// The geometric feature a contact was generated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContactKind {
    /// No contact
    #[default]
    None,
    /// Contact on a collision model edge
    Edge,
    /// Contact on a collision model vertex
    ModelVertex,
    /// Contact on a trace model vertex, against a model polygon
    TrmVertex,
}

/// What a trace or contact hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitTarget {
    /// Static world geometry
    World,
    /// A clip model of a game entity
    Entity {
        /// Owning entity of the hit clip model
        entity: EntityId,
        /// Id of the hit clip model on that entity
        clip_id: i32,
    },
}

/// A single contact point produced by the exact evaluator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactInfo {
    /// Feature the contact was generated from
    pub kind: ContactKind,
    /// Contact point in world space
    pub point: Vec3,
    /// Surface normal at the contact, pointing toward the mover
    pub normal: Vec3,
    /// Plane distance of the contact
    pub dist: f32,
    /// Contents of the surface hit
    pub contents: Contents,
    /// Material of the surface hit, if any
    pub material: Option<MaterialId>,
    /// Feature index on the hit model (edge/vertex/polygon)
    pub model_feature: i32,
    /// Feature index on the moving trace model
    pub trm_feature: i32,
    /// What was hit; filled in by the clip world, not the evaluator
    pub target: Option<HitTarget>,
}

impl Default for ContactInfo {
    fn default() -> Self {
        Self {
            kind: ContactKind::None,
            point: Vec3::zeros(),
            normal: Vec3::zeros(),
            dist: 0.0,
            contents: Contents::empty(),
            material: None,
            model_feature: 0,
            trm_feature: 0,
            target: None,
        }
    }
}

/// Result of a swept translation or rotation query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceResult {
    /// Portion (0..1) of the requested motion completed before a blocking
    /// contact; 1.0 means unobstructed
    pub fraction: f32,
    /// Final position of the model origin
    pub end_pos: Vec3,
    /// Final orientation of the model
    pub end_axis: Quat,
    /// Contact details; only meaningful when the motion was blocked
    pub contact: ContactInfo,
}

impl TraceResult {
    /// A trace that completed the whole motion without contact
    pub fn unobstructed(end_pos: Vec3, end_axis: Quat) -> Self {
        Self {
            fraction: 1.0,
            end_pos,
            end_axis,
            contact: ContactInfo::default(),
        }
    }

    /// A trace fully blocked before any motion
    pub fn blocked_at(start: Vec3, axis: Quat) -> Self {
        Self {
            fraction: 0.0,
            end_pos: start,
            end_axis: axis,
            contact: ContactInfo {
                point: start,
                target: Some(HitTarget::World),
                ..ContactInfo::default()
            },
        }
    }

    /// True if the motion was blocked before completing
    pub fn blocked(&self) -> bool {
        self.fraction < 1.0
    }

    /// True if the motion was blocked before it even started
    pub fn blocked_at_start(&self) -> bool {
        self.fraction == 0.0
    }
}

/// Trace against a render model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderModelTrace {
    /// Fraction of the segment completed before the hit
    pub fraction: f32,
    /// Hit point in world space
    pub point: Vec3,
    /// Surface normal at the hit
    pub normal: Vec3,
    /// Material of the surface hit
    pub material: Option<MaterialId>,
    /// Contents of the surface hit
    pub contents: Contents,
    /// Joint the hit surface is skinned to, for per-joint clip model ids
    pub joint: i32,
}

/// Exact collision-geometry evaluator
///
/// Handle [`WORLD_HANDLE`] always refers to the world geometry. A `trm` of
/// `None` means a point-sized trace.
pub trait CollisionModelService {
    /// Load a named static collision model, optionally skinned
    fn load_model(&mut self, name: &str, skin: Option<&str>) -> Option<CollisionHandle>;

    /// Name a handle was loaded under, for persistence
    fn model_name(&self, handle: CollisionHandle) -> Option<String>;

    /// Bounds of a loaded model
    fn model_bounds(&self, handle: CollisionHandle) -> Bounds;

    /// Contents of a loaded model
    fn model_contents(&self, handle: CollisionHandle) -> Contents;

    /// Get a one-off collision handle for a procedural shape
    fn setup_trace_model(
        &mut self,
        model: &TraceModel,
        material: Option<MaterialId>,
    ) -> CollisionHandle;

    /// Exact swept translation of `trm` from `start` to `end` against a
    /// model placed at `model_origin`/`model_axis`
    fn translation(
        &self,
        start: Vec3,
        end: Vec3,
        trm: Option<&TraceModel>,
        trm_axis: &Quat,
        mask: Contents,
        model: CollisionHandle,
        model_origin: Vec3,
        model_axis: &Quat,
    ) -> TraceResult;

    /// Exact swept rotation of `trm` about `rotation` against a model
    fn rotation(
        &self,
        start: Vec3,
        rotation: &Rotation,
        trm: Option<&TraceModel>,
        trm_axis: &Quat,
        mask: Contents,
        model: CollisionHandle,
        model_origin: Vec3,
        model_axis: &Quat,
    ) -> TraceResult;

    /// Contacts of `trm` at `start` pushed along `dir` up to `depth`
    fn contacts(
        &self,
        start: Vec3,
        dir: Vec3,
        depth: f32,
        trm: Option<&TraceModel>,
        trm_axis: &Quat,
        mask: Contents,
        model: CollisionHandle,
        model_origin: Vec3,
        model_axis: &Quat,
        max_contacts: usize,
    ) -> Vec<ContactInfo>;

    /// Contents of the model volume overlapped by `trm` placed at `start`
    fn contents(
        &self,
        start: Vec3,
        trm: Option<&TraceModel>,
        trm_axis: &Quat,
        mask: Contents,
        model: CollisionHandle,
        model_origin: Vec3,
        model_axis: &Quat,
    ) -> Contents;

    /// Endpoints of a model edge, for contact feature reconstruction
    fn model_edge(&self, handle: CollisionHandle, edge: i32) -> Option<(Vec3, Vec3)>;

    /// Position of a model vertex
    fn model_vertex(&self, handle: CollisionHandle, vertex: i32) -> Option<Vec3>;

    /// Points of a model polygon
    fn model_polygon(&self, handle: CollisionHandle, polygon: i32) -> Option<Vec<Vec3>>;
}

/// Ray tests against rendered geometry, for clip models backed by render
/// models instead of collision geometry
pub trait RenderModelService {
    /// Current bounds of a render entity
    fn entity_bounds(&self, handle: RenderModelHandle) -> Option<Bounds>;

    /// Trace a sphere of `radius` from `start` to `end` against the exact
    /// render geometry
    fn model_trace(
        &self,
        handle: RenderModelHandle,
        start: Vec3,
        end: Vec3,
        radius: f32,
    ) -> Option<RenderModelTrace>;
}

/// Diagnostic drawing sink; only used by the debug helpers
pub trait DebugRenderService {
    /// Draw a world-space line
    fn debug_line(&mut self, start: Vec3, end: Vec3);

    /// Draw world-space bounds
    fn debug_bounds(&mut self, bounds: &Bounds);

    /// Draw text at a world-space position
    fn draw_text(&mut self, text: &str, origin: Vec3);
}
