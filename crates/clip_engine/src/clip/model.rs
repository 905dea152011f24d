//! Clip models - collidable proxies of game entities
//!
//! A clip model ties a collision shape to an owning entity with a position,
//! orientation, contents mask and enabled flag. It is the unit linked into
//! the spatial partition tree; its absolute bounds are computed at link time
//! and are never stale while linked, because every position change unlinks
//! first.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::clip::cache::TraceModelIndex;
use crate::clip::collision::{CollisionHandle, EntityId, MaterialId, RenderModelHandle};
use crate::clip::contents::Contents;
use crate::foundation::math::{Bounds, Quat, Vec3};
use crate::foundation::memory::NIL;

new_key_type! {
    /// Stable handle of a clip model within a clip world
    pub struct ClipModelId;
}

/// Which collision representation backs a clip model
///
/// The representations are mutually exclusive; operations that only make
/// sense for one of them match exhaustively instead of probing sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeRep {
    /// No shape; the model cannot be traced against
    None,
    /// Procedural shape held by the shared trace-model cache
    Trace(TraceModelIndex),
    /// Precomputed static collision mesh
    Collision(CollisionHandle),
    /// Render geometry; traced approximately through the render world
    Render(RenderModelHandle),
}

/// A collidable proxy attached to a game entity
#[derive(Debug, Clone)]
pub struct ClipModel {
    pub(crate) enabled: bool,
    pub(crate) entity: Option<EntityId>,
    pub(crate) id: i32,
    pub(crate) owner: Option<EntityId>,
    pub(crate) origin: Vec3,
    pub(crate) axis: Quat,
    pub(crate) bounds: Bounds,
    pub(crate) abs_bounds: Bounds,
    pub(crate) material: Option<MaterialId>,
    pub(crate) contents: Contents,
    pub(crate) shape: ShapeRep,
    /// Skin the collision asset was loaded with, kept for save/load
    pub(crate) skin: Option<String>,
    /// Head of this model's list of tree link entries, NIL when unlinked
    pub(crate) link_head: u32,
    /// Query epoch stamp for duplicate avoidance within one query pass
    pub(crate) touch_count: u32,
}

impl Default for ClipModel {
    fn default() -> Self {
        Self {
            enabled: true,
            entity: None,
            id: 0,
            owner: None,
            origin: Vec3::zeros(),
            axis: Quat::identity(),
            bounds: Bounds::zero(),
            abs_bounds: Bounds::zero(),
            material: None,
            contents: Contents::BODY,
            shape: ShapeRep::None,
            skin: None,
            link_head: NIL,
            touch_count: 0,
        }
    }
}

impl ClipModel {
    /// Whether this model participates in queries
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the model without unlinking it
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// The entity this model belongs to
    pub fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    /// Id of this model on its entity
    pub fn id(&self) -> i32 {
        self.id
    }

    /// The physical owner (e.g. who fired this projectile)
    pub fn owner(&self) -> Option<EntityId> {
        self.owner
    }

    /// Declare a physical owner for owner-exclusion filtering
    pub fn set_owner(&mut self, owner: Option<EntityId>) {
        self.owner = owner;
    }

    /// World-space origin
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// World-space orientation
    pub fn axis(&self) -> Quat {
        self.axis
    }

    /// Local bounds of the shape
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// World-space bounds, epsilon padded; valid while linked
    pub fn abs_bounds(&self) -> &Bounds {
        &self.abs_bounds
    }

    /// Surface material override
    pub fn material(&self) -> Option<MaterialId> {
        self.material
    }

    /// Set the surface material override
    pub fn set_material(&mut self, material: Option<MaterialId>) {
        self.material = material;
    }

    /// Content-type mask of this model
    pub fn contents(&self) -> Contents {
        self.contents
    }

    /// Set the content-type mask
    pub fn set_contents(&mut self, contents: Contents) {
        self.contents = contents;
    }

    /// The collision representation backing this model
    pub fn shape(&self) -> ShapeRep {
        self.shape
    }

    /// Skin of the named collision asset, if loaded with one
    pub fn skin(&self) -> Option<&str> {
        self.skin.as_deref()
    }

    /// True if backed by a procedural trace model
    pub fn is_trace_model(&self) -> bool {
        matches!(self.shape, ShapeRep::Trace(_))
    }

    /// True if backed by render geometry
    pub fn is_render_model(&self) -> bool {
        matches!(self.shape, ShapeRep::Render(_))
    }

    /// True if currently linked into the partition tree
    pub fn is_linked(&self) -> bool {
        self.link_head != NIL
    }
}

/// Serializable shape reference of a saved clip model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShapeState {
    /// No shape
    None,
    /// Index into the (separately saved) trace-model cache
    Trace(TraceModelIndex),
    /// Named static collision asset, reloaded by name on restore
    Collision {
        /// Model name as loaded
        name: String,
        /// Optional skin name
        skin: Option<String>,
    },
    /// Render entity handle; resolved anew when relinked
    Render(RenderModelHandle),
}

/// Serializable image of a clip model for save/load
///
/// Shape data is never stored per model; trace models are stored as cache
/// indices and re-acquire their reference on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipModelState {
    /// Whether the model participates in queries
    pub enabled: bool,
    /// Owning entity, by raw id
    pub entity: Option<u32>,
    /// Id of the model on its entity
    pub id: i32,
    /// Declared physical owner, by raw id
    pub owner: Option<u32>,
    /// World-space origin
    pub origin: Vec3,
    /// World-space orientation
    pub axis: Quat,
    /// Content-type mask bits
    pub contents: u32,
    /// Shape reference
    pub shape: ShapeState,
    /// Whether the model was linked when saved
    pub linked: bool,
}
