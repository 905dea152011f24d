//! Collision and clipping subsystem
//!
//! Entities register [`model::ClipModel`]s here; movement and overlap
//! questions go through [`world::ClipWorld`], which culls with a sector tree
//! and delegates exact geometry to a [`collision::CollisionModelService`].

pub mod cache;
pub mod collision;
pub mod config;
pub mod contents;
pub mod model;
pub(crate) mod sectors;
#[cfg(test)]
mod tests;
pub mod trace_model;
pub mod world;

pub use cache::{TraceModelCache, TraceModelCacheSnapshot, TraceModelIndex};
pub use collision::{
    CollisionHandle, CollisionModelService, ContactInfo, ContactKind, DebugRenderService,
    EntityId, HitTarget, MaterialId, RenderModelHandle, RenderModelService, RenderModelTrace,
    TraceResult, WORLD_HANDLE,
};
pub use config::ClipConfig;
pub use contents::{Contents, MASK_ALL, MASK_SOLID};
pub use model::{ClipModel, ClipModelId, ClipModelState, ShapeRep, ShapeState};
pub use trace_model::{MassProperties, TraceModel, TraceModelKind};
pub use world::{ClipStatistics, ClipWorld};

/// Errors from clip model management
///
/// Query paths never return these; a failed query degrades to a
/// conservative result instead. Errors only surface from explicit
/// management calls where the caller can act on them.
#[derive(Debug, thiserror::Error)]
pub enum ClipError {
    /// The clip model id does not refer to a live model
    #[error("unknown clip model")]
    UnknownModel,

    /// The model is backed by render geometry and has no collision handle
    #[error("clip model is backed by render geometry and has no collision handle")]
    RenderBackedModel,

    /// A trace-model cache index was out of range
    #[error("trace model index {index} out of range (cache holds {len})")]
    InvalidTraceModelIndex {
        /// The offending index
        index: usize,
        /// Number of entries actually cached
        len: usize,
    },

    /// A named collision asset could not be loaded
    #[error("collision model '{0}' not found")]
    ModelNotFound(String),
}
