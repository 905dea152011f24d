//! # Clip Engine
//!
//! Spatial partitioning and collision query engine for real-time 3D
//! simulation.
//!
//! ## Features
//!
//! - **Sector Tree**: Static binary partition of the world for broad-phase
//!   culling
//! - **Clip Models**: Collidable proxies entities link into the world
//! - **Trace-Model Cache**: Deduplicated procedural shapes with analytic
//!   mass properties
//! - **Swept Queries**: Translation, rotation and combined motion with
//!   ordered early-out
//! - **Pluggable Evaluators**: Exact geometry behind service traits
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use clip_engine::prelude::*;
//!
//! let mut world = ClipWorld::new(ClipConfig::default(), collision_service);
//!
//! let shape = TraceModel::from_bounds(Bounds::zero().expand(16.0));
//! let body = world.new_trace_model(&shape);
//! world.link(body, Some(EntityId(1)), 0, Vec3::new(0.0, 0.0, 64.0), Quat::identity());
//!
//! let trace = world.translation(
//!     Vec3::new(0.0, 0.0, 64.0),
//!     Vec3::new(0.0, 0.0, 0.0),
//!     Some(&shape),
//!     &Quat::identity(),
//!     MASK_SOLID,
//!     Some(EntityId(1)),
//! );
//! if trace.blocked() {
//!     // landed on something
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod clip;
pub mod foundation;

/// Commonly used types
pub mod prelude {
    pub use crate::clip::{
        ClipConfig, ClipError, ClipModel, ClipModelId, ClipWorld, CollisionModelService,
        ContactInfo, Contents, EntityId, HitTarget, TraceModel, TraceResult, MASK_ALL,
        MASK_SOLID,
    };
    pub use crate::foundation::math::{Bounds, Quat, Rotation, Vec3};
}
