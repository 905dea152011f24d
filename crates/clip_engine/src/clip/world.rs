//! The clip world: model registry, broad phase and query dispatch
//!
//! [`ClipWorld`] owns every collidable proxy of a level plus the structures
//! that cull queries against them: the sector tree, the link pool and the
//! trace-model cache. Swept queries run in two phases. The broad phase walks
//! the tree and yields candidate models, ordered by a lower bound on when
//! the sweep can first touch them; the narrow phase hands each candidate to
//! the exact evaluator and keeps the earliest contact, skipping every
//! candidate whose lower bound the current best fraction already beats.
//!
//! Query paths never fail; degenerate inputs produce conservative results
//! (fully blocked, or nothing found) and a log entry.

use std::collections::HashMap;

use slotmap::SlotMap;

use crate::clip::cache::{TraceModelCache, TraceModelCacheSnapshot, TraceModelIndex};
use crate::clip::collision::{
    CollisionHandle, CollisionModelService, ContactInfo, ContactKind, DebugRenderService,
    EntityId, HitTarget, MaterialId, RenderModelService, TraceResult, WORLD_HANDLE,
};
use crate::clip::config::ClipConfig;
use crate::clip::contents::Contents;
use crate::clip::model::{ClipModel, ClipModelId, ClipModelState, ShapeRep, ShapeState};
use crate::clip::sectors::{ClipLink, SectorTree};
use crate::clip::trace_model::TraceModel;
use crate::clip::ClipError;
use crate::foundation::math::{
    inverse_direction, is_identity, Bounds, Quat, Rotation, Vec3,
};
use crate::foundation::memory::BlockPool;

/// Extent of the fallback shape used for models that were never given one
const DEFAULT_MODEL_EXTENT: f32 = 8.0;

/// Query counters since the last reset
#[derive(Debug, Clone, Copy, Default)]
pub struct ClipStatistics {
    /// Swept translation queries
    pub translations: u64,
    /// Swept rotation queries
    pub rotations: u64,
    /// Combined translation plus rotation queries
    pub motions: u64,
    /// Traces delegated to the render-geometry service
    pub render_model_traces: u64,
    /// Contents queries
    pub contents_queries: u64,
    /// Contact queries
    pub contact_queries: u64,
}

/// Owner of all clip models and the spatial structures over them
pub struct ClipWorld {
    config: ClipConfig,
    cm: Box<dyn CollisionModelService>,
    render: Option<Box<dyn RenderModelService>>,
    models: SlotMap<ClipModelId, ClipModel>,
    entity_models: HashMap<EntityId, Vec<ClipModelId>>,
    tree: SectorTree,
    links: BlockPool<ClipLink>,
    cache: TraceModelCache,
    /// Current query stamp; bumped before every broad-phase pass
    epoch: u32,
    /// Cached fallback shape for models traced without one
    default_shape: TraceModelIndex,
    stats: ClipStatistics,
}

impl ClipWorld {
    /// Build the clip world over the evaluator's world geometry
    ///
    /// The sector tree spans the bounds of the world collision model and is
    /// never rebuilt; models linked outside it land in the outermost leaves.
    pub fn new(config: ClipConfig, cm: Box<dyn CollisionModelService>) -> Self {
        let config = config.validated();
        let world_bounds = cm.model_bounds(WORLD_HANDLE);
        let tree = SectorTree::build(world_bounds, config.max_sector_depth);
        log::info!(
            "sector tree with {} nodes at depth {}",
            tree.num_nodes(),
            config.max_sector_depth
        );

        let mut cache = TraceModelCache::new();
        let default_shape = cache.acquire(&TraceModel::from_bounds(
            Bounds::zero().expand(DEFAULT_MODEL_EXTENT),
        ));

        let links = BlockPool::new(config.link_block_size);
        Self {
            config,
            cm,
            render: None,
            models: SlotMap::with_key(),
            entity_models: HashMap::new(),
            tree,
            links,
            cache,
            epoch: 0,
            default_shape,
            stats: ClipStatistics::default(),
        }
    }

    /// Attach a render-geometry service for render-backed clip models
    pub fn set_render_service(&mut self, render: Box<dyn RenderModelService>) {
        self.render = Some(render);
    }

    /// The active configuration
    pub fn config(&self) -> &ClipConfig {
        &self.config
    }

    /// Bounds of the world geometry the sector tree was built over
    pub fn world_bounds(&self) -> &Bounds {
        self.tree.world_bounds()
    }

    /// The shared trace-model cache
    pub fn cache(&self) -> &TraceModelCache {
        &self.cache
    }

    /// Number of registered clip models
    pub fn num_models(&self) -> usize {
        self.models.len()
    }

    /// Number of live sector link entries
    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    // ------------------------------------------------------------------
    // model management

    /// Register a model backed by a procedural shape
    pub fn new_trace_model(&mut self, trm: &TraceModel) -> ClipModelId {
        let index = self.cache.acquire(trm);
        self.models.insert(ClipModel {
            bounds: *trm.bounds(),
            shape: ShapeRep::Trace(index),
            ..ClipModel::default()
        })
    }

    /// Register a model backed by a named static collision asset
    pub fn new_named_model(
        &mut self,
        name: &str,
        skin: Option<&str>,
    ) -> Result<ClipModelId, ClipError> {
        let handle = self
            .cm
            .load_model(name, skin)
            .ok_or_else(|| ClipError::ModelNotFound(name.to_string()))?;
        Ok(self.models.insert(ClipModel {
            bounds: self.cm.model_bounds(handle),
            contents: self.cm.model_contents(handle),
            shape: ShapeRep::Collision(handle),
            skin: skin.map(str::to_string),
            ..ClipModel::default()
        }))
    }

    /// Register a model backed by render geometry
    ///
    /// Render-backed models are only hit by translations; their bounds are
    /// refreshed from the render world at link time.
    pub fn new_render_model(&mut self, handle: i32) -> ClipModelId {
        self.models.insert(ClipModel {
            bounds: Bounds::cleared(),
            contents: Contents::RENDER_MODEL,
            shape: ShapeRep::Render(handle),
            ..ClipModel::default()
        })
    }

    /// Swap a model's shape for a new procedural one
    ///
    /// The model keeps its place in the world but its absolute bounds are
    /// stale until relinked, which this does when it was linked.
    pub fn load_trace_model(&mut self, id: ClipModelId, trm: &TraceModel) {
        let index = self.cache.acquire(trm);
        let Some(model) = self.models.get_mut(id) else {
            log::warn!("load_trace_model: unknown clip model {id:?}");
            self.cache.release(index);
            return;
        };
        let was_linked = model.is_linked();
        if let ShapeRep::Trace(old) = model.shape {
            self.cache.release(old);
        }
        model.shape = ShapeRep::Trace(index);
        model.bounds = *trm.bounds();
        model.skin = None;
        if was_linked {
            self.relink(id);
        }
    }

    /// Remove a model, dropping its links and shape reference
    pub fn free_model(&mut self, id: ClipModelId) {
        self.unlink(id);
        let Some(model) = self.models.remove(id) else {
            return;
        };
        if let ShapeRep::Trace(index) = model.shape {
            self.cache.release(index);
        }
        if let Some(entity) = model.entity {
            self.remove_entity_model(entity, id);
        }
    }

    /// Read-only access to a model
    pub fn model(&self, id: ClipModelId) -> Option<&ClipModel> {
        self.models.get(id)
    }

    /// Mutable access to a model's non-spatial state (contents, owner,
    /// material, enabled flag)
    ///
    /// Position and shape go through [`ClipWorld::link`] and the load
    /// methods so the sector tree never sees stale bounds.
    pub fn model_mut(&mut self, id: ClipModelId) -> Option<&mut ClipModel> {
        self.models.get_mut(id)
    }

    /// Models currently registered to an entity
    pub fn entity_model_ids(&self, entity: EntityId) -> &[ClipModelId] {
        self.entity_models
            .get(&entity)
            .map_or(&[], |list| list.as_slice())
    }

    /// Collision handle for a model, setting up procedural shapes on demand
    ///
    /// Render-backed models have no collision geometry; asking for their
    /// handle is an error. A model that was never given a shape is traced
    /// as a default box and reported.
    pub fn model_handle(&mut self, id: ClipModelId) -> Result<CollisionHandle, ClipError> {
        let model = self.models.get(id).ok_or(ClipError::UnknownModel)?;
        let shape = model.shape;
        let material = model.material;
        match shape {
            ShapeRep::Collision(handle) => Ok(handle),
            ShapeRep::Trace(index) => {
                let trm = self
                    .cache
                    .get(index)
                    .ok_or(ClipError::InvalidTraceModelIndex {
                        index: index.index(),
                        len: self.cache.len(),
                    })?;
                Ok(self.cm.setup_trace_model(trm, material))
            }
            ShapeRep::Render(_) => Err(ClipError::RenderBackedModel),
            ShapeRep::None => {
                log::warn!("clip model {id:?} has no shape, using default box");
                let trm = self
                    .cache
                    .get(self.default_shape)
                    .ok_or(ClipError::UnknownModel)?;
                Ok(self.cm.setup_trace_model(trm, material))
            }
        }
    }

    // ------------------------------------------------------------------
    // linking

    /// Place a model in the world and insert it into the sector tree
    ///
    /// `clip_id` distinguishes multiple models on one entity (body parts,
    /// per-joint volumes) and is reported back in trace results.
    pub fn link(
        &mut self,
        id: ClipModelId,
        entity: Option<EntityId>,
        clip_id: i32,
        origin: Vec3,
        axis: Quat,
    ) {
        self.unlink(id);

        let box_epsilon = self.config.box_epsilon;
        let Some(model) = self.models.get_mut(id) else {
            log::warn!("link: unknown clip model {id:?}");
            return;
        };
        let old_entity = model.entity;
        model.entity = entity;
        model.id = clip_id;
        model.origin = origin;
        model.axis = axis;

        if old_entity != entity {
            if let Some(old) = old_entity {
                self.remove_entity_model(old, id);
            }
            if let Some(new) = entity {
                self.entity_models.entry(new).or_default().push(id);
            }
        }

        let model = &self.models[id];
        if model.bounds.is_cleared() {
            return;
        }
        // movement is clipped an epsilon away from surfaces, so linked
        // bounds must be padded by the same epsilon
        let abs_bounds = if is_identity(&axis) {
            Bounds::new(model.bounds.min + origin, model.bounds.max + origin)
        } else {
            Bounds::from_transformed_bounds(&model.bounds, origin, &axis)
        }
        .expand(box_epsilon);
        self.models[id].abs_bounds = abs_bounds;

        self.tree.link_model(&mut self.links, &mut self.models, id);
    }

    /// Place a render-backed model using the render world's current bounds
    pub fn link_render_model(&mut self, id: ClipModelId, entity: Option<EntityId>, clip_id: i32) {
        let Some(model) = self.models.get(id) else {
            log::warn!("link_render_model: unknown clip model {id:?}");
            return;
        };
        let ShapeRep::Render(handle) = model.shape else {
            log::warn!("link_render_model: clip model {id:?} is not render backed");
            return;
        };
        let Some(bounds) = self
            .render
            .as_ref()
            .and_then(|render| render.entity_bounds(handle))
        else {
            // a stale linkage would keep answering queries with old bounds
            log::warn!("link_render_model: no render bounds for clip model {id:?}, unlinking");
            self.unlink(id);
            return;
        };
        self.models[id].bounds = bounds;
        self.link(id, entity, clip_id, Vec3::zeros(), Quat::identity());
    }

    /// Re-insert a model at its current placement
    pub fn relink(&mut self, id: ClipModelId) {
        let Some(model) = self.models.get(id) else {
            return;
        };
        let (entity, clip_id, origin, axis) = (model.entity, model.id, model.origin, model.axis);
        self.link(id, entity, clip_id, origin, axis);
    }

    /// Remove a model from the sector tree; it stays registered
    pub fn unlink(&mut self, id: ClipModelId) {
        self.tree
            .unlink_model(&mut self.links, &mut self.models, id);
    }

    /// Move a model without relinking it
    ///
    /// The model is unlinked and takes no part in queries until linked
    /// again; batching several moves before one relink is the point.
    pub fn set_position(&mut self, id: ClipModelId, origin: Vec3, axis: Quat) {
        self.unlink(id);
        if let Some(model) = self.models.get_mut(id) {
            model.origin = origin;
            model.axis = axis;
        }
    }

    fn remove_entity_model(&mut self, entity: EntityId, id: ClipModelId) {
        if let Some(list) = self.entity_models.get_mut(&entity) {
            list.retain(|m| *m != id);
            if list.is_empty() {
                self.entity_models.remove(&entity);
            }
        }
    }

    // ------------------------------------------------------------------
    // broad phase

    fn next_epoch(&mut self) -> u32 {
        self.epoch = self.epoch.wrapping_add(1);
        if self.epoch == 0 {
            // stamps from before the wrap must not alias the new cycle
            for model in self.models.values_mut() {
                model.touch_count = 0;
            }
            self.epoch = 1;
        }
        self.epoch
    }

    /// Enabled models whose padded absolute bounds overlap `bounds`
    pub fn models_touching_bounds(&mut self, bounds: &Bounds, mask: Contents) -> Vec<ClipModelId> {
        if bounds.is_backwards() {
            log::warn!("models_touching_bounds: backwards bounds rejected");
            return Vec::new();
        }
        let epoch = self.next_epoch();
        let query_bounds = bounds.expand(self.config.box_epsilon);
        let mut out = Vec::new();
        self.tree.models_touching_bounds(
            &self.links,
            &mut self.models,
            epoch,
            &query_bounds,
            mask,
            self.config.max_candidates,
            &mut out,
        );
        out
    }

    /// Entities with at least one model overlapping `bounds`
    pub fn entities_touching_bounds(&mut self, bounds: &Bounds, mask: Contents) -> Vec<EntityId> {
        let models = self.models_touching_bounds(bounds, mask);
        let mut entities: Vec<EntityId> = Vec::new();
        for id in models {
            let Some(entity) = self.models.get(id).and_then(|model| model.entity) else {
                continue;
            };
            if !entities.contains(&entity) {
                entities.push(entity);
            }
        }
        entities
    }

    /// Candidates for a box sweeping from `start` by `dir`, paired with a
    /// lower bound on the fraction of first contact, sorted ascending
    ///
    /// `trace_bounds` is the full swept volume, `mover_bounds` the mover's
    /// shape relative to `start`.
    pub fn models_touching_moving_bounds(
        &mut self,
        trace_bounds: &Bounds,
        mover_bounds: &Bounds,
        start: Vec3,
        dir: Vec3,
        mask: Contents,
    ) -> Vec<(ClipModelId, f32)> {
        if trace_bounds.is_backwards() {
            log::warn!("models_touching_moving_bounds: backwards bounds rejected");
            return Vec::new();
        }
        let epoch = self.next_epoch();
        let pad = self.config.box_epsilon;
        let query_bounds = trace_bounds.expand(pad);
        let extent = mover_bounds.extents() + Vec3::new(pad, pad, pad);
        let mut out = Vec::new();
        self.tree.models_touching_moving_bounds(
            &self.links,
            &mut self.models,
            epoch,
            &query_bounds,
            start + mover_bounds.center(),
            inverse_direction(dir),
            extent,
            mask,
            self.config.max_candidates,
            &mut out,
        );
        out
    }

    // ------------------------------------------------------------------
    // filtering

    /// Owner of the pass entity's first clip model, for owner exclusion
    fn pass_owner(&self, pass: Option<EntityId>) -> Option<EntityId> {
        let pass = pass?;
        self.entity_models
            .get(&pass)
            .and_then(|list| list.first())
            .and_then(|id| self.models.get(*id))
            .and_then(|model| model.owner)
    }

    /// True if a candidate must be ignored for this query's pass entity
    ///
    /// A projectile never hits its own shooter, and the shooter never hits
    /// projectiles it fired: exclusion applies in both directions, and to
    /// the pass entity's own owner as well.
    fn is_filtered(model: &ClipModel, pass: Option<EntityId>, pass_owner: Option<EntityId>) -> bool {
        if let Some(pass) = pass {
            if model.entity == Some(pass) || model.owner == Some(pass) {
                return true;
            }
        }
        if let Some(owner) = pass_owner {
            if model.entity == Some(owner) || model.owner == Some(owner) {
                return true;
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // narrow phase

    /// Sweep a shape from `start` to `end` and report the first contact
    ///
    /// A `trm` of `None` sweeps a point. `pass` excludes that entity, its
    /// owner and everything either owns; [`EntityId::WORLD`] additionally
    /// skips the world geometry.
    pub fn translation(
        &mut self,
        start: Vec3,
        end: Vec3,
        trm: Option<&TraceModel>,
        trm_axis: &Quat,
        mask: Contents,
        pass: Option<EntityId>,
    ) -> TraceResult {
        self.stats.translations += 1;
        self.translation_impl(start, end, trm, trm_axis, mask, pass, true)
    }

    /// Like [`ClipWorld::translation`] but never clips against the world
    pub fn translation_entities(
        &mut self,
        start: Vec3,
        end: Vec3,
        trm: Option<&TraceModel>,
        trm_axis: &Quat,
        mask: Contents,
        pass: Option<EntityId>,
    ) -> TraceResult {
        self.stats.translations += 1;
        self.translation_impl(start, end, trm, trm_axis, mask, pass, false)
    }

    #[allow(clippy::too_many_arguments)]
    fn translation_impl(
        &mut self,
        start: Vec3,
        end: Vec3,
        trm: Option<&TraceModel>,
        trm_axis: &Quat,
        mask: Contents,
        pass: Option<EntityId>,
        clip_world: bool,
    ) -> TraceResult {
        let dir = end - start;
        if dir.norm() > self.config.max_trace_distance {
            // far beyond any legitimate frame of movement and numerically
            // hopeless; report fully blocked rather than trace garbage
            log::error!(
                "translation: huge translation of {:.0} units from ({:.1} {:.1} {:.1})",
                dir.norm(),
                start.x,
                start.y,
                start.z
            );
            return TraceResult::blocked_at(start, *trm_axis);
        }

        let mut results = if clip_world && pass != Some(EntityId::WORLD) {
            let mut world_trace = self.cm.translation(
                start,
                end,
                trm,
                trm_axis,
                mask,
                WORLD_HANDLE,
                Vec3::zeros(),
                &Quat::identity(),
            );
            if world_trace.blocked() {
                world_trace.contact.target = Some(HitTarget::World);
                if world_trace.blocked_at_start() {
                    return world_trace;
                }
            }
            world_trace
        } else {
            TraceResult::unobstructed(end, *trm_axis)
        };

        let trm_bounds = oriented_trm_bounds(trm, trm_axis);
        let radius = trm_bounds.radius();
        // gather only over the stretch the world geometry left reachable
        let trace_bounds =
            Bounds::from_bounds_translation(&trm_bounds, start, results.end_pos - start);

        // a sweep much longer than the shape is worth the pricier moving
        // query: the swept box would otherwise drown the leaves in
        // candidates the sweep never gets near
        let trm_size = trm_bounds.size();
        let swept_size = trace_bounds.size();
        let mut moving_query = false;
        for i in 0..3 {
            if dir[i].abs() > self.config.box_epsilon
                && swept_size[i] > 2.0 * trm_size[i] + self.config.box_epsilon
            {
                moving_query = true;
                break;
            }
        }

        let candidates: Vec<(ClipModelId, f32)> = if moving_query {
            self.models_touching_moving_bounds(&trace_bounds, &trm_bounds, start, dir, mask)
        } else {
            self.models_touching_bounds(&trace_bounds, mask)
                .into_iter()
                .map(|id| (id, 0.0))
                .collect()
        };
        debug_assert!(candidates.windows(2).all(|w| w[0].1 <= w[1].1));

        let pass_owner = self.pass_owner(pass);
        for &(cand, lower) in &candidates {
            // candidates are ordered by earliest possible contact; once the
            // best fraction beats a lower bound it beats all that follow
            if lower > 0.0 && lower >= results.fraction {
                break;
            }
            let Some(touch) = self.models.get(cand) else {
                continue;
            };
            if Self::is_filtered(touch, pass, pass_owner) {
                continue;
            }
            let shape = touch.shape;
            let material = touch.material;
            let entity = touch.entity;
            let clip_id = touch.id;
            let model_origin = touch.origin;
            let model_axis = touch.axis;
            let abs_bounds = touch.abs_bounds;

            if let ShapeRep::Render(handle) = shape {
                self.stats.render_model_traces += 1;
                let Some(render) = &self.render else {
                    continue;
                };
                if !abs_bounds.expand(radius).line_intersection(start, end) {
                    continue;
                }
                if let Some(hit) = render.model_trace(handle, start, end, radius) {
                    if hit.fraction < results.fraction {
                        results.fraction = hit.fraction;
                        results.end_pos = start + hit.fraction * dir;
                        results.end_axis = *trm_axis;
                        results.contact = ContactInfo {
                            kind: ContactKind::TrmVertex,
                            point: hit.point,
                            normal: hit.normal,
                            dist: hit.point.dot(&hit.normal),
                            contents: hit.contents,
                            material: hit.material,
                            model_feature: hit.joint,
                            trm_feature: 0,
                            target: Some(HitTarget::Entity {
                                entity: entity.unwrap_or(EntityId::WORLD),
                                clip_id,
                            }),
                        };
                    }
                }
                continue;
            }

            let Some(handle) = self.resolve_handle(cand, shape, material) else {
                continue;
            };
            let mut trace = self.cm.translation(
                start,
                end,
                trm,
                trm_axis,
                mask,
                handle,
                model_origin,
                &model_axis,
            );
            if trace.fraction < results.fraction {
                trace.contact.target = Some(HitTarget::Entity {
                    entity: entity.unwrap_or(EntityId::WORLD),
                    clip_id,
                });
                results = trace;
                if results.blocked_at_start() {
                    break;
                }
            }
        }
        results
    }

    /// Rotate a shape about a pivot and report the first contact
    ///
    /// Render-backed models cannot be rotated against and are skipped.
    pub fn rotation(
        &mut self,
        start: Vec3,
        rotation: &Rotation,
        trm: Option<&TraceModel>,
        trm_axis: &Quat,
        mask: Contents,
        pass: Option<EntityId>,
    ) -> TraceResult {
        self.stats.rotations += 1;
        self.rotation_impl(start, rotation, trm, trm_axis, mask, pass)
    }

    fn rotation_impl(
        &mut self,
        start: Vec3,
        rotation: &Rotation,
        trm: Option<&TraceModel>,
        trm_axis: &Quat,
        mask: Contents,
        pass: Option<EntityId>,
    ) -> TraceResult {
        let mut results = if pass != Some(EntityId::WORLD) {
            let mut world_trace = self.cm.rotation(
                start,
                rotation,
                trm,
                trm_axis,
                mask,
                WORLD_HANDLE,
                Vec3::zeros(),
                &Quat::identity(),
            );
            if world_trace.blocked() {
                world_trace.contact.target = Some(HitTarget::World);
                if world_trace.blocked_at_start() {
                    return world_trace;
                }
            }
            world_trace
        } else {
            TraceResult::unobstructed(start, rotation.to_quat() * *trm_axis)
        };

        let trace_bounds = match trm {
            None => Bounds::from_point_rotation(start, rotation),
            Some(trm) => Bounds::from_bounds_rotation(trm.bounds(), start, trm_axis, rotation),
        };

        let candidates = self.models_touching_bounds(&trace_bounds, mask);
        let pass_owner = self.pass_owner(pass);
        for cand in candidates {
            let Some(touch) = self.models.get(cand) else {
                continue;
            };
            if Self::is_filtered(touch, pass, pass_owner) {
                continue;
            }
            if touch.is_render_model() {
                continue;
            }
            let shape = touch.shape;
            let material = touch.material;
            let entity = touch.entity;
            let clip_id = touch.id;
            let model_origin = touch.origin;
            let model_axis = touch.axis;

            let Some(handle) = self.resolve_handle(cand, shape, material) else {
                continue;
            };
            let mut trace = self.cm.rotation(
                start,
                rotation,
                trm,
                trm_axis,
                mask,
                handle,
                model_origin,
                &model_axis,
            );
            if trace.fraction < results.fraction {
                trace.contact.target = Some(HitTarget::Entity {
                    entity: entity.unwrap_or(EntityId::WORLD),
                    clip_id,
                });
                results = trace;
                if results.blocked_at_start() {
                    break;
                }
            }
        }
        results
    }

    /// Translate to `end`, then rotate there
    ///
    /// The rotation pivot must sit at `end`; the rotation is evaluated at
    /// the point the translation actually reached. The reported fraction is
    /// the larger of the two sub-fractions, so a motion only counts as
    /// unobstructed when both parts completed.
    #[allow(clippy::too_many_arguments)]
    pub fn motion(
        &mut self,
        start: Vec3,
        end: Vec3,
        rotation: &Rotation,
        trm: Option<&TraceModel>,
        trm_axis: &Quat,
        mask: Contents,
        pass: Option<EntityId>,
    ) -> TraceResult {
        self.stats.motions += 1;

        if start == end {
            if rotation.angle() == 0.0 {
                // no motion at all, nothing to test
                return TraceResult::unobstructed(start, *trm_axis);
            }
            // pure rotation
            return self.rotation_impl(start, rotation, trm, trm_axis, mask, pass);
        }
        if rotation.angle() == 0.0 {
            // pure translation
            return self.translation_impl(start, end, trm, trm_axis, mask, pass, true);
        }
        debug_assert!(
            (rotation.origin() - end).norm() < 1e-3,
            "motion rotation must pivot on the translation end point"
        );

        let translational = self.translation_impl(start, end, trm, trm_axis, mask, pass, true);
        if translational.blocked_at_start() {
            return translational;
        }

        let mut end_rotation = *rotation;
        end_rotation.set_origin(translational.end_pos);
        let rotational = self.rotation_impl(
            translational.end_pos,
            &end_rotation,
            trm,
            trm_axis,
            mask,
            pass,
        );

        let mut results = if rotational.blocked() {
            rotational
        } else {
            let mut combined = translational;
            combined.end_axis = rotational.end_axis;
            combined
        };
        results.fraction = translational.fraction.max(rotational.fraction);
        results
    }

    /// Contact points of a shape at `start` pushed along `dir` up to `depth`
    #[allow(clippy::too_many_arguments)]
    pub fn contacts(
        &mut self,
        start: Vec3,
        dir: Vec3,
        depth: f32,
        trm: Option<&TraceModel>,
        trm_axis: &Quat,
        mask: Contents,
        pass: Option<EntityId>,
        max_contacts: usize,
    ) -> Vec<ContactInfo> {
        self.stats.contact_queries += 1;

        let mut contacts = Vec::new();
        if pass != Some(EntityId::WORLD) {
            let mut world_contacts = self.cm.contacts(
                start,
                dir,
                depth,
                trm,
                trm_axis,
                mask,
                WORLD_HANDLE,
                Vec3::zeros(),
                &Quat::identity(),
                max_contacts,
            );
            for contact in &mut world_contacts {
                contact.target = Some(HitTarget::World);
            }
            contacts = world_contacts;
        }

        let query_bounds = placed_trm_bounds(trm, trm_axis, start).expand(depth.abs());
        let candidates = self.models_touching_bounds(&query_bounds, mask);
        let pass_owner = self.pass_owner(pass);
        for cand in candidates {
            if contacts.len() >= max_contacts {
                break;
            }
            let Some(touch) = self.models.get(cand) else {
                continue;
            };
            if Self::is_filtered(touch, pass, pass_owner) {
                continue;
            }
            if touch.is_render_model() {
                continue;
            }
            let shape = touch.shape;
            let material = touch.material;
            let entity = touch.entity;
            let clip_id = touch.id;
            let model_origin = touch.origin;
            let model_axis = touch.axis;

            let Some(handle) = self.resolve_handle(cand, shape, material) else {
                continue;
            };
            let mut model_contacts = self.cm.contacts(
                start,
                dir,
                depth,
                trm,
                trm_axis,
                mask,
                handle,
                model_origin,
                &model_axis,
                max_contacts - contacts.len(),
            );
            for contact in &mut model_contacts {
                contact.target = Some(HitTarget::Entity {
                    entity: entity.unwrap_or(EntityId::WORLD),
                    clip_id,
                });
            }
            contacts.append(&mut model_contacts);
        }
        contacts.truncate(max_contacts);
        contacts
    }

    /// Union of the contents a shape placed at `start` overlaps
    pub fn contents(
        &mut self,
        start: Vec3,
        trm: Option<&TraceModel>,
        trm_axis: &Quat,
        mask: Contents,
        pass: Option<EntityId>,
    ) -> Contents {
        self.stats.contents_queries += 1;

        let mut accumulated = Contents::empty();
        if pass != Some(EntityId::WORLD) {
            accumulated |= self.cm.contents(
                start,
                trm,
                trm_axis,
                mask,
                WORLD_HANDLE,
                Vec3::zeros(),
                &Quat::identity(),
            );
        }

        let query_bounds = placed_trm_bounds(trm, trm_axis, start);
        let candidates = self.models_touching_bounds(&query_bounds, mask);
        let pass_owner = self.pass_owner(pass);
        for cand in candidates {
            let Some(touch) = self.models.get(cand) else {
                continue;
            };
            if Self::is_filtered(touch, pass, pass_owner) {
                continue;
            }
            if touch.is_render_model() {
                continue;
            }
            // nothing to learn from a candidate whose contents are already
            // fully accumulated
            if accumulated.contains(touch.contents) {
                continue;
            }
            let shape = touch.shape;
            let material = touch.material;
            let model_origin = touch.origin;
            let model_axis = touch.axis;

            let Some(handle) = self.resolve_handle(cand, shape, material) else {
                continue;
            };
            accumulated |= self.cm.contents(
                start,
                trm,
                trm_axis,
                mask,
                handle,
                model_origin,
                &model_axis,
            );
        }
        accumulated
    }

    // ------------------------------------------------------------------
    // direct-model queries

    /// Translation against one explicit model, bypassing the broad phase
    #[allow(clippy::too_many_arguments)]
    pub fn translation_model(
        &mut self,
        start: Vec3,
        end: Vec3,
        trm: Option<&TraceModel>,
        trm_axis: &Quat,
        mask: Contents,
        model: CollisionHandle,
        model_origin: Vec3,
        model_axis: &Quat,
    ) -> TraceResult {
        self.stats.translations += 1;
        self.cm.translation(
            start, end, trm, trm_axis, mask, model, model_origin, model_axis,
        )
    }

    /// Rotation against one explicit model, bypassing the broad phase
    #[allow(clippy::too_many_arguments)]
    pub fn rotation_model(
        &mut self,
        start: Vec3,
        rotation: &Rotation,
        trm: Option<&TraceModel>,
        trm_axis: &Quat,
        mask: Contents,
        model: CollisionHandle,
        model_origin: Vec3,
        model_axis: &Quat,
    ) -> TraceResult {
        self.stats.rotations += 1;
        self.cm.rotation(
            start, rotation, trm, trm_axis, mask, model, model_origin, model_axis,
        )
    }

    /// Contacts against one explicit model, bypassing the broad phase
    #[allow(clippy::too_many_arguments)]
    pub fn contacts_model(
        &mut self,
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
    ) -> Vec<ContactInfo> {
        self.stats.contact_queries += 1;
        self.cm.contacts(
            start,
            dir,
            depth,
            trm,
            trm_axis,
            mask,
            model,
            model_origin,
            model_axis,
            max_contacts,
        )
    }

    /// Contents of one explicit model, bypassing the broad phase
    pub fn contents_model(
        &mut self,
        start: Vec3,
        trm: Option<&TraceModel>,
        trm_axis: &Quat,
        mask: Contents,
        model: CollisionHandle,
        model_origin: Vec3,
        model_axis: &Quat,
    ) -> Contents {
        self.stats.contents_queries += 1;
        self.cm.contents(
            start, trm, trm_axis, mask, model, model_origin, model_axis,
        )
    }

    fn resolve_handle(
        &mut self,
        id: ClipModelId,
        shape: ShapeRep,
        material: Option<MaterialId>,
    ) -> Option<CollisionHandle> {
        match shape {
            ShapeRep::Collision(handle) => Some(handle),
            ShapeRep::Trace(index) => {
                let Some(trm) = self.cache.get(index) else {
                    log::warn!("clip model {id:?} references stale trace model {index}");
                    return None;
                };
                Some(self.cm.setup_trace_model(trm, material))
            }
            ShapeRep::None => {
                log::warn!("clip model {id:?} has no shape, using default box");
                let trm = self.cache.get(self.default_shape)?;
                Some(self.cm.setup_trace_model(trm, material))
            }
            ShapeRep::Render(_) => None,
        }
    }

    // ------------------------------------------------------------------
    // contact features

    /// World-space winding of the geometric feature behind a contact
    ///
    /// Edges yield two points, vertices one, polygons their full outline.
    /// Used for contact visualization and friction anchoring.
    pub fn model_contact_feature(
        &mut self,
        contact: &ContactInfo,
        model: Option<ClipModelId>,
    ) -> Option<Vec<Vec3>> {
        let (handle, origin, axis) = match model {
            None => (WORLD_HANDLE, Vec3::zeros(), Quat::identity()),
            Some(id) => {
                let (shape, material, origin, axis) = {
                    let model = self.models.get(id)?;
                    (model.shape, model.material, model.origin, model.axis)
                };
                let handle = self.resolve_handle(id, shape, material)?;
                (handle, origin, axis)
            }
        };

        let local: Vec<Vec3> = match contact.kind {
            ContactKind::None => return None,
            ContactKind::Edge => {
                let (a, b) = self.cm.model_edge(handle, contact.model_feature)?;
                vec![a, b]
            }
            ContactKind::ModelVertex => {
                vec![self.cm.model_vertex(handle, contact.model_feature)?]
            }
            ContactKind::TrmVertex => self.cm.model_polygon(handle, contact.model_feature)?,
        };

        Some(
            local
                .into_iter()
                .map(|point| origin + axis * point)
                .collect(),
        )
    }

    // ------------------------------------------------------------------
    // persistence

    /// Serializable image of the trace-model cache
    pub fn cache_snapshot(&self) -> TraceModelCacheSnapshot {
        self.cache.snapshot()
    }

    /// Replace the trace-model cache from a snapshot
    ///
    /// Must happen before any model is restored; restored models re-acquire
    /// their cache references.
    pub fn restore_cache(&mut self, snapshot: TraceModelCacheSnapshot) {
        self.cache.restore(snapshot);
    }

    /// Serializable image of one clip model
    pub fn model_state(&self, id: ClipModelId) -> Option<ClipModelState> {
        let model = self.models.get(id)?;
        let shape = match model.shape {
            ShapeRep::None => ShapeState::None,
            ShapeRep::Trace(index) => ShapeState::Trace(index),
            ShapeRep::Collision(handle) => match self.cm.model_name(handle) {
                Some(name) => ShapeState::Collision {
                    name,
                    skin: model.skin.clone(),
                },
                None => {
                    log::warn!("model_state: collision handle {handle} has no name, not saved");
                    ShapeState::None
                }
            },
            ShapeRep::Render(handle) => ShapeState::Render(handle),
        };
        Some(ClipModelState {
            enabled: model.enabled,
            entity: model.entity.map(|e| e.0),
            id: model.id,
            owner: model.owner.map(|e| e.0),
            origin: model.origin,
            axis: model.axis,
            contents: model.contents.bits(),
            shape,
            linked: model.is_linked(),
        })
    }

    /// Recreate a clip model from a saved state, relinking it if it was
    /// linked when saved
    pub fn restore_model(&mut self, state: ClipModelState) -> Result<ClipModelId, ClipError> {
        let (shape, bounds, skin) = match state.shape {
            ShapeState::None => (ShapeRep::None, Bounds::cleared(), None),
            ShapeState::Trace(index) => {
                let bounds = *self
                    .cache
                    .get(index)
                    .ok_or(ClipError::InvalidTraceModelIndex {
                        index: index.index(),
                        len: self.cache.len(),
                    })?
                    .bounds();
                self.cache.retain(index);
                (ShapeRep::Trace(index), bounds, None)
            }
            ShapeState::Collision { name, skin } => {
                let handle = self
                    .cm
                    .load_model(&name, skin.as_deref())
                    .ok_or(ClipError::ModelNotFound(name))?;
                (
                    ShapeRep::Collision(handle),
                    self.cm.model_bounds(handle),
                    skin,
                )
            }
            ShapeState::Render(handle) => (ShapeRep::Render(handle), Bounds::cleared(), None),
        };

        let id = self.models.insert(ClipModel {
            enabled: state.enabled,
            owner: state.owner.map(EntityId),
            origin: state.origin,
            axis: state.axis,
            bounds,
            contents: Contents::from_bits_truncate(state.contents),
            shape,
            skin,
            ..ClipModel::default()
        });
        if state.linked {
            self.link(
                id,
                state.entity.map(EntityId),
                state.id,
                state.origin,
                state.axis,
            );
        } else if let Some(entity) = state.entity {
            self.models[id].entity = Some(EntityId(entity));
            self.entity_models
                .entry(EntityId(entity))
                .or_default()
                .push(id);
        }
        Ok(id)
    }

    // ------------------------------------------------------------------
    // lifecycle, statistics, debugging

    /// Drop every model, link and cached shape (level unload)
    pub fn clear(&mut self) {
        let ids: Vec<ClipModelId> = self.models.keys().collect();
        for id in ids {
            self.unlink(id);
        }
        self.models.clear();
        self.entity_models.clear();
        self.cache.clear();
        self.default_shape = self.cache.acquire(&TraceModel::from_bounds(
            Bounds::zero().expand(DEFAULT_MODEL_EXTENT),
        ));
        self.epoch = 0;
        self.stats = ClipStatistics::default();
    }

    /// Query counters since the last reset
    pub fn statistics(&self) -> &ClipStatistics {
        &self.stats
    }

    /// Zero the query counters (start of frame)
    pub fn reset_statistics(&mut self) {
        self.stats = ClipStatistics::default();
    }

    /// Log the per-frame counters and resident sizes
    pub fn log_statistics(&self) {
        log::debug!(
            "t = {}, r = {}, m = {}, render = {}, contents = {}, contacts = {}",
            self.stats.translations,
            self.stats.rotations,
            self.stats.motions,
            self.stats.render_model_traces,
            self.stats.contents_queries,
            self.stats.contact_queries
        );
        log::debug!(
            "{} clip models, {} sector links, {} cached trace models ({} bytes)",
            self.models.len(),
            self.links.len(),
            self.cache.len(),
            self.cache.size_bytes()
        );
    }

    /// Draw the bounds of every linked model within `radius` of the viewer
    pub fn draw_models(&self, debug: &mut dyn DebugRenderService, view_origin: Vec3, radius: f32) {
        let view_bounds = Bounds::from_point(view_origin).expand(radius);
        for model in self.models.values() {
            if !model.is_linked() || model.is_render_model() {
                continue;
            }
            if !model.abs_bounds.intersects(&view_bounds) {
                continue;
            }
            debug.debug_bounds(&model.abs_bounds);
            if let Some(entity) = model.entity {
                debug.draw_text(
                    &format!("{}:{}", entity.0, model.id),
                    model.abs_bounds.center(),
                );
            }
        }
    }

    /// Draw the winding of a contact's geometric feature
    pub fn draw_contact_feature(
        &mut self,
        contact: &ContactInfo,
        model: Option<ClipModelId>,
        debug: &mut dyn DebugRenderService,
    ) {
        let Some(winding) = self.model_contact_feature(contact, model) else {
            return;
        };
        match winding.as_slice() {
            [] => {}
            [point] => {
                debug.debug_bounds(&Bounds::from_point(*point).expand(1.0));
            }
            points => {
                for pair in points.windows(2) {
                    debug.debug_line(pair[0], pair[1]);
                }
                if points.len() > 2 {
                    debug.debug_line(points[points.len() - 1], points[0]);
                }
            }
        }
        debug.debug_line(contact.point, contact.point + 5.0 * contact.normal);
    }
}

/// Local bounds of a shape under its orientation, still relative to its
/// position
fn oriented_trm_bounds(trm: Option<&TraceModel>, trm_axis: &Quat) -> Bounds {
    match trm {
        None => Bounds::zero(),
        Some(trm) if is_identity(trm_axis) => *trm.bounds(),
        Some(trm) => Bounds::from_transformed_bounds(trm.bounds(), Vec3::zeros(), trm_axis),
    }
}

/// World bounds of a shape placed at `start` with orientation `trm_axis`
fn placed_trm_bounds(trm: Option<&TraceModel>, trm_axis: &Quat, start: Vec3) -> Bounds {
    match trm {
        None => Bounds::from_point(start),
        Some(trm) if is_identity(trm_axis) => Bounds::new(
            trm.bounds().min + start,
            trm.bounds().max + start,
        ),
        Some(trm) => Bounds::from_transformed_bounds(trm.bounds(), start, trm_axis),
    }
}
