//! Static spatial partition tree for broad-phase culling
//!
//! The world bounds are bisected recursively along the locally longest axis
//! down to a fixed depth, giving a balanced binary tree that is built once
//! and never rebalanced. Leaves hold intrusive lists of link entries; a model
//! whose bounds straddle a splitting plane is linked into every leaf it
//! overlaps, and the same entries are threaded onto the model's own list so
//! unlinking is a single pass.
//!
//! Nodes live in a flat arena addressed by index and link entries come from
//! a block pool, so there are no pointers to dangle.

use slotmap::SlotMap;

use crate::clip::contents::Contents;
use crate::clip::model::{ClipModel, ClipModelId};
use crate::foundation::math::{moving_bounds_intersect_bounds, Bounds, Vec3};
use crate::foundation::memory::{BlockPool, NIL};

/// Entry joining a clip model to one tree leaf
///
/// Doubly linked within the leaf, singly linked along the owning model.
#[derive(Debug)]
pub(crate) struct ClipLink {
    pub model: ClipModelId,
    pub sector: u32,
    pub prev_in_sector: u32,
    pub next_in_sector: u32,
    pub next_model_link: u32,
}

#[derive(Debug, Clone, Copy)]
enum SectorKind {
    Split {
        axis: usize,
        dist: f32,
        children: [u32; 2],
    },
    Leaf,
}

#[derive(Debug)]
struct Sector {
    kind: SectorKind,
    /// Head of the leaf's link list; unused on split nodes
    first_link: u32,
}

/// The precomputed partition tree over the world bounds
#[derive(Debug)]
pub(crate) struct SectorTree {
    nodes: Vec<Sector>,
    world_bounds: Bounds,
}

struct MovingQuery<'a> {
    bounds: Bounds,
    mask: Contents,
    max_count: usize,
    epoch: u32,
    start: Vec3,
    inv_dir: Vec3,
    extent: Vec3,
    out: &'a mut Vec<(ClipModelId, f32)>,
    truncated: bool,
}

impl SectorTree {
    /// Build the full tree for the given world bounds
    pub fn build(world_bounds: Bounds, max_depth: u32) -> Self {
        let capacity = (1usize << (max_depth + 1)) - 1;
        let mut nodes = Vec::with_capacity(capacity);
        let mut max_leaf = Vec3::zeros();
        build_r(&mut nodes, 0, max_depth, &world_bounds, &mut max_leaf);
        debug_assert_eq!(nodes.len(), capacity);

        let size = world_bounds.size();
        log::info!(
            "world bounds are ({:.1}, {:.1}, {:.1}), max clip sector is ({:.1}, {:.1}, {:.1})",
            size.x,
            size.y,
            size.z,
            max_leaf.x,
            max_leaf.y,
            max_leaf.z
        );

        Self {
            nodes,
            world_bounds,
        }
    }

    /// Bounds the tree was built over
    pub fn world_bounds(&self) -> &Bounds {
        &self.world_bounds
    }

    /// Total node count
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Insert a model into every leaf its absolute bounds overlap
    ///
    /// The model's absolute bounds must already be up to date.
    pub fn link_model(
        &mut self,
        links: &mut BlockPool<ClipLink>,
        models: &mut SlotMap<ClipModelId, ClipModel>,
        id: ClipModelId,
    ) {
        let abs_bounds = models[id].abs_bounds;
        self.link_r(0, links, models, id, &abs_bounds);
    }

    fn link_r(
        &mut self,
        node: u32,
        links: &mut BlockPool<ClipLink>,
        models: &mut SlotMap<ClipModelId, ClipModel>,
        id: ClipModelId,
        abs_bounds: &Bounds,
    ) {
        let mut node = node;
        loop {
            let kind = self.nodes[node as usize].kind;
            match kind {
                SectorKind::Split {
                    axis,
                    dist,
                    children,
                } => {
                    if abs_bounds.min[axis] > dist {
                        node = children[0];
                    } else if abs_bounds.max[axis] < dist {
                        node = children[1];
                    } else {
                        self.link_r(children[0], links, models, id, abs_bounds);
                        node = children[1];
                    }
                }
                SectorKind::Leaf => break,
            }
        }

        let model = &mut models[id];
        let sector_head = self.nodes[node as usize].first_link;
        let handle = links.alloc(ClipLink {
            model: id,
            sector: node,
            prev_in_sector: NIL,
            next_in_sector: sector_head,
            next_model_link: model.link_head,
        });
        if let Some(old_head) = links.get_mut(sector_head) {
            old_head.prev_in_sector = handle;
        }
        self.nodes[node as usize].first_link = handle;
        model.link_head = handle;
    }

    /// Remove all of a model's link entries; a no-op when already unlinked
    pub fn unlink_model(
        &mut self,
        links: &mut BlockPool<ClipLink>,
        models: &mut SlotMap<ClipModelId, ClipModel>,
        id: ClipModelId,
    ) {
        let Some(model) = models.get_mut(id) else {
            return;
        };
        let mut head = model.link_head;
        model.link_head = NIL;

        while head != NIL {
            let Some(link) = links.free(head) else {
                log::warn!("clip link list of model {id:?} was corrupt, aborting unlink");
                return;
            };
            if link.prev_in_sector != NIL {
                if let Some(prev) = links.get_mut(link.prev_in_sector) {
                    prev.next_in_sector = link.next_in_sector;
                }
            } else {
                self.nodes[link.sector as usize].first_link = link.next_in_sector;
            }
            if link.next_in_sector != NIL {
                if let Some(next) = links.get_mut(link.next_in_sector) {
                    next.prev_in_sector = link.prev_in_sector;
                }
            }
            head = link.next_model_link;
        }
    }

    /// The set of leaves a model is currently linked into
    #[cfg(test)]
    pub fn sectors_of(
        &self,
        links: &BlockPool<ClipLink>,
        models: &SlotMap<ClipModelId, ClipModel>,
        id: ClipModelId,
    ) -> Vec<u32> {
        let mut sectors = Vec::new();
        let Some(model) = models.get(id) else {
            return sectors;
        };
        let mut head = model.link_head;
        while head != NIL {
            let Some(link) = links.get(head) else {
                break;
            };
            sectors.push(link.sector);
            head = link.next_model_link;
        }
        sectors.sort_unstable();
        sectors
    }

    /// Collect enabled, content-matching models whose absolute bounds
    /// overlap `bounds`
    ///
    /// `epoch` must be fresh for this query; models already stamped with it
    /// are skipped, which deduplicates models spanning several leaves in
    /// O(1) per encounter.
    pub fn models_touching_bounds(
        &self,
        links: &BlockPool<ClipLink>,
        models: &mut SlotMap<ClipModelId, ClipModel>,
        epoch: u32,
        bounds: &Bounds,
        mask: Contents,
        max_count: usize,
        out: &mut Vec<ClipModelId>,
    ) {
        let mut truncated = false;
        self.static_query_r(
            0, links, models, epoch, bounds, mask, max_count, out, &mut truncated,
        );
        if truncated {
            log::warn!("clip models touching bounds: max count ({max_count}) reached");
        }
    }

    fn static_query_r(
        &self,
        node: u32,
        links: &BlockPool<ClipLink>,
        models: &mut SlotMap<ClipModelId, ClipModel>,
        epoch: u32,
        bounds: &Bounds,
        mask: Contents,
        max_count: usize,
        out: &mut Vec<ClipModelId>,
        truncated: &mut bool,
    ) {
        let mut node = node;
        loop {
            let kind = self.nodes[node as usize].kind;
            match kind {
                SectorKind::Split {
                    axis,
                    dist,
                    children,
                } => {
                    if bounds.min[axis] > dist {
                        node = children[0];
                    } else if bounds.max[axis] < dist {
                        node = children[1];
                    } else {
                        self.static_query_r(
                            children[0],
                            links,
                            models,
                            epoch,
                            bounds,
                            mask,
                            max_count,
                            out,
                            truncated,
                        );
                        node = children[1];
                    }
                }
                SectorKind::Leaf => break,
            }
        }

        let mut head = self.nodes[node as usize].first_link;
        while head != NIL {
            let Some(link) = links.get(head) else {
                break;
            };
            head = link.next_in_sector;

            let Some(check) = models.get_mut(link.model) else {
                continue;
            };
            if !check.enabled {
                continue;
            }
            // avoid duplicates across the leaves a large model spans
            if check.touch_count == epoch {
                continue;
            }
            if !check.contents.intersects(mask) {
                continue;
            }
            if !check.abs_bounds.intersects(bounds) {
                continue;
            }

            if out.len() >= max_count {
                *truncated = true;
                return;
            }

            check.touch_count = epoch;
            out.push(link.model);
        }
    }

    /// Collect models overlapped by a box sweeping from `start` along the
    /// direction whose reciprocal is `inv_dir`, thickened by `extent`
    ///
    /// Output pairs carry a lower bound on the fraction of first possible
    /// overlap and are sorted ascending by it, so the narrow phase can stop
    /// as soon as its best fraction beats every remaining lower bound.
    pub fn models_touching_moving_bounds(
        &self,
        links: &BlockPool<ClipLink>,
        models: &mut SlotMap<ClipModelId, ClipModel>,
        epoch: u32,
        bounds: &Bounds,
        start: Vec3,
        inv_dir: Vec3,
        extent: Vec3,
        mask: Contents,
        max_count: usize,
        out: &mut Vec<(ClipModelId, f32)>,
    ) {
        let mut query = MovingQuery {
            bounds: *bounds,
            mask,
            max_count,
            epoch,
            start,
            inv_dir,
            extent,
            out,
            truncated: false,
        };
        let huge = 1e10f32;
        let mut node_bounds = Bounds::new(
            Vec3::new(-huge, -huge, -huge),
            Vec3::new(huge, huge, huge),
        );
        self.moving_query_r(0, &mut node_bounds, links, models, &mut query);
        if query.truncated {
            log::warn!("clip models touching moving bounds: max count ({max_count}) reached");
        }

        // sort candidates by lower bound on intersection time; the
        // narrow-phase early-out depends on this ordering
        query
            .out
            .sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    }

    fn moving_query_r(
        &self,
        node: u32,
        node_bounds: &mut Bounds,
        links: &BlockPool<ClipLink>,
        models: &mut SlotMap<ClipModelId, ClipModel>,
        query: &mut MovingQuery<'_>,
    ) {
        let mut range = [0.0f32, 1.0f32];
        if !moving_bounds_intersect_bounds(
            query.start,
            query.inv_dir,
            query.extent,
            node_bounds,
            &mut range,
        ) {
            return;
        }

        let kind = self.nodes[node as usize].kind;
        match kind {
            SectorKind::Split {
                axis,
                dist,
                children,
            } => {
                // narrow the working bounds in place, restore on return
                if query.bounds.min[axis] <= dist {
                    let old = node_bounds.max[axis];
                    node_bounds.max[axis] = dist;
                    self.moving_query_r(children[1], node_bounds, links, models, query);
                    node_bounds.max[axis] = old;
                }
                if query.bounds.max[axis] >= dist {
                    let old = node_bounds.min[axis];
                    node_bounds.min[axis] = dist;
                    self.moving_query_r(children[0], node_bounds, links, models, query);
                    node_bounds.min[axis] = old;
                }
            }
            SectorKind::Leaf => {
                let mut head = self.nodes[node as usize].first_link;
                while head != NIL {
                    let Some(link) = links.get(head) else {
                        break;
                    };
                    head = link.next_in_sector;

                    let Some(check) = models.get_mut(link.model) else {
                        continue;
                    };
                    if !check.enabled {
                        continue;
                    }
                    if check.touch_count == query.epoch {
                        continue;
                    }
                    if !check.contents.intersects(query.mask) {
                        continue;
                    }
                    if !check.abs_bounds.intersects(&query.bounds) {
                        continue;
                    }

                    let mut hit_range = [0.0f32, 1.0f32];
                    if !moving_bounds_intersect_bounds(
                        query.start,
                        query.inv_dir,
                        query.extent,
                        &check.abs_bounds,
                        &mut hit_range,
                    ) {
                        continue;
                    }

                    if query.out.len() >= query.max_count {
                        query.truncated = true;
                        return;
                    }

                    check.touch_count = query.epoch;
                    query.out.push((link.model, hit_range[0]));
                }
            }
        }
    }
}

fn build_r(
    nodes: &mut Vec<Sector>,
    depth: u32,
    max_depth: u32,
    bounds: &Bounds,
    max_leaf: &mut Vec3,
) -> u32 {
    let index = nodes.len() as u32;
    nodes.push(Sector {
        kind: SectorKind::Leaf,
        first_link: NIL,
    });

    if depth == max_depth {
        *max_leaf = max_leaf.sup(&bounds.size());
        return index;
    }

    let size = bounds.size();
    let axis = if size.x >= size.y && size.x >= size.z {
        0
    } else if size.y >= size.x && size.y >= size.z {
        1
    } else {
        2
    };
    let dist = 0.5 * (bounds.max[axis] + bounds.min[axis]);

    let mut front = *bounds;
    let mut back = *bounds;
    front.min[axis] = dist;
    back.max[axis] = dist;

    let children = [
        build_r(nodes, depth + 1, max_depth, &front, max_leaf),
        build_r(nodes, depth + 1, max_depth, &back, max_leaf),
    ];
    nodes[index as usize].kind = SectorKind::Split {
        axis,
        dist,
        children,
    };
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Quat;

    fn world() -> Bounds {
        Bounds::new(
            Vec3::new(-128.0, -128.0, -128.0),
            Vec3::new(128.0, 128.0, 128.0),
        )
    }

    fn add_model(
        models: &mut SlotMap<ClipModelId, ClipModel>,
        min: Vec3,
        max: Vec3,
    ) -> ClipModelId {
        models.insert(ClipModel {
            bounds: Bounds::new(min, max),
            abs_bounds: Bounds::new(min, max),
            axis: Quat::identity(),
            ..ClipModel::default()
        })
    }

    #[test]
    fn test_node_count_matches_depth() {
        let tree = SectorTree::build(world(), 4);
        assert_eq!(tree.num_nodes(), (1 << 5) - 1);
    }

    #[test]
    fn test_straddling_model_links_multiple_leaves() {
        let mut tree = SectorTree::build(world(), 3);
        let mut links = BlockPool::new(64);
        let mut models = SlotMap::with_key();

        let id = add_model(
            &mut models,
            Vec3::new(-10.0, -10.0, -10.0),
            Vec3::new(10.0, 10.0, 10.0),
        );
        tree.link_model(&mut links, &mut models, id);
        // a box straddling the root split of every level reaches all 8 leaves
        assert_eq!(tree.sectors_of(&links, &models, id).len(), 8);
        assert!(models[id].is_linked());

        tree.unlink_model(&mut links, &mut models, id);
        assert!(!models[id].is_linked());
        assert!(links.is_empty());
    }

    #[test]
    fn test_unlink_relink_reproduces_membership() {
        let mut tree = SectorTree::build(world(), 5);
        let mut links = BlockPool::new(64);
        let mut models = SlotMap::with_key();

        let id = add_model(
            &mut models,
            Vec3::new(3.0, -40.0, 17.0),
            Vec3::new(55.0, -2.0, 60.0),
        );
        tree.link_model(&mut links, &mut models, id);
        let before = tree.sectors_of(&links, &models, id);
        tree.unlink_model(&mut links, &mut models, id);
        tree.link_model(&mut links, &mut models, id);
        assert_eq!(before, tree.sectors_of(&links, &models, id));
    }

    #[test]
    fn test_static_query_deduplicates_spanning_model() {
        let mut tree = SectorTree::build(world(), 3);
        let mut links = BlockPool::new(64);
        let mut models = SlotMap::with_key();

        let id = add_model(
            &mut models,
            Vec3::new(-10.0, -10.0, -10.0),
            Vec3::new(10.0, 10.0, 10.0),
        );
        tree.link_model(&mut links, &mut models, id);

        let mut out = Vec::new();
        tree.models_touching_bounds(
            &links,
            &mut models,
            1,
            &world(),
            Contents::all(),
            64,
            &mut out,
        );
        assert_eq!(out, vec![id]);
    }

    #[test]
    fn test_static_query_respects_mask_and_enabled() {
        let mut tree = SectorTree::build(world(), 3);
        let mut links = BlockPool::new(64);
        let mut models = SlotMap::with_key();

        let a = add_model(&mut models, Vec3::new(-5.0, 0.0, 0.0), Vec3::new(5.0, 5.0, 5.0));
        let b = add_model(&mut models, Vec3::new(-5.0, 0.0, 0.0), Vec3::new(5.0, 5.0, 5.0));
        models[b].contents = Contents::WATER;
        let c = add_model(&mut models, Vec3::new(-5.0, 0.0, 0.0), Vec3::new(5.0, 5.0, 5.0));
        models[c].enabled = false;
        for id in [a, b, c] {
            tree.link_model(&mut links, &mut models, id);
        }

        let mut out = Vec::new();
        tree.models_touching_bounds(
            &links,
            &mut models,
            1,
            &world(),
            Contents::BODY,
            64,
            &mut out,
        );
        assert_eq!(out, vec![a]);
    }

    #[test]
    fn test_query_truncates_at_capacity() {
        let mut tree = SectorTree::build(world(), 2);
        let mut links = BlockPool::new(64);
        let mut models = SlotMap::with_key();

        for i in 0..10 {
            let offset = i as f32;
            let id = add_model(
                &mut models,
                Vec3::new(offset, 0.0, 0.0),
                Vec3::new(offset + 0.5, 1.0, 1.0),
            );
            tree.link_model(&mut links, &mut models, id);
        }

        let mut out = Vec::new();
        tree.models_touching_bounds(
            &links,
            &mut models,
            1,
            &world(),
            Contents::all(),
            4,
            &mut out,
        );
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_moving_query_orders_by_lower_bound() {
        let mut tree = SectorTree::build(world(), 4);
        let mut links = BlockPool::new(64);
        let mut models = SlotMap::with_key();

        // two blockers along +x; the farther one must sort last
        let near = add_model(
            &mut models,
            Vec3::new(20.0, -5.0, -5.0),
            Vec3::new(25.0, 5.0, 5.0),
        );
        let far = add_model(
            &mut models,
            Vec3::new(80.0, -5.0, -5.0),
            Vec3::new(85.0, 5.0, 5.0),
        );
        tree.link_model(&mut links, &mut models, far);
        tree.link_model(&mut links, &mut models, near);

        let start = Vec3::new(-100.0, 0.0, 0.0);
        let end = Vec3::new(100.0, 0.0, 0.0);
        let sweep = Bounds::from_bounds_translation(
            &Bounds::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0)),
            start,
            end - start,
        );
        let mut out = Vec::new();
        tree.models_touching_moving_bounds(
            &links,
            &mut models,
            1,
            &sweep,
            start,
            crate::foundation::math::inverse_direction(end - start),
            Vec3::new(1.0, 1.0, 1.0),
            Contents::all(),
            64,
            &mut out,
        );

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, near);
        assert_eq!(out[1].0, far);
        assert!(out[0].1 < out[1].1);
        // lower bounds are genuine lower bounds on first contact
        assert!(out[0].1 > 0.0 && out[0].1 < 1.0);
    }

    #[test]
    fn test_moving_query_with_zero_travel_matches_static() {
        let mut tree = SectorTree::build(world(), 4);
        let mut links = BlockPool::new(64);
        let mut models = SlotMap::with_key();

        let a = add_model(
            &mut models,
            Vec3::new(-4.0, -4.0, -4.0),
            Vec3::new(4.0, 4.0, 4.0),
        );
        let b = add_model(
            &mut models,
            Vec3::new(50.0, 50.0, 50.0),
            Vec3::new(60.0, 60.0, 60.0),
        );
        tree.link_model(&mut links, &mut models, a);
        tree.link_model(&mut links, &mut models, b);

        let query_bounds = Bounds::new(Vec3::new(-2.0, -2.0, -2.0), Vec3::new(2.0, 2.0, 2.0));
        let mut static_out = Vec::new();
        tree.models_touching_bounds(
            &links,
            &mut models,
            1,
            &query_bounds,
            Contents::all(),
            64,
            &mut static_out,
        );

        let mut moving_out = Vec::new();
        tree.models_touching_moving_bounds(
            &links,
            &mut models,
            2,
            &query_bounds,
            Vec3::zeros(),
            crate::foundation::math::inverse_direction(Vec3::zeros()),
            Vec3::new(2.0, 2.0, 2.0),
            Contents::all(),
            64,
            &mut moving_out,
        );

        let moving_ids: Vec<_> = moving_out.iter().map(|(id, _)| *id).collect();
        assert_eq!(static_out, moving_ids);
    }
}
