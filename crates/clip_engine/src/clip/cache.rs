//! Shared trace-model cache
//!
//! Many objects use the same handful of procedural shapes, so shapes are
//! deduplicated by structural hash and reference counted. Mass properties
//! are computed once per unique shape. Releasing a reference never frees the
//! entry; the cache only shrinks on an explicit clear (level unload), which
//! keeps moderate churn from thrashing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::clip::trace_model::{MassProperties, TraceModel};
use crate::clip::ClipError;
use crate::foundation::math::{Mat3, Vec3};

/// Stable index of a cached trace model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceModelIndex(pub(crate) usize);

impl TraceModelIndex {
    /// Raw position in the cache, for diagnostics
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for TraceModelIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    model: TraceModel,
    ref_count: u32,
    mass: MassProperties,
}

/// Serializable image of the cache for save/load
///
/// Reference counts are not stored; restoring resets them to zero and each
/// restored clip model re-acquires its index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceModelCacheSnapshot {
    entries: Vec<(TraceModel, MassProperties)>,
}

/// Deduplicating, reference-counted store of procedural shapes
#[derive(Debug, Default)]
pub struct TraceModelCache {
    entries: Vec<CacheEntry>,
    buckets: HashMap<u32, Vec<usize>>,
}

impl TraceModelCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the index for a shape, reusing an existing entry when a
    /// structurally equal shape is already cached
    ///
    /// Bumps the entry's reference count. Hash collisions fall back to full
    /// structural comparison, so two distinct shapes never alias.
    pub fn acquire(&mut self, model: &TraceModel) -> TraceModelIndex {
        let key = model.hash_key();
        if let Some(bucket) = self.buckets.get(&key) {
            for &index in bucket {
                if self.entries[index].model == *model {
                    self.entries[index].ref_count += 1;
                    return TraceModelIndex(index);
                }
            }
        }

        let index = self.entries.len();
        self.entries.push(CacheEntry {
            model: model.clone(),
            ref_count: 1,
            mass: model.mass_properties(),
        });
        self.buckets.entry(key).or_default().push(index);
        TraceModelIndex(index)
    }

    /// Bump the reference count of an existing entry (save/load restore path)
    pub fn retain(&mut self, index: TraceModelIndex) {
        if let Some(entry) = self.entries.get_mut(index.0) {
            entry.ref_count += 1;
        } else {
            log::warn!("trace model cache: retain of invalid index {index}");
        }
    }

    /// Drop a reference; the entry stays resident for future reuse
    pub fn release(&mut self, index: TraceModelIndex) {
        let Some(entry) = self.entries.get_mut(index.0) else {
            log::warn!(
                "trace model cache: release of index {index} out of range (0..{})",
                self.entries.len()
            );
            return;
        };
        if entry.ref_count == 0 {
            log::warn!("trace model cache: tried to release uncached trace model (index={index})");
            return;
        }
        entry.ref_count -= 1;
    }

    /// Read-only access to a cached shape
    pub fn get(&self, index: TraceModelIndex) -> Option<&TraceModel> {
        self.entries.get(index.0).map(|entry| &entry.model)
    }

    /// Reference count of an entry, if it exists
    pub fn ref_count(&self, index: TraceModelIndex) -> Option<u32> {
        self.entries.get(index.0).map(|entry| entry.ref_count)
    }

    /// Mass, center of mass and inertia tensor of a cached shape at the
    /// given density
    ///
    /// Asking for mass properties of an index that holds no real shape is a
    /// programming error and is reported, not recovered.
    pub fn mass_properties(
        &self,
        index: TraceModelIndex,
        density: f32,
    ) -> Result<(f32, Vec3, Mat3), ClipError> {
        let entry = self
            .entries
            .get(index.0)
            .ok_or(ClipError::InvalidTraceModelIndex {
                index: index.0,
                len: self.entries.len(),
            })?;
        Ok((
            entry.mass.volume * density,
            entry.mass.center_of_mass,
            entry.mass.inertia_tensor * density,
        ))
    }

    /// Number of distinct cached shapes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Approximate resident size of the cached shape data
    pub fn size_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| {
                std::mem::size_of::<CacheEntry>()
                    + entry.model.verts().len() * std::mem::size_of::<Vec3>()
            })
            .sum()
    }

    /// Drop every entry (level unload)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.buckets.clear();
    }

    /// Serializable image of all entries, mass properties included
    pub fn snapshot(&self) -> TraceModelCacheSnapshot {
        TraceModelCacheSnapshot {
            entries: self
                .entries
                .iter()
                .map(|entry| (entry.model.clone(), entry.mass))
                .collect(),
        }
    }

    /// Replace the cache contents from a snapshot
    ///
    /// All reference counts start at zero; restored clip models bump them
    /// back up via [`TraceModelCache::retain`].
    pub fn restore(&mut self, snapshot: TraceModelCacheSnapshot) {
        self.clear();
        for (model, mass) in snapshot.entries {
            let index = self.entries.len();
            self.buckets.entry(model.hash_key()).or_default().push(index);
            self.entries.push(CacheEntry {
                model,
                ref_count: 0,
                mass,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Bounds;

    fn unit_box_model() -> TraceModel {
        TraceModel::from_bounds(Bounds::new(
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, 1.0, 1.0),
        ))
    }

    #[test]
    fn test_acquire_deduplicates_and_counts() {
        let mut cache = TraceModelCache::new();
        let a = cache.acquire(&unit_box_model());
        let b = cache.acquire(&unit_box_model());
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.ref_count(a), Some(2));

        cache.release(a);
        cache.release(b);
        // entry stays resident at refcount zero
        assert_eq!(cache.ref_count(a), Some(0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_shapes_get_distinct_indices() {
        let mut cache = TraceModelCache::new();
        let a = cache.acquire(&unit_box_model());
        let b = cache.acquire(&TraceModel::octahedron(Bounds::new(
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, 1.0, 1.0),
        )));
        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_release_of_uncached_entry_is_reported_not_fatal() {
        let mut cache = TraceModelCache::new();
        let a = cache.acquire(&unit_box_model());
        cache.release(a);
        cache.release(a); // refcount already zero, warns and stays at zero
        assert_eq!(cache.ref_count(a), Some(0));
        cache.release(TraceModelIndex(99)); // out of range, warns
    }

    #[test]
    fn test_mass_properties_scale_with_density() {
        let mut cache = TraceModelCache::new();
        let a = cache.acquire(&unit_box_model());
        let (mass, _, inertia) = cache.mass_properties(a, 2.0).unwrap();
        assert!((mass - 16.0).abs() < 1e-5);
        assert!((inertia[(0, 0)] - 2.0 * 8.0 * 8.0 / 12.0).abs() < 1e-4);

        assert!(cache.mass_properties(TraceModelIndex(7), 1.0).is_err());
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut cache = TraceModelCache::new();
        let a = cache.acquire(&unit_box_model());

        let text = ron::to_string(&cache.snapshot()).unwrap();
        let snapshot: TraceModelCacheSnapshot = ron::from_str(&text).unwrap();

        let mut restored = TraceModelCache::new();
        restored.restore(snapshot);
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.ref_count(a), Some(0));
        restored.retain(a);
        assert_eq!(restored.ref_count(a), Some(1));
        // the restored entry deduplicates against new acquires
        assert_eq!(restored.acquire(&unit_box_model()), a);
    }
}
