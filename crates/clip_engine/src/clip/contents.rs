//! Content-type masks classifying what a collidable volume represents
//!
//! Every clip model carries a `Contents` mask, and every query carries a mask
//! of the contents it is sensitive to; the broad phase rejects candidates
//! whose contents do not overlap the query mask.

use bitflags::bitflags;

bitflags! {
    /// Bitmask classifying collidable volumes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Contents: u32 {
        /// An eye is never valid in a solid
        const SOLID = 1 << 0;
        /// Blocks visibility
        const OPAQUE = 1 << 1;
        /// Water volume
        const WATER = 1 << 2;
        /// Solid to players
        const PLAYER_CLIP = 1 << 3;
        /// Solid to monsters
        const MONSTER_CLIP = 1 << 4;
        /// Solid to moveable pushers
        const MOVEABLE_CLIP = 1 << 5;
        /// Solid to inverse-kinematics probes
        const IK_CLIP = 1 << 6;
        /// Blood decal surfaces
        const BLOOD = 1 << 7;
        /// Body collision volume
        const BODY = 1 << 8;
        /// Projectile collision volume
        const PROJECTILE = 1 << 9;
        /// Dead body collision volume
        const CORPSE = 1 << 10;
        /// Clip model backed by render geometry
        const RENDER_MODEL = 1 << 11;
        /// Trigger volume, no physical response
        const TRIGGER = 1 << 12;
        /// Flashlight trigger volume
        const FLASHLIGHT_TRIGGER = 1 << 13;
    }
}

/// Everything a query can be sensitive to
pub const MASK_ALL: Contents = Contents::all();

/// Contents that block general-purpose movement
pub const MASK_SOLID: Contents = Contents::SOLID;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_overlap() {
        let model = Contents::BODY | Contents::CORPSE;
        assert!(model.intersects(Contents::BODY | Contents::SOLID));
        assert!(!model.intersects(Contents::WATER));
    }

    #[test]
    fn test_contents_fully_represented() {
        // the contents-query short circuit: a candidate adds nothing once
        // its flags are already accumulated
        let accumulated = Contents::BODY | Contents::WATER;
        let candidate = Contents::BODY;
        assert_eq!(candidate & accumulated, candidate);
    }
}
