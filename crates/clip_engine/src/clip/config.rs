//! Configuration for the clip world
//!
//! Strongly-typed settings with sensible defaults, serializable so engine
//! config files can override them.

use serde::{Deserialize, Serialize};

/// Configuration for spatial partitioning and query limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipConfig {
    /// Maximum subdivision depth of the sector tree; the node count is
    /// `2^(depth+1) - 1`
    pub max_sector_depth: u32,

    /// Maximum number of candidates a broad-phase query may return; excess
    /// candidates are dropped with a warning
    pub max_candidates: usize,

    /// Epsilon the absolute bounds of linked models and query volumes are
    /// padded by; movement is clipped an epsilon away from actual edges, so
    /// boxes that do not quite touch must still be tested
    pub box_epsilon: f32,

    /// Translations longer than this are rejected as numerically unstable
    /// and reported as fully blocked
    pub max_trace_distance: f32,

    /// Number of link entries the link pool grows by at a time
    pub link_block_size: usize,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            max_sector_depth: 12,
            max_candidates: 4096,
            box_epsilon: 1.0,
            max_trace_distance: 4096.0,
            link_block_size: 1024,
        }
    }
}

impl ClipConfig {
    /// Clamp settings to workable ranges, warning about adjustments
    pub fn validated(mut self) -> Self {
        if self.max_sector_depth > 16 {
            log::warn!(
                "clip sector depth {} too large, clamping to 16",
                self.max_sector_depth
            );
            self.max_sector_depth = 16;
        }
        if self.max_candidates == 0 {
            log::warn!("clip candidate limit of zero is useless, using 1");
            self.max_candidates = 1;
        }
        if self.link_block_size == 0 {
            self.link_block_size = 1024;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_clamps_depth() {
        let config = ClipConfig {
            max_sector_depth: 40,
            ..Default::default()
        }
        .validated();
        assert_eq!(config.max_sector_depth, 16);
    }
}
