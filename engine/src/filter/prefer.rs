//! Utilization-banded core preferences.
//!
//! A class may carry three preference masks: one for light tasks, one for
//! heavy tasks, and one for boosted or on-top placements in between. The
//! pipeline intersects whichever band applies, and only when doing so
//! leaves at least one candidate standing.

use crate::config::ClassConfig;
use crate::mask::CoreMask;
use crate::snapshot::PlacementEnv;

/// Preferred cores for this decision. Empty means no preference applies.
pub fn prefer_mask(class: &ClassConfig, env: &PlacementEnv) -> CoreMask {
    let Some(set) = class.prefer else {
        return CoreMask::new();
    };
    if env.task_util <= set.light_threshold {
        return set.light_prefer;
    }
    if env.task_util >= set.heavy_threshold {
        return set.heavy_prefer;
    }
    if env.boosted || env.on_top {
        return set.prefer;
    }
    CoreMask::new()
}
