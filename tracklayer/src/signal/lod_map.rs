//! Mapping conceptual LOD levels onto a source's available resolutions.
//!
//! A zoom-summary source pre-aggregates data at a sparse, source-defined set
//! of resolutions, not at every integer LOD a pyramid may request. The
//! mapping built here assigns every conceptual level the nearest tier the
//! source actually carries, defaulting to the coarser/cheaper aggregate but
//! dropping to a finer one when it is almost exactly right.

use tracing::debug;

use crate::source::ZoomLevelInfo;

/// How many levels finer than requested a tier may be and still win the
/// assignment.
pub const LOD_TOLERANCE: u32 = 2;

#[derive(Debug, Clone, Copy)]
struct LodEntry {
    mapped_lod: u32,
    zoom_index: Option<usize>,
}

/// Lookup tables from conceptual LOD level to available resolution tier.
///
/// Built once per source. Level 0 (raw, unaggregated records) is always
/// treated as available, so the tables are never empty.
#[derive(Debug, Clone)]
pub struct LodMapping {
    entries: Vec<LodEntry>,
}

impl LodMapping {
    /// Builds the tables from a source's zoom-summary table.
    ///
    /// The available LOD of a tier aggregating `reduction_level` base
    /// coordinates per bin is `floor(log2(reduction_level))`. When two
    /// tiers land on the same LOD the finer (earlier) one wins.
    pub fn build(zoom_levels: &[ZoomLevelInfo]) -> Self {
        // (lod, zoom table index); raw data is the permanent level-0 tier.
        let mut available: Vec<(u32, Option<usize>)> = vec![(0, None)];
        for (index, zoom) in zoom_levels.iter().enumerate() {
            let lod = 31 - zoom.reduction_level.max(1).leading_zeros();
            if available.iter().any(|(existing, _)| *existing == lod) {
                continue;
            }
            available.push((lod, Some(index)));
        }
        available.sort_by_key(|(lod, _)| *lod);

        let highest = available.last().map(|(lod, _)| *lod).unwrap_or(0);
        let entries = (0..=highest)
            .map(|level| Self::assign(level, &available))
            .collect();
        debug!(tiers = available.len(), highest, "Built LOD mapping");
        Self { entries }
    }

    fn assign(level: u32, available: &[(u32, Option<usize>)]) -> LodEntry {
        if let Some((lod, zoom_index)) = available.iter().find(|(lod, _)| *lod == level) {
            return LodEntry {
                mapped_lod: *lod,
                zoom_index: *zoom_index,
            };
        }

        // Strictly between two tiers. A lower tier always exists (raw is
        // level 0) and an upper tier always exists (exact matches returned
        // above, and levels beyond the highest tier are never generated).
        let pos = available.partition_point(|(lod, _)| *lod < level);
        let (lower, lower_index) = available[pos - 1];
        let (upper, upper_index) = available[pos];

        // Prefer the finer tier only when it is strictly closer and the
        // extra data stays within tolerance; otherwise take the coarser,
        // cheaper aggregate.
        if level - lower < upper - level && level - lower <= LOD_TOLERANCE {
            LodEntry {
                mapped_lod: lower,
                zoom_index: lower_index,
            }
        } else {
            LodEntry {
                mapped_lod: upper,
                zoom_index: upper_index,
            }
        }
    }

    fn entry(&self, level: u32) -> LodEntry {
        let clamped = (level as usize).min(self.entries.len() - 1);
        self.entries[clamped]
    }

    /// The available LOD assigned to a conceptual level (clamped at the
    /// highest tier).
    pub fn mapped_lod(&self, level: u32) -> u32 {
        self.entry(level).mapped_lod
    }

    /// Zoom table index serving a conceptual level, or `None` for raw
    /// records.
    pub fn zoom_index(&self, level: u32) -> Option<usize> {
        self.entry(level).zoom_index
    }

    /// Highest conceptual level with its own table entry.
    pub fn highest_lod(&self) -> u32 {
        (self.entries.len() - 1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zooms(reductions: &[u32]) -> Vec<ZoomLevelInfo> {
        reductions
            .iter()
            .map(|&reduction_level| ZoomLevelInfo { reduction_level })
            .collect()
    }

    #[test]
    fn test_assignment_table_for_sparse_tiers() {
        // Reductions 16 and 256 give available LODs {0, 4, 8}.
        let mapping = LodMapping::build(&zooms(&[16, 256]));

        let table: Vec<u32> = (0..=8).map(|l| mapping.mapped_lod(l)).collect();
        // Level 2 ties (distance 2 both ways): strict comparison resolves
        // to the coarser tier. Level 5 is closer to 4 and within tolerance.
        assert_eq!(table, vec![0, 0, 4, 4, 4, 4, 8, 8, 8]);
    }

    #[test]
    fn test_zoom_index_follows_assignment() {
        let mapping = LodMapping::build(&zooms(&[16, 256]));

        assert_eq!(mapping.zoom_index(0), None);
        assert_eq!(mapping.zoom_index(1), None);
        assert_eq!(mapping.zoom_index(2), Some(0));
        assert_eq!(mapping.zoom_index(5), Some(0));
        assert_eq!(mapping.zoom_index(6), Some(1));
        assert_eq!(mapping.zoom_index(8), Some(1));
    }

    #[test]
    fn test_levels_beyond_highest_clamp_to_coarsest_tier() {
        let mapping = LodMapping::build(&zooms(&[16, 256]));

        assert_eq!(mapping.highest_lod(), 8);
        assert_eq!(mapping.mapped_lod(20), 8);
        assert_eq!(mapping.zoom_index(20), Some(1));
    }

    #[test]
    fn test_source_without_zoom_tiers_is_all_raw() {
        let mapping = LodMapping::build(&[]);

        assert_eq!(mapping.highest_lod(), 0);
        assert_eq!(mapping.mapped_lod(0), 0);
        assert_eq!(mapping.mapped_lod(12), 0);
        assert_eq!(mapping.zoom_index(12), None);
    }

    #[test]
    fn test_duplicate_tiers_prefer_the_finer_entry() {
        // 16 and 24 both floor to LOD 4; the first entry wins.
        let mapping = LodMapping::build(&zooms(&[16, 24]));

        assert_eq!(mapping.zoom_index(4), Some(0));
    }

    #[test]
    fn test_tier_at_reduction_one_defers_to_raw() {
        let mapping = LodMapping::build(&zooms(&[1, 64]));

        assert_eq!(mapping.zoom_index(0), None);
        assert_eq!(mapping.zoom_index(6), Some(1));
    }
}
