//! Rasterizing fetched records into a tile's output cells.

use crate::source::Record;

/// Outcome of one rasterization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RasterSummary {
    /// Cell writes performed (one per overlapped, in-range cell).
    pub cells_written: usize,
    /// Records skipped because their shape was not recognized.
    pub unknown_records: usize,
}

/// Writes record values across the output cells they overlap.
///
/// One cell covers `2^level` absolute coordinates starting at `tile_x`.
/// Aggregate records contribute their mean over valid bases, raw records
/// their exact value; cell indices outside `[0, tile_width)` are discarded.
/// Writes land at `cell * channel_count + channel`, so independent sources
/// interleave into one packed buffer without touching each other's
/// channels. Unrecognized records are skipped, counted, and reported to
/// `on_unknown`.
///
/// # Panics
///
/// Panics when `channel >= channel_count` or the buffer is too small for
/// `tile_width * channel_count`; both are construction-time programming
/// errors, not data conditions.
pub fn rasterize_records(
    records: &[Record],
    level: u32,
    tile_x: u64,
    tile_width: usize,
    target: &mut [f32],
    channel_count: usize,
    channel: usize,
    mut on_unknown: impl FnMut(&str),
) -> RasterSummary {
    assert!(channel < channel_count, "channel out of range");
    assert!(
        target.len() >= tile_width * channel_count,
        "target buffer too small for {} cells x {} channels",
        tile_width,
        channel_count
    );

    let cell_width = 1i128 << level;
    let tile_x = tile_x as i128;
    let mut summary = RasterSummary::default();

    for record in records {
        let (start, end, value) = match record {
            Record::Value(v) => (v.start, v.end, v.value),
            Record::Aggregate(a) => match a.mean() {
                Some(mean) => (a.start, a.end, mean),
                None => continue,
            },
            Record::Unknown { kind } => {
                summary.unknown_records += 1;
                on_unknown(kind);
                continue;
            }
        };

        let first = (start as i128 - tile_x).div_euclid(cell_width);
        let last = (end as i128 - tile_x + cell_width - 1).div_euclid(cell_width);
        let first = first.clamp(0, tile_width as i128) as usize;
        let last = last.clamp(0, tile_width as i128) as usize;

        for cell in first..last {
            target[cell * channel_count + channel] = value;
            summary.cells_written += 1;
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AggregateRecord, ValueRecord};

    fn value(start: u64, end: u64, value: f32) -> Record {
        Record::Value(ValueRecord { start, end, value })
    }

    #[test]
    fn test_raw_records_fill_overlapped_cells() {
        let mut target = vec![0.0f32; 8];
        let records = vec![value(2, 5, 1.5), value(6, 7, -2.0)];

        let summary = rasterize_records(&records, 0, 0, 8, &mut target, 1, 0, |_| {});

        assert_eq!(target, vec![0.0, 0.0, 1.5, 1.5, 1.5, 0.0, -2.0, 0.0]);
        assert_eq!(summary.cells_written, 4);
    }

    #[test]
    fn test_aggregate_records_write_their_mean() {
        let mut target = vec![0.0f32; 4];
        // Cells are 4 coordinates wide at level 2; the record spans cells
        // 1 and 2 of a tile starting at x = 16.
        let records = vec![Record::Aggregate(AggregateRecord {
            start: 20,
            end: 28,
            valid_count: 4,
            sum: 6.0,
            min: 1.0,
            max: 2.0,
        })];

        rasterize_records(&records, 2, 16, 4, &mut target, 1, 0, |_| {});

        assert_eq!(target, vec![0.0, 1.5, 1.5, 0.0]);
    }

    #[test]
    fn test_cells_outside_tile_are_discarded() {
        let mut target = vec![0.0f32; 4];
        // Overlaps the tile's first cell only from the left, and runs past
        // its right edge.
        let records = vec![value(0, 5, 1.0), value(6, 40, 2.0)];

        let summary = rasterize_records(&records, 0, 4, 4, &mut target, 1, 0, |_| {});

        assert_eq!(target, vec![1.0, 0.0, 2.0, 2.0]);
        assert_eq!(summary.cells_written, 3);
    }

    #[test]
    fn test_channels_do_not_clobber_each_other() {
        let mut target = vec![0.0f32; 8];

        rasterize_records(&[value(0, 4, 1.0)], 0, 0, 4, &mut target, 2, 0, |_| {});
        rasterize_records(&[value(1, 3, 9.0)], 0, 0, 4, &mut target, 2, 1, |_| {});

        assert_eq!(target, vec![1.0, 0.0, 1.0, 9.0, 1.0, 9.0, 1.0, 0.0]);
    }

    #[test]
    fn test_unknown_records_are_skipped_and_reported() {
        let mut target = vec![0.0f32; 2];
        let records = vec![
            Record::Unknown {
                kind: "variant-call".to_string(),
            },
            value(0, 1, 3.0),
        ];

        let mut reported = Vec::new();
        let summary =
            rasterize_records(&records, 0, 0, 2, &mut target, 1, 0, |kind| {
                reported.push(kind.to_string())
            });

        assert_eq!(summary.unknown_records, 1);
        assert_eq!(reported, vec!["variant-call"]);
        assert_eq!(target, vec![3.0, 0.0]);
    }

    #[test]
    fn test_aggregate_without_valid_bases_writes_nothing() {
        let mut target = vec![7.0f32; 2];
        let records = vec![Record::Aggregate(AggregateRecord {
            start: 0,
            end: 2,
            valid_count: 0,
            sum: 0.0,
            min: 0.0,
            max: 0.0,
        })];

        let summary = rasterize_records(&records, 0, 0, 2, &mut target, 1, 0, |_| {});

        assert_eq!(summary.cells_written, 0);
        assert_eq!(target, vec![7.0, 7.0]);
    }
}
