//! Dense label volumes.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::{Array3, Zip};

use crate::model::{Dimensions, VoxelPoint};

/// Dense label volume indexed `[i, j, k]`; 0 is background.
///
/// For 2D images `i` is the column, `j` the row, and the depth is 1.
pub type LabelVolume = Array3<u16>;

/// Dimensions of a label volume.
pub fn label_dimensions(labels: &LabelVolume) -> Dimensions {
    let (width, height, depth) = labels.dim();
    Dimensions::volume(width, height, depth)
}

/// Distinct non-zero values present in the volume.
pub fn distinct_values(labels: &LabelVolume) -> BTreeSet<u32> {
    let mut seen = vec![false; usize::from(u16::MAX) + 1];
    for &value in labels.iter() {
        seen[usize::from(value)] = true;
    }
    seen.iter()
        .enumerate()
        .skip(1)
        .filter(|(_, present)| **present)
        .map(|(value, _)| value as u32)
        .collect()
}

/// Voxel count and inclusive bounding box of one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueStats {
    /// Number of voxels holding the value.
    pub count: usize,
    /// Smallest index along each axis.
    pub min: VoxelPoint,
    /// Largest index along each axis.
    pub max: VoxelPoint,
}

/// Per-value statistics for every non-zero value.
pub fn value_stats(labels: &LabelVolume) -> BTreeMap<u32, ValueStats> {
    let mut stats: BTreeMap<u32, ValueStats> = BTreeMap::new();
    for ((i, j, k), &value) in labels.indexed_iter() {
        if value == 0 {
            continue;
        }
        let point = VoxelPoint::new(i as u32, j as u32, k as u32);
        stats
            .entry(u32::from(value))
            .and_modify(|s| {
                s.count += 1;
                s.min = VoxelPoint::new(
                    s.min.i.min(point.i),
                    s.min.j.min(point.j),
                    s.min.k.min(point.k),
                );
                s.max = VoxelPoint::new(
                    s.max.i.max(point.i),
                    s.max.j.max(point.j),
                    s.max.k.max(point.k),
                );
            })
            .or_insert(ValueStats {
                count: 1,
                min: point,
                max: point,
            });
    }
    stats
}

/// Copy every non-zero voxel of `layer` onto `target`.
///
/// Both volumes must have the same shape.
pub fn merge_into(target: &mut LabelVolume, layer: &LabelVolume) {
    Zip::from(target).and(layer).for_each(|t, &l| {
        if l != 0 {
            *t = l;
        }
    });
}

/// Zero every voxel whose value is not in `keep`, returning the cleared values.
pub fn retain_values(labels: &mut LabelVolume, keep: &BTreeSet<u32>) -> BTreeSet<u32> {
    let mut cleared = BTreeSet::new();
    labels.map_inplace(|v| {
        if *v != 0 && !keep.contains(&u32::from(*v)) {
            cleared.insert(u32::from(*v));
            *v = 0;
        }
    });
    cleared
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_values_skip_background() {
        let mut labels = LabelVolume::zeros((3, 3, 1));
        labels[[0, 0, 0]] = 2;
        labels[[1, 1, 0]] = 7;
        labels[[2, 2, 0]] = 2;
        assert_eq!(distinct_values(&labels), BTreeSet::from([2, 7]));
    }

    #[test]
    fn test_value_stats_bounds() {
        let mut labels = LabelVolume::zeros((4, 4, 2));
        labels[[1, 2, 0]] = 1;
        labels[[3, 0, 1]] = 1;
        let stats = value_stats(&labels);
        let one = stats[&1];
        assert_eq!(one.count, 2);
        assert_eq!(one.min, VoxelPoint::new(1, 0, 0));
        assert_eq!(one.max, VoxelPoint::new(3, 2, 1));
    }

    #[test]
    fn test_merge_later_wins() {
        let mut base = LabelVolume::zeros((2, 1, 1));
        base[[0, 0, 0]] = 1;
        base[[1, 0, 0]] = 1;
        let mut layer = LabelVolume::zeros((2, 1, 1));
        layer[[1, 0, 0]] = 2;
        merge_into(&mut base, &layer);
        assert_eq!(base[[0, 0, 0]], 1);
        assert_eq!(base[[1, 0, 0]], 2);
    }

    #[test]
    fn test_retain_values_clears_the_rest() {
        let mut labels = LabelVolume::zeros((2, 2, 1));
        labels[[0, 0, 0]] = 1;
        labels[[1, 0, 0]] = 3;
        labels[[1, 1, 0]] = 3;
        let cleared = retain_values(&mut labels, &BTreeSet::from([1]));
        assert_eq!(cleared, BTreeSet::from([3]));
        assert_eq!(distinct_values(&labels), BTreeSet::from([1]));
    }
}
