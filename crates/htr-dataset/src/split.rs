// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Group-aware train/val/test splitting.
//!
//! Rows are never assigned individually. The distinct values of a grouping
//! column (form or writer) are collected in first-occurrence order, shuffled
//! with a seeded generator and cut into three consecutive runs; every row
//! follows its group. This keeps a writer or form from leaking across
//! partitions.
//!
//! Partition sizes use round-half-to-even on `fraction * n_groups` for train
//! and val, and test takes the remainder.
//!
//! # Example
//!
//! ```rust
//! use htr_dataset::split::{split_counts, Fractions};
//!
//! let counts = split_counts(10, Fractions::new(0.7, 0.15, 0.15));
//! assert_eq!((counts.train, counts.val, counts.test), (7, 2, 1));
//! ```

use std::{collections::HashMap, fmt, str::FromStr};

use itertools::Itertools;
use log::{debug, warn};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::{Error, Manifest, ManifestRow};

/// Tolerance under which fractions are considered to already sum to one.
const FRACTION_TOLERANCE: f64 = 1e-6;

/// Manifest column used to group rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupColumn {
    FormId,
    WriterId,
}

impl GroupColumn {
    /// Column name in the persisted manifest.
    pub fn name(&self) -> &'static str {
        match self {
            GroupColumn::FormId => "form_id",
            GroupColumn::WriterId => "writer_id",
        }
    }

    /// Group value of a row, `None` when the row has no group.
    pub fn value<'a>(&self, row: &'a ManifestRow) -> Option<&'a str> {
        match self {
            GroupColumn::FormId => Some(row.form_id.as_str()),
            GroupColumn::WriterId => row.writer_id.as_deref(),
        }
    }
}

impl FromStr for GroupColumn {
    type Err = Error;

    /// Accepts a strategy name (`form`, `writer`) or a column name
    /// (`form_id`, `writer_id`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "form" | "form_id" => Ok(GroupColumn::FormId),
            "writer" | "writer_id" => Ok(GroupColumn::WriterId),
            _ => Err(Error::InvalidStrategy(s.to_owned())),
        }
    }
}

impl fmt::Display for GroupColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Train/val/test proportions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fractions {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl Default for Fractions {
    fn default() -> Self {
        Self::new(0.8, 0.1, 0.1)
    }
}

impl Fractions {
    pub fn new(train: f64, val: f64, test: f64) -> Self {
        Self { train, val, test }
    }

    /// Scale the fractions so they sum to one.
    ///
    /// Fractions already within `1e-6` of one are returned unchanged. No
    /// validation is done: negative or zero sums scale proportionally
    /// (or to NaN) and are the caller's responsibility.
    pub fn normalized(self) -> Self {
        let sum = self.train + self.val + self.test;
        if (sum - 1.0).abs() < FRACTION_TOLERANCE {
            return self;
        }
        Self::new(self.train / sum, self.val / sum, self.test / sum)
    }
}

/// Number of groups per partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SplitCounts {
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

/// Partition sizes for `n` groups.
///
/// Train and val are `round_ties_even(fraction * n)`, clamped so they never
/// exceed the groups left; test is the remainder. Fractions are normalized
/// first.
pub fn split_counts(n: usize, fractions: Fractions) -> SplitCounts {
    let fractions = fractions.normalized();
    let rounded = |fraction: f64, limit: usize| -> usize {
        let value = (fraction * n as f64).round_ties_even();
        if value.is_nan() || value <= 0.0 {
            0
        } else {
            (value as usize).min(limit)
        }
    };

    let train = rounded(fractions.train, n);
    let val = rounded(fractions.val, n - train);
    SplitCounts {
        train,
        val,
        test: n - train - val,
    }
}

/// Shuffle groups with a generator seeded from `seed`.
///
/// Uses `StdRng::seed_from_u64` and a Fisher-Yates shuffle, so the result
/// depends only on `seed`, the input order and the pinned `rand` version.
pub fn shuffle_groups(mut groups: Vec<String>, seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    groups.shuffle(&mut rng);
    groups
}

/// Groups assigned to each partition, in shuffled order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupAssignment {
    pub train: Vec<String>,
    pub val: Vec<String>,
    pub test: Vec<String>,
}

impl GroupAssignment {
    pub fn counts(&self) -> SplitCounts {
        SplitCounts {
            train: self.train.len(),
            val: self.val.len(),
            test: self.test.len(),
        }
    }
}

/// Row indices per partition produced by [`group_split`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSplit {
    pub groups: GroupAssignment,
    pub train: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
    /// Rows left out because their group value is null.
    pub excluded: usize,
}

#[derive(Clone, Copy)]
enum Partition {
    Train,
    Val,
    Test,
}

/// Split arbitrary rows by the group returned from `key`.
///
/// Distinct non-null keys are taken in first-occurrence order, shuffled
/// with `seed` and partitioned with [`split_counts`]. Row indices in each
/// partition are ascending. Rows whose key is `None` are excluded from every
/// partition and counted in [`GroupSplit::excluded`].
pub fn group_split<T, F>(rows: &[T], key: F, seed: u64, fractions: Fractions) -> GroupSplit
where
    F: Fn(&T) -> Option<&str>,
{
    let groups: Vec<String> = rows
        .iter()
        .filter_map(&key)
        .unique()
        .map(str::to_owned)
        .collect();

    let shuffled = shuffle_groups(groups, seed);
    let counts = split_counts(shuffled.len(), fractions);
    debug!(
        "{} groups -> train={} val={} test={}",
        shuffled.len(),
        counts.train,
        counts.val,
        counts.test
    );

    let mut shuffled = shuffled.into_iter();
    let assignment = GroupAssignment {
        train: shuffled.by_ref().take(counts.train).collect(),
        val: shuffled.by_ref().take(counts.val).collect(),
        test: shuffled.collect(),
    };

    let mut membership: HashMap<&str, Partition> = HashMap::new();
    for (groups, partition) in [
        (&assignment.train, Partition::Train),
        (&assignment.val, Partition::Val),
        (&assignment.test, Partition::Test),
    ] {
        membership.extend(groups.iter().map(|g| (g.as_str(), partition)));
    }

    let mut result = GroupSplit::default();
    for (idx, row) in rows.iter().enumerate() {
        match key(row).and_then(|g| membership.get(g)) {
            Some(Partition::Train) => result.train.push(idx),
            Some(Partition::Val) => result.val.push(idx),
            Some(Partition::Test) => result.test.push(idx),
            None => result.excluded += 1,
        }
    }
    result.groups = assignment;
    result
}

/// Train, val and test manifests plus their group assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub column: GroupColumn,
    pub groups: GroupAssignment,
    pub train: Manifest,
    pub val: Manifest,
    pub test: Manifest,
}

/// Split a manifest into train/val/test by `column`.
///
/// Deterministic for a given manifest, column, seed and fractions. Rows
/// with a null group value are silently dropped from all partitions (only a
/// warning is logged); callers grouping by writer should run
/// [`check_group_values`] first.
///
/// # Example
///
/// ```rust,no_run
/// use htr_dataset::{read_manifest, split::{split, Fractions, GroupColumn}};
///
/// let manifest = read_manifest("data/processed/manifest.arrow")?;
/// let parts = split(&manifest, GroupColumn::FormId, 42, Fractions::new(0.8, 0.1, 0.1));
/// println!("train={} val={} test={}", parts.train.len(), parts.val.len(), parts.test.len());
/// # Ok::<(), htr_dataset::Error>(())
/// ```
#[cfg_attr(feature = "profiling", tracing::instrument(skip(manifest)))]
pub fn split(manifest: &Manifest, column: GroupColumn, seed: u64, fractions: Fractions) -> Split {
    let result = group_split(&manifest.rows, |row| column.value(row), seed, fractions);
    if result.excluded > 0 {
        warn!(
            "{} rows have no {} and were left out of every split",
            result.excluded,
            column.name()
        );
    }

    let select = |indices: &[usize]| -> Manifest {
        indices.iter().map(|&i| manifest.rows[i].clone()).collect()
    };

    Split {
        column,
        train: select(&result.train),
        val: select(&result.val),
        test: select(&result.test),
        groups: result.groups,
    }
}

/// Reject manifests whose grouping column has null values.
///
/// Form ids are never null; writer ids are null for forms missing from
/// `forms.txt`.
pub fn check_group_values(manifest: &Manifest, column: GroupColumn) -> Result<(), Error> {
    let missing = manifest
        .iter()
        .filter(|row| column.value(row).is_none())
        .count();
    if missing > 0 {
        return Err(Error::MissingGroupValue {
            column: column.name().to_owned(),
            missing,
        });
    }
    Ok(())
}

/// Number of groups shared by each pair of partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Overlaps {
    pub train_val: usize,
    pub train_test: usize,
    pub val_test: usize,
}

impl Overlaps {
    pub fn is_clean(&self) -> bool {
        self.train_val == 0 && self.train_test == 0 && self.val_test == 0
    }
}

impl fmt::Display for Overlaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "train/val={} train/test={} val/test={}",
            self.train_val, self.train_test, self.val_test
        )
    }
}

/// Count groups appearing in more than one partition. Null groups are ignored.
pub fn group_overlaps(
    train: &Manifest,
    val: &Manifest,
    test: &Manifest,
    column: GroupColumn,
) -> Overlaps {
    let groups = |manifest: &Manifest| -> std::collections::HashSet<String> {
        manifest
            .iter()
            .filter_map(|row| column.value(row))
            .map(str::to_owned)
            .collect()
    };
    let (train, val, test) = (groups(train), groups(val), groups(test));

    Overlaps {
        train_val: train.intersection(&val).count(),
        train_test: train.intersection(&test).count(),
        val_test: val.intersection(&test).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(line_id: &str, form_id: &str, writer_id: Option<&str>) -> ManifestRow {
        ManifestRow {
            line_id: line_id.to_owned(),
            form_id: form_id.to_owned(),
            writer_id: writer_id.map(str::to_owned),
            image_path: format!("/images/{}.png", line_id),
            text: "text".to_owned(),
            status: "ok".to_owned(),
            width: 100,
            height: 20,
            graylevel: 150,
            n_components: 3,
            bbox_x: 0,
            bbox_y: 0,
            bbox_w: 100,
            bbox_h: 20,
        }
    }

    /// `forms` forms with `lines` lines each; writer is `form / 2`.
    fn manifest(forms: usize, lines: usize) -> Manifest {
        (0..forms)
            .flat_map(|f| {
                (0..lines).map(move |l| {
                    let form = format!("a{:02}-{:03}", f, f);
                    let writer = format!("{:03}", f / 2);
                    row(&format!("{}-{:02}", form, l), &form, Some(&writer))
                })
            })
            .collect()
    }

    fn form_ids(manifest: &Manifest) -> Vec<&str> {
        manifest.iter().map(|r| r.form_id.as_str()).dedup().collect()
    }

    #[test]
    fn test_normalize_fractions() {
        let f = Fractions::new(0.7, 0.15, 0.15).normalized();
        assert_eq!(f, Fractions::new(0.7, 0.15, 0.15));

        let f = Fractions::new(8.0, 1.0, 1.0).normalized();
        assert!((f.train - 0.8).abs() < 1e-12);
        assert!((f.val - 0.1).abs() < 1e-12);
        assert!((f.test - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_split_counts_example() {
        let counts = split_counts(10, Fractions::new(0.7, 0.15, 0.15));
        assert_eq!(counts, SplitCounts { train: 7, val: 2, test: 1 });
    }

    #[test]
    fn test_split_counts_round_half_to_even() {
        // 0.25 * 10 = 2.5 rounds down to 2, 0.35 * 10 = 3.5 rounds up to 4.
        assert_eq!(
            split_counts(10, Fractions::new(0.25, 0.35, 0.4)),
            SplitCounts { train: 2, val: 4, test: 4 }
        );
        assert_eq!(
            split_counts(2, Fractions::new(0.25, 0.25, 0.5)),
            SplitCounts { train: 0, val: 0, test: 2 }
        );
    }

    #[test]
    fn test_split_counts_conserve_groups() {
        for n in 0..50 {
            for fractions in [
                Fractions::new(0.8, 0.1, 0.1),
                Fractions::new(0.5, 0.5, 0.0),
                Fractions::new(1.0, 1.0, 1.0),
                Fractions::new(0.0, 0.0, 1.0),
                Fractions::new(0.9, 0.6, 0.0),
            ] {
                let c = split_counts(n, fractions);
                assert_eq!(c.train + c.val + c.test, n, "n={} {:?}", n, fractions);
            }
        }
    }

    #[test]
    fn test_split_counts_degenerate_fractions_clamped() {
        let c = split_counts(5, Fractions::new(-1.0, 0.5, 0.5));
        assert_eq!(c.train + c.val + c.test, 5);
        assert_eq!(c.train, 0);

        let c = split_counts(5, Fractions::new(0.0, 0.0, 0.0));
        assert_eq!(c, SplitCounts { train: 0, val: 0, test: 5 });
    }

    #[test]
    fn test_group_column_parse() {
        assert_eq!("form".parse::<GroupColumn>().unwrap(), GroupColumn::FormId);
        assert_eq!("writer_id".parse::<GroupColumn>().unwrap(), GroupColumn::WriterId);
        assert_eq!(" Writer ".parse::<GroupColumn>().unwrap(), GroupColumn::WriterId);
        assert!(matches!(
            "line".parse::<GroupColumn>(),
            Err(Error::InvalidStrategy(s)) if s == "line"
        ));
    }

    #[test]
    fn test_ten_groups_seed_42() {
        let m = manifest(10, 3);
        let fractions = Fractions::new(0.7, 0.15, 0.15);

        let first = split(&m, GroupColumn::FormId, 42, fractions);
        assert_eq!(first.groups.counts(), SplitCounts { train: 7, val: 2, test: 1 });
        assert_eq!((first.train.len(), first.val.len(), first.test.len()), (21, 6, 3));

        let second = split(&m, GroupColumn::FormId, 42, fractions);
        assert_eq!(first, second);
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let groups: Vec<String> = (0..20).map(|i| format!("g{}", i)).collect();
        let a = shuffle_groups(groups.clone(), 7);
        let b = shuffle_groups(groups.clone(), 7);
        let c = shuffle_groups(groups.clone(), 8);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut sorted = a.clone();
        sorted.sort_by_key(|g| g[1..].parse::<u32>().unwrap());
        assert_eq!(sorted, groups);
    }

    #[test]
    fn test_exhaustive_and_disjoint() {
        let m = manifest(23, 4);
        for column in [GroupColumn::FormId, GroupColumn::WriterId] {
            let parts = split(&m, column, 1234, Fractions::new(0.6, 0.2, 0.2));

            assert_eq!(parts.train.len() + parts.val.len() + parts.test.len(), m.len());
            assert!(group_overlaps(&parts.train, &parts.val, &parts.test, column).is_clean());

            let mut line_ids: Vec<_> = parts
                .train
                .iter()
                .chain(parts.val.iter())
                .chain(parts.test.iter())
                .map(|r| r.line_id.clone())
                .collect();
            line_ids.sort();
            let mut expected: Vec<_> = m.iter().map(|r| r.line_id.clone()).collect();
            expected.sort();
            assert_eq!(line_ids, expected);

            let distinct = m.iter().filter_map(|r| column.value(r)).unique().count();
            let counts = parts.groups.counts();
            assert_eq!(counts.train + counts.val + counts.test, distinct);
        }
    }

    #[test]
    fn test_partitions_preserve_row_order() {
        let m = manifest(12, 3);
        let parts = split(&m, GroupColumn::FormId, 3, Fractions::default());

        for part in [&parts.train, &parts.val, &parts.test] {
            let positions: Vec<usize> = part
                .iter()
                .map(|r| m.iter().position(|o| o.line_id == r.line_id).unwrap())
                .collect();
            assert!(positions.windows(2).all(|w| w[0] < w[1]));
        }

        // Each group's rows stay together in one partition.
        let train_forms = form_ids(&parts.train);
        assert_eq!(train_forms.len(), parts.groups.train.len());
    }

    #[test]
    fn test_null_groups_excluded() {
        let mut rows = manifest(6, 2).rows;
        rows.push(row("x01-000-00", "x01-000", None));
        rows.push(row("x01-000-01", "x01-000", None));
        let m = Manifest::new(rows);

        let result = group_split(&m.rows, |r| GroupColumn::WriterId.value(r), 5, Fractions::default());
        assert_eq!(result.excluded, 2);
        assert_eq!(result.train.len() + result.val.len() + result.test.len(), 12);

        let parts = split(&m, GroupColumn::WriterId, 5, Fractions::default());
        assert_eq!(parts.train.len() + parts.val.len() + parts.test.len(), 12);
        assert!(
            parts
                .train
                .iter()
                .chain(parts.val.iter())
                .chain(parts.test.iter())
                .all(|r| r.writer_id.is_some())
        );
    }

    #[test]
    fn test_check_group_values() {
        let mut m = manifest(2, 2);
        assert!(check_group_values(&m, GroupColumn::WriterId).is_ok());

        m.rows[1].writer_id = None;
        match check_group_values(&m, GroupColumn::WriterId) {
            Err(Error::MissingGroupValue { column, missing }) => {
                assert_eq!(column, "writer_id");
                assert_eq!(missing, 1);
            }
            other => panic!("expected MissingGroupValue, got {:?}", other),
        }
        assert!(check_group_values(&m, GroupColumn::FormId).is_ok());
    }

    #[test]
    fn test_group_overlaps_detects_leakage() {
        let m = manifest(3, 2);
        let train = Manifest::new(m.rows[0..3].to_vec());
        let val = Manifest::new(m.rows[2..4].to_vec());
        let test = Manifest::new(m.rows[4..6].to_vec());

        let overlaps = group_overlaps(&train, &val, &test, GroupColumn::FormId);
        assert_eq!(
            overlaps,
            Overlaps {
                train_val: 1,
                train_test: 0,
                val_test: 0
            }
        );
        assert!(!overlaps.is_clean());
    }

    #[test]
    fn test_empty_manifest() {
        let parts = split(&Manifest::default(), GroupColumn::FormId, 42, Fractions::default());
        assert!(parts.train.is_empty() && parts.val.is_empty() && parts.test.is_empty());
    }
}
