//! Per-entity missing-value imputation.
//!
//! Rows are partitioned by entity, each partition is ordered by date, a fill
//! strategy chosen by column name is applied inside the partition only, and the
//! filled values are written back to their original row positions.

use crate::table::{CleanTable, Record};
use serde::Serialize;
use std::collections::HashMap;

/// How missing values in a numeric column are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStrategy {
    /// Running totals: carry the last known value forward.
    ForwardFill,
    /// Rates and densities: use the entity's median.
    EntityMedian,
    /// Leave nulls as they are.
    Keep,
}

impl FillStrategy {
    pub fn for_column(name: &str) -> Self {
        if name.starts_with("total_") {
            FillStrategy::ForwardFill
        } else if name.ends_with("_rate") || name.ends_with("_density") {
            FillStrategy::EntityMedian
        } else {
            FillStrategy::Keep
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImputeStats {
    pub entities: usize,
    pub forward_filled: usize,
    pub median_filled: usize,
}

/// Row indices grouped by `(iso_code, country)`, each group sorted by date.
/// Groups appear in order of first occurrence; equal dates keep their row order.
pub fn partition_by_entity(rows: &[Record]) -> Vec<Vec<usize>> {
    let mut slots: HashMap<(&str, &str), usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        let key = (row.iso_code.as_str(), row.country.as_str());
        let slot = *slots.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(i);
    }

    for group in &mut groups {
        group.sort_by_key(|&i| rows[i].date);
    }
    groups
}

/// Replace each null with the closest earlier non-null value. Returns how many cells were filled.
pub fn forward_fill(values: &mut [Option<f64>]) -> usize {
    let mut last = None;
    let mut filled = 0;
    for v in values.iter_mut() {
        match v {
            Some(x) => last = Some(*x),
            None => {
                if let Some(prev) = last {
                    *v = Some(prev);
                    filled += 1;
                }
            }
        }
    }
    filled
}

/// Median of the given samples; the mean of the two middle samples for an even count.
pub fn median(samples: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = samples.into_iter().collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Replace every null with the median of the non-null values. Returns how many cells were filled.
pub fn fill_with_median(values: &mut [Option<f64>]) -> usize {
    let Some(m) = median(values.iter().flatten().copied()) else {
        return 0;
    };
    let mut filled = 0;
    for v in values.iter_mut().filter(|v| v.is_none()) {
        *v = Some(m);
        filled += 1;
    }
    filled
}

/// Apply the per-column fill strategies to every entity partition in place.
pub fn impute(table: &mut CleanTable) -> ImputeStats {
    let strategies: Vec<(usize, FillStrategy)> = table
        .columns()
        .iter()
        .enumerate()
        .map(|(i, name)| (i, FillStrategy::for_column(name)))
        .filter(|(_, s)| *s != FillStrategy::Keep)
        .collect();

    let groups = partition_by_entity(table.rows());
    let mut stats = ImputeStats {
        entities: groups.len(),
        ..ImputeStats::default()
    };
    if strategies.is_empty() {
        return stats;
    }

    let rows = table.rows_mut();
    let mut series: Vec<Option<f64>> = Vec::new();
    for group in &groups {
        for &(col, strategy) in &strategies {
            series.clear();
            series.extend(group.iter().map(|&i| rows[i].values[col]));

            match strategy {
                FillStrategy::ForwardFill => stats.forward_filled += forward_fill(&mut series),
                FillStrategy::EntityMedian => stats.median_filled += fill_with_median(&mut series),
                FillStrategy::Keep => {}
            }

            for (&i, v) in group.iter().zip(series.iter()) {
                rows[i].values[col] = *v;
            }
        }
    }
    stats
}
