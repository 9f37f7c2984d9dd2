//! Read-only queries over a loaded dataset snapshot.
//!
//! A [`Selection`] borrows rows from a [`CleanTable`]; filters narrow it without
//! copying records, so filters compose cheaply on every request.

pub mod cache;
pub mod views;

use crate::constants;
use crate::error::QueryError;
use crate::table::{CleanTable, Record};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;

/// A borrowed subset of a table's rows in original row order
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    table: &'a CleanTable,
    rows: Vec<&'a Record>,
}

/// Where to read a metric from. Known columns missing from the file read as all-null.
#[derive(Debug, Clone, Copy)]
struct MetricColumn(Option<usize>);

impl MetricColumn {
    fn get(self, row: &Record) -> Option<f64> {
        self.0.and_then(|i| row.values.get(i).copied().flatten())
    }
}

/// One chronological point of an entity series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySeries {
    pub entity: String,
    pub points: Vec<SeriesPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moving_average: Option<Vec<Option<f64>>>,
}

impl EntitySeries {
    pub fn values(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.value).collect()
    }
}

/// A row ranked by a derived rate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatedRow<'a> {
    #[serde(skip)]
    pub record: &'a Record,
    pub country: &'a str,
    pub iso_code: &'a str,
    pub rate: f64,
}

impl<'a> Selection<'a> {
    pub fn all(table: &'a CleanTable) -> Self {
        Self {
            table,
            rows: table.rows().iter().collect(),
        }
    }

    pub fn table(&self) -> &'a CleanTable {
        self.table
    }

    pub fn rows(&self) -> &[&'a Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copy the selected rows into a standalone table
    pub fn to_table(&self) -> CleanTable {
        CleanTable::new(
            self.table.columns().to_vec(),
            self.rows.iter().map(|r| (*r).clone()).collect(),
        )
    }

    fn narrow(&self, keep: impl Fn(&Record) -> bool) -> Self {
        Self {
            table: self.table,
            rows: self.rows.iter().copied().filter(|r| keep(r)).collect(),
        }
    }

    fn metric(&self, name: &str) -> Result<MetricColumn, QueryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(QueryError::EmptyMetric);
        }
        match self.table.column_index(name) {
            Some(i) => Ok(MetricColumn(Some(i))),
            None if constants::is_whitelisted(name) => Ok(MetricColumn(None)),
            None => Err(QueryError::UnknownMetric(name.to_string())),
        }
    }

    /// Value of a metric for one row. Errors only for an empty or unknown metric name.
    pub fn value(&self, row: &Record, metric: &str) -> Result<Option<f64>, QueryError> {
        Ok(self.metric(metric)?.get(row))
    }

    /// Keep rows whose entity name is in `entities`. An empty set keeps everything.
    pub fn filter_by_entities<S: AsRef<str>>(&self, entities: &[S]) -> Self {
        if entities.is_empty() {
            return self.clone();
        }
        let wanted: HashSet<&str> = entities.iter().map(|e| e.as_ref()).collect();
        self.narrow(|r| wanted.contains(r.country.as_str()))
    }

    /// Keep rows with `start <= date <= end`. Missing bounds are open.
    pub fn filter_by_date_range(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self, QueryError> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(QueryError::InvertedDateRange { start: s, end: e });
            }
        }
        Ok(self.narrow(|r| start.map_or(true, |s| r.date >= s) && end.map_or(true, |e| r.date <= e)))
    }

    pub fn max_date(&self) -> Option<NaiveDate> {
        self.rows.iter().map(|r| r.date).max()
    }

    /// Rows at the maximum date present; empty for an empty selection.
    pub fn latest_snapshot(&self) -> Self {
        match self.max_date() {
            Some(latest) => self.narrow(|r| r.date == latest),
            None => self.clone(),
        }
    }

    /// Rows sorted descending by `metric`, nulls excluded, ties kept in row order, truncated to `n`.
    pub fn top_n_by_metric(&self, metric: &str, n: usize) -> Result<Vec<&'a Record>, QueryError> {
        if n == 0 {
            return Err(QueryError::ZeroLimit);
        }
        let col = self.metric(metric)?;
        let mut ranked: Vec<(f64, &'a Record)> = self
            .rows
            .iter()
            .filter_map(|r| col.get(r).map(|v| (v, *r)))
            .collect();
        // sort_by is stable
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(ranked.into_iter().take(n).map(|(_, r)| r).collect())
    }

    /// Sum of the non-null values of `metric`
    pub fn sum(&self, metric: &str) -> Result<f64, QueryError> {
        let col = self.metric(metric)?;
        Ok(self.rows.iter().filter_map(|r| col.get(r)).sum())
    }

    /// Per-entity chronological series of `metric`. Only dates present for an entity appear.
    /// Series follow the order of `entities`, or entity name order when `entities` is empty;
    /// requested entities with no rows are omitted.
    pub fn time_series<S: AsRef<str>>(&self, entities: &[S], metric: &str) -> Result<Vec<EntitySeries>, QueryError> {
        let col = self.metric(metric)?;
        let names: Vec<String> = if entities.is_empty() {
            self.to_entity_names()
        } else {
            let mut seen = HashSet::new();
            entities
                .iter()
                .map(|e| e.as_ref().to_string())
                .filter(|e| seen.insert(e.clone()))
                .collect()
        };

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let mut rows: Vec<&Record> = self.rows.iter().copied().filter(|r| r.country == name).collect();
            if rows.is_empty() {
                continue;
            }
            rows.sort_by_key(|r| r.date);
            out.push(EntitySeries {
                entity: name,
                points: rows
                    .iter()
                    .map(|r| SeriesPoint {
                        date: r.date,
                        value: col.get(r),
                    })
                    .collect(),
                moving_average: None,
            });
        }
        Ok(out)
    }

    /// `time_series` with each series' trailing moving average attached
    pub fn time_series_with_average<S: AsRef<str>>(
        &self,
        entities: &[S],
        metric: &str,
        window: usize,
    ) -> Result<Vec<EntitySeries>, QueryError> {
        let mut series = self.time_series(entities, metric)?;
        for s in &mut series {
            s.moving_average = Some(rolling_average(&s.values(), window)?);
        }
        Ok(series)
    }

    fn to_entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .rows
            .iter()
            .map(|r| r.country.as_str())
            .collect::<HashSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    /// Elementwise `part / whole × 100` for every selected row.
    pub fn derived_rate(&self, part: &str, whole: &str) -> Result<Vec<Option<f64>>, QueryError> {
        let p = self.metric(part)?;
        let w = self.metric(whole)?;
        Ok(self.rows.iter().map(|r| derived_rate(p.get(r), w.get(r))).collect())
    }

    /// Rows ranked descending by `part / whole × 100`; rows without a defined rate are excluded.
    pub fn top_n_by_derived_rate(&self, part: &str, whole: &str, n: usize) -> Result<Vec<RatedRow<'a>>, QueryError> {
        if n == 0 {
            return Err(QueryError::ZeroLimit);
        }
        let rates = self.derived_rate(part, whole)?;
        let mut ranked: Vec<RatedRow<'a>> = self
            .rows
            .iter()
            .zip(rates)
            .filter_map(|(r, rate)| {
                rate.map(|rate| RatedRow {
                    record: *r,
                    country: r.country.as_str(),
                    iso_code: r.iso_code.as_str(),
                    rate,
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.rate.total_cmp(&a.rate));
        ranked.truncate(n);
        Ok(ranked)
    }
}

/// `part / whole × 100`, or null when either side is null or the denominator is zero.
pub fn derived_rate(part: Option<f64>, whole: Option<f64>) -> Option<f64> {
    let (p, w) = (part?, whole?);
    if w == 0.0 {
        return None;
    }
    let rate = p / w * 100.0;
    rate.is_finite().then_some(rate)
}

/// Trailing simple moving average. Output has the input's length; a position is
/// defined only when all `window` samples ending there are non-null, so the first
/// `window - 1` positions and any window touching a gap are null.
pub fn rolling_average(values: &[Option<f64>], window: usize) -> Result<Vec<Option<f64>>, QueryError> {
    rolling_average_with_min_periods(values, window, window)
}

/// Trailing moving average over the non-null samples of each window, emitted once
/// the window holds at least `min_periods` of them (clamped to `1..=window`).
/// Positions before the window is full are always null.
pub fn rolling_average_with_min_periods(
    values: &[Option<f64>],
    window: usize,
    min_periods: usize,
) -> Result<Vec<Option<f64>>, QueryError> {
    if window == 0 {
        return Err(QueryError::InvalidWindow {
            window,
            max: constants::MAX_WINDOW,
        });
    }
    let min_periods = min_periods.clamp(1, window);
    // each window is summed afresh; a running sum loses small values next to large ones
    let out = (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            let samples: Vec<f64> = values[i + 1 - window..=i].iter().flatten().copied().collect();
            (samples.len() >= min_periods).then(|| samples.iter().sum::<f64>() / samples.len() as f64)
        })
        .collect();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 5, d).unwrap()
    }

    fn record(country: &str, date: NaiveDate, total_cases: Option<f64>, population: Option<f64>) -> Record {
        Record {
            iso_code: country.to_uppercase(),
            continent: None,
            country: country.to_string(),
            date,
            values: vec![total_cases, population],
        }
    }

    fn table() -> CleanTable {
        CleanTable::new(
            vec!["total_cases".into(), "population".into()],
            vec![
                record("a", day(1), Some(10.0), Some(100.0)),
                record("b", day(1), Some(20.0), Some(0.0)),
                record("a", day(2), Some(50.0), Some(100.0)),
                record("b", day(2), Some(30.0), Some(0.0)),
                record("c", day(2), Some(30.0), None),
                record("d", day(2), Some(70.0), Some(1000.0)),
                record("e", day(2), None, Some(10.0)),
            ],
        )
    }

    #[test]
    fn test_latest_snapshot() {
        let t = table();
        let snap = Selection::all(&t).latest_snapshot();
        assert_eq!(snap.len(), 5);
        assert!(snap.rows().iter().all(|r| r.date == day(2)));
    }

    #[test]
    fn test_top_n_sorted_stable_and_truncated() {
        let t = table();
        let snap = Selection::all(&t).latest_snapshot();
        let top = snap.top_n_by_metric("total_cases", 3).unwrap();
        let names: Vec<&str> = top.iter().map(|r| r.country.as_str()).collect();
        // b and c tie at 30; b comes first in row order
        assert_eq!(names, vec!["d", "a", "b"]);
    }

    #[test]
    fn test_top_n_excludes_nulls() {
        let t = table();
        let snap = Selection::all(&t).latest_snapshot();
        let top = snap.top_n_by_metric("total_cases", 10).unwrap();
        assert_eq!(top.len(), 4);
        assert!(top.iter().all(|r| r.country != "e"));
    }

    #[test]
    fn test_metric_validation() {
        let t = table();
        let all = Selection::all(&t);
        assert_eq!(all.top_n_by_metric("", 3).unwrap_err(), QueryError::EmptyMetric);
        assert_eq!(
            all.top_n_by_metric("bogus", 3).unwrap_err(),
            QueryError::UnknownMetric("bogus".into())
        );
        assert_eq!(all.top_n_by_metric("total_cases", 0).unwrap_err(), QueryError::ZeroLimit);
        // whitelisted but absent from this table: fully null, not an error
        assert!(all.top_n_by_metric("new_deaths", 3).unwrap().is_empty());
    }

    #[test]
    fn test_empty_entity_filter_is_pass_through() {
        let t = table();
        let all = Selection::all(&t);
        let none: [&str; 0] = [];
        assert_eq!(all.filter_by_entities(&none).to_table(), t);
        assert_eq!(all.filter_by_entities(&["a", "zz"]).len(), 2);
    }

    #[test]
    fn test_date_range_filter() {
        let t = table();
        let all = Selection::all(&t);
        assert_eq!(all.filter_by_date_range(Some(day(2)), None).unwrap().len(), 5);
        assert_eq!(all.filter_by_date_range(None, Some(day(1))).unwrap().len(), 2);
        assert_eq!(all.filter_by_date_range(Some(day(1)), Some(day(2))).unwrap().len(), 7);
        assert!(matches!(
            all.filter_by_date_range(Some(day(2)), Some(day(1))),
            Err(QueryError::InvertedDateRange { .. })
        ));
    }

    #[test]
    fn test_filters_compose() {
        let t = table();
        let sel = Selection::all(&t)
            .filter_by_entities(&["a", "b"])
            .filter_by_date_range(Some(day(2)), Some(day(2)))
            .unwrap();
        assert_eq!(sel.len(), 2);
    }

    #[test]
    fn test_time_series_per_entity_in_requested_order() {
        let t = table();
        let series = Selection::all(&t).time_series(&["b", "missing", "a"], "total_cases").unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].entity, "b");
        assert_eq!(series[1].values(), vec![Some(10.0), Some(50.0)]);
        assert_eq!(series[1].points[0].date, day(1));
    }

    #[test]
    fn test_time_series_absent_dates_stay_absent() {
        let t = table();
        let series = Selection::all(&t).time_series(&["d"], "total_cases").unwrap();
        assert_eq!(series[0].points, vec![SeriesPoint { date: day(2), value: Some(70.0) }]);
    }

    #[test]
    fn test_derived_rate_guards_zero_and_null() {
        assert_eq!(derived_rate(Some(100.0), Some(0.0)), None);
        assert_eq!(derived_rate(None, Some(10.0)), None);
        assert_eq!(derived_rate(Some(1.0), None), None);
        assert_eq!(derived_rate(Some(25.0), Some(50.0)), Some(50.0));
    }

    #[test]
    fn test_ranking_by_derived_rate_skips_nulls() {
        let t = table();
        let snap = Selection::all(&t).latest_snapshot();
        let ranked = snap.top_n_by_derived_rate("total_cases", "population", 10).unwrap();
        let names: Vec<&str> = ranked.iter().map(|r| r.country).collect();
        assert_eq!(names, vec!["a", "d"]);
        assert_eq!(ranked[0].rate, 50.0);
    }

    #[test]
    fn test_rolling_average() {
        let v: Vec<Option<f64>> = [1.0, 2.0, 3.0, 4.0, 5.0].into_iter().map(Some).collect();
        assert_eq!(
            rolling_average(&v, 3).unwrap(),
            vec![None, None, Some(2.0), Some(3.0), Some(4.0)]
        );
        assert_eq!(rolling_average(&v, 1).unwrap(), v);
        assert!(rolling_average(&v, 0).is_err());
        assert_eq!(rolling_average(&v, 9).unwrap(), vec![None; 5]);
    }

    #[test]
    fn test_rolling_average_gap_policy() {
        let v = vec![Some(1.0), None, Some(3.0), Some(5.0), Some(7.0)];
        assert_eq!(
            rolling_average(&v, 2).unwrap(),
            vec![None, None, None, Some(4.0), Some(6.0)]
        );
        assert_eq!(
            rolling_average_with_min_periods(&v, 2, 1).unwrap(),
            vec![None, Some(1.0), Some(3.0), Some(4.0), Some(6.0)]
        );
    }

    #[test]
    fn test_rolling_average_window_one_is_identity() {
        let v = vec![Some(0.1), Some(0.2), None, Some(0.3)];
        assert_eq!(rolling_average(&v, 1).unwrap(), v);
    }

    #[test]
    fn test_rolling_average_recovers_after_large_value_leaves() {
        let v = vec![Some(1e17), Some(1.0), Some(1.0), Some(1.0)];
        assert_eq!(
            rolling_average(&v, 2).unwrap(),
            vec![None, Some(5e16), Some(1.0), Some(1.0)]
        );
    }
}
