//! Raw table to canonical dataset.

use crate::error::MissingCriticalFieldError;
use crate::pipeline::impute::{self, ImputeStats};
use crate::table::{CleanTable, ColumnLayout, ColumnSelection, RawTable};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// How many dropped rows are logged individually before only the totals are reported
const DROPPED_ROWS_LOGGED: usize = 10;

/// Summary of a clean pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanReport {
    pub input_rows: usize,
    pub kept_rows: usize,
    pub columns_kept: Vec<String>,
    #[serde(skip)]
    pub dropped: Vec<MissingCriticalFieldError>,
    pub unparsable_values: usize,
    pub imputed: ImputeStats,
}

impl CleanReport {
    pub fn dropped_rows(&self) -> usize {
        self.dropped.len()
    }

    /// Dropped-row counts per missing field
    pub fn dropped_by_field(&self) -> BTreeMap<&'static str, usize> {
        let mut out = BTreeMap::new();
        for d in &self.dropped {
            *out.entry(d.field).or_insert(0) += 1;
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub table: CleanTable,
    pub report: CleanReport,
}

/// Raw table to canonical table: select whitelisted columns, drop rows without
/// identifying fields, then impute per entity. Deterministic and idempotent.
#[instrument(skip(raw), fields(rows = raw.len()))]
pub fn clean(raw: &RawTable) -> CleanOutcome {
    info!("Cleaning and preprocessing data");

    let layout = ColumnLayout::resolve(&raw.headers, ColumnSelection::Whitelist);
    if let Some(column) = layout.missing_critical_column() {
        warn!(column, "input lacks an identifying column; every row will be dropped");
    }

    let parsed = layout.parse(raw);
    let mut table = parsed.table;
    let imputed = impute::impute(&mut table);

    for d in parsed.dropped.iter().take(DROPPED_ROWS_LOGGED) {
        debug!("Dropping row: {}", d);
    }

    let report = CleanReport {
        input_rows: raw.len(),
        kept_rows: table.len(),
        columns_kept: table.columns().to_vec(),
        dropped: parsed.dropped,
        unparsable_values: parsed.unparsable_values,
        imputed,
    };

    if report.dropped_rows() > 0 {
        warn!(
            dropped = report.dropped_rows(),
            by_field = ?report.dropped_by_field(),
            "Dropped rows with missing critical data"
        );
    }
    if report.unparsable_values > 0 {
        warn!(count = report.unparsable_values, "Unparsable numeric cells treated as null");
    }
    info!(
        kept = report.kept_rows,
        columns = report.columns_kept.len(),
        forward_filled = imputed.forward_filled,
        median_filled = imputed.median_filled,
        "Data cleaned successfully"
    );

    CleanOutcome { table, report }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const RAW: &str = "\
iso_code,continent,location,date,total_cases,new_cases,reproduction_rate,stringency_index
AAA,Europe,Alpha,2021-01-01,5,5,10,40
AAA,Europe,Alpha,2021-01-02,,1,,41
AAA,Europe,Alpha,2021-01-03,,0,30,42
AAA,Europe,Alpha,2021-01-04,8,3,,43
BBB,Asia,Beta,2021-01-01,,2,,50
,,International,2021-01-01,100,1,1,1
";

    fn raw() -> RawTable {
        RawTable::from_reader(RAW.as_bytes()).unwrap()
    }

    #[test]
    fn test_clean_selects_whitelist_and_renames() {
        let out = clean(&raw());
        assert_eq!(out.table.columns(), &["total_cases", "new_cases", "reproduction_rate"]);
        assert_eq!(out.report.input_rows, 6);
        assert_eq!(out.report.kept_rows, 5);
        assert_eq!(out.report.dropped_rows(), 1);
        assert_eq!(out.report.dropped_by_field().get("iso_code"), Some(&1));
        assert!(out.table.rows().iter().all(|r| !r.iso_code.is_empty() && !r.country.is_empty()));
    }

    #[test]
    fn test_clean_fills_cumulative_and_rate_columns() {
        let out = clean(&raw());
        let alpha: Vec<_> = out.table.rows().iter().filter(|r| r.country == "Alpha").collect();
        let totals: Vec<Option<f64>> = alpha.iter().map(|r| r.values[0]).collect();
        assert_eq!(totals, vec![Some(5.0), Some(5.0), Some(5.0), Some(8.0)]);
        let rates: Vec<Option<f64>> = alpha.iter().map(|r| r.values[2]).collect();
        assert_eq!(rates, vec![Some(10.0), Some(20.0), Some(30.0), Some(20.0)]);

        // Beta never reported a total or a rate: stays null, nothing borrowed from Alpha
        let beta = out.table.rows().iter().find(|r| r.country == "Beta").unwrap();
        assert_eq!(beta.values[0], None);
        assert_eq!(beta.values[2], None);
        assert_eq!(beta.date, NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
    }

    #[test]
    fn test_clean_without_optional_columns() {
        let raw = RawTable::from_reader("iso_code,location,date\nAAA,Alpha,2021-01-01\n".as_bytes()).unwrap();
        let out = clean(&raw);
        assert!(out.table.columns().is_empty());
        assert_eq!(out.table.len(), 1);
    }

    #[test]
    fn test_clean_without_identifying_column_drops_everything() {
        let raw = RawTable::from_reader("location,date,total_cases\nAlpha,2021-01-01,1\n".as_bytes()).unwrap();
        let out = clean(&raw);
        assert!(out.table.is_empty());
        assert_eq!(out.report.dropped_rows(), 1);
    }
}
