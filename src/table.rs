//! Raw and cleaned tabular shapes plus the CSV codec shared by the cleaner and the dataset store.

use crate::constants::{self, CONTINENT, COUNTRY, DATE, ISO_CODE, LOCATION};
use crate::error::MissingCriticalFieldError;
use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::{Read, Write};

/// The source table as delivered: header names plus untyped rows.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<StringRecord>,
}

impl RawTable {
    /// Parse a delimited text table. Ragged rows are accepted; short rows read as empty cells.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            rows.push(record?);
        }
        Ok(Self { headers, rows })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One cleaned (entity, date) observation. `values` lines up with `CleanTable::columns`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub iso_code: String,
    pub continent: Option<String>,
    pub country: String,
    pub date: NaiveDate,
    pub values: Vec<Option<f64>>,
}

/// Canonical dataset: identifying fields are always present, numeric columns are nullable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CleanTable {
    columns: Vec<String>,
    rows: Vec<Record>,
}

impl CleanTable {
    pub fn new(columns: Vec<String>, rows: Vec<Record>) -> Self {
        debug_assert!(rows.iter().all(|r| r.values.len() == columns.len()));
        Self { columns, rows }
    }

    /// Numeric column names, in storage order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Record] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value of `column` for `row`; an absent column reads as null.
    pub fn value(&self, row: &Record, column: &str) -> Option<f64> {
        self.column_index(column).and_then(|i| row.values.get(i).copied().flatten())
    }

    /// Sorted, de-duplicated entity names.
    pub fn entities(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|r| r.country.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Earliest and latest date present.
    pub fn date_span(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.rows.iter().map(|r| r.date).min()?;
        let max = self.rows.iter().map(|r| r.date).max()?;
        Some((min, max))
    }

    /// Write header plus rows. Nulls become empty cells; floats use the shortest round-trip form.
    pub fn write_csv<W: Write>(&self, writer: &mut csv::Writer<W>) -> Result<(), csv::Error> {
        let mut header: Vec<&str> = vec![ISO_CODE, CONTINENT, COUNTRY, DATE];
        header.extend(self.columns.iter().map(String::as_str));
        writer.write_record(&header)?;

        for row in &self.rows {
            let mut cells: Vec<String> = Vec::with_capacity(4 + row.values.len());
            cells.push(row.iso_code.clone());
            cells.push(row.continent.clone().unwrap_or_default());
            cells.push(row.country.clone());
            cells.push(row.date.format(constants::DATE_FORMAT).to_string());
            cells.extend(row.values.iter().map(|v| v.map(|x| x.to_string()).unwrap_or_default()));
            writer.write_record(&cells)?;
        }
        Ok(())
    }
}

/// Which numeric columns a layout keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSelection {
    /// Only the fixed whitelist, in whitelist order
    Whitelist,
    /// Whitelisted columns first, then any other non-identifying column in file order
    AllNumeric,
}

/// Header positions resolved once per table.
#[derive(Debug, Clone)]
pub(crate) struct ColumnLayout {
    pub iso_code: Option<usize>,
    pub continent: Option<usize>,
    pub country: Option<usize>,
    pub date: Option<usize>,
    pub numeric: Vec<(String, usize)>,
}

/// Parse output before any imputation.
#[derive(Debug, Default)]
pub(crate) struct ParsedRows {
    pub table: CleanTable,
    pub dropped: Vec<MissingCriticalFieldError>,
    pub unparsable_values: usize,
}

impl ColumnLayout {
    pub fn resolve(headers: &[String], selection: ColumnSelection) -> Self {
        let find = |name: &str| headers.iter().position(|h| h == name);

        // Already-clean input carries `country`; the raw source carries `location`.
        let country = find(LOCATION).or_else(|| find(COUNTRY));

        let mut numeric: Vec<(String, usize)> = constants::NUMERIC_COLUMNS
            .iter()
            .filter_map(|name| find(name).map(|i| (name.to_string(), i)))
            .collect();

        if selection == ColumnSelection::AllNumeric {
            let identifying = [ISO_CODE, CONTINENT, COUNTRY, LOCATION, DATE];
            for (i, h) in headers.iter().enumerate() {
                if h.is_empty() || identifying.contains(&h.as_str()) || constants::is_whitelisted(h) {
                    continue;
                }
                numeric.push((h.clone(), i));
            }
        }

        Self {
            iso_code: find(ISO_CODE),
            continent: find(CONTINENT),
            country,
            date: find(DATE),
            numeric,
        }
    }

    /// First identifying column the header set lacks entirely, if any.
    pub fn missing_critical_column(&self) -> Option<&'static str> {
        if self.iso_code.is_none() {
            Some(ISO_CODE)
        } else if self.country.is_none() {
            Some(COUNTRY)
        } else if self.date.is_none() {
            Some(DATE)
        } else {
            None
        }
    }

    /// Type every row, dropping rows without identifying fields.
    pub fn parse(&self, raw: &RawTable) -> ParsedRows {
        let columns: Vec<String> = self.numeric.iter().map(|(name, _)| name.clone()).collect();
        let mut rows = Vec::with_capacity(raw.rows.len());
        let mut dropped = Vec::new();
        let mut unparsable_values = 0usize;

        for (i, record) in raw.rows.iter().enumerate() {
            let row_number = i + 1;
            let cell = |idx: Option<usize>| idx.and_then(|j| record.get(j)).map(str::trim).filter(|s| !s.is_empty());

            let Some(iso_code) = cell(self.iso_code) else {
                dropped.push(MissingCriticalFieldError { row: row_number, field: ISO_CODE });
                continue;
            };
            let Some(country) = cell(self.country) else {
                dropped.push(MissingCriticalFieldError { row: row_number, field: COUNTRY });
                continue;
            };
            let Some(date) = cell(self.date).and_then(parse_date) else {
                dropped.push(MissingCriticalFieldError { row: row_number, field: DATE });
                continue;
            };

            let values = self
                .numeric
                .iter()
                .map(|(_, j)| {
                    let text = record.get(*j).map(str::trim).unwrap_or("");
                    match parse_numeric(text) {
                        Ok(v) => v,
                        Err(()) => {
                            unparsable_values += 1;
                            None
                        }
                    }
                })
                .collect();

            rows.push(Record {
                iso_code: iso_code.to_string(),
                continent: cell(self.continent).map(str::to_string),
                country: country.to_string(),
                date,
                values,
            });
        }

        ParsedRows {
            table: CleanTable::new(columns, rows),
            dropped,
            unparsable_values,
        }
    }
}

/// `YYYY-MM-DD`, tolerating a trailing midnight time component.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, constants::DATE_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

/// Empty cells are null. Text that does not parse to a finite number is an error the caller counts.
fn parse_numeric(s: &str) -> Result<Option<f64>, ()> {
    if s.is_empty() {
        return Ok(None);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        Ok(_) if s.eq_ignore_ascii_case("nan") => Ok(None),
        _ => Err(()),
    }
}
