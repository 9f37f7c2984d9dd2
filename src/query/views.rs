//! Dashboard view assembly: request parsing, validation and the four view payloads.

use super::{EntitySeries, Selection};
use crate::config::DashboardSettings;
use crate::constants::{
    self, COMPARISON_TOP_N, OVERVIEW_TOP_N, PEOPLE_FULLY_VACCINATED, PEOPLE_FULLY_VACCINATED_PER_HUNDRED, POPULATION,
    TOTAL_CASES, TOTAL_DEATHS, WORLD_POPULATION,
};
use crate::error::QueryError;
use crate::metrics::QueryMetrics;
use crate::storage::Dataset;
use crate::table::{parse_date, CleanTable, Record};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::debug;

/// Metrics selectable from the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    NewCases,
    NewDeaths,
    TotalCases,
    TotalDeaths,
    NewVaccinations,
    PeopleFullyVaccinated,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::NewCases,
        Metric::NewDeaths,
        Metric::TotalCases,
        Metric::TotalDeaths,
        Metric::NewVaccinations,
        Metric::PeopleFullyVaccinated,
    ];

    /// Column name in the dataset
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::NewCases => "new_cases",
            Metric::NewDeaths => "new_deaths",
            Metric::TotalCases => "total_cases",
            Metric::TotalDeaths => "total_deaths",
            Metric::NewVaccinations => "new_vaccinations",
            Metric::PeopleFullyVaccinated => "people_fully_vaccinated",
        }
    }

    /// Human-readable label for charts
    pub fn title(self) -> &'static str {
        match self {
            Metric::NewCases => "New Cases",
            Metric::NewDeaths => "New Deaths",
            Metric::TotalCases => "Total Cases",
            Metric::TotalDeaths => "Total Deaths",
            Metric::NewVaccinations => "New Vaccinations",
            Metric::PeopleFullyVaccinated => "People Fully Vaccinated",
        }
    }

    /// Per-million counterpart column and its label, for case and death metrics only
    pub fn per_capita(self) -> Option<(&'static str, &'static str)> {
        match self {
            Metric::NewCases => Some(("new_cases_per_million", "New Cases per Million")),
            Metric::NewDeaths => Some(("new_deaths_per_million", "New Deaths per Million")),
            Metric::TotalCases => Some(("total_cases_per_million", "Total Cases per Million")),
            Metric::TotalDeaths => Some(("total_deaths_per_million", "Total Deaths per Million")),
            Metric::NewVaccinations | Metric::PeopleFullyVaccinated => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(QueryError::EmptyMetric);
        }
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| QueryError::UnknownMetric(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    Overview,
    TimeSeries,
    Comparison,
    Vaccination,
}

impl FromStr for ViewMode {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "overview" => Ok(ViewMode::Overview),
            "time_series" => Ok(ViewMode::TimeSeries),
            "comparison" => Ok(ViewMode::Comparison),
            "vaccination" => Ok(ViewMode::Vaccination),
            _ => Err(QueryError::UnknownView(s.to_string())),
        }
    }
}

/// Validated dashboard parameters
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    /// Empty means every entity
    pub entities: Vec<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub metric: Metric,
    pub view: ViewMode,
    pub window: usize,
    pub vaccination_entities: Vec<String>,
}

impl DashboardConfig {
    pub fn new(settings: &DashboardSettings) -> Self {
        Self {
            entities: settings.default_entities.clone(),
            start: None,
            end: None,
            metric: Metric::NewCases,
            view: ViewMode::Overview,
            window: constants::DEFAULT_WINDOW,
            vaccination_entities: settings.vaccination_entities.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if !(1..=constants::MAX_WINDOW).contains(&self.window) {
            return Err(QueryError::InvalidWindow {
                window: self.window,
                max: constants::MAX_WINDOW,
            });
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(QueryError::InvertedDateRange { start, end });
            }
        }
        if self.view == ViewMode::TimeSeries && self.entities.is_empty() {
            return Err(QueryError::NoEntitiesSelected);
        }
        Ok(())
    }
}

/// Unvalidated parameters as they arrive from a query string or the command line.
/// `entities` and `vaccination_entities` are comma-separated; absent means the
/// configured defaults, an empty string means no filter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewRequest {
    pub view: Option<String>,
    pub metric: Option<String>,
    pub entities: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub window: Option<usize>,
    pub vaccination_entities: Option<String>,
}

impl ViewRequest {
    pub fn into_config(self, settings: &DashboardSettings) -> Result<DashboardConfig, QueryError> {
        let mut config = DashboardConfig::new(settings);
        if let Some(view) = self.view {
            config.view = view.parse()?;
        }
        if let Some(metric) = self.metric {
            config.metric = metric.parse()?;
        }
        if let Some(entities) = self.entities {
            config.entities = split_list(&entities);
        }
        if let Some(entities) = self.vaccination_entities {
            config.vaccination_entities = split_list(&entities);
        }
        config.start = parse_bound(self.start)?;
        config.end = parse_bound(self.end)?;
        if let Some(window) = self.window {
            config.window = window;
        }
        config.validate()?;
        Ok(config)
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bound(s: Option<String>) -> Result<Option<NaiveDate>, QueryError> {
    match s.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_date(s).map(Some).ok_or_else(|| QueryError::InvalidDate(s.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapRow {
    pub iso_code: String,
    pub country: String,
    pub total_cases: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopCountryRow {
    pub country: String,
    pub total_cases: Option<f64>,
    pub total_deaths: Option<f64>,
    pub people_fully_vaccinated: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRow {
    pub country: String,
    pub iso_code: String,
    pub value: f64,
}

impl RankedRow {
    fn new(record: &Record, value: f64) -> Self {
        Self {
            country: record.country.clone(),
            iso_code: record.iso_code.clone(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverviewView {
    pub latest_date: Option<NaiveDate>,
    pub total_cases: f64,
    pub total_deaths: f64,
    /// deaths / cases × 100, 0 when there are no cases
    pub mortality_rate: f64,
    pub map: Vec<MapRow>,
    pub top_countries: Vec<TopCountryRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesView {
    pub metric: Metric,
    pub title: &'static str,
    pub window: usize,
    pub series: Vec<EntitySeries>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerCapitaRanking {
    pub metric: &'static str,
    pub title: &'static str,
    pub rows: Vec<RankedRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonView {
    pub metric: Metric,
    pub title: &'static str,
    pub latest_date: Option<NaiveDate>,
    pub top: Vec<RankedRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_capita: Option<PerCapitaRanking>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VaccinationView {
    pub latest_date: Option<NaiveDate>,
    pub total_fully_vaccinated: f64,
    /// Percentage of the approximate world population
    pub global_rate: f64,
    /// people_fully_vaccinated / population × 100
    pub top_by_rate: Vec<RankedRow>,
    /// people_fully_vaccinated_per_hundred over time
    pub trend: Vec<EntitySeries>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum DashboardView {
    Overview(OverviewView),
    TimeSeries(TimeSeriesView),
    Comparison(ComparisonView),
    Vaccination(VaccinationView),
}

/// A view plus the identity of the snapshot it was computed from
#[derive(Debug, Clone, Serialize)]
pub struct ViewPayload {
    pub last_updated: String,
    pub dataset_version: String,
    #[serde(flatten)]
    pub view: DashboardView,
}

/// Build the configured view over a loaded snapshot
pub fn render(dataset: &Dataset, config: &DashboardConfig) -> Result<ViewPayload, QueryError> {
    let started = Instant::now();
    let view = build_view(&dataset.table, config)?;
    QueryMetrics::record_view(started.elapsed().as_secs_f64());
    Ok(ViewPayload {
        last_updated: dataset.last_updated.clone(),
        dataset_version: dataset.version.clone(),
        view,
    })
}

/// Apply the entity and date filters, then assemble the requested view
pub fn build_view(table: &CleanTable, config: &DashboardConfig) -> Result<DashboardView, QueryError> {
    config.validate()?;
    let filtered = Selection::all(table)
        .filter_by_entities(&config.entities)
        .filter_by_date_range(config.start, config.end)?;
    debug!(view = ?config.view, metric = %config.metric, rows = filtered.len(), "Building view");

    Ok(match config.view {
        ViewMode::Overview => DashboardView::Overview(overview(&filtered)?),
        ViewMode::TimeSeries => DashboardView::TimeSeries(time_series(&filtered, config)?),
        ViewMode::Comparison => DashboardView::Comparison(comparison(&filtered, config.metric)?),
        ViewMode::Vaccination => DashboardView::Vaccination(vaccination(&filtered, &config.vaccination_entities)?),
    })
}

fn overview(filtered: &Selection<'_>) -> Result<OverviewView, QueryError> {
    let latest = filtered.latest_snapshot();
    let table = latest.table();
    let total_cases = latest.sum(TOTAL_CASES)?;
    let total_deaths = latest.sum(TOTAL_DEATHS)?;
    let mortality_rate = if total_cases > 0.0 {
        total_deaths / total_cases * 100.0
    } else {
        0.0
    };

    let map = latest
        .rows()
        .iter()
        .map(|r| MapRow {
            iso_code: r.iso_code.clone(),
            country: r.country.clone(),
            total_cases: table.value(r, TOTAL_CASES),
        })
        .collect();

    let top_countries = latest
        .top_n_by_metric(TOTAL_CASES, OVERVIEW_TOP_N)?
        .into_iter()
        .map(|r| TopCountryRow {
            country: r.country.clone(),
            total_cases: table.value(r, TOTAL_CASES),
            total_deaths: table.value(r, TOTAL_DEATHS),
            people_fully_vaccinated: table.value(r, PEOPLE_FULLY_VACCINATED),
        })
        .collect();

    Ok(OverviewView {
        latest_date: latest.max_date(),
        total_cases,
        total_deaths,
        mortality_rate,
        map,
        top_countries,
    })
}

fn time_series(filtered: &Selection<'_>, config: &DashboardConfig) -> Result<TimeSeriesView, QueryError> {
    if config.entities.is_empty() {
        return Err(QueryError::NoEntitiesSelected);
    }
    let series = filtered.time_series_with_average(&config.entities, config.metric.as_str(), config.window)?;
    Ok(TimeSeriesView {
        metric: config.metric,
        title: config.metric.title(),
        window: config.window,
        series,
    })
}

fn ranked(selection: &Selection<'_>, column: &str, n: usize) -> Result<Vec<RankedRow>, QueryError> {
    let table = selection.table();
    Ok(selection
        .top_n_by_metric(column, n)?
        .into_iter()
        .filter_map(|r| table.value(r, column).map(|v| RankedRow::new(r, v)))
        .collect())
}

fn comparison(filtered: &Selection<'_>, metric: Metric) -> Result<ComparisonView, QueryError> {
    let latest = filtered.latest_snapshot();
    let top = ranked(&latest, metric.as_str(), COMPARISON_TOP_N)?;
    let per_capita = match metric.per_capita() {
        Some((column, title)) => Some(PerCapitaRanking {
            metric: column,
            title,
            rows: ranked(&latest, column, COMPARISON_TOP_N)?,
        }),
        None => None,
    };
    Ok(ComparisonView {
        metric,
        title: metric.title(),
        latest_date: latest.max_date(),
        top,
        per_capita,
    })
}

fn vaccination(filtered: &Selection<'_>, trend_entities: &[String]) -> Result<VaccinationView, QueryError> {
    let latest = filtered.latest_snapshot();
    let total_fully_vaccinated = latest.sum(PEOPLE_FULLY_VACCINATED)?;
    let top_by_rate = latest
        .top_n_by_derived_rate(PEOPLE_FULLY_VACCINATED, POPULATION, COMPARISON_TOP_N)?
        .into_iter()
        .map(|r| RankedRow::new(r.record, r.rate))
        .collect();

    // no trend entities means no trend chart, not every entity
    let trend = if trend_entities.is_empty() {
        Vec::new()
    } else {
        filtered.time_series(trend_entities, PEOPLE_FULLY_VACCINATED_PER_HUNDRED)?
    };

    Ok(VaccinationView {
        latest_date: latest.max_date(),
        total_fully_vaccinated,
        global_rate: total_fully_vaccinated / WORLD_POPULATION * 100.0,
        top_by_rate,
        trend,
    })
}
