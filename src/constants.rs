/// Column, file and default-selection constants shared by the pipeline and the query layer

pub const DEFAULT_SOURCE_URL: &str = "https://covid.ourworldindata.org/data/owid-covid-data.csv";

pub const DATASET_FILE: &str = "processed_covid_data.csv";
pub const LAST_UPDATED_FILE: &str = "last_updated.txt";

/// Format of the freshness marker
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// Identifying columns
pub const ISO_CODE: &str = "iso_code";
pub const CONTINENT: &str = "continent";
pub const COUNTRY: &str = "country";
pub const DATE: &str = "date";

/// Source name of the entity-name column, renamed to `country` on clean
pub const LOCATION: &str = "location";

/// Numeric columns kept from the raw source, in output order
pub const NUMERIC_COLUMNS: &[&str] = &[
    "total_cases",
    "new_cases",
    "total_deaths",
    "new_deaths",
    "total_cases_per_million",
    "new_cases_per_million",
    "total_deaths_per_million",
    "new_deaths_per_million",
    "reproduction_rate",
    "icu_patients",
    "hosp_patients",
    "total_tests",
    "new_tests",
    "total_vaccinations",
    "people_vaccinated",
    "people_fully_vaccinated",
    "new_vaccinations",
    "population",
    "population_density",
    "median_age",
    "gdp_per_capita",
    "hospital_beds_per_thousand",
    "people_fully_vaccinated_per_hundred",
];

// Columns the dashboard views read directly
pub const TOTAL_CASES: &str = "total_cases";
pub const TOTAL_DEATHS: &str = "total_deaths";
pub const PEOPLE_FULLY_VACCINATED: &str = "people_fully_vaccinated";
pub const PEOPLE_FULLY_VACCINATED_PER_HUNDRED: &str = "people_fully_vaccinated_per_hundred";
pub const POPULATION: &str = "population";

/// Approximate world population used for the global vaccination rate
pub const WORLD_POPULATION: f64 = 7_900_000_000.0;

pub const DEFAULT_ENTITIES: &[&str] = &["United States", "India", "Brazil", "United Kingdom"];
pub const DEFAULT_VACCINATION_ENTITIES: &[&str] =
    &["United States", "United Kingdom", "Israel", "Canada"];

/// Upper bound accepted for `dashboard.stale_after_hours` (ten years)
pub const MAX_STALE_AFTER_HOURS: u64 = 24 * 365 * 10;

pub const DEFAULT_WINDOW: usize = 7;
pub const MAX_WINDOW: usize = 30;

pub const OVERVIEW_TOP_N: usize = 10;
pub const COMPARISON_TOP_N: usize = 20;

/// Whether a numeric column name is one the cleaner keeps
pub fn is_whitelisted(column: &str) -> bool {
    NUMERIC_COLUMNS.contains(&column)
}

pub fn default_entities() -> Vec<String> {
    DEFAULT_ENTITIES.iter().map(|s| s.to_string()).collect()
}

pub fn default_vaccination_entities() -> Vec<String> {
    DEFAULT_VACCINATION_ENTITIES.iter().map(|s| s.to_string()).collect()
}
