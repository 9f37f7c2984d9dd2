use covid_dashboard::config::DashboardSettings;
use covid_dashboard::error::QueryError;
use covid_dashboard::pipeline::clean::clean;
use covid_dashboard::query::cache::DatasetCache;
use covid_dashboard::query::views::{self, DashboardView, ViewRequest};
use covid_dashboard::query::{derived_rate, rolling_average, Selection};
use covid_dashboard::storage::DatasetStore;
use covid_dashboard::table::RawTable;
use std::time::Duration;
use tempfile::tempdir;

const RAW_CSV: &str = "\
iso_code,continent,location,date,total_cases,total_deaths,people_fully_vaccinated,population
AAA,Europe,Alpha,2021-02-01,10,1,,1000
AAA,Europe,Alpha,2021-02-02,40,2,100,1000
BBB,Europe,Bravo,2021-02-02,90,3,50,100
CCC,Asia,Charlie,2021-02-02,40,4,0,0
DDD,Asia,Delta,2021-02-02,70,5,,500
EEE,Africa,Echo,2021-02-02,20,6,10,
";

async fn seeded() -> (tempfile::TempDir, DatasetCache) {
    let dir = tempdir().unwrap();
    let store = DatasetStore::new(dir.path());
    let raw = RawTable::from_reader(RAW_CSV.as_bytes()).unwrap();
    store.save(&clean(&raw).table).unwrap();
    let cache = DatasetCache::new(store, Duration::from_secs(60));
    (dir, cache)
}

#[tokio::test]
async fn test_top_n_over_latest_snapshot() {
    let (_dir, cache) = seeded().await;
    let dataset = cache.get().await.unwrap();
    let snapshot = Selection::all(&dataset.table).latest_snapshot();
    assert_eq!(snapshot.len(), 5);

    let top = snapshot.top_n_by_metric("total_cases", 3).unwrap();
    let names: Vec<&str> = top.iter().map(|r| r.country.as_str()).collect();
    // Alpha and Charlie tie at 40; Alpha precedes Charlie in row order
    assert_eq!(names, vec!["Bravo", "Delta", "Alpha"]);
}

#[tokio::test]
async fn test_filters_and_series_from_loaded_snapshot() {
    let (_dir, cache) = seeded().await;
    let dataset = cache.get().await.unwrap();
    let all = Selection::all(&dataset.table);

    let none: Vec<String> = Vec::new();
    assert_eq!(all.filter_by_entities(&none).len(), dataset.table.len());

    let series = all.time_series(&["Alpha"], "total_cases").unwrap();
    assert_eq!(series[0].values(), vec![Some(10.0), Some(40.0)]);

    let first_day = all
        .filter_by_date_range(None, chrono::NaiveDate::from_ymd_opt(2021, 2, 1))
        .unwrap();
    assert_eq!(first_day.len(), 1);
}

#[test]
fn test_documented_scalar_behaviour() {
    assert_eq!(derived_rate(Some(100.0), Some(0.0)), None);
    let input: Vec<Option<f64>> = (1..=5).map(|v| Some(v as f64)).collect();
    assert_eq!(
        rolling_average(&input, 3).unwrap(),
        vec![None, None, Some(2.0), Some(3.0), Some(4.0)]
    );
}

#[tokio::test]
async fn test_vaccination_view_end_to_end() {
    let (_dir, cache) = seeded().await;
    let dataset = cache.get().await.unwrap();
    let request = ViewRequest {
        view: Some("vaccination".into()),
        entities: Some(String::new()),
        vaccination_entities: Some("Alpha,Bravo".into()),
        ..Default::default()
    };
    let config = request.into_config(&DashboardSettings::default()).unwrap();
    let payload = views::render(&dataset, &config).unwrap();
    assert_eq!(payload.last_updated, dataset.last_updated);

    let DashboardView::Vaccination(v) = payload.view else {
        panic!("expected vaccination view");
    };
    assert_eq!(v.total_fully_vaccinated, 160.0);
    let ranked: Vec<(&str, f64)> = v.top_by_rate.iter().map(|r| (r.country.as_str(), r.value)).collect();
    assert_eq!(ranked, vec![("Bravo", 50.0), ("Alpha", 10.0)]);
    // the per-hundred column is absent from this file, so the trend is all null
    assert!(v.trend.iter().all(|s| s.values().iter().all(Option::is_none)));
}

#[tokio::test]
async fn test_time_series_view_requires_an_entity() {
    let request = ViewRequest {
        view: Some("time_series".into()),
        entities: Some(" , ".into()),
        ..Default::default()
    };
    let err = request.into_config(&DashboardSettings::default()).unwrap_err();
    assert_eq!(err, QueryError::NoEntitiesSelected);
}
