//! Staged ingestion: idempotence, dedup, multi-capital hierarchy

mod common;

use std::sync::Arc;

use common::{countries_payload, CannedPage, StubFetcher};
use newswire_crawler::error::CrawlError;
use newswire_crawler::service::CrawlEngine;
use newswire_crawler::storage::PlaceKind;
use tempfile::TempDir;

async fn engine_with_countries() -> (CrawlEngine, Arc<StubFetcher>, TempDir) {
    let fetcher = StubFetcher::new();
    fetcher.put(
        "https://restcountries.com/v3.1/all",
        CannedPage::json(countries_payload().to_string()),
    );
    let dir = TempDir::new().expect("tempdir");
    let engine = CrawlEngine::open_with_fetcher(dir.path(), Arc::clone(&fetcher) as Arc<dyn newswire_crawler::fetch::Fetcher>)
        .await
        .expect("open engine");
    (engine, fetcher, dir)
}

#[tokio::test]
async fn ingestion_writes_countries_and_capitals() {
    let (engine, _fetcher, _dir) = engine_with_countries().await;
    engine
        .start_ingestion("restcountries", "v3.1", false)
        .await
        .expect("ingest");

    let countries = engine
        .storage()
        .places_by_kind(PlaceKind::Country)
        .await
        .expect("query");
    assert_eq!(countries.len(), 3);

    let cities = engine
        .storage()
        .places_by_kind(PlaceKind::City)
        .await
        .expect("query");
    // Paris, Berlin and South Africa's three capitals.
    assert_eq!(cities.len(), 5);

    let za = engine
        .storage()
        .find_country("ZA")
        .await
        .expect("query")
        .expect("ZA ingested");
    let mut capital_edges = 0;
    for city in &cities {
        let parents = engine
            .storage()
            .place_parents(city.id, "capital_of")
            .await
            .expect("query");
        if parents.contains(&za) {
            capital_edges += 1;
        }
    }
    assert_eq!(capital_edges, 3, "ZA keeps three distinct capitals");
}

#[tokio::test]
async fn completed_run_suppresses_re_ingestion() {
    let (engine, fetcher, _dir) = engine_with_countries().await;
    engine
        .start_ingestion("restcountries", "v3.1", false)
        .await
        .expect("first run");
    let baseline = engine.storage().gazetteer_counts().await.expect("counts");
    let fetches = fetcher.total_fetches();

    let again = engine.start_ingestion("restcountries", "v3.1", false).await;
    match again {
        Err(CrawlError::PreconditionFailed { code, .. }) => {
            assert_eq!(code, "already-completed");
        }
        other => panic!("expected already-completed, got {other:?}"),
    }
    assert_eq!(
        engine.storage().gazetteer_counts().await.expect("counts"),
        baseline,
        "suppressed run must write nothing"
    );
    assert_eq!(fetcher.total_fetches(), fetches, "suppressed run must not fetch");
}

#[tokio::test]
async fn forced_re_ingestion_creates_no_duplicates() {
    let (engine, _fetcher, _dir) = engine_with_countries().await;
    engine
        .start_ingestion("restcountries", "v3.1", false)
        .await
        .expect("first run");
    let baseline = engine.storage().gazetteer_counts().await.expect("counts");

    engine
        .start_ingestion("restcountries", "v3.1", true)
        .await
        .expect("forced run");
    let after = engine.storage().gazetteer_counts().await.expect("counts");
    assert_eq!(after, baseline, "external-ID and name dedup absorb the re-run");
}

#[tokio::test]
async fn running_run_acts_as_advisory_lock() {
    let (engine, _fetcher, _dir) = engine_with_countries().await;
    // Simulate a concurrent run still in flight.
    engine
        .storage()
        .start_ingestion_run("restcountries", "v3.1", false)
        .await
        .expect("manual run");

    let blocked = engine.start_ingestion("restcountries", "v3.1", false).await;
    assert!(matches!(
        blocked,
        Err(CrawlError::PreconditionFailed { code: "ingestion-running", .. })
    ));
}

#[tokio::test]
async fn unknown_source_is_invalid_input() {
    let (engine, _fetcher, _dir) = engine_with_countries().await;
    let result = engine.start_ingestion("moon-bases", "v1", false).await;
    assert!(matches!(result, Err(CrawlError::InvalidInput(_))));
    let result = engine.start_ingestion("restcountries", "v9.9", false).await;
    assert!(matches!(result, Err(CrawlError::InvalidInput(_))));
}

#[tokio::test]
async fn place_can_have_multiple_capital_parents() {
    let (engine, _fetcher, _dir) = engine_with_countries().await;
    let storage = engine.storage();

    let polity_a = storage
        .insert_place(PlaceKind::Country, &Default::default())
        .await
        .expect("insert");
    let polity_b = storage
        .insert_place(PlaceKind::Country, &Default::default())
        .await
        .expect("insert");
    let city = storage
        .insert_place(PlaceKind::City, &Default::default())
        .await
        .expect("insert");

    storage
        .add_hierarchy_edge(polity_a, city, "capital_of")
        .await
        .expect("edge");
    storage
        .add_hierarchy_edge(polity_b, city, "capital_of")
        .await
        .expect("edge");
    // Idempotent on the composite key.
    storage
        .add_hierarchy_edge(polity_b, city, "capital_of")
        .await
        .expect("edge");

    let parents = storage
        .place_parents(city, "capital_of")
        .await
        .expect("query");
    assert_eq!(parents.len(), 2);
}
