//! Country ingestor
//!
//! Loads the country layer of the gazetteer from a restcountries-style
//! endpoint: one JSON array with names, ISO codes, coordinates,
//! population and capitals. Capitals become city places linked to their
//! country with a `capital_of` edge; multi-capital countries use the
//! per-capital coordinate table.

use async_trait::async_trait;

use crate::error::{CrawlError, Result};
use crate::storage::PlaceKind;

use super::dedup::{capital_coords, upsert_place_deduped, PlaceRecord, UpsertResult};
use super::fetch_json;
use super::stage::{IngestContext, IngestSummary, Ingestor};

pub struct CountriesIngestor {
    endpoint: String,
}

impl CountriesIngestor {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl Default for CountriesIngestor {
    fn default() -> Self {
        Self::new("https://restcountries.com/v3.1/all")
    }
}

#[async_trait]
impl Ingestor for CountriesIngestor {
    fn source(&self) -> &'static str {
        "restcountries"
    }

    fn source_version(&self) -> &'static str {
        "v3.1"
    }

    async fn execute(&self, ctx: &IngestContext) -> Result<IngestSummary> {
        let document = fetch_json(ctx, &self.endpoint).await?;
        let countries = document
            .as_array()
            .ok_or_else(|| CrawlError::ParseFailure("countries payload is not an array".into()))?;

        let mut summary = IngestSummary::default();
        let total = countries.len() as u64;
        for (idx, country) in countries.iter().enumerate() {
            if ctx.cancelled() {
                break;
            }

            let Some(name) = country
                .pointer("/name/common")
                .and_then(serde_json::Value::as_str)
            else {
                summary.skipped += 1;
                continue;
            };
            let Some(code) = country.get("cca2").and_then(serde_json::Value::as_str) else {
                summary.skipped += 1;
                continue;
            };

            let latlng = country.get("latlng").and_then(serde_json::Value::as_array);
            let lat = latlng.and_then(|a| a.first()).and_then(serde_json::Value::as_f64);
            let lng = latlng.and_then(|a| a.get(1)).and_then(serde_json::Value::as_f64);
            let aliases: Vec<String> = country
                .get("altSpellings")
                .and_then(serde_json::Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(serde_json::Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            let record = PlaceRecord {
                name: name.to_string(),
                kind: Some(PlaceKind::Country),
                country_code: Some(code.to_string()),
                lat,
                lng,
                population: country
                    .get("population")
                    .and_then(serde_json::Value::as_i64),
                external_ids: vec![("iso-3166".to_string(), code.to_string())],
                aliases,
                ..PlaceRecord::default()
            };
            let country_result = upsert_place_deduped(&ctx.storage, &record).await?;
            match country_result {
                UpsertResult::Created(_) => summary.written += 1,
                UpsertResult::Updated(_) => summary.updated += 1,
            }

            // Capitals: one city place per declared capital.
            if let Some(capitals) = country.get("capital").and_then(serde_json::Value::as_array) {
                for capital in capitals.iter().filter_map(serde_json::Value::as_str) {
                    let coords = capital_coords(code, capital);
                    let capital_record = PlaceRecord {
                        name: capital.to_string(),
                        kind: Some(PlaceKind::City),
                        country_code: Some(code.to_string()),
                        lat: coords.map(|c| c.0),
                        lng: coords.map(|c| c.1),
                        ..PlaceRecord::default()
                    };
                    let capital_result =
                        upsert_place_deduped(&ctx.storage, &capital_record).await?;
                    ctx.storage
                        .add_hierarchy_edge(
                            country_result.place_id(),
                            capital_result.place_id(),
                            "capital_of",
                        )
                        .await?;
                }
            }

            if idx % 25 == 0 {
                ctx.emit_progress("countries", idx as u64 + 1, Some(total));
            }
        }

        ctx.emit_progress("countries", total, Some(total));
        Ok(summary)
    }
}
