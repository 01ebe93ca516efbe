//! City ingestor
//!
//! Loads populated places from a geonames-style JSON export: one array
//! of `{ name, countryCode, admin1, lat, lng, population, geonameId }`.
//! Cities link to their admin-1 region when it is already ingested,
//! falling back to the country.

use async_trait::async_trait;

use crate::error::{CrawlError, Result};
use crate::storage::PlaceKind;

use super::dedup::{upsert_place_deduped, PlaceRecord, UpsertResult};
use super::fetch_json;
use super::stage::{IngestContext, IngestSummary, Ingestor};

pub struct CitiesIngestor {
    endpoint: String,
    /// Cities below this population are skipped
    min_population: i64,
}

impl CitiesIngestor {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, min_population: i64) -> Self {
        Self {
            endpoint: endpoint.into(),
            min_population,
        }
    }
}

impl Default for CitiesIngestor {
    fn default() -> Self {
        Self::new("https://download.geonames.org/export/cities15000.json", 15_000)
    }
}

#[async_trait]
impl Ingestor for CitiesIngestor {
    fn source(&self) -> &'static str {
        "geonames-cities"
    }

    fn source_version(&self) -> &'static str {
        "cities15000"
    }

    async fn execute(&self, ctx: &IngestContext) -> Result<IngestSummary> {
        let document = fetch_json(ctx, &self.endpoint).await?;
        let cities = document
            .as_array()
            .ok_or_else(|| CrawlError::ParseFailure("cities payload is not an array".into()))?;

        let mut summary = IngestSummary::default();
        let total = cities.len() as u64;
        for (idx, city) in cities.iter().enumerate() {
            if ctx.cancelled() {
                break;
            }

            let Some(name) = city.get("name").and_then(serde_json::Value::as_str) else {
                summary.skipped += 1;
                continue;
            };
            let population = city.get("population").and_then(serde_json::Value::as_i64);
            if population.unwrap_or(0) < self.min_population {
                summary.skipped += 1;
                continue;
            }
            let country_code = city
                .get("countryCode")
                .and_then(serde_json::Value::as_str)
                .map(str::to_uppercase);
            let admin_code = city
                .get("admin1")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string);

            let mut external_ids = Vec::new();
            if let Some(id) = city.get("geonameId").and_then(serde_json::Value::as_i64) {
                external_ids.push(("geonames".to_string(), id.to_string()));
            }

            let record = PlaceRecord {
                name: name.to_string(),
                kind: Some(PlaceKind::City),
                country_code: country_code.clone(),
                // City rows carry their region's code; the city itself is
                // matched by external ID, name or proximity instead.
                admin_code: None,
                lat: city.get("lat").and_then(serde_json::Value::as_f64),
                lng: city.get("lng").and_then(serde_json::Value::as_f64),
                population,
                external_ids,
                ..PlaceRecord::default()
            };
            let result = upsert_place_deduped(&ctx.storage, &record).await?;
            match result {
                UpsertResult::Created(_) => summary.written += 1,
                UpsertResult::Updated(_) => summary.updated += 1,
            }

            // Prefer the admin-1 region as parent, else the country.
            let mut parent = None;
            if let (Some(code), Some(admin)) = (&country_code, &admin_code) {
                parent = ctx
                    .storage
                    .find_place_by_admin_code(code, admin, PlaceKind::Region)
                    .await?;
            }
            if parent.is_none() {
                if let Some(code) = &country_code {
                    parent = ctx.storage.find_country(code).await?;
                }
            }
            if let Some(parent_id) = parent {
                ctx.storage
                    .add_hierarchy_edge(parent_id, result.place_id(), "within")
                    .await?;
            }

            if idx % 500 == 0 {
                ctx.emit_progress("cities", idx as u64 + 1, Some(total));
            }
        }

        ctx.emit_progress("cities", total, Some(total));
        Ok(summary)
    }
}
