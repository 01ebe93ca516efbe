//! Region ingestor
//!
//! Loads first-level administrative divisions from a Wikidata SPARQL
//! endpoint. Expects standard SPARQL JSON results with `region`,
//! `regionLabel`, `isoCode`, `countryCode`, `lat` and `lng` bindings.
//! Regions link to their country with a `within` edge.

use async_trait::async_trait;

use crate::error::{CrawlError, Result};
use crate::storage::PlaceKind;

use super::dedup::{upsert_place_deduped, PlaceRecord, UpsertResult};
use super::fetch_json;
use super::stage::{IngestContext, IngestSummary, Ingestor};

pub struct RegionsIngestor {
    endpoint: String,
}

impl RegionsIngestor {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl Default for RegionsIngestor {
    fn default() -> Self {
        Self::new("https://query.wikidata.org/sparql?format=json&query=admin-regions-l1")
    }
}

fn binding<'a>(row: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    row.pointer(&format!("/{key}/value"))
        .and_then(serde_json::Value::as_str)
}

#[async_trait]
impl Ingestor for RegionsIngestor {
    fn source(&self) -> &'static str {
        "wikidata-regions"
    }

    fn source_version(&self) -> &'static str {
        "2024-admin1"
    }

    async fn execute(&self, ctx: &IngestContext) -> Result<IngestSummary> {
        let document = fetch_json(ctx, &self.endpoint).await?;
        let rows = document
            .pointer("/results/bindings")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                CrawlError::ParseFailure("regions payload is not SPARQL results JSON".into())
            })?;

        let mut summary = IngestSummary::default();
        let total = rows.len() as u64;
        for (idx, row) in rows.iter().enumerate() {
            if ctx.cancelled() {
                break;
            }

            let Some(label) = binding(row, "regionLabel") else {
                summary.skipped += 1;
                continue;
            };
            // QIDs arrive as entity URIs; the trailing segment is the ID.
            let qid = binding(row, "region")
                .and_then(|uri| uri.rsplit('/').next())
                .map(str::to_string);
            let country_code = binding(row, "countryCode").map(str::to_uppercase);

            let mut external_ids = Vec::new();
            if let Some(qid) = qid {
                external_ids.push(("wikidata".to_string(), qid));
            }

            let record = PlaceRecord {
                name: label.to_string(),
                kind: Some(PlaceKind::Region),
                country_code: country_code.clone(),
                admin_code: binding(row, "isoCode").map(str::to_string),
                lat: binding(row, "lat").and_then(|v| v.parse().ok()),
                lng: binding(row, "lng").and_then(|v| v.parse().ok()),
                external_ids,
                ..PlaceRecord::default()
            };
            let result = upsert_place_deduped(&ctx.storage, &record).await?;
            match result {
                UpsertResult::Created(_) => summary.written += 1,
                UpsertResult::Updated(_) => summary.updated += 1,
            }

            if let Some(code) = &country_code {
                if let Some(country_id) = ctx.storage.find_country(code).await? {
                    ctx.storage
                        .add_hierarchy_edge(country_id, result.place_id(), "within")
                        .await?;
                }
            }

            if idx % 100 == 0 {
                ctx.emit_progress("regions", idx as u64 + 1, Some(total));
            }
        }

        ctx.emit_progress("regions", total, Some(total));
        Ok(summary)
    }
}
