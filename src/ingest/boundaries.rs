//! Boundary ingestor
//!
//! Attaches OSM administrative boundaries to already-ingested places:
//! one array of `{ osmId, name, countryCode, adminLevel, bbox }`. The
//! bounding box lands in the place's extra JSON; the OSM ID becomes an
//! external identifier so later runs match by ID.

use async_trait::async_trait;

use crate::error::{CrawlError, Result};
use crate::storage::PlaceKind;

use super::dedup::{upsert_place_deduped, PlaceRecord, UpsertResult};
use super::fetch_json;
use super::stage::{IngestContext, IngestSummary, Ingestor};

pub struct BoundariesIngestor {
    endpoint: String,
}

impl BoundariesIngestor {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl Default for BoundariesIngestor {
    fn default() -> Self {
        Self::new("https://osm-boundaries.example/admin.json")
    }
}

/// OSM admin_level → gazetteer kind
fn kind_for_admin_level(level: i64) -> PlaceKind {
    match level {
        2 => PlaceKind::Country,
        3..=6 => PlaceKind::Region,
        7..=10 => PlaceKind::City,
        _ => PlaceKind::Other,
    }
}

#[async_trait]
impl Ingestor for BoundariesIngestor {
    fn source(&self) -> &'static str {
        "osm-boundaries"
    }

    fn source_version(&self) -> &'static str {
        "admin-2024"
    }

    async fn execute(&self, ctx: &IngestContext) -> Result<IngestSummary> {
        let document = fetch_json(ctx, &self.endpoint).await?;
        let boundaries = document
            .as_array()
            .ok_or_else(|| CrawlError::ParseFailure("boundaries payload is not an array".into()))?;

        let mut summary = IngestSummary::default();
        let total = boundaries.len() as u64;
        for (idx, boundary) in boundaries.iter().enumerate() {
            if ctx.cancelled() {
                break;
            }

            let Some(name) = boundary.get("name").and_then(serde_json::Value::as_str) else {
                summary.skipped += 1;
                continue;
            };
            let Some(osm_id) = boundary.get("osmId").and_then(serde_json::Value::as_i64) else {
                summary.skipped += 1;
                continue;
            };
            let admin_level = boundary
                .get("adminLevel")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0);
            let bbox = boundary.get("bbox").cloned().unwrap_or(serde_json::Value::Null);

            // Centroid from the bbox gives the proximity rung something
            // to match against when IDs and names both miss.
            let (lat, lng) = bbox
                .as_array()
                .filter(|b| b.len() == 4)
                .and_then(|b| {
                    let vals: Vec<f64> = b.iter().filter_map(serde_json::Value::as_f64).collect();
                    (vals.len() == 4).then(|| ((vals[0] + vals[2]) / 2.0, (vals[1] + vals[3]) / 2.0))
                })
                .map_or((None, None), |(lat, lng)| (Some(lat), Some(lng)));

            let record = PlaceRecord {
                name: name.to_string(),
                kind: Some(kind_for_admin_level(admin_level)),
                country_code: boundary
                    .get("countryCode")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_uppercase),
                lat,
                lng,
                external_ids: vec![("osm".to_string(), osm_id.to_string())],
                extra: Some(serde_json::json!({ "bbox": bbox, "admin_level": admin_level })),
                ..PlaceRecord::default()
            };
            match upsert_place_deduped(&ctx.storage, &record).await? {
                UpsertResult::Created(_) => summary.written += 1,
                UpsertResult::Updated(_) => summary.updated += 1,
            }

            if idx % 200 == 0 {
                ctx.emit_progress("boundaries", idx as u64 + 1, Some(total));
            }
        }

        ctx.emit_progress("boundaries", total, Some(total));
        Ok(summary)
    }
}
