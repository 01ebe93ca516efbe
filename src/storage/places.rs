//! Gazetteer persistence: places, names, external IDs, hierarchy

use sqlx::Row;

use super::Storage;
use crate::error::{CrawlError, Result};

/// Kinds of gazetteer entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceKind {
    Country,
    Region,
    City,
    Other,
}

impl PlaceKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Country => "country",
            Self::Region => "region",
            Self::City => "city",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "country" => Ok(Self::Country),
            "region" => Ok(Self::Region),
            "city" => Ok(Self::City),
            "other" => Ok(Self::Other),
            other => Err(CrawlError::Internal(format!("unknown place kind {other:?}"))),
        }
    }
}

/// Name roles within a place
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameKind {
    Label,
    Alias,
    Official,
    Preferred,
}

impl NameKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Alias => "alias",
            Self::Official => "official",
            Self::Preferred => "preferred",
        }
    }
}

/// A persisted place
#[derive(Debug, Clone)]
pub struct PlaceRow {
    pub id: i64,
    pub kind: PlaceKind,
    pub canonical_name: Option<String>,
    pub country_code: Option<String>,
    pub admin_code: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub population: Option<i64>,
    pub extra: serde_json::Value,
}

/// Fields for inserting or updating a place
#[derive(Debug, Clone, Default)]
pub struct PlaceUpsert {
    pub kind: Option<PlaceKind>,
    pub canonical_name: Option<String>,
    pub country_code: Option<String>,
    pub admin_code: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub population: Option<i64>,
    pub extra: Option<serde_json::Value>,
}

impl Storage {
    /// Insert a new place, returning its ID
    pub async fn insert_place(&self, kind: PlaceKind, fields: &PlaceUpsert) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO places (kind, canonical_name, country_code, admin_code, lat, lng, population, extra)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) RETURNING id",
        )
        .bind(kind.as_str())
        .bind(fields.canonical_name.as_deref())
        .bind(fields.country_code.as_deref())
        .bind(fields.admin_code.as_deref())
        .bind(fields.lat)
        .bind(fields.lng)
        .bind(fields.population)
        .bind(
            fields
                .extra
                .as_ref()
                .map_or_else(|| "{}".to_string(), ToString::to_string),
        )
        .fetch_one(self.pool())
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    /// Update provided fields of an existing place; absent fields are kept
    pub async fn update_place(&self, place_id: i64, fields: &PlaceUpsert) -> Result<()> {
        sqlx::query(
            "UPDATE places SET
                kind = COALESCE(?1, kind),
                canonical_name = COALESCE(?2, canonical_name),
                country_code = COALESCE(?3, country_code),
                admin_code = COALESCE(?4, admin_code),
                lat = COALESCE(?5, lat),
                lng = COALESCE(?6, lng),
                population = COALESCE(?7, population)
             WHERE id = ?8",
        )
        .bind(fields.kind.map(|k| k.as_str()))
        .bind(fields.canonical_name.as_deref())
        .bind(fields.country_code.as_deref())
        .bind(fields.admin_code.as_deref())
        .bind(fields.lat)
        .bind(fields.lng)
        .bind(fields.population)
        .bind(place_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetch one place
    pub async fn get_place(&self, place_id: i64) -> Result<PlaceRow> {
        let row = sqlx::query(
            "SELECT id, kind, canonical_name, country_code, admin_code, lat, lng, population, extra
             FROM places WHERE id = ?1",
        )
        .bind(place_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| CrawlError::InvalidInput(format!("unknown place {place_id}")))?;
        place_from_row(&row)
    }

    /// All places of a kind (for index building)
    pub async fn places_by_kind(&self, kind: PlaceKind) -> Result<Vec<PlaceRow>> {
        let rows = sqlx::query(
            "SELECT id, kind, canonical_name, country_code, admin_code, lat, lng, population, extra
             FROM places WHERE kind = ?1 ORDER BY id",
        )
        .bind(kind.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(place_from_row).collect()
    }

    /// Every place with at least one name; used to build the in-memory index
    pub async fn all_place_names(&self) -> Result<Vec<(i64, String, PlaceKind)>> {
        let rows = sqlx::query(
            "SELECT n.place_id, n.text, p.kind FROM place_names n JOIN places p ON p.id = n.place_id",
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|r| {
                Ok((
                    r.get::<i64, _>(0),
                    r.get::<String, _>(1),
                    PlaceKind::parse(&r.get::<String, _>(2))?,
                ))
            })
            .collect()
    }

    /// Add a name to a place; idempotent on the composite key
    pub async fn add_place_name(
        &self,
        place_id: i64,
        text: &str,
        lang: &str,
        kind: NameKind,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO place_names (place_id, text, lang, kind) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(place_id)
        .bind(text)
        .bind(lang)
        .bind(kind.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Attach an external identifier; idempotent on `(source, ext_id)`
    pub async fn add_external_id(&self, place_id: i64, source: &str, ext_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO place_external_ids (place_id, source, ext_id) VALUES (?1, ?2, ?3)",
        )
        .bind(place_id)
        .bind(source)
        .bind(ext_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Find a place by external identifier
    pub async fn find_place_by_external_id(
        &self,
        source: &str,
        ext_id: &str,
    ) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT place_id FROM place_external_ids WHERE source = ?1 AND ext_id = ?2",
        )
        .bind(source)
        .bind(ext_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|r| r.get(0)))
    }

    /// Find a place by admin code within a country
    pub async fn find_place_by_admin_code(
        &self,
        country_code: &str,
        admin_code: &str,
        kind: PlaceKind,
    ) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT id FROM places WHERE country_code = ?1 AND admin_code = ?2 AND kind = ?3",
        )
        .bind(country_code)
        .bind(admin_code)
        .bind(kind.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|r| r.get(0)))
    }

    /// The country place for an ISO code, if ingested
    pub async fn find_country(&self, country_code: &str) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT id FROM places WHERE kind = 'country' AND country_code = ?1 LIMIT 1",
        )
        .bind(country_code)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|r| r.get(0)))
    }

    /// Find places matching a normalised name within a country
    pub async fn find_places_by_name_and_country(
        &self,
        name: &str,
        country_code: &str,
        kind: PlaceKind,
    ) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT DISTINCT p.id
             FROM places p JOIN place_names n ON n.place_id = p.id
             WHERE LOWER(n.text) = LOWER(?1) AND p.country_code = ?2 AND p.kind = ?3",
        )
        .bind(name)
        .bind(country_code)
        .bind(kind.as_str())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// Places of a kind within a bounding box around a coordinate
    pub async fn find_places_near(
        &self,
        lat: f64,
        lng: f64,
        tolerance_deg: f64,
        kind: PlaceKind,
    ) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT id FROM places
             WHERE kind = ?1
               AND lat BETWEEN ?2 AND ?3
               AND lng BETWEEN ?4 AND ?5",
        )
        .bind(kind.as_str())
        .bind(lat - tolerance_deg)
        .bind(lat + tolerance_deg)
        .bind(lng - tolerance_deg)
        .bind(lng + tolerance_deg)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// Add a hierarchy edge; the relation is part of the key, so a city may
    /// be `capital_of` more than one polity.
    pub async fn add_hierarchy_edge(
        &self,
        parent_id: i64,
        child_id: i64,
        relation: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO place_hierarchy (parent_id, child_id, relation) VALUES (?1, ?2, ?3)",
        )
        .bind(parent_id)
        .bind(child_id)
        .bind(relation)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Parents of a place for one relation
    pub async fn place_parents(&self, child_id: i64, relation: &str) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT parent_id FROM place_hierarchy WHERE child_id = ?1 AND relation = ?2",
        )
        .bind(child_id)
        .bind(relation)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// Counts used by ingestion idempotence tests
    pub async fn gazetteer_counts(&self) -> Result<(u64, u64, u64)> {
        let places = sqlx::query("SELECT COUNT(*) FROM places")
            .fetch_one(self.pool())
            .await?
            .get::<i64, _>(0) as u64;
        let names = sqlx::query("SELECT COUNT(*) FROM place_names")
            .fetch_one(self.pool())
            .await?
            .get::<i64, _>(0) as u64;
        let edges = sqlx::query("SELECT COUNT(*) FROM place_hierarchy")
            .fetch_one(self.pool())
            .await?
            .get::<i64, _>(0) as u64;
        Ok((places, names, edges))
    }
}

fn place_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<PlaceRow> {
    Ok(PlaceRow {
        id: row.get(0),
        kind: PlaceKind::parse(&row.get::<String, _>(1))?,
        canonical_name: row.get(2),
        country_code: row.get(3),
        admin_code: row.get(4),
        lat: row.get(5),
        lng: row.get(6),
        population: row.get(7),
        extra: serde_json::from_str(&row.get::<String, _>(8)).unwrap_or(serde_json::Value::Null),
    })
}
