//! Place deduplication
//!
//! Incoming records are matched against existing places in a fixed
//! ladder: external ID, then admin code, then normalised name within the
//! country, then coordinate proximity. Only a record that falls through
//! every rung creates a new place. Multi-capital countries carry
//! per-capital coordinates so distinct capitals never collapse onto one
//! point.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::Result;
use crate::storage::{NameKind, PlaceKind, PlaceUpsert, Storage};

/// Coordinate proximity tolerance, in degrees
pub const COORD_TOLERANCE_DEG: f64 = 0.05;

/// An incoming place record from any source
#[derive(Debug, Clone, Default)]
pub struct PlaceRecord {
    pub name: String,
    pub kind: Option<PlaceKind>,
    pub country_code: Option<String>,
    pub admin_code: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub population: Option<i64>,
    /// `(source, external id)` pairs
    pub external_ids: Vec<(String, String)>,
    pub aliases: Vec<String>,
    pub extra: Option<serde_json::Value>,
}

/// Result of a deduplicating upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    Created(i64),
    Updated(i64),
}

impl UpsertResult {
    #[must_use]
    pub fn place_id(&self) -> i64 {
        match self {
            Self::Created(id) | Self::Updated(id) => *id,
        }
    }
}

/// Capitals of countries with more than one; `(name, lat, lng)` per
/// capital, keyed by ISO country code.
pub static MULTI_CAPITALS: Lazy<HashMap<&'static str, &'static [(&'static str, f64, f64)]>> =
    Lazy::new(|| {
        let mut m: HashMap<&'static str, &'static [(&'static str, f64, f64)]> = HashMap::new();
        m.insert(
            "ZA",
            &[
                ("Pretoria", -25.7461, 28.1881),
                ("Cape Town", -33.9249, 18.4241),
                ("Bloemfontein", -29.0852, 26.1596),
            ][..],
        );
        m.insert(
            "BO",
            &[("La Paz", -16.4897, -68.1193), ("Sucre", -19.0196, -65.2619)][..],
        );
        m.insert(
            "CI",
            &[
                ("Yamoussoukro", 6.8276, -5.2893),
                ("Abidjan", 5.3600, -4.0083),
            ][..],
        );
        m.insert(
            "MY",
            &[
                ("Kuala Lumpur", 3.1390, 101.6869),
                ("Putrajaya", 2.9264, 101.6964),
            ][..],
        );
        m.insert(
            "SZ",
            &[("Mbabane", -26.3054, 31.1367), ("Lobamba", -26.4465, 31.2064)][..],
        );
        m.insert(
            "TZ",
            &[
                ("Dodoma", -6.1630, 35.7516),
                ("Dar es Salaam", -6.7924, 39.2083),
            ][..],
        );
        m.insert(
            "BJ",
            &[
                ("Porto-Novo", 6.4969, 2.6289),
                ("Cotonou", 6.3703, 2.3912),
            ][..],
        );
        m.insert(
            "LK",
            &[
                ("Sri Jayawardenepura Kotte", 6.9108, 79.8878),
                ("Colombo", 6.9271, 79.8612),
            ][..],
        );
        m.insert(
            "NL",
            &[
                ("Amsterdam", 52.3676, 4.9041),
                ("The Hague", 52.0705, 4.3007),
            ][..],
        );
        m
    });

/// Coordinates for a named capital of a multi-capital country
#[must_use]
pub fn capital_coords(country_code: &str, capital_name: &str) -> Option<(f64, f64)> {
    MULTI_CAPITALS
        .get(country_code)?
        .iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(capital_name))
        .map(|(_, lat, lng)| (*lat, *lng))
}

/// Match or create a place for a record, applying the dedup ladder.
pub async fn upsert_place_deduped(storage: &Storage, record: &PlaceRecord) -> Result<UpsertResult> {
    let kind = record.kind.unwrap_or(PlaceKind::Other);

    let existing = find_existing(storage, record, kind).await?;
    let fields = PlaceUpsert {
        kind: record.kind,
        canonical_name: Some(record.name.clone()),
        country_code: record.country_code.clone(),
        admin_code: record.admin_code.clone(),
        lat: record.lat,
        lng: record.lng,
        population: record.population,
        extra: record.extra.clone(),
    };

    let (place_id, created) = match existing {
        Some(place_id) => {
            storage.update_place(place_id, &fields).await?;
            (place_id, false)
        }
        None => (storage.insert_place(kind, &fields).await?, true),
    };

    // Names, aliases and external IDs are idempotent on their keys, so
    // re-running a source adds nothing new.
    storage
        .add_place_name(place_id, &record.name, "", NameKind::Label)
        .await?;
    for alias in &record.aliases {
        if alias != &record.name {
            storage
                .add_place_name(place_id, alias, "", NameKind::Alias)
                .await?;
        }
    }
    for (source, ext_id) in &record.external_ids {
        storage.add_external_id(place_id, source, ext_id).await?;
    }

    Ok(if created {
        UpsertResult::Created(place_id)
    } else {
        UpsertResult::Updated(place_id)
    })
}

/// The dedup ladder: first rung that matches wins
async fn find_existing(
    storage: &Storage,
    record: &PlaceRecord,
    kind: PlaceKind,
) -> Result<Option<i64>> {
    for (source, ext_id) in &record.external_ids {
        if let Some(id) = storage.find_place_by_external_id(source, ext_id).await? {
            return Ok(Some(id));
        }
    }

    if let (Some(country), Some(admin)) = (&record.country_code, &record.admin_code) {
        if let Some(id) = storage
            .find_place_by_admin_code(country, admin, kind)
            .await?
        {
            return Ok(Some(id));
        }
    }

    if let Some(country) = &record.country_code {
        let matches = storage
            .find_places_by_name_and_country(&record.name, country, kind)
            .await?;
        if let Some(id) = matches.first() {
            return Ok(Some(*id));
        }
    }

    if let (Some(lat), Some(lng)) = (record.lat, record.lng) {
        let nearby = storage
            .find_places_near(lat, lng, COORD_TOLERANCE_DEG, kind)
            .await?;
        if let Some(id) = nearby.first() {
            return Ok(Some(*id));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_capital_table_distinguishes_capitals() {
        let pretoria = capital_coords("ZA", "Pretoria").expect("pretoria");
        let cape_town = capital_coords("ZA", "Cape Town").expect("cape town");
        assert!((pretoria.0 - cape_town.0).abs() > 1.0);
        assert!(capital_coords("ZA", "Johannesburg").is_none());
        assert!(capital_coords("FR", "Paris").is_none());
    }
}
