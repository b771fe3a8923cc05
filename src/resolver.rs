// Location resolver - maps (rounded lat, rounded lon, normalized address)
// to a canonical location id
//
// The cache is the whole point: it is preloaded once from every persisted
// location, so a known location costs zero store calls and a new one costs
// exactly one insert. The cache belongs to one job run - it is built fresh,
// passed by reference, and discarded; the store's UNIQUE dedup_key index is
// what protects against a second concurrently running job.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::HashMap;

use crate::db;

/// Dedup key: coordinates scaled to integers at the configured precision,
/// plus the normalized address. Scaling sidesteps float equality.
pub type LocationKey = (i64, i64, String);

/// Uppercase + trim; the normalized street address stored on a location.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_uppercase()
}

pub struct LocationResolver {
    cache: HashMap<LocationKey, i64>,
    round_places: u32,
    scale: f64,
    created: usize,
}

impl LocationResolver {
    pub fn new(round_places: u32) -> Self {
        LocationResolver {
            cache: HashMap::new(),
            round_places,
            scale: 10f64.powi(round_places as i32),
            created: 0,
        }
    }

    /// Round a coordinate to the configured precision.
    pub fn round_coord(&self, value: f64) -> f64 {
        (value * self.scale).round() / self.scale
    }

    fn key(&self, lat: f64, lon: f64, normalized_address: &str) -> LocationKey {
        (
            (lat * self.scale).round() as i64,
            (lon * self.scale).round() as i64,
            normalized_address.to_string(),
        )
    }

    /// Textual form of the dedup key, stored UNIQUE on the location row.
    fn dedup_key(&self, lat: f64, lon: f64, normalized_address: &str) -> String {
        let places = self.round_places as usize;
        format!(
            "{:.places$}|{:.places$}|{}",
            self.round_coord(lat),
            self.round_coord(lon),
            normalized_address,
        )
    }

    /// Pre-load all existing locations, so the main loop never queries per row.
    pub fn preload(&mut self, conn: &Connection) -> Result<usize> {
        let locations =
            db::get_all_locations(conn).context("Failed to preload location cache")?;

        for location in &locations {
            let key = self.key(
                location.lat,
                location.lon,
                &normalize_address(&location.address),
            );
            self.cache.insert(key, location.id);
        }

        Ok(self.cache.len())
    }

    /// Resolve coordinates + address to a location id, creating the location
    /// on first sight. The new id is available immediately - grouping needs it.
    ///
    /// A persistence failure here is fatal to the batch: a location must never
    /// be created without also entering the cache.
    pub fn resolve(&mut self, conn: &Connection, lat: f64, lon: f64, address: &str) -> Result<i64> {
        let normalized = normalize_address(address);
        let key = self.key(lat, lon, &normalized);

        if let Some(&id) = self.cache.get(&key) {
            return Ok(id);
        }

        let lat_r = self.round_coord(lat);
        let lon_r = self.round_coord(lon);
        let dedup_key = self.dedup_key(lat, lon, &normalized);

        let id = db::insert_location(conn, lat_r, lon_r, &normalized, &dedup_key)
            .with_context(|| format!("Failed to create location {:?}", dedup_key))?;

        self.created += 1;
        self.cache.insert(key, id);
        Ok(id)
    }

    /// Locations created by this resolver during the current run.
    pub fn created(&self) -> usize {
        self.created
    }
}
