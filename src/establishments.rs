//! Certified halal establishments and distance sorting.
//!
//! The list is a static JSON export of the certification registry. Each
//! organization carries 2GIS map links whose `m=<lon>,<lat>` parameter gives
//! its position.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const SEARCH_RADIUS_KM: f64 = 100.0;
pub const MAX_RESULTS: usize = 5;

lazy_static! {
    static ref TWO_GIS_COORDS: Regex = Regex::new(r"m=(-?[\d.]+)(?:,|%2C)(-?[\d.]+)").unwrap();
}

#[derive(Debug, Error)]
pub enum EstablishmentsError {
    #[error("establishments file not readable: {0}")]
    Missing(#[from] std::io::Error),
    #[error("establishments file is not valid: {0}")]
    Invalid(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MapLink {
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Organization {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub maplink: Vec<MapLink>,
    #[serde(default, deserialize_with = "date_text")]
    pub sert_date: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<MapLink>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<MapLink>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Certificate dates appear both as text and as bare numbers
fn date_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl Organization {
    fn first_map_link(&self) -> Option<&MapLink> {
        self.maplink.first()
    }

    pub fn link(&self) -> Option<&str> {
        self.first_map_link().and_then(|m| m.link.as_deref())
    }

    pub fn address(&self) -> Option<&str> {
        self.first_map_link().and_then(|m| m.address.as_deref())
    }

    pub fn category_title(&self) -> Option<&str> {
        self.category.as_ref().and_then(|c| c.title.as_deref())
    }

    /// `(lat, lon)` from the first map link
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.link().and_then(extract_coords_from_2gis_link)
    }
}

#[derive(Debug, Deserialize)]
struct RegistryData {
    #[serde(default)]
    organizations: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Registry {
    data: RegistryData,
}

/// An organization with its distance from the user
#[derive(Debug, Clone)]
pub struct Nearby<'a> {
    pub organization: &'a Organization,
    pub distance_km: f64,
}

/// Records that do not fit the expected shape are skipped, the rest are kept.
pub fn parse_establishments(json: &str) -> Result<Vec<Organization>, EstablishmentsError> {
    let registry: Registry = serde_json::from_str(json)?;
    let total = registry.data.organizations.len();
    let organizations: Vec<Organization> = registry
        .data
        .organizations
        .into_iter()
        .filter_map(|record| match serde_json::from_value(record) {
            Ok(org) => Some(org),
            Err(e) => {
                debug!(error = %e, "Skipping malformed establishment record");
                None
            }
        })
        .collect();
    if organizations.len() < total {
        warn!(skipped = total - organizations.len(), total, "Some establishment records were skipped");
    }
    Ok(organizations)
}

/// Read the registry export. Called per request so a replaced file is
/// picked up without a restart.
pub async fn load_establishments(path: &Path) -> Result<Vec<Organization>, EstablishmentsError> {
    let json = tokio::fs::read_to_string(path).await?;
    let organizations = parse_establishments(&json)?;
    debug!(count = organizations.len(), path = %path.display(), "Loaded establishments");
    Ok(organizations)
}

/// 2GIS puts longitude first: `m=<lon>,<lat>`. Returns `(lat, lon)`.
pub fn extract_coords_from_2gis_link(link: &str) -> Option<(f64, f64)> {
    let caps = TWO_GIS_COORDS.captures(link)?;
    let lon: f64 = caps[1].parse().ok()?;
    let lat: f64 = caps[2].parse().ok()?;
    Some((lat, lon))
}

/// Great-circle distance in kilometres
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lat2) = (lat1.to_radians(), lat2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Organizations within `max_km` of the user, closest first, at most `limit`
pub fn nearest(organizations: &[Organization], lat: f64, lon: f64, max_km: f64, limit: usize) -> Vec<Nearby<'_>> {
    let mut nearby: Vec<Nearby<'_>> = organizations
        .iter()
        .filter_map(|organization| {
            let (org_lat, org_lon) = organization.coordinates()?;
            let distance_km = haversine_km(lat, lon, org_lat, org_lon);
            (distance_km < max_km).then_some(Nearby {
                organization,
                distance_km,
            })
        })
        .collect();

    nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    nearby.truncate(limit);
    nearby
}

/// Metres under one kilometre, otherwise kilometres with one decimal
pub fn format_distance(distance_km: f64, meters_unit: &str, kilometers_unit: &str) -> String {
    if distance_km < 1.0 {
        format!("{:.0} {meters_unit}", distance_km * 1000.0)
    } else {
        format!("{distance_km:.1} {kilometers_unit}")
    }
}
