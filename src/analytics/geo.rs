//! Country-level geo clustering.
//!
//! Region keys arrive in whatever shape the provider uses (`US`, `USA`,
//! `United States`). They are folded onto ISO 3166-1 alpha-2 keys through an
//! alias table and placed at a static centroid. Individual markers get a
//! small random offset so stacked events stay clickable.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use rand::Rng;

use crate::error::AnalyticsError;
use crate::model::{CanonicalEvent, ClusterMember, GeoCluster, GeoPoint, Severity};

/// Max offset applied to member markers, in degrees.
pub const JITTER_DEG: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    pub key: &'static str,
    pub name: &'static str,
    pub lat: f64,
    pub lon: f64,
}

const fn c(key: &'static str, name: &'static str, lat: f64, lon: f64) -> Centroid {
    Centroid { key, name, lat, lon }
}

static CENTROIDS: &[Centroid] = &[
    c("US", "United States", 39.8, -98.6),
    c("CA", "Canada", 56.1, -106.3),
    c("MX", "Mexico", 23.6, -102.6),
    c("BR", "Brazil", -14.2, -51.9),
    c("AR", "Argentina", -38.4, -63.6),
    c("CL", "Chile", -35.7, -71.5),
    c("CO", "Colombia", 4.6, -74.3),
    c("PE", "Peru", -9.2, -75.0),
    c("VE", "Venezuela", 6.4, -66.6),
    c("GB", "United Kingdom", 54.0, -2.0),
    c("IE", "Ireland", 53.4, -8.2),
    c("FR", "France", 46.2, 2.2),
    c("DE", "Germany", 51.2, 10.4),
    c("NL", "Netherlands", 52.1, 5.3),
    c("BE", "Belgium", 50.5, 4.5),
    c("LU", "Luxembourg", 49.8, 6.1),
    c("CH", "Switzerland", 46.8, 8.2),
    c("AT", "Austria", 47.5, 14.6),
    c("IT", "Italy", 41.9, 12.6),
    c("ES", "Spain", 40.5, -3.7),
    c("PT", "Portugal", 39.4, -8.2),
    c("SE", "Sweden", 60.1, 18.6),
    c("NO", "Norway", 60.5, 8.5),
    c("FI", "Finland", 61.9, 25.7),
    c("DK", "Denmark", 56.3, 9.5),
    c("PL", "Poland", 51.9, 19.1),
    c("CZ", "Czechia", 49.8, 15.5),
    c("SK", "Slovakia", 48.7, 19.7),
    c("HU", "Hungary", 47.2, 19.5),
    c("RO", "Romania", 45.9, 25.0),
    c("BG", "Bulgaria", 42.7, 25.5),
    c("GR", "Greece", 39.1, 21.8),
    c("UA", "Ukraine", 48.4, 31.2),
    c("BY", "Belarus", 53.7, 28.0),
    c("LT", "Lithuania", 55.2, 23.9),
    c("LV", "Latvia", 56.9, 24.6),
    c("EE", "Estonia", 58.6, 25.0),
    c("MD", "Moldova", 47.4, 28.4),
    c("RS", "Serbia", 44.0, 21.0),
    c("RU", "Russia", 61.5, 105.3),
    c("TR", "Turkey", 39.0, 35.2),
    c("IL", "Israel", 31.0, 34.9),
    c("IR", "Iran", 32.4, 53.7),
    c("IQ", "Iraq", 33.2, 43.7),
    c("SA", "Saudi Arabia", 23.9, 45.1),
    c("AE", "United Arab Emirates", 23.4, 53.8),
    c("EG", "Egypt", 26.8, 30.8),
    c("ZA", "South Africa", -30.6, 22.9),
    c("NG", "Nigeria", 9.1, 8.7),
    c("KE", "Kenya", -0.0, 37.9),
    c("MA", "Morocco", 31.8, -7.1),
    c("IN", "India", 20.6, 79.0),
    c("PK", "Pakistan", 30.4, 69.3),
    c("CN", "China", 35.9, 104.2),
    c("HK", "Hong Kong", 22.3, 114.2),
    c("TW", "Taiwan", 23.7, 121.0),
    c("JP", "Japan", 36.2, 138.3),
    c("KR", "South Korea", 35.9, 127.8),
    c("KP", "North Korea", 40.3, 127.5),
    c("SG", "Singapore", 1.35, 103.8),
    c("MY", "Malaysia", 4.2, 102.0),
    c("ID", "Indonesia", -0.8, 113.9),
    c("TH", "Thailand", 15.9, 101.0),
    c("VN", "Vietnam", 14.1, 108.3),
    c("PH", "Philippines", 12.9, 121.8),
    c("AU", "Australia", -25.3, 133.8),
    c("NZ", "New Zealand", -40.9, 174.9),
];

/// Extra spellings seen in provider feeds, beyond keys and display names.
const EXTRA_ALIASES: &[(&str, &str)] = &[
    ("usa", "US"),
    ("united states of america", "US"),
    ("u.s.", "US"),
    ("uk", "GB"),
    ("great britain", "GB"),
    ("england", "GB"),
    ("russian federation", "RU"),
    ("korea, republic of", "KR"),
    ("republic of korea", "KR"),
    ("korea", "KR"),
    ("iran, islamic republic of", "IR"),
    ("czech republic", "CZ"),
    ("the netherlands", "NL"),
    ("holland", "NL"),
    ("türkiye", "TR"),
    ("turkiye", "TR"),
    ("viet nam", "VN"),
    ("uae", "AE"),
    ("taiwan, province of china", "TW"),
    ("kingdom of the netherlands", "NL"),
    ("republic of moldova", "MD"),
];

static ALIASES: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    for c in CENTROIDS {
        m.insert(c.key.to_ascii_lowercase(), c.key);
        m.insert(c.name.to_lowercase(), c.key);
    }
    for (alias, key) in EXTRA_ALIASES {
        m.insert(alias.to_string(), *key);
    }
    m
});

/// Canonical ISO key for a raw region string, if it is known.
pub fn canonical_region(raw: &str) -> Option<&'static str> {
    let k = raw.trim().to_lowercase();
    if k.is_empty() {
        return None;
    }
    ALIASES.get(&k).copied()
}

pub fn centroid(key: &str) -> Option<&'static Centroid> {
    CENTROIDS.iter().find(|c| c.key == key)
}

/// Key used in statistics and clusters: canonical when known, else the raw
/// value uppercased.
pub fn region_key(raw: &str) -> String {
    canonical_region(raw)
        .map(str::to_string)
        .unwrap_or_else(|| raw.trim().to_uppercase())
}

struct Bucket<'a> {
    name: String,
    centroid: GeoPoint,
    approximate: bool,
    events: Vec<&'a CanonicalEvent>,
}

/// Cluster ranked events by region. Members keep the input order, so feed
/// this the already ranked list. Events without a region are skipped, as are
/// geo-essential events with neither a known centroid nor a location.
pub fn cluster<R: Rng>(
    events: &[CanonicalEvent],
    member_cap: usize,
    rng: &mut R,
) -> Result<Vec<GeoCluster>, AnalyticsError> {
    let mut buckets: BTreeMap<String, Bucket<'_>> = BTreeMap::new();

    for ev in events {
        let Some(raw) = ev.region.as_deref() else { continue };
        let known = canonical_region(raw).and_then(centroid);
        if known.is_none() && ev.location.is_none() && ev.category.geo_essential() {
            continue;
        }
        let key = match known {
            Some(c) => c.key.to_string(),
            None => raw.trim().to_uppercase(),
        };
        let bucket = buckets.entry(key).or_insert_with(|| match (known, ev.location) {
            (Some(c), _) => Bucket {
                name: c.name.to_string(),
                centroid: GeoPoint { lat: c.lat, lon: c.lon },
                approximate: false,
                events: Vec::new(),
            },
            (None, Some(at)) => Bucket {
                name: raw.trim().to_string(),
                centroid: at,
                approximate: false,
                events: Vec::new(),
            },
            (None, None) => Bucket {
                name: raw.trim().to_string(),
                centroid: GeoPoint {
                    lat: rng.random_range(-55.0..=65.0),
                    lon: rng.random_range(-170.0..=170.0),
                },
                approximate: true,
                events: Vec::new(),
            },
        });
        // A real fix beats a random placement.
        if bucket.approximate {
            if let Some(at) = ev.location {
                bucket.centroid = at;
                bucket.approximate = false;
            }
        }
        bucket.events.push(ev);
    }

    let mut clusters = Vec::with_capacity(buckets.len());
    for (key, b) in buckets {
        if !b.centroid.lat.is_finite() || !b.centroid.lon.is_finite() {
            return Err(AnalyticsError::NonFiniteCentroid { key });
        }
        let count = b.events.len();
        let severity = b
            .events
            .iter()
            .map(|e| e.severity)
            .fold(Severity::Low, Severity::most_severe);
        let mut categories = BTreeMap::new();
        for e in &b.events {
            *categories.entry(e.category).or_insert(0usize) += 1;
        }
        let members = b
            .events
            .iter()
            .take(member_cap)
            .map(|e| {
                let base = e.location.unwrap_or(b.centroid);
                let (lat, lon) = if count > 1 && e.location.is_none() {
                    (
                        (base.lat + rng.random_range(-JITTER_DEG..=JITTER_DEG)).clamp(-90.0, 90.0),
                        base.lon + rng.random_range(-JITTER_DEG..=JITTER_DEG),
                    )
                } else {
                    (base.lat, base.lon)
                };
                ClusterMember {
                    event_id: e.id.clone(),
                    severity: e.severity,
                    lat,
                    lon,
                }
            })
            .collect();

        clusters.push(GeoCluster {
            key,
            name: b.name,
            centroid: b.centroid,
            approximate: b.approximate,
            count,
            severity,
            categories,
            members,
        });
    }

    clusters.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| b.count.cmp(&a.count))
            .then_with(|| a.key.cmp(&b.key))
    });
    Ok(clusters)
}
