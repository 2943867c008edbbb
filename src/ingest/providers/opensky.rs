//! OpenSky Network live state vectors (OAuth2 client credentials).
//!
//! Only aircraft squawking an emergency code become events; every position
//! report counts towards the tracked-aircraft metric. A 401 on the data call
//! invalidates the cached token so the next run re-authenticates.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::SourceError;
use crate::fetch::RequestOptions;
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::model::{
    CanonicalEvent, Category, DerivedMetric, MetricKind, Severity, SourceRecords,
};
use crate::token_cache::TokenCache;

pub const ID: &str = "opensky";
pub const DEFAULT_ENDPOINT: &str = "https://opensky-network.org/api/states/all";
pub const DEFAULT_TOKEN_ENDPOINT: &str =
    "https://auth.opensky-network.org/auth/realms/opensky-network/protocol/openid-connect/token";
const CAP: usize = 50;

// State vector column indices.
const ICAO24: usize = 0;
const CALLSIGN: usize = 1;
const ORIGIN_COUNTRY: usize = 2;
const LAST_CONTACT: usize = 4;
const LONGITUDE: usize = 5;
const LATITUDE: usize = 6;
const BARO_ALTITUDE: usize = 7;
const ON_GROUND: usize = 8;
const SQUAWK: usize = 14;

#[derive(Debug, Deserialize)]
struct States {
    time: i64,
    #[serde(default)]
    states: Option<Vec<Vec<Value>>>,
}

/// Emergency transponder codes.
fn squawk_severity(code: &str) -> Option<(Severity, &'static str)> {
    match code.trim() {
        "7500" => Some((Severity::Critical, "hijack")),
        "7700" => Some((Severity::High, "general_emergency")),
        "7600" => Some((Severity::Medium, "radio_failure")),
        _ => None,
    }
}

fn col_str(row: &[Value], i: usize) -> Option<&str> {
    row.get(i).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

fn col_f64(row: &[Value], i: usize) -> Option<f64> {
    row.get(i).and_then(Value::as_f64)
}

pub struct OpenSkyAdapter {
    ctx: AdapterContext,
    endpoint: String,
    tokens: Arc<TokenCache>,
    bbox: Option<[f64; 4]>,
}

impl OpenSkyAdapter {
    pub fn new(
        ctx: AdapterContext,
        endpoint: impl Into<String>,
        tokens: Arc<TokenCache>,
        bbox: Option<[f64; 4]>,
    ) -> Self {
        Self {
            ctx,
            endpoint: endpoint.into(),
            tokens,
            bbox,
        }
    }

    fn url(&self) -> String {
        match self.bbox {
            Some([lamin, lomin, lamax, lomax]) => format!(
                "{}?lamin={lamin}&lomin={lomin}&lamax={lamax}&lomax={lomax}",
                self.endpoint
            ),
            None => self.endpoint.clone(),
        }
    }
}

#[async_trait]
impl SourceAdapter for OpenSkyAdapter {
    fn id(&self) -> &str {
        ID
    }

    async fn collect(&self) -> Result<SourceRecords, SourceError> {
        let token = self.tokens.get().await?;
        let resp = self
            .ctx
            .fetcher
            .try_fetch(&self.url(), RequestOptions::get().bearer(&token), self.ctx.timeout)
            .await?;
        if resp.status == 401 {
            self.tokens.invalidate();
            return Err(SourceError::Auth("bearer token rejected".to_string()));
        }
        let body: States = resp.error_for_status()?.json()?;
        Ok(to_records(body, self.ctx.clock.now()))
    }
}

fn to_records(body: States, now: DateTime<Utc>) -> SourceRecords {
    let snapshot = DateTime::from_timestamp(body.time, 0).unwrap_or(now);
    let rows = body.states.unwrap_or_default();
    let tracked = rows.iter().filter(|r| col_str(r, ICAO24).is_some()).count();

    let mut events = Vec::new();
    let mut emergencies = 0usize;
    for row in &rows {
        let Some(icao) = col_str(row, ICAO24) else { continue };
        let Some((severity, kind)) = col_str(row, SQUAWK).and_then(squawk_severity) else {
            continue;
        };
        emergencies += 1;
        if events.len() >= CAP {
            continue;
        }
        let squawk = col_str(row, SQUAWK).unwrap_or_default();
        let callsign = col_str(row, CALLSIGN).unwrap_or(icao);
        let ts = row
            .get(LAST_CONTACT)
            .and_then(Value::as_i64)
            .and_then(|s| DateTime::from_timestamp(s, 0))
            .unwrap_or(snapshot);

        let mut ev = CanonicalEvent::new(
            ID,
            format!("{icao}-{squawk}"),
            Category::Aviation,
            severity,
            ts,
            format!("{callsign} squawking {squawk} ({})", kind.replace('_', " ")),
        )
        .indicator(icao)
        .region(col_str(row, ORIGIN_COUNTRY))
        .tag("squawk")
        .tag(kind)
        .meta("callsign", col_str(row, CALLSIGN))
        .meta("altitude_m", col_f64(row, BARO_ALTITUDE))
        .meta("on_ground", row.get(ON_GROUND).and_then(Value::as_bool));
        if let (Some(lat), Some(lon)) = (col_f64(row, LATITUDE), col_f64(row, LONGITUDE)) {
            ev = ev.location(lat, lon);
        }
        events.push(ev);
    }

    let metrics = vec![
        DerivedMetric::new(
            ID,
            "aircraft_tracked",
            "Aircraft tracked",
            tracked as f64,
            "aircraft",
            MetricKind::AircraftTracked,
            Category::Aviation,
            snapshot,
        ),
        DerivedMetric::new(
            ID,
            "aircraft_emergencies",
            "Emergency squawks",
            emergencies as f64,
            "aircraft",
            MetricKind::AircraftEmergencies,
            Category::Aviation,
            snapshot,
        ),
    ];
    SourceRecords { events, metrics }
}
