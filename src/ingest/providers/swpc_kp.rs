//! NOAA SWPC planetary K-index. The product has shipped two row shapes over
//! time: a header row followed by string arrays, and plain objects. Both are
//! accepted; the newest valid row becomes the `kp_index` metric.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::SourceError;
use crate::fetch::RequestOptions;
use crate::ingest::parse_provider_time;
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::model::{Category, DerivedMetric, MetricKind, SourceRecords};

pub const ID: &str = "swpc_kp";
pub const DEFAULT_ENDPOINT: &str =
    "https://services.swpc.noaa.gov/products/noaa-planetary-k-index.json";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Row {
    Legacy(Vec<Value>),
    Object {
        time_tag: String,
        #[serde(alias = "Kp", alias = "kp_index")]
        kp: Value,
    },
}

/// Numbers arrive either as JSON numbers or as strings.
fn as_f64(v: &Value) -> Option<f64> {
    let f = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    f.filter(|f| f.is_finite())
}

fn sample(row: &Row) -> Option<(DateTime<Utc>, f64)> {
    match row {
        Row::Legacy(cols) => {
            let ts = cols.first()?.as_str().and_then(parse_provider_time)?;
            Some((ts, as_f64(cols.get(1)?)?))
        }
        Row::Object { time_tag, kp } => Some((parse_provider_time(time_tag)?, as_f64(kp)?)),
    }
}

pub struct SwpcKpAdapter {
    ctx: AdapterContext,
    endpoint: String,
}

impl SwpcKpAdapter {
    pub fn new(ctx: AdapterContext, endpoint: impl Into<String>) -> Self {
        Self {
            ctx,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SourceAdapter for SwpcKpAdapter {
    fn id(&self) -> &str {
        ID
    }

    async fn collect(&self) -> Result<SourceRecords, SourceError> {
        let rows: Vec<Row> = self
            .ctx
            .fetcher
            .fetch_json(&self.endpoint, RequestOptions::get(), self.ctx.timeout)
            .await?;
        to_records(&rows)
    }
}

fn to_records(rows: &[Row]) -> Result<SourceRecords, SourceError> {
    // The legacy header row (`["time_tag","Kp",...]`) fails `sample` and drops out.
    let (ts, kp) = rows
        .iter()
        .filter_map(sample)
        .max_by_key(|(ts, _)| *ts)
        .ok_or_else(|| SourceError::parse("swpc_kp: no usable rows"))?;

    Ok(SourceRecords::metrics(vec![DerivedMetric::new(
        ID,
        "kp_index",
        "Planetary Kp index",
        kp,
        "Kp",
        MetricKind::KpIndex,
        Category::Space,
        ts,
    )]))
}
