//! Ethereum mainnet via public JSON-RPC: block height (primary) and gas
//! price (follow-up; its failure only drops the gas metric).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::SourceError;
use crate::fetch::RequestOptions;
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::model::{Category, DerivedMetric, MetricKind, SourceRecords};

pub const ID: &str = "ethereum";
pub const DEFAULT_ENDPOINT: &str = "https://ethereum-rpc.publicnode.com";

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// `"0x1a2b"` → 6699
fn parse_hex_quantity(s: &str) -> Option<u128> {
    let digits = s.trim().strip_prefix("0x")?;
    if digits.is_empty() {
        return None;
    }
    u128::from_str_radix(digits, 16).ok()
}

pub struct EthereumAdapter {
    ctx: AdapterContext,
    endpoint: String,
}

impl EthereumAdapter {
    pub fn new(ctx: AdapterContext, endpoint: impl Into<String>) -> Self {
        Self {
            ctx,
            endpoint: endpoint.into(),
        }
    }

    async fn call(&self, method: &str) -> Result<u128, SourceError> {
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": []});
        let resp: RpcResponse = self
            .ctx
            .fetcher
            .fetch_json(&self.endpoint, RequestOptions::post_json(body), self.ctx.timeout)
            .await?;
        rpc_quantity(method, resp)
    }
}

fn rpc_quantity(method: &str, resp: RpcResponse) -> Result<u128, SourceError> {
    if let Some(e) = resp.error {
        return Err(SourceError::parse(format!("{method}: rpc error {}: {}", e.code, e.message)));
    }
    resp.result
        .as_deref()
        .and_then(parse_hex_quantity)
        .ok_or_else(|| SourceError::parse(format!("{method}: missing or non-hex result")))
}

#[async_trait]
impl SourceAdapter for EthereumAdapter {
    fn id(&self) -> &str {
        ID
    }

    async fn collect(&self) -> Result<SourceRecords, SourceError> {
        let height = self.call("eth_blockNumber").await?;
        let gas_wei = match self.call("eth_gasPrice").await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(target: "ingest", source = ID, error = %e, "gas price unavailable");
                None
            }
        };
        Ok(to_records(height, gas_wei, self.ctx.clock.now()))
    }
}

fn to_records(height: u128, gas_wei: Option<u128>, now: DateTime<Utc>) -> SourceRecords {
    let mut metrics = vec![DerivedMetric::new(
        ID,
        "eth_block_height",
        "Ethereum block height",
        height as f64,
        "blocks",
        MetricKind::BlockHeight,
        Category::Finance,
        now,
    )];
    if let Some(wei) = gas_wei {
        metrics.push(DerivedMetric::new(
            ID,
            "eth_gas_price",
            "Ethereum gas price",
            wei as f64 / 1e9,
            "gwei",
            MetricKind::GasPriceGwei,
            Category::Finance,
            now,
        ));
    }
    SourceRecords::metrics(metrics)
}
