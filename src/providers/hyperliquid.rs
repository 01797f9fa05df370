// src/providers/hyperliquid.rs
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{now_ms, VenueError, VenueFetcher, VenueHttp};
use crate::types::{DecimalRaw, Exchange, RawSample};

#[derive(Debug, Deserialize)]
struct Meta {
    universe: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Asset {
    name: String,
    #[serde(default)]
    is_delisted: bool,
}

#[derive(Debug, Deserialize)]
struct AssetCtx {
    #[serde(default)]
    funding: Value,
}

/// `metaAndAssetCtxs`: a universe list and a context list in matching order.
pub struct Hyperliquid {
    http: VenueHttp,
}

impl Hyperliquid {
    pub fn new(http: VenueHttp) -> Self {
        Self { http }
    }
}

#[async_trait]
impl VenueFetcher for Hyperliquid {
    fn exchange(&self) -> Exchange {
        Exchange::Hyperliquid
    }

    async fn fetch_current(&self) -> Result<Vec<RawSample>, VenueError> {
        let (meta, ctxs): (Meta, Vec<AssetCtx>) =
            self.http.post_json("/info", &json!({ "type": "metaAndAssetCtxs" })).await?;
        if meta.universe.len() != ctxs.len() {
            tracing::warn!(
                assets = meta.universe.len(), contexts = ctxs.len(),
                "hyperliquid universe and contexts differ in length"
            );
        }
        let collected_at = now_ms();
        Ok(meta
            .universe
            .into_iter()
            .zip(ctxs)
            .filter(|(asset, _)| !asset.is_delisted)
            .map(|(asset, ctx)| {
                RawSample::Decimal(DecimalRaw {
                    trading_pair: asset.name.clone(),
                    base_asset: asset.name,
                    funding_rate: ctx.funding,
                    funding_time: None,
                    collected_at,
                })
            })
            .collect())
    }
}
