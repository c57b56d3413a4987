//! Token metadata enrichment: symbol/name/uri backfill for newly discovered
//! mints via a DAS `getAsset` lookup, trimmed to the handful of fields the
//! Token Store actually persists.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct TokenMetadata {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub uri: Option<String>,
}

#[async_trait]
pub trait MetadataEnricher: Send + Sync {
    async fn enrich(&self, mint: &str) -> anyhow::Result<TokenMetadata>;
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<DasAsset>,
}

#[derive(Debug, Deserialize)]
struct DasAsset {
    content: Option<DasAssetContent>,
}

#[derive(Debug, Deserialize)]
struct DasAssetContent {
    json_uri: Option<String>,
    metadata: Option<DasMetadata>,
}

#[derive(Debug, Deserialize)]
struct DasMetadata {
    name: Option<String>,
    symbol: Option<String>,
}

/// Looks up a mint's off-chain metadata via a DAS-compatible `getAsset` RPC
/// call. A non-2xx response, malformed body, or missing `result` is treated
/// as "no metadata yet" rather than an error — new pump.fun mints often
/// haven't indexed metadata within the first few seconds of creation.
pub struct HttpMetadataEnricher {
    client: reqwest::Client,
    rpc_url: String,
}

impl HttpMetadataEnricher {
    pub fn new(rpc_url: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build metadata HTTP client"),
            rpc_url,
        }
    }
}

#[async_trait]
impl MetadataEnricher for HttpMetadataEnricher {
    async fn enrich(&self, mint: &str) -> anyhow::Result<TokenMetadata> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "metadata-enricher",
            "method": "getAsset",
            "params": { "id": mint },
        });

        let response = self.client.post(&self.rpc_url).json(&body).send().await?;
        if !response.status().is_success() {
            warn!(monitor = "metadata_enricher", mint, status = %response.status(), "getAsset returned non-success status");
            return Ok(TokenMetadata::default());
        }

        let envelope: RpcEnvelope = match response.json().await {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(monitor = "metadata_enricher", mint, error_kind = "decode", "{err}");
                return Ok(TokenMetadata::default());
            }
        };

        let Some(asset) = envelope.result else {
            return Ok(TokenMetadata::default());
        };

        let content = asset.content.unwrap_or(DasAssetContent { json_uri: None, metadata: None });
        let (name, symbol) = content
            .metadata
            .map(|m| (m.name, m.symbol))
            .unwrap_or((None, None));

        Ok(TokenMetadata {
            symbol,
            name,
            uri: content.json_uri,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metadata_is_all_none() {
        let metadata = TokenMetadata::default();
        assert!(metadata.symbol.is_none());
        assert!(metadata.name.is_none());
        assert!(metadata.uri.is_none());
    }
}
