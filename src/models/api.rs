// Request and response bodies of the HTTP API

use crate::models::session::SessionSnapshot;
use crate::models::torrent::InfoHash;
use serde::{Deserialize, Serialize};

/// Error body shared by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: i64,
    pub timestamp: i64,
    pub active_sessions: usize,
}

/// Resolve request from a MediaFusion-style client. The first identifier
/// present wins, in field order.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub info_hash: Option<String>,
    pub magnet: Option<String>,
    pub torrent_url: Option<String>,
    pub file_index: Option<usize>,
}

impl ResolveRequest {
    pub fn identifier(&self) -> Option<&str> {
        [&self.info_hash, &self.magnet, &self.torrent_url]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .map(str::trim)
            .find(|value| !value.is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub url: String,
    pub name: String,
    pub size: u64,
    pub ready: bool,
}

/// Active session listing served by the integration health endpoints
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub status: String,
    pub service: String,
    pub active_torrents: usize,
    pub torrents: Vec<SessionSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StremioBehaviorHints {
    pub configurable: bool,
    #[serde(rename = "configurationRequired")]
    pub configuration_required: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StremioManifest {
    pub id: String,
    pub version: String,
    pub name: String,
    pub description: String,
    pub resources: Vec<String>,
    pub types: Vec<String>,
    pub catalogs: Vec<serde_json::Value>,
    pub id_prefixes: Vec<String>,
    pub behavior_hints: StremioBehaviorHints,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamHints {
    pub binge_group: String,
    pub not_web_ready: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StremioStream {
    pub name: String,
    pub title: String,
    pub url: String,
    pub behavior_hints: StreamHints,
}

impl StremioStream {
    pub fn new(info_hash: InfoHash, title: String, url: String) -> Self {
        Self {
            name: "Self-Hosted Debrid".to_string(),
            title,
            url,
            behavior_hints: StreamHints {
                binge_group: format!("debrid-{}", info_hash),
                not_web_ready: false,
            },
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StremioStreamResponse {
    pub streams: Vec<StremioStream>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveResponse {
    pub success: bool,
    pub info_hash: InfoHash,
}
