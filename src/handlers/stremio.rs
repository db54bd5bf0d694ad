// Stremio addon endpoints

use crate::app::state::AppState;
use crate::models::api::{
    ProviderHealth, StremioBehaviorHints, StremioManifest, StremioStream, StremioStreamResponse,
};
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use std::sync::Arc;
use tracing::{debug, warn};

fn manifest() -> StremioManifest {
    StremioManifest {
        id: "com.selfhosted.debrid".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        name: "Self-Hosted Debrid".to_string(),
        description: "Self-hosted P2P torrent streaming service for Stremio".to_string(),
        resources: vec!["stream".to_string()],
        types: vec!["movie".to_string(), "series".to_string()],
        catalogs: Vec::new(),
        id_prefixes: vec!["tt".to_string()],
        behavior_hints: StremioBehaviorHints {
            configurable: false,
            configuration_required: false,
        },
    }
}

/// Torrent identifier carried by a Stremio content id.
///
/// `infohash:<hash>` names the torrent directly, `magnet:<base64>` carries an
/// encoded magnet URI. Other ids (plain IMDB ids) carry no torrent.
pub fn torrent_identifier(id: &str) -> Option<String> {
    let id = id.strip_suffix(".json").unwrap_or(id);
    let (prefix, value) = id.split_once(':')?;

    match prefix {
        "infohash" => Some(value.to_string()),
        "magnet" => {
            let decoded = [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD]
                .iter()
                .find_map(|engine| engine.decode(value).ok())?;
            String::from_utf8(decoded).ok()
        }
        _ => None,
    }
}

/// GET /stremio/manifest.json
pub async fn manifest_handler() -> impl IntoResponse {
    Json(manifest())
}

/// GET /stremio/stream/{type}/{id}.json
///
/// Never fails: anything that cannot be resolved yields an empty list.
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, String)>,
) -> Json<StremioStreamResponse> {
    let Some(identifier) = torrent_identifier(&id) else {
        debug!(kind = %kind, id = %id, "No torrent in Stremio id");
        return Json(StremioStreamResponse::default());
    };

    match state.resolve(&identifier, None).await {
        Ok(resolved) => Json(StremioStreamResponse {
            streams: vec![StremioStream::new(
                resolved.info_hash,
                resolved.file.name,
                resolved.url,
            )],
        }),
        Err(e) => {
            warn!(kind = %kind, id = %id, error = %e, "Stremio stream resolve failed");
            Json(StremioStreamResponse::default())
        }
    }
}

/// GET /stremio/health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let torrents = state.sessions.list_active();

    Json(ProviderHealth {
        status: "ok".to_string(),
        service: "stremio-addon".to_string(),
        active_torrents: torrents.len(),
        torrents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infohash_id() {
        let hash = "0123456789abcdef0123456789abcdef01234567";
        assert_eq!(torrent_identifier(&format!("infohash:{}.json", hash)), Some(hash.to_string()));
        assert_eq!(torrent_identifier(&format!("infohash:{}", hash)), Some(hash.to_string()));
    }

    #[test]
    fn test_base64_magnet_id() {
        let magnet = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&dn=a+b";
        let standard = STANDARD.encode(magnet);
        let url_safe = URL_SAFE_NO_PAD.encode(magnet);

        assert_eq!(torrent_identifier(&format!("magnet:{}", standard)), Some(magnet.to_string()));
        assert_eq!(torrent_identifier(&format!("magnet:{}.json", url_safe)), Some(magnet.to_string()));
    }

    #[test]
    fn test_ids_without_torrent() {
        assert_eq!(torrent_identifier("tt1234567"), None);
        assert_eq!(torrent_identifier("tt1234567:1:2"), None);
        assert_eq!(torrent_identifier("magnet:***"), None);
    }

    #[test]
    fn test_manifest_shape() {
        let json = serde_json::to_value(manifest()).unwrap();
        assert_eq!(json["id"], "com.selfhosted.debrid");
        assert_eq!(json["idPrefixes"][0], "tt");
        assert_eq!(json["behaviorHints"]["configurationRequired"], false);
    }
}
