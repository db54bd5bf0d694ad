use crate::app::error::SessionError;
use crate::models::torrent::InfoHash;
use url::Url;

const BTIH_PREFIX: &str = "urn:btih:";

/// How the caller named the torrent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    InfoHash,
    Magnet,
    TorrentUrl,
}

/// A normalized torrent identifier ready to hand to the transfer engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TorrentSource {
    uri: String,
    info_hash: Option<InfoHash>,
    kind: SourceKind,
}

impl TorrentSource {
    /// Normalize a raw identifier.
    ///
    /// A bare 40-hex info hash becomes a canonical magnet reference. Magnet
    /// URIs and `http(s)` torrent-file URLs pass through unchanged.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SessionError::InvalidIdentifier(
                "identifier must not be empty".to_string(),
            ));
        }

        if let Some(info_hash) = InfoHash::from_hex(raw) {
            return Ok(Self::from_info_hash(info_hash));
        }

        if raw.len() >= 7 && raw[..7].eq_ignore_ascii_case("magnet:") {
            return Self::parse_magnet(raw);
        }

        match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {
                Ok(Self {
                    uri: raw.to_string(),
                    info_hash: None,
                    kind: SourceKind::TorrentUrl,
                })
            }
            _ => Err(SessionError::InvalidIdentifier(format!(
                "expected a 40-character info hash, magnet URI or torrent URL, got '{}'",
                raw
            ))),
        }
    }

    pub fn from_info_hash(info_hash: InfoHash) -> Self {
        Self {
            uri: format!("magnet:?xt={}{}", BTIH_PREFIX, info_hash.to_hex()),
            info_hash: Some(info_hash),
            kind: SourceKind::InfoHash,
        }
    }

    fn parse_magnet(raw: &str) -> Result<Self, SessionError> {
        let url = Url::parse(raw)
            .map_err(|e| SessionError::InvalidIdentifier(format!("malformed magnet URI: {}", e)))?;

        let topic = url
            .query_pairs()
            .filter(|(key, _)| key == "xt")
            .find_map(|(_, value)| {
                let value = value.as_ref();
                if value.len() > BTIH_PREFIX.len()
                    && value[..BTIH_PREFIX.len()].eq_ignore_ascii_case(BTIH_PREFIX)
                {
                    Some(value[BTIH_PREFIX.len()..].to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| {
                SessionError::InvalidIdentifier(
                    "magnet URI has no urn:btih exact topic".to_string(),
                )
            })?;

        // Base32 topics are handed to the engine, which reports the hash on acknowledgement
        Ok(Self {
            uri: raw.to_string(),
            info_hash: InfoHash::from_hex(&topic),
            kind: SourceKind::Magnet,
        })
    }

    /// The identifier string passed to the engine
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Info hash when it can be derived without asking the engine
    pub fn info_hash(&self) -> Option<InfoHash> {
        self.info_hash
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }
}

/// Parse an info hash taken from a URL path
pub fn parse_info_hash(raw: &str) -> Result<InfoHash, SessionError> {
    InfoHash::from_hex(raw.trim()).ok_or_else(|| {
        SessionError::InvalidIdentifier(format!("'{}' is not a 40-character hex info hash", raw))
    })
}

/// Parse a file index taken from a URL path
pub fn parse_file_index(raw: &str) -> Result<usize, SessionError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| SessionError::InvalidIdentifier(format!("invalid file index '{}'", raw)))
}
