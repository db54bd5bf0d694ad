use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 20-byte SHA-1 info hash, rendered as 40 lowercase hex characters
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Parse a 40-character hex string (any case)
    pub fn from_hex(value: &str) -> Option<Self> {
        if value.len() != 40 {
            return None;
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(value, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        InfoHash::from_hex(&raw)
            .ok_or_else(|| serde::de::Error::custom("info hash must be 40 hex characters"))
    }
}

/// One file inside a torrent. `index` is stable for the lifetime of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub index: usize,
    pub name: String,
    pub path: String,
    pub length: u64,
}

/// Descriptive metadata delivered by the engine once peers hand over the info dict
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentMetadata {
    pub name: String,
    pub total_length: u64,
    pub files: Vec<FileEntry>,
}

impl TorrentMetadata {
    /// Build metadata from `(path, length)` pairs, assigning indices in order.
    /// The file name is the last path component.
    pub fn from_files(name: impl Into<String>, files: Vec<(String, u64)>) -> Self {
        let files: Vec<FileEntry> = files
            .into_iter()
            .enumerate()
            .map(|(index, (path, length))| {
                let name = path.rsplit('/').next().unwrap_or(&path).to_string();
                FileEntry {
                    index,
                    name,
                    path,
                    length,
                }
            })
            .collect();

        let total_length = files.iter().map(|file| file.length).sum();

        Self {
            name: name.into(),
            total_length,
            files,
        }
    }
}
