//! The serializable build-context tree and the chunk store.
//!
//! A build context is transmitted as a nested directory map whose file
//! leaves carry ordered chunk-hash lists instead of bytes. The wire encoding
//! uses single-letter keys to keep the metadata payload small:
//! `{"t": "f"|"d"|"l", "v": <chunks|children|target>, "p": <mode>}`, with
//! `p` omitted for symlinks (they take their target's permissions) and for
//! the root node.

use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};

/// One node of the directory map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileNode {
    /// Regular file: ordered chunk hashes plus mode bits.
    File { chunks: Vec<String>, mode: u32 },
    /// Directory: children keyed by path segment. The root node carries no
    /// mode.
    Dir {
        children: BTreeMap<String, FileNode>,
        mode: Option<u32>,
    },
    /// Symlink: the literal link target, never followed.
    Symlink { target: String },
}

impl FileNode {
    /// An empty root directory node.
    pub fn root() -> Self {
        Self::Dir {
            children: BTreeMap::new(),
            mode: None,
        }
    }

    /// All chunk hashes reachable from this node, in tree order.
    pub fn chunk_hashes(&self) -> Vec<&str> {
        let mut hashes = Vec::new();
        self.collect_hashes(&mut hashes);
        hashes
    }

    fn collect_hashes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::File { chunks, .. } => out.extend(chunks.iter().map(String::as_str)),
            Self::Dir { children, .. } => {
                for child in children.values() {
                    child.collect_hashes(out);
                }
            }
            Self::Symlink { .. } => {}
        }
    }
}

impl Serialize for FileNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            Self::File { chunks, mode } => {
                map.serialize_entry("t", "f")?;
                map.serialize_entry("v", chunks)?;
                map.serialize_entry("p", mode)?;
            }
            Self::Dir { children, mode } => {
                map.serialize_entry("t", "d")?;
                map.serialize_entry("v", children)?;
                if let Some(mode) = mode {
                    map.serialize_entry("p", mode)?;
                }
            }
            Self::Symlink { target } => {
                map.serialize_entry("t", "l")?;
                map.serialize_entry("v", target)?;
            }
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct RawNode {
    t: String,
    v: serde_json::Value,
    #[serde(default)]
    p: Option<u32>,
}

impl<'de> Deserialize<'de> for FileNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawNode::deserialize(deserializer)?;
        match raw.t.as_str() {
            "f" => {
                let chunks =
                    serde_json::from_value(raw.v).map_err(|e| D::Error::custom(e.to_string()))?;
                let mode = raw
                    .p
                    .ok_or_else(|| D::Error::custom("file node missing permissions"))?;
                Ok(Self::File { chunks, mode })
            }
            "d" => {
                let children =
                    serde_json::from_value(raw.v).map_err(|e| D::Error::custom(e.to_string()))?;
                Ok(Self::Dir {
                    children,
                    mode: raw.p,
                })
            }
            "l" => {
                let target =
                    serde_json::from_value(raw.v).map_err(|e| D::Error::custom(e.to_string()))?;
                Ok(Self::Symlink { target })
            }
            other => Err(D::Error::custom(format!("unknown node type {other:?}"))),
        }
    }
}

/// Content-addressed chunk bytes keyed by blake3 hex hash.
///
/// Identical chunks collapse to a single entry regardless of how many files
/// reference them. The store lives only for the duration of one transmission
/// and is dropped as soon as the upload completes.
#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: HashMap<String, Vec<u8>>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chunk unless an identical hash is already present.
    pub fn insert(&mut self, hash: &str, bytes: &[u8]) {
        if !self.chunks.contains_key(hash) {
            self.chunks.insert(hash.to_string(), bytes.to_vec());
        }
    }

    pub fn get(&self, hash: &str) -> Option<&[u8]> {
        self.chunks.get(hash).map(Vec::as_slice)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.chunks.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total bytes held across all chunks.
    pub fn total_bytes(&self) -> usize {
        self.chunks.values().map(Vec::len).sum()
    }

    pub fn hashes(&self) -> impl Iterator<Item = &str> {
        self.chunks.keys().map(String::as_str)
    }
}
