//! Node identity.
//!
//! A node ID tags every reserved block with its owner. IDs are restricted to
//! ASCII alphanumerics, `-` and `_` so they are safe to embed in generated
//! names and log lines.
//!
//! Generated IDs are persisted to `{data_dir}/node_id` and reloaded on later
//! startups so a restarted process keeps its identity.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, SequenceError};

/// Longest accepted node ID.
pub const MAX_NODE_ID_LEN: usize = 64;

const NODE_ID_FILE: &str = "node_id";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let valid = !value.is_empty()
            && value.len() <= MAX_NODE_ID_LEN
            && value.starts_with(|c: char| c.is_ascii_alphanumeric())
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SequenceError::InvalidNodeId(value));
        }
        Ok(Self(value))
    }

    /// A fresh random `node-<hex>` identifier.
    pub fn generate() -> Self {
        let bytes: [u8; 6] = rand::random();
        Self(format!("node-{}", hex::encode(bytes)))
    }

    /// Use `configured` if set, otherwise the ID persisted under `data_dir`,
    /// otherwise generate and persist a new one.
    pub fn resolve(configured: &str, data_dir: &Path) -> Result<Self> {
        if !configured.is_empty() {
            return Self::new(configured);
        }
        Self::load_or_generate(data_dir)
    }

    pub fn load_or_generate(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(NODE_ID_FILE);
        let io_err = |source| SequenceError::Io {
            path: path.display().to_string(),
            source,
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(io_err)?;
            let id = Self::new(content.trim())?;
            tracing::debug!(node = %id, "loaded node id");
            return Ok(id);
        }

        let id = Self::generate();
        std::fs::create_dir_all(data_dir).map_err(io_err)?;
        std::fs::write(&path, id.as_str()).map_err(io_err)?;
        tracing::info!(node = %id, path = %path.display(), "generated node id");
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NodeId {
    type Error = SequenceError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        for id in ["node-1", "a", "eu_west_2", "N0DE"] {
            NodeId::new(id).expect(id);
        }
    }

    #[test]
    fn test_rejects_injection() {
        for id in [
            "",
            "-node",
            "node 1",
            "node;drop",
            "node'1",
            "node/1",
            "nöde",
            "x".repeat(MAX_NODE_ID_LEN + 1).as_str(),
        ] {
            assert!(NodeId::new(id).is_err(), "{id:?} should be rejected");
        }
    }

    #[test]
    fn test_generated_is_valid() {
        let id = NodeId::generate();
        assert!(id.as_str().starts_with("node-"));
        NodeId::new(id.as_str()).expect("generated id revalidates");
        assert_ne!(id, NodeId::generate());
    }

    #[test]
    fn test_persisted_id_is_reused() {
        let dir = std::env::temp_dir().join(format!("docshard-node-{}", NodeId::generate()));
        let first = NodeId::load_or_generate(&dir).expect("generate");
        let second = NodeId::load_or_generate(&dir).expect("load");
        assert_eq!(first, second);

        let configured = NodeId::resolve("edge-7", &dir).expect("configured");
        assert_eq!(configured.as_str(), "edge-7");
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn test_corrupt_file_is_rejected() {
        let dir = std::env::temp_dir().join(format!("docshard-node-{}", NodeId::generate()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(dir.join(NODE_ID_FILE), "bad id!").expect("write");
        assert!(matches!(
            NodeId::load_or_generate(&dir),
            Err(SequenceError::InvalidNodeId(_))
        ));
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }
}
