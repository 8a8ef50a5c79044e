use crate::checksum::Checksum;
use crate::error::{Error, IoContext, Result};
use crate::workspace::is_plain_name;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChunkRecord {
    pub name: String,
    pub crc32: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Layout, checksums and access list of one chunked file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkManifest {
    pub total_chunks: u64,
    pub chunks: Vec<ChunkRecord>,
    pub owner: String,
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

impl ChunkManifest {
    pub fn new(owner: impl Into<String>, chunks: Vec<ChunkRecord>) -> Self {
        Self {
            total_chunks: chunks.len() as u64,
            chunks,
            owner: owner.into(),
            allowed_users: Vec::new(),
        }
    }

    /// `<base>.chunk<index>`, index starting at 1.
    pub fn chunk_name(base: &str, index: usize) -> String {
        format!("{base}.chunk{index}")
    }

    pub fn lists(&self, identity: &str) -> bool {
        self.allowed_users.iter().any(|u| u == identity)
    }

    /// Add `identity` to the access list. The owner is never listed.
    pub fn grant(&mut self, identity: &str) -> bool {
        if identity == self.owner || self.lists(identity) {
            return false;
        }
        self.allowed_users.push(identity.to_string());
        true
    }

    pub fn revoke(&mut self, identity: &str) -> bool {
        let before = self.allowed_users.len();
        self.allowed_users.retain(|u| u != identity);
        before != self.allowed_users.len()
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.total_chunks != self.chunks.len() as u64 {
            return Err(Error::malformed(
                path,
                format!(
                    "totalChunks is {} but chunks has {} entries",
                    self.total_chunks,
                    self.chunks.len()
                ),
            ));
        }
        if self.owner.trim().is_empty() {
            return Err(Error::malformed(path, "owner must not be empty"));
        }
        let mut seen = HashSet::new();
        for (i, ch) in self.chunks.iter().enumerate() {
            if !is_plain_name(&ch.name) {
                return Err(Error::malformed(
                    path,
                    format!("chunks[{i}].name {:?} is not a plain file name", ch.name),
                ));
            }
            if ch.crc32.parse::<Checksum>().is_err() {
                return Err(Error::malformed(
                    path,
                    format!("chunks[{i}].crc32 {:?} is not 8 hex digits", ch.crc32),
                ));
            }
            if !seen.insert(ch.name.as_str()) {
                return Err(Error::malformed(
                    path,
                    format!("chunks[{i}].name {:?} is duplicated", ch.name),
                ));
            }
        }
        Ok(())
    }
}

/// Manifest file name for a base name, co-located with its chunks.
pub fn manifest_name(base: &str) -> String {
    format!("{base}.meta.json")
}

pub fn load(path: &Path) -> Result<ChunkManifest> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.to_path_buf()))
        }
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return Err(Error::malformed(path, "not valid UTF-8"))
        }
        Err(e) => return Err(Error::io("read manifest", path, e)),
    };
    let mf: ChunkManifest =
        serde_json::from_str(&text).map_err(|e| Error::malformed(path, e.to_string()))?;
    mf.validate(path)?;
    Ok(mf)
}

/// Write pretty JSON to a hidden sibling, then rename over `path`.
pub fn save(path: &Path, manifest: &ChunkManifest) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(manifest)
        .map_err(|e| Error::malformed(path, e.to_string()))?;
    bytes.push(b'\n');
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp, &bytes).io_ctx("write manifest", &tmp)?;
    fs::rename(&tmp, path).io_ctx("replace manifest", path)?;
    Ok(())
}
