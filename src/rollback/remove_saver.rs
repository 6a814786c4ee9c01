//! Rollback data files
//!
//! When enabled, every document rollback deletes or overwrites is first
//! appended to a per-collection archive so an operator can recover it.
//!
//! Layout: `<root>/<collection uuid>/removed.<UTC timestamp>.bin`
//!
//! Record format:
//! - Length (u32 LE) of the JSON payload
//! - Payload: the document as JSON
//! - Checksum (u32 LE): CRC32 of the payload
//!
//! The file is created on the first write, so a collection with nothing to
//! archive leaves nothing behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use crc32fast::Hasher;
use thiserror::Error;

use crate::document::Document;

/// Errors writing or reading rollback data files
#[derive(Debug, Error)]
pub enum RemoveSaverError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot encode document: {0}")]
    Encode(String),

    #[error("corrupt rollback data file {path} at offset {offset}: {reason}")]
    Corruption {
        path: String,
        offset: u64,
        reason: String,
    },
}

impl RemoveSaverError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Appends documents about to be removed to a rollback data file.
pub struct RemoveSaver {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    saved: u64,
}

impl RemoveSaver {
    /// Prepare an archive for collection `name` under `root`.
    pub fn new(root: &Path, name: &str) -> Self {
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.6f");
        let path = root.join(name).join(format!("removed.{}.bin", stamp));
        Self {
            path,
            writer: None,
            saved: 0,
        }
    }

    /// Path of the archive file.
    pub fn file(&self) -> &Path {
        &self.path
    }

    /// Number of documents written so far.
    pub fn saved(&self) -> u64 {
        self.saved
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, RemoveSaverError> {
        if self.writer.is_none() {
            if let Some(dir) = self.path.parent() {
                fs::create_dir_all(dir).map_err(|e| {
                    RemoveSaverError::io(format!("cannot create {}", dir.display()), e)
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| {
                    RemoveSaverError::io(format!("cannot open {}", self.path.display()), e)
                })?;
            self.writer = Some(BufWriter::new(file));
        }
        // Populated above.
        self.writer
            .as_mut()
            .ok_or_else(|| RemoveSaverError::Encode("writer unavailable".into()))
    }

    /// Archive `document` before it is deleted or overwritten.
    pub fn going_to_delete(&mut self, document: &Document) -> Result<(), RemoveSaverError> {
        let payload =
            serde_json::to_vec(document).map_err(|e| RemoveSaverError::Encode(e.to_string()))?;
        let length = u32::try_from(payload.len())
            .map_err(|_| RemoveSaverError::Encode("document too large".into()))?;
        let crc = checksum(&payload);
        let path = self.path.display().to_string();

        let writer = self.writer()?;
        writer
            .write_all(&length.to_le_bytes())
            .and_then(|_| writer.write_all(&payload))
            .and_then(|_| writer.write_all(&crc.to_le_bytes()))
            .map_err(|e| RemoveSaverError::io(format!("cannot write {}", path), e))?;
        self.saved += 1;
        Ok(())
    }

    /// Flush and fsync the archive, if one was created.
    pub fn finish(mut self) -> Result<(), RemoveSaverError> {
        self.sync()
    }

    fn sync(&mut self) -> Result<(), RemoveSaverError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let path = self.path.display().to_string();
        writer
            .flush()
            .and_then(|_| writer.get_ref().sync_all())
            .map_err(|e| RemoveSaverError::io(format!("cannot sync {}", path), e))
    }
}

impl Drop for RemoveSaver {
    fn drop(&mut self) {
        let _ = self.sync();
    }
}

/// Read every document of a rollback data file, verifying checksums.
pub fn read_all(path: &Path) -> Result<Vec<Document>, RemoveSaverError> {
    let mut bytes = Vec::new();
    File::open(path)
        .and_then(|mut f| f.read_to_end(&mut bytes))
        .map_err(|e| RemoveSaverError::io(format!("cannot read {}", path.display()), e))?;

    let corruption = |offset: usize, reason: &str| RemoveSaverError::Corruption {
        path: path.display().to_string(),
        offset: offset as u64,
        reason: reason.to_string(),
    };

    let mut documents = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let header = bytes
            .get(offset..offset + 4)
            .ok_or_else(|| corruption(offset, "truncated length"))?;
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;

        let payload_start = offset + 4;
        let payload = bytes
            .get(payload_start..payload_start + length)
            .ok_or_else(|| corruption(offset, "truncated payload"))?;
        let trailer = bytes
            .get(payload_start + length..payload_start + length + 4)
            .ok_or_else(|| corruption(offset, "truncated checksum"))?;
        let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);

        if checksum(payload) != expected {
            return Err(corruption(offset, "checksum mismatch"));
        }
        let document: Document =
            serde_json::from_slice(payload).map_err(|e| corruption(offset, &e.to_string()))?;
        documents.push(document);
        offset = payload_start + length + 4;
    }
    Ok(documents)
}
