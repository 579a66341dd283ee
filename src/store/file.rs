//! File-backed block store
//!
//! One file per tile under a base directory. Each file is framed as
//!
//! ```text
//! [1-byte compression tag][8-byte raw length][4-byte payload length][payload]
//! ```
//!
//! so `block_length` only has to read the header. Writes go to a temp file
//! that is renamed over the old block.

use super::compression::{compress, decompress, CompressionAlgorithm};
use super::BlockStore;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const HEADER_LEN: usize = 13;

struct BlockHeader {
    compression: CompressionAlgorithm,
    raw_len: u64,
    payload_len: u32,
}

impl BlockHeader {
    fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0] = self.compression.tag();
        bytes[1..9].copy_from_slice(&self.raw_len.to_le_bytes());
        bytes[9..13].copy_from_slice(&self.payload_len.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Result<Self> {
        let mut raw_len = [0u8; 8];
        raw_len.copy_from_slice(&bytes[1..9]);
        let mut payload_len = [0u8; 4];
        payload_len.copy_from_slice(&bytes[9..13]);

        Ok(Self {
            compression: CompressionAlgorithm::from_tag(bytes[0])?,
            raw_len: u64::from_le_bytes(raw_len),
            payload_len: u32::from_le_bytes(payload_len),
        })
    }

    /// Reject headers that disagree with the file they came from
    fn check(&self, tile_id: u64, file_len: u64) -> Result<()> {
        if HEADER_LEN as u64 + self.payload_len as u64 != file_len {
            return Err(Error::Store(format!(
                "Block for tile {} is {} bytes, header says {}",
                tile_id,
                file_len,
                HEADER_LEN as u64 + self.payload_len as u64
            )));
        }
        let uncompressed = self.compression == CompressionAlgorithm::None;
        if uncompressed && self.raw_len != self.payload_len as u64 {
            return Err(Error::Store(format!(
                "Uncompressed block for tile {} has raw length {} but payload length {}",
                tile_id, self.raw_len, self.payload_len
            )));
        }
        Ok(())
    }
}

/// Directory of per-tile block files
pub struct FileBlockStore {
    /// Base directory for block files
    base_path: PathBuf,
    compression: CompressionAlgorithm,
    /// Readers share, writers replace files exclusively
    lock: RwLock<()>,
}

impl FileBlockStore {
    /// Create or open a block store
    ///
    /// # Arguments
    /// * `base_path` - Directory to store block files
    /// * `compression` - Compression used for newly written blocks
    pub fn new<P: AsRef<Path>>(base_path: P, compression: CompressionAlgorithm) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)
            .map_err(|e| Error::Store(format!("Failed to create block directory: {}", e)))?;

        info!(path = ?base_path, ?compression, "Opened file block store");

        Ok(Self {
            base_path,
            compression,
            lock: RwLock::new(()),
        })
    }

    /// Create without compression
    pub fn with_defaults<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        Self::new(base_path, CompressionAlgorithm::None)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn compression(&self) -> CompressionAlgorithm {
        self.compression
    }

    fn tile_path(&self, tile_id: u64) -> PathBuf {
        self.base_path.join(format!("tile_{:016x}.blk", tile_id))
    }

    fn open_block(&self, tile_id: u64) -> Result<Option<(File, BlockHeader)>> {
        let path = self.tile_path(tile_id);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Store(format!(
                    "Failed to open block {:?}: {}",
                    path, e
                )))
            }
        };

        let file_len = file
            .metadata()
            .map_err(|e| Error::Store(format!("Failed to stat block {:?}: {}", path, e)))?
            .len();
        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)
            .map_err(|e| Error::Store(format!("Failed to read block header: {}", e)))?;
        let header = BlockHeader::from_bytes(&header)?;
        header.check(tile_id, file_len)?;
        Ok(Some((file, header)))
    }

    fn write_block(&self, temp_path: &Path, header: &BlockHeader, payload: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(temp_path)
            .map_err(|e| Error::Store(format!("Failed to create block file: {}", e)))?;
        file.write_all(&header.to_bytes())
            .map_err(|e| Error::Store(format!("Write failed: {}", e)))?;
        file.write_all(payload)
            .map_err(|e| Error::Store(format!("Write failed: {}", e)))?;
        file.sync_all()
            .map_err(|e| Error::Store(format!("Flush failed: {}", e)))
    }

    /// Delete the block for `tile_id`, returning whether one existed
    pub fn remove(&self, tile_id: u64) -> Result<bool> {
        let _guard = self.lock.write();
        match std::fs::remove_file(self.tile_path(tile_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Store(format!("Failed to remove block: {}", e))),
        }
    }

    /// Tile ids with a block on disk, in ascending order
    pub fn tile_ids(&self) -> Result<Vec<u64>> {
        let _guard = self.lock.read();
        let entries = std::fs::read_dir(&self.base_path)
            .map_err(|e| Error::Store(format!("Failed to list blocks: {}", e)))?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(hex) = name
                .to_str()
                .and_then(|name| name.strip_prefix("tile_"))
                .and_then(|name| name.strip_suffix(".blk"))
            else {
                continue;
            };
            if let Ok(id) = u64::from_str_radix(hex, 16) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

impl BlockStore for FileBlockStore {
    fn block_length(&self, tile_id: u64) -> Result<u64> {
        let _guard = self.lock.read();
        Ok(self
            .open_block(tile_id)?
            .map_or(0, |(_, header)| header.raw_len))
    }

    fn load(&self, tile_id: u64, buffer: &mut [u8]) -> Result<usize> {
        let _guard = self.lock.read();
        let Some((mut file, header)) = self.open_block(tile_id)? else {
            return Ok(0);
        };

        let mut payload = vec![0u8; header.payload_len as usize];
        file.read_exact(&mut payload)
            .map_err(|e| Error::Store(format!("Failed to read block payload: {}", e)))?;

        let data = decompress(&payload, header.compression)?;
        if data.len() as u64 != header.raw_len {
            return Err(Error::Store(format!(
                "Block for tile {} decoded to {} bytes, header says {}",
                tile_id,
                data.len(),
                header.raw_len
            )));
        }

        let len = data.len().min(buffer.len());
        buffer[..len].copy_from_slice(&data[..len]);
        debug!(tile_id, bytes = len, "Read block");
        Ok(len)
    }

    fn store(&self, tile_id: u64, data: &[u8]) -> Result<()> {
        let payload = compress(data, self.compression)?;
        let header = BlockHeader {
            compression: self.compression,
            raw_len: data.len() as u64,
            payload_len: u32::try_from(payload.len()).map_err(|_| {
                Error::Store(format!("Block for tile {} exceeds 4 GiB", tile_id))
            })?,
        };

        let _guard = self.lock.write();
        let path = self.tile_path(tile_id);
        let temp_path = path.with_extension("blk.tmp");

        if let Err(e) = self
            .write_block(&temp_path, &header, &payload)
            .and_then(|()| {
                std::fs::rename(&temp_path, &path)
                    .map_err(|e| Error::Store(format!("Failed to replace block: {}", e)))
            })
        {
            std::fs::remove_file(&temp_path).ok();
            return Err(e);
        }

        debug!(
            tile_id,
            raw = data.len(),
            stored = payload.len(),
            "Wrote block"
        );
        Ok(())
    }
}
