//! Binary storage for the vector index.
//!
//! File format: vectors.bin
//!
//! Header (81 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u32 (little-endian)
//! - entry_count: u64 (little-endian)
//! - metadata_digest: [u8; 32] (SHA256 over the metadata rows)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated, in position order):
//! - position: u64 (little-endian)
//! - embedding: [f32; dimensions] (little-endian)
//!
//! Trailer:
//! - body_checksum: u32 (CRC32 of all entry bytes)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::semantic::index::VectorIndex;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(4) + entry_count(8)
/// + metadata_digest(32) + checksum(4)
const HEADER_SIZE: usize = 81;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: index was built with a different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Corrupt index: {0}")]
    Corrupt(String),
}

/// An index read back from disk along with the identity it was saved with.
#[derive(Debug)]
pub struct StoredIndex {
    pub index: VectorIndex,
    pub model_id: [u8; 32],
    pub metadata_digest: [u8; 32],
}

/// Storage manager for the vector index file.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    /// Create a new storage manager for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Get the storage file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the storage file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the index and check it was built with `expected_model_id`.
    pub fn load(&self, expected_model_id: &[u8; 32]) -> Result<StoredIndex, VectorStorageError> {
        let stored = self.load_unchecked()?;
        if stored.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }
        Ok(stored)
    }

    /// Load the index without checking which model built it.
    pub fn load_unchecked(&self) -> Result<StoredIndex, VectorStorageError> {
        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let header = Self::read_header(&mut reader)?;
        if header.dimensions == 0 {
            return Err(VectorStorageError::Corrupt("zero dimensions".to_string()));
        }
        if header.entry_count == 0 {
            return Err(VectorStorageError::Corrupt("index holds no vectors".to_string()));
        }

        // Nothing is allocated until the header agrees with the file size
        let expected_len = expected_file_len(header.dimensions, header.entry_count)
            .ok_or_else(|| {
                VectorStorageError::Corrupt(format!(
                    "header claims {} entries of {} dimensions",
                    header.entry_count, header.dimensions
                ))
            })?;
        if file_len != expected_len {
            return Err(VectorStorageError::Corrupt(format!(
                "file is {} bytes, header describes {} bytes",
                file_len, expected_len
            )));
        }

        let dimensions = header.dimensions as usize;
        let entry_count = usize::try_from(header.entry_count).map_err(|_| {
            VectorStorageError::Corrupt(format!("entry count {} too large", header.entry_count))
        })?;

        let mut hasher = crc32fast::Hasher::new();
        let mut data = Vec::with_capacity(entry_count * dimensions);
        let mut float_bytes = vec![0u8; dimensions * 4];

        for expected_position in 0..entry_count {
            let position =
                Self::read_entry(&mut reader, &mut float_bytes, &mut data, &mut hasher)?;
            if position != expected_position as u64 {
                return Err(VectorStorageError::Corrupt(format!(
                    "entry {} is stored at position {}",
                    expected_position, position
                )));
            }
        }

        let mut trailer = [0u8; 4];
        reader
            .read_exact(&mut trailer)
            .map_err(|e| Self::truncated(e, "missing body checksum"))?;
        if u32::from_le_bytes(trailer) != hasher.finalize() {
            return Err(VectorStorageError::ChecksumMismatch);
        }

        Ok(StoredIndex {
            index: VectorIndex::from_raw(data, dimensions),
            model_id: header.model_id,
            metadata_digest: header.metadata_digest,
        })
    }

    /// Save the vector index to storage.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(
        &self,
        index: &VectorIndex,
        model_id: &[u8; 32],
        metadata_digest: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let temp_path = self.stage(index, model_id, metadata_digest)?;
        if let Err(err) = std::fs::rename(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err.into());
        }
        Ok(())
    }

    /// Write the index to a synced temp file next to the target and return
    /// its path. Renaming it onto `path()` completes the save.
    pub(crate) fn stage(
        &self,
        index: &VectorIndex,
        model_id: &[u8; 32],
        metadata_digest: &[u8; 32],
    ) -> Result<PathBuf, VectorStorageError> {
        let dimensions = u32::try_from(index.dimensions()).map_err(|_| {
            VectorStorageError::InvalidFormat(format!(
                "{} dimensions do not fit the file format",
                index.dimensions()
            ))
        })?;

        let temp_path = self.path.with_extension("tmp");

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions,
            entry_count: index.len() as u64,
            metadata_digest: *metadata_digest,
        };

        if let Err(err) = Self::write_to_file(&temp_path, &header, index) {
            // Clean up temp file on error
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        Ok(temp_path)
    }

    fn write_to_file(
        path: &Path,
        header: &Header,
        index: &VectorIndex,
    ) -> Result<(), VectorStorageError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        Self::write_header(&mut writer, header)?;

        let mut hasher = crc32fast::Hasher::new();
        for (position, embedding) in index.iter().enumerate() {
            Self::write_entry(&mut writer, position as u64, embedding, &mut hasher)?;
        }
        writer.write_all(&hasher.finalize().to_le_bytes())?;

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }

    fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader
            .read_exact(&mut header_bytes)
            .map_err(|e| Self::truncated(e, "file shorter than header"))?;

        let stored_checksum = u32::from_le_bytes(le_array(&header_bytes[77..81]));

        // Verify checksum (computed over header without checksum field)
        let computed_checksum = crc32fast::hash(&header_bytes[0..77]);
        if stored_checksum != computed_checksum {
            return Err(VectorStorageError::ChecksumMismatch);
        }

        let version = header_bytes[0];
        if version != FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        Ok(Header {
            version,
            model_id: le_array(&header_bytes[1..33]),
            dimensions: u32::from_le_bytes(le_array(&header_bytes[33..37])),
            entry_count: u64::from_le_bytes(le_array(&header_bytes[37..45])),
            metadata_digest: le_array(&header_bytes[45..77]),
        })
    }

    fn write_header(writer: &mut impl Write, header: &Header) -> Result<(), VectorStorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = header.version;
        header_bytes[1..33].copy_from_slice(&header.model_id);
        header_bytes[33..37].copy_from_slice(&header.dimensions.to_le_bytes());
        header_bytes[37..45].copy_from_slice(&header.entry_count.to_le_bytes());
        header_bytes[45..77].copy_from_slice(&header.metadata_digest);

        let checksum = crc32fast::hash(&header_bytes[0..77]);
        header_bytes[77..81].copy_from_slice(&checksum.to_le_bytes());

        writer.write_all(&header_bytes)?;
        Ok(())
    }

    /// Read one entry, appending its floats to `data`. Returns the stored position.
    fn read_entry(
        reader: &mut impl Read,
        float_bytes: &mut [u8],
        data: &mut Vec<f32>,
        hasher: &mut crc32fast::Hasher,
    ) -> Result<u64, VectorStorageError> {
        let mut position_bytes = [0u8; 8];
        reader
            .read_exact(&mut position_bytes)
            .map_err(|e| Self::truncated(e, "entry count exceeds stored entries"))?;
        hasher.update(&position_bytes);

        reader
            .read_exact(float_bytes)
            .map_err(|e| Self::truncated(e, "entry shorter than stored dimensions"))?;
        hasher.update(float_bytes);

        data.extend(
            float_bytes
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes(le_array(chunk))),
        );

        Ok(u64::from_le_bytes(position_bytes))
    }

    fn write_entry(
        writer: &mut impl Write,
        position: u64,
        embedding: &[f32],
        hasher: &mut crc32fast::Hasher,
    ) -> Result<(), VectorStorageError> {
        let position_bytes = position.to_le_bytes();
        writer.write_all(&position_bytes)?;
        hasher.update(&position_bytes);

        for value in embedding {
            let bytes = value.to_le_bytes();
            writer.write_all(&bytes)?;
            hasher.update(&bytes);
        }

        Ok(())
    }

    fn truncated(err: std::io::Error, what: &str) -> VectorStorageError {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            VectorStorageError::Corrupt(what.to_string())
        } else {
            VectorStorageError::Io(err)
        }
    }
}

/// Size in bytes of a file holding `entry_count` vectors of `dimensions`
/// floats, or `None` if it does not fit in a u64.
fn expected_file_len(dimensions: u32, entry_count: u64) -> Option<u64> {
    let entry_len = u64::from(dimensions).checked_mul(4)?.checked_add(8)?;
    entry_len
        .checked_mul(entry_count)?
        .checked_add(HEADER_SIZE as u64 + 4)
}

/// Copy a slice into a fixed-size array. Callers pass slices of exactly `N` bytes.
fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u32,
    entry_count: u64,
    metadata_digest: [u8; 32],
}
