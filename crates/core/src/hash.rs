use crate::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const READ_BUFFER_SIZE: usize = 8192;

/// Streaming SHA-256 over files and readers, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashCalculator;

impl HashCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Calculate SHA256 hash of a file
    pub fn calculate_file_hash(&self, file_path: &Path) -> Result<String> {
        let file = File::open(file_path)?;
        self.calculate_reader_hash(file)
    }

    /// Hash everything a reader yields without buffering the whole stream
    pub fn calculate_reader_hash<R: Read>(&self, mut reader: R) -> Result<String> {
        let mut hasher = Sha256::new();
        let mut buffer = [0; READ_BUFFER_SIZE];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }
}
