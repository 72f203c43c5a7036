//! Upload payload encoding
//!
//! Payloads travel either as plain rows or as a gzip of their canonical
//! JSON encoding. The receipt path checks the gzip magic and passes raw
//! data through otherwise, so a peer that never compresses interoperates.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use drift_types::{Result, Row, SyncError};

/// First two bytes of any gzip stream.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A bulk-upload body.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadPayload {
    Rows(Vec<Row>),
    /// Gzip of the canonical JSON array encoding of the rows.
    Gzip(Vec<u8>),
}

impl UploadPayload {
    pub fn is_compressed(&self) -> bool {
        matches!(self, UploadPayload::Gzip(_))
    }

    /// Number of rows carried, decoding if necessary.
    pub fn row_count(&self) -> Result<usize> {
        Ok(match self {
            UploadPayload::Rows(rows) => rows.len(),
            UploadPayload::Gzip(_) => self.rows()?.len(),
        })
    }

    /// Decode back into rows, decompressing when the body carries the
    /// gzip magic.
    pub fn rows(&self) -> Result<Vec<Row>> {
        match self {
            UploadPayload::Rows(rows) => Ok(rows.clone()),
            UploadPayload::Gzip(bytes) => {
                let json = decompress(bytes)?;
                serde_json::from_slice(&json)
                    .map_err(|e| SyncError::validation(format!("payload decode failed: {e}")))
            }
        }
    }
}

/// Canonical JSON encoding of a row slice.
pub fn encode_rows(rows: &[Row]) -> Result<Vec<u8>> {
    serde_json::to_vec(rows).map_err(|e| SyncError::validation(format!("payload encode failed: {e}")))
}

/// Gzip `data` at the default level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| SyncError::unknown(format!("gzip compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| SyncError::unknown(format!("gzip compression failed: {e}")))
}

/// Inflate `data` when it carries the gzip magic; pass it through
/// unchanged otherwise.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 2 || data[..2] != GZIP_MAGIC {
        return Ok(data.to_vec());
    }
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| SyncError::unknown(format!("gzip decompression failed: {e}")))?;
    Ok(out)
}

/// Build the payload for a batch of rows, compressing when enabled and
/// the encoded size reaches the threshold.
pub fn build_payload(rows: Vec<Row>, compression_enabled: bool, threshold: usize) -> Result<UploadPayload> {
    if !compression_enabled {
        return Ok(UploadPayload::Rows(rows));
    }
    let encoded = encode_rows(&rows)?;
    if encoded.len() < threshold {
        return Ok(UploadPayload::Rows(rows));
    }
    Ok(UploadPayload::Gzip(compress(&encoded)?))
}
