//! Transport encoding of DPS/NFS-e documents: gzip (level 9) then base64.

use crate::utils::error::{EmissorError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub fn encode(data: &[u8]) -> Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

pub fn decode(payload: &str) -> Result<Vec<u8>> {
    let compressed = STANDARD
        .decode(payload.trim())
        .map_err(|e| EmissorError::xml(format!("payload is not valid base64: {}", e)))?;
    let mut out = Vec::new();
    GzDecoder::new(compressed.as_slice()).read_to_end(&mut out)?;
    Ok(out)
}

/// Decodes a returned NFS-e (`nfseXmlGZipB64`) into its XML text.
pub fn decode_to_string(payload: &str) -> Result<String> {
    let bytes = decode(payload)?;
    String::from_utf8(bytes).map_err(|e| EmissorError::xml(format!("decoded document is not UTF-8: {}", e)))
}
