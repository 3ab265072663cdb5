//! Transport encoding of quantized PCM.
//!
//! A chunk is the base64 text (standard alphabet, padded) of the samples'
//! little-endian bytes, the format speech services accept for streamed audio.

use crate::error::{Result, VoiceStreamError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

/// Encodes 16-bit PCM as base64 of its little-endian bytes.
pub fn encode(pcm: &[i16]) -> String {
    let bytes: Vec<u8> = pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

/// Decodes a chunk produced by [`encode`] back into samples.
pub fn decode(text: &str) -> Result<Vec<i16>> {
    let bytes = STANDARD
        .decode(text)
        .map_err(|e| VoiceStreamError::processing(format!("Invalid base64 chunk: {}", e)))?;

    if bytes.len() % 2 != 0 {
        return Err(VoiceStreamError::processing(format!(
            "Chunk holds {} bytes, not a whole number of 16-bit samples",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// One encoded frame handed to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedChunk {
    /// Sequence number of the frame this chunk was produced from.
    pub sequence: u64,
    /// Number of 16-bit samples in the chunk.
    pub samples: usize,
    /// Base64 payload.
    pub data: String,
}

impl EncodedChunk {
    pub fn from_pcm(sequence: u64, pcm: &[i16]) -> Self {
        Self {
            sequence,
            samples: pcm.len(),
            data: encode(pcm),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    pub fn into_string(self) -> String {
        self.data
    }

    /// Decodes the payload back into samples.
    pub fn decode(&self) -> Result<Vec<i16>> {
        decode(&self.data)
    }

    /// Size of the decoded payload in bytes.
    pub fn byte_len(&self) -> usize {
        self.samples * 2
    }
}
