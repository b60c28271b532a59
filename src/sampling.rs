use std::convert::TryFrom;
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::ChunkError;
use crate::{BYTES_PER_SAMPLE, CHUNK_BYTES};


/// One 50ms block of 16-bit little-endian interleaved stereo PCM.
///
/// Always exactly `CHUNK_BYTES` long; there is no way to build a partial chunk.
#[derive(Clone, PartialEq, Eq)]
pub struct PcmChunk(Vec<u8>);


impl PcmChunk {
    pub fn silence() -> Self {
        PcmChunk(vec![0; CHUNK_BYTES])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// `(left, right)` sample pairs.
    pub fn frames(&self) -> impl Iterator<Item = (i16, i16)> + '_ {
        self.0
            .chunks_exact(2 * BYTES_PER_SAMPLE)
            .map(|f| (LittleEndian::read_i16(&f[..2]), LittleEndian::read_i16(&f[2..])))
    }
}


impl TryFrom<Vec<u8>> for PcmChunk {
    type Error = ChunkError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        if bytes.len() != CHUNK_BYTES {
            return Err(ChunkError::WrongSize { expected: CHUNK_BYTES, actual: bytes.len() });
        }
        Ok(PcmChunk(bytes))
    }
}


impl TryFrom<&[u8]> for PcmChunk {
    type Error = ChunkError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        PcmChunk::try_from(bytes.to_vec())
    }
}


impl AsRef<[u8]> for PcmChunk {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}


impl fmt::Debug for PcmChunk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PcmChunk({} bytes)", self.0.len())
    }
}


/// Cuts an arbitrary-length byte stream into whole chunks, carrying any remainder into the next
/// call.
#[derive(Debug, Default)]
pub struct Rechunker {
    pending: Vec<u8>,
}


impl Rechunker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<PcmChunk> {
        self.pending.extend_from_slice(bytes);
        let whole = self.pending.len() / CHUNK_BYTES * CHUNK_BYTES;
        let chunks = self.pending[..whole]
            .chunks_exact(CHUNK_BYTES)
            .map(|c| PcmChunk(c.to_vec()))
            .collect();
        self.pending.drain(..whole);
        chunks
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}


/// Split a complete segment into chunks. A trailing partial chunk is dropped.
pub fn split_segment(pcm: &[u8]) -> Vec<PcmChunk> {
    pcm.chunks_exact(CHUNK_BYTES).map(|c| PcmChunk(c.to_vec())).collect()
}


/// Duplicate each 16-bit mono sample into a left/right pair. A dangling odd byte is dropped.
pub fn mono_to_stereo(mono: &[u8]) -> Vec<u8> {
    let mut stereo = Vec::with_capacity(mono.len() * 2);
    for sample in mono.chunks_exact(BYTES_PER_SAMPLE) {
        stereo.extend_from_slice(sample);
        stereo.extend_from_slice(sample);
    }
    stereo
}
