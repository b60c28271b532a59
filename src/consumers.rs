use byteorder::{ByteOrder, LittleEndian};

use crate::{Generator, PcmChunk, Sample, BYTES_PER_SAMPLE, CHANNELS};


/// Full-scale magnitude of a 16-bit sample. The negative extreme is never produced so the output
/// is symmetric.
pub const FULL_SCALE: f32 = 32767.0;


pub fn to_i16(sample: Sample) -> i16 {
    (sample * FULL_SCALE).max(-FULL_SCALE).min(FULL_SCALE) as i16
}


/// Fill one chunk from the output of `generator`.
///
/// All channels of each frame are written with the same data.
pub fn render_mono_chunk<G: Generator + ?Sized>(generator: &mut G) -> PcmChunk {
    let mut chunk = PcmChunk::silence();
    let frame_bytes = CHANNELS as usize * BYTES_PER_SAMPLE;
    for frame in chunk.bytes_mut().chunks_exact_mut(frame_bytes) {
        let value = to_i16(generator.next_sample());
        for sample in frame.chunks_exact_mut(BYTES_PER_SAMPLE) {
            LittleEndian::write_i16(sample, value);
        }
    }
    chunk
}
