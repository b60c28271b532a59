pub mod bridge;
pub mod config;
pub mod consumers;
pub mod control;
pub mod error;
pub mod filters;
pub mod generators;
pub mod hub;
pub mod lens;
pub mod music;
pub mod observers;
pub mod protocol;
pub mod sampling;
pub mod scheduler;
pub mod sources;
pub mod telemetry;


pub use bridge::{AudioBridge, Backend};
pub use control::{ControlField, ControlState, FieldSet, Scale, WeightedPrompt};
pub use sampling::PcmChunk;


pub type Sample = f32;


/// Output sample rate of every PCM chunk produced by a bridge.
pub const SAMPLE_RATE: u32 = 48_000;

/// Interleaved channel count of every PCM chunk.
pub const CHANNELS: u16 = 2;

/// Frames (one sample per channel) in a single chunk: 50ms at 48kHz.
pub const FRAMES_PER_CHUNK: usize = 2400;

/// Bytes per interleaved 16-bit sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Exact byte length of a chunk on the wire: `2400 * 2 * 2`.
pub const CHUNK_BYTES: usize = FRAMES_PER_CHUNK * CHANNELS as usize * BYTES_PER_SAMPLE;

/// Playback duration of one chunk.
pub const CHUNK_DURATION: std::time::Duration = std::time::Duration::from_millis(50);


/// Source of a mono audio stream, advanced one sample at a time.
///
/// Each call generates the output value at that given instance in time, e.g. for a sample rate of
/// 48000Hz, this function should be called 48000 times per second to generate that second's worth
/// of sound.
pub trait Generator: Send {
    fn next_sample(&mut self) -> Sample;
}


impl<F> Generator for F
where
    F: FnMut() -> Sample + Send,
{
    fn next_sample(&mut self) -> Sample {
        (self)()
    }
}


/// End consumer of the chunk stream.
///
/// Observers see every chunk a subscriber receives, in order. Implementations are free to buffer
/// but must not assume any particular pacing between calls.
pub trait Observer {
    fn observe(&mut self, chunk: &PcmChunk) -> anyhow::Result<()>;
}
