//! Audio backends behind one contract.
//!
//! Every bridge is driven by two threads at once: the tick scheduler calls `update` and `reset`,
//! the audio scheduler calls `next_chunk`. Methods therefore take `&self` and each variant guards
//! its own state.

pub mod cascade;
pub mod queue;
pub mod segmented;
pub mod streaming;
pub mod synthesis;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::control::ControlState;
use crate::error::BridgeError;
use crate::PcmChunk;

pub use cascade::{select_bridge, Candidate};
pub use queue::ChunkQueue;
pub use segmented::SegmentedBridge;
pub use streaming::StreamingBridge;
pub use synthesis::SynthesisBridge;


#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Streaming,
    Segmented,
    Synthesis,
}


impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Streaming => "streaming",
            Backend::Segmented => "segmented",
            Backend::Synthesis => "synthesis",
        }
    }
}


impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


pub trait AudioBridge: Send + Sync {
    /// Bring the backend up. A variant may downgrade internally instead of failing, in which case
    /// `is_fallback` reports true afterwards.
    fn connect(&self) -> Result<(), BridgeError>;

    /// Accept one clamped control state. Called once per tick, never concurrently with itself.
    fn update(&self, controls: &ControlState);

    /// Next whole chunk, or `None` when nothing is ready. Never blocks.
    fn next_chunk(&self) -> Option<PcmChunk>;

    /// Forget everything tied to the previous lens so the next `update` is treated as the first.
    fn reset(&self);

    /// Stop background work and release the remote session. Idempotent.
    fn disconnect(&self);

    fn is_fallback(&self) -> bool;

    /// Backend currently producing audio.
    fn backend(&self) -> Backend;
}
