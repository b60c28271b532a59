use parking_lot::Mutex;
use tracing::debug;

use crate::bridge::{AudioBridge, Backend};
use crate::control::ControlState;
use crate::error::BridgeError;
use crate::generators::Synth;
use crate::PcmChunk;


/// Local additive synthesis. Always available, renders each chunk when it is asked for.
pub struct SynthesisBridge {
    synth: Mutex<Synth>,
    fallback: bool,
}


impl SynthesisBridge {
    pub fn new() -> Self {
        SynthesisBridge { synth: Mutex::new(Synth::default()), fallback: false }
    }

    /// A synthesis bridge standing in for a remote backend that could not be reached.
    pub fn fallback() -> Self {
        SynthesisBridge { synth: Mutex::new(Synth::default()), fallback: true }
    }

    pub fn active_harmonics(&self) -> usize {
        self.synth.lock().active_harmonics()
    }
}


impl Default for SynthesisBridge {
    fn default() -> Self {
        Self::new()
    }
}


impl AudioBridge for SynthesisBridge {
    fn connect(&self) -> Result<(), BridgeError> {
        debug!(fallback = self.fallback, "synthesis bridge ready");
        Ok(())
    }

    fn update(&self, controls: &ControlState) {
        self.synth.lock().apply(controls);
    }

    fn next_chunk(&self) -> Option<PcmChunk> {
        Some(self.synth.lock().render_chunk())
    }

    /// Nothing is queued and the voice carries no lens state, so the next `update` simply
    /// retargets it.
    fn reset(&self) {}

    fn disconnect(&self) {}

    fn is_fallback(&self) -> bool {
        self.fallback
    }

    fn backend(&self) -> Backend {
        Backend::Synthesis
    }
}
