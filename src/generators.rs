use std::f64::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::consumers;
use crate::control::ControlState;
use crate::filters::{self, Filter, Glide, Lfo};
use crate::music::notes::Hz;
use crate::{Generator, PcmChunk, Sample, SAMPLE_RATE};


pub const LOWEST_HZ: Hz = 110.0;
pub const BRIGHTNESS_SPAN_HZ: Hz = 330.0;
pub const MAX_HARMONICS: usize = 6;
pub const VOLUME: f32 = 0.3;
pub const NOISE_CEILING: f64 = 0.15;
pub const GLIDE_SECS: f64 = 0.2;
pub const SEED: u64 = 42;


/// Additive synthesiser following eight of the nine control dimensions. Prompts are ignored.
///
/// | control     | effect                                                    |
/// |-------------|-----------------------------------------------------------|
/// | brightness  | base pitch `110 + 330·b` Hz, snapped to `scale`           |
/// | density     | `1 + ⌊5·d⌋` harmonics, harmonic k at amplitude `0.3/k`    |
/// | mute_bass   | drops harmonics 1 and 2 when more than two are present    |
/// | tempo       | LFO rate `tempo/60` Hz                                    |
/// | guidance    | LFO depth `min(1, g/6)`, jitter grows as depth falls      |
/// | mute_drums  | flat envelope                                             |
/// | temperature | Gaussian noise floor `0.15·t/3`                           |
pub struct Synth {
    sample_rate: f64,
    phase: f64,
    pitch: Glide,
    harmonics: Vec<(f64, f64)>,
    lfo: Lfo,
    noise_level: f64,
    rng: StdRng,
    post: Vec<Filter>,
}


impl Default for Synth {
    fn default() -> Self {
        Self::new(SAMPLE_RATE)
    }
}


impl Synth {
    pub fn new(sample_rate: u32) -> Self {
        Synth {
            sample_rate: sample_rate as f64,
            phase: 0.0,
            pitch: Glide::new(sample_rate, GLIDE_SECS, 220.0),
            harmonics: vec![(1.0, 0.3)],
            lfo: Lfo::new(sample_rate),
            noise_level: 0.0,
            rng: StdRng::seed_from_u64(SEED),
            post: vec![filters::gain(VOLUME)],
        }
    }

    pub fn apply(&mut self, controls: &ControlState) {
        let raw = LOWEST_HZ + controls.brightness * BRIGHTNESS_SPAN_HZ;
        self.pitch.set_target(controls.scale.quantize(raw));

        let count = 1 + (controls.density * (MAX_HARMONICS - 1) as f64).floor().max(0.0) as usize;
        let count = count.min(MAX_HARMONICS);
        let mut harmonics: Vec<(f64, f64)> = (1..=count)
            .map(|k| (k as f64, 0.3 / k as f64))
            .collect();
        if controls.mute_bass && harmonics.len() > 2 {
            harmonics.drain(..2);
        }
        self.harmonics = harmonics;

        self.lfo.set_rate(controls.tempo as f64 / 60.0);
        self.lfo.set_depth((controls.guidance / 6.0).min(1.0));
        self.lfo.set_flat(controls.mute_drums);
        self.noise_level = controls.temperature / 3.0 * NOISE_CEILING;
    }

    pub fn active_harmonics(&self) -> usize {
        self.harmonics.len()
    }

    /// `(multiple of the fundamental, amplitude)` for every sounding partial.
    pub fn harmonics(&self) -> &[(f64, f64)] {
        &self.harmonics
    }

    pub fn target_hz(&self) -> Hz {
        self.pitch.target()
    }

    pub fn lfo(&self) -> &Lfo {
        &self.lfo
    }

    pub fn noise_level(&self) -> f64 {
        self.noise_level
    }

    pub fn render_chunk(&mut self) -> PcmChunk {
        consumers::render_mono_chunk(self)
    }
}


impl Generator for Synth {
    fn next_sample(&mut self) -> Sample {
        let freq = self.pitch.next();
        let envelope = self.lfo.next(&mut self.rng);

        let phase = self.phase;
        let mut value: f64 = self
            .harmonics
            .iter()
            .map(|(multiple, amplitude)| amplitude * (phase * multiple).sin())
            .sum();
        if self.noise_level > 0.0 {
            let z: f64 = self.rng.sample(StandardNormal);
            value += z * self.noise_level;
        }

        self.phase += TAU * freq / self.sample_rate;
        if self.phase > TAU * 1000.0 {
            self.phase -= TAU * 1000.0;
        }

        filters::chain(&mut self.post, (value * envelope) as Sample)
    }
}
