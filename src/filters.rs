use std::f64::consts::TAU;

use rand::Rng;
use rand_distr::StandardNormal;

use crate::Sample;


/// Per-sample transform applied after a generator.
pub type Filter = Box<dyn FnMut(Sample) -> Sample + Send>;


/// Run `sample` through every filter in order.
pub fn chain(filters: &mut [Filter], sample: Sample) -> Sample {
    filters.iter_mut().fold(sample, |value, filter| filter(value))
}


/// Scale the signal by the provided scale factor with clipping at `[-1, 1]`.
pub fn gain(scale_factor: f32) -> Filter {
    Box::new(move |value: Sample| (value * scale_factor).max(-1.0).min(1.0))
}


/// First-order lag toward a moving target, advanced once per sample.
///
/// `y += (target - y) * (1 - e^(-1 / (tau * rate)))`, so a step settles to ~63% after `tau`
/// seconds regardless of sample rate.
#[derive(Debug, Clone)]
pub struct Glide {
    coefficient: f64,
    value: f64,
    target: f64,
}


impl Glide {
    pub fn new(sample_rate: u32, time_constant_secs: f64, initial: f64) -> Self {
        let coefficient = 1.0 - (-1.0 / (time_constant_secs * sample_rate as f64)).exp();
        Glide { coefficient, value: initial, target: initial }
    }

    pub fn set_target(&mut self, target: f64) {
        self.target = target;
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn next(&mut self) -> f64 {
        self.value += (self.target - self.value) * self.coefficient;
        self.value
    }
}


/// Amplitude envelope pulsing at a fixed rate.
///
/// The envelope is `0.5 + depth/2 · sin(2π·phase)` plus Gaussian jitter whose spread grows as
/// depth falls (`σ = 0.3 · (1 - depth)`), clamped to `[0.1, 1]`. A flat LFO always yields 1.
#[derive(Debug, Clone)]
pub struct Lfo {
    sample_rate: f64,
    phase: f64,
    rate_hz: f64,
    depth: f64,
    flat: bool,
}


impl Lfo {
    pub const FLOOR: f64 = 0.1;
    pub const JITTER: f64 = 0.3;

    pub fn new(sample_rate: u32) -> Self {
        Lfo {
            sample_rate: sample_rate as f64,
            phase: 0.0,
            rate_hz: 2.0,
            depth: 0.5,
            flat: false,
        }
    }

    pub fn set_rate(&mut self, rate_hz: f64) {
        self.rate_hz = rate_hz;
    }

    pub fn set_depth(&mut self, depth: f64) {
        self.depth = depth.max(0.0).min(1.0);
    }

    pub fn set_flat(&mut self, flat: bool) {
        self.flat = flat;
    }

    pub fn rate(&self) -> f64 {
        self.rate_hz
    }

    pub fn depth(&self) -> f64 {
        self.depth
    }

    pub fn is_flat(&self) -> bool {
        self.flat
    }

    pub fn next<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        self.phase = (self.phase + self.rate_hz / self.sample_rate).fract();
        if self.flat {
            return 1.0;
        }
        let z: f64 = rng.sample(StandardNormal);
        let jitter = (1.0 - self.depth) * Self::JITTER * z;
        let envelope = 0.5 + self.depth * 0.5 * (TAU * self.phase).sin() + jitter;
        envelope.max(Self::FLOOR).min(1.0)
    }
}
