//! The control vector that drives every audio backend.
//!
//! A `ControlState` is produced by a lens, smoothed, and then clamped by the tick scheduler before
//! it leaves the pipeline. Values are passed by clone at every boundary; nothing mutates a state
//! after construction.

pub mod smoothing;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use crate::music::scales::Scale;


pub const TEMPO_RANGE: (i32, i32) = (60, 200);
pub const DENSITY_RANGE: (f64, f64) = (0.0, 1.0);
pub const BRIGHTNESS_RANGE: (f64, f64) = (0.0, 1.0);
pub const GUIDANCE_RANGE: (f64, f64) = (0.0, 6.0);
pub const TEMPERATURE_RANGE: (f64, f64) = (0.0, 3.0);

/// Continuous fields only count as changed when they move by more than this.
pub const DEAD_ZONE: f64 = 0.01;


/// One natural-language hint for the generative backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedPrompt {
    pub text: String,
    pub weight: f64,
}


impl WeightedPrompt {
    pub fn new<S: Into<String>>(text: S, weight: f64) -> Self {
        Self { text: text.into(), weight }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlState {
    /// Beats per minute.
    pub tempo: i32,
    pub density: f64,
    pub brightness: f64,
    pub guidance: f64,
    pub scale: Scale,
    pub prompts: Vec<WeightedPrompt>,
    pub mute_bass: bool,
    pub mute_drums: bool,
    pub temperature: f64,
}


impl Default for ControlState {
    fn default() -> Self {
        Self {
            tempo: 120,
            density: 0.5,
            brightness: 0.5,
            guidance: 4.0,
            scale: Scale::Unspecified,
            prompts: vec![WeightedPrompt::new("ambient", 1.0)],
            mute_bass: false,
            mute_drums: false,
            temperature: 1.1,
        }
    }
}


fn clamp_f64(value: f64, (low, high): (f64, f64), fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value.max(low).min(high)
    }
}


impl ControlState {
    /// Force every numeric field into its valid range.
    ///
    /// Total and idempotent. NaN collapses to the field default, prompt weights are floored at
    /// zero, and everything non-numeric passes through unchanged.
    pub fn clamp(&self) -> ControlState {
        let defaults = ControlState::default();
        ControlState {
            tempo: self.tempo.max(TEMPO_RANGE.0).min(TEMPO_RANGE.1),
            density: clamp_f64(self.density, DENSITY_RANGE, defaults.density),
            brightness: clamp_f64(self.brightness, BRIGHTNESS_RANGE, defaults.brightness),
            guidance: clamp_f64(self.guidance, GUIDANCE_RANGE, defaults.guidance),
            scale: self.scale,
            prompts: self
                .prompts
                .iter()
                .map(|p| WeightedPrompt {
                    text: p.text.clone(),
                    weight: if p.weight.is_nan() { 0.0 } else { p.weight.max(0.0) },
                })
                .collect(),
            mute_bass: self.mute_bass,
            mute_drums: self.mute_drums,
            temperature: clamp_f64(self.temperature, TEMPERATURE_RANGE, defaults.temperature),
        }
    }

    /// Fields of `self` that differ from `previous` by more than the dead-zone.
    ///
    /// Tempo, scale, the mute flags and prompts compare exactly; the four continuous fields use
    /// an absolute threshold of `DEAD_ZONE`. An empty set means no update is necessary.
    pub fn diff(&self, previous: &ControlState) -> FieldSet {
        let moved = |a: f64, b: f64| (a - b).abs() > DEAD_ZONE;
        let mut changes = FieldSet::empty();
        if self.tempo != previous.tempo {
            changes.insert(ControlField::Tempo);
        }
        if moved(self.density, previous.density) {
            changes.insert(ControlField::Density);
        }
        if moved(self.brightness, previous.brightness) {
            changes.insert(ControlField::Brightness);
        }
        if moved(self.guidance, previous.guidance) {
            changes.insert(ControlField::Guidance);
        }
        if self.scale != previous.scale {
            changes.insert(ControlField::Scale);
        }
        if self.prompts != previous.prompts {
            changes.insert(ControlField::Prompts);
        }
        if self.mute_bass != previous.mute_bass {
            changes.insert(ControlField::MuteBass);
        }
        if self.mute_drums != previous.mute_drums {
            changes.insert(ControlField::MuteDrums);
        }
        if moved(self.temperature, previous.temperature) {
            changes.insert(ControlField::Temperature);
        }
        changes
    }

    /// Copy of `self` with the listed fields taken from `newer`.
    pub fn merged(&self, newer: &ControlState, fields: FieldSet) -> ControlState {
        let mut out = self.clone();
        for field in fields.iter() {
            match field {
                ControlField::Tempo => out.tempo = newer.tempo,
                ControlField::Density => out.density = newer.density,
                ControlField::Brightness => out.brightness = newer.brightness,
                ControlField::Guidance => out.guidance = newer.guidance,
                ControlField::Scale => out.scale = newer.scale,
                ControlField::Prompts => out.prompts = newer.prompts.clone(),
                ControlField::MuteBass => out.mute_bass = newer.mute_bass,
                ControlField::MuteDrums => out.mute_drums = newer.mute_drums,
                ControlField::Temperature => out.temperature = newer.temperature,
            }
        }
        out
    }
}


/// Names of the nine control dimensions.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlField {
    Tempo,
    Density,
    Brightness,
    Guidance,
    Scale,
    Prompts,
    MuteBass,
    MuteDrums,
    Temperature,
}


impl ControlField {
    pub const ALL: [ControlField; 9] = [
        ControlField::Tempo,
        ControlField::Density,
        ControlField::Brightness,
        ControlField::Guidance,
        ControlField::Scale,
        ControlField::Prompts,
        ControlField::MuteBass,
        ControlField::MuteDrums,
        ControlField::Temperature,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControlField::Tempo => "tempo",
            ControlField::Density => "density",
            ControlField::Brightness => "brightness",
            ControlField::Guidance => "guidance",
            ControlField::Scale => "scale",
            ControlField::Prompts => "prompts",
            ControlField::MuteBass => "mute_bass",
            ControlField::MuteDrums => "mute_drums",
            ControlField::Temperature => "temperature",
        }
    }
}


impl fmt::Display for ControlField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


/// Small copyable set of `ControlField`s.
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct FieldSet(u16);


impl FieldSet {
    pub const fn empty() -> Self {
        FieldSet(0)
    }

    pub fn all() -> Self {
        ControlField::ALL.iter().copied().collect()
    }

    pub fn insert(&mut self, field: ControlField) {
        self.0 |= field.bit();
    }

    pub fn contains(&self, field: ControlField) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = ControlField> + '_ {
        ControlField::ALL.iter().copied().filter(move |f| self.contains(*f))
    }
}


impl FromIterator<ControlField> for FieldSet {
    fn from_iter<I: IntoIterator<Item = ControlField>>(iter: I) -> Self {
        let mut set = FieldSet::empty();
        for field in iter {
            set.insert(field);
        }
        set
    }
}


impl fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
