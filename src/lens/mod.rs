//! Lenses: a domain source paired with a mapping onto controls and a visualisation.
//!
//! A `LensModel` holds the pure part (parameter table, target mapping, visualisation). `Lens<M>`
//! wraps a model with its source, its live parameters and its own smoothing state, and is what the
//! tick scheduler drives through the object-safe `ActiveLens`.

pub mod atmosphere;
pub mod flow;
pub mod lattice;
pub mod pulse;

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::control::smoothing::Ema;
use crate::control::{ControlField, ControlState, Scale, WeightedPrompt};
use crate::error::LensError;
use crate::sources::{DomainSource, WeatherRecord};

use atmosphere::Atmosphere;
use flow::Flow;
use lattice::Lattice;
use pulse::Pulse;


/// A user-adjustable lens parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub default: f64,
    /// What moving the slider does, for display.
    pub effects: &'static [&'static str],
}


impl ParamSpec {
    pub fn accepts(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}


/// Current values of one lens's parameters, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    specs: &'static [ParamSpec],
    values: Vec<f64>,
}


impl Params {
    pub fn defaults(specs: &'static [ParamSpec]) -> Self {
        Params {
            specs,
            values: specs.iter().map(|spec| spec.default).collect(),
        }
    }

    fn index(&self, name: &str) -> Option<usize> {
        self.specs.iter().position(|spec| spec.name == name)
    }

    /// Value of a declared parameter; undeclared names read as zero.
    pub fn get(&self, name: &str) -> f64 {
        self.index(name).map_or(0.0, |i| self.values[i])
    }

    /// Set a parameter, refusing unknown names and anything outside the declared bounds.
    pub fn set(&mut self, name: &str, value: f64) -> Result<(), LensError> {
        let i = self
            .index(name)
            .ok_or_else(|| LensError::UnknownParameter(name.to_string()))?;
        let spec = &self.specs[i];
        if !spec.accepts(value) {
            return Err(LensError::OutOfBounds {
                name: name.to_string(),
                value,
                min: spec.min,
                max: spec.max,
            });
        }
        self.values[i] = value;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.specs.iter().map(|spec| spec.name).zip(self.values.iter().copied())
    }
}


/// What a lens wants the controls to be, before smoothing and clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct Targets {
    pub tempo: f64,
    pub density: f64,
    pub brightness: f64,
    pub guidance: f64,
    pub temperature: f64,
    pub scale: Scale,
    pub prompts: Vec<WeightedPrompt>,
    pub mute_bass: bool,
    pub mute_drums: bool,
}


impl Default for Targets {
    fn default() -> Self {
        let base = ControlState::default();
        Targets {
            tempo: base.tempo as f64,
            density: base.density,
            brightness: base.brightness,
            guidance: base.guidance,
            temperature: base.temperature,
            scale: base.scale,
            prompts: base.prompts,
            mute_bass: base.mute_bass,
            mute_drums: base.mute_drums,
        }
    }
}


pub type RecordOf<M> = <<M as LensModel>::Source as DomainSource>::Record;


pub trait LensModel: Send + 'static {
    type Source: DomainSource;

    const NAME: &'static str;
    const DESCRIPTION: &'static str;
    const TICK_HZ: f64;
    const PARAMETERS: &'static [ParamSpec];

    fn source(&self) -> Self::Source;

    /// Raw mapping from one record to control targets. Must not smooth or clamp.
    fn targets(&self, record: &RecordOf<Self>, params: &Params) -> Targets;

    fn visualize(&self, record: &RecordOf<Self>, params: &Params) -> Value;
}


/// The output of one lens tick: smoothed but unclamped controls and the matching visualisation.
#[derive(Debug, Clone)]
pub struct Frame {
    pub controls: ControlState,
    pub viz: Value,
}


/// A running lens instance. Built fresh on every lens switch.
pub struct Lens<M: LensModel> {
    model: M,
    source: M::Source,
    params: Params,
    smoothing: Ema,
}


impl<M: LensModel> Lens<M> {
    pub fn new(model: M, alpha: f64) -> Self {
        let source = model.source();
        Lens {
            model,
            source,
            params: Params::defaults(M::PARAMETERS),
            smoothing: Ema::new(alpha),
        }
    }

    pub fn produce(&mut self, t: f64) -> RecordOf<M> {
        self.source.tick(t, &self.params)
    }

    /// Smooth every numeric target; tempo is rounded after smoothing. Clamping is left to the
    /// caller.
    pub fn map_to_controls(&mut self, record: &RecordOf<M>) -> ControlState {
        let targets = self.model.targets(record, &self.params);
        ControlState {
            tempo: self.smooth(ControlField::Tempo, targets.tempo).round() as i32,
            density: self.smooth(ControlField::Density, targets.density),
            brightness: self.smooth(ControlField::Brightness, targets.brightness),
            guidance: self.smooth(ControlField::Guidance, targets.guidance),
            temperature: self.smooth(ControlField::Temperature, targets.temperature),
            scale: targets.scale,
            prompts: targets.prompts,
            mute_bass: targets.mute_bass,
            mute_drums: targets.mute_drums,
        }
    }

    pub fn map_to_visualization(&self, record: &RecordOf<M>) -> Value {
        self.model.visualize(record, &self.params)
    }

    /// A non-finite target holds the previous output rather than poisoning the filter.
    fn smooth(&mut self, field: ControlField, raw: f64) -> f64 {
        if raw.is_finite() {
            self.smoothing.ema(field, raw)
        } else {
            self.smoothing.value(field).unwrap_or(raw)
        }
    }
}


/// Object-safe view of a running lens, for the scheduler.
pub trait ActiveLens: Send {
    fn name(&self) -> &'static str;

    fn tick_hz(&self) -> f64;

    fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz())
    }

    fn params(&self) -> &Params;

    fn set_param(&mut self, name: &str, value: f64) -> Result<(), LensError>;

    fn supports_live(&self) -> bool;

    fn set_live_weather(&mut self, observation: Option<WeatherRecord>);

    /// Produce, map and visualise one record at `t` seconds into the session.
    fn tick(&mut self, t: f64) -> Frame;
}


impl<M: LensModel> ActiveLens for Lens<M> {
    fn name(&self) -> &'static str {
        M::NAME
    }

    fn tick_hz(&self) -> f64 {
        M::TICK_HZ
    }

    fn params(&self) -> &Params {
        &self.params
    }

    fn set_param(&mut self, name: &str, value: f64) -> Result<(), LensError> {
        self.params.set(name, value)?;
        debug!(lens = M::NAME, name, value, "parameter set");
        Ok(())
    }

    fn supports_live(&self) -> bool {
        self.source.supports_live_weather()
    }

    fn set_live_weather(&mut self, observation: Option<WeatherRecord>) {
        self.source.set_live_weather(observation);
    }

    fn tick(&mut self, t: f64) -> Frame {
        let record = self.produce(t);
        let controls = self.map_to_controls(&record);
        let viz = self.map_to_visualization(&record);
        Frame { controls, viz }
    }
}


/// Static description of a registered lens.
#[derive(Debug, Clone, Copy)]
pub struct LensEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub tick_hz: f64,
    pub parameters: &'static [ParamSpec],
}


impl LensEntry {
    const fn of<M: LensModel>() -> Self {
        LensEntry {
            name: M::NAME,
            description: M::DESCRIPTION,
            tick_hz: M::TICK_HZ,
            parameters: M::PARAMETERS,
        }
    }
}


pub const DEFAULT_LENS: &str = Atmosphere::NAME;

/// Every lens, in the order clients list them.
pub const LENSES: [LensEntry; 4] = [
    LensEntry::of::<Atmosphere>(),
    LensEntry::of::<Pulse>(),
    LensEntry::of::<Lattice>(),
    LensEntry::of::<Flow>(),
];


pub fn lens_names() -> impl Iterator<Item = &'static str> {
    LENSES.iter().map(|entry| entry.name)
}


/// Build a fresh instance of the named lens with its own smoothing state.
pub fn create_lens(name: &str, alpha: f64) -> Result<Box<dyn ActiveLens>, LensError> {
    let lens: Box<dyn ActiveLens> = if name == Atmosphere::NAME {
        Box::new(Lens::new(Atmosphere, alpha))
    } else if name == Pulse::NAME {
        Box::new(Lens::new(Pulse, alpha))
    } else if name == Lattice::NAME {
        Box::new(Lens::new(Lattice, alpha))
    } else if name == Flow::NAME {
        Box::new(Lens::new(Flow, alpha))
    } else {
        return Err(LensError::UnknownLens(name.to_string()));
    };
    Ok(lens)
}


/// `{"r", "g", "b"}` colour object used by every visualisation.
pub(crate) fn rgb(r: f64, g: f64, b: f64) -> Value {
    serde_json::json!({ "r": r as i64, "g": g as i64, "b": b as i64 })
}


/// Round for display; keeps visualisation payloads short.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
