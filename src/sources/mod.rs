//! Domain sources: seeded simulators that produce one raw record per lens tick.

pub mod cardiac;
pub mod lattice;
pub mod live;
pub mod network;
pub mod weather;

use crate::lens::Params;

pub use cardiac::{CardiacRecord, CardiacSource};
pub use lattice::{LatticeMode, LatticeRecord, LatticeSource, LorenzAttractor};
pub use live::{WeatherCache, WeatherFeed, ZmqWeatherFeed};
pub use network::{NetworkRecord, NetworkSource};
pub use weather::{WeatherRecord, WeatherSource};


pub trait DomainSource: Send {
    type Record: Send;

    /// Advance one step. `t` is seconds since the session started; `params` are the owning
    /// lens's current user parameters.
    fn tick(&mut self, t: f64, params: &Params) -> Self::Record;

    fn supports_live_weather(&self) -> bool {
        false
    }

    /// Replace simulated readings with an observation, or go back to simulation with `None`.
    fn set_live_weather(&mut self, _observation: Option<WeatherRecord>) {}
}
