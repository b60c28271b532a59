use serde::{Deserialize, Serialize};

use crate::lens::Params;
use crate::sources::DomainSource;


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    /// Degrees Celsius.
    pub temperature: f64,
    /// Metres per second.
    pub wind_speed: f64,
    /// Percent.
    pub humidity: f64,
    /// Hectopascals.
    pub pressure: f64,
    pub rain_probability: f64,
}


/// Weather as set on the lens's sliders, unless a live observation has been injected.
#[derive(Debug, Default)]
pub struct WeatherSource {
    live: Option<WeatherRecord>,
}


impl WeatherSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }
}


impl DomainSource for WeatherSource {
    type Record = WeatherRecord;

    fn tick(&mut self, _t: f64, params: &Params) -> WeatherRecord {
        if let Some(observation) = &self.live {
            return observation.clone();
        }
        WeatherRecord {
            temperature: params.get("temperature"),
            wind_speed: params.get("wind_speed"),
            humidity: params.get("humidity"),
            pressure: params.get("pressure"),
            rain_probability: params.get("rain"),
        }
    }

    fn supports_live_weather(&self) -> bool {
        true
    }

    fn set_live_weather(&mut self, observation: Option<WeatherRecord>) {
        self.live = observation;
    }
}
