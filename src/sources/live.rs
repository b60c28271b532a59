//! Observed weather, published by an external feed over ZeroMQ.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::sources::WeatherRecord;


pub const CACHE_TTL: Duration = Duration::from_secs(300);
/// Millimetres of rain that count as certain rain.
const RAIN_SATURATION_MM: f64 = 10.0;


pub trait WeatherFeed: Send {
    /// Most recent observation without blocking. Stale data beats no data.
    fn latest(&mut self) -> Option<WeatherRecord>;
}


fn default_temperature() -> f64 {
    20.0
}

fn default_wind_speed() -> f64 {
    10.0
}

fn default_humidity() -> f64 {
    50.0
}

fn default_pressure() -> f64 {
    1013.0
}


/// One message from the feed. Missing readings take mild defaults.
#[derive(Debug, Deserialize)]
struct Observation {
    #[serde(default = "default_temperature")]
    temperature: f64,
    #[serde(default = "default_wind_speed")]
    wind_speed: f64,
    #[serde(default = "default_humidity")]
    humidity: f64,
    #[serde(default = "default_pressure")]
    pressure: f64,
    /// Millimetres.
    #[serde(default)]
    rain: f64,
}


impl From<Observation> for WeatherRecord {
    fn from(obs: Observation) -> Self {
        WeatherRecord {
            temperature: obs.temperature,
            wind_speed: obs.wind_speed,
            humidity: obs.humidity,
            pressure: obs.pressure,
            rain_probability: (obs.rain / RAIN_SATURATION_MM).clamp(0.0, 1.0),
        }
    }
}


pub fn parse_observation(bytes: &[u8]) -> Result<WeatherRecord, serde_json::Error> {
    serde_json::from_slice::<Observation>(bytes).map(WeatherRecord::from)
}


/// Holds the last good observation for `ttl` before asking for a new one.
#[derive(Debug)]
pub struct WeatherCache {
    ttl: Duration,
    entry: Option<(WeatherRecord, Instant)>,
}


impl WeatherCache {
    pub fn new(ttl: Duration) -> Self {
        WeatherCache { ttl, entry: None }
    }

    /// Cached value while fresh, otherwise whatever `fetch` returns. A failed fetch keeps
    /// serving the old value.
    pub fn get<F>(&mut self, now: Instant, fetch: F) -> Option<WeatherRecord>
    where
        F: FnOnce() -> Option<WeatherRecord>,
    {
        if let Some((record, at)) = &self.entry {
            if now.saturating_duration_since(*at) < self.ttl {
                return Some(record.clone());
            }
        }
        match fetch() {
            Some(record) => {
                self.entry = Some((record.clone(), now));
                Some(record)
            }
            None => self.entry.as_ref().map(|(record, _)| record.clone()),
        }
    }
}


pub struct ZmqWeatherFeed {
    socket: zmq::Socket,
    cache: WeatherCache,
}


impl ZmqWeatherFeed {
    pub fn new(context: &zmq::Context, endpoint: &str) -> Result<Self, BridgeError> {
        let socket = context.socket(zmq::SUB)?;
        socket.set_subscribe(b"")?;
        socket.set_rcvhwm(16)?;
        socket.connect(endpoint)?;
        debug!(endpoint, "subscribed to weather feed");
        Ok(ZmqWeatherFeed {
            socket,
            cache: WeatherCache::new(CACHE_TTL),
        })
    }
}


/// Drain everything waiting on the socket and keep the newest parseable observation.
fn drain(socket: &zmq::Socket) -> Option<WeatherRecord> {
    let mut newest = None;
    loop {
        match socket.recv_bytes(zmq::DONTWAIT) {
            Ok(bytes) => match parse_observation(&bytes) {
                Ok(record) => newest = Some(record),
                Err(err) => debug!(error = %err, "ignoring malformed weather observation"),
            },
            Err(zmq::Error::EAGAIN) => break,
            Err(err) => {
                warn!(error = %err, "weather feed read failed");
                break;
            }
        }
    }
    newest
}


impl WeatherFeed for ZmqWeatherFeed {
    fn latest(&mut self) -> Option<WeatherRecord> {
        let socket = &self.socket;
        self.cache.get(Instant::now(), || drain(socket))
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn record(temperature: f64) -> WeatherRecord {
        WeatherRecord {
            temperature,
            wind_speed: 4.0,
            humidity: 60.0,
            pressure: 1010.0,
            rain_probability: 0.0,
        }
    }

    #[test]
    fn test_parse_observation() {
        let parsed = parse_observation(br#"{"temperature": 3.5, "rain": 4.0}"#).unwrap();
        assert_eq!(parsed.temperature, 3.5);
        assert_eq!(parsed.wind_speed, 10.0);
        assert_eq!(parsed.pressure, 1013.0);
        assert_eq!(parsed.rain_probability, 0.4);

        let soaked = parse_observation(br#"{"rain": 25.0}"#).unwrap();
        assert_eq!(soaked.rain_probability, 1.0);

        assert!(parse_observation(b"not json").is_err());
    }

    #[test]
    fn test_cache_serves_fresh_value_without_fetching() {
        let start = Instant::now();
        let mut cache = WeatherCache::new(Duration::from_secs(300));
        assert_eq!(cache.get(start, || Some(record(10.0))), Some(record(10.0)));

        let later = start + Duration::from_secs(60);
        assert_eq!(cache.get(later, || panic!("fetched while fresh")), Some(record(10.0)));
    }

    #[test]
    fn test_cache_refreshes_and_survives_failure() {
        let start = Instant::now();
        let mut cache = WeatherCache::new(Duration::from_secs(300));
        assert_eq!(cache.get(start, || None), None);
        cache.get(start, || Some(record(10.0)));

        let expired = start + Duration::from_secs(301);
        assert_eq!(cache.get(expired, || None), Some(record(10.0)));
        assert_eq!(cache.get(expired, || Some(record(12.0))), Some(record(12.0)));
    }
}
