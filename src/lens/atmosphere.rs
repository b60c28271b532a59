use serde_json::{json, Value};

use crate::control::WeightedPrompt;
use crate::lens::{rgb, round_to, LensModel, ParamSpec, Params, Targets};
use crate::sources::{WeatherRecord, WeatherSource};


/// Weather patterns become sound and light.
pub struct Atmosphere;


impl LensModel for Atmosphere {
    type Source = WeatherSource;

    const NAME: &'static str = "atmosphere";
    const DESCRIPTION: &'static str = "Weather patterns become sound and light";
    const TICK_HZ: f64 = 4.0;
    const PARAMETERS: &'static [ParamSpec] = &[
        ParamSpec {
            name: "wind_speed",
            label: "Wind Speed (m/s)",
            min: 0.0,
            max: 30.0,
            step: 0.5,
            default: 5.0,
            effects: &[
                "→ BPM: 70 + wind × 3.67 (faster wind = faster tempo)",
                "→ Prompts: adds 'sweeping synths' when > 15 m/s",
                "→ Prompts: adds 'distorted drone' when > 20 m/s and rain > 0.5",
            ],
        },
        ParamSpec {
            name: "temperature",
            label: "Temperature (C)",
            min: -10.0,
            max: 40.0,
            step: 1.0,
            default: 20.0,
            effects: &[
                "→ Brightness: (temp + 10) / 50 (cold = dim, hot = bright)",
                "→ Prompts: < 5°C 'ethereal, cold chords'; > 30°C 'warm acoustic guitar'",
            ],
        },
        ParamSpec {
            name: "humidity",
            label: "Humidity (%)",
            min: 0.0,
            max: 100.0,
            step: 1.0,
            default: 50.0,
            effects: &["→ Density: humidity / 100 (dry = sparse, humid = thick layers)"],
        },
        ParamSpec {
            name: "rain",
            label: "Rain Intensity",
            min: 0.0,
            max: 1.0,
            step: 0.05,
            default: 0.0,
            effects: &[
                "→ Guidance: 3.0 + rain × 2.0 (more rain = tighter control)",
                "→ Prompts: adds 'piano arpeggios' when > 0.3",
            ],
        },
        ParamSpec {
            name: "pressure",
            label: "Pressure (hPa)",
            min: 980.0,
            max: 1040.0,
            step: 1.0,
            default: 1013.0,
            effects: &["→ Visualization only (sky colour gradient)"],
        },
    ];

    fn source(&self) -> WeatherSource {
        WeatherSource::new()
    }

    fn targets(&self, weather: &WeatherRecord, _params: &Params) -> Targets {
        let wind = weather.wind_speed;
        let temp = weather.temperature;
        let rain = weather.rain_probability;

        let mut prompts = vec![if temp < 5.0 {
            WeightedPrompt::new("Ethereal Ambience, cold, sustained chords", 1.0)
        } else if temp > 30.0 {
            WeightedPrompt::new("Warm acoustic guitar, bright tones, upbeat", 1.0)
        } else {
            WeightedPrompt::new("Ambient, smooth pianos, dreamy", 1.0)
        }];
        if rain > 0.3 {
            prompts.push(WeightedPrompt::new("Piano arpeggios, rain, gentle", rain));
        }
        if wind > 15.0 {
            prompts.push(WeightedPrompt::new("Spacey synths, wind, sweeping", wind / 30.0));
        }
        if wind > 20.0 && rain > 0.5 {
            prompts.push(WeightedPrompt::new("Dirty synths, crunchy distortion, ominous drone", 0.8));
        }

        Targets {
            tempo: 70.0 + wind * 3.67,
            brightness: (temp + 10.0) / 50.0,
            density: weather.humidity / 100.0,
            guidance: 3.0 + rain * 2.0,
            prompts,
            ..Targets::default()
        }
    }

    fn visualize(&self, weather: &WeatherRecord, _params: &Params) -> Value {
        let wind = weather.wind_speed;
        let temp = weather.temperature;
        let rain = weather.rain_probability;

        let color = match temp {
            t if t < 0.0 => rgb(100.0, 150.0, 255.0),
            t if t < 15.0 => rgb(150.0, 200.0, 230.0),
            t if t < 25.0 => rgb(255.0, 220.0, 100.0),
            _ => rgb(255.0, 120.0, 50.0),
        };

        json!({
            "type": Self::NAME,
            "particle_velocity": wind / 30.0,
            "particle_count": (50.0 + weather.humidity * 2.0) as i64,
            "particle_size": 2.0 + rain * 4.0,
            "color": color,
            "wind_angle": (wind * 0.07) % 6.28,
            "rain_drops": rain > 0.4,
            "lightning": wind > 25.0 && rain > 0.6,
            "data": {
                "temperature": round_to(temp, 1),
                "wind_speed": round_to(wind, 1),
                "humidity": round_to(weather.humidity, 1),
                "pressure": round_to(weather.pressure, 1),
                "rain": round_to(rain, 2),
            },
        })
    }
}
