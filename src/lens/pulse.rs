use serde_json::{json, Value};

use crate::control::{Scale, WeightedPrompt};
use crate::lens::{rgb, round_to, LensModel, ParamSpec, Params, Targets};
use crate::sources::cardiac::MAX_SDNN_MS;
use crate::sources::{CardiacRecord, CardiacSource};


/// ECG samples shown in the scrolling trace.
const TRACE_LEN: usize = 200;


/// Your heartbeat becomes a symphony.
pub struct Pulse;


impl LensModel for Pulse {
    type Source = CardiacSource;

    const NAME: &'static str = "pulse";
    const DESCRIPTION: &'static str = "Your heartbeat becomes a symphony";
    const TICK_HZ: f64 = 10.0;
    const PARAMETERS: &'static [ParamSpec] = &[
        ParamSpec {
            name: "heart_rate",
            label: "Heart Rate (bpm)",
            min: 40.0,
            max: 200.0,
            step: 1.0,
            default: 72.0,
            effects: &["→ BPM: 1:1 mapping, the music beats with the heart"],
        },
        ParamSpec {
            name: "hrv",
            label: "HRV (variability)",
            min: 0.0,
            max: 1.0,
            step: 0.05,
            default: 0.5,
            effects: &["→ Density: SDNN / 80 ms (high variability = richer texture)"],
        },
        ParamSpec {
            name: "stress",
            label: "Stress Level",
            min: 0.0,
            max: 1.0,
            step: 0.05,
            default: 0.2,
            effects: &[
                "→ Brightness: 0.3 + stress × 0.6 (higher stress = brighter)",
                "→ Scale: < 0.5 C Major (calm); > 0.5 Ab Major / F minor (tense)",
                "→ Prompts: low = 'meditation ambient'; high = 'tense, ominous drone'",
            ],
        },
        ParamSpec {
            name: "arrhythmia_chance",
            label: "Arrhythmia Chance",
            min: 0.0,
            max: 0.2,
            step: 0.01,
            default: 0.0,
            effects: &["→ Prompts: adds 'glitchy effects, weird noises' on arrhythmia events"],
        },
    ];

    fn source(&self) -> CardiacSource {
        CardiacSource::new()
    }

    fn targets(&self, heart: &CardiacRecord, _params: &Params) -> Targets {
        let hr = heart.heart_rate;
        let stress = heart.stress;

        let mut prompts = if hr < 80.0 && stress < 0.3 {
            vec![WeightedPrompt::new("Meditation, chill, ambient, smooth pianos", 1.0)]
        } else if hr > 140.0 {
            vec![
                WeightedPrompt::new("EDM, upbeat, danceable, fat beats", 1.0),
                WeightedPrompt::new("Tight groove, energy", 0.6),
            ]
        } else if stress > 0.6 {
            vec![
                WeightedPrompt::new("Tense, ominous drone, unsettling", 1.0),
                WeightedPrompt::new("Drum & Bass, dark", 0.4),
            ]
        } else {
            vec![WeightedPrompt::new("Lo-fi hip hop, chill, warm", 1.0)]
        };
        if heart.arrhythmia {
            prompts.push(WeightedPrompt::new("Glitchy effects, weird noises", 0.7));
        }

        Targets {
            tempo: hr,
            density: heart.hrv_sdnn_ms / MAX_SDNN_MS,
            brightness: 0.3 + stress * 0.6,
            guidance: 3.5 + stress * 1.5,
            scale: if stress > 0.5 {
                Scale::AFlatMajorFMinor
            } else {
                Scale::CMajorAMinor
            },
            prompts,
            ..Targets::default()
        }
    }

    fn visualize(&self, heart: &CardiacRecord, _params: &Params) -> Value {
        let hr = heart.heart_rate;
        let ecg = heart.ecg_value;

        let color = if hr < 100.0 {
            rgb(80.0, 220.0, 120.0)
        } else if hr < 140.0 {
            rgb(255.0, 200.0, 50.0)
        } else {
            rgb(255.0, 80.0, 80.0)
        };
        let trace_start = heart.ecg_history.len().saturating_sub(TRACE_LEN);

        json!({
            "type": Self::NAME,
            "ecg_history": &heart.ecg_history[trace_start..],
            "ecg_current": ecg,
            "pulse_size": if ecg > 0.3 { 0.5 + ecg * 0.5 } else { 0.5 },
            "color": color,
            "arrhythmia": heart.arrhythmia,
            "data": {
                "heart_rate": round_to(hr, 1),
                "hrv_sdnn_ms": round_to(heart.hrv_sdnn_ms, 1),
                "stress": round_to(heart.stress, 2),
            },
        })
    }
}
