use serde_json::{json, Value};

use crate::control::WeightedPrompt;
use crate::lens::{rgb, round_to, LensModel, ParamSpec, Params, Targets};
use crate::sources::network::SATURATION_RATE;
use crate::sources::{NetworkRecord, NetworkSource};


const BURST_TEMPO_BOOST: f64 = 50.0;
const MAX_LATENCY_MS: f64 = 200.0;


/// Network traffic as rhythm and light.
pub struct Flow;


impl LensModel for Flow {
    type Source = NetworkSource;

    const NAME: &'static str = "flow";
    const DESCRIPTION: &'static str = "Network traffic as rhythm and light";
    const TICK_HZ: f64 = 5.0;
    const PARAMETERS: &'static [ParamSpec] = &[
        ParamSpec {
            name: "packet_rate",
            label: "Packet Rate (/s)",
            min: 1.0,
            max: 200.0,
            step: 1.0,
            default: 30.0,
            effects: &[
                "→ Density: rate / 200 (idle = thin, saturated = dense)",
                "→ BPM: 80 + load × 40 (higher load = faster tempo)",
            ],
        },
        ParamSpec {
            name: "latency",
            label: "Latency (ms)",
            min: 1.0,
            max: 200.0,
            step: 1.0,
            default: 50.0,
            effects: &["→ Brightness: 1.0 − latency / 200 (low latency = bright, high = dark)"],
        },
        ParamSpec {
            name: "burst",
            label: "Burst Active",
            min: 0.0,
            max: 1.0,
            step: 1.0,
            default: 0.0,
            effects: &[
                "→ BPM: adds +50 during a burst (sudden tempo spike)",
                "→ Prompts: adds 'huge drop, intense, crunchy distortion'",
            ],
        },
        ParamSpec {
            name: "error_rate",
            label: "Error Rate",
            min: 0.0,
            max: 0.2,
            step: 0.01,
            default: 0.01,
            effects: &["→ Prompts: adds 'glitchy effects, metallic twang' when > 0.05"],
        },
        ParamSpec {
            name: "num_nodes",
            label: "Node Count",
            min: 3.0,
            max: 16.0,
            step: 1.0,
            default: 8.0,
            effects: &["→ Visualization only (number of nodes in the network graph)"],
        },
    ];

    fn source(&self) -> NetworkSource {
        NetworkSource::new()
    }

    fn targets(&self, traffic: &NetworkRecord, _params: &Params) -> Targets {
        let load = traffic.load_level;

        let mut prompts = if load < 0.3 {
            vec![WeightedPrompt::new("Ambient, minimal, spacey synths", 1.0)]
        } else if load < 0.7 {
            vec![
                WeightedPrompt::new("Chiptune, electronic, steady", 1.0),
                WeightedPrompt::new("Synth pads, digital", 0.5),
            ]
        } else {
            vec![
                WeightedPrompt::new("Drum & Bass, intense, fast", 1.0),
                WeightedPrompt::new("808 Hip Hop Beat, heavy", 0.6),
            ]
        };
        if traffic.is_burst {
            prompts.push(WeightedPrompt::new("Huge drop, intense, crunchy distortion", 0.8));
        }
        if traffic.error_rate > 0.05 {
            prompts.push(WeightedPrompt::new("Glitchy effects, metallic twang", traffic.error_rate * 5.0));
        }

        let boost = if traffic.is_burst { BURST_TEMPO_BOOST } else { 0.0 };
        Targets {
            tempo: 80.0 + load * 40.0 + boost,
            density: traffic.packet_rate / SATURATION_RATE,
            brightness: 1.0 - traffic.latency_ms / MAX_LATENCY_MS,
            guidance: 3.5 + load * 1.5,
            temperature: 1.0 + load * 0.5,
            prompts,
            ..Targets::default()
        }
    }

    fn visualize(&self, traffic: &NetworkRecord, _params: &Params) -> Value {
        let load = traffic.load_level;
        let color = if traffic.is_burst {
            rgb(255.0, 60.0, 60.0)
        } else if load > 0.6 {
            rgb(255.0, 200.0, 50.0)
        } else {
            rgb(50.0, 200.0, 200.0)
        };

        json!({
            "type": Self::NAME,
            "nodes": traffic.nodes,
            "node_activity": traffic.node_activity,
            "active_edges": traffic.active_edges,
            "is_burst": traffic.is_burst,
            "pulse_intensity": (traffic.packet_count as f64 / 50.0).min(1.0),
            "color": color,
            "node_glow": 0.3 + load * 0.7,
            "data": {
                "packet_rate": round_to(traffic.packet_rate, 1),
                "latency_ms": round_to(traffic.latency_ms, 1),
                "errors": traffic.errors,
                "throughput": round_to(traffic.throughput_mbps, 3),
                "load": round_to(load, 2),
            },
        })
    }
}
