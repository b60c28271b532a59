use serde_json::{json, Value};

use crate::control::{Scale, WeightedPrompt};
use crate::lens::{rgb, round_to, LensModel, ParamSpec, Params, Targets};
use crate::sources::lattice::LatticeDetail;
use crate::sources::{LatticeMode, LatticeRecord, LatticeSource};


/// Mathematics made audible.
pub struct Lattice;


fn flavour(mode: LatticeMode) -> WeightedPrompt {
    match mode {
        LatticeMode::Lorenz => WeightedPrompt::new("Spacey synths, atmospheric", 0.4),
        LatticeMode::Logistic => WeightedPrompt::new("Minimal techno, precise, electronic", 0.4),
        LatticeMode::Sine => WeightedPrompt::new("Ambient, dreamy, sine tones", 0.4),
    }
}


impl LensModel for Lattice {
    type Source = LatticeSource;

    const NAME: &'static str = "lattice";
    const DESCRIPTION: &'static str = "Mathematics made audible";
    const TICK_HZ: f64 = 8.0;
    const PARAMETERS: &'static [ParamSpec] = &[
        ParamSpec {
            name: "chaos",
            label: "Chaos (rho)",
            min: 0.0,
            max: 1.0,
            step: 0.02,
            default: 0.7,
            effects: &[
                "→ BPM: 80 + chaos × 80 (ordered = 80, chaotic = 160)",
                "→ Density: direct mapping (periodic = sparse, chaotic = dense)",
                "→ Scale: < 0.3 C Major; 0.3 to 0.6 D Major; > 0.6 Gb Major",
                "→ Temperature: 0.8 + chaos (more chaos = more randomness)",
                "→ Prompts: low = 'piano, classical'; mid = 'jazz fusion'; high = 'glitchy, experimental'",
            ],
        },
        ParamSpec {
            name: "sigma",
            label: "Sigma",
            min: 1.0,
            max: 30.0,
            step: 0.5,
            default: 10.0,
            effects: &["→ Attractor shape (affects chaos level indirectly)"],
        },
        ParamSpec {
            name: "beta",
            label: "Beta",
            min: 0.5,
            max: 8.0,
            step: 0.1,
            default: 2.67,
            effects: &["→ Attractor shape (affects chaos level indirectly)"],
        },
        ParamSpec {
            name: "speed",
            label: "Speed",
            min: 0.1,
            max: 3.0,
            step: 0.1,
            default: 1.0,
            effects: &["→ Visualization speed (attractor traversal rate)"],
        },
        ParamSpec {
            name: "mode",
            label: "Mode (0=Lorenz, 0.5=Logistic, 1=Sine)",
            min: 0.0,
            max: 1.0,
            step: 0.5,
            default: 0.0,
            effects: &[
                "→ Generator: 0 = Lorenz attractor, 0.5 = logistic map, 1 = sine superposition",
                "→ Prompts: adds a mode-specific flavour (atmospheric / techno / ambient)",
            ],
        },
    ];

    fn source(&self) -> LatticeSource {
        LatticeSource::new()
    }

    fn targets(&self, lattice: &LatticeRecord, _params: &Params) -> Targets {
        let chaos = lattice.chaos_level;

        let (scale, mut prompts) = if chaos < 0.3 {
            (
                Scale::CMajorAMinor,
                vec![
                    WeightedPrompt::new("Piano, melodic, classical, ordered", 1.0),
                    WeightedPrompt::new("Sustained chords, harmonic", 0.5),
                ],
            )
        } else if chaos < 0.6 {
            (
                Scale::DMajorBMinor,
                vec![
                    WeightedPrompt::new("Jazz fusion, complex, experimental", 1.0),
                    WeightedPrompt::new("Rhodes piano, synth pads", 0.6),
                ],
            )
        } else {
            (
                Scale::GFlatMajorEFlatMinor,
                vec![
                    WeightedPrompt::new("Glitchy effects, experimental, weird noises", 1.0),
                    WeightedPrompt::new("Psychedelic, echo, distortion", 0.7),
                ],
            )
        };
        prompts.push(flavour(lattice.mode));

        Targets {
            tempo: 80.0 + chaos * 80.0,
            density: chaos,
            brightness: lattice.amplitude,
            guidance: 3.0 + chaos * 2.0,
            temperature: 0.8 + chaos,
            scale,
            prompts,
            ..Targets::default()
        }
    }

    fn visualize(&self, lattice: &LatticeRecord, params: &Params) -> Value {
        let chaos = lattice.chaos_level;
        let mut viz = json!({
            "type": Self::NAME,
            "mode": lattice.mode,
            "chaos_level": chaos,
            "amplitude": lattice.amplitude,
            "color": rgb(80.0 + chaos * 175.0, 120.0 - chaos * 80.0, 255.0 - chaos * 155.0),
            "glow_intensity": 0.3 + chaos * 0.7,
        });

        let extra = match &lattice.detail {
            LatticeDetail::Lorenz { x, y, z, trail } => json!({
                "trail": trail,
                "current": { "x": x, "y": y },
                "data": {
                    "x": round_to(*x, 2),
                    "y": round_to(*y, 2),
                    "z": round_to(*z, 2),
                    "chaos": round_to(chaos, 2),
                    "sigma": params.get("sigma"),
                    "beta": round_to(params.get("beta"), 2),
                    "rho": round_to(10.0 + 35.0 * params.get("chaos"), 1),
                },
            }),
            LatticeDetail::Logistic { x, r, iterations } => json!({
                "iterations": iterations,
                "r": r,
                "data": { "x": round_to(*x, 4), "r": round_to(*r, 3), "chaos": round_to(chaos, 2) },
            }),
            LatticeDetail::Sine { value, n_waves, components } => json!({
                "components": components,
                "value": value,
                "data": { "value": round_to(*value, 3), "n_waves": n_waves, "chaos": round_to(chaos, 2) },
            }),
        };
        if let (Some(base), Value::Object(extra)) = (viz.as_object_mut(), extra) {
            base.extend(extra);
        }
        viz
    }
}
