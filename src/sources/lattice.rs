use std::collections::{BTreeSet, VecDeque};

use serde::Serialize;

use crate::lens::Params;
use crate::sources::DomainSource;


const TRAIL_LEN: usize = 500;
/// Trail points handed to the visualisation per tick.
const TRAIL_SHOWN: usize = 100;
const LOGISTIC_ITERATIONS: usize = 50;


/// Euler-integrated Lorenz system that remembers its recent trajectory.
#[derive(Debug, Clone)]
pub struct LorenzAttractor {
    pub sigma: f64,
    pub rho: f64,
    pub beta: f64,
    pub dt: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    trail: VecDeque<[f64; 3]>,
}


impl Default for LorenzAttractor {
    fn default() -> Self {
        LorenzAttractor {
            sigma: 10.0,
            rho: 28.0,
            beta: 8.0 / 3.0,
            dt: 0.005,
            x: 1.0,
            y: 1.0,
            z: 1.0,
            trail: VecDeque::with_capacity(TRAIL_LEN),
        }
    }
}


impl LorenzAttractor {
    pub fn step(&mut self) -> [f64; 3] {
        let dx = self.sigma * (self.y - self.x);
        let dy = self.x * (self.rho - self.z) - self.y;
        let dz = self.x * self.y - self.beta * self.z;
        self.x += dx * self.dt;
        self.y += dy * self.dt;
        self.z += dz * self.dt;

        if self.trail.len() == TRAIL_LEN {
            self.trail.pop_front();
        }
        let point = [self.x, self.y, self.z];
        self.trail.push_back(point);
        point
    }

    pub fn trail(&self) -> impl Iterator<Item = &[f64; 3]> {
        self.trail.iter()
    }

    /// 0..1 estimate of how erratic the last few steps were: the variance of step lengths.
    pub fn chaos_metric(&self) -> f64 {
        if self.trail.len() < 10 {
            return 0.5;
        }
        let recent: Vec<&[f64; 3]> = self.trail.iter().skip(self.trail.len() - 10).collect();
        let steps: Vec<f64> = recent
            .windows(2)
            .map(|w| {
                let (a, b) = (w[0], w[1]);
                ((b[0] - a[0]).powi(2) + (b[1] - a[1]).powi(2) + (b[2] - a[2]).powi(2)).sqrt()
            })
            .collect();
        let mean = steps.iter().sum::<f64>() / steps.len() as f64;
        let variance = steps.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / steps.len() as f64;
        (variance / 5.0).min(1.0)
    }
}


#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LatticeMode {
    Lorenz,
    Logistic,
    Sine,
}


impl LatticeMode {
    /// The mode slider is continuous; snap it to the nearest of 0, 0.5 and 1.
    pub fn from_param(value: f64) -> Self {
        if value < 0.25 {
            LatticeMode::Lorenz
        } else if value < 0.75 {
            LatticeMode::Logistic
        } else {
            LatticeMode::Sine
        }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SineComponent {
    pub freq: f64,
    pub amp: f64,
}


/// Mode-specific part of a lattice record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LatticeDetail {
    Lorenz { x: f64, y: f64, z: f64, trail: Vec<[f64; 3]> },
    Logistic { x: f64, r: f64, iterations: Vec<f64> },
    Sine { value: f64, n_waves: usize, components: Vec<SineComponent> },
}


#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatticeRecord {
    pub mode: LatticeMode,
    pub amplitude: f64,
    pub chaos_level: f64,
    pub detail: LatticeDetail,
}


/// Three chaotic (or not) systems behind one slider set.
#[derive(Debug, Clone)]
pub struct LatticeSource {
    lorenz: LorenzAttractor,
    logistic_x: f64,
}


impl Default for LatticeSource {
    fn default() -> Self {
        LatticeSource {
            lorenz: LorenzAttractor::default(),
            logistic_x: 0.5,
        }
    }
}


impl LatticeSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lorenz(&mut self, params: &Params) -> LatticeRecord {
        let chaos = params.get("chaos");
        self.lorenz.sigma = params.get("sigma");
        self.lorenz.beta = params.get("beta");
        self.lorenz.rho = 10.0 + 35.0 * chaos;

        let steps = ((10.0 * params.get("speed")) as usize).max(1);
        let mut point = [self.lorenz.x, self.lorenz.y, self.lorenz.z];
        for _ in 0..steps {
            point = self.lorenz.step();
        }
        let [x, y, z] = point;
        let trail_len = self.lorenz.trail.len();
        let trail = self
            .lorenz
            .trail()
            .skip(trail_len.saturating_sub(TRAIL_SHOWN))
            .copied()
            .collect();

        LatticeRecord {
            mode: LatticeMode::Lorenz,
            amplitude: ((x * x + y * y + z * z).sqrt() / 50.0).min(1.0),
            chaos_level: self.lorenz.chaos_metric(),
            detail: LatticeDetail::Lorenz { x, y, z, trail },
        }
    }

    /// `x ← r·x·(1 − x)` with r swept from the stable 2.5 to the fully chaotic 4.0.
    fn logistic(&mut self, params: &Params) -> LatticeRecord {
        let r = 2.5 + 1.5 * params.get("chaos");
        let mut x = self.logistic_x;
        let iterations: Vec<f64> = (0..LOGISTIC_ITERATIONS)
            .map(|_| {
                x = r * x * (1.0 - x);
                x
            })
            .collect();
        self.logistic_x = x;

        // Periodic orbits revisit the same few values; chaotic ones rarely do.
        let recent = &iterations[iterations.len() - 20..];
        let distinct: BTreeSet<i64> = recent.iter().map(|v| (v * 100.0).round() as i64).collect();

        LatticeRecord {
            mode: LatticeMode::Logistic,
            amplitude: x,
            chaos_level: distinct.len() as f64 / recent.len() as f64,
            detail: LatticeDetail::Logistic { x, r, iterations },
        }
    }

    fn sine(&mut self, t: f64, params: &Params) -> LatticeRecord {
        let chaos = params.get("chaos");
        let t = t * params.get("speed");
        let n_waves = 3 + (chaos * 5.0) as usize;

        let components: Vec<SineComponent> = (0..n_waves)
            .map(|i| {
                let i = i as f64;
                SineComponent {
                    freq: 0.5 + 0.7 * i + 0.3 * chaos * i,
                    amp: 1.0 / (i + 1.0),
                }
            })
            .collect();
        let value: f64 = components.iter().map(|c| c.amp * (t * c.freq).sin()).sum();
        let max_amp: f64 = components.iter().map(|c| c.amp).sum();

        LatticeRecord {
            mode: LatticeMode::Sine,
            amplitude: (value / max_amp + 1.0) / 2.0,
            chaos_level: (chaos * 0.8).min(1.0),
            detail: LatticeDetail::Sine { value, n_waves, components },
        }
    }
}


impl DomainSource for LatticeSource {
    type Record = LatticeRecord;

    fn tick(&mut self, t: f64, params: &Params) -> LatticeRecord {
        match LatticeMode::from_param(params.get("mode")) {
            LatticeMode::Lorenz => self.lorenz(params),
            LatticeMode::Logistic => self.logistic(params),
            LatticeMode::Sine => self.sine(t, params),
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::lens::lattice::Lattice;
    use crate::lens::LensModel;

    macro_rules! assert_delta {
        ($left:expr, $right:expr, $delta:expr) => {
            if ($left - $right).abs() >= $delta {
                panic!("assertion failed:\nleft:  {}\nright: {}\ndelta: {}", $left, $right, $delta);
            }
        };
    }

    fn params(mode: f64, chaos: f64) -> Params {
        let mut params = Params::defaults(Lattice::PARAMETERS);
        params.set("mode", mode).unwrap();
        params.set("chaos", chaos).unwrap();
        params
    }

    #[test]
    fn test_mode_from_param() {
        assert_eq!(LatticeMode::from_param(0.0), LatticeMode::Lorenz);
        assert_eq!(LatticeMode::from_param(0.5), LatticeMode::Logistic);
        assert_eq!(LatticeMode::from_param(1.0), LatticeMode::Sine);
    }

    #[test]
    fn test_lorenz_first_step() {
        let mut lorenz = LorenzAttractor::default();
        let [x, y, z] = lorenz.step();
        assert_delta!(x, 1.0, 1e-12);
        assert_delta!(y, 1.0 + 0.005 * 26.0, 1e-12);
        assert_delta!(z, 1.0 + 0.005 * (1.0 - 8.0 / 3.0), 1e-12);
        assert_eq!(lorenz.chaos_metric(), 0.5);
    }

    #[test]
    fn test_lorenz_trail_is_bounded() {
        let mut source = LatticeSource::new();
        let params = params(0.0, 0.7);
        let mut record = source.tick(0.0, &params);
        for i in 1..80 {
            record = source.tick(i as f64 / 8.0, &params);
        }
        assert_eq!(source.lorenz.trail().count(), TRAIL_LEN);
        match record.detail {
            LatticeDetail::Lorenz { trail, .. } => assert_eq!(trail.len(), TRAIL_SHOWN),
            other => panic!("unexpected detail {:?}", other),
        }
        assert!(record.amplitude >= 0.0 && record.amplitude <= 1.0);
        assert!(record.chaos_level >= 0.0 && record.chaos_level <= 1.0);
    }

    #[test]
    fn test_logistic_order_and_chaos() {
        // r = 2.5 settles onto a fixed point at 1 - 1/r.
        let mut source = LatticeSource::new();
        let ordered = source.tick(0.0, &params(0.5, 0.0));
        assert_delta!(ordered.amplitude, 0.6, 1e-3);
        assert_delta!(ordered.chaos_level, 0.05, 1e-9);

        let mut source = LatticeSource::new();
        let chaotic = source.tick(0.0, &params(0.5, 0.8));
        assert!(chaotic.chaos_level > ordered.chaos_level);
    }

    #[test]
    fn test_sine_superposition() {
        let mut source = LatticeSource::new();
        let record = source.tick(0.0, &params(1.0, 0.0));
        assert_eq!(record.amplitude, 0.5);
        assert_eq!(record.chaos_level, 0.0);
        match record.detail {
            LatticeDetail::Sine { n_waves, components, .. } => {
                assert_eq!(n_waves, 3);
                assert_delta!(components[2].freq, 1.9, 1e-9);
                assert_delta!(components[2].amp, 1.0 / 3.0, 1e-9);
            }
            other => panic!("unexpected detail {:?}", other),
        }

        let record = source.tick(2.0, &params(1.0, 1.0));
        assert_delta!(record.chaos_level, 0.8, 1e-9);
        assert!(record.amplitude >= 0.0 && record.amplitude <= 1.0);
    }
}
