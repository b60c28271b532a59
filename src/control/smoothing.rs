//! Per-dimension exponential smoothing owned by a single lens instance.

use std::collections::HashMap;

use crate::control::ControlField;


pub const DEFAULT_ALPHA: f64 = 0.15;


/// Causal one-pole low-pass, `y = α·x + (1-α)·y_prev`, with independent state per dimension.
///
/// State for a dimension is created by its first write, which passes the raw value through
/// unfiltered. There is no other way to reset it: a fresh lens gets a fresh `Ema`.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    state: HashMap<ControlField, f64>,
}


impl Default for Ema {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}


impl Ema {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            state: HashMap::new(),
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn ema(&mut self, key: ControlField, raw: f64) -> f64 {
        let alpha = self.alpha;
        let y = self
            .state
            .entry(key)
            .and_modify(|prev| *prev = alpha * raw + (1.0 - alpha) * *prev)
            .or_insert(raw);
        *y
    }

    /// Last smoothed output for `key`, if it has ever been written.
    pub fn value(&self, key: ControlField) -> Option<f64> {
        self.state.get(&key).copied()
    }

    /// Number of ticks a held step needs before the output lands within `tolerance` (as a
    /// fraction of the step) of its target.
    pub fn settle_ticks(&self, tolerance: f64) -> usize {
        (tolerance.ln() / (1.0 - self.alpha).ln()).ceil() as usize
    }
}


#[cfg(test)]
mod test {
    use super::*;

    macro_rules! assert_delta {
        ($left:expr, $right:expr, $delta:expr) => {
            if ($left - $right).abs() >= $delta {
                panic!("assertion failed:\nleft:  {}\nright: {}\ndelta: {}", $left, $right, $delta);
            }
        };
    }

    #[test]
    fn test_first_value_passes_through() {
        let mut ema = Ema::default();
        assert_eq!(ema.ema(ControlField::Tempo, 100.0), 100.0);
    }

    #[test]
    fn test_second_value_is_filtered() {
        let mut ema = Ema::default();
        ema.ema(ControlField::Density, 0.0);
        assert_delta!(ema.ema(ControlField::Density, 1.0), 0.15, 1e-12);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut ema = Ema::default();
        ema.ema(ControlField::Density, 10.0);
        ema.ema(ControlField::Brightness, 20.0);
        assert_eq!(ema.value(ControlField::Density), Some(10.0));
        assert_eq!(ema.value(ControlField::Brightness), Some(20.0));
        assert_eq!(ema.value(ControlField::Guidance), None);
    }

    #[test]
    fn test_converges_monotonically_within_settle_ticks() {
        let mut ema = Ema::default();
        let target = 1.0;
        ema.ema(ControlField::Brightness, 0.0);

        let ticks = ema.settle_ticks(0.01);
        assert_eq!(ticks, 29);

        let mut prev = 0.0;
        let mut y = 0.0;
        for _ in 0..ticks {
            y = ema.ema(ControlField::Brightness, target);
            assert!(y >= prev && y <= target);
            prev = y;
        }
        assert!((target - y).abs() <= 0.01 * target);
    }

    #[test]
    fn test_converges_from_above() {
        let mut ema = Ema::new(0.5);
        ema.ema(ControlField::Tempo, 200.0);
        let mut prev = 200.0;
        for _ in 0..20 {
            let y = ema.ema(ControlField::Tempo, 72.0);
            assert!(y <= prev && y >= 72.0);
            prev = y;
        }
        assert_delta!(prev, 72.0, 0.01);
    }
}
