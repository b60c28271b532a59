use std::collections::VecDeque;
use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::lens::Params;
use crate::sources::DomainSource;


pub const ECG_HISTORY: usize = 300;
pub const RESTING_HR: f64 = 72.0;
/// SDNN at full variability, in milliseconds.
pub const MAX_SDNN_MS: f64 = 80.0;


#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardiacRecord {
    pub heart_rate: f64,
    pub hrv_sdnn_ms: f64,
    pub stress: f64,
    pub exercise_level: f64,
    pub ecg_value: f64,
    pub ecg_history: Vec<f64>,
    pub arrhythmia: bool,
}


/// Synthetic ECG driven by the heart-rate, variability and stress sliders.
pub struct CardiacSource {
    history: VecDeque<f64>,
    rng: StdRng,
}


impl CardiacSource {
    pub fn new() -> Self {
        CardiacSource {
            history: VecDeque::with_capacity(ECG_HISTORY),
            rng: StdRng::seed_from_u64(99),
        }
    }
}


impl Default for CardiacSource {
    fn default() -> Self {
        Self::new()
    }
}


/// One beat of a stylised PQRST complex. `phase` is the position within the R-R interval.
pub fn ecg_waveform(phase: f64) -> f64 {
    match phase {
        p if p > 0.10 && p < 0.20 => 0.15 * ((p - 0.10) / 0.10 * PI).sin(),
        p if p > 0.25 && p < 0.28 => -0.1 * ((p - 0.25) / 0.03),
        p if p > 0.28 && p < 0.30 => -0.1 + 1.2 * ((p - 0.28) / 0.02),
        p if p > 0.30 && p < 0.35 => 1.1 - 1.3 * ((p - 0.30) / 0.05),
        p if p > 0.45 && p < 0.60 => 0.25 * ((p - 0.45) / 0.15 * PI).sin(),
        _ => 0.0,
    }
}


impl DomainSource for CardiacSource {
    type Record = CardiacRecord;

    fn tick(&mut self, t: f64, params: &Params) -> CardiacRecord {
        let heart_rate = params.get("heart_rate");
        let stress = params.get("stress");

        let rr_interval = 60.0 / heart_rate.max(1.0);
        let ecg_value = ecg_waveform(t.rem_euclid(rr_interval) / rr_interval);
        if self.history.len() == ECG_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(ecg_value);

        let arrhythmia = self.rng.gen::<f64>() < params.get("arrhythmia_chance");

        CardiacRecord {
            heart_rate,
            hrv_sdnn_ms: params.get("hrv") * MAX_SDNN_MS,
            stress,
            exercise_level: ((heart_rate - RESTING_HR) / 128.0).max(0.0),
            ecg_value,
            ecg_history: self.history.iter().copied().collect(),
            arrhythmia,
        }
    }
}
