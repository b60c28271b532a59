use std::fmt;

use serde::{Deserialize, Serialize};

use crate::music::notes::{self, Hz};


/// Pitch-class set selector shared by all backends.
///
/// Major/minor pairs share a key signature, so each variant names both.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Scale {
    #[serde(rename = "SCALE_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "C_MAJOR_A_MINOR")]
    CMajorAMinor,
    #[serde(rename = "D_MAJOR_B_MINOR")]
    DMajorBMinor,
    #[serde(rename = "A_FLAT_MAJOR_F_MINOR")]
    AFlatMajorFMinor,
    #[serde(rename = "G_FLAT_MAJOR_E_FLAT_MINOR")]
    GFlatMajorEFlatMinor,
}


impl Default for Scale {
    fn default() -> Self {
        Scale::Unspecified
    }
}


impl Scale {
    pub const ALL: [Scale; 5] = [
        Scale::Unspecified,
        Scale::CMajorAMinor,
        Scale::DMajorBMinor,
        Scale::AFlatMajorFMinor,
        Scale::GFlatMajorEFlatMinor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scale::Unspecified => "SCALE_UNSPECIFIED",
            Scale::CMajorAMinor => "C_MAJOR_A_MINOR",
            Scale::DMajorBMinor => "D_MAJOR_B_MINOR",
            Scale::AFlatMajorFMinor => "A_FLAT_MAJOR_F_MINOR",
            Scale::GFlatMajorEFlatMinor => "G_FLAT_MAJOR_E_FLAT_MINOR",
        }
    }

    /// Semitones above C that belong to the scale. `None` for an unspecified scale.
    pub fn pitch_classes(&self) -> Option<&'static [u8]> {
        match self {
            Scale::Unspecified => None,
            Scale::CMajorAMinor => Some(&[0, 2, 4, 5, 7, 9, 11]),
            // spelled as the two-sharp key: C♯ D E F♯ G A B
            Scale::DMajorBMinor => Some(&[1, 2, 4, 6, 7, 9, 11]),
            Scale::AFlatMajorFMinor => Some(&[0, 1, 3, 5, 7, 8, 10]),
            Scale::GFlatMajorEFlatMinor => Some(&[1, 3, 5, 6, 8, 10, 11]),
        }
    }

    /// Snap `hz` to the nearest pitch of this scale in 12-tone equal temperament.
    ///
    /// The frequency is first rounded to the nearest semitone, then moved by the smallest signed
    /// number of semitones (wrapping around the octave) that lands on a member pitch class. Ties
    /// resolve downward. Unspecified scales and non-positive inputs pass through.
    pub fn quantize(&self, hz: Hz) -> Hz {
        let classes = match self.pitch_classes() {
            Some(classes) if hz > 0.0 => classes,
            _ => return hz,
        };
        let midi = notes::hz_to_midi(hz).round() as i32;
        let class = notes::pitch_class(midi) as i32;

        let offset = classes
            .iter()
            .map(|&pc| {
                let mut delta = pc as i32 - class;
                if delta > 6 {
                    delta -= 12;
                } else if delta < -6 {
                    delta += 12;
                }
                delta
            })
            .min_by_key(|delta| (delta.abs(), *delta))
            .unwrap_or(0);

        notes::midi_to_hz((midi + offset) as f64)
    }
}


impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_quantized_pitch_classes_belong_to_scale() {
        for scale in Scale::ALL.iter().skip(1) {
            let classes = scale.pitch_classes().unwrap();
            for midi in 48..84 {
                let q = scale.quantize(notes::midi_to_hz(midi as f64 + 0.3));
                let pc = notes::pitch_class(notes::hz_to_midi(q).round() as i32);
                assert!(classes.contains(&pc), "{} -> pc {} not in {}", midi, pc, scale);
            }
        }
    }

    #[test]
    fn test_member_pitches_are_unchanged() {
        let a3 = notes::midi_to_hz(57.0);
        assert!((Scale::CMajorAMinor.quantize(a3) - a3).abs() < 1e-9);
    }

    #[test]
    fn test_moves_at_most_one_semitone() {
        for scale in Scale::ALL.iter().skip(1) {
            for midi in 40..90 {
                let q = scale.quantize(notes::midi_to_hz(midi as f64));
                assert!((notes::hz_to_midi(q) - midi as f64).abs() <= 1.0 + 1e-9);
            }
        }
    }

    #[test]
    fn test_unspecified_passes_through() {
        assert_eq!(Scale::Unspecified.quantize(123.4), 123.4);
        assert_eq!(Scale::CMajorAMinor.quantize(0.0), 0.0);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Scale::AFlatMajorFMinor).unwrap();
        assert_eq!(json, "\"A_FLAT_MAJOR_F_MINOR\"");
        let back: Scale = serde_json::from_str("\"SCALE_UNSPECIFIED\"").unwrap();
        assert_eq!(back, Scale::Unspecified);
    }
}
