pub type Hz = f64;


/// Reference pitch for equal temperament: A4.
pub const FIXED_HZ: Hz = 440.0;
pub const FIXED_MIDI: i32 = 69;


/// Fractional MIDI note number of `hz`: `69 + 12·log2(hz / 440)`.
pub fn hz_to_midi(hz: Hz) -> f64 {
    FIXED_MIDI as f64 + 12.0 * (hz / FIXED_HZ).log2()
}


pub fn midi_to_hz(midi: f64) -> Hz {
    FIXED_HZ * 2f64.powf((midi - FIXED_MIDI as f64) / 12.0)
}


/// Semitones above C, in `0..12`.
pub fn pitch_class(midi: i32) -> u8 {
    midi.rem_euclid(12) as u8
}
