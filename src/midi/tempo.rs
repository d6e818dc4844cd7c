use super::events::{MIDIEvent, TempoEvent};

/// Fallback when a file carries no usable tempo information.
pub const DEFAULT_BPM: f64 = 120.0;

/// How the tempo text field is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempoMode {
    Bpm,
    Percentage,
}

impl Default for TempoMode {
    fn default() -> Self {
        TempoMode::Bpm
    }
}

impl TempoMode {
    pub fn label(&self) -> &'static str {
        match self {
            TempoMode::Bpm => "BPM",
            TempoMode::Percentage => "Percentage",
        }
    }
}

/// Duration-weighted average BPM over the file's tempo changes.
///
/// Each tempo is weighted by the seconds it stays in effect, from its own
/// timestamp to the next change (the last one runs to the end of the file).
pub fn estimate_bpm(tempo_events: &[TempoEvent], duration: f64) -> f64 {
    if tempo_events.is_empty() {
        log::info!("no tempo events, estimated BPM (default): {DEFAULT_BPM:.2}");
        return DEFAULT_BPM;
    }

    let mut weighted_sum = 0.0;
    let mut total_secs = 0.0;
    for (i, ev) in tempo_events.iter().enumerate() {
        let end = match tempo_events.get(i + 1) {
            Some(next) => next.time,
            None => duration.max(ev.time),
        };
        let secs = end - ev.time;
        if secs <= 0.0 {
            continue;
        }
        weighted_sum += ev.bpm * secs;
        total_secs += secs;
    }

    if total_secs <= 0.0 {
        log::info!("estimated BPM (default): {DEFAULT_BPM:.2}");
        return DEFAULT_BPM;
    }

    let bpm = weighted_sum / total_secs;
    log::info!("estimated BPM: {bpm:.2}");
    bpm
}

/// Converts the user's tempo entry into a time-stretch factor.
///
/// 1.0 plays at the original speed, 2.0 at half speed. Empty, unparseable
/// or non-positive input falls back to 1.0.
pub fn tempo_factor(input: &str, mode: TempoMode, original_bpm: f64) -> f64 {
    let text = input.trim();
    if text.is_empty() {
        return 1.0;
    }
    let Ok(value) = text.parse::<f64>() else {
        log::warn!("invalid tempo input: {text:?}");
        return 1.0;
    };
    if value <= 0.0 {
        return 1.0;
    }
    match mode {
        TempoMode::Percentage => 100.0 / value,
        TempoMode::Bpm if original_bpm > 0.0 => original_bpm / value,
        TempoMode::Bpm => 1.0,
    }
}

/// Stretches every event timestamp by a constant factor. Order is untouched.
pub fn rescale(events: &mut [MIDIEvent], factor: f64) {
    for ev in events.iter_mut() {
        ev.time *= factor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::events::MIDIEventType;

    fn tempo(time: f64, bpm: f64) -> TempoEvent {
        TempoEvent { tick: 0, time, bpm }
    }

    #[test]
    fn test_estimate_is_duration_weighted() {
        // 120 BPM for 10 s, 60 BPM for the remaining 20 s
        let map = vec![tempo(0.0, 120.0), tempo(10.0, 60.0)];
        let bpm = estimate_bpm(&map, 30.0);
        assert!((bpm - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_single_tempo() {
        let map = vec![tempo(0.0, 97.5)];
        assert!((estimate_bpm(&map, 42.0) - 97.5).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_defaults() {
        assert!((estimate_bpm(&[], 10.0) - DEFAULT_BPM).abs() < 1e-9);
        // tempo event at the very end has zero weight
        let map = vec![tempo(10.0, 200.0)];
        assert!((estimate_bpm(&map, 10.0) - DEFAULT_BPM).abs() < 1e-9);
    }

    #[test]
    fn test_factor_bpm_mode() {
        // original 120, target 60 -> twice as slow
        assert!((tempo_factor("60", TempoMode::Bpm, 120.0) - 2.0).abs() < 1e-9);
        assert!((tempo_factor("240", TempoMode::Bpm, 120.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_factor_percentage_mode() {
        assert!((tempo_factor("50", TempoMode::Percentage, 120.0) - 2.0).abs() < 1e-9);
        assert!((tempo_factor("200", TempoMode::Percentage, 120.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_factor_bad_input_falls_back() {
        assert_eq!(tempo_factor("", TempoMode::Bpm, 120.0), 1.0);
        assert_eq!(tempo_factor("  ", TempoMode::Percentage, 120.0), 1.0);
        assert_eq!(tempo_factor("fast", TempoMode::Bpm, 120.0), 1.0);
        assert_eq!(tempo_factor("-30", TempoMode::Percentage, 120.0), 1.0);
        assert_eq!(tempo_factor("0", TempoMode::Bpm, 120.0), 1.0);
    }

    #[test]
    fn test_rescale_keeps_order() {
        let mut events: Vec<MIDIEvent> = [0.0, 0.5, 0.5, 2.0]
            .iter()
            .map(|&time| MIDIEvent {
                time,
                channel: 0,
                event_type: MIDIEventType::NoteOn { key: 60, vel: 64 },
            })
            .collect();
        rescale(&mut events, 2.0);
        let times: Vec<f64> = events.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.0, 1.0, 1.0, 4.0]);
    }
}
