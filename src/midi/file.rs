use std::path::Path;

use anyhow::{Context, Result};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

use super::events::{MIDIEvent, MIDIEventType, TempoEvent};

/// SMF default tempo (500000 us per beat) applies until the first tempo event.
const DEFAULT_USPB: f64 = 500_000.0;

/// A standard MIDI file flattened into a single playable sequence.
pub struct MIDIFile {
    pub ppq: u16,
    /// All note and program-change events from all tracks, sorted by time.
    pub events: Vec<MIDIEvent>,
    /// Every set_tempo meta event in the file, in tick order.
    pub tempo_events: Vec<TempoEvent>,
    /// Seconds from the first tick to the last event.
    pub duration: f64,
}

impl MIDIFile {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("reading MIDI file {}", path.display()))?;
        Self::parse(&data)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let smf = Smf::parse(data).context("parsing MIDI file")?;

        let ppq = match smf.header.timing {
            Timing::Metrical(tpb) => tpb.as_int().max(1),
            // rough approximation for SMPTE timecode division
            Timing::Timecode(fps, tpf) => (fps.as_f32() * tpf as f32 / 2.0) as u16,
        };

        // Tempo events can live on any track, so collect them all before
        // resolving note timestamps.
        let mut raw_tempi: Vec<(u64, f64)> = Vec::new();
        for track in &smf.tracks {
            let mut tick: u64 = 0;
            for event in track {
                tick += event.delta.as_int() as u64;
                if let TrackEventKind::Meta(MetaMessage::Tempo(uspb)) = event.kind {
                    raw_tempi.push((tick, uspb.as_int() as f64));
                }
            }
        }
        raw_tempi.sort_by_key(|&(tick, _)| tick);

        let mut tempo_events = Vec::with_capacity(raw_tempi.len());
        {
            let mut secs = 0.0;
            let mut last_tick = 0u64;
            let mut uspb = DEFAULT_USPB;
            for &(tick, next_uspb) in &raw_tempi {
                secs += ticks_to_secs(tick - last_tick, uspb, ppq);
                last_tick = tick;
                uspb = next_uspb;
                tempo_events.push(TempoEvent {
                    tick,
                    time: secs,
                    bpm: 60_000_000.0 / next_uspb,
                });
            }
        }

        let mut events = Vec::new();
        for track in &smf.tracks {
            let mut tick: u64 = 0;
            for event in track {
                tick += event.delta.as_int() as u64;
                let TrackEventKind::Midi { channel, message } = event.kind else {
                    continue;
                };
                let event_type = match message {
                    // NoteOn with velocity 0 is the SMF idiom for NoteOff
                    MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => {
                        MIDIEventType::NoteOff { key: key.as_int() }
                    }
                    MidiMessage::NoteOn { key, vel } => MIDIEventType::NoteOn {
                        key: key.as_int(),
                        vel: vel.as_int(),
                    },
                    MidiMessage::NoteOff { key, .. } => {
                        MIDIEventType::NoteOff { key: key.as_int() }
                    }
                    MidiMessage::ProgramChange { program } => MIDIEventType::ProgramChange {
                        program: program.as_int(),
                    },
                    _ => continue,
                };
                events.push(MIDIEvent {
                    time: tick_to_time(&tempo_events, ppq, tick),
                    channel: channel.as_int(),
                    event_type,
                });
            }
        }

        // stable sort: simultaneous events keep their track order
        events.sort_by(|a, b| {
            a.time
                .partial_cmp(&b.time)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let duration = events
            .last()
            .map(|e| e.time)
            .unwrap_or(0.0)
            .max(tempo_events.last().map(|t| t.time).unwrap_or(0.0));

        log::info!(
            "parsed MIDI: ppq {}, {} events, {} tempo changes, {:.1} s",
            ppq,
            events.len(),
            tempo_events.len(),
            duration
        );

        Ok(Self {
            ppq,
            events,
            tempo_events,
            duration,
        })
    }
}

fn ticks_to_secs(delta_ticks: u64, uspb: f64, ppq: u16) -> f64 {
    delta_ticks as f64 * uspb / (ppq as f64 * 1_000_000.0)
}

/// Converts an absolute tick to seconds using the tempo in effect at that tick.
fn tick_to_time(tempo_events: &[TempoEvent], ppq: u16, tick: u64) -> f64 {
    let idx = tempo_events.partition_point(|t| t.tick <= tick);
    let (base_tick, base_time, uspb) = if idx == 0 {
        (0, 0.0, DEFAULT_USPB)
    } else {
        let t = &tempo_events[idx - 1];
        (t.tick, t.time, 60_000_000.0 / t.bpm)
    };
    base_time + ticks_to_secs(tick - base_tick, uspb, ppq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u4, u7, u15, u24, u28};
    use midly::{Format, Header, TrackEvent};

    const PPQ: u16 = 480;

    fn midi_event(delta: u32, channel: u8, message: MidiMessage) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi {
                channel: u4::new(channel),
                message,
            },
        }
    }

    fn tempo_event(delta: u32, uspb: u32) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(uspb))),
        }
    }

    fn note_on(key: u8, vel: u8) -> MidiMessage {
        MidiMessage::NoteOn {
            key: u7::new(key),
            vel: u7::new(vel),
        }
    }

    fn to_bytes(smf: &Smf) -> Vec<u8> {
        let mut buf = Vec::new();
        smf.write_std(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_timestamps_follow_tempo_map() {
        let mut smf = Smf::new(Header::new(
            Format::Parallel,
            Timing::Metrical(u15::new(PPQ)),
        ));
        // 120 BPM for one beat, then 240 BPM
        smf.tracks.push(vec![
            tempo_event(0, 500_000),
            tempo_event(PPQ as u32, 250_000),
        ]);
        smf.tracks.push(vec![
            midi_event(0, 0, note_on(60, 100)),
            midi_event(PPQ as u32, 0, note_on(62, 100)),
            midi_event(PPQ as u32, 0, note_on(64, 100)),
        ]);

        let file = MIDIFile::parse(&to_bytes(&smf)).unwrap();
        assert_eq!(file.ppq, PPQ);
        assert_eq!(file.events.len(), 3);
        assert!((file.events[0].time - 0.0).abs() < 1e-9);
        assert!((file.events[1].time - 0.5).abs() < 1e-9);
        // second beat runs at 240 BPM, so it lasts 0.25 s
        assert!((file.events[2].time - 0.75).abs() < 1e-9);
        assert!((file.duration - 0.75).abs() < 1e-9);

        assert_eq!(file.tempo_events.len(), 2);
        assert!((file.tempo_events[0].bpm - 120.0).abs() < 0.01);
        assert!((file.tempo_events[1].bpm - 240.0).abs() < 0.01);
        assert!((file.tempo_events[1].time - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_no_tempo_events_defaults_to_120() {
        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::new(PPQ)),
        ));
        smf.tracks
            .push(vec![midi_event(PPQ as u32 * 2, 3, note_on(40, 90))]);

        let file = MIDIFile::parse(&to_bytes(&smf)).unwrap();
        assert!(file.tempo_events.is_empty());
        // two beats at the default 120 BPM
        assert!((file.events[0].time - 1.0).abs() < 1e-9);
        assert_eq!(file.events[0].channel, 3);
    }

    #[test]
    fn test_velocity_zero_note_on_becomes_note_off() {
        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::new(PPQ)),
        ));
        smf.tracks.push(vec![
            midi_event(0, 9, note_on(36, 100)),
            midi_event(PPQ as u32, 9, note_on(36, 0)),
        ]);

        let file = MIDIFile::parse(&to_bytes(&smf)).unwrap();
        assert_eq!(
            file.events[1].event_type,
            MIDIEventType::NoteOff { key: 36 }
        );
    }

    #[test]
    fn test_tracks_merge_in_time_order() {
        let mut smf = Smf::new(Header::new(
            Format::Parallel,
            Timing::Metrical(u15::new(PPQ)),
        ));
        smf.tracks.push(vec![midi_event(PPQ as u32, 0, note_on(60, 80))]);
        smf.tracks.push(vec![
            midi_event(0, 9, note_on(36, 127)),
            TrackEvent {
                delta: u28::new(PPQ as u32 * 2),
                kind: TrackEventKind::Midi {
                    channel: u4::new(9),
                    message: MidiMessage::ProgramChange {
                        program: u7::new(5),
                    },
                },
            },
        ]);

        let file = MIDIFile::parse(&to_bytes(&smf)).unwrap();
        let channels: Vec<u8> = file.events.iter().map(|e| e.channel).collect();
        assert_eq!(channels, vec![9, 0, 9]);
        assert_eq!(
            file.events[2].event_type,
            MIDIEventType::ProgramChange { program: 5 }
        );
    }

    #[test]
    fn test_garbage_input_is_an_error() {
        assert!(MIDIFile::parse(b"not a midi file").is_err());
    }
}
