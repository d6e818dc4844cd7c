use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::engine::SynthSender;
use crate::midi::events::{MIDIEvent, MIDIEventType};
use crate::midi::filter::MuteConfig;
use crate::midi::tempo;

/// Mute switches shared with the UI so toggling a checkbox takes effect
/// mid-playback.
#[derive(Default)]
struct MuteFlags {
    mute_drums: AtomicBool,
    mute_others: AtomicBool,
}

impl MuteFlags {
    fn snapshot(&self) -> MuteConfig {
        MuteConfig {
            mute_drums: self.mute_drums.load(Ordering::SeqCst),
            mute_others: self.mute_others.load(Ordering::SeqCst),
        }
    }
}

/// Plays a sequenced event list on a worker thread, one file at a time.
pub struct Player {
    mute: Arc<MuteFlags>,
    playing: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

/// Sleep slice while waiting for the next event, keeps the stop flag responsive.
const STOP_POLL: Duration = Duration::from_millis(10);

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}

impl Player {
    pub fn new() -> Self {
        Self {
            mute: Arc::new(MuteFlags::default()),
            playing: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn mute_drums(&self) -> bool {
        self.mute.mute_drums.load(Ordering::SeqCst)
    }

    pub fn set_mute_drums(&self, on: bool) {
        self.mute.mute_drums.store(on, Ordering::SeqCst);
    }

    pub fn mute_others(&self) -> bool {
        self.mute.mute_others.load(Ordering::SeqCst)
    }

    pub fn set_mute_others(&self, on: bool) {
        self.mute.mute_others.store(on, Ordering::SeqCst);
    }

    /// Starts playback of `events` stretched by `tempo_factor` (1.0 keeps the
    /// original speed, 2.0 plays at half speed).
    pub fn play(&mut self, mut events: Vec<MIDIEvent>, tempo_factor: f64, synth: SynthSender) {
        if self.is_playing() {
            log::warn!("a MIDI is already playing, stop playback before starting a new one");
            return;
        }
        self.join_worker();

        let factor = if tempo_factor <= 0.0 { 1.0 } else { tempo_factor };
        tempo::rescale(&mut events, factor);

        log::info!(
            "starting playback, {} events, tempo factor {:.2}",
            events.len(),
            factor
        );

        self.stop_flag.store(false, Ordering::SeqCst);
        self.playing.store(true, Ordering::SeqCst);

        let playing = self.playing.clone();
        let stop_flag = self.stop_flag.clone();
        let mute = self.mute.clone();

        self.worker = Some(std::thread::spawn(move || {
            let start = Instant::now();

            for ev in &events {
                loop {
                    if stop_flag.load(Ordering::SeqCst) {
                        break;
                    }
                    let elapsed = start.elapsed().as_secs_f64();
                    if elapsed >= ev.time {
                        break;
                    }
                    std::thread::sleep(Duration::from_secs_f64(ev.time - elapsed).min(STOP_POLL));
                }
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }

                let cfg = mute.snapshot();
                match ev.event_type {
                    MIDIEventType::NoteOn { key, vel } if cfg.allows(ev) => {
                        synth.note_on(ev.channel, key, vel);
                    }
                    MIDIEventType::NoteOff { key } if cfg.allows(ev) => {
                        synth.note_off(ev.channel, key);
                    }
                    MIDIEventType::ProgramChange { program } => {
                        synth.program_change(ev.channel, program);
                    }
                    _ => {}
                }
            }

            synth.all_notes_killed();
            playing.store(false, Ordering::SeqCst);
            log::info!(
                "playback finished (actual duration: {:.1} s)",
                start.elapsed().as_secs_f64()
            );
        }));
    }

    pub fn stop(&mut self) {
        if self.is_playing() {
            log::info!("stopping playback");
            self.stop_flag.store(true, Ordering::SeqCst);
            self.join_worker();
        } else {
            log::info!("no active playback to stop");
        }
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.join_worker();
    }
}
