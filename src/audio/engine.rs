use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{BufferSize, Device, Stream, StreamConfig};
use xsynth_core::channel::{
    ChannelAudioEvent, ChannelConfigEvent, ChannelEvent, ChannelInitOptions,
};
use xsynth_core::channel_group::{
    ChannelGroup, ChannelGroupConfig, ParallelismOptions, SynthEvent, SynthFormat, ThreadCount,
};
use xsynth_core::soundfont::{
    EnvelopeCurveType, EnvelopeOptions, Interpolator, SampleSoundfont, SoundfontBase,
    SoundfontInitOptions,
};
use xsynth_core::{AudioPipe, AudioStreamParams, ChannelCount};

/// Keeps the output under 1 dB by tracking loudness per stereo side.
pub struct Limiter {
    loudness_l: f32,
    loudness_r: f32,
    attack: f32,
    falloff: f32,
    strength: f32,
    min_thresh: f32,
}

impl Limiter {
    pub fn new(attack: f32, release: f32, sample_rate: f32) -> Self {
        Self {
            loudness_l: 1.0,
            loudness_r: 1.0,
            attack: attack * sample_rate,
            falloff: release * sample_rate,
            strength: 1.0,
            min_thresh: 0.4,
        }
    }

    fn follow(&self, loudness: f32, sample: f32) -> f32 {
        let next = if loudness > sample {
            (loudness * self.falloff + sample) / (self.falloff + 1.0)
        } else {
            (loudness * self.attack + sample) / (self.attack + 1.0)
        };
        next.max(self.min_thresh)
    }

    pub fn apply(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            self.loudness_l = self.follow(self.loudness_l, frame[0].abs());
            self.loudness_r = self.follow(self.loudness_r, frame[1].abs());

            let divisor_l = self.loudness_l * self.strength + 2.0 * (1.0 - self.strength);
            let divisor_r = self.loudness_r * self.strength + 2.0 * (1.0 - self.strength);
            frame[0] = frame[0] / divisor_l / 2.0;
            frame[1] = frame[1] / divisor_r / 2.0;
        }
    }
}

/// SoundFont synthesizer wired to the default audio output.
///
/// The xsynth channel group sits behind a mutex shared between the cpal
/// callback (pulling samples) and whichever thread is pushing events.
pub struct AudioEngine {
    xsynth: Arc<Mutex<ChannelGroup>>,
    stream_params: AudioStreamParams,
    device: Device,
    cfg: StreamConfig,
    limiter: Arc<Mutex<Limiter>>,
}

impl AudioEngine {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no audio output device available"))?;
        let cfg = device
            .default_output_config()
            .context("querying default output config")?;
        let mut cfg: StreamConfig = cfg.into();
        cfg.buffer_size = BufferSize::Fixed(1024);

        let sample_rate = cfg.sample_rate.0;
        let stream_params = AudioStreamParams::new(sample_rate, ChannelCount::Stereo);

        let xsynth = ChannelGroup::new(ChannelGroupConfig {
            channel_init_options: ChannelInitOptions {
                fade_out_killing: false,
            },
            // channel 9 is treated as percussion
            format: SynthFormat::Midi,
            audio_params: stream_params,
            parallelism: ParallelismOptions {
                channel: ThreadCount::Auto,
                key: ThreadCount::None,
            },
        });

        log::info!("audio engine ready ({sample_rate} Hz)");

        Ok(Self {
            xsynth: Arc::new(Mutex::new(xsynth)),
            stream_params,
            device,
            cfg,
            limiter: Arc::new(Mutex::new(Limiter::new(0.01, 0.1, sample_rate as f32))),
        })
    }

    pub fn load_soundfont(&mut self, path: &Path) -> Result<()> {
        let soundfont = SampleSoundfont::new(
            path,
            self.stream_params,
            SoundfontInitOptions {
                bank: None,
                preset: None,
                vol_envelope_options: EnvelopeOptions {
                    attack_curve: EnvelopeCurveType::Linear,
                    decay_curve: EnvelopeCurveType::Linear,
                    release_curve: EnvelopeCurveType::Linear,
                },
                use_effects: false,
                interpolator: Interpolator::Linear,
            },
        )
        .map_err(|e| anyhow!("loading soundfont {}: {e:?}", path.display()))?;

        let soundfonts: Vec<Arc<dyn SoundfontBase>> = vec![Arc::new(soundfont)];
        self.send(SynthEvent::AllChannels(ChannelEvent::Config(
            ChannelConfigEvent::SetSoundfonts(soundfonts),
        )));
        Ok(())
    }

    pub fn set_layer_count(&self, layers: usize) {
        self.send(SynthEvent::AllChannels(ChannelEvent::Config(
            ChannelConfigEvent::SetLayerCount(Some(layers)),
        )));
    }

    pub fn sender(&self) -> SynthSender {
        SynthSender {
            xsynth: self.xsynth.clone(),
        }
    }

    pub fn build_stream(&self) -> Result<Stream> {
        let xsynth = self.xsynth.clone();
        let limiter = self.limiter.clone();

        let stream = self
            .device
            .build_output_stream(
                &self.cfg,
                move |data: &mut [f32], _| {
                    match xsynth.lock() {
                        Ok(mut xsynth) => xsynth.read_samples(data),
                        Err(_) => data.fill(0.0),
                    }
                    if let Ok(mut limiter) = limiter.lock() {
                        limiter.apply(data);
                    }
                },
                |err| {
                    log::error!("audio stream error: {err}");
                },
                None,
            )
            .context("building audio output stream")?;
        Ok(stream)
    }

    fn send(&self, event: SynthEvent) {
        if let Ok(mut xsynth) = self.xsynth.lock() {
            xsynth.send_event(event);
        }
    }
}

/// Cloneable, `Send` handle for pushing events into the synth from the
/// playback thread.
#[derive(Clone)]
pub struct SynthSender {
    xsynth: Arc<Mutex<ChannelGroup>>,
}

impl SynthSender {
    pub fn note_on(&self, channel: u8, key: u8, vel: u8) {
        self.send(SynthEvent::Channel(
            channel as u32,
            ChannelEvent::Audio(ChannelAudioEvent::NoteOn { key, vel }),
        ));
    }

    pub fn note_off(&self, channel: u8, key: u8) {
        self.send(SynthEvent::Channel(
            channel as u32,
            ChannelEvent::Audio(ChannelAudioEvent::NoteOff { key }),
        ));
    }

    pub fn program_change(&self, channel: u8, program: u8) {
        self.send(SynthEvent::Channel(
            channel as u32,
            ChannelEvent::Audio(ChannelAudioEvent::ProgramChange(program)),
        ));
    }

    pub fn all_notes_killed(&self) {
        self.send(SynthEvent::AllChannels(ChannelEvent::Audio(
            ChannelAudioEvent::AllNotesKilled,
        )));
    }

    fn send(&self, event: SynthEvent) {
        if let Ok(mut xsynth) = self.xsynth.lock() {
            xsynth.send_event(event);
        }
    }
}
