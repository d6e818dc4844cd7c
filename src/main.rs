use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::Duration;

use cpal::Stream;
use cpal::traits::StreamTrait;
use eframe::egui::{self, Color32, RichText};
use sysinfo::System;

use audio::engine::AudioEngine;
use audio::player::Player;
use midi::file::MIDIFile;
use midi::tempo::{self, TempoMode};
use settings::{ApplicationSettings, SETTINGS_FILE};

mod audio;
mod midi;
mod settings;

const TITLE_BASE: &str = "Drum Practice MIDI Player";

#[derive(PartialEq, Eq)]
enum CurrentAppSettings {
    None,
    Audio,
}

impl Default for CurrentAppSettings {
    fn default() -> Self {
        CurrentAppSettings::None
    }
}

#[derive(Default)]
struct MainWindow {
    sys: System,
    window_settings: CurrentAppSettings,
    app_settings: ApplicationSettings,

    engine: Option<AudioEngine>,
    stream: Option<Stream>,
    player: Player,
    soundfont_loaded: bool,

    current_file: Option<PathBuf>,
    song: Option<MIDIFile>,
    original_bpm: Option<f64>,

    tempo_input: String,
    tempo_mode: TempoMode,

    last_error: Option<String>,
}

impl MainWindow {
    fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let mut s = Self::default();

        match AudioEngine::new() {
            Ok(engine) => {
                engine.set_layer_count(4);
                match engine.build_stream() {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            s.record_error(format!("starting audio stream: {e}"));
                        }
                        s.stream = Some(stream);
                    }
                    Err(e) => s.record_error(format!("{e:#}")),
                }
                s.engine = Some(engine);
            }
            Err(e) => s.record_error(format!("{e:#}")),
        }

        match ApplicationSettings::load(Path::new(SETTINGS_FILE)) {
            Ok(app_settings) => {
                s.app_settings = app_settings;
                s.reload_soundfont();
            }
            Err(e) => s.record_error(format!("{e:#}")),
        }

        s
    }

    fn record_error(&mut self, message: String) {
        log::error!("{message}");
        self.last_error = Some(message);
    }

    fn reload_soundfont(&mut self) {
        self.soundfont_loaded = false;
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let Some(path) = self.app_settings.audio_settings.soundfont_path.clone() else {
            return;
        };
        match engine.load_soundfont(&path) {
            Ok(()) => {
                log::info!("loaded soundfont {}", path.display());
                self.soundfont_loaded = true;
                self.last_error = None;
            }
            Err(e) => self.record_error(format!("{e:#}")),
        }
    }

    fn set_soundfont(&mut self, path: PathBuf) {
        self.app_settings.audio_settings.soundfont_path = Some(path);
        if let Err(e) = self.app_settings.save(Path::new(SETTINGS_FILE)) {
            self.record_error(format!("{e:#}"));
        }
        self.reload_soundfont();
    }

    fn open_midi_dialog(&mut self, ctx: &egui::Context) {
        let midi_fd = rfd::FileDialog::new().add_filter("MIDI Files", &["mid", "midi"]);
        let Some(file) = midi_fd.pick_file() else {
            return;
        };
        match MIDIFile::load(&file) {
            Ok(song) => {
                self.original_bpm = Some(tempo::estimate_bpm(&song.tempo_events, song.duration));
                let filename = file
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                ctx.send_viewport_cmd(egui::ViewportCommand::Title(format!(
                    "{TITLE_BASE} - {filename}"
                )));
                log::info!("loaded MIDI file: {filename}");
                self.song = Some(song);
                self.current_file = Some(file);
                self.last_error = None;
            }
            Err(e) => self.record_error(format!("{e:#}")),
        }
    }

    fn on_play(&mut self) {
        let Some(song) = self.song.as_ref() else {
            log::warn!("no MIDI file selected");
            return;
        };
        let Some(engine) = self.engine.as_ref() else {
            self.record_error(String::from("audio engine unavailable"));
            return;
        };
        if !self.soundfont_loaded {
            self.record_error(String::from(
                "no SoundFont loaded, pick one under Options > Audio",
            ));
            return;
        }

        let original_bpm = self.original_bpm.unwrap_or(tempo::DEFAULT_BPM);
        let factor = tempo::tempo_factor(&self.tempo_input, self.tempo_mode, original_bpm);
        if let Some(file) = &self.current_file {
            log::info!(
                "playing {} with tempo factor {factor:.2}",
                file.display()
            );
        }
        self.player
            .play(song.events.clone(), factor, engine.sender());
    }

    fn file_label(&self) -> String {
        match &self.current_file {
            Some(file) => file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file.display().to_string()),
            None => String::from("No file loaded"),
        }
    }
}

impl eframe::App for MainWindow {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.sys.refresh_cpu_usage();

        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Open MIDI file").clicked() {
                        ui.close_menu();
                        self.open_midi_dialog(ctx);
                    }
                });
                ui.menu_button("Options", |ui| {
                    if ui.button("Audio...").clicked() {
                        ui.close_menu();
                        self.window_settings = CurrentAppSettings::Audio;
                    }
                });
                ui.menu_button("Project", |ui| {
                    if ui.button("Quit").clicked() {
                        exit(0);
                    }
                });
                ui.separator();
                ui.label(self.file_label());
            });
        });

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                let cpu = self.sys.cpus().first().map(|c| c.cpu_usage()).unwrap_or(0.0);
                ui.label(format!("CPU {cpu:.1}%"));
                ui.separator();
                ui.label(if self.player.is_playing() {
                    "Playing"
                } else {
                    "Stopped"
                });
                if let Some(err) = &self.last_error {
                    ui.separator();
                    ui.label(RichText::new(err).color(Color32::from_rgb(0xFF, 0x55, 0x55)));
                }
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            let mut mute_drums = self.player.mute_drums();
            if ui.checkbox(&mut mute_drums, "Mute drums").changed() {
                self.player.set_mute_drums(mute_drums);
            }
            let mut mute_others = self.player.mute_others();
            if ui.checkbox(&mut mute_others, "Mute accompaniment").changed() {
                self.player.set_mute_others(mute_others);
            }

            ui.add_space(5.0);
            ui.horizontal(|ui| {
                ui.label("Tempo:");
                ui.add(egui::TextEdit::singleline(&mut self.tempo_input).desired_width(80.0));
                egui::ComboBox::from_id_salt("tempo_mode")
                    .selected_text(self.tempo_mode.label())
                    .show_ui(ui, |ui| {
                        for mode in [TempoMode::Bpm, TempoMode::Percentage] {
                            ui.selectable_value(&mut self.tempo_mode, mode, mode.label());
                        }
                    });
            });

            ui.add_space(5.0);
            match self.original_bpm {
                Some(bpm) => ui.label(format!("Original BPM: {bpm:.2}")),
                None => ui.label("Original BPM: N/A"),
            };

            ui.add_space(10.0);
            ui.horizontal(|ui| {
                if ui.button("Play").clicked() {
                    self.on_play();
                }
                if ui.button("Stop").clicked() {
                    self.player.stop();
                }
            });
        });

        if self.window_settings != CurrentAppSettings::None {
            egui::Window::new("Settings")
                .collapsible(false)
                .resizable(false)
                .default_width(300.0)
                .show(ctx, |ui| {
                    ui.horizontal(|ui| {
                        ui.label(RichText::new("Soundfont:").size(15.0));
                        match &self.app_settings.audio_settings.soundfont_path {
                            Some(path) => ui.label(path.display().to_string()),
                            None => ui.label("None selected!"),
                        };
                        if ui.button("Choose soundfont").clicked() {
                            let sfd = rfd::FileDialog::new()
                                .add_filter("Soundfont Files", &["sf2", "sf3", "sfz"]);
                            if let Some(file) = sfd.pick_file() {
                                self.set_soundfont(file);
                            }
                        }
                    });
                    ui.add_space(20.0);
                    if ui.button("Close").clicked() {
                        self.window_settings = CurrentAppSettings::None;
                    }
                });
        }

        if self.player.is_playing() {
            ctx.request_repaint_after(Duration::from_millis(200));
        }
    }
}

fn main() -> eframe::Result {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let native_options = eframe::NativeOptions {
        renderer: eframe::Renderer::Glow,
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([480.0, 320.0])
            .with_min_inner_size([320.0, 240.0]),
        ..Default::default()
    };

    eframe::run_native(
        TITLE_BASE,
        native_options,
        Box::new(|cc| Ok(Box::new(MainWindow::new(cc)))),
    )
}
