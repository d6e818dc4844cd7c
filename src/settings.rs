use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Config file read from the working directory, as in
/// `soundfont_path = /path/to/bank.sf2`.
pub const SETTINGS_FILE: &str = "settings.txt";

#[derive(Debug, Clone, Default)]
pub struct AudioSettings {
    pub soundfont_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ApplicationSettings {
    pub audio_settings: AudioSettings,
}

impl ApplicationSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("{} not found with SoundFont path", path.display()))?;
        let Some(soundfont_path) = parse_soundfont_path(&text) else {
            bail!("no soundfont path found in {}", path.display());
        };
        if !soundfont_path.exists() {
            bail!(
                "the specified soundfont does not exist: {}",
                soundfont_path.display()
            );
        }
        Ok(Self {
            audio_settings: AudioSettings {
                soundfont_path: Some(soundfont_path),
            },
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(soundfont_path) = &self.audio_settings.soundfont_path {
            fs::write(path, format!("soundfont_path = {}\n", soundfont_path.display()))
                .with_context(|| format!("writing {}", path.display()))?;
        }
        Ok(())
    }
}

/// Accepts `key = value` lines (keys `soundfont`, `soundfont_path`,
/// `soundfont path`, case-insensitive) or a bare path line. `#` comments and
/// blank lines are skipped; the last match wins.
fn parse_soundfont_path(text: &str) -> Option<PathBuf> {
    let mut found = None;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => {
                let key = key.trim().to_lowercase();
                if matches!(key.as_str(), "soundfont" | "soundfont_path" | "soundfont path") {
                    found = Some(PathBuf::from(value.trim()));
                }
            }
            None => found = Some(PathBuf::from(line)),
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_value_line() {
        let path = parse_soundfont_path("soundfont_path = /banks/drums.sf2");
        assert_eq!(path, Some(PathBuf::from("/banks/drums.sf2")));
    }

    #[test]
    fn test_alternate_key_spellings() {
        assert!(parse_soundfont_path("SoundFont = a.sf2").is_some());
        assert!(parse_soundfont_path("Soundfont Path = a.sf2").is_some());
        assert!(parse_soundfont_path("volume = 3").is_none());
    }

    #[test]
    fn test_bare_path_line() {
        let path = parse_soundfont_path("# my settings\n\n/banks/kit.sf3\n");
        assert_eq!(path, Some(PathBuf::from("/banks/kit.sf3")));
    }

    #[test]
    fn test_last_setting_wins() {
        let text = "soundfont = old.sf2\nsoundfont_path = new.sf2\n";
        assert_eq!(parse_soundfont_path(text), Some(PathBuf::from("new.sf2")));
    }

    #[test]
    fn test_comments_and_blanks_ignored() {
        assert!(parse_soundfont_path("# soundfont = commented.sf2\n\n").is_none());
    }
}
