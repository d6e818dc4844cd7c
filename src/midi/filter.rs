use super::events::MIDIEvent;

/// General MIDI reserves channel 10 (index 9) for percussion.
pub const DRUM_CHANNEL: u8 = 9;

/// Which channels' note events are suppressed during playback.
///
/// Non-note events always pass so instrument assignments stay intact while
/// a part is muted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuteConfig {
    pub mute_drums: bool,
    pub mute_others: bool,
}

impl MuteConfig {
    pub fn allows(&self, ev: &MIDIEvent) -> bool {
        if !ev.is_note() {
            return true;
        }
        if ev.channel == DRUM_CHANNEL {
            !self.mute_drums
        } else {
            !self.mute_others
        }
    }
}
