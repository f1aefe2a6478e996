// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Raw MIDI ingestion: parses wire-format events and dispatches them to the
//! synth's `register_*` handlers.

use midly::live::LiveEvent;
use midly::MidiMessage;
use tracing::debug;

use crate::synth::Synth;

impl Synth {
    /// Processes a raw MIDI event with a block-local timestamp. Unparseable
    /// events and system messages are ignored.
    pub fn process_live_event(&mut self, raw_event: &[u8], timestamp: usize) {
        let event = match LiveEvent::parse(raw_event) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = ?e, "Failed to parse MIDI event");
                return;
            }
        };

        let LiveEvent::Midi { channel, message } = event else {
            return;
        };
        let channel = u8::from(channel) + 1;

        match message {
            MidiMessage::NoteOn { key, vel } if u8::from(vel) == 0 => {
                // Note On with velocity 0 is equivalent to Note Off.
                self.register_note_off(channel, u8::from(key), 0, timestamp);
            }
            MidiMessage::NoteOn { key, vel } => {
                self.register_note_on(channel, u8::from(key), u8::from(vel), timestamp);
            }
            MidiMessage::NoteOff { key, vel } => {
                self.register_note_off(channel, u8::from(key), u8::from(vel), timestamp);
            }
            MidiMessage::Controller { controller, value } => {
                self.register_cc(channel, u8::from(controller), u8::from(value), timestamp);
            }
            MidiMessage::PitchBend { bend } => {
                self.register_pitch_wheel(channel, bend.as_int() as i32, timestamp);
            }
            MidiMessage::ChannelAftertouch { vel } => {
                self.register_aftertouch(channel, u8::from(vel), timestamp);
            }
            _ => {}
        }
    }
}
