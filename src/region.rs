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

//! A region: one sample-to-key/velocity mapping with its full performance
//! settings.
//!
//! The configuration half is filled opcode by opcode during load. The
//! activation half is a set of flags updated incrementally as MIDI state
//! changes; `register_note_on` and friends return whether the event triggers
//! a new voice for this region.


use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn};

use crate::envelope::{CcPair, EgDescription};
use crate::parser::Opcode;
use crate::sample::pool::{AudioData, SamplePool};
use crate::util::{cents_to_ratio, db_to_gain, normalize_midi, parse_note_name, Range};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    NoLoop,
    OneShot,
    LoopContinuous,
    LoopSustain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffMode {
    Fast,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Attack,
    Release,
    ReleaseKey,
    First,
    Legato,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VelocityOverride {
    Current,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossfadeCurve {
    Power,
    Gain,
}

/// Default sample rate assumed until the sample file metadata is known.
pub const DEFAULT_SAMPLE_RATE: f64 = 44100.0;

#[derive(Debug)]
pub struct Region {
    // Sound source.
    pub sample: String,
    pub delay: f32,
    pub delay_random: f32,
    pub offset: u32,
    pub offset_random: u32,
    pub sample_end: u32,
    pub sample_count: Option<u32>,
    pub loop_mode: LoopMode,
    pub loop_range: Range<u32>,

    // Voice lifecycle.
    pub group: u32,
    pub off_by: Option<u32>,
    pub off_mode: OffMode,

    // Key mapping.
    pub key_range: Range<u8>,
    pub velocity_range: Range<u8>,

    // MIDI conditions.
    pub channel_range: Range<u8>,
    pub bend_range: Range<i32>,
    pub cc_conditions: HashMap<u8, Range<u8>>,
    pub keyswitch_range: Range<u8>,
    pub keyswitch: Option<u8>,
    pub keyswitch_up: Option<u8>,
    pub keyswitch_down: Option<u8>,
    pub previous_note: Option<u8>,
    pub velocity_override: VelocityOverride,

    // Internal conditions.
    pub aftertouch_range: Range<u8>,
    pub bpm_range: Range<f32>,
    pub rand_range: Range<f32>,
    pub sequence_length: u8,
    pub sequence_position: u8,

    // Triggers.
    pub trigger: Trigger,
    pub cc_triggers: HashMap<u8, Range<u8>>,

    // Amplifier.
    pub volume: f32,
    pub amplitude: f32,
    pub pan: f32,
    pub width: f32,
    pub position: f32,
    pub volume_cc: Option<CcPair>,
    pub amplitude_cc: Option<CcPair>,
    pub pan_cc: Option<CcPair>,
    pub width_cc: Option<CcPair>,
    pub position_cc: Option<CcPair>,
    pub amp_keycenter: u8,
    pub amp_keytrack: f32,
    pub amp_veltrack: f32,
    pub velocity_points: Vec<(u8, f32)>,
    pub amp_random: f32,
    pub crossfade_key_in: Range<u8>,
    pub crossfade_key_out: Range<u8>,
    pub crossfade_vel_in: Range<u8>,
    pub crossfade_vel_out: Range<u8>,
    pub crossfade_key_curve: CrossfadeCurve,
    pub crossfade_vel_curve: CrossfadeCurve,

    // Pitch.
    pub pitch_keycenter: u8,
    pub pitch_keytrack: i32,
    pub pitch_random: i32,
    pub pitch_veltrack: i32,
    pub transpose: i32,
    pub tune: i32,

    // Envelope descriptors.
    pub amplitude_eg: EgDescription,
    pub pitch_eg: EgDescription,
    pub filter_eg: EgDescription,

    // Sample metadata, filled by prepare().
    pub sample_rate: f64,
    pub num_channels: u16,
    pub preloaded_data: Option<Arc<AudioData>>,
    pub(crate) resolved_sample_path: Option<PathBuf>,

    pub unknown_opcodes: Vec<String>,

    // Activation state.
    prepared: bool,
    key_switched: bool,
    previous_key_switched: bool,
    sequence_switched: bool,
    pitch_switched: bool,
    bpm_switched: bool,
    aftertouch_switched: bool,
    cc_switched: [bool; 128],
    cc_trigger_armed: [bool; 128],
    active_notes_in_range: u32,
    sequence_counter: u32,
    last_note_velocities: [u8; 128],
    notes_on: [bool; 128],
    previous_velocity: u8,
    sustain_pedal: u8,
    pending_releases: Vec<(u8, u8)>,
}

impl Default for Region {
    fn default() -> Self {
        Self::new()
    }
}

impl Region {
    pub fn new() -> Self {
        Self {
            sample: String::new(),
            delay: 0.0,
            delay_random: 0.0,
            offset: 0,
            offset_random: 0,
            sample_end: u32::MAX,
            sample_count: None,
            loop_mode: LoopMode::NoLoop,
            loop_range: Range::new(0, u32::MAX),
            group: 0,
            off_by: None,
            off_mode: OffMode::Fast,
            key_range: Range::new(0, 127),
            velocity_range: Range::new(0, 127),
            channel_range: Range::new(1, 16),
            bend_range: Range::new(-8192, 8192),
            cc_conditions: HashMap::new(),
            keyswitch_range: Range::new(0, 127),
            keyswitch: None,
            keyswitch_up: None,
            keyswitch_down: None,
            previous_note: None,
            velocity_override: VelocityOverride::Current,
            aftertouch_range: Range::new(0, 127),
            bpm_range: Range::new(0.0, 500.0),
            rand_range: Range::new(0.0, 1.0),
            sequence_length: 1,
            sequence_position: 1,
            trigger: Trigger::Attack,
            cc_triggers: HashMap::new(),
            volume: 0.0,
            amplitude: 100.0,
            pan: 0.0,
            width: 0.0,
            position: 0.0,
            volume_cc: None,
            amplitude_cc: None,
            pan_cc: None,
            width_cc: None,
            position_cc: None,
            amp_keycenter: 60,
            amp_keytrack: 0.0,
            amp_veltrack: 100.0,
            velocity_points: Vec::new(),
            amp_random: 0.0,
            crossfade_key_in: Range::new(0, 0),
            crossfade_key_out: Range::new(127, 127),
            crossfade_vel_in: Range::new(0, 0),
            crossfade_vel_out: Range::new(127, 127),
            crossfade_key_curve: CrossfadeCurve::Power,
            crossfade_vel_curve: CrossfadeCurve::Power,
            pitch_keycenter: 60,
            pitch_keytrack: 100,
            pitch_random: 0,
            pitch_veltrack: 0,
            transpose: 0,
            tune: 0,
            amplitude_eg: EgDescription::default(),
            pitch_eg: EgDescription::default(),
            filter_eg: EgDescription::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            num_channels: 1,
            preloaded_data: None,
            resolved_sample_path: None,
            unknown_opcodes: Vec::new(),
            prepared: false,
            key_switched: true,
            previous_key_switched: true,
            sequence_switched: true,
            pitch_switched: true,
            bpm_switched: true,
            aftertouch_switched: true,
            cc_switched: [true; 128],
            cc_trigger_armed: [false; 128],
            active_notes_in_range: 0,
            sequence_counter: 0,
            last_note_velocities: [0; 128],
            notes_on: [false; 128],
            previous_velocity: 0,
            sustain_pedal: 0,
            pending_releases: Vec::new(),
        }
    }

    /// Applies one opcode to the region. Values outside their legal domain
    /// are clamped; malformed values leave the previous value in place;
    /// unknown opcodes are recorded for diagnostics.
    pub fn parse_opcode(&mut self, opcode: &Opcode) {
        if let Some(stage) = opcode.name.strip_prefix("ampeg_") {
            if parse_eg_opcode(&mut self.amplitude_eg, stage, opcode, true) {
                return;
            }
        }
        if let Some(stage) = opcode.name.strip_prefix("pitcheg_") {
            if parse_eg_opcode(&mut self.pitch_eg, stage, opcode, false) {
                return;
            }
        }
        if let Some(stage) = opcode.name.strip_prefix("fileg_") {
            if parse_eg_opcode(&mut self.filter_eg, stage, opcode, false) {
                return;
            }
        }

        let value = opcode.value.as_str();
        match opcode.name.as_str() {
            "sample" => self.sample = value.to_string(),
            "delay" => set_f32(&mut self.delay, value, Range::new(0.0, 100.0)),
            "delay_random" => set_f32(&mut self.delay_random, value, Range::new(0.0, 100.0)),
            "offset" => set_u32(&mut self.offset, value, Range::new(0, u32::MAX)),
            "offset_random" => set_u32(&mut self.offset_random, value, Range::new(0, u32::MAX)),
            "end" => set_u32(&mut self.sample_end, value, Range::new(0, u32::MAX)),
            "count" => {
                if let Some(count) = clamped_u32(value, Range::new(0, u32::MAX)) {
                    self.sample_count = Some(count);
                }
            }
            "loop_mode" | "loopmode" => match value {
                "no_loop" => self.loop_mode = LoopMode::NoLoop,
                "one_shot" => self.loop_mode = LoopMode::OneShot,
                "loop_continuous" => self.loop_mode = LoopMode::LoopContinuous,
                "loop_sustain" => self.loop_mode = LoopMode::LoopSustain,
                _ => debug!(value, "Unknown loop_mode value"),
            },
            "loop_start" | "loopstart" => {
                if let Some(start) = clamped_u32(value, Range::new(0, u32::MAX)) {
                    self.loop_range.set_start(start);
                }
            }
            "loop_end" | "loopend" => {
                if let Some(end) = clamped_u32(value, Range::new(0, u32::MAX)) {
                    self.loop_range.set_end(end);
                }
            }
            "group" => set_u32(&mut self.group, value, Range::new(0, u32::MAX)),
            "off_by" => {
                if let Some(off_by) = clamped_u32(value, Range::new(0, u32::MAX)) {
                    self.off_by = Some(off_by);
                }
            }
            "off_mode" => match value {
                "fast" => self.off_mode = OffMode::Fast,
                "normal" => self.off_mode = OffMode::Normal,
                _ => debug!(value, "Unknown off_mode value"),
            },
            "lokey" => {
                if let Some(key) = clamped_key(value) {
                    self.key_range.set_start(key);
                }
            }
            "hikey" => {
                if let Some(key) = clamped_key(value) {
                    self.key_range.set_end(key);
                }
            }
            "key" => {
                if let Some(key) = clamped_key(value) {
                    self.key_range = Range::new(key, key);
                    self.pitch_keycenter = key;
                }
            }
            "lovel" => {
                if let Some(velocity) = clamped_u8(value, Range::new(0, 127)) {
                    self.velocity_range.set_start(velocity);
                }
            }
            "hivel" => {
                if let Some(velocity) = clamped_u8(value, Range::new(0, 127)) {
                    self.velocity_range.set_end(velocity);
                }
            }
            "lochan" => {
                if let Some(channel) = clamped_u8(value, Range::new(1, 16)) {
                    self.channel_range.set_start(channel);
                }
            }
            "hichan" => {
                if let Some(channel) = clamped_u8(value, Range::new(1, 16)) {
                    self.channel_range.set_end(channel);
                }
            }
            "lobend" => {
                if let Some(bend) = clamped_i32(value, Range::new(-8192, 8192)) {
                    self.bend_range.set_start(bend);
                }
            }
            "hibend" => {
                if let Some(bend) = clamped_i32(value, Range::new(-8192, 8192)) {
                    self.bend_range.set_end(bend);
                }
            }
            "locc" => {
                if let (Some(cc), Some(low)) =
                    (valid_cc(opcode), clamped_u8(value, Range::new(0, 127)))
                {
                    self.cc_condition_entry(cc).set_start(low);
                }
            }
            "hicc" => {
                if let (Some(cc), Some(high)) =
                    (valid_cc(opcode), clamped_u8(value, Range::new(0, 127)))
                {
                    self.cc_condition_entry(cc).set_end(high);
                }
            }
            "sw_lokey" => {
                if let Some(key) = clamped_key(value) {
                    self.keyswitch_range.set_start(key);
                }
            }
            "sw_hikey" => {
                if let Some(key) = clamped_key(value) {
                    self.keyswitch_range.set_end(key);
                }
            }
            "sw_last" => {
                if let Some(key) = clamped_key(value) {
                    self.keyswitch = Some(key);
                }
            }
            "sw_up" => {
                if let Some(key) = clamped_key(value) {
                    self.keyswitch_up = Some(key);
                }
            }
            "sw_down" => {
                if let Some(key) = clamped_key(value) {
                    self.keyswitch_down = Some(key);
                }
            }
            "sw_previous" => {
                if let Some(key) = clamped_key(value) {
                    self.previous_note = Some(key);
                }
            }
            "sw_vel" => match value {
                "current" => self.velocity_override = VelocityOverride::Current,
                "previous" => self.velocity_override = VelocityOverride::Previous,
                _ => debug!(value, "Unknown sw_vel value"),
            },
            "lochanaft" => {
                if let Some(aftertouch) = clamped_u8(value, Range::new(0, 127)) {
                    self.aftertouch_range.set_start(aftertouch);
                }
            }
            "hichanaft" => {
                if let Some(aftertouch) = clamped_u8(value, Range::new(0, 127)) {
                    self.aftertouch_range.set_end(aftertouch);
                }
            }
            "lobpm" => {
                if let Some(bpm) = clamped_f32(value, Range::new(0.0, 500.0)) {
                    self.bpm_range.set_start(bpm);
                }
            }
            "hibpm" => {
                if let Some(bpm) = clamped_f32(value, Range::new(0.0, 500.0)) {
                    self.bpm_range.set_end(bpm);
                }
            }
            "lorand" => {
                if let Some(rand) = clamped_f32(value, Range::new(0.0, 1.0)) {
                    self.rand_range.set_start(rand);
                }
            }
            "hirand" => {
                if let Some(rand) = clamped_f32(value, Range::new(0.0, 1.0)) {
                    self.rand_range.set_end(rand);
                }
            }
            "seq_length" => set_u8(&mut self.sequence_length, value, Range::new(1, 100)),
            "seq_position" => set_u8(&mut self.sequence_position, value, Range::new(1, 100)),
            "trigger" => match value {
                "attack" => self.trigger = Trigger::Attack,
                "release" => self.trigger = Trigger::Release,
                "release_key" => self.trigger = Trigger::ReleaseKey,
                "first" => self.trigger = Trigger::First,
                "legato" => self.trigger = Trigger::Legato,
                _ => debug!(value, "Unknown trigger value"),
            },
            "on_locc" => {
                if let (Some(cc), Some(low)) =
                    (valid_cc(opcode), clamped_u8(value, Range::new(0, 127)))
                {
                    self.cc_trigger_entry(cc).set_start(low);
                }
            }
            "on_hicc" => {
                if let (Some(cc), Some(high)) =
                    (valid_cc(opcode), clamped_u8(value, Range::new(0, 127)))
                {
                    self.cc_trigger_entry(cc).set_end(high);
                }
            }
            "volume" => set_f32(&mut self.volume, value, Range::new(-144.0, 6.0)),
            "amplitude" => set_f32(&mut self.amplitude, value, Range::new(0.0, 100.0)),
            "pan" => set_f32(&mut self.pan, value, Range::new(-100.0, 100.0)),
            "width" => set_f32(&mut self.width, value, Range::new(-100.0, 100.0)),
            "position" => set_f32(&mut self.position, value, Range::new(-100.0, 100.0)),
            "volume_oncc" => {
                set_cc_pair(&mut self.volume_cc, opcode, Range::new(-144.0, 6.0))
            }
            "amplitude_oncc" => {
                set_cc_pair(&mut self.amplitude_cc, opcode, Range::new(0.0, 100.0))
            }
            "pan_oncc" => set_cc_pair(&mut self.pan_cc, opcode, Range::new(-100.0, 100.0)),
            "width_oncc" => set_cc_pair(&mut self.width_cc, opcode, Range::new(-100.0, 100.0)),
            "position_oncc" => {
                set_cc_pair(&mut self.position_cc, opcode, Range::new(-100.0, 100.0))
            }
            "amp_keycenter" => {
                if let Some(key) = clamped_key(value) {
                    self.amp_keycenter = key;
                }
            }
            "amp_keytrack" => set_f32(&mut self.amp_keytrack, value, Range::new(-96.0, 12.0)),
            "amp_veltrack" => {
                set_f32(&mut self.amp_veltrack, value, Range::new(-100.0, 100.0))
            }
            "amp_random" => set_f32(&mut self.amp_random, value, Range::new(0.0, 24.0)),
            "amp_velcurve_" => {
                if let (Some(cc), Some(gain)) =
                    (valid_cc(opcode), clamped_f32(value, Range::new(0.0, 1.0)))
                {
                    self.velocity_points.push((cc, gain));
                }
            }
            "xfin_lokey" => {
                if let Some(key) = clamped_key(value) {
                    self.crossfade_key_in.set_start(key);
                }
            }
            "xfin_hikey" => {
                if let Some(key) = clamped_key(value) {
                    self.crossfade_key_in.set_end(key);
                }
            }
            "xfout_lokey" => {
                if let Some(key) = clamped_key(value) {
                    self.crossfade_key_out.set_start(key);
                }
            }
            "xfout_hikey" => {
                if let Some(key) = clamped_key(value) {
                    self.crossfade_key_out.set_end(key);
                }
            }
            "xfin_lovel" => {
                if let Some(velocity) = clamped_u8(value, Range::new(0, 127)) {
                    self.crossfade_vel_in.set_start(velocity);
                }
            }
            "xfin_hivel" => {
                if let Some(velocity) = clamped_u8(value, Range::new(0, 127)) {
                    self.crossfade_vel_in.set_end(velocity);
                }
            }
            "xfout_lovel" => {
                if let Some(velocity) = clamped_u8(value, Range::new(0, 127)) {
                    self.crossfade_vel_out.set_start(velocity);
                }
            }
            "xfout_hivel" => {
                if let Some(velocity) = clamped_u8(value, Range::new(0, 127)) {
                    self.crossfade_vel_out.set_end(velocity);
                }
            }
            "xf_keycurve" => match value {
                "power" => self.crossfade_key_curve = CrossfadeCurve::Power,
                "gain" => self.crossfade_key_curve = CrossfadeCurve::Gain,
                _ => debug!(value, "Unknown xf_keycurve value"),
            },
            "xf_velcurve" => match value {
                "power" => self.crossfade_vel_curve = CrossfadeCurve::Power,
                "gain" => self.crossfade_vel_curve = CrossfadeCurve::Gain,
                _ => debug!(value, "Unknown xf_velcurve value"),
            },
            "pitch_keycenter" => {
                if let Some(key) = clamped_key(value) {
                    self.pitch_keycenter = key;
                }
            }
            "pitch_keytrack" => {
                set_i32(&mut self.pitch_keytrack, value, Range::new(-1200, 1200))
            }
            "pitch_random" => set_i32(&mut self.pitch_random, value, Range::new(0, 9600)),
            "pitch_veltrack" => {
                set_i32(&mut self.pitch_veltrack, value, Range::new(-9600, 9600))
            }
            "transpose" => set_i32(&mut self.transpose, value, Range::new(-127, 127)),
            "tune" => set_i32(&mut self.tune, value, Range::new(-100, 100)),
            _ => self.unknown_opcodes.push(opcode.full_name()),
        }
    }

    /// Resolves the sample source, finalizes the velocity curve and
    /// initializes the activation flags against a blank MIDI state. Returns
    /// false if the sample file could not be preloaded; the region stays in
    /// the instrument and any voice started on it will stay silent.
    pub fn prepare(&mut self, pool: &mut SamplePool) -> bool {
        self.add_velocity_curve_endpoints();
        self.check_initial_conditions();
        self.prepared = true;

        if self.is_generator() || self.sample.is_empty() {
            return true;
        }

        let frames = self.sample_end.min(self.loop_range.end());
        match pool.preload(&self.sample, frames as usize) {
            Ok(preloaded) => {
                self.sample_rate = preloaded.sample_rate() as f64;
                self.num_channels = preloaded.source_channels();
                self.resolved_sample_path = Some(pool.resolve(&self.sample));
                self.preloaded_data = Some(preloaded);
                true
            }
            Err(e) => {
                warn!(sample = %self.sample, error = %e, "Failed to preload sample");
                false
            }
        }
    }

    pub fn is_generator(&self) -> bool {
        self.sample.starts_with('*')
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn is_release(&self) -> bool {
        self.trigger == Trigger::Release || self.trigger == Trigger::ReleaseKey
    }

    /// True if this region loops indefinitely. A region with a play count
    /// terminates through the count instead.
    pub fn should_loop(&self) -> bool {
        self.sample_count.is_none()
            && (self.loop_mode == LoopMode::LoopContinuous
                || self.loop_mode == LoopMode::LoopSustain)
    }

    /// The steady-state activation predicate: the conjunction of every
    /// incrementally maintained gating flag.
    pub fn is_switched_on(&self) -> bool {
        self.key_switched
            && self.previous_key_switched
            && self.sequence_switched
            && self.pitch_switched
            && self.bpm_switched
            && self.aftertouch_switched
            && self
                .cc_conditions
                .keys()
                .all(|cc| self.cc_switched[*cc as usize])
    }

    /// Handles a note-on. Returns true if the event triggers a new voice.
    /// The trigger decision is made against the flags as left by previous
    /// events; keyswitch, previous-note and round-robin state update after.
    pub fn register_note_on(
        &mut self,
        channel: u8,
        note: u8,
        velocity: u8,
        rand_value: f32,
    ) -> bool {
        let triggered = self.note_on_trigger(channel, note, velocity, rand_value);
        let was_switched_on = self.is_switched_on();

        if self.keyswitch_range.contains(note) {
            if let Some(last) = self.keyswitch {
                self.key_switched = note == last;
            }
            if self.keyswitch_down == Some(note) {
                self.key_switched = true;
            }
            if self.keyswitch_up == Some(note) {
                self.key_switched = false;
            }
        }
        if let Some(previous) = self.previous_note {
            self.previous_key_switched = note == previous;
        }

        if self.channel_range.contains(channel) && self.key_range.contains(note) {
            self.sequence_counter += 1;
            self.sequence_switched = self.sequence_counter % self.sequence_length as u32
                == self.sequence_position as u32 - 1;
            self.active_notes_in_range += 1;
            if was_switched_on && self.velocity_range.contains(velocity) {
                self.notes_on[note as usize] = true;
            }
        }

        self.last_note_velocities[note as usize] = velocity;
        self.previous_velocity = velocity;
        triggered
    }

    fn note_on_trigger(&self, channel: u8, note: u8, velocity: u8, rand_value: f32) -> bool {
        if !self.is_switched_on() {
            return false;
        }
        if !self.channel_range.contains(channel)
            || !self.key_range.contains(note)
            || !self.velocity_range.contains(velocity)
            || !self.rand_range.contains(rand_value)
        {
            return false;
        }
        match self.trigger {
            Trigger::Release | Trigger::ReleaseKey => false,
            Trigger::First => self.active_notes_in_range == 0,
            Trigger::Legato => self.active_notes_in_range > 0,
            Trigger::Attack => true,
        }
    }

    /// Handles a note-off. Returns true if a release voice should start.
    /// A `release` trigger held back by the sustain pedal is queued; see
    /// `take_pending_releases`.
    pub fn register_note_off(
        &mut self,
        channel: u8,
        note: u8,
        velocity: u8,
        rand_value: f32,
    ) -> bool {
        let mut triggered = false;

        if self.channel_range.contains(channel) && self.key_range.contains(note) {
            if self.notes_on[note as usize] && self.rand_range.contains(rand_value) {
                match self.trigger {
                    Trigger::ReleaseKey => triggered = true,
                    Trigger::Release => {
                        if self.sustain_pedal >= 64 {
                            self.pending_releases.push((note, velocity));
                        } else {
                            triggered = true;
                        }
                    }
                    _ => {}
                }
            }
            self.notes_on[note as usize] = false;
            self.active_notes_in_range = self.active_notes_in_range.saturating_sub(1);
        }

        if self.keyswitch_range.contains(note) {
            if self.keyswitch_down == Some(note) {
                self.key_switched = false;
            }
            if self.keyswitch_up == Some(note) {
                self.key_switched = true;
            }
        }

        triggered
    }

    /// Handles a controller event: updates controller gating and the sustain
    /// pedal, and returns true when an on-controller trigger range is
    /// entered (edge-triggered).
    pub fn register_cc(&mut self, channel: u8, cc: u8, value: u8) -> bool {
        if !self.channel_range.contains(channel) {
            return false;
        }

        if cc == 64 {
            self.sustain_pedal = value;
        }

        if let Some(range) = self.cc_conditions.get(&cc) {
            self.cc_switched[cc as usize] = range.contains(value);
        }

        if let Some(range) = self.cc_triggers.get(&cc) {
            let was_in_range = self.cc_trigger_armed[cc as usize];
            let in_range = range.contains(value);
            self.cc_trigger_armed[cc as usize] = in_range;
            return in_range && !was_in_range;
        }

        false
    }

    pub fn register_pitch_wheel(&mut self, channel: u8, bend: i32) {
        if self.channel_range.contains(channel) {
            self.pitch_switched = self.bend_range.contains(bend);
        }
    }

    pub fn register_aftertouch(&mut self, channel: u8, aftertouch: u8) {
        if self.channel_range.contains(channel) {
            self.aftertouch_switched = self.aftertouch_range.contains(aftertouch);
        }
    }

    pub fn register_tempo(&mut self, seconds_per_quarter: f32) {
        if seconds_per_quarter > 0.0 {
            let bpm = 60.0 / seconds_per_quarter;
            self.bpm_switched = self.bpm_range.contains(bpm);
        }
    }

    /// Drains note-offs queued while the sustain pedal was down. The synth
    /// calls this when controller 64 drops below 64 and starts a release
    /// voice for each entry.
    pub fn take_pending_releases(&mut self) -> Vec<(u8, u8)> {
        std::mem::take(&mut self.pending_releases)
    }

    /// The region's base gain: volume plus a random amplitude spread, scaled
    /// by the amplitude percentage.
    pub fn base_gain(&self) -> f32 {
        let mut db = self.volume;
        if self.amp_random > 0.0 {
            db += rand::thread_rng().gen_range(-self.amp_random..=self.amp_random);
        }
        db_to_gain(db) * self.amplitude / 100.0
    }

    /// The velocity-dependent gain: the custom velocity curve when present,
    /// otherwise the standard power curve scaled by `amp_veltrack`.
    pub fn velocity_gain(&self, velocity: u8) -> f32 {
        if self.velocity_points.is_empty() {
            let track = self.amp_veltrack / 100.0;
            if track == 0.0 {
                return 1.0;
            }
            let position = if track >= 0.0 {
                velocity as f32 / 127.0
            } else {
                (127 - velocity) as f32 / 127.0
            };
            let db = 40.0 * position.max(1.0 / 127.0).log10() * track.abs();
            return db_to_gain(db);
        }

        // The curve is sorted with endpoints added at prepare time.
        let mut previous = self.velocity_points[0];
        for &point in &self.velocity_points {
            if point.0 >= velocity {
                if point.0 == previous.0 {
                    return point.1;
                }
                let t = (velocity - previous.0) as f32 / (point.0 - previous.0) as f32;
                return previous.1 + t * (point.1 - previous.1);
            }
            previous = point;
        }
        previous.1
    }

    /// Per-note gain: velocity gain, amplitude key tracking, and the key and
    /// velocity crossfades.
    pub fn note_gain(&self, note: u8, velocity: u8) -> f32 {
        let velocity = match self.velocity_override {
            VelocityOverride::Current => velocity,
            VelocityOverride::Previous => self.previous_velocity,
        };

        let mut gain = if self.trigger == Trigger::ReleaseKey {
            self.velocity_gain(self.last_note_velocities[note as usize])
        } else {
            self.velocity_gain(velocity)
        };

        gain *= db_to_gain(self.amp_keytrack * (note as f32 - self.amp_keycenter as f32));
        gain *= crossfade_in(self.crossfade_key_in, note, self.crossfade_key_curve);
        gain *= crossfade_out(self.crossfade_key_out, note, self.crossfade_key_curve);
        gain *= crossfade_in(self.crossfade_vel_in, velocity, self.crossfade_vel_curve);
        gain *= crossfade_out(self.crossfade_vel_out, velocity, self.crossfade_vel_curve);
        gain
    }

    /// The pitch ratio for a note: key tracking from the pitch keycenter,
    /// tuning, transposition, velocity tracking and the random pitch spread.
    pub fn pitch_variation(&self, note: u8, velocity: u8) -> f32 {
        let mut cents =
            self.pitch_keytrack as f32 * (note as f32 - self.pitch_keycenter as f32);
        cents += self.tune as f32;
        cents += 100.0 * self.transpose as f32;
        cents += normalize_midi(velocity) * self.pitch_veltrack as f32;
        if self.pitch_random > 0 {
            cents += rand::thread_rng()
                .gen_range(-(self.pitch_random as f32)..=self.pitch_random as f32);
        }
        cents_to_ratio(cents)
    }

    /// The controller condition range for a controller, defaulted to the
    /// full range when the region has no condition on it.
    pub fn cc_condition(&self, cc: u8) -> Range<u8> {
        self.cc_conditions
            .get(&cc)
            .copied()
            .unwrap_or(Range::new(0, 127))
    }

    fn cc_condition_entry(&mut self, cc: u8) -> &mut Range<u8> {
        self.cc_conditions.entry(cc).or_insert(Range::new(0, 127))
    }

    fn cc_trigger_entry(&mut self, cc: u8) -> &mut Range<u8> {
        self.cc_triggers.entry(cc).or_insert(Range::new(0, 127))
    }

    /// Evaluates every gating dimension against a blank MIDI state once;
    /// later events update the flags incrementally.
    fn check_initial_conditions(&mut self) {
        self.key_switched = self.keyswitch.is_none() && self.keyswitch_down.is_none();
        self.previous_key_switched = self.previous_note.is_none();
        self.sequence_switched = self.sequence_position == 1;
        self.pitch_switched = self.bend_range.contains(0);
        self.bpm_switched = self.bpm_range.contains(0.0);
        self.aftertouch_switched = self.aftertouch_range.contains(0);
        for (cc, range) in &self.cc_conditions {
            self.cc_switched[*cc as usize] = range.contains(0);
        }
    }

    /// Sorts the custom velocity curve and anchors it at zero and full
    /// velocity so interpolation is total.
    fn add_velocity_curve_endpoints(&mut self) {
        if self.velocity_points.is_empty() {
            return;
        }
        self.velocity_points.sort_by_key(|point| point.0);
        if self.velocity_points[0].0 > 0 {
            self.velocity_points.insert(0, (0, 0.0));
        }
        if self.velocity_points[self.velocity_points.len() - 1].0 < 127 {
            self.velocity_points.push((127, 1.0));
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sample={} key=[{}, {}] vel=[{}, {}] volume={:.1}dB trigger={:?} group={}",
            if self.sample.is_empty() {
                "<none>"
            } else {
                &self.sample
            },
            self.key_range.start(),
            self.key_range.end(),
            self.velocity_range.start(),
            self.velocity_range.end(),
            self.volume,
            self.trigger,
            self.group,
        )
    }
}

fn crossfade_in(range: Range<u8>, value: u8, curve: CrossfadeCurve) -> f32 {
    if value < range.start() {
        0.0
    } else if value < range.end() {
        let position =
            (value - range.start()) as f32 / (range.end() - range.start()) as f32;
        match curve {
            CrossfadeCurve::Power => position.sqrt(),
            CrossfadeCurve::Gain => position,
        }
    } else {
        1.0
    }
}

fn crossfade_out(range: Range<u8>, value: u8, curve: CrossfadeCurve) -> f32 {
    if value > range.end() {
        0.0
    } else if value > range.start() {
        let position =
            (value - range.start()) as f32 / (range.end() - range.start()) as f32;
        match curve {
            CrossfadeCurve::Power => (1.0 - position).sqrt(),
            CrossfadeCurve::Gain => 1.0 - position,
        }
    } else {
        1.0
    }
}

fn valid_cc(opcode: &Opcode) -> Option<u8> {
    opcode.parameter.filter(|p| *p <= 127).map(|p| p as u8)
}

fn parse_i64(value: &str) -> Option<i64> {
    value.trim().parse().ok()
}

fn parse_f32(value: &str) -> Option<f32> {
    value.trim().parse().ok()
}

fn clamped_u8(value: &str, range: Range<u8>) -> Option<u8> {
    let parsed = parse_i64(value)?;
    let clamped = parsed.clamp(range.start() as i64, range.end() as i64);
    Some(clamped as u8)
}

fn clamped_u32(value: &str, range: Range<u32>) -> Option<u32> {
    let parsed = parse_i64(value)?;
    let clamped = parsed.clamp(range.start() as i64, range.end() as i64);
    Some(clamped as u32)
}

fn clamped_i32(value: &str, range: Range<i32>) -> Option<i32> {
    let parsed = parse_i64(value)?;
    let clamped = parsed.clamp(range.start() as i64, range.end() as i64);
    Some(clamped as i32)
}

fn clamped_f32(value: &str, range: Range<f32>) -> Option<f32> {
    Some(range.clamp(parse_f32(value)?))
}

/// Parses numeric or note-name key values, clamped to the MIDI range.
pub(crate) fn clamped_key(value: &str) -> Option<u8> {
    let parsed = parse_i64(value).or_else(|| parse_note_name(value.trim()))?;
    Some(parsed.clamp(0, 127) as u8)
}

fn set_u8(target: &mut u8, value: &str, range: Range<u8>) {
    if let Some(parsed) = clamped_u8(value, range) {
        *target = parsed;
    }
}

fn set_u32(target: &mut u32, value: &str, range: Range<u32>) {
    if let Some(parsed) = clamped_u32(value, range) {
        *target = parsed;
    }
}

fn set_i32(target: &mut i32, value: &str, range: Range<i32>) {
    if let Some(parsed) = clamped_i32(value, range) {
        *target = parsed;
    }
}

fn set_f32(target: &mut f32, value: &str, range: Range<f32>) {
    if let Some(parsed) = clamped_f32(value, range) {
        *target = parsed;
    }
}

fn set_cc_pair(target: &mut Option<CcPair>, opcode: &Opcode, range: Range<f32>) {
    if let (Some(cc), Some(depth)) =
        (valid_cc(opcode), clamped_f32(&opcode.value, range))
    {
        *target = Some((cc, depth));
    }
}

/// Applies one envelope-generator opcode (the part after the `ampeg_` /
/// `pitcheg_` / `fileg_` prefix). Returns false for unrecognized stages.
/// `depth` and `vel2depth` are ignored for the amplitude EG.
fn parse_eg_opcode(
    description: &mut EgDescription,
    stage: &str,
    opcode: &Opcode,
    is_amplitude: bool,
) -> bool {
    let value = opcode.value.as_str();
    let time_range = Range::new(0.0, 100.0);
    let percent_range = Range::new(0.0, 100.0);
    let vel2_range = Range::new(-100.0, 100.0);
    let depth_range = Range::new(-12000.0, 12000.0);

    match stage {
        "delay" => set_f32(&mut description.delay, value, time_range),
        "attack" => set_f32(&mut description.attack, value, time_range),
        "hold" => set_f32(&mut description.hold, value, time_range),
        "decay" => set_f32(&mut description.decay, value, time_range),
        "release" => set_f32(&mut description.release, value, time_range),
        "start" => set_f32(&mut description.start, value, percent_range),
        "sustain" => set_f32(&mut description.sustain, value, percent_range),
        "depth" => {
            if !is_amplitude {
                set_f32(&mut description.depth, value, depth_range);
            }
        }
        "vel2delay" => set_f32(&mut description.vel2delay, value, vel2_range),
        "vel2attack" => set_f32(&mut description.vel2attack, value, vel2_range),
        "vel2hold" => set_f32(&mut description.vel2hold, value, vel2_range),
        "vel2decay" => set_f32(&mut description.vel2decay, value, vel2_range),
        "vel2release" => set_f32(&mut description.vel2release, value, vel2_range),
        "vel2sustain" => set_f32(&mut description.vel2sustain, value, vel2_range),
        "vel2depth" => {
            if !is_amplitude {
                set_f32(&mut description.vel2depth, value, depth_range);
            }
        }
        "delay_oncc" => set_cc_pair(&mut description.cc_delay, opcode, vel2_range),
        "attack_oncc" => set_cc_pair(&mut description.cc_attack, opcode, vel2_range),
        "hold_oncc" => set_cc_pair(&mut description.cc_hold, opcode, vel2_range),
        "decay_oncc" => set_cc_pair(&mut description.cc_decay, opcode, vel2_range),
        "release_oncc" => set_cc_pair(&mut description.cc_release, opcode, vel2_range),
        "start_oncc" => set_cc_pair(&mut description.cc_start, opcode, vel2_range),
        "sustain_oncc" => set_cc_pair(&mut description.cc_sustain, opcode, vel2_range),
        _ => return false,
    }
    true
}
