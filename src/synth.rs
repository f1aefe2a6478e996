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

//! The synth coordinator.
//!
//! Owns the region list (in load order), the fixed voice pool and the MIDI
//! controller state. Incoming events are broadcast to regions (updating their
//! activation state and collecting triggers) and to voices; triggered regions
//! are bound to idle voices. `render_block` renders every voice into a
//! scratch block and sums it into the host output.

use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::audio::StereoBlock;
use crate::parser::{Opcode, ParseError, SfzParser, Token};
use crate::region::{clamped_key, Region, Trigger};
use crate::sample::{SampleLoader, SamplePool};
use crate::voice::Voice;

/// Size of the fixed voice pool.
pub const NUM_VOICES: usize = 64;

/// Number of background sample loader threads.
const LOADER_THREADS: usize = 2;

pub const DEFAULT_SAMPLE_RATE: f64 = 44100.0;
pub const DEFAULT_SAMPLES_PER_BLOCK: usize = 1024;

/// Error type for instrument loading.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("sfz file not found: {0}")]
    FileNotFound(PathBuf),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// The header currently receiving opcodes during a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    None,
    Global,
    Control,
    Master,
    Group,
    Region,
    Curve,
    Effect,
}

pub struct Synth {
    regions: Vec<Region>,
    voices: Vec<Voice>,
    cc_state: [u8; 128],
    cc_labels: Vec<(u8, String)>,
    default_switch: Option<u8>,
    root_directory: PathBuf,
    pool: SamplePool,
    loader: SampleLoader,
    sample_rate: f64,
    samples_per_block: usize,
    scratch: StereoBlock,
    num_masters: usize,
    num_groups: usize,
}

impl Default for Synth {
    fn default() -> Self {
        Self::new()
    }
}

impl Synth {
    pub fn new() -> Self {
        let loader = SampleLoader::new(LOADER_THREADS);
        let mut voices: Vec<Voice> =
            (0..NUM_VOICES).map(|_| Voice::new(loader.sender())).collect();
        for voice in &mut voices {
            voice.prepare_to_play(DEFAULT_SAMPLE_RATE, DEFAULT_SAMPLES_PER_BLOCK);
        }

        Self {
            regions: Vec::new(),
            voices,
            cc_state: [0; 128],
            cc_labels: Vec::new(),
            default_switch: None,
            root_directory: PathBuf::from("."),
            pool: SamplePool::new(Path::new(".")),
            loader,
            sample_rate: DEFAULT_SAMPLE_RATE,
            samples_per_block: DEFAULT_SAMPLES_PER_BLOCK,
            scratch: StereoBlock::new(DEFAULT_SAMPLES_PER_BLOCK),
            num_masters: 0,
            num_groups: 0,
        }
    }

    /// Configures the render format. Must be called before rendering; safe to
    /// call again on format changes (all voices reset).
    pub fn prepare_to_play(&mut self, sample_rate: f64, samples_per_block: usize) {
        self.sample_rate = sample_rate;
        self.samples_per_block = samples_per_block;
        self.scratch.resize(samples_per_block);
        for voice in &mut self.voices {
            voice.prepare_to_play(sample_rate, samples_per_block);
        }
    }

    /// Loads an SFZ instrument, replacing any previous state. Regions are
    /// primed against the current controller state and the `sw_default`
    /// keyswitch before the call returns.
    pub fn load_sfz(&mut self, path: &Path) -> Result<(), LoadError> {
        self.clear();

        if !path.exists() {
            return Err(LoadError::FileNotFound(path.to_path_buf()));
        }
        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        self.pool.set_root_directory(&root);

        let mut parser = SfzParser::new(&root);
        let tokens = parser.parse_file(path)?;
        self.root_directory = root;

        let mut global_members: Vec<Opcode> = Vec::new();
        let mut master_members: Vec<Opcode> = Vec::new();
        let mut group_members: Vec<Opcode> = Vec::new();
        let mut region_members: Vec<Opcode> = Vec::new();
        let mut scope = Scope::None;
        let mut region_started = false;
        let mut has_global = false;
        let mut has_control = false;

        for token in tokens {
            match token {
                Token::Header(name) => {
                    if region_started {
                        self.build_region(
                            &global_members,
                            &master_members,
                            &group_members,
                            &region_members,
                        );
                        region_members.clear();
                        region_started = false;
                    }
                    scope = match name.as_str() {
                        "global" => {
                            if has_global {
                                warn!("Multiple <global> headers in file");
                            }
                            has_global = true;
                            Scope::Global
                        }
                        "control" => {
                            if has_control {
                                warn!("Multiple <control> headers in file");
                            }
                            has_control = true;
                            Scope::Control
                        }
                        "master" => {
                            self.num_masters += 1;
                            master_members.clear();
                            group_members.clear();
                            Scope::Master
                        }
                        "group" => {
                            self.num_groups += 1;
                            group_members.clear();
                            Scope::Group
                        }
                        "region" => {
                            region_started = true;
                            Scope::Region
                        }
                        "curve" => {
                            debug!("<curve> header not implemented");
                            Scope::Curve
                        }
                        "effect" => {
                            debug!("<effect> header not implemented");
                            Scope::Effect
                        }
                        other => {
                            debug!(header = other, "Unknown header");
                            Scope::None
                        }
                    };
                }
                Token::Opcode(opcode) => match scope {
                    Scope::Global => {
                        if opcode.name == "sw_default" {
                            self.default_switch = clamped_key(&opcode.value);
                        } else {
                            global_members.push(opcode);
                        }
                    }
                    Scope::Control => self.parse_control_opcode(&opcode),
                    Scope::Master => master_members.push(opcode),
                    Scope::Group => group_members.push(opcode),
                    Scope::Region => region_members.push(opcode),
                    // Collected but not executed.
                    Scope::Curve | Scope::Effect => {}
                    Scope::None => {
                        debug!(opcode = %opcode.full_name(), "Opcode outside any header")
                    }
                },
            }
        }
        if region_started {
            self.build_region(
                &global_members,
                &master_members,
                &group_members,
                &region_members,
            );
        }

        self.cc_labels.sort_by_key(|(cc, _)| *cc);

        // Prime each region: resolve its sample, replay the controller state
        // and press the default keyswitch once.
        for index in 0..self.regions.len() {
            self.regions[index].prepare(&mut self.pool);
            let channel = self.regions[index].channel_range.start();
            for cc in 1..128u8 {
                let value = self.cc_state[cc as usize];
                self.regions[index].register_cc(channel, cc, value);
            }
            if let Some(switch) = self.default_switch {
                self.regions[index].register_note_on(channel, switch, 127, 1.0);
                self.regions[index].register_note_off(channel, switch, 0, 1.0);
            }
        }

        info!(
            regions = self.regions.len(),
            masters = self.num_masters,
            groups = self.num_groups,
            preload_kb = self.pool.total_memory_usage() / 1024,
            "Loaded SFZ instrument"
        );
        Ok(())
    }

    fn build_region(
        &mut self,
        global_members: &[Opcode],
        master_members: &[Opcode],
        group_members: &[Opcode],
        region_members: &[Opcode],
    ) {
        let mut region = Region::new();
        for opcode in global_members
            .iter()
            .chain(master_members)
            .chain(group_members)
            .chain(region_members)
        {
            region.parse_opcode(opcode);
        }
        self.regions.push(region);
    }

    fn parse_control_opcode(&mut self, opcode: &Opcode) {
        match opcode.name.as_str() {
            "set_cc" => {
                if let (Some(cc), Ok(value)) =
                    (opcode.parameter.filter(|p| *p <= 127), opcode.value.parse::<i64>())
                {
                    self.cc_state[cc as usize] = value.clamp(0, 127) as u8;
                }
            }
            "label_cc" => {
                if let Some(cc) = opcode.parameter.filter(|p| *p <= 127) {
                    self.cc_labels.push((cc as u8, opcode.value.clone()));
                }
            }
            "default_path" => {
                let normalized = opcode.value.replace('\\', "/");
                self.pool
                    .set_root_directory(&self.root_directory.join(normalized));
            }
            other => {
                debug!(opcode = other, "Unknown opcode in <control> header")
            }
        }
    }

    /// Clears the instrument: regions, labels, voices, preloads and the MIDI
    /// state vector.
    pub fn clear(&mut self) {
        self.regions.clear();
        self.cc_labels.clear();
        self.default_switch = None;
        for voice in &mut self.voices {
            voice.reset();
        }
        self.pool.clear();
        self.cc_state = [0; 128];
        self.num_masters = 0;
        self.num_groups = 0;
    }

    /// Stops the background loader workers. Bounded wait; a wedged load is
    /// fatal.
    pub fn shutdown(&mut self) {
        self.loader.shutdown();
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn get_region_view(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)
    }

    pub fn num_masters(&self) -> usize {
        self.num_masters
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    /// All distinct unknown opcodes found across regions, in first-seen order.
    pub fn unknown_opcodes(&self) -> Vec<String> {
        let mut unknown: Vec<String> = Vec::new();
        for region in &self.regions {
            for opcode in &region.unknown_opcodes {
                if !unknown.contains(opcode) {
                    unknown.push(opcode.clone());
                }
            }
        }
        unknown
    }

    /// Controller labels from `label_ccN`, sorted by controller number.
    pub fn cc_labels(&self) -> &[(u8, String)] {
        &self.cc_labels
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| !v.is_free()).count()
    }

    fn free_voice(&self) -> Option<usize> {
        self.voices.iter().position(|v| v.is_free())
    }

    /// Handles a note-on: updates every region's activation state, releases
    /// off-group voices for triggered regions and binds idle voices.
    pub fn register_note_on(&mut self, channel: u8, note: u8, velocity: u8, timestamp: usize) {
        // One random value per event so all regions see the same sample from
        // their rand range (round-robin splits stay disjoint).
        let rand_value: f32 = rand::thread_rng().gen();

        for index in 0..self.regions.len() {
            if self.regions[index].register_note_on(channel, note, velocity, rand_value) {
                let group = self.regions[index].group;
                for v in 0..self.voices.len() {
                    if let Some(voice_region) = self.voices[v].region_index() {
                        self.voices[v].check_off_group(
                            &self.regions[voice_region],
                            group,
                            timestamp,
                        );
                    }
                }
                match self.free_voice() {
                    Some(free) => self.voices[free].start_with_note(
                        index,
                        &self.regions[index],
                        channel,
                        note,
                        velocity,
                        timestamp,
                        &self.cc_state,
                    ),
                    None => debug!(note, "No idle voice, dropping note"),
                }
            }
        }
    }

    /// Handles a note-off: fires release-triggered regions and forwards the
    /// note-off to every voice.
    pub fn register_note_off(&mut self, channel: u8, note: u8, velocity: u8, timestamp: usize) {
        let rand_value: f32 = rand::thread_rng().gen();

        for index in 0..self.regions.len() {
            if self.regions[index].register_note_off(channel, note, velocity, rand_value) {
                match self.free_voice() {
                    Some(free) => self.voices[free].start_with_note(
                        index,
                        &self.regions[index],
                        channel,
                        note,
                        velocity,
                        timestamp,
                        &self.cc_state,
                    ),
                    None => debug!(note, "No idle voice, dropping release"),
                }
            }
        }

        for v in 0..self.voices.len() {
            if let Some(voice_region) = self.voices[v].region_index() {
                self.voices[v].register_note_off(
                    &self.regions[voice_region],
                    channel,
                    note,
                    timestamp,
                    &self.cc_state,
                );
            }
        }
    }

    /// Handles a controller change: updates the controller vector and region
    /// gating, starts on-controller voices, fires releases queued behind the
    /// sustain pedal, and forwards the event to every voice.
    pub fn register_cc(&mut self, channel: u8, cc: u8, value: u8, timestamp: usize) {
        self.cc_state[cc as usize] = value;
        let pedal_released = cc == 64 && value < 64;

        for index in 0..self.regions.len() {
            if self.regions[index].register_cc(channel, cc, value) {
                match self.free_voice() {
                    Some(free) => self.voices[free].start_with_cc(
                        index,
                        &self.regions[index],
                        channel,
                        cc,
                        value,
                        timestamp,
                        &self.cc_state,
                    ),
                    None => debug!(cc, "No idle voice, dropping controller trigger"),
                }
            }

            if pedal_released && self.regions[index].trigger == Trigger::Release {
                for (note, velocity) in self.regions[index].take_pending_releases() {
                    match self.free_voice() {
                        Some(free) => self.voices[free].start_with_note(
                            index,
                            &self.regions[index],
                            channel,
                            note,
                            velocity,
                            timestamp,
                            &self.cc_state,
                        ),
                        None => debug!(note, "No idle voice, dropping queued release"),
                    }
                }
            }
        }

        for v in 0..self.voices.len() {
            if let Some(voice_region) = self.voices[v].region_index() {
                self.voices[v].register_cc(
                    &self.regions[voice_region],
                    channel,
                    cc,
                    value,
                    timestamp,
                    &self.cc_state,
                );
            }
        }
    }

    /// Handles a pitch wheel change. No triggers; region predicates update.
    pub fn register_pitch_wheel(&mut self, channel: u8, bend: i32, _timestamp: usize) {
        for region in &mut self.regions {
            region.register_pitch_wheel(channel, bend);
        }
    }

    /// Handles channel aftertouch. No triggers; region predicates update.
    pub fn register_aftertouch(&mut self, channel: u8, aftertouch: u8, _timestamp: usize) {
        for region in &mut self.regions {
            region.register_aftertouch(channel, aftertouch);
        }
    }

    /// Handles a tempo change, in seconds per quarter note.
    pub fn register_tempo(&mut self, seconds_per_quarter: f32, _timestamp: usize) {
        for region in &mut self.regions {
            region.register_tempo(seconds_per_quarter);
        }
    }

    /// Renders every voice and sums the results into
    /// `output[start .. start + num_samples]`.
    pub fn render_block(&mut self, output: &mut StereoBlock, start: usize, num_samples: usize) {
        let num_samples = num_samples.min(self.scratch.frames());
        for v in 0..self.voices.len() {
            self.voices[v].render_block(&self.regions, &mut self.scratch, num_samples);
            output.add_range(&self.scratch, start, num_samples);
        }
    }
}
