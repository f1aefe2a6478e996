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

//! A voice: one sounding instance of a region.
//!
//! Voices live in a fixed pool owned by the synth and are reused across
//! notes. A playing voice resamples its source with linear interpolation,
//! applies the amplitude EG and the controller envelopes, and renders into a
//! stereo block. Sample data arrives asynchronously through a `LoadSlot`;
//! until it does, the voice reads from the region's preloaded prefix.

use std::f32::consts::TAU;
use std::sync::Arc;

use crossbeam_channel::Sender;
use rand::Rng;
use tracing::{debug, warn};

use crate::audio::StereoBlock;
use crate::envelope::{AmpEg, BlockEnvelope, Transform};
use crate::region::{LoopMode, OffMode, Region};
use crate::sample::pool::PRELOAD_FRAMES;
use crate::sample::{AudioData, LoadJob, LoadSlot};
use crate::util::note_to_hertz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Playing,
    Release,
}

#[derive(Debug)]
pub struct Voice {
    state: VoiceState,
    region_index: Option<usize>,
    triggering_note: Option<u8>,
    triggering_cc: Option<u8>,
    triggering_channel: Option<u8>,
    note_is_off: bool,

    pitch_ratio: f32,
    speed_ratio: f32,
    base_gain: f32,
    initial_delay: usize,
    source_position: usize,
    decimal_position: f32,
    loop_count: u32,

    sample_rate: f64,

    amplitude_envelope: BlockEnvelope,
    pan_envelope: BlockEnvelope,
    position_envelope: BlockEnvelope,
    width_envelope: BlockEnvelope,
    amp_eg: AmpEg,

    preloaded_data: Option<Arc<AudioData>>,
    file_data: Option<Arc<AudioData>>,
    load_slot: Option<Arc<LoadSlot>>,
    data_ready: bool,

    job_tx: Sender<LoadJob>,

    envelope_scratch: Vec<f32>,
    pan_scratch: Vec<f32>,
    position_scratch: Vec<f32>,
}

impl Voice {
    pub fn new(job_tx: Sender<LoadJob>) -> Self {
        Self {
            state: VoiceState::Idle,
            region_index: None,
            triggering_note: None,
            triggering_cc: None,
            triggering_channel: None,
            note_is_off: false,
            pitch_ratio: 1.0,
            speed_ratio: 1.0,
            base_gain: 1.0,
            initial_delay: 0,
            source_position: 0,
            decimal_position: 0.0,
            loop_count: 0,
            sample_rate: 44100.0,
            amplitude_envelope: BlockEnvelope::new(0),
            pan_envelope: BlockEnvelope::new(0),
            position_envelope: BlockEnvelope::new(0),
            width_envelope: BlockEnvelope::new(0),
            amp_eg: AmpEg::new(44100.0),
            preloaded_data: None,
            file_data: None,
            load_slot: None,
            data_ready: false,
            job_tx,
            envelope_scratch: Vec::new(),
            pan_scratch: Vec::new(),
            position_scratch: Vec::new(),
        }
    }

    pub fn prepare_to_play(&mut self, sample_rate: f64, samples_per_block: usize) {
        self.sample_rate = sample_rate;
        self.amp_eg.set_sample_rate(sample_rate);
        self.amplitude_envelope.reserve(samples_per_block);
        self.pan_envelope.reserve(samples_per_block);
        self.position_envelope.reserve(samples_per_block);
        self.width_envelope.reserve(samples_per_block);
        self.envelope_scratch.resize(samples_per_block, 0.0);
        self.pan_scratch.resize(samples_per_block, 0.0);
        self.position_scratch.resize(samples_per_block, 0.0);
        self.reset();
    }

    pub fn is_free(&self) -> bool {
        self.state == VoiceState::Idle
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn region_index(&self) -> Option<usize> {
        self.region_index
    }

    pub fn triggering_note(&self) -> Option<u8> {
        self.triggering_note
    }

    pub fn triggering_cc(&self) -> Option<u8> {
        self.triggering_cc
    }

    pub fn triggering_channel(&self) -> Option<u8> {
        self.triggering_channel
    }

    /// Binds the region and starts playback for a note. The voice must be
    /// idle. `sample_delay` is the event timestamp within the next block; the
    /// voice first sounds at that sample.
    pub fn start_with_note(
        &mut self,
        region_index: usize,
        region: &Region,
        channel: u8,
        note: u8,
        velocity: u8,
        sample_delay: usize,
        cc_state: &[u8; 128],
    ) {
        debug_assert!(self.is_free());
        self.common_start(region_index, region, sample_delay);
        self.triggering_note = Some(note);
        self.triggering_channel = Some(channel);
        self.pitch_ratio = region.pitch_variation(note, velocity);
        self.base_gain *= region.note_gain(note, velocity);
        self.init_controller_envelopes(region, cc_state);
        self.amp_eg
            .prepare(&region.amplitude_eg, cc_state, velocity, sample_delay);
    }

    /// Binds the region and starts playback for an on-controller trigger.
    /// The controller value stands in for a velocity.
    pub fn start_with_cc(
        &mut self,
        region_index: usize,
        region: &Region,
        channel: u8,
        cc: u8,
        value: u8,
        sample_delay: usize,
        cc_state: &[u8; 128],
    ) {
        debug_assert!(self.is_free());
        self.common_start(region_index, region, sample_delay);
        self.triggering_cc = Some(cc);
        self.triggering_channel = Some(channel);
        self.init_controller_envelopes(region, cc_state);
        self.amp_eg
            .prepare(&region.amplitude_eg, cc_state, value, sample_delay);
    }

    fn common_start(&mut self, region_index: usize, region: &Region, sample_delay: usize) {
        debug!(sample = %region.sample, "Starting voice");
        let mut rng = rand::thread_rng();

        self.state = VoiceState::Playing;
        self.region_index = Some(region_index);
        self.note_is_off = false;
        self.loop_count = 0;
        self.decimal_position = 0.0;
        self.pitch_ratio = 1.0;
        self.speed_ratio = (region.sample_rate / self.sample_rate) as f32;
        self.base_gain = region.base_gain();

        self.source_position = region.offset as usize;
        if region.offset_random > 0 {
            self.source_position += rng.gen_range(0..region.offset_random) as usize;
        }

        self.initial_delay = sample_delay;
        if region.delay > 0.0 {
            self.initial_delay += (region.delay as f64 * self.sample_rate) as usize;
        }
        if region.delay_random > 0.0 {
            let delay_random = (region.delay_random as f64 * self.sample_rate) as usize;
            if delay_random > 0 {
                self.initial_delay += rng.gen_range(0..delay_random);
            }
        }

        self.preloaded_data = region.preloaded_data.clone();
        self.file_data = None;
        self.data_ready = false;

        if region.is_generator() {
            return;
        }
        let Some(preloaded) = &self.preloaded_data else {
            // Missing sample: the voice stays silent until released.
            return;
        };

        let wanted = region.sample_end.min(region.loop_range.end()) as usize;
        if preloaded.frames() >= wanted || preloaded.frames() < PRELOAD_FRAMES {
            // The prefix already covers the playable span.
            self.file_data = self.preloaded_data.clone();
            self.data_ready = true;
        } else if let Some(path) = &region.resolved_sample_path {
            let slot = Arc::new(LoadSlot::new());
            let job = LoadJob::Load {
                slot: slot.clone(),
                path: path.clone(),
                frames: wanted,
            };
            match self.job_tx.try_send(job) {
                Ok(()) => self.load_slot = Some(slot),
                Err(_) => {
                    warn!(sample = %region.sample, "Load queue full, staying on preloaded prefix")
                }
            }
        }
    }

    fn init_controller_envelopes(&mut self, region: &Region, cc_state: &[u8; 128]) {
        if let Some((cc, depth)) = region.amplitude_cc {
            self.amplitude_envelope.set_transform(Transform::Amplitude {
                base: self.base_gain,
                depth,
            });
            self.amplitude_envelope
                .set_default_value(cc_state[cc as usize]);
        }
        if let Some((cc, depth)) = region.pan_cc {
            self.pan_envelope.set_transform(Transform::Modulated {
                base: region.pan,
                depth,
            });
            self.pan_envelope.set_default_value(cc_state[cc as usize]);
        }
        if let Some((cc, depth)) = region.position_cc {
            self.position_envelope.set_transform(Transform::Modulated {
                base: region.position,
                depth,
            });
            self.position_envelope
                .set_default_value(cc_state[cc as usize]);
        }
        if let Some((cc, depth)) = region.width_cc {
            self.width_envelope.set_transform(Transform::Modulated {
                base: region.width,
                depth,
            });
            self.width_envelope.set_default_value(cc_state[cc as usize]);
        }
    }

    /// Handles a note-off for this voice's triggering note. One-shot regions
    /// ignore it; otherwise the note-off is latched and the voice releases
    /// once the sustain pedal allows.
    pub fn register_note_off(
        &mut self,
        region: &Region,
        channel: u8,
        note: u8,
        timestamp: usize,
        cc_state: &[u8; 128],
    ) {
        if self.state == VoiceState::Idle {
            return;
        }
        let (Some(triggering_note), Some(triggering_channel)) =
            (self.triggering_note, self.triggering_channel)
        else {
            return;
        };
        if channel != triggering_channel {
            return;
        }

        if !self.note_is_off
            && note == triggering_note
            && region.loop_mode != LoopMode::OneShot
        {
            self.note_is_off = true;
        }

        if self.note_is_off && cc_state[64] < 64 {
            self.release(timestamp, false);
        }
    }

    /// Handles a controller event: ends controller-triggered voices whose
    /// controller left its trigger range, honors sustain pedal release, and
    /// feeds the performance envelopes bound to this controller.
    pub fn register_cc(
        &mut self,
        region: &Region,
        channel: u8,
        cc: u8,
        value: u8,
        timestamp: usize,
        cc_state: &[u8; 128],
    ) {
        if self.state == VoiceState::Idle {
            return;
        }
        if !region.channel_range.contains(channel) {
            return;
        }

        if self.triggering_cc == Some(cc)
            && !region
                .cc_triggers
                .get(&cc)
                .map(|range| range.contains(value))
                .unwrap_or(false)
        {
            self.note_is_off = true;
        }

        if self.note_is_off && cc_state[64] < 64 {
            self.release(timestamp, false);
        }

        if let Some((bound_cc, _)) = region.amplitude_cc {
            if bound_cc == cc {
                self.amplitude_envelope.add_event(timestamp, value);
            }
        }
        if let Some((bound_cc, _)) = region.pan_cc {
            if bound_cc == cc {
                self.pan_envelope.add_event(timestamp, value);
            }
        }
        if let Some((bound_cc, _)) = region.position_cc {
            if bound_cc == cc {
                self.position_envelope.add_event(timestamp, value);
            }
        }
        if let Some((bound_cc, _)) = region.width_cc {
            if bound_cc == cc {
                self.width_envelope.add_event(timestamp, value);
            }
        }
    }

    /// Releases this voice if its region is cut off by the given group.
    /// `region` is the region this voice is bound to.
    pub fn check_off_group(&mut self, region: &Region, group: u32, timestamp: usize) -> bool {
        if self.state != VoiceState::Idle && region.off_by == Some(group) {
            self.release(timestamp, region.off_mode == OffMode::Fast);
            return true;
        }
        false
    }

    /// Moves to the release state at the given block-local timestamp. The
    /// voice keeps rendering until the amplitude EG finishes smoothing.
    pub fn release(&mut self, timestamp: usize, fast_release: bool) {
        if self.state != VoiceState::Release && self.state != VoiceState::Idle {
            self.state = VoiceState::Release;
            self.amp_eg.release(timestamp, fast_release);
        }
    }

    /// Renders one block of audio into `output[0..num_samples]`.
    pub fn render_block(
        &mut self,
        regions: &[Region],
        output: &mut StereoBlock,
        num_samples: usize,
    ) {
        let region = match self.region_index {
            Some(index) if self.state != VoiceState::Idle => &regions[index],
            _ => {
                output.clear_range(0, num_samples);
                return;
            }
        };

        self.fill_block(region, output, num_samples);

        for i in 0..num_samples {
            output.scale_frame(i, self.amp_eg.next_sample());
        }

        if region.amplitude_cc.is_some() {
            self.amplitude_envelope
                .fill(&mut self.envelope_scratch[..num_samples]);
            for i in 0..num_samples {
                output.scale_frame(i, self.envelope_scratch[i]);
            }
        } else {
            output.apply_gain_range(0, num_samples, self.base_gain);
        }

        self.apply_stereo_image(region, output, num_samples);

        if self.state == VoiceState::Release && !self.amp_eg.is_smoothing() {
            self.reset();
        }
    }

    fn fill_block(&mut self, region: &Region, output: &mut StereoBlock, num_samples: usize) {
        let samples_to_clear = self.initial_delay.min(num_samples);
        if samples_to_clear > 0 {
            output.clear_range(0, samples_to_clear);
            self.initial_delay -= samples_to_clear;
            if samples_to_clear == num_samples {
                return;
            }
        }

        if region.is_generator() {
            self.fill_generator(region, output, samples_to_clear, num_samples);
            return;
        }

        if !self.data_ready {
            if let Some(slot) = &self.load_slot {
                if slot.is_ready() {
                    if let Some(data) = slot.take_data() {
                        self.file_data = Some(data);
                        self.data_ready = true;
                        self.load_slot = None;
                    }
                }
            }
        }

        if self.data_ready {
            self.fill_with_file_data(region, output, samples_to_clear, num_samples);
        } else {
            self.fill_with_preloaded_data(region, output, samples_to_clear, num_samples);
        }
    }

    fn fill_generator(
        &mut self,
        region: &Region,
        output: &mut StereoBlock,
        offset: usize,
        num_samples: usize,
    ) {
        if region.sample == "*sine" {
            let phase_step =
                TAU * note_to_hertz(region.pitch_keycenter) * self.pitch_ratio
                    / self.sample_rate as f32;
            for i in offset..num_samples {
                let value = (phase_step * self.source_position as f32).sin();
                output.set_frame(i, value, value);
                self.source_position += 1;
            }
        } else {
            // *silence and any unknown generator.
            output.clear_range(offset, num_samples);
        }
    }

    fn fill_with_file_data(
        &mut self,
        region: &Region,
        output: &mut StereoBlock,
        offset: usize,
        num_samples: usize,
    ) {
        let Some(data) = self.file_data.clone() else {
            output.clear_range(offset, num_samples);
            return;
        };
        if data.frames() == 0 {
            output.clear_range(offset, num_samples);
            self.release(offset, false);
            return;
        }

        let last_sample = data.frames() - 1;
        let loop_start = (region.loop_range.start() as usize).min(last_sample);

        for i in offset..num_samples {
            let next_position;
            if self.source_position > last_sample {
                let overflow = self.source_position - last_sample - 1;
                if self.wrap_loop(region) {
                    self.source_position = loop_start + overflow;
                    next_position = self.source_position + 1;
                } else {
                    output.clear_range(i, num_samples);
                    self.release(i, false);
                    return;
                }
            } else if self.source_position == last_sample {
                if self.loops_remaining(region) {
                    next_position = loop_start;
                } else {
                    output.clear_range(i, num_samples);
                    self.release(i, false);
                    return;
                }
            } else {
                next_position = self.source_position + 1;
            }

            let position = self.source_position.min(last_sample);
            let next_position = next_position.min(last_sample);
            let fraction = self.decimal_position;
            output.set_frame(
                i,
                data.left()[position] * (1.0 - fraction)
                    + data.left()[next_position] * fraction,
                data.right()[position] * (1.0 - fraction)
                    + data.right()[next_position] * fraction,
            );

            self.decimal_position += self.speed_ratio * self.pitch_ratio;
            let step = self.decimal_position as usize;
            self.source_position += step;
            self.decimal_position -= step as f32;
        }
    }

    fn fill_with_preloaded_data(
        &mut self,
        region: &Region,
        output: &mut StereoBlock,
        offset: usize,
        num_samples: usize,
    ) {
        let Some(data) = self.preloaded_data.clone() else {
            // No data at all: stay silent until released.
            output.clear_range(offset, num_samples);
            return;
        };

        // The prefix may be shared between regions with different bounds.
        let end = (data.frames().saturating_sub(1))
            .min((region.loop_range.end() as usize).saturating_sub(1))
            .min((region.sample_end as usize).saturating_sub(1));

        for i in offset..num_samples {
            if self.source_position >= end {
                output.clear_range(i, num_samples);
                self.release(i, false);
                return;
            }

            let next_position = self.source_position + 1;
            let fraction = self.decimal_position;
            output.set_frame(
                i,
                data.left()[self.source_position] * (1.0 - fraction)
                    + data.left()[next_position] * fraction,
                data.right()[self.source_position] * (1.0 - fraction)
                    + data.right()[next_position] * fraction,
            );

            self.decimal_position += self.speed_ratio * self.pitch_ratio;
            let step = self.decimal_position as usize;
            self.source_position += step;
            self.decimal_position -= step as f32;
        }
    }

    /// Whether the playhead may wrap into another loop pass, counting the
    /// pass when the region plays a bounded number of them.
    fn wrap_loop(&mut self, region: &Region) -> bool {
        if region.should_loop() {
            return true;
        }
        if let Some(count) = region.sample_count {
            self.loop_count += 1;
            return self.loop_count < count;
        }
        false
    }

    /// Like `wrap_loop` but without committing the pass, for lookahead at
    /// the final source sample.
    fn loops_remaining(&self, region: &Region) -> bool {
        if region.should_loop() {
            return true;
        }
        match region.sample_count {
            Some(count) => self.loop_count + 1 < count,
            None => false,
        }
    }

    /// Applies width, then pan and position as one equal-power pan. All
    /// three default to no-ops and may be controller-modulated per sample.
    fn apply_stereo_image(
        &mut self,
        region: &Region,
        output: &mut StereoBlock,
        num_samples: usize,
    ) {
        let pan_bound = region.pan_cc.is_some();
        let position_bound = region.position_cc.is_some();
        let width_bound = region.width_cc.is_some();

        if !pan_bound
            && !position_bound
            && !width_bound
            && region.pan == 0.0
            && region.position == 0.0
            && region.width == 0.0
        {
            return;
        }

        if width_bound {
            self.width_envelope
                .fill(&mut self.envelope_scratch[..num_samples]);
        }
        if pan_bound {
            self.pan_envelope.fill(&mut self.pan_scratch[..num_samples]);
        }
        if position_bound {
            self.position_envelope
                .fill(&mut self.position_scratch[..num_samples]);
        }

        for i in 0..num_samples {
            let width = if width_bound {
                self.envelope_scratch[i]
            } else {
                region.width
            };
            let pan = if pan_bound { self.pan_scratch[i] } else { region.pan };
            let position = if position_bound {
                self.position_scratch[i]
            } else {
                region.position
            };

            let (left, right) = output.frame(i);

            // Width scales the side signal as a deviation from the natural
            // image: 0 is neutral, -100 collapses to mono.
            let side_scale = (1.0 + width.clamp(-100.0, 100.0) / 100.0).clamp(0.0, 2.0);
            let mid = 0.5 * (left + right);
            let side = 0.5 * (left - right) * side_scale;

            let pan_amount = ((pan + position) / 100.0).clamp(-1.0, 1.0);
            let left_gain = (1.0 - pan_amount).sqrt();
            let right_gain = (1.0 + pan_amount).sqrt();

            output.set_frame(
                i,
                (mid + side) * left_gain,
                (mid - side) * right_gain,
            );
        }
    }

    /// Returns the voice to idle. Buffer drops are shipped to the loader
    /// workers so the render thread never frees large allocations.
    pub fn reset(&mut self) {
        let mut buffers = Vec::new();
        if let Some(data) = self.file_data.take() {
            buffers.push(data);
        }
        if let Some(data) = self.preloaded_data.take() {
            buffers.push(data);
        }
        if let Some(slot) = self.load_slot.take() {
            slot.cancel();
            if slot.is_ready() {
                if let Some(data) = slot.take_data() {
                    buffers.push(data);
                }
            }
        }
        if !buffers.is_empty() {
            // If the queue is full the buffers just drop here.
            let _ = self.job_tx.try_send(LoadJob::Discard { buffers });
        }

        self.state = VoiceState::Idle;
        self.region_index = None;
        self.triggering_note = None;
        self.triggering_cc = None;
        self.triggering_channel = None;
        self.note_is_off = false;
        self.data_ready = false;
        self.initial_delay = 0;
        self.source_position = 0;
        self.decimal_position = 0.0;
        self.loop_count = 0;
        self.amplitude_envelope.clear_events();
        self.pan_envelope.clear_events();
        self.position_envelope.clear_events();
        self.width_envelope.clear_events();
    }
}
