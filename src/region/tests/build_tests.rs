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

//! Opcode parsing: defaults, in-range values, and clamping at the bounds.

use super::{parse, prepared_region};
use crate::region::{
    CrossfadeCurve, LoopMode, OffMode, Region, Trigger, VelocityOverride,
};
use crate::util::Range;

#[test]
fn test_sample() {
    let mut region = Region::new();
    assert_eq!(region.sample, "");
    parse(&mut region, "sample", "dummy.wav");
    assert_eq!(region.sample, "dummy.wav");
}

#[test]
fn test_delay() {
    let mut region = Region::new();
    assert_eq!(region.delay, 0.0);
    parse(&mut region, "delay", "1.0");
    assert_eq!(region.delay, 1.0);
    parse(&mut region, "delay", "-1.0");
    assert_eq!(region.delay, 0.0);
    parse(&mut region, "delay", "110.0");
    assert_eq!(region.delay, 100.0);
}

#[test]
fn test_delay_random() {
    let mut region = Region::new();
    assert_eq!(region.delay_random, 0.0);
    parse(&mut region, "delay_random", "1.0");
    assert_eq!(region.delay_random, 1.0);
    parse(&mut region, "delay_random", "-1.0");
    assert_eq!(region.delay_random, 0.0);
    parse(&mut region, "delay_random", "110.0");
    assert_eq!(region.delay_random, 100.0);
}

#[test]
fn test_offset() {
    let mut region = Region::new();
    assert_eq!(region.offset, 0);
    parse(&mut region, "offset", "1");
    assert_eq!(region.offset, 1);
    parse(&mut region, "offset", "-1");
    assert_eq!(region.offset, 0);
}

#[test]
fn test_offset_random() {
    let mut region = Region::new();
    assert_eq!(region.offset_random, 0);
    parse(&mut region, "offset_random", "1");
    assert_eq!(region.offset_random, 1);
    parse(&mut region, "offset_random", "-1");
    assert_eq!(region.offset_random, 0);
}

#[test]
fn test_end() {
    let mut region = Region::new();
    parse(&mut region, "end", "184");
    assert_eq!(region.sample_end, 184);
    parse(&mut region, "end", "-1");
    assert_eq!(region.sample_end, 0);
}

#[test]
fn test_count() {
    let mut region = Region::new();
    assert!(region.sample_count.is_none());
    parse(&mut region, "count", "184");
    assert_eq!(region.sample_count, Some(184));
    parse(&mut region, "count", "-1");
    assert_eq!(region.sample_count, Some(0));
}

#[test]
fn test_loop_mode() {
    for name in ["loop_mode", "loopmode"] {
        let mut region = Region::new();
        assert_eq!(region.loop_mode, LoopMode::NoLoop);
        parse(&mut region, name, "no_loop");
        assert_eq!(region.loop_mode, LoopMode::NoLoop);
        parse(&mut region, name, "one_shot");
        assert_eq!(region.loop_mode, LoopMode::OneShot);
        parse(&mut region, name, "loop_continuous");
        assert_eq!(region.loop_mode, LoopMode::LoopContinuous);
        parse(&mut region, name, "loop_sustain");
        assert_eq!(region.loop_mode, LoopMode::LoopSustain);
    }
}

#[test]
fn test_loop_end() {
    for name in ["loop_end", "loopend"] {
        let mut region = Region::new();
        assert_eq!(region.loop_range, Range::new(0, 4294967295));
        parse(&mut region, name, "184");
        assert_eq!(region.loop_range, Range::new(0, 184));
        parse(&mut region, name, "-1");
        assert_eq!(region.loop_range, Range::new(0, 0));
    }
}

#[test]
fn test_loop_start() {
    for name in ["loop_start", "loopstart"] {
        let mut region = Region::new();
        parse(&mut region, name, "184");
        assert_eq!(region.loop_range, Range::new(184, 4294967295));
        parse(&mut region, name, "-1");
        assert_eq!(region.loop_range, Range::new(0, 4294967295));
    }
}

#[test]
fn test_group() {
    let mut region = Region::new();
    assert_eq!(region.group, 0);
    parse(&mut region, "group", "5");
    assert_eq!(region.group, 5);
    parse(&mut region, "group", "-1");
    assert_eq!(region.group, 0);
}

#[test]
fn test_off_by() {
    let mut region = Region::new();
    assert!(region.off_by.is_none());
    parse(&mut region, "off_by", "5");
    assert_eq!(region.off_by, Some(5));
    parse(&mut region, "off_by", "-1");
    assert_eq!(region.off_by, Some(0));
}

#[test]
fn test_off_mode() {
    let mut region = Region::new();
    assert_eq!(region.off_mode, OffMode::Fast);
    parse(&mut region, "off_mode", "fast");
    assert_eq!(region.off_mode, OffMode::Fast);
    parse(&mut region, "off_mode", "normal");
    assert_eq!(region.off_mode, OffMode::Normal);
}

#[test]
fn test_key_range() {
    let mut region = Region::new();
    assert_eq!(region.key_range, Range::new(0, 127));
    parse(&mut region, "lokey", "37");
    assert_eq!(region.key_range, Range::new(37, 127));
    parse(&mut region, "lokey", "c4");
    assert_eq!(region.key_range, Range::new(60, 127));
    parse(&mut region, "lokey", "128");
    assert_eq!(region.key_range, Range::new(127, 127));
    parse(&mut region, "lokey", "-3");
    assert_eq!(region.key_range, Range::new(0, 127));
    parse(&mut region, "hikey", "65");
    assert_eq!(region.key_range, Range::new(0, 65));
    parse(&mut region, "hikey", "c4");
    assert_eq!(region.key_range, Range::new(0, 60));
    parse(&mut region, "hikey", "-1");
    assert_eq!(region.key_range, Range::new(0, 0));
    parse(&mut region, "hikey", "128");
    assert_eq!(region.key_range, Range::new(0, 127));
}

#[test]
fn test_key_sets_range_and_keycenter() {
    let mut region = Region::new();
    parse(&mut region, "key", "26");
    assert_eq!(region.key_range, Range::new(26, 26));
    assert_eq!(region.pitch_keycenter, 26);
    parse(&mut region, "key", "-26");
    assert_eq!(region.key_range, Range::new(0, 0));
    assert_eq!(region.pitch_keycenter, 0);
    parse(&mut region, "key", "234");
    assert_eq!(region.key_range, Range::new(127, 127));
    assert_eq!(region.pitch_keycenter, 127);
    parse(&mut region, "key", "c4");
    assert_eq!(region.key_range, Range::new(60, 60));
    assert_eq!(region.pitch_keycenter, 60);
}

#[test]
fn test_velocity_range() {
    let mut region = Region::new();
    assert_eq!(region.velocity_range, Range::new(0, 127));
    parse(&mut region, "lovel", "37");
    assert_eq!(region.velocity_range, Range::new(37, 127));
    parse(&mut region, "lovel", "128");
    assert_eq!(region.velocity_range, Range::new(127, 127));
    parse(&mut region, "lovel", "-3");
    assert_eq!(region.velocity_range, Range::new(0, 127));
    parse(&mut region, "hivel", "65");
    assert_eq!(region.velocity_range, Range::new(0, 65));
    parse(&mut region, "hivel", "-1");
    assert_eq!(region.velocity_range, Range::new(0, 0));
    parse(&mut region, "hivel", "128");
    assert_eq!(region.velocity_range, Range::new(0, 127));
}

#[test]
fn test_channel_range() {
    let mut region = Region::new();
    assert_eq!(region.channel_range, Range::new(1, 16));
    parse(&mut region, "lochan", "4");
    assert_eq!(region.channel_range, Range::new(4, 16));
    parse(&mut region, "lochan", "128");
    assert_eq!(region.channel_range, Range::new(16, 16));
    parse(&mut region, "lochan", "-3");
    assert_eq!(region.channel_range, Range::new(1, 16));
    parse(&mut region, "hichan", "13");
    assert_eq!(region.channel_range, Range::new(1, 13));
    parse(&mut region, "hichan", "-1");
    assert_eq!(region.channel_range, Range::new(1, 1));
    parse(&mut region, "hichan", "128");
    assert_eq!(region.channel_range, Range::new(1, 16));
}

#[test]
fn test_bend_range() {
    let mut region = Region::new();
    assert_eq!(region.bend_range, Range::new(-8192, 8192));
    parse(&mut region, "lobend", "4");
    assert_eq!(region.bend_range, Range::new(4, 8192));
    parse(&mut region, "lobend", "-128");
    assert_eq!(region.bend_range, Range::new(-128, 8192));
    parse(&mut region, "lobend", "-10000");
    assert_eq!(region.bend_range, Range::new(-8192, 8192));
    parse(&mut region, "hibend", "13");
    assert_eq!(region.bend_range, Range::new(-8192, 13));
    parse(&mut region, "hibend", "-1");
    assert_eq!(region.bend_range, Range::new(-8192, -1));
    parse(&mut region, "hibend", "10000");
    assert_eq!(region.bend_range, Range::new(-8192, 8192));
}

#[test]
fn test_cc_conditions() {
    let mut region = Region::new();
    assert_eq!(region.cc_condition(0), Range::new(0, 127));
    assert_eq!(region.cc_condition(127), Range::new(0, 127));
    parse(&mut region, "locc6", "4");
    assert_eq!(region.cc_condition(6), Range::new(4, 127));
    parse(&mut region, "locc12", "-128");
    assert_eq!(region.cc_condition(12), Range::new(0, 127));
    parse(&mut region, "hicc65", "39");
    assert_eq!(region.cc_condition(65), Range::new(0, 39));
    parse(&mut region, "hicc127", "135");
    assert_eq!(region.cc_condition(127), Range::new(0, 127));
}

#[test]
fn test_keyswitch_range() {
    let mut region = Region::new();
    assert_eq!(region.keyswitch_range, Range::new(0, 127));
    parse(&mut region, "sw_lokey", "4");
    assert_eq!(region.keyswitch_range, Range::new(4, 127));
    parse(&mut region, "sw_lokey", "128");
    assert_eq!(region.keyswitch_range, Range::new(127, 127));
    parse(&mut region, "sw_lokey", "0");
    assert_eq!(region.keyswitch_range, Range::new(0, 127));
    parse(&mut region, "sw_hikey", "39");
    assert_eq!(region.keyswitch_range, Range::new(0, 39));
    parse(&mut region, "sw_hikey", "135");
    assert_eq!(region.keyswitch_range, Range::new(0, 127));
    parse(&mut region, "sw_hikey", "-1");
    assert_eq!(region.keyswitch_range, Range::new(0, 0));
}

#[test]
fn test_sw_last() {
    let mut region = Region::new();
    assert!(region.keyswitch.is_none());
    parse(&mut region, "sw_last", "4");
    assert_eq!(region.keyswitch, Some(4));
    parse(&mut region, "sw_last", "128");
    assert_eq!(region.keyswitch, Some(127));
    parse(&mut region, "sw_last", "-1");
    assert_eq!(region.keyswitch, Some(0));
}

#[test]
fn test_sw_up() {
    let mut region = Region::new();
    assert!(region.keyswitch_up.is_none());
    parse(&mut region, "sw_up", "4");
    assert_eq!(region.keyswitch_up, Some(4));
    parse(&mut region, "sw_up", "128");
    assert_eq!(region.keyswitch_up, Some(127));
    parse(&mut region, "sw_up", "-1");
    assert_eq!(region.keyswitch_up, Some(0));
}

#[test]
fn test_sw_down() {
    let mut region = Region::new();
    assert!(region.keyswitch_down.is_none());
    parse(&mut region, "sw_down", "4");
    assert_eq!(region.keyswitch_down, Some(4));
    parse(&mut region, "sw_down", "128");
    assert_eq!(region.keyswitch_down, Some(127));
    parse(&mut region, "sw_down", "-1");
    assert_eq!(region.keyswitch_down, Some(0));
}

#[test]
fn test_sw_previous() {
    let mut region = Region::new();
    assert!(region.previous_note.is_none());
    parse(&mut region, "sw_previous", "4");
    assert_eq!(region.previous_note, Some(4));
    parse(&mut region, "sw_previous", "128");
    assert_eq!(region.previous_note, Some(127));
    parse(&mut region, "sw_previous", "-1");
    assert_eq!(region.previous_note, Some(0));
}

#[test]
fn test_sw_vel() {
    let mut region = Region::new();
    assert_eq!(region.velocity_override, VelocityOverride::Current);
    parse(&mut region, "sw_vel", "current");
    assert_eq!(region.velocity_override, VelocityOverride::Current);
    parse(&mut region, "sw_vel", "previous");
    assert_eq!(region.velocity_override, VelocityOverride::Previous);
}

#[test]
fn test_aftertouch_range() {
    let mut region = Region::new();
    assert_eq!(region.aftertouch_range, Range::new(0, 127));
    parse(&mut region, "lochanaft", "4");
    assert_eq!(region.aftertouch_range, Range::new(4, 127));
    parse(&mut region, "lochanaft", "128");
    assert_eq!(region.aftertouch_range, Range::new(127, 127));
    parse(&mut region, "lochanaft", "0");
    assert_eq!(region.aftertouch_range, Range::new(0, 127));
    parse(&mut region, "hichanaft", "39");
    assert_eq!(region.aftertouch_range, Range::new(0, 39));
    parse(&mut region, "hichanaft", "135");
    assert_eq!(region.aftertouch_range, Range::new(0, 127));
    parse(&mut region, "hichanaft", "-1");
    assert_eq!(region.aftertouch_range, Range::new(0, 0));
}

#[test]
fn test_bpm_range() {
    let mut region = Region::new();
    assert_eq!(region.bpm_range, Range::new(0.0, 500.0));
    parse(&mut region, "lobpm", "47.5");
    assert_eq!(region.bpm_range, Range::new(47.5, 500.0));
    parse(&mut region, "lobpm", "594");
    assert_eq!(region.bpm_range, Range::new(500.0, 500.0));
    parse(&mut region, "lobpm", "0");
    assert_eq!(region.bpm_range, Range::new(0.0, 500.0));
    parse(&mut region, "hibpm", "78");
    assert_eq!(region.bpm_range, Range::new(0.0, 78.0));
    parse(&mut region, "hibpm", "895.4");
    assert_eq!(region.bpm_range, Range::new(0.0, 500.0));
    parse(&mut region, "hibpm", "-1");
    assert_eq!(region.bpm_range, Range::new(0.0, 0.0));
}

#[test]
fn test_rand_range() {
    let mut region = Region::new();
    assert_eq!(region.rand_range, Range::new(0.0, 1.0));
    parse(&mut region, "lorand", "0.5");
    assert_eq!(region.rand_range, Range::new(0.5, 1.0));
    parse(&mut region, "lorand", "4");
    assert_eq!(region.rand_range, Range::new(1.0, 1.0));
    parse(&mut region, "lorand", "0");
    assert_eq!(region.rand_range, Range::new(0.0, 1.0));
    parse(&mut region, "hirand", "39");
    assert_eq!(region.rand_range, Range::new(0.0, 1.0));
    parse(&mut region, "hirand", "0.7");
    assert_eq!(region.rand_range, Range::new(0.0, 0.7));
    parse(&mut region, "hirand", "-1");
    assert_eq!(region.rand_range, Range::new(0.0, 0.0));
}

#[test]
fn test_sequence() {
    let mut region = Region::new();
    assert_eq!(region.sequence_length, 1);
    parse(&mut region, "seq_length", "89");
    assert_eq!(region.sequence_length, 89);
    parse(&mut region, "seq_length", "189");
    assert_eq!(region.sequence_length, 100);
    parse(&mut region, "seq_length", "-1");
    assert_eq!(region.sequence_length, 1);

    assert_eq!(region.sequence_position, 1);
    parse(&mut region, "seq_position", "89");
    assert_eq!(region.sequence_position, 89);
    parse(&mut region, "seq_position", "189");
    assert_eq!(region.sequence_position, 100);
    parse(&mut region, "seq_position", "-1");
    assert_eq!(region.sequence_position, 1);
}

#[test]
fn test_trigger() {
    let mut region = Region::new();
    assert_eq!(region.trigger, Trigger::Attack);
    parse(&mut region, "trigger", "attack");
    assert_eq!(region.trigger, Trigger::Attack);
    parse(&mut region, "trigger", "release");
    assert_eq!(region.trigger, Trigger::Release);
    parse(&mut region, "trigger", "release_key");
    assert_eq!(region.trigger, Trigger::ReleaseKey);
    parse(&mut region, "trigger", "first");
    assert_eq!(region.trigger, Trigger::First);
    parse(&mut region, "trigger", "legato");
    assert_eq!(region.trigger, Trigger::Legato);
}

#[test]
fn test_cc_triggers() {
    let mut region = Region::new();
    for cc in 1..128u8 {
        assert!(!region.cc_triggers.contains_key(&cc));
    }
    parse(&mut region, "on_locc45", "15");
    assert!(region.cc_triggers.contains_key(&45));
    assert_eq!(region.cc_triggers[&45], Range::new(15, 127));
    parse(&mut region, "on_hicc4", "47");
    assert!(region.cc_triggers.contains_key(&45));
    assert_eq!(region.cc_triggers[&4], Range::new(0, 47));
}

#[test]
fn test_volume() {
    let mut region = Region::new();
    assert_eq!(region.volume, 0.0);
    parse(&mut region, "volume", "4.2");
    assert_eq!(region.volume, 4.2);
    parse(&mut region, "volume", "-4.2");
    assert_eq!(region.volume, -4.2);
    parse(&mut region, "volume", "-123");
    assert_eq!(region.volume, -123.0);
    parse(&mut region, "volume", "-185");
    assert_eq!(region.volume, -144.0);
    parse(&mut region, "volume", "19");
    assert_eq!(region.volume, 6.0);
}

#[test]
fn test_pan_width_position() {
    for name in ["pan", "width", "position"] {
        let mut region = Region::new();
        let field = |region: &Region| match name {
            "pan" => region.pan,
            "width" => region.width,
            _ => region.position,
        };
        assert_eq!(field(&region), 0.0);
        parse(&mut region, name, "4.2");
        assert_eq!(field(&region), 4.2);
        parse(&mut region, name, "-4.2");
        assert_eq!(field(&region), -4.2);
        parse(&mut region, name, "-123");
        assert_eq!(field(&region), -100.0);
        parse(&mut region, name, "132");
        assert_eq!(field(&region), 100.0);
    }
}

#[test]
fn test_performance_cc_pairs() {
    let mut region = Region::new();
    assert!(region.pan_cc.is_none());
    parse(&mut region, "pan_oncc45", "4.2");
    assert_eq!(region.pan_cc, Some((45, 4.2)));

    assert!(region.width_cc.is_none());
    parse(&mut region, "width_oncc45", "4.2");
    assert_eq!(region.width_cc, Some((45, 4.2)));

    assert!(region.position_cc.is_none());
    parse(&mut region, "position_oncc45", "4.2");
    assert_eq!(region.position_cc, Some((45, 4.2)));

    assert!(region.amplitude_cc.is_none());
    parse(&mut region, "amplitude_oncc45", "50");
    assert_eq!(region.amplitude_cc, Some((45, 50.0)));

    assert!(region.volume_cc.is_none());
    parse(&mut region, "volume_oncc45", "-6");
    assert_eq!(region.volume_cc, Some((45, -6.0)));
}

#[test]
fn test_amp_keycenter() {
    let mut region = Region::new();
    assert_eq!(region.amp_keycenter, 60);
    parse(&mut region, "amp_keycenter", "40");
    assert_eq!(region.amp_keycenter, 40);
    parse(&mut region, "amp_keycenter", "-1");
    assert_eq!(region.amp_keycenter, 0);
    parse(&mut region, "amp_keycenter", "132");
    assert_eq!(region.amp_keycenter, 127);
}

#[test]
fn test_amp_keytrack() {
    let mut region = Region::new();
    assert_eq!(region.amp_keytrack, 0.0);
    parse(&mut region, "amp_keytrack", "4.2");
    assert_eq!(region.amp_keytrack, 4.2);
    parse(&mut region, "amp_keytrack", "-4.2");
    assert_eq!(region.amp_keytrack, -4.2);
    parse(&mut region, "amp_keytrack", "-123");
    assert_eq!(region.amp_keytrack, -96.0);
    parse(&mut region, "amp_keytrack", "132");
    assert_eq!(region.amp_keytrack, 12.0);
}

#[test]
fn test_amp_veltrack() {
    let mut region = Region::new();
    assert_eq!(region.amp_veltrack, 100.0);
    parse(&mut region, "amp_veltrack", "4.2");
    assert_eq!(region.amp_veltrack, 4.2);
    parse(&mut region, "amp_veltrack", "-4.2");
    assert_eq!(region.amp_veltrack, -4.2);
    parse(&mut region, "amp_veltrack", "-123");
    assert_eq!(region.amp_veltrack, -100.0);
    parse(&mut region, "amp_veltrack", "132");
    assert_eq!(region.amp_veltrack, 100.0);
}

#[test]
fn test_amp_random() {
    let mut region = Region::new();
    assert_eq!(region.amp_random, 0.0);
    parse(&mut region, "amp_random", "4.2");
    assert_eq!(region.amp_random, 4.2);
    parse(&mut region, "amp_random", "-4.2");
    assert_eq!(region.amp_random, 0.0);
    parse(&mut region, "amp_random", "132");
    assert_eq!(region.amp_random, 24.0);
}

#[test]
fn test_amp_velcurve() {
    let mut region = Region::new();
    parse(&mut region, "amp_velcurve_6", "0.4");
    assert_eq!(*region.velocity_points.last().unwrap(), (6, 0.4));
    parse(&mut region, "amp_velcurve_127", "-1.0");
    assert_eq!(*region.velocity_points.last().unwrap(), (127, 0.0));
}

#[test]
fn test_crossfade_ranges_and_curves() {
    let mut region = Region::new();
    assert_eq!(region.crossfade_key_in, Range::new(0, 0));
    assert_eq!(region.crossfade_key_out, Range::new(127, 127));
    assert_eq!(region.crossfade_vel_in, Range::new(0, 0));
    assert_eq!(region.crossfade_vel_out, Range::new(127, 127));

    parse(&mut region, "xfin_lokey", "10");
    parse(&mut region, "xfin_hikey", "20");
    assert_eq!(region.crossfade_key_in, Range::new(10, 20));
    parse(&mut region, "xfout_lokey", "100");
    parse(&mut region, "xfout_hikey", "110");
    assert_eq!(region.crossfade_key_out, Range::new(100, 110));
    parse(&mut region, "xfin_lovel", "20");
    parse(&mut region, "xfin_hivel", "60");
    assert_eq!(region.crossfade_vel_in, Range::new(20, 60));
    parse(&mut region, "xfout_lovel", "90");
    parse(&mut region, "xfout_hivel", "120");
    assert_eq!(region.crossfade_vel_out, Range::new(90, 120));

    assert_eq!(region.crossfade_key_curve, CrossfadeCurve::Power);
    parse(&mut region, "xf_keycurve", "gain");
    assert_eq!(region.crossfade_key_curve, CrossfadeCurve::Gain);
    assert_eq!(region.crossfade_vel_curve, CrossfadeCurve::Power);
    parse(&mut region, "xf_velcurve", "gain");
    assert_eq!(region.crossfade_vel_curve, CrossfadeCurve::Gain);
}

#[test]
fn test_pitch_keycenter() {
    let mut region = Region::new();
    assert_eq!(region.pitch_keycenter, 60);
    parse(&mut region, "pitch_keycenter", "40");
    assert_eq!(region.pitch_keycenter, 40);
    parse(&mut region, "pitch_keycenter", "-1");
    assert_eq!(region.pitch_keycenter, 0);
    parse(&mut region, "pitch_keycenter", "132");
    assert_eq!(region.pitch_keycenter, 127);
}

#[test]
fn test_pitch_keytrack() {
    let mut region = Region::new();
    assert_eq!(region.pitch_keytrack, 100);
    parse(&mut region, "pitch_keytrack", "40");
    assert_eq!(region.pitch_keytrack, 40);
    parse(&mut region, "pitch_keytrack", "-1");
    assert_eq!(region.pitch_keytrack, -1);
    parse(&mut region, "pitch_keytrack", "1320");
    assert_eq!(region.pitch_keytrack, 1200);
    parse(&mut region, "pitch_keytrack", "-1320");
    assert_eq!(region.pitch_keytrack, -1200);
}

#[test]
fn test_pitch_random() {
    let mut region = Region::new();
    assert_eq!(region.pitch_random, 0);
    parse(&mut region, "pitch_random", "40");
    assert_eq!(region.pitch_random, 40);
    parse(&mut region, "pitch_random", "-1");
    assert_eq!(region.pitch_random, 0);
    parse(&mut region, "pitch_random", "10320");
    assert_eq!(region.pitch_random, 9600);
}

#[test]
fn test_pitch_veltrack() {
    let mut region = Region::new();
    assert_eq!(region.pitch_veltrack, 0);
    parse(&mut region, "pitch_veltrack", "40");
    assert_eq!(region.pitch_veltrack, 40);
    parse(&mut region, "pitch_veltrack", "-1");
    assert_eq!(region.pitch_veltrack, -1);
    parse(&mut region, "pitch_veltrack", "13020");
    assert_eq!(region.pitch_veltrack, 9600);
    parse(&mut region, "pitch_veltrack", "-13020");
    assert_eq!(region.pitch_veltrack, -9600);
}

#[test]
fn test_transpose() {
    let mut region = Region::new();
    assert_eq!(region.transpose, 0);
    parse(&mut region, "transpose", "40");
    assert_eq!(region.transpose, 40);
    parse(&mut region, "transpose", "-1");
    assert_eq!(region.transpose, -1);
    parse(&mut region, "transpose", "154");
    assert_eq!(region.transpose, 127);
    parse(&mut region, "transpose", "-154");
    assert_eq!(region.transpose, -127);
}

#[test]
fn test_tune() {
    let mut region = Region::new();
    assert_eq!(region.tune, 0);
    parse(&mut region, "tune", "40");
    assert_eq!(region.tune, 40);
    parse(&mut region, "tune", "-1");
    assert_eq!(region.tune, -1);
    parse(&mut region, "tune", "154");
    assert_eq!(region.tune, 100);
    parse(&mut region, "tune", "-154");
    assert_eq!(region.tune, -100);
}

#[test]
fn test_ampeg_defaults_and_values() {
    let mut region = Region::new();
    assert_eq!(region.amplitude_eg.attack, 0.0);
    assert_eq!(region.amplitude_eg.decay, 0.0);
    assert_eq!(region.amplitude_eg.delay, 0.0);
    assert_eq!(region.amplitude_eg.hold, 0.0);
    assert_eq!(region.amplitude_eg.release, 0.0);
    assert_eq!(region.amplitude_eg.start, 0.0);
    assert_eq!(region.amplitude_eg.sustain, 100.0);
    assert_eq!(region.amplitude_eg.depth, 0.0);
    assert_eq!(region.amplitude_eg.vel2attack, 0.0);
    assert_eq!(region.amplitude_eg.vel2decay, 0.0);
    assert_eq!(region.amplitude_eg.vel2delay, 0.0);
    assert_eq!(region.amplitude_eg.vel2hold, 0.0);
    assert_eq!(region.amplitude_eg.vel2release, 0.0);
    assert_eq!(region.amplitude_eg.vel2sustain, 0.0);
    assert_eq!(region.amplitude_eg.vel2depth, 0.0);

    parse(&mut region, "ampeg_attack", "1");
    parse(&mut region, "ampeg_decay", "2");
    parse(&mut region, "ampeg_delay", "3");
    parse(&mut region, "ampeg_hold", "4");
    parse(&mut region, "ampeg_release", "5");
    parse(&mut region, "ampeg_start", "6");
    parse(&mut region, "ampeg_sustain", "7");
    parse(&mut region, "ampeg_depth", "8");
    parse(&mut region, "ampeg_vel2attack", "9");
    parse(&mut region, "ampeg_vel2decay", "10");
    parse(&mut region, "ampeg_vel2delay", "11");
    parse(&mut region, "ampeg_vel2hold", "12");
    parse(&mut region, "ampeg_vel2release", "13");
    parse(&mut region, "ampeg_vel2sustain", "14");
    parse(&mut region, "ampeg_vel2depth", "15");
    assert_eq!(region.amplitude_eg.attack, 1.0);
    assert_eq!(region.amplitude_eg.decay, 2.0);
    assert_eq!(region.amplitude_eg.delay, 3.0);
    assert_eq!(region.amplitude_eg.hold, 4.0);
    assert_eq!(region.amplitude_eg.release, 5.0);
    assert_eq!(region.amplitude_eg.start, 6.0);
    assert_eq!(region.amplitude_eg.sustain, 7.0);
    assert_eq!(region.amplitude_eg.depth, 0.0); // ignored for the amp EG
    assert_eq!(region.amplitude_eg.vel2attack, 9.0);
    assert_eq!(region.amplitude_eg.vel2decay, 10.0);
    assert_eq!(region.amplitude_eg.vel2delay, 11.0);
    assert_eq!(region.amplitude_eg.vel2hold, 12.0);
    assert_eq!(region.amplitude_eg.vel2release, 13.0);
    assert_eq!(region.amplitude_eg.vel2sustain, 14.0);
    assert_eq!(region.amplitude_eg.vel2depth, 0.0); // ignored for the amp EG

    // Clamped high.
    for stage in [
        "attack",
        "decay",
        "delay",
        "hold",
        "release",
        "start",
        "sustain",
        "vel2attack",
        "vel2decay",
        "vel2delay",
        "vel2hold",
        "vel2release",
        "vel2sustain",
    ] {
        parse(&mut region, &format!("ampeg_{}", stage), "1000");
    }
    assert_eq!(region.amplitude_eg.attack, 100.0);
    assert_eq!(region.amplitude_eg.decay, 100.0);
    assert_eq!(region.amplitude_eg.delay, 100.0);
    assert_eq!(region.amplitude_eg.hold, 100.0);
    assert_eq!(region.amplitude_eg.release, 100.0);
    assert_eq!(region.amplitude_eg.start, 100.0);
    assert_eq!(region.amplitude_eg.sustain, 100.0);
    assert_eq!(region.amplitude_eg.vel2attack, 100.0);
    assert_eq!(region.amplitude_eg.vel2sustain, 100.0);

    // Clamped low.
    for stage in [
        "attack",
        "decay",
        "delay",
        "hold",
        "release",
        "start",
        "sustain",
        "vel2attack",
        "vel2decay",
        "vel2delay",
        "vel2hold",
        "vel2release",
        "vel2sustain",
    ] {
        parse(&mut region, &format!("ampeg_{}", stage), "-101");
    }
    assert_eq!(region.amplitude_eg.attack, 0.0);
    assert_eq!(region.amplitude_eg.decay, 0.0);
    assert_eq!(region.amplitude_eg.delay, 0.0);
    assert_eq!(region.amplitude_eg.hold, 0.0);
    assert_eq!(region.amplitude_eg.release, 0.0);
    assert_eq!(region.amplitude_eg.start, 0.0);
    assert_eq!(region.amplitude_eg.sustain, 0.0);
    assert_eq!(region.amplitude_eg.vel2attack, -100.0);
    assert_eq!(region.amplitude_eg.vel2sustain, -100.0);
}

#[test]
fn test_ampeg_oncc() {
    let mut region = Region::new();
    assert!(region.amplitude_eg.cc_attack.is_none());
    assert!(region.amplitude_eg.cc_decay.is_none());
    assert!(region.amplitude_eg.cc_delay.is_none());
    assert!(region.amplitude_eg.cc_hold.is_none());
    assert!(region.amplitude_eg.cc_release.is_none());
    assert!(region.amplitude_eg.cc_start.is_none());
    assert!(region.amplitude_eg.cc_sustain.is_none());

    parse(&mut region, "ampeg_attack_oncc1", "1");
    parse(&mut region, "ampeg_decay_oncc2", "2");
    parse(&mut region, "ampeg_delay_oncc3", "3");
    parse(&mut region, "ampeg_hold_oncc4", "4");
    parse(&mut region, "ampeg_release_oncc5", "5");
    parse(&mut region, "ampeg_start_oncc6", "6");
    parse(&mut region, "ampeg_sustain_oncc7", "7");
    assert_eq!(region.amplitude_eg.cc_attack, Some((1, 1.0)));
    assert_eq!(region.amplitude_eg.cc_decay, Some((2, 2.0)));
    assert_eq!(region.amplitude_eg.cc_delay, Some((3, 3.0)));
    assert_eq!(region.amplitude_eg.cc_hold, Some((4, 4.0)));
    assert_eq!(region.amplitude_eg.cc_release, Some((5, 5.0)));
    assert_eq!(region.amplitude_eg.cc_start, Some((6, 6.0)));
    assert_eq!(region.amplitude_eg.cc_sustain, Some((7, 7.0)));

    parse(&mut region, "ampeg_attack_oncc1", "101");
    assert_eq!(region.amplitude_eg.cc_attack, Some((1, 100.0)));
    parse(&mut region, "ampeg_attack_oncc1", "-101");
    assert_eq!(region.amplitude_eg.cc_attack, Some((1, -100.0)));
}

#[test]
fn test_invalid_values_keep_previous() {
    let mut region = Region::new();
    parse(&mut region, "volume", "-6");
    assert_eq!(region.volume, -6.0);
    parse(&mut region, "volume", "not_a_number");
    assert_eq!(region.volume, -6.0);
    parse(&mut region, "lokey", "garbage");
    assert_eq!(region.key_range, Range::new(0, 127));
}

#[test]
fn test_unknown_opcodes_are_recorded() {
    let mut region = Region::new();
    parse(&mut region, "made_up_opcode", "1");
    region.parse_opcode(&crate::parser::Opcode::new("locc999", "1"));
    assert!(region
        .unknown_opcodes
        .contains(&"made_up_opcode".to_string()));
}

#[test]
fn test_default_velocity_curve() {
    let region = prepared_region(&[]);
    assert!((region.velocity_gain(127) - 1.0).abs() < 1e-6);
    // The default curve is (v/127)^2: -12 dB at half velocity.
    let half = region.velocity_gain(64);
    assert!((half - (64.0f32 / 127.0).powi(2)).abs() < 1e-3);
    assert!(region.velocity_gain(1) < 0.01);

    // A flat veltrack disables the curve entirely.
    let flat = prepared_region(&[("amp_veltrack", "0")]);
    assert_eq!(flat.velocity_gain(1), 1.0);
    assert_eq!(flat.velocity_gain(127), 1.0);
}

#[test]
fn test_custom_velocity_curve_interpolates() {
    let region = prepared_region(&[("amp_velcurve_64", "0.5")]);
    assert!((region.velocity_gain(64) - 0.5).abs() < 1e-6);
    // Half way between the implicit (0, 0) anchor and (64, 0.5).
    assert!((region.velocity_gain(32) - 0.25).abs() < 1e-2);
    assert!((region.velocity_gain(127) - 1.0).abs() < 1e-6);
}

#[test]
fn test_note_gain_applies_key_crossfade() {
    let region = prepared_region(&[
        ("amp_veltrack", "0"),
        ("xfin_lokey", "10"),
        ("xfin_hikey", "20"),
        ("xf_keycurve", "gain"),
    ]);
    assert_eq!(region.note_gain(5, 100), 0.0);
    assert!((region.note_gain(15, 100) - 0.5).abs() < 1e-6);
    assert_eq!(region.note_gain(30, 100), 1.0);
}

#[test]
fn test_note_gain_velocity_crossfade_uses_velocity() {
    let region = prepared_region(&[
        ("amp_veltrack", "0"),
        ("xfin_lovel", "20"),
        ("xfin_hivel", "60"),
    ]);
    // Power curve midpoint: sqrt(0.5). The note number must not leak into
    // the velocity crossfade position.
    assert!((region.note_gain(100, 40) - 0.5f32.sqrt()).abs() < 1e-6);
    assert_eq!(region.note_gain(100, 10), 0.0);
    assert_eq!(region.note_gain(100, 80), 1.0);
}

#[test]
fn test_note_gain_applies_keytrack() {
    let region = prepared_region(&[("amp_veltrack", "0"), ("amp_keytrack", "6")]);
    let expected = crate::util::db_to_gain(12.0);
    assert!((region.note_gain(62, 100) - expected).abs() < 1e-4);
}

#[test]
fn test_base_gain_follows_volume_and_amplitude() {
    let region = prepared_region(&[("volume", "-6")]);
    assert!((region.base_gain() - crate::util::db_to_gain(-6.0)).abs() < 1e-6);

    let region = prepared_region(&[("amplitude", "50")]);
    assert!((region.base_gain() - 0.5).abs() < 1e-6);
}

#[test]
fn test_pitch_variation() {
    let region = prepared_region(&[("pitch_keycenter", "60")]);
    // One semitone above the keycenter at the default 100 cents/key.
    assert!((region.pitch_variation(61, 100) - 2.0f32.powf(1.0 / 12.0)).abs() < 1e-4);

    let region = prepared_region(&[("pitch_keycenter", "60"), ("transpose", "12")]);
    assert!((region.pitch_variation(60, 100) - 2.0).abs() < 1e-4);

    let region = prepared_region(&[("pitch_keycenter", "60"), ("tune", "100")]);
    assert!((region.pitch_variation(60, 100) - 2.0f32.powf(1.0 / 12.0)).abs() < 1e-4);

    let region = prepared_region(&[("pitch_keycenter", "60"), ("pitch_keytrack", "0")]);
    assert!((region.pitch_variation(90, 100) - 1.0).abs() < 1e-6);
}
