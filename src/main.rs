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

use std::error::Error;
use std::path::Path;

use clap::{crate_version, Parser, Subcommand};
use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::info;

use sfzplay::{StereoBlock, Synth};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "An SFZ sampler engine."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Loads an SFZ instrument and lists its regions.
    Regions {
        /// The path to the SFZ file.
        sfz_path: String,
    },
    /// Renders a note offline to a WAV file.
    Render {
        /// The path to the SFZ file.
        sfz_path: String,
        /// The output WAV file.
        #[arg(short, long, default_value = "out.wav")]
        output: String,
        /// The MIDI note to play.
        #[arg(short, long, default_value_t = 60)]
        note: u8,
        /// The note-on velocity.
        #[arg(short, long, default_value_t = 100)]
        velocity: u8,
        /// How long to hold the note, in seconds.
        #[arg(long, default_value_t = 1.0)]
        hold: f32,
        /// The output sample rate.
        #[arg(long, default_value_t = 44100)]
        sample_rate: u32,
    },
}

fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off,sfzplay=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Regions { sfz_path } => {
            let mut synth = Synth::new();
            synth.load_sfz(Path::new(&sfz_path))?;

            println!("Regions (count: {}):", synth.num_regions());
            for index in 0..synth.num_regions() {
                if let Some(region) = synth.get_region_view(index) {
                    println!("{:3}: {}", index, region);
                }
            }

            let unknown = synth.unknown_opcodes();
            if !unknown.is_empty() {
                println!("\nUnknown opcodes (count: {}):", unknown.len());
                for opcode in unknown {
                    println!("- {}", opcode);
                }
            }

            let labels = synth.cc_labels();
            if !labels.is_empty() {
                println!("\nController labels (count: {}):", labels.len());
                for (cc, label) in labels {
                    println!("- {}: {}", cc, label);
                }
            }
        }
        Commands::Render {
            sfz_path,
            output,
            note,
            velocity,
            hold,
            sample_rate,
        } => {
            render(
                Path::new(&sfz_path),
                Path::new(&output),
                note,
                velocity,
                hold,
                sample_rate,
            )?;
        }
    }

    Ok(())
}

/// Renders a single note: held for `hold` seconds, then released and rendered
/// until every voice has wound down (bounded by a ten second tail).
fn render(
    sfz_path: &Path,
    output_path: &Path,
    note: u8,
    velocity: u8,
    hold: f32,
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    const BLOCK_SIZE: usize = 1024;
    const MAX_TAIL_SECONDS: f32 = 10.0;

    let mut synth = Synth::new();
    synth.prepare_to_play(sample_rate as f64, BLOCK_SIZE);
    synth.load_sfz(sfz_path)?;

    let mut writer = WavWriter::create(
        output_path,
        WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        },
    )?;

    let hold_blocks = ((hold * sample_rate as f32) as usize).div_ceil(BLOCK_SIZE);
    let max_tail_blocks = ((MAX_TAIL_SECONDS * sample_rate as f32) as usize) / BLOCK_SIZE;
    let mut block = StereoBlock::new(BLOCK_SIZE);

    synth.register_note_on(1, note, velocity, 0);
    info!(note, velocity, hold, "Rendering note");

    for _ in 0..hold_blocks {
        block.clear();
        synth.render_block(&mut block, 0, BLOCK_SIZE);
        write_block(&mut writer, &block)?;
    }

    synth.register_note_off(1, note, 0, 0);
    for _ in 0..max_tail_blocks {
        if synth.active_voice_count() == 0 {
            break;
        }
        block.clear();
        synth.render_block(&mut block, 0, BLOCK_SIZE);
        write_block(&mut writer, &block)?;
    }

    writer.finalize()?;
    info!(path = ?output_path, "Wrote render");
    Ok(())
}

fn write_block<W: std::io::Write + std::io::Seek>(
    writer: &mut WavWriter<W>,
    block: &StereoBlock,
) -> Result<(), Box<dyn Error>> {
    for i in 0..block.frames() {
        let (left, right) = block.frame(i);
        writer.write_sample(left)?;
        writer.write_sample(right)?;
    }
    Ok(())
}
