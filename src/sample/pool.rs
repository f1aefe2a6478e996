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

//! The sample pool: preloaded sample prefixes, shared across regions and
//! voices through reference counting.

use std::collections::HashMap;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hound::WavReader;
use tracing::{debug, info};

/// Frames preloaded per sample at instrument load time. Playback starts from
/// the prefix while the background loader fetches the full file.
pub const PRELOAD_FRAMES: usize = 8192;

/// A decoded sample: planar stereo samples tagged with the source rate. Mono
/// files are duplicated onto both channels; extra channels are dropped.
#[derive(Debug)]
pub struct AudioData {
    left: Vec<f32>,
    right: Vec<f32>,
    sample_rate: u32,
    source_channels: u16,
}

impl AudioData {
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    pub fn left(&self) -> &[f32] {
        &self.left
    }

    pub fn right(&self) -> &[f32] {
        &self.right
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn source_channels(&self) -> u16 {
        self.source_channels
    }

    pub fn memory_size(&self) -> usize {
        (self.left.len() + self.right.len()) * std::mem::size_of::<f32>()
    }
}

/// Error type for sample file operations.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
}

/// Reads up to `max_frames` frames of a WAV file into planar stereo floats.
pub fn load_frames(path: &Path, max_frames: usize) -> Result<AudioData, SampleError> {
    let mut reader = WavReader::open(path).map_err(|source| SampleError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let frames = (reader.duration() as usize).min(max_frames);

    let mut interleaved = Vec::with_capacity(frames * channels);
    let decode_error = |source| SampleError::Decode {
        path: path.to_path_buf(),
        source,
    };
    match spec.sample_format {
        hound::SampleFormat::Float => {
            for sample in reader.samples::<f32>().take(frames * channels) {
                interleaved.push(sample.map_err(decode_error)?);
            }
        }
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            for sample in reader.samples::<i32>().take(frames * channels) {
                interleaved.push(sample.map_err(decode_error)? as f32 * scale);
            }
        }
    }

    let frames = interleaved.len() / channels;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for frame in interleaved.chunks_exact(channels) {
        left.push(frame[0]);
        right.push(if channels > 1 { frame[1] } else { frame[0] });
    }

    Ok(AudioData {
        left,
        right,
        sample_rate: spec.sample_rate,
        source_channels: spec.channels,
    })
}

type Reader = WavReader<BufReader<std::fs::File>>;

fn open_reader(path: &Path) -> Result<Reader, SampleError> {
    WavReader::open(path).map_err(|source| SampleError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Maps sample identifiers to preloaded prefix buffers, de-duplicated across
/// regions. Full per-voice reads go through `load_frames` on the background
/// loader; the pool only holds the shared prefixes.
#[derive(Debug)]
pub struct SamplePool {
    root_directory: PathBuf,
    preloaded: HashMap<PathBuf, Arc<AudioData>>,
}

impl SamplePool {
    pub fn new(root_directory: &Path) -> Self {
        Self {
            root_directory: root_directory.to_path_buf(),
            preloaded: HashMap::new(),
        }
    }

    pub fn set_root_directory(&mut self, root_directory: &Path) {
        self.root_directory = root_directory.to_path_buf();
    }

    /// Resolves a sample identifier to a path: backslashes are normalized and
    /// relative paths join the current root directory.
    pub fn resolve(&self, sample: &str) -> PathBuf {
        let normalized = sample.replace('\\', "/");
        let path = Path::new(&normalized);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_directory.join(path)
        }
    }

    /// Preloads the prefix of a sample, reusing the cached buffer when a
    /// previous region referenced the same file. The prefix covers at most
    /// `wanted_frames` (the region's effective end), so short samples load
    /// fully and never need the background reader.
    pub fn preload(
        &mut self,
        sample: &str,
        wanted_frames: usize,
    ) -> Result<Arc<AudioData>, SampleError> {
        let path = self.resolve(sample);
        if let Some(data) = self.preloaded.get(&path) {
            debug!(path = ?path, "Using cached preload");
            return Ok(data.clone());
        }

        // Probe the file length first: covering wanted_frames with the
        // prefix lets the voice skip the full read entirely.
        let reader = open_reader(&path)?;
        let total_frames = reader.duration() as usize;
        drop(reader);

        let prefix_frames = if total_frames.min(wanted_frames) <= PRELOAD_FRAMES {
            total_frames.min(wanted_frames)
        } else {
            PRELOAD_FRAMES
        };

        let data = Arc::new(load_frames(&path, prefix_frames)?);
        info!(
            path = ?path,
            frames = data.frames(),
            sample_rate = data.sample_rate(),
            channels = data.source_channels(),
            "Preloaded sample"
        );
        self.preloaded.insert(path, data.clone());
        Ok(data)
    }

    pub fn clear(&mut self) {
        self.preloaded.clear();
    }

    /// Total memory held by preloaded prefixes, in bytes.
    pub fn total_memory_usage(&self) -> usize {
        self.preloaded.values().map(|d| d.memory_size()).sum()
    }
}
