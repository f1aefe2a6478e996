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

//! The background sample loader.
//!
//! Voices enqueue load jobs when they start; worker threads read the sample
//! file and publish the buffer through a `LoadSlot` with release/acquire
//! ordering. The render thread never blocks: it keeps playing the preloaded
//! prefix until it observes the slot ready. Workers also absorb `Discard`
//! jobs so dropping large buffers happens off the render thread.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::pool::{load_frames, AudioData};

/// Capacity of the job queue. Jobs past the bound are dropped by the sender,
/// leaving the voice on its preloaded prefix.
const QUEUE_CAPACITY: usize = 256;

/// How long shutdown waits for each worker. Exceeding this is a programmer
/// error (a wedged load) and fatal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(100);

/// Publication point between one voice and the worker loading its sample.
/// The worker stores the buffer and release-stores `ready`; the render
/// thread acquire-loads `ready` before taking the buffer. Cancelling makes
/// the worker drop its result instead.
#[derive(Debug, Default)]
pub struct LoadSlot {
    data: Mutex<Option<Arc<AudioData>>>,
    ready: AtomicBool,
    cancelled: AtomicBool,
}

impl LoadSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Takes the loaded buffer without blocking. Only meaningful after
    /// `is_ready` returned true.
    pub fn take_data(&self) -> Option<Arc<AudioData>> {
        self.data.try_lock().and_then(|mut data| data.take())
    }

    fn publish(&self, data: Arc<AudioData>) {
        *self.data.lock() = Some(data);
        self.ready.store(true, Ordering::Release);
    }
}

/// A job for the loader workers.
pub enum LoadJob {
    /// Read `frames` frames of the file and publish them into the slot.
    Load {
        slot: Arc<LoadSlot>,
        path: PathBuf,
        frames: usize,
    },
    /// Drop the carried buffers on the worker thread.
    Discard { buffers: Vec<Arc<AudioData>> },
    /// Stop the receiving worker.
    Terminate,
}

/// A bounded multi-consumer queue of sample load jobs served by a small
/// worker pool.
#[derive(Debug)]
pub struct SampleLoader {
    job_tx: Sender<LoadJob>,
    done_rx: Receiver<()>,
    workers: Vec<JoinHandle<()>>,
}

impl SampleLoader {
    pub fn new(num_workers: usize) -> Self {
        let (job_tx, job_rx) = bounded::<LoadJob>(QUEUE_CAPACITY);
        let (done_tx, done_rx) = bounded(num_workers);

        let workers = (0..num_workers)
            .map(|index| {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                std::thread::Builder::new()
                    .name(format!("sample-loader-{}", index))
                    .spawn(move || {
                        worker_loop(job_rx);
                        let _ = done_tx.send(());
                    })
                    .expect("failed to spawn sample loader worker")
            })
            .collect();

        Self {
            job_tx,
            done_rx,
            workers,
        }
    }

    /// A cloneable handle for enqueueing jobs; each voice owns one.
    pub fn sender(&self) -> Sender<LoadJob> {
        self.job_tx.clone()
    }

    /// Stops the workers, waiting a bounded time for each. A worker that
    /// fails to stop within the deadline means a load is wedged.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for _ in &self.workers {
            if self
                .job_tx
                .send_timeout(LoadJob::Terminate, SHUTDOWN_TIMEOUT)
                .is_err()
            {
                panic!("sample loader queue wedged during shutdown");
            }
        }
        for _ in &self.workers {
            if self.done_rx.recv_timeout(SHUTDOWN_TIMEOUT).is_err() {
                panic!("sample loader worker failed to stop in time");
            }
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for SampleLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(job_rx: Receiver<LoadJob>) {
    while let Ok(job) = job_rx.recv() {
        match job {
            LoadJob::Load { slot, path, frames } => {
                if slot.is_cancelled() {
                    continue;
                }
                match load_frames(&path, frames) {
                    Ok(data) => {
                        if slot.is_cancelled() {
                            debug!(path = ?path, "Dropping cancelled load");
                            continue;
                        }
                        slot.publish(Arc::new(data));
                    }
                    Err(e) => {
                        warn!(path = ?path, error = %e, "Sample load failed");
                    }
                }
            }
            LoadJob::Discard { buffers } => drop(buffers),
            LoadJob::Terminate => break,
        }
    }
}
