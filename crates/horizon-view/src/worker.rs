//! Background synthesis workers.
//!
//! Jobs go in over a bounded channel and finished columns come back over a
//! completion channel that the tick loop drains. Workers never talk to a
//! connection; they only fill the cache.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use horizon_common::{ChunkCoord, SynthesisError, WorldId};
use horizon_world::{ChunkColumn, ColumnSynthesizer, RegionCache};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use crate::host::ChunkSource;

/// Queued jobs allowed per worker before submissions are refused.
const QUEUE_DEPTH_PER_WORKER: usize = 64;

/// One coordinate to synthesize into a world's cache.
#[derive(Debug, Clone)]
pub struct SynthesisJob {
    /// World the coordinate belongs to
    pub world: WorldId,
    /// Coordinate to fill
    pub coord: ChunkCoord,
    /// Synthesizer for the world's seed
    pub synthesizer: ColumnSynthesizer,
    /// Cache the result lands in
    pub cache: Arc<RegionCache>,
}

/// Result of a job, handed back to the tick loop.
#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    /// World the coordinate belongs to
    pub world: WorldId,
    /// Coordinate that was filled
    pub coord: ChunkCoord,
    /// The column, or `None` if synthesis failed
    pub column: Option<Arc<ChunkColumn>>,
}

/// Fixed-size pool of synthesis threads.
pub struct SynthesisPool {
    jobs: Option<Sender<SynthesisJob>>,
    completions: Receiver<SynthesisOutcome>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for SynthesisPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisPool")
            .field("workers", &self.workers.len())
            .field("completed", &self.completions.len())
            .finish_non_exhaustive()
    }
}

/// Worker count for a configured value; `0` means one per CPU core.
#[must_use]
pub fn resolve_worker_count(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

impl SynthesisPool {
    /// Spawns `threads` workers (`0` for one per core).
    pub fn new(threads: usize, source: Arc<dyn ChunkSource>) -> io::Result<Self> {
        let threads = resolve_worker_count(threads);
        let (job_tx, job_rx) = bounded::<SynthesisJob>(threads * QUEUE_DEPTH_PER_WORKER);
        let (done_tx, done_rx) = unbounded::<SynthesisOutcome>();

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            let source = Arc::clone(&source);
            let handle = thread::Builder::new()
                .name(format!("horizon-synth-{index}"))
                .spawn(move || worker_loop(&jobs, &done, source.as_ref()))?;
            workers.push(handle);
        }
        debug!("Started {threads} synthesis workers");

        Ok(Self {
            jobs: Some(job_tx),
            completions: done_rx,
            workers,
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues a job without blocking.
    pub fn submit(&self, job: SynthesisJob) -> Result<(), SynthesisError> {
        let jobs = self.jobs.as_ref().ok_or(SynthesisError::WorkerUnavailable)?;
        jobs.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => SynthesisError::QueueFull,
            TrySendError::Disconnected(_) => SynthesisError::WorkerUnavailable,
        })
    }

    /// Takes every finished job without blocking.
    pub fn drain(&self) -> Vec<SynthesisOutcome> {
        self.completions.try_iter().collect()
    }

    /// Waits up to `timeout` for one finished job.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SynthesisOutcome> {
        match self.completions.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Stops accepting jobs and joins the workers.
    pub fn shutdown(&mut self) {
        self.jobs.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Synthesis worker panicked");
            }
        }
    }
}

impl Drop for SynthesisPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    jobs: &Receiver<SynthesisJob>,
    done: &Sender<SynthesisOutcome>,
    source: &dyn ChunkSource,
) {
    while let Ok(job) = jobs.recv() {
        let outcome = run_job(job, source);
        if done.send(outcome).is_err() {
            break;
        }
    }
}

/// Fills one coordinate, preferring an already cached column.
fn run_job(job: SynthesisJob, source: &dyn ChunkSource) -> SynthesisOutcome {
    let SynthesisJob {
        world,
        coord,
        synthesizer,
        cache,
    } = job;

    let column = cache.fill_with(coord, || {
        Ok(match source.read_partial(&world, coord)? {
            Some(partial) => synthesizer.synthesize_from_source(&partial),
            None => synthesizer.synthesize(coord),
        })
    });

    SynthesisOutcome {
        world,
        coord,
        column,
    }
}
