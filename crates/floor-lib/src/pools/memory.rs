//! Memory load pool
//!
//! Holds the synthetic allocation as a list of one-megabyte chunks. Growth
//! allocates and randomly fills new chunks without holding the pool lock,
//! then commits them under a short write lock, so readers such as pool
//! snapshots never wait on a large fill. A background toucher rewrites one
//! byte per page every second to keep the chunks resident.
//!
//! Shrinking drops whole chunks without zeroing them first. The buffer
//! never leaves the process, so residual bytes are accepted.

use super::{ScaleOutcome, BYTES_PER_MB, MEMORY_DEADBAND};
use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Megabytes allocated or released per percentage point of deviation
const MB_PER_PERCENT: f64 = 10.0;

pub const PAGE_SIZE: usize = 4096;

pub const TOUCH_INTERVAL: Duration = Duration::from_secs(1);

type Chunk = Box<[u8]>;

#[derive(Default)]
struct Buffer {
    chunks: Vec<Chunk>,
    /// Set by `release`; later growth is discarded instead of committed
    released: bool,
}

pub struct MemoryPool {
    buffer: RwLock<Buffer>,
    max_mb: usize,
}

impl MemoryPool {
    pub fn new(max_mb: usize) -> Self {
        Self {
            buffer: RwLock::new(Buffer::default()),
            max_mb,
        }
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated_mb() * BYTES_PER_MB
    }

    pub fn allocated_mb(&self) -> usize {
        self.buffer.read().chunks.len()
    }

    pub fn max_bytes(&self) -> usize {
        self.max_mb * BYTES_PER_MB
    }

    /// Grow or shrink the buffer toward `target` memory percent
    ///
    /// Sizes are whole megabytes; the outcome is reported in megabytes.
    /// Growth does the allocation and fill before taking the write lock,
    /// so callers on an async runtime should run this on the blocking pool.
    pub fn scale_toward(&self, target: f64, current: f64) -> ScaleOutcome {
        let diff = target - current;

        if diff > MEMORY_DEADBAND {
            return self.grow((diff * MB_PER_PERCENT) as usize, current, target);
        }

        if diff < -MEMORY_DEADBAND {
            return self.shrink((-diff * MB_PER_PERCENT) as usize, current, target);
        }

        ScaleOutcome::Unchanged
    }

    fn grow(&self, additional_mb: usize, current: f64, target: f64) -> ScaleOutcome {
        let planned_from = self.allocated_mb();
        let planned_to = planned_from.saturating_add(additional_mb).min(self.max_mb);
        if planned_to <= planned_from {
            return ScaleOutcome::Unchanged;
        }

        let mut fresh = allocate_chunks(planned_to - planned_from);

        let mut buffer = self.buffer.write();
        if buffer.released {
            return ScaleOutcome::Unchanged;
        }

        // Another grow may have committed in the meantime; never pass the ceiling
        let from = buffer.chunks.len();
        let room = self.max_mb.saturating_sub(from);
        let surplus = if fresh.len() > room {
            fresh.split_off(room)
        } else {
            Vec::new()
        };
        buffer.chunks.extend(fresh);
        let to = buffer.chunks.len();
        drop(buffer);
        drop(surplus);

        if to == from {
            return ScaleOutcome::Unchanged;
        }

        info!(
            memory_mb = to,
            current = current,
            target = target,
            "Scaled up synthetic memory"
        );
        ScaleOutcome::ScaledUp { from, to }
    }

    fn shrink(&self, reduction_mb: usize, current: f64, target: f64) -> ScaleOutcome {
        let mut buffer = self.buffer.write();
        let from = buffer.chunks.len();
        if from == 0 {
            return ScaleOutcome::Unchanged;
        }

        let to = from.saturating_sub(reduction_mb);
        if to == from {
            return ScaleOutcome::Unchanged;
        }

        let dropped = buffer.chunks.split_off(to);
        buffer.chunks.shrink_to_fit();
        drop(buffer);
        drop(dropped);

        info!(
            memory_mb = to,
            current = current,
            target = target,
            "Scaled down synthetic memory"
        );
        ScaleOutcome::ScaledDown { from, to }
    }

    /// Rewrite one byte in every page of the buffer
    ///
    /// Locks one chunk at a time, so a full pass never blocks readers for
    /// longer than a single megabyte takes. Returns the number of pages
    /// touched.
    pub fn touch_pages(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut touched = 0;
        let mut index = 0;

        loop {
            let mut buffer = self.buffer.write();
            let Some(chunk) = buffer.chunks.get_mut(index) else {
                break;
            };
            for offset in (0..chunk.len()).step_by(PAGE_SIZE) {
                chunk[offset] = rng.gen();
                touched += 1;
            }
            index += 1;
        }

        touched
    }

    /// Spawn the background task that keeps the buffer resident
    pub fn spawn_toucher(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(TOUCH_INTERVAL) => {
                        let pages = pool.touch_pages();
                        if pages > 0 {
                            debug!(pages = pages, "Touched synthetic memory pages");
                        }
                    }
                }
            }
        })
    }

    /// Drop the whole buffer, returning how many bytes were held
    ///
    /// Growth still in flight when this runs is discarded.
    pub fn release(&self) -> usize {
        let chunks = {
            let mut buffer = self.buffer.write();
            buffer.released = true;
            std::mem::take(&mut buffer.chunks)
        };
        chunks.len() * BYTES_PER_MB
    }
}

/// Allocate `count` one-megabyte chunks filled with random bytes so every
/// page is committed
fn allocate_chunks(count: usize) -> Vec<Chunk> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let mut chunk = vec![0u8; BYTES_PER_MB].into_boxed_slice();
            rng.fill(&mut chunk[..]);
            chunk
        })
        .collect()
}
