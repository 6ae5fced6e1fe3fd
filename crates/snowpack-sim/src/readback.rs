//! Asynchronous column readback.
//!
//! After each tick the column buffer is copied and handed to a worker thread,
//! which summarises it into a [`ColumnSnapshot`]. The simulation thread never
//! waits for the worker: it picks up finished snapshots with [`ReadbackHandle::poll`]
//! and keeps serving the last good one until a newer one arrives.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use rayon::prelude::*;
use snowpack_core::{ColumnData, ColumnIndex, Error, Result};
use tracing::{debug, trace};

/// Column buffer contents as of the end of a tick.
#[derive(Clone, Debug)]
pub struct ColumnSnapshot {
    /// Tick the columns were copied after.
    pub tick: u64,
    resolution: u32,
    columns: Arc<[ColumnData]>,
    /// Deepest snow in any column.
    pub max_height: f32,
    /// Sum of column mass.
    pub total_mass: f64,
}

impl ColumnSnapshot {
    /// Summarise a copied column buffer.
    pub fn new(tick: u64, resolution: u32, columns: Arc<[ColumnData]>) -> Self {
        let (max_height, total_mass) = columns
            .par_iter()
            .map(|c| (c.height, f64::from(c.mass)))
            .reduce(|| (0.0, 0.0), |a, b| (a.0.max(b.0), a.1 + b.1));
        Self {
            tick,
            resolution,
            columns,
            max_height,
            total_mass,
        }
    }

    #[inline]
    pub const fn resolution(&self) -> u32 {
        self.resolution
    }

    #[inline]
    pub fn columns(&self) -> &[ColumnData] {
        &self.columns
    }

    #[inline]
    pub fn get(&self, index: ColumnIndex) -> Option<&ColumnData> {
        if index.x >= self.resolution || index.z >= self.resolution {
            return None;
        }
        self.columns.get(index.to_linear(self.resolution))
    }
}

/// Freshness of the latest snapshot relative to the newest request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadbackStatus {
    /// Nothing has been read back yet.
    #[default]
    Empty,
    /// The latest snapshot matches the newest request.
    Current,
    /// The newest request is still in flight; `age` ticks behind.
    Stale { age: u64 },
}

/// Work request sent to the readback worker.
enum ReadbackRequest {
    Copy {
        tick: u64,
        generation: u64,
        columns: Arc<[ColumnData]>,
    },
    Shutdown,
}

struct ReadbackResult {
    generation: u64,
    snapshot: ColumnSnapshot,
}

/// Handle to the readback worker thread.
pub struct ReadbackHandle {
    request_tx: Sender<ReadbackRequest>,
    result_rx: Receiver<ReadbackResult>,
    thread: Option<JoinHandle<()>>,
    resolution: u32,
    /// Bumped on reset so snapshots of discarded state are ignored.
    generation: u64,
    latest: Option<Arc<ColumnSnapshot>>,
    last_requested: Option<u64>,
    dropped_requests: u64,
}

impl ReadbackHandle {
    /// Spawn the worker for a raster of `resolution x resolution` columns.
    pub fn spawn(resolution: u32) -> Result<Self> {
        let (request_tx, request_rx) = channel::bounded::<ReadbackRequest>(2);
        let (result_tx, result_rx) = channel::bounded::<ReadbackResult>(4);

        let thread = thread::Builder::new()
            .name("column-readback".to_string())
            .spawn(move || Self::worker_loop(resolution, &request_rx, &result_tx))?;

        Ok(Self {
            request_tx,
            result_rx,
            thread: Some(thread),
            resolution,
            generation: 0,
            latest: None,
            last_requested: None,
            dropped_requests: 0,
        })
    }

    fn worker_loop(
        resolution: u32,
        request_rx: &Receiver<ReadbackRequest>,
        result_tx: &Sender<ReadbackResult>,
    ) {
        loop {
            match request_rx.recv() {
                Ok(ReadbackRequest::Copy {
                    tick,
                    generation,
                    columns,
                }) => {
                    let snapshot = ColumnSnapshot::new(tick, resolution, columns);
                    if result_tx
                        .send(ReadbackResult {
                            generation,
                            snapshot,
                        })
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(ReadbackRequest::Shutdown) | Err(_) => return,
            }
        }
    }

    /// Queue a copy of `columns` taken after `tick`. Returns `false` if the
    /// worker is backed up and the request was dropped.
    pub fn request(&mut self, tick: u64, columns: &[ColumnData]) -> bool {
        debug_assert_eq!(columns.len(), self.resolution as usize * self.resolution as usize);
        let request = ReadbackRequest::Copy {
            tick,
            generation: self.generation,
            columns: Arc::from(columns),
        };
        match self.request_tx.try_send(request) {
            Ok(()) => {
                self.last_requested = Some(tick);
                true
            }
            Err(_) => {
                self.dropped_requests += 1;
                trace!(tick, "Readback queue full, request dropped");
                false
            }
        }
    }

    /// Pick up any finished snapshots without blocking.
    pub fn poll(&mut self) -> Option<&Arc<ColumnSnapshot>> {
        while let Ok(result) = self.result_rx.try_recv() {
            self.accept(result);
        }
        self.latest.as_ref()
    }

    fn accept(&mut self, result: ReadbackResult) {
        if result.generation != self.generation {
            debug!(tick = result.snapshot.tick, "Discarding readback from before reset");
            return;
        }
        let newer = self
            .latest
            .as_ref()
            .map_or(true, |latest| result.snapshot.tick >= latest.tick);
        if newer {
            self.latest = Some(Arc::new(result.snapshot));
        }
    }

    /// Last good snapshot, possibly stale.
    #[inline]
    pub fn latest(&self) -> Option<&Arc<ColumnSnapshot>> {
        self.latest.as_ref()
    }

    pub fn status(&self) -> ReadbackStatus {
        match (&self.latest, self.last_requested) {
            (None, _) => ReadbackStatus::Empty,
            (Some(latest), Some(requested)) if requested > latest.tick => ReadbackStatus::Stale {
                age: requested - latest.tick,
            },
            (Some(_), _) => ReadbackStatus::Current,
        }
    }

    /// Requests dropped because the worker fell behind.
    #[inline]
    pub const fn dropped_requests(&self) -> u64 {
        self.dropped_requests
    }

    /// Block until a snapshot of at least `tick` arrives.
    pub fn wait_for(&mut self, tick: u64, timeout: Duration) -> Result<Arc<ColumnSnapshot>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(latest) = self.poll() {
                if latest.tick >= tick {
                    return Ok(Arc::clone(latest));
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.result_rx.recv_timeout(remaining) {
                Ok(result) => self.accept(result),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::Worker(format!(
                        "timed out waiting for readback of tick {tick}"
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Worker("readback worker disconnected".to_string()));
                }
            }
        }
    }

    /// Forget all snapshots, including any still in flight.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.latest = None;
        self.last_requested = None;
    }

    /// Stop the worker thread and wait for it to finish.
    pub fn shutdown(&mut self) {
        let mut message = ReadbackRequest::Shutdown;
        loop {
            match self.request_tx.try_send(message) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => break,
                Err(TrySendError::Full(returned)) => {
                    // Unblock a worker stuck on a full result queue.
                    while self.result_rx.try_recv().is_ok() {}
                    message = returned;
                    thread::yield_now();
                }
            }
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ReadbackHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
