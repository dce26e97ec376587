//! Background decode worker.
//!
//! One thread drains a FIFO of queued cells. Shutdown raises a stop flag
//! under the queue mutex and wakes the worker; the flag is checked every
//! time the worker holds the mutex, before and after waiting, so a stop
//! request can never be missed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::frame::frame_ref::{Claim, FrameCell};

struct QueueState<T> {
    jobs: VecDeque<Arc<FrameCell<T>>>,
    stop: bool,
}

struct JobQueue<T> {
    state: Mutex<QueueState<T>>,
    work: Condvar,
}

impl<T> JobQueue<T> {
    /// Next job, or `None` once stop was requested.
    fn next(&self) -> Option<Arc<FrameCell<T>>> {
        let mut state = self.state.lock();
        loop {
            if state.stop {
                return None;
            }
            if let Some(cell) = state.jobs.pop_front() {
                return Some(cell);
            }
            self.work.wait(&mut state);
        }
    }
}

pub(crate) struct PrefetchScheduler<T> {
    queue: Arc<JobQueue<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + Sync + 'static> PrefetchScheduler<T> {
    /// Spawns the worker. `run` receives each cell the worker managed to
    /// claim and must publish its outcome.
    pub fn start<F>(name: &str, run: F) -> Result<Self>
    where
        F: Fn(&FrameCell<T>) + Send + 'static,
    {
        let queue = Arc::new(JobQueue {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                stop: false,
            }),
            work: Condvar::new(),
        });

        let worker_queue = Arc::clone(&queue);
        let thread_name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(format!("prefetch:{}", name))
            .spawn(move || {
                debug!("[{}] Prefetch worker started", thread_name);
                while let Some(cell) = worker_queue.next() {
                    // Consumers may have stolen the job while it was queued.
                    if cell.claim(true) == Claim::Claimed {
                        run(&cell);
                    }
                }
                debug!("[{}] Prefetch worker stopped", thread_name);
            })
            .map_err(|e| {
                warn!("Failed to spawn prefetch worker: {}", e);
                CacheError::SystemResources
            })?;

        info!("Prefetch worker running for {}", name);
        Ok(Self {
            queue,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queues `cell` unless it is already queued, decoding, decoded or the
    /// worker is stopping. Never blocks on a decode.
    pub fn enqueue(&self, cell: &Arc<FrameCell<T>>) -> bool {
        let mut state = self.queue.state.lock();
        if state.stop || !cell.try_enqueue() {
            return false;
        }
        state.jobs.push_back(Arc::clone(cell));
        self.queue.work.notify_one();
        true
    }

    pub fn is_running(&self) -> bool {
        !self.queue.state.lock().stop && self.worker.lock().is_some()
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.queue.state.lock().jobs.len()
    }

    /// Stops and joins the worker. The job in progress completes; queued
    /// jobs are abandoned and their cells returned to `Empty`.
    pub fn shutdown(&self) {
        {
            let mut state = self.queue.state.lock();
            state.stop = true;
            self.queue.work.notify_all();
        }
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            if handle.join().is_err() {
                warn!("Prefetch worker panicked");
            }
        }
        let abandoned: Vec<_> = self.queue.state.lock().jobs.drain(..).collect();
        if !abandoned.is_empty() {
            debug!("Abandoning {} queued prefetches", abandoned.len());
        }
        for cell in abandoned {
            cell.cancel_queued();
        }
    }
}

impl<T> Drop for PrefetchScheduler<T> {
    fn drop(&mut self) {
        {
            let mut state = self.queue.state.lock();
            state.stop = true;
            self.queue.work.notify_all();
        }
        if let Some(handle) = self.worker.get_mut().take() {
            let _ = handle.join();
        }
    }
}
