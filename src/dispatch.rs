//! Delivery contexts for callback results.
//!
//! Capture backends and HTTP clients finish work on their own threads. Any
//! effect that presentation state can observe is handed to a
//! [`DeliveryContext`] instead of being run in place. [`MainQueue`] is the
//! UI-bound context: a single named thread that runs jobs in submission order.

use std::io;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle, ThreadId};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Somewhere to run completion jobs.
pub trait DeliveryContext: Send + Sync {
    fn deliver(&self, job: Job);
}

/// Runs jobs immediately on whichever thread delivers them.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl DeliveryContext for Inline {
    fn deliver(&self, job: Job) {
        job();
    }
}

/// Cloneable handle that posts jobs onto a [`MainQueue`] thread.
#[derive(Clone)]
pub struct MainQueueHandle {
    tx: Sender<Job>,
    thread_id: ThreadId,
}

impl MainQueueHandle {
    /// Thread the jobs run on.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Block until every job queued before this call has run.
    /// Returns immediately when called from the queue thread itself.
    pub fn sync(&self) {
        if self.is_current() {
            return;
        }
        let (tx, rx) = mpsc::channel::<()>();
        self.deliver(Box::new(move || {
            let _ = tx.send(());
        }));
        let _ = rx.recv();
    }
}

impl DeliveryContext for MainQueueHandle {
    fn deliver(&self, job: Job) {
        if self.tx.send(job).is_err() {
            log::warn!("Main queue has shut down; dropping delivered job");
        }
    }
}

/// Dedicated thread draining a job channel, one job at a time.
pub struct MainQueue {
    handle: MainQueueHandle,
    thread: Option<JoinHandle<()>>,
}

impl MainQueue {
    /// Spawn the queue thread.
    pub fn spawn(name: &str) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in rx {
                    job();
                }
            })?;
        let thread_id = thread.thread().id();
        Ok(Self {
            handle: MainQueueHandle { tx, thread_id },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> MainQueueHandle {
        self.handle.clone()
    }

    /// Stop accepting jobs from this owner and wait for the thread to drain.
    ///
    /// The thread exits once every outstanding [`MainQueueHandle`] is dropped.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        let (tx, _) = mpsc::channel();
        self.handle.tx = tx;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for MainQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainQueue")
            .field("thread_id", &self.handle.thread_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_inline_runs_immediately() {
        let hit = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&hit);
        Inline.deliver(Box::new(move || *flag.lock().unwrap() = true));
        assert!(*hit.lock().unwrap());
    }

    #[test]
    fn test_main_queue_runs_jobs_in_order_on_its_thread() {
        let queue = MainQueue::spawn("test-main").unwrap();
        let handle = queue.handle();
        let (tx, rx) = mpsc::channel();

        for i in 0..5 {
            let tx = tx.clone();
            let h = handle.clone();
            handle.deliver(Box::new(move || {
                tx.send((i, h.is_current())).unwrap();
            }));
        }

        let received: Vec<(i32, bool)> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(
            received,
            vec![(0, true), (1, true), (2, true), (3, true), (4, true)]
        );
        assert!(!handle.is_current());

        drop(handle);
        queue.shutdown();
    }

    #[test]
    fn test_sync_waits_for_queued_jobs() {
        let queue = MainQueue::spawn("test-sync").unwrap();
        let handle = queue.handle();
        let done = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&done);
        handle.deliver(Box::new(move || {
            std::thread::sleep(Duration::from_millis(50));
            *flag.lock().unwrap() = true;
        }));
        handle.sync();
        assert!(*done.lock().unwrap());

        drop(handle);
        queue.shutdown();
    }
}
