//! Flush worker pool
//!
//! A fixed set of worker threads fed through a crossbeam channel. Work is
//! submitted with [`ThreadPool::execute`], which returns a [`TaskHandle`] the
//! caller waits on for the result.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{FenceError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

/// Pool of worker threads
pub struct ThreadPool {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: Mutex<usize>,
    name: String,
}

impl ThreadPool {
    /// Start a pool with `size` workers (at least one)
    pub fn new(name: &str, size: usize) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let pool = Self {
            sender,
            receiver,
            workers: Mutex::new(Vec::new()),
            size: Mutex::new(0),
            name: name.to_string(),
        };
        pool.resize(size.max(1))?;
        Ok(pool)
    }

    /// Submit a unit of work
    pub fn execute<F, R>(&self, job: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        let wrapped: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            let _ = tx.send(outcome.map_err(|_| ()));
        });

        if self.sender.send(Message::Run(wrapped)).is_err() {
            tracing::warn!(pool = %self.name, "job submitted to a stopped pool");
        }
        TaskHandle { receiver: rx }
    }

    /// Change the number of workers
    pub fn resize(&self, new_size: usize) -> Result<()> {
        let new_size = new_size.max(1);
        let mut size = self.size.lock();
        let mut workers = self.workers.lock();

        if new_size > *size {
            for id in *size..new_size {
                let receiver = self.receiver.clone();
                let handle = thread::Builder::new()
                    .name(format!("{}-{}", self.name, id))
                    .spawn(move || worker_loop(receiver))?;
                workers.push(handle);
            }
        } else {
            for _ in new_size..*size {
                let _ = self.sender.send(Message::Shutdown);
            }
        }
        *size = new_size;

        // Reap workers that already picked up a shutdown message
        let mut live = Vec::with_capacity(workers.len());
        for handle in workers.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                live.push(handle);
            }
        }
        *workers = live;

        tracing::debug!(pool = %self.name, size = new_size, "pool resized");
        Ok(())
    }

    /// Current number of workers
    pub fn size(&self) -> usize {
        *self.size.lock()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for _ in 0..workers.len() {
            let _ = self.sender.send(Message::Shutdown);
        }
        for handle in workers {
            let _ = handle.join();
        }
    }
}

fn worker_loop(receiver: Receiver<Message>) {
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run(job) => job(),
            Message::Shutdown => break,
        }
    }
}

/// Result of a submitted job
pub struct TaskHandle<R> {
    receiver: Receiver<std::result::Result<R, ()>>,
}

impl<R> TaskHandle<R> {
    /// Block until the job finishes
    pub fn wait(self) -> Result<R> {
        match self.receiver.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(())) => Err(FenceError::Task("task panicked".into())),
            Err(_) => Err(FenceError::Task("task was dropped before running".into())),
        }
    }
}
