//! Bounded worker pool used by push/pull to parallelize blob transfer.
//!
//! A fixed number of named threads drain a bounded channel, with the
//! first error any of them hits surfacing from `complete()`.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use crossbeam_channel::{bounded, Sender};

pub struct ParallelHandler<T> {
    handles: Vec<JoinHandle<()>>,
    sender: Option<Sender<T>>,
    error: Arc<Mutex<Option<anyhow::Error>>>,
}

impl<T: Send + 'static> ParallelHandler<T> {
    pub fn new<F>(name: &str, threads: usize, func: F) -> Self
    where
        F: Fn(T) -> Result<()> + Send + Clone + 'static,
    {
        let (sender, receiver) = bounded::<T>(threads * 2);
        let error = Arc::new(Mutex::new(None));

        let handles = (0..threads)
            .map(|i| {
                let receiver = receiver.clone();
                let func = func.clone();
                let error = error.clone();
                thread::Builder::new()
                    .name(format!("{}-{}", name, i))
                    .spawn(move || {
                        for item in receiver.iter() {
                            if error.lock().unwrap().is_some() {
                                continue;
                            }
                            if let Err(err) = func(item) {
                                let mut guard = error.lock().unwrap();
                                if guard.is_none() {
                                    *guard = Some(err);
                                }
                            }
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        ParallelHandler {
            handles,
            sender: Some(sender),
            error,
        }
    }

    /// A cloneable handle for feeding work into the pool. Dropping every
    /// clone (and the handler's own copy, via `complete`) closes the
    /// channel and lets the worker threads drain and exit.
    pub fn channel(&self) -> Sender<T> {
        self.sender.clone().expect("pool already completed")
    }

    /// Close the input channel, join every worker thread, and return the
    /// first error any of them raised.
    pub fn complete(mut self) -> Result<()> {
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        match self.error.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn processes_every_item() {
        let total = Arc::new(AtomicUsize::new(0));
        let total2 = total.clone();
        let pool = ParallelHandler::new("test-pool", 4, move |n: usize| {
            total2.fetch_add(n, Ordering::SeqCst);
            Ok(())
        });
        let tx = pool.channel();
        for i in 1..=100 {
            tx.send(i).unwrap();
        }
        drop(tx);
        pool.complete().unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 100 * 101 / 2);
    }

    #[test]
    fn surfaces_first_error() {
        let pool = ParallelHandler::new("test-pool-err", 2, |n: usize| {
            if n == 3 {
                anyhow::bail!("boom on {}", n);
            }
            Ok(())
        });
        let tx = pool.channel();
        for i in 0..10 {
            tx.send(i).unwrap();
        }
        drop(tx);
        assert!(pool.complete().is_err());
    }
}
