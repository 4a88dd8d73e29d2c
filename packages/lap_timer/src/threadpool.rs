use std::num::NonZero;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::{iter, mem};

use tracing::trace;

/// Fixed set of worker threads that execute one task each per round.
///
/// Workers are spawned once per parallel run and reused for every round, so thread creation
/// is never part of a measurement. Task `i` of a round always executes on worker `i`, which
/// allows workers to keep per-thread state such as hardware counters across rounds.
///
/// Dropping the pool waits for all workers to exit.
#[derive(Debug)]
pub(crate) struct ThreadPool {
    command_txs: Vec<mpsc::Sender<Command>>,
    join_handles: Vec<JoinHandle<()>>,
    thread_count: NonZero<usize>,
}

impl ThreadPool {
    pub(crate) fn new(thread_count: NonZero<usize>) -> Self {
        let (command_txs, join_handles) = (0..thread_count.get())
            .map(|index| {
                let (tx, rx) = mpsc::channel();

                let handle = thread::Builder::new()
                    .name(format!("lap_timer-worker-{index}"))
                    .spawn(move || worker_entrypoint(&rx))
                    .expect("operating system refused to create a benchmark worker thread");

                (tx, handle)
            })
            .unzip();

        trace!(threads = thread_count.get(), "started benchmark worker threads");

        Self {
            command_txs,
            join_handles,
            thread_count,
        }
    }

    pub(crate) fn thread_count(&self) -> NonZero<usize> {
        self.thread_count
    }

    /// Executes one task per worker and waits for all of them to complete.
    ///
    /// The results are returned in the same order as the tasks.
    ///
    /// # Panics
    ///
    /// Panics if the number of tasks differs from the number of workers, or if a task panics.
    /// Tasks are expected to trap their own panics.
    #[cfg_attr(test, mutants::skip)] // If work does not get enqueued, deadlocks are very easy.
    #[expect(
        clippy::needless_pass_by_ref_mut,
        reason = "protects users from deadlock through concurrent usage"
    )]
    pub(crate) fn execute_each<'f, F, R>(&mut self, tasks: Vec<F>) -> Vec<R>
    where
        F: FnOnce() -> R + Send + 'f,
        R: Send + 'static,
    {
        // Two concurrent rounds on the same workers would deadlock on any barrier the tasks
        // use, hence the exclusive reference even though none is needed internally.
        assert_eq!(
            tasks.len(),
            self.thread_count.get(),
            "one task per worker thread is required"
        );

        let (result_txs, result_rxs): (Vec<_>, Vec<_>) = iter::repeat_with(oneshot::channel::<R>)
            .take(self.thread_count.get())
            .unzip();

        for ((tx, task), result_tx) in self.command_txs.iter().zip(tasks).zip(result_txs) {
            let task: Box<dyn FnOnce() -> R + Send + 'f> = Box::new(task);

            // SAFETY: We wait below for every task to report completion before returning or
            // panicking, so anything the task borrows for 'f outlives its execution. The 'static
            // is only there to satisfy the channel type.
            let task = unsafe {
                mem::transmute::<
                    Box<dyn FnOnce() -> R + Send + 'f>,
                    Box<dyn FnOnce() -> R + Send + 'static>,
                >(task)
            };

            tx.send(Command::Execute(Box::new(move || {
                let result = task();

                // The receiver only disappears if the round is being abandoned.
                drop(result_tx.send(result));
            })))
            .expect("worker thread must still exist - thread pool cannot operate without workers");
        }

        // A dropped sender means the task is no longer running, so every task has finished
        // once every receiver has resolved. Only then is it safe to panic.
        let results: Vec<_> = result_rxs.into_iter().map(|rx| rx.recv()).collect();

        results
            .into_iter()
            .map(|result| result.expect("benchmark worker panicked outside of a trapped callback"))
            .collect()
    }
}

impl Drop for ThreadPool {
    #[cfg_attr(test, mutants::skip)] // Impractical to test that stuff stops happening.
    fn drop(&mut self) {
        if thread::panicking() {
            // Shutting down may block or panic again, hiding the original panic.
            return;
        }

        for tx in self.command_txs.drain(..) {
            // A worker that already exited has nothing left to shut down.
            drop(tx.send(Command::Shutdown));
        }

        for handle in self.join_handles.drain(..) {
            handle
                .join()
                .expect("benchmark worker thread panicked outside of a trapped callback");
        }
    }
}

enum Command {
    Execute(Box<dyn FnOnce() + Send>),
    Shutdown,
}

#[cfg_attr(test, mutants::skip)] // Impractical to test that things do not happen when worker function is missing.
fn worker_entrypoint(rx: &mpsc::Receiver<Command>) {
    while let Ok(Command::Execute(f)) = rx.recv() {
        f();
    }
}
