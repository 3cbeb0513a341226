//! Dedicated engine threads.
//!
//! A DuckDB connection is `Send` but not `Sync`, so each handle of the
//! bundled build owns one thread that holds the connection and runs jobs
//! from a FIFO queue. Callbacks fire on that thread.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use duckdb::Connection;
use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::udf::Registry;
use crate::error::{DuckDbError, DuckDbResult};

/// State owned by a worker thread.
pub(crate) struct Session {
    pub(crate) conn: Connection,
    /// Tables created through `register_buffer`.
    pub(crate) buffers: HashSet<String>,
    /// Functions registered through this connection.
    pub(crate) functions: Registry,
}

/// What the worker does after a job.
pub(crate) enum Flow {
    Continue,
    /// Shut down, release the connection, then report the outcome.
    Stop(Box<dyn FnOnce(DuckDbResult<()>) + Send>),
}

/// A unit of work. Receives `None` when the worker is already gone.
pub(crate) type Job = Box<dyn FnOnce(Option<&mut Session>) -> Flow + Send>;

/// Cancels whatever the worker's connection is running.
pub(crate) type Interrupt = Arc<dyn Fn() + Send + Sync>;

/// Handle used to queue jobs on a worker thread.
#[derive(Clone)]
pub(crate) struct Worker {
    tx: mpsc::UnboundedSender<Job>,
    label: &'static str,
}

/// What a freshly started worker hands back.
pub(crate) struct Started {
    pub(crate) worker: Worker,
    pub(crate) interrupt: Interrupt,
}

pub(crate) fn closed(label: &str) -> DuckDbError {
    DuckDbError::connection(format!("{} worker has shut down", label))
}

impl Worker {
    /// Start a thread that obtains its connection from `open`, reports
    /// through `ready`, then serves jobs until told to stop.
    pub(crate) fn start<O, R>(label: &'static str, open: O, ready: R)
    where
        O: FnOnce() -> DuckDbResult<Connection> + Send + 'static,
        R: FnOnce(DuckDbResult<Started>) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker { tx, label };

        let spawned = thread::Builder::new()
            .name(format!("duckdb-{}", label))
            .spawn(move || match open() {
                Ok(conn) => {
                    let handle = conn.interrupt_handle();
                    let interrupt: Interrupt = Arc::new(move || handle.interrupt());
                    ready(Ok(Started { worker, interrupt }));
                    serve(label, conn, rx);
                }
                Err(err) => ready(Err(err)),
            });

        if let Err(err) = spawned {
            // `ready` went down with the closure; its future reports the drop.
            error!(worker = label, error = %err, "failed to spawn DuckDB worker thread");
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        self.label
    }

    /// Queue a job. If the worker is gone the job runs right away with `None`.
    pub(crate) fn submit(&self, job: Job) {
        if let Err(mpsc::error::SendError(job)) = self.tx.send(job) {
            job(None);
        }
    }

    /// Queue `work` and hand its result to `done`.
    pub(crate) fn call<T, W>(&self, done: impl FnOnce(DuckDbResult<T>) + Send + 'static, work: W)
    where
        T: Send + 'static,
        W: FnOnce(&mut Session) -> DuckDbResult<T> + Send + 'static,
    {
        let label = self.label;
        self.submit(Box::new(move |session: Option<&mut Session>| {
            match session {
                Some(session) => done(work(session)),
                None => done(Err(closed(label))),
            }
            Flow::Continue
        }));
    }
}

fn serve(label: &'static str, conn: Connection, mut rx: mpsc::UnboundedReceiver<Job>) {
    debug!(worker = label, "DuckDB worker started");
    let mut session = Session {
        conn,
        buffers: HashSet::new(),
        functions: Registry::new(),
    };

    let mut report = None;
    while let Some(job) = rx.blocking_recv() {
        if let Flow::Stop(after) = job(Some(&mut session)) {
            report = Some(after);
            break;
        }
    }

    // Anything queued behind the stop request is told the worker is gone.
    rx.close();
    while let Ok(job) = rx.try_recv() {
        job(None);
    }

    let result = session
        .conn
        .close()
        .map_err(|(_, err)| DuckDbError::from(err));
    info!(worker = label, ok = result.is_ok(), "DuckDB worker stopped");
    if let Some(after) = report {
        after(result);
    }
}

/// Tracks queries running off the worker thread.
#[derive(Default)]
pub(crate) struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

/// Held while a query runs; releases its slot on drop.
pub(crate) struct Ticket(Arc<InFlight>);

impl InFlight {
    pub(crate) fn enter(self: &Arc<Self>) -> Ticket {
        *self.count.lock() += 1;
        Ticket(self.clone())
    }

    /// Block until nothing is in flight.
    pub(crate) fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }

    pub(crate) fn active(&self) -> usize {
        *self.count.lock()
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count -= 1;
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}
