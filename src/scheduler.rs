//! # Event Loop
//!
//! Every worker runs its sampling sessions and request handlers as tasks on one
//! cooperative, single-threaded tokio runtime owned by a dedicated thread. Tasks only
//! yield while awaiting a remote response or another task; a hop's local computation
//! runs to completion once started.

use crate::error::{Result, SamplerError};
use crate::model::SessionId;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info};

type SessionTable = Arc<Mutex<FxHashMap<SessionId, AbortHandle>>>;

pub struct EventLoop {
    name: String,
    handle: Handle,
    sessions: SessionTable,
    next_session: AtomicU64,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl EventLoop {
    pub fn start(name: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| SamplerError::Runtime(err.to_string()))?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
            })
            .map_err(|err| SamplerError::Runtime(err.to_string()))?;
        let thread_id = thread.thread().id();
        info!(event_loop = name, "event loop started");

        Ok(Self {
            name: name.to_string(),
            handle,
            sessions: Arc::new(Mutex::new(FxHashMap::default())),
            next_session: AtomicU64::new(0),
            shutdown: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
            thread_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn next_session(&self) -> SessionId {
        SessionId(self.next_session.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of sessions submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Run a background task that is not tied to a session.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }

    pub fn submit<T, F>(&self, session: SessionId, future: F) -> SessionTask<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let sessions = self.sessions.clone();

        // Hold the table while spawning so the task cannot finish before it is listed.
        let mut table = self.sessions.lock();
        let task = self.handle.spawn(async move {
            let result = future.await;
            sessions.lock().remove(&session);
            let _ = tx.send(result);
        });
        table.insert(session, task.abort_handle());
        drop(table);
        debug!(event_loop = %self.name, %session, "session submitted");

        SessionTask {
            session,
            result: rx,
            sessions: self.sessions.clone(),
        }
    }

    /// Cancel a session and everything it is waiting on. Returns false when the
    /// session already finished.
    pub fn cancel(&self, session: SessionId) -> bool {
        cancel_in(&self.sessions, session)
    }

    /// Cancel every session and stop the loop thread. Idempotent.
    pub fn shutdown(&self) {
        let aborted: Vec<AbortHandle> = self.sessions.lock().drain().map(|(_, h)| h).collect();
        for handle in &aborted {
            handle.abort();
        }
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
            info!(event_loop = %self.name, cancelled = aborted.len(), "event loop stopping");
        }
        if std::thread::current().id() == self.thread_id {
            return;
        }
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn cancel_in(sessions: &SessionTable, session: SessionId) -> bool {
    match sessions.lock().remove(&session) {
        Some(handle) => {
            handle.abort();
            info!(%session, "session cancelled");
            true
        }
        None => false,
    }
}

/// Handle to a submitted session.
pub struct SessionTask<T> {
    session: SessionId,
    result: oneshot::Receiver<Result<T>>,
    sessions: SessionTable,
}

impl<T> SessionTask<T> {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn cancel(&self) -> bool {
        cancel_in(&self.sessions, self.session)
    }

    /// Block the calling thread until the session ends.
    ///
    /// Must not be called from inside an async context.
    pub fn wait(self) -> Result<T> {
        let session = self.session;
        self.result
            .blocking_recv()
            .unwrap_or(Err(SamplerError::Cancelled(session)))
    }

    pub async fn join(self) -> Result<T> {
        let session = self.session;
        self.result
            .await
            .unwrap_or(Err(SamplerError::Cancelled(session)))
    }
}
