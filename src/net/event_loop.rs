//! Event loops: one single-threaded Tokio runtime per OS thread.
//!
//! # Responsibilities
//! - Run a current-thread runtime on a dedicated thread until told to quit
//! - Hand out cheap, cloneable handles for spawning work onto that thread
//! - Build the worker loop pool the listener topology is realized against

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;

/// Global counter for loop IDs. Only uniqueness matters.
static LOOP_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Handle to a running event loop.
///
/// Clones refer to the same loop. Equality is identity.
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<LoopInner>,
}

struct LoopInner {
    id: u64,
    name: String,
    handle: Handle,
    thread: ThreadId,
    quit: Mutex<Option<oneshot::Sender<()>>>,
}

impl EventLoop {
    fn new(name: String, handle: Handle, thread: ThreadId, quit: oneshot::Sender<()>) -> Self {
        Self {
            inner: Arc::new(LoopInner {
                id: LOOP_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                name,
                handle,
                thread,
                quit: Mutex::new(Some(quit)),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Runtime handle of this loop.
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Spawn a task onto this loop's thread.
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.handle.spawn(future)
    }

    /// Whether the caller is running on this loop's thread.
    pub fn is_in_loop_thread(&self) -> bool {
        thread::current().id() == self.inner.thread
    }

    /// Ask the loop to exit. Pending tasks are dropped once the loop returns.
    pub fn quit(&self) {
        let sender = self
            .inner
            .quit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = sender {
            let _ = tx.send(());
            tracing::debug!(loop_name = %self.inner.name, "Event loop quit requested");
        }
    }
}

impl PartialEq for EventLoop {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for EventLoop {}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

/// An OS thread owning exactly one event loop.
#[derive(Debug)]
pub struct EventLoopThread {
    event_loop: EventLoop,
    thread: Option<JoinHandle<()>>,
}

impl EventLoopThread {
    /// Start the thread and block until its loop is running.
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (ready_tx, ready_rx) = mpsc::channel::<io::Result<Handle>>();
        let (quit_tx, quit_rx) = oneshot::channel::<()>();

        let thread_name = name.clone();
        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            let runtime = match Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(runtime.handle().clone()));
            runtime.block_on(async {
                let _ = quit_rx.await;
            });
            tracing::debug!(loop_name = %thread_name, "Event loop exited");
        })?;

        let handle = ready_rx.recv().map_err(|_| {
            io::Error::other(format!("event loop thread '{name}' exited during startup"))
        })??;

        let event_loop = EventLoop::new(name, handle, thread.thread().id(), quit_tx);
        tracing::debug!(
            loop_name = %event_loop.name(),
            loop_id = event_loop.id(),
            "Event loop started"
        );

        Ok(Self {
            event_loop,
            thread: Some(thread),
        })
    }

    /// Handle to the loop owned by this thread.
    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    pub fn quit(&self) {
        self.event_loop.quit();
    }

    /// Join the thread. Must not be called from the loop's own thread.
    pub fn wait(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(loop_name = %self.event_loop.name(), "Event loop thread panicked");
            }
        }
    }
}

impl Drop for EventLoopThread {
    fn drop(&mut self) {
        if self.thread.is_some() && !self.event_loop.is_in_loop_thread() {
            self.quit();
            self.wait();
        }
    }
}

/// The worker loop set: `count` loops, each on its own thread.
#[derive(Debug)]
pub struct EventLoopThreadPool {
    threads: Vec<EventLoopThread>,
}

impl EventLoopThreadPool {
    /// Start `count` loops named `{prefix}-{index}`.
    pub fn new(count: usize, prefix: &str) -> io::Result<Self> {
        let threads = (0..count)
            .map(|i| EventLoopThread::spawn(format!("{prefix}-{i}")))
            .collect::<io::Result<Vec<_>>>()?;
        tracing::info!(count, "Worker event loops started");
        Ok(Self { threads })
    }

    /// Loops in index order.
    pub fn loops(&self) -> Vec<EventLoop> {
        self.threads.iter().map(|t| t.event_loop().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Quit every loop and join every thread.
    pub fn stop(&mut self) {
        for thread in &self.threads {
            thread.quit();
        }
        for thread in &mut self.threads {
            thread.wait();
        }
    }
}

/// Number of worker loops to run when the configuration leaves it open.
pub fn default_loop_count() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}
