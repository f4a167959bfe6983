//! The event-loop service hosting connection serve tasks.
//!
//! One `Reactor` owns a dedicated thread running a current-thread tokio
//! runtime. Every connection created through
//! [`crate::ConnectionBuilder::connect`] spawns its serve task there; the
//! serve task is the sole owner of the socket, the parser state and the
//! message store, so all of that state stays confined to the reactor
//! thread.

use std::io;
use std::thread::JoinHandle;

use tokio::runtime;
use tokio::sync::oneshot;

/// A single-threaded I/O event loop.
///
/// The reactor must outlive the connections driven by it; dropping it stops
/// the loop after in-flight handlers complete their current step.
#[derive(Debug)]
pub struct Reactor {
    handle: runtime::Handle,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Reactor {
    /// Start a reactor thread.
    pub fn new() -> io::Result<Self> {
        let runtime = runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("arango-reactor".to_string())
            .spawn(move || {
                tracing::debug!("reactor thread started");
                runtime.block_on(async move {
                    let _ = shutdown_rx.await;
                });
                tracing::debug!("reactor thread stopping");
            })?;

        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Spawn a task onto the reactor.
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_reactor_runs_spawned_tasks() {
        let reactor = Reactor::new().unwrap();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        reactor.spawn(async move {
            let _ = done_tx.send(());
        });
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("spawned task ran on the reactor thread");
    }
}
