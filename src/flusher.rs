//! Periodic background flush.

use {
    crate::{
        error::{Error, Result},
        writer::Shared,
    },
    std::{
        sync::{mpsc, Arc},
        thread,
    },
};

/// Handle to the thread flushing a writer's buffer on a fixed interval.
///
/// The thread waits on a cancellation channel with a timeout; every timeout is
/// a tick. Dropping or signalling the sender ends the loop.
pub(crate) struct Flusher {
    done: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl Flusher {
    /// Start flushing `shared` every configured interval.
    ///
    /// # Returns
    /// `None` when no interval is configured.
    pub(crate) fn spawn(shared: &Arc<Shared>) -> Result<Option<Self>> {
        let interval = match shared.meta.flush_interval {
            Some(interval) if !interval.is_zero() => interval,
            _ => return Ok(None),
        };

        let (done, done_rx) = mpsc::channel::<()>();
        let shared = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("rollfile-flusher".to_string())
            .spawn(move || loop {
                match done_rx.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => shared.tick(),
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(Error::Spawn)?;

        Ok(Some(Flusher { done, handle }))
    }

    /// Signal the thread and wait for it to exit.
    ///
    /// Must not be called while holding the writer state lock: a tick in
    /// progress needs it to finish.
    pub(crate) fn stop(self) {
        let _ = self.done.send(());
        if self.handle.join().is_err() {
            tracing::warn!("background flush thread panicked");
        }
    }
}
