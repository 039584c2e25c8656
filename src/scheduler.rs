use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

struct TickHandle {
    stop: Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl TickHandle {
    fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.thread.join();
    }
}

/// Recurring timers keyed by id. Scheduling an id that is already running
/// replaces the previous timer.
#[derive(Default)]
pub struct TickScheduler {
    ticks: Mutex<HashMap<String, TickHandle>>,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&self, id: &str, interval: Duration, on_tick: F) -> Result<()>
    where
        F: Fn() + Send + 'static,
    {
        if interval.is_zero() {
            bail!("scheduler: interval for {id} must be positive");
        }

        let mut ticks = self.ticks.lock();
        if let Some(existing) = ticks.remove(id) {
            existing.stop();
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name(format!("xeg-tick-{id}"))
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => on_tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .with_context(|| format!("scheduler: spawn timer {id}"))?;

        ticks.insert(
            id.to_string(),
            TickHandle {
                stop: stop_tx,
                thread,
            },
        );
        Ok(())
    }

    /// Returns `false` when nothing was scheduled under `id`.
    pub fn cancel(&self, id: &str) -> bool {
        let handle = self.ticks.lock().remove(id);
        match handle {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let handles: Vec<_> = self.ticks.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.stop();
        }
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.ticks.lock().contains_key(id)
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
