//! Simulated upload progress, driven by a timer that runs beside the real
//! upload and is cancelled as soon as either side lets go of it.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{sync::watch, task::AbortHandle};

pub const PROGRESS_STEP: u8 = 10;
/// The ticker never reports more than this; only real completion reaches 100.
pub const PROGRESS_CEILING: u8 = 90;
pub const PROGRESS_DONE: u8 = 100;

#[derive(Clone)]
struct TickerControl {
    cancelled: Arc<AtomicBool>,
    abort: AbortHandle,
}

impl TickerControl {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.abort.abort();
    }
}

/// Keeps a progress ticker alive. Dropping any guard, or calling
/// [`TickerGuard::cancel`] on one, stops the ticker for every holder.
pub struct TickerGuard {
    control: TickerControl,
}

impl TickerGuard {
    /// Second handle on the same ticker, for another owner's exit paths.
    pub fn share(&self) -> TickerGuard {
        TickerGuard {
            control: self.control.clone(),
        }
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for TickerGuard {
    fn drop(&mut self) {
        self.control.cancel();
    }
}

/// Spawns a ticker that advances `progress` by [`PROGRESS_STEP`] every
/// `period` until it reaches [`PROGRESS_CEILING`] or is cancelled.
pub fn spawn_progress_ticker(period: Duration, progress: Arc<watch::Sender<u8>>) -> TickerGuard {
    let cancelled = Arc::new(AtomicBool::new(false));
    let task_cancelled = cancelled.clone();
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // First tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if task_cancelled.load(Ordering::SeqCst) {
                break;
            }
            let mut reached_ceiling = false;
            progress.send_if_modified(|value| {
                if *value >= PROGRESS_CEILING {
                    reached_ceiling = true;
                    return false;
                }
                *value = value.saturating_add(PROGRESS_STEP).min(PROGRESS_CEILING);
                reached_ceiling = *value >= PROGRESS_CEILING;
                true
            });
            if reached_ceiling {
                break;
            }
        }
    });

    TickerGuard {
        control: TickerControl {
            cancelled,
            abort: handle.abort_handle(),
        },
    }
}
