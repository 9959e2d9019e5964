//! Cancellable one-shot and interval timers that post into an actor mailbox
//!
//! Every arm bumps the slot generation. The message carries the generation it
//! was armed with, so a tick that raced a cancel can be recognised and dropped
//! by the receiver with [`TimerSlot::is_current`].

use std::time::Duration;

use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle, time::Instant};

#[derive(Debug, Default)]
pub(crate) struct TimerSlot {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl TimerSlot {
    /// Fires `make(generation)` once after `delay`, replacing any armed timer.
    pub(crate) fn arm<M, F>(&mut self, delay: Duration, tx: &UnboundedSender<M>, make: F)
    where
        M: Send + 'static,
        F: FnOnce(u64) -> M + Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        let tx = tx.clone();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(make(generation));
        }));
    }

    /// Fires `make(generation)` every `period`, first tick one period from now.
    pub(crate) fn arm_interval<M, F>(&mut self, period: Duration, tx: &UnboundedSender<M>, make: F)
    where
        M: Send + 'static,
        F: Fn(u64) -> M + Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        let tx = tx.clone();
        self.handle = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                if tx.send(make(generation)).is_err() {
                    break;
                }
            }
        }));
    }

    pub(crate) fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
