//! Debounced query trigger.
//!
//! [`Debouncer`] is the bare state machine, driven by explicit instants.
//! [`DebouncedTrigger`] runs one on a tokio task and emits settled values.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebouncePhase {
    Idle,
    /// A candidate is waiting out the quiet period.
    Pending,
}

/// Quiet-period state machine.
///
/// Each input replaces the candidate and restarts the quiet period. A
/// candidate that survives the full period is settled by [`poll`](Self::poll),
/// which returns it and goes back to idle.
#[derive(Debug, Clone)]
pub struct Debouncer<V> {
    quiet: Duration,
    pending: Option<(V, Instant)>,
}

impl<V> Debouncer<V> {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet
    }

    pub fn input(&mut self, value: V, now: Instant) {
        self.pending = Some((value, now + self.quiet));
    }

    /// When the current candidate settles, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    pub fn phase(&self) -> DebouncePhase {
        if self.pending.is_some() {
            DebouncePhase::Pending
        } else {
            DebouncePhase::Idle
        }
    }

    pub fn candidate(&self) -> Option<&V> {
        self.pending.as_ref().map(|(value, _)| value)
    }

    /// The settled value, once `now` has reached the deadline.
    pub fn poll(&mut self, now: Instant) -> Option<V> {
        match self.pending {
            Some((_, deadline)) if now >= deadline => self.pending.take().map(|(value, _)| value),
            _ => None,
        }
    }

    /// Drop the candidate without settling it.
    pub fn cancel(&mut self) -> Option<V> {
        self.pending.take().map(|(value, _)| value)
    }
}

/// Background debouncer for a stream of inputs such as a search box.
///
/// Settled values are queued for [`settled`](Self::settled) and the latest
/// one is available from [`current`](Self::current). Dropping the trigger
/// stops the task and discards any pending candidate; a fetch already
/// started for an earlier settled value is unaffected.
#[derive(Debug)]
pub struct DebouncedTrigger<V> {
    input_tx: mpsc::UnboundedSender<V>,
    settled_rx: mpsc::UnboundedReceiver<V>,
    current_rx: watch::Receiver<Option<V>>,
    task: JoinHandle<()>,
}

impl<V> DebouncedTrigger<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Start the trigger. Must be called inside a tokio runtime.
    pub fn spawn(quiet: Duration) -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();
        let (current_tx, current_rx) = watch::channel(None);
        let task = tokio::spawn(run(Debouncer::new(quiet), input_rx, settled_tx, current_tx));
        Self {
            input_tx,
            settled_rx,
            current_rx,
            task,
        }
    }

    pub fn input(&self, value: V) {
        // Only fails once the task is gone, i.e. during drop.
        let _ = self.input_tx.send(value);
    }

    /// Wait for the next settled value.
    pub async fn settled(&mut self) -> Option<V> {
        self.settled_rx.recv().await
    }

    pub fn try_settled(&mut self) -> Option<V> {
        self.settled_rx.try_recv().ok()
    }

    /// The most recently settled value.
    pub fn current(&self) -> Option<V> {
        self.current_rx.borrow().clone()
    }

    /// Watch handle that changes each time a value settles.
    pub fn watch(&self) -> watch::Receiver<Option<V>> {
        self.current_rx.clone()
    }
}

impl<V> Drop for DebouncedTrigger<V> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<V: Clone>(
    mut debouncer: Debouncer<V>,
    mut input_rx: mpsc::UnboundedReceiver<V>,
    settled_tx: mpsc::UnboundedSender<V>,
    current_tx: watch::Sender<Option<V>>,
) {
    loop {
        let deadline = debouncer.deadline();
        tokio::select! {
            input = input_rx.recv() => match input {
                Some(value) => debouncer.input(value, Instant::now()),
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(value) = debouncer.poll(Instant::now()) {
                    debug!(quiet_ms = debouncer.quiet_period().as_millis() as u64, "input settled");
                    current_tx.send_replace(Some(value.clone()));
                    if settled_tx.send(value).is_err() {
                        break;
                    }
                }
            }
        }
    }
}
