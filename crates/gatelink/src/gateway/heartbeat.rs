//! Heartbeat monitor.
//!
//! One monitor runs per connection attempt. Each tick it checks that the
//! previous heartbeat was acknowledged; if so it sends the next one, and if
//! not it reports [`HeartbeatSignal::AckTimeout`] and exits without sending
//! anything further on the stale transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gatelink_proto::{encode, OpCode};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use super::transport::Outbound;

/// Why the monitor exited on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatSignal {
    /// The previous heartbeat was never acknowledged.
    AckTimeout,
    /// The transport stopped accepting frames.
    TransportClosed,
}

/// Handle owned by the controller for one running monitor.
#[derive(Debug)]
pub struct HeartbeatHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    signals: mpsc::Receiver<HeartbeatSignal>,
    acked: Arc<AtomicBool>,
    sent: Arc<AtomicU64>,
}

impl HeartbeatHandle {
    /// Record a HEARTBEAT_ACK.
    pub fn ack(&self) {
        self.acked.store(true, Ordering::SeqCst);
    }

    /// Whether a heartbeat is waiting for its acknowledgement.
    #[must_use]
    pub fn ack_pending(&self) -> bool {
        !self.acked.load(Ordering::SeqCst)
    }

    /// Heartbeats sent so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    /// Whether the monitor task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the monitor to report a signal; `None` once it has exited.
    pub async fn next_signal(&mut self) -> Option<HeartbeatSignal> {
        self.signals.recv().await
    }

    /// Stop the monitor and wait for its task to exit.
    ///
    /// No heartbeat is sent after this returns.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "heartbeat task panicked");
        }
    }
}

/// Start a heartbeat monitor.
///
/// The first heartbeat goes out after `first_delay`, then every `interval`.
/// `sequence` is read, never written.
pub fn start_heartbeat_task(
    interval: Duration,
    first_delay: Duration,
    outbound: mpsc::Sender<Outbound>,
    sequence: watch::Receiver<Option<u64>>,
) -> HeartbeatHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (signal_tx, signal_rx) = mpsc::channel(1);
    let acked = Arc::new(AtomicBool::new(true));
    let sent = Arc::new(AtomicU64::new(0));

    let task = tokio::spawn(heartbeat_loop(
        interval,
        first_delay,
        outbound,
        sequence,
        Arc::clone(&acked),
        Arc::clone(&sent),
        shutdown_rx,
        signal_tx,
    ));

    HeartbeatHandle {
        shutdown: shutdown_tx,
        task,
        signals: signal_rx,
        acked,
        sent,
    }
}

#[allow(clippy::too_many_arguments)]
async fn heartbeat_loop(
    interval: Duration,
    first_delay: Duration,
    outbound: mpsc::Sender<Outbound>,
    sequence: watch::Receiver<Option<u64>>,
    acked: Arc<AtomicBool>,
    sent: Arc<AtomicU64>,
    mut shutdown: watch::Receiver<bool>,
    signals: mpsc::Sender<HeartbeatSignal>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + first_delay, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        if !acked.swap(false, Ordering::SeqCst) {
            warn!(interval_ms = interval.as_millis() as u64, "heartbeat not acknowledged");
            let _ = signals.send(HeartbeatSignal::AckTimeout).await;
            break;
        }

        let seq = *sequence.borrow();
        let frame = match encode(OpCode::Heartbeat, &seq) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to encode heartbeat");
                break;
            }
        };

        if outbound.send(Outbound::Text(frame)).await.is_err() {
            let _ = signals.send(HeartbeatSignal::TransportClosed).await;
            break;
        }
        sent.fetch_add(1, Ordering::SeqCst);
        debug!(seq = ?seq, "heartbeat sent");
    }
}
