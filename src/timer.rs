//! Deadline actor used to bound the wait for an acknowledgement.
//!
//! Waiting for an ACK is an ordinary socket receive with no timeout of its
//! own.  A [`DeadlineActor`] is a persistent background task, one per
//! connection, that holds a single deadline:
//!
//! - Initially the deadline is "infinite" and the actor sleeps.
//! - [`DeadlineActor::arm`] sets it to `now + timeout` and hands back a
//!   [`Deadline`] ticket.
//! - When the deadline passes the actor publishes the ticket as expired,
//!   resets itself to "infinite" and goes back to waiting for the next arm.
//!
//! The waiting side races its receive against [`DeadlineActor::expired`];
//! whichever completes first wins.  Both directions use `tokio::sync::watch`
//! so an expiry published before the waiter is polled is still observed.
//!
//! The task is aborted when the actor is dropped, which happens when the
//! owning connection is destroyed.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Ticket returned by [`DeadlineActor::arm`].
///
/// Tickets are ordered: a later arm always carries a larger generation, and
/// an expiry for generation `n` also satisfies every ticket `<= n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    generation: u64,
}

/// Current deadline as seen by the actor task.
#[derive(Debug, Clone, Copy)]
struct Armed {
    generation: u64,
    /// `None` means infinite: the actor takes no action.
    at: Option<Instant>,
}

/// Background timer bound 1:1 to a connection.
#[derive(Debug)]
pub struct DeadlineActor {
    arm_tx: watch::Sender<Armed>,
    fired_rx: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl DeadlineActor {
    /// Start the actor task on the current tokio runtime.
    pub fn spawn() -> Self {
        let (arm_tx, arm_rx) = watch::channel(Armed {
            generation: 0,
            at: None,
        });
        let (fired_tx, fired_rx) = watch::channel(0u64);
        let task = tokio::spawn(run(arm_rx, fired_tx));
        Self {
            arm_tx,
            fired_rx,
            task,
        }
    }

    /// Arm the deadline to fire `timeout` from now, replacing any previous one.
    pub fn arm(&self, timeout: Duration) -> Deadline {
        let mut generation = 0;
        self.arm_tx.send_modify(|armed| {
            armed.generation += 1;
            armed.at = Some(Instant::now() + timeout);
            generation = armed.generation;
        });
        Deadline { generation }
    }

    /// Put the deadline back to infinite without firing.
    pub fn disarm(&self) {
        self.arm_tx.send_modify(|armed| armed.at = None);
    }

    /// Resolve once `deadline` (or a later one) has fired.
    ///
    /// Also resolves if the actor task has stopped, since nothing could ever
    /// release the waiter otherwise.
    pub async fn expired(&self, deadline: Deadline) {
        let mut fired = self.fired_rx.clone();
        let _ = fired.wait_for(|g| *g >= deadline.generation).await;
    }
}

impl Drop for DeadlineActor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(mut arm_rx: watch::Receiver<Armed>, fired_tx: watch::Sender<u64>) {
    let mut armed: Option<(u64, Instant)> = None;

    loop {
        match armed {
            None => {
                if arm_rx.changed().await.is_err() {
                    break;
                }
                armed = current(&mut arm_rx);
            }
            Some((generation, at)) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {
                        log::trace!("[rudp:timer] deadline {generation} expired");
                        fired_tx.send_replace(generation);
                        armed = None;
                    }
                    changed = arm_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        armed = current(&mut arm_rx);
                    }
                }
            }
        }
    }
}

fn current(arm_rx: &mut watch::Receiver<Armed>) -> Option<(u64, Instant)> {
    let armed = *arm_rx.borrow_and_update();
    armed.at.map(|at| (armed.generation, at))
}
