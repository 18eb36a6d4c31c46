//! Rendezvous between the read loop and the consumer of one table.
//!
//! The read loop keeps a [`TableWaiter`] and parks on it after delivering a
//! table; the table keeps the matching [`TableDone`] and fires it once, when it
//! is drained, fails or is dropped. Only one table of a read is in flight at
//! a time.

use models::CursorStats;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// How a table ended, reported by the table itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    Drained(CursorStats),
    Aborted { reason: String },
}

/// What the read loop learns after waiting on a delivered table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Consumed(CursorStats),
    Failed { reason: String },
    /// The read was cancelled while the table was in flight.
    Cancelled,
}

pub struct TableDone {
    tx: Option<oneshot::Sender<Release>>,
    cancel: CancellationToken,
}

impl TableDone {
    /// A signal nobody waits on, for tables drained outside of a read loop.
    pub fn detached() -> Self {
        Self {
            tx: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fires the signal, later calls are ignored.
    pub fn finish(&mut self, release: Release) {
        if let Some(tx) = self.tx.take() {
            // 等待方可能已经因取消而退出
            let _ = tx.send(release);
        }
    }
}

pub struct TableWaiter {
    rx: oneshot::Receiver<Release>,
    cancel: CancellationToken,
}

impl TableWaiter {
    /// Parks until the table is released or `read_cancel` fires.
    ///
    /// On cancellation the table is told to stop producing before returning.
    pub async fn wait(mut self, read_cancel: &CancellationToken) -> Ack {
        tokio::select! {
            biased;
            res = &mut self.rx => match res {
                Ok(Release::Drained(stats)) => Ack::Consumed(stats),
                Ok(Release::Aborted { reason }) => Ack::Failed { reason },
                // the signal was dropped without firing, nothing was read
                Err(_) => Ack::Consumed(CursorStats::default()),
            },
            _ = read_cancel.cancelled() => {
                self.cancel.cancel();
                Ack::Cancelled
            }
        }
    }
}

/// A linked signal pair for one table of the read governed by `read_cancel`.
pub fn handoff(read_cancel: &CancellationToken) -> (TableDone, TableWaiter) {
    let (tx, rx) = oneshot::channel();
    let cancel = read_cancel.child_token();
    (
        TableDone {
            tx: Some(tx),
            cancel: cancel.clone(),
        },
        TableWaiter { rx, cancel },
    )
}
