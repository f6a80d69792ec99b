//! Broad index status polling.
//!
//! The build is observed by polling on a fixed interval until it reaches
//! `Ready` or `Error`. The polling task stops when its [`StatusPoller`] is
//! stopped or dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::semantic::BroadIndexStatus;

use super::backend::SearchBackend;

pub struct StatusPoller {
    cancel_token: CancellationToken,
    receiver: watch::Receiver<Option<BroadIndexStatus>>,
    handle: JoinHandle<()>,
}

impl StatusPoller {
    /// Start polling `backend` every `interval`. Must be called inside a
    /// tokio runtime.
    pub fn spawn(backend: Arc<dyn SearchBackend>, interval: Duration) -> Self {
        let cancel_token = CancellationToken::new();
        let (sender, receiver) = watch::channel(None);

        let handle = tokio::spawn(poll_loop(backend, interval, sender, cancel_token.clone()));

        Self {
            cancel_token,
            receiver,
            handle,
        }
    }

    /// Receiver of every observed status, `None` until the first poll.
    pub fn subscribe(&self) -> watch::Receiver<Option<BroadIndexStatus>> {
        self.receiver.clone()
    }

    #[cfg(test)]
    pub fn latest(&self) -> Option<BroadIndexStatus> {
        self.receiver.borrow().clone()
    }

    /// Wait for `Ready` or `Error`. Returns the last observed status if
    /// polling stops first.
    pub async fn wait_terminal(&self) -> Option<BroadIndexStatus> {
        let mut receiver = self.receiver.clone();
        loop {
            let current = receiver.borrow_and_update().clone();
            if let Some(status) = current {
                if status.is_terminal() {
                    return Some(status);
                }
            }
            if receiver.changed().await.is_err() {
                let last = receiver.borrow().clone();
                return last;
            }
        }
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(
    backend: Arc<dyn SearchBackend>,
    interval: Duration,
    sender: watch::Sender<Option<BroadIndexStatus>>,
    cancel_token: CancellationToken,
) {
    log::debug!("broad index status poller started ({interval:?})");

    loop {
        let polled = tokio::select! {
            _ = cancel_token.cancelled() => break,
            polled = backend.broad_index_status() => polled,
        };

        match polled {
            Ok(status) => {
                let terminal = status.is_terminal();
                sender.send_replace(Some(status));
                if terminal {
                    break;
                }
            }
            Err(err) => log::warn!("broad index status poll failed: {err}"),
        }

        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    log::debug!("broad index status poller stopped");
}
