/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Closeable, reopenable bounded channels.
//!
//! A controller reset closes every channel of the job and, unless the job is
//! being deleted, opens fresh ones.  Senders and receivers never hold the
//! slot lock across an await: they clone the current handle under the read
//! lock and then operate on the clone.  A send racing a reset therefore
//! fails with [`ChannelError::Closed`] or [`ChannelError::Cancelled`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
    #[error("channel is full")]
    Busy,
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation timed out")]
    Timeout,
}

struct Slot<T> {
    tx: Option<mpsc::Sender<T>>,
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Slot<T> {
    fn open(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Some(tx),
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

pub struct Mailbox<T> {
    name: &'static str,
    capacity: usize,
    slot: RwLock<Slot<T>>,
}

impl<T: Send> Mailbox<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            capacity,
            slot: RwLock::new(Slot::open(capacity)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_closed(&self) -> bool {
        self.slot.read().tx.is_none()
    }

    /// No value is waiting to be received.  A closed mailbox counts as empty.
    pub fn is_empty(&self) -> bool {
        match &self.slot.read().tx {
            Some(tx) => tx.capacity() == tx.max_capacity(),
            None => true,
        }
    }

        /// Drop the sending side.  Idempotent.
    pub fn close(&self) {
        self.slot.write().tx = None;
    }

    /// Replace the channel with a fresh, empty one.
    pub fn reopen(&self) {
        *self.slot.write() = Slot::open(self.capacity);
    }

    fn sender(&self) -> Result<mpsc::Sender<T>, ChannelError> {
        self.slot.read().tx.clone().ok_or(ChannelError::Closed)
    }

    /// Non-blocking send.
    pub fn try_send(&self, value: T) -> Result<(), ChannelError> {
        self.sender()?.try_send(value).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::Busy,
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
        })
    }

    /// Send, giving up on cancellation or after `timeout`.
    pub async fn send(&self, value: T, cancel: &CancellationToken, timeout: Duration) -> Result<(), ChannelError> {
        let tx = self.sender()?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChannelError::Cancelled),
            sent = tx.send(value) => sent.map_err(|_| ChannelError::Closed),
            _ = tokio::time::sleep(timeout) => Err(ChannelError::Timeout),
        }
    }

    /// Receive, giving up on cancellation or after `timeout` when one is given.
    pub async fn recv(&self, cancel: &CancellationToken, timeout: Option<Duration>) -> Result<T, ChannelError> {
        let rx = {
            let slot = self.slot.read();
            if slot.tx.is_none() {
                return Err(ChannelError::Closed);
            }
            slot.rx.clone()
        };
        let receive = async move {
            let mut rx = rx.lock().await;
            rx.recv().await.ok_or(ChannelError::Closed)
        };
        let deadline = async move {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChannelError::Cancelled),
            received = receive => received,
            _ = deadline => Err(ChannelError::Timeout),
        }
    }

    /// Discard everything currently queued.
    pub fn drain(&self) -> usize {
        let rx = self.slot.read().rx.clone();
        let Ok(mut rx) = rx.try_lock() else {
            return 0;
        };
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn send_then_recv() {
        let mb = Mailbox::new("test", 2);
        let cancel = CancellationToken::new();
        mb.send(7u32, &cancel, T).await.unwrap();
        assert_eq!(mb.recv(&cancel, Some(T)).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn full_channel_is_busy() {
        let mb = Mailbox::new("test", 1);
        mb.try_send(1u32).unwrap();
        assert_eq!(mb.try_send(2), Err(ChannelError::Busy));
        assert!(!mb.is_empty());
        assert_eq!(mb.drain(), 1);
        assert!(mb.is_empty());
        mb.try_send(3).unwrap();
    }

    #[tokio::test]
    async fn closed_channel_rejects_and_reopen_restores() {
        let mb = Mailbox::new("test", 1);
        let cancel = CancellationToken::new();
        mb.close();
        mb.close();
        assert!(mb.is_closed());
        assert_eq!(mb.try_send(1u32), Err(ChannelError::Closed));
        assert_eq!(mb.recv(&cancel, None).await, Err(ChannelError::Closed));

        mb.reopen();
        assert!(!mb.is_closed());
        mb.try_send(2).unwrap();
        assert_eq!(mb.recv(&cancel, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cancel_unblocks_a_pending_recv() {
        let mb = Arc::new(Mailbox::<u32>::new("test", 1));
        let cancel = CancellationToken::new();
        let waiter = {
            let mb = mb.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { mb.recv(&cancel, None).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), Err(ChannelError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn recv_times_out() {
        let mb = Mailbox::<u32>::new("test", 1);
        let cancel = CancellationToken::new();
        assert_eq!(
            mb.recv(&cancel, Some(Duration::from_secs(900))).await,
            Err(ChannelError::Timeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_send_survives_reset() {
        let mb = Arc::new(Mailbox::new("test", 1));
        mb.try_send(1u32).unwrap();
        let cancel = CancellationToken::new();
        let sender = {
            let mb = mb.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { mb.send(2, &cancel, Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        mb.close();
        mb.reopen();
        assert_eq!(sender.await.unwrap(), Err(ChannelError::Cancelled));
        mb.try_send(3).unwrap();
    }
}
