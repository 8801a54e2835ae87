//! Ordered merge of worker results.
//!
//! Workers finish in whatever order the scheduler allows, but the index lists
//! documents newest first. Rather than sorting once at the end, a single
//! collector thread owns the result vector and inserts each arrival at its
//! sorted position:
//!
//! ```text
//! worker ─┐
//! worker ─┼─ Handoff::deliver ──▶ rendezvous channel ──▶ collector thread
//! worker ─┘        ╲                                       │ partition_point + insert
//!                   ╲── races the CancelToken             ▼
//!                                                Vec<T>, newest first
//! ```
//!
//! Only the collector thread touches the vector, so it needs no lock. Each
//! insertion is a binary search plus a shift, which is fine for the size of
//! one directory. Items with equal timestamps keep their arrival order.
//!
//! The channel is a rendezvous: a worker's `deliver` blocks until the
//! collector takes the item or the phase is cancelled, whichever comes first.
//! A cancelled delivery returns [`Cancelled`] and the item is dropped.

use crossbeam_channel::{Receiver, Sender, select};
use std::thread::JoinHandle;
use thiserror::Error;

use crate::task::{CancelToken, TaskPanic};
use crate::types::Dated;

/// The phase was cancelled before the collector took the item.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("delivery cancelled")]
pub struct Cancelled;

/// Owner of the ordered result sequence.
pub struct Collector<T> {
    tx: Sender<T>,
    cancel: CancelToken,
    handle: JoinHandle<Vec<T>>,
}

/// A producer's end of the collector.
pub struct Handoff<T> {
    tx: Sender<T>,
    cancel: CancelToken,
}

impl<T> Clone for Handoff<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T: Dated + Send + 'static> Collector<T> {
    /// Start the collector thread for one phase.
    ///
    /// The collector stops taking items when `cancel` fires or once every
    /// sender is gone.
    pub fn start(cancel: CancelToken) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        let token = cancel.clone();
        let handle = std::thread::spawn(move || collect(rx, token));
        Self { tx, cancel, handle }
    }

    pub fn handoff(&self) -> Handoff<T> {
        Handoff {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Close the channel and return everything collected, newest first.
    ///
    /// Outstanding [`Handoff`]s keep the channel open, so drop them (or let
    /// their workers finish) first.
    pub fn finish(self) -> Result<Vec<T>, TaskPanic> {
        drop(self.tx);
        self.handle.join().map_err(TaskPanic::from_payload)
    }
}

impl<T: Dated> Handoff<T> {
    /// Hand `item` to the collector, or give up if the phase is cancelled.
    pub fn deliver(&self, item: T) -> Result<(), Cancelled> {
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }
        select! {
            send(self.tx, item) -> sent => sent.map_err(|_| Cancelled),
            recv(self.cancel.done()) -> _ => Err(Cancelled),
        }
    }
}

fn collect<T: Dated>(rx: Receiver<T>, cancel: CancelToken) -> Vec<T> {
    let mut items: Vec<T> = Vec::new();
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(item) => insert_ordered(&mut items, item),
                Err(_) => break,
            },
            recv(cancel.done()) -> _ => {
                tracing::debug!(collected = items.len(), "collector stopped by cancellation");
                break;
            }
        }
    }
    items
}

/// Insert after every item that is not older, keeping newest-first order.
fn insert_ordered<T: Dated>(items: &mut Vec<T>, item: T) {
    let time = item.time();
    let pos = items.partition_point(|x| x.time() >= time);
    items.insert(pos, item);
}
