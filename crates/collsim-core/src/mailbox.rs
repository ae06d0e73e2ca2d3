//! In-process mailboxes and the rendezvous registry that pairs them
//!
//! A mailbox is a single-producer/single-consumer FIFO between the two
//! threadblocks forming the endpoints of one channel. Receives poll with a
//! bounded budget so that a missing sender surfaces as a timeout instead of
//! a hang: the product `MAX_TRIES * SLEEP_TIME` is the deadlock-detection
//! window (~100 ms).
//!
//! The manager implements a symmetric two-phase rendezvous. Endpoints
//! initialize in parallel and may arrive in either order: the sender
//! registers a pending mailbox immediately, the receiver polls until it can
//! atomically move the entry to the established map.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::buffer::{BufferKind, Chunk};
use crate::error::{Error, Result};

/// Polling attempts for every bounded wait in the engine
pub const MAX_TRIES: usize = 100_000;

/// Backoff between polling attempts
pub const SLEEP_TIME: Duration = Duration::from_micros(1);

/// One in-flight transfer.
///
/// The metadata mirrors the sender's instruction so the receiver can assert
/// that the sender's intent matches its own instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub chunks: Vec<Chunk>,
    pub src_buf: BufferKind,
    pub src_off: i64,
    pub dst_buf: BufferKind,
    pub dst_off: i64,
}

/// Bounded-wait FIFO between one sender and one receiver
#[derive(Debug, Default)]
pub struct Mailbox {
    inbox: Mutex<VecDeque<Message>>,
}

impl Mailbox {
    /// Enqueue a message. Never fails.
    pub fn send(&self, msg: Message) {
        self.inbox.lock().push_back(msg);
    }

    /// Poll for the front message, up to [`MAX_TRIES`] attempts with
    /// [`SLEEP_TIME`] backoff. Returns `None` once the budget is exhausted.
    pub fn receive(&self) -> Option<Message> {
        for _ in 0..MAX_TRIES {
            if let Some(msg) = self.inbox.lock().pop_front() {
                return Some(msg);
            }
            std::thread::sleep(SLEEP_TIME);
        }
        None
    }

    /// Lock-guarded snapshot of emptiness
    pub fn is_empty(&self) -> bool {
        self.inbox.lock().is_empty()
    }
}

/// Identifies one point-to-point link
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChannelKey {
    pub send_rank: usize,
    pub recv_rank: usize,
    pub chan: u32,
}

#[derive(Debug, Default)]
struct Registry {
    pending: BTreeMap<ChannelKey, Arc<Mailbox>>,
    established: BTreeMap<ChannelKey, Arc<Mailbox>>,
}

/// Rendezvous registry pairing the sender and receiver endpoints of every
/// link. Both maps are guarded as a unit so the pending-to-established move
/// is atomic.
#[derive(Debug, Default)]
pub struct MailboxManager {
    registry: Mutex<Registry>,
}

impl MailboxManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the mailbox for the link, creating a pending entry when the
    /// receiver has not connected yet. The flag reports whether the mailbox
    /// was newly created. Never blocks.
    pub fn send_mailbox(&self, key: ChannelKey) -> (Arc<Mailbox>, bool) {
        let mut registry = self.registry.lock();
        if let Some(mailbox) = registry.established.get(&key) {
            return (Arc::clone(mailbox), false);
        }
        let mailbox = Arc::new(Mailbox::default());
        registry.pending.insert(key, Arc::clone(&mailbox));
        (mailbox, true)
    }

    /// Poll for a pending sender registration for the link, atomically
    /// moving it to the established map. Returns `None` after exhausting
    /// the budget: the plan specifies a receive on a link no sender ever
    /// requested.
    pub fn recv_mailbox(&self, key: ChannelKey) -> Option<Arc<Mailbox>> {
        for _ in 0..MAX_TRIES {
            {
                let mut registry = self.registry.lock();
                if let Some(mailbox) = registry.pending.remove(&key) {
                    registry.established.insert(key, Arc::clone(&mailbox));
                    return Some(mailbox);
                }
            }
            std::thread::sleep(SLEEP_TIME);
        }
        None
    }

    /// Every sender has been paired with a receiver
    pub fn no_pending_connections(&self) -> Result<()> {
        let registry = self.registry.lock();
        match registry.pending.keys().next() {
            Some(key) => Err(Error::ResidualPendingConnection {
                send_rank: key.send_rank,
                recv_rank: key.recv_rank,
                chan: key.chan,
            }),
            None => Ok(()),
        }
    }

    /// Within one channel, the established links form a partial matching on
    /// ranks: no rank appears twice as sender and none twice as receiver.
    pub fn valid_channel_layout(&self) -> Result<()> {
        let registry = self.registry.lock();
        let mut senders = BTreeSet::new();
        let mut receivers = BTreeSet::new();
        for key in registry.established.keys() {
            if !senders.insert((key.chan, key.send_rank)) {
                return Err(Error::InvalidChannelLayout {
                    rank: key.send_rank,
                    role: "sender",
                    chan: key.chan,
                });
            }
            if !receivers.insert((key.chan, key.recv_rank)) {
                return Err(Error::InvalidChannelLayout {
                    rank: key.recv_rank,
                    role: "receiver",
                    chan: key.chan,
                });
            }
        }
        Ok(())
    }

    /// Every established mailbox is empty; run after each iteration to
    /// catch orphaned sends.
    pub fn no_pending_messages(&self) -> Result<()> {
        let registry = self.registry.lock();
        for (key, mailbox) in &registry.established {
            if !mailbox.is_empty() {
                return Err(Error::ResidualMessage {
                    send_rank: key.send_rank,
                    recv_rank: key.recv_rank,
                    chan: key.chan,
                });
            }
        }
        Ok(())
    }
}
