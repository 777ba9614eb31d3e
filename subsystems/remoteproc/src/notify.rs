//! # Notification Channel
//!
//! One-way, unacknowledged signalling between the controller and the
//! remote unit.
//!
//! ## Model
//!
//! - One handler slot per role; registering replaces the previous handler
//! - One bounded mailbox per role; `signal` queues and rings the doorbell
//! - `handle_interrupt` runs on the receiving side and drains its mailbox
//!
//! Signals to one role are delivered in the order they were queued. A full
//! mailbox drops the new signal; a signal with no handler armed is logged
//! and discarded.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::{Mutex, RwLock};

use crate::config::RprocConfig;
use crate::platform::Doorbell;
use crate::role::Role;
use crate::RprocError;

/// What one side tells the other
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The remote unit finished booting
    BootAck,
    /// Work is pending on the given virtqueue
    Kick(u32),
}

/// Callback run for every signal delivered to a role
pub type SignalHandler = Arc<dyn Fn(Signal) + Send + Sync>;

// =============================================================================
// Mailbox
// =============================================================================

/// Fixed-capacity FIFO of pending signals
#[derive(Debug)]
struct Mailbox {
    /// Storage
    slots: Vec<Option<Signal>>,
    /// Read position
    read_pos: usize,
    /// Write position
    write_pos: usize,
    /// Number of queued signals
    count: usize,
}

impl Mailbox {
    fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize(capacity, None);
        Self {
            slots,
            read_pos: 0,
            write_pos: 0,
            count: 0,
        }
    }

    fn push(&mut self, signal: Signal) -> Result<(), Signal> {
        if self.count >= self.slots.len() {
            return Err(signal);
        }

        self.slots[self.write_pos] = Some(signal);
        self.write_pos = (self.write_pos + 1) % self.slots.len();
        self.count += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<Signal> {
        if self.count == 0 {
            return None;
        }

        let signal = self.slots[self.read_pos].take();
        self.read_pos = (self.read_pos + 1) % self.slots.len();
        self.count -= 1;
        signal
    }

    fn len(&self) -> usize {
        self.count
    }

    fn clear(&mut self) -> usize {
        let dropped = self.count;
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.read_pos = 0;
        self.write_pos = 0;
        self.count = 0;
        dropped
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicUsize,
    delivered: AtomicUsize,
    dropped: AtomicUsize,
    unhandled: AtomicUsize,
}

/// Snapshot of channel activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Signals queued
    pub sent: usize,
    /// Signals passed to a handler
    pub delivered: usize,
    /// Signals lost to a full mailbox
    pub dropped: usize,
    /// Signals drained with no handler armed
    pub unhandled: usize,
}

impl fmt::Display for ChannelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent {} delivered {} dropped {} unhandled {}",
            self.sent, self.delivered, self.dropped, self.unhandled
        )
    }
}

// =============================================================================
// Channel
// =============================================================================

/// Kick channel shared by both sides of the link
pub struct NotificationChannel {
    /// Handler slot per role
    handlers: [RwLock<Option<SignalHandler>>; 2],
    /// Pending signals per role
    mailboxes: [Mutex<Mailbox>; 2],
    /// Interrupt delivery
    doorbell: Arc<dyn Doorbell>,
    /// Vector raised on every signal
    vector: u8,
    /// Activity counters
    counters: Counters,
}

impl NotificationChannel {
    /// Create a channel holding up to `depth` pending signals per role.
    pub fn new(doorbell: Arc<dyn Doorbell>, vector: u8, depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            handlers: [RwLock::new(None), RwLock::new(None)],
            mailboxes: [Mutex::new(Mailbox::new(depth)), Mutex::new(Mailbox::new(depth))],
            doorbell,
            vector,
            counters: Counters::default(),
        }
    }

    /// Create a channel with the kick vector and mailbox depth of `config`.
    pub fn from_config(doorbell: Arc<dyn Doorbell>, config: &RprocConfig) -> Self {
        Self::new(doorbell, config.kick_vector, config.mailbox_depth)
    }

    /// Arm `handler` for signals sent to `role`.
    ///
    /// Returns the handler it replaced, if any.
    pub fn register<F>(&self, role: Role, handler: F) -> Option<SignalHandler>
    where
        F: Fn(Signal) + Send + Sync + 'static,
    {
        let handler: SignalHandler = Arc::new(handler);
        self.handlers[role.index()].write().replace(handler)
    }

    /// Disarm the handler of `role`.
    pub fn unregister(&self, role: Role) -> Option<SignalHandler> {
        self.handlers[role.index()].write().take()
    }

    /// Whether `role` has a handler armed
    pub fn is_armed(&self, role: Role) -> bool {
        self.handlers[role.index()].read().is_some()
    }

    /// Queue `signal` for `target` and ring its doorbell.
    ///
    /// Never blocks beyond the mailbox lock. Returns `false` if the
    /// mailbox was full and the signal was dropped.
    pub fn signal(&self, target: Role, signal: Signal) -> bool {
        let queued = self.mailboxes[target.index()].lock().push(signal);

        if queued.is_err() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!("rproc: mailbox of {} full, dropping {:?}", target, signal);
            return false;
        }

        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        self.doorbell.ring(target, self.vector);
        true
    }

    /// Deliver every signal pending for `role` to its handler.
    ///
    /// Called from the interrupt path of the receiving side, or polled.
    /// Returns the number of signals a handler saw.
    pub fn handle_interrupt(&self, role: Role) -> usize {
        let mut delivered = 0;

        loop {
            // Lock released before the handler runs so it may signal back
            let next = self.mailboxes[role.index()].lock().pop();
            let Some(signal) = next else {
                break;
            };
            let handler = self.handlers[role.index()].read().clone();

            match handler {
                Some(handler) => {
                    log::debug!("rproc: dispatching {:?} to {}", signal, role);
                    handler(signal);
                    delivered += 1;
                },
                None => {
                    self.counters.unhandled.fetch_add(1, Ordering::Relaxed);
                    log::warn!("rproc: {} ({:?})", RprocError::UnhandledSignal(role), signal);
                },
            }
        }

        self.counters.delivered.fetch_add(delivered, Ordering::Relaxed);
        delivered
    }

    /// Signals waiting for `role`
    pub fn pending(&self, role: Role) -> usize {
        self.mailboxes[role.index()].lock().len()
    }

    /// Drop every signal waiting for `role` without delivering it.
    ///
    /// Returns the number of signals thrown away.
    pub fn discard(&self, role: Role) -> usize {
        let dropped = self.mailboxes[role.index()].lock().clear();
        if dropped > 0 {
            log::debug!("rproc: discarded {} pending signal(s) for {}", dropped, role);
        }
        dropped
    }

    /// Activity counters
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            unhandled: self.counters.unhandled.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("vector", &self.vector)
            .field("stats", &self.stats())
            .finish()
    }
}
