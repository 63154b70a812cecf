//! Push notifications from the ledger client.
//!
//! Signals are best effort: they may be dropped, duplicated or delivered
//! out of order. Views apply them optimistically between polls and rely on
//! the poll for authoritative state, so a missed signal only costs latency,
//! never correctness.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::ledger::{Link, LinkDelete, LinkTypeSet, Record, RecordDelete};

/// Capacity of the broadcast channel behind a [`SignalHub`].
///
/// A receiver that falls further behind than this drops the oldest
/// signals; the view's next poll repairs whatever was missed.
const SIGNAL_CAP: usize = 1024;

/// A notification that some action was committed to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// A new link was committed.
    LinkCreated {
        /// The created link.
        link: Link,
        /// Declared type names the link's concrete type satisfies.
        link_types: LinkTypeSet,
    },
    /// A link was deleted.
    LinkDeleted {
        /// The link the delete refers to, as originally created.
        link: Link,
        /// The delete action itself.
        delete: LinkDelete,
        /// Declared type names the link's concrete type satisfies.
        link_types: LinkTypeSet,
    },
    /// A record was updated with a new revision.
    RecordUpdated {
        /// The new revision; [`Record::original`] names its predecessor.
        record: Record,
    },
    /// A record was deleted.
    RecordDeleted {
        /// The delete action.
        delete: RecordDelete,
    },
    /// Application-defined payload sharing the channel; no view interprets
    /// it.
    App(Bytes),
}

/// Fan-out hub for [`Signal`]s.
///
/// The ledger client pushes every signal it receives into the hub; each
/// active view holds its own receiver. Cloning the hub clones a handle to
/// the same channel.
#[derive(Debug, Clone)]
pub struct SignalHub {
    tx: broadcast::Sender<Signal>,
}

impl SignalHub {
    /// Creates a hub with the default buffer capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CAP);
        Self { tx }
    }

    /// Delivers a signal to every current receiver.
    ///
    /// A signal emitted while nothing is subscribed is dropped, which is
    /// fine: an inactive view refetches from scratch on activation.
    pub fn emit(&self, signal: Signal) {
        self.tx.send(signal).ok();
    }

    /// Registers a new receiver; it observes every signal emitted from now
    /// on. Dropping the receiver detaches it.
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.tx.subscribe()
    }
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}
