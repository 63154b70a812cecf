//! Live, subscribable read models over an append-only content-addressed
//! ledger.
//!
//! Producers elsewhere append immutable records and typed links to the
//! ledger; this crate turns a fetch function and a push-notification feed
//! into local, always-current collections: the non-deleted links from a
//! base, the latest revision of a record, every deletion of a link.
//!
//! Each [`View`] is demand-activated: it fetches once on first subscribe
//! and then on a fixed interval, applies matching [`Signal`]s the moment
//! they arrive, deduplicates and orders the merged result, and publishes
//! only when the value actually changed. When the last subscriber detaches,
//! all activity stops and the view forgets its state; re-subscribing starts
//! a fresh cycle rather than serving a value that could not be validated.
//!
//! ```no_run
//! use ledger_views::{FetchError, Id, IdKind, SignalHub, Status, Views};
//!
//! # async fn example() {
//! let signals = SignalHub::new();
//! let views = Views::new(signals.clone());
//!
//! let base = Id::new(IdKind::Entry, [0; 32]);
//! let members = views.live_link_targets(base, "member", move || async move {
//!     // one authoritative read against the ledger client
//!     Ok::<_, FetchError>(Vec::new())
//! });
//!
//! let mut subscription = members.subscribe();
//! if let Status::Ready(targets) = subscription.updated().await {
//!     println!("{} members", targets.len());
//! }
//! # }
//! ```

mod error;
pub mod id;
pub mod ledger;
mod retry;
pub mod signals;
mod util;
pub mod view;
pub mod views;

pub use self::{
    error::FetchError,
    id::{ActionId, AgentId, EntryId, Id, IdKind, ParseIdError, uniquify},
    ledger::{DeletedLink, Link, LinkDelete, LinkType, LinkTypeSet, Record, RecordDelete, Timestamp},
    signals::{Signal, SignalHub},
    view::{Activation, Publisher, Status, StatusStream, Subscription, Updated, View},
    views::{DEFAULT_POLL_INTERVAL, ViewOptions, Views},
};
